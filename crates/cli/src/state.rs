// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Liveness states reported to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Idle,
    Working,
    Pending,
    Done,
    Error,
    Cancelled,
}

impl TaskState {
    /// Wire-format string (e.g. `"PENDING"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Working => "WORKING",
            Self::Pending => "PENDING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }

    /// Active states hold attention: the agent is computing or blocking on
    /// a user decision.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Working | Self::Pending)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which detection source produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Network,
    Pattern,
    Hook,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Pattern => "pattern",
            Self::Hook => "hook",
        }
    }
}

/// Confidence label attached to a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// UI verdict for an outstanding tool approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

/// One classified observation handed to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub state: TaskState,
    pub source: Source,
    pub confidence: Confidence,
    /// Freeform diagnostic, e.g. `"pattern:pending"` or `"network:fetch-start"`.
    pub cause: String,
}

impl Detection {
    pub fn new(state: TaskState, source: Source, confidence: Confidence, cause: impl Into<String>) -> Self {
        Self { state, source, confidence, cause: cause.into() }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
