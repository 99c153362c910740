// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session transition logic, kept pure for property testing.
//!
//! The state machine fuses detections from the network, pattern, and hook
//! sources into a minimal transition sequence. Cooldowns and the IDLE
//! persistence windows only constrain the pattern source; network and hook
//! signals are authoritative and apply immediately. All timer and HTTP
//! work lives in the tracker shell.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::state::{Confidence, Detection, Source, TaskState};

/// Minimum quiet period before a pattern transition *into* WORKING/PENDING.
pub const ENTER_ACTIVE_COOLDOWN: Duration = Duration::from_millis(500);

/// Minimum quiet period before a pattern transition *out of* WORKING/PENDING.
pub const EXIT_ACTIVE_COOLDOWN: Duration = Duration::from_millis(3000);

/// Minimum quiet period for all other pattern transitions.
pub const OTHER_COOLDOWN: Duration = Duration::from_millis(1000);

/// How long WORKING persists against non-high IDLE detections.
pub const WORKING_PERSISTENCE: Duration = Duration::from_secs(10);

/// How long PENDING persists against non-high IDLE detections.
pub const PENDING_PERSISTENCE: Duration = Duration::from_secs(15);

/// Transitions kept for the debug endpoint.
const HISTORY_CAP: usize = 10;

/// An accepted state transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: TaskState,
    pub to: TaskState,
    pub source: Source,
    pub confidence: Confidence,
    pub cause: String,
}

/// Why a candidate detection was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The session already reached a terminal state.
    Terminal,
    /// Candidate equals the current state.
    Duplicate,
    /// A pattern cooldown window has not yet elapsed.
    Cooldown,
    /// An active state is being held through a momentary lull.
    IdlePersistence,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terminal => "terminal",
            Self::Duplicate => "duplicate",
            Self::Cooldown => "cooldown",
            Self::IdlePersistence => "idle-persistence",
        }
    }
}

/// Per-session fusion state machine.
#[derive(Debug)]
pub struct SessionFsm {
    current: TaskState,
    /// Set once the first transition lands; cooldowns only apply after.
    last_change_at: Option<Instant>,
    /// Most recent WORKING-confirming signal (any source).
    last_working_signal: Option<Instant>,
    /// Most recent PENDING-confirming signal (any source).
    last_pending_signal: Option<Instant>,
    history: VecDeque<Transition>,
}

impl SessionFsm {
    pub fn new(_start: Instant) -> Self {
        Self {
            current: TaskState::Idle,
            last_change_at: None,
            last_working_signal: None,
            last_pending_signal: None,
            history: VecDeque::new(),
        }
    }

    pub fn current(&self) -> TaskState {
        self.current
    }

    pub fn history(&self) -> impl Iterator<Item = &Transition> {
        self.history.iter()
    }

    /// Apply a detection, returning the accepted transition or why it was
    /// dropped.
    pub fn apply(&mut self, det: &Detection, now: Instant) -> Result<Transition, Rejection> {
        if self.current.is_terminal() {
            return Err(Rejection::Terminal);
        }

        // Confirming signals refresh the persistence stamps whether or not
        // the detection produces a transition.
        match det.state {
            TaskState::Working => self.last_working_signal = Some(now),
            TaskState::Pending => self.last_pending_signal = Some(now),
            _ => {}
        }

        if det.state == self.current {
            return Err(Rejection::Duplicate);
        }

        if det.source == Source::Pattern {
            if let Some(changed_at) = self.last_change_at {
                let since_change = now.saturating_duration_since(changed_at);
                if since_change < self.cooldown_for(det.state) {
                    return Err(Rejection::Cooldown);
                }
            }
            if det.state == TaskState::Idle
                && self.current.is_active()
                && det.confidence != Confidence::High
                && !self.active_state_expired(now)
            {
                return Err(Rejection::IdlePersistence);
            }
        }

        let transition = Transition {
            from: self.current,
            to: det.state,
            source: det.source,
            confidence: det.confidence,
            cause: det.cause.clone(),
        };
        self.current = det.state;
        self.last_change_at = Some(now);
        self.history.push_back(transition.clone());
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }
        Ok(transition)
    }

    /// Cooldown for a candidate pattern transition to `next`.
    ///
    /// Entering an active state stays fast (prompts are urgent); leaving
    /// one is slow so streaming lulls do not flap the state.
    fn cooldown_for(&self, next: TaskState) -> Duration {
        if next.is_active() {
            ENTER_ACTIVE_COOLDOWN
        } else if self.current.is_active() {
            EXIT_ACTIVE_COOLDOWN
        } else {
            OTHER_COOLDOWN
        }
    }

    /// Whether the current active state has outlived its persistence
    /// window without a confirming signal.
    fn active_state_expired(&self, now: Instant) -> bool {
        let (stamp, window) = match self.current {
            TaskState::Working => (self.last_working_signal, WORKING_PERSISTENCE),
            TaskState::Pending => (self.last_pending_signal, PENDING_PERSISTENCE),
            _ => return true,
        };
        match (stamp, self.last_change_at) {
            (Some(at), _) => now.saturating_duration_since(at) >= window,
            // No confirming signal recorded; fall back to the last change.
            (None, Some(changed_at)) => now.saturating_duration_since(changed_at) >= window,
            (None, None) => true,
        }
    }
}

#[cfg(test)]
#[path = "fsm_tests.rs"]
mod tests;
