// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-keyed pattern tables and output classification.
//!
//! Classifies a snippet of cleaned agent output into PENDING / WORKING /
//! IDLE with a confidence label and a diagnostic trace of every pattern
//! evaluated (surfaced through the broker's debug endpoint).

use regex::Regex;
use serde::Serialize;

use crate::state::{Confidence, TaskState};

/// How many recent lines PENDING patterns are matched against.
const PENDING_WINDOW: usize = 5;

/// How many recent lines WORKING patterns are matched against.
const WORKING_WINDOW: usize = 15;

/// Glyphs that terminate an idle input line (shell or agent prompt).
const PROMPT_GLYPHS: &[char] = &['\u{276f}', '$', '%', '>'];

/// Glyphs agents print when a turn completes.
const COMPLETION_GLYPHS: &[char] = &['\u{2713}', '\u{2714}', '\u{23fa}', '\u{25cf}'];

/// Static pattern table: `(agent, pending patterns, working patterns)`.
///
/// The gemini and codex rows carry the known starting set; extending an
/// agent is adding regexes to its row, new agents are new rows.
const PATTERN_TABLE: &[(&str, &[&str], &[&str])] = &[
    ("claude", &[r"\u{276f}\s*\d+\.\s+"], &["esc to interrupt"]),
    ("codex", &[r"yes/no", r"\u{258c}\s+Yes\s+No"], &["esc to interrupt"]),
    ("gemini", &[r"\u{25cf} \d+\. Yes"], &["esc to cancel"]),
];

/// Compiled pattern set for one agent.
#[derive(Debug)]
pub struct PatternSet {
    pending: Vec<Regex>,
    working: Vec<Regex>,
}

/// A single pattern evaluation, reported for observability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternTrace {
    pub pattern: String,
    pub matched: bool,
    pub expected_state: TaskState,
}

/// Outcome of classifying the rolling buffer tail.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOutcome {
    pub state: TaskState,
    pub confidence: Confidence,
    pub cause: String,
    pub trace: Vec<PatternTrace>,
}

impl PatternSet {
    /// Compile the pattern set for an agent. Unknown agents get an empty
    /// set and classify as IDLE only.
    pub fn compile(agent: &str) -> anyhow::Result<Self> {
        let row = PATTERN_TABLE.iter().find(|(name, _, _)| *name == agent);
        let (pending, working) = match row {
            Some((_, p, w)) => (*p, *w),
            None => (&[] as &[&str], &[] as &[&str]),
        };
        Ok(Self {
            pending: pending.iter().map(|p| Regex::new(p)).collect::<Result<_, _>>()?,
            working: working.iter().map(|p| Regex::new(p)).collect::<Result<_, _>>()?,
        })
    }

    /// Classify the current line plus recent buffer tail.
    ///
    /// Priority: PENDING (last 5 lines or the current line) over WORKING
    /// (last 15 lines) over IDLE. Returns `None` when there is nothing to
    /// classify yet.
    pub fn classify(&self, current: &str, tail: &[String]) -> Option<MatchOutcome> {
        if current.is_empty() && tail.iter().all(|l| l.is_empty()) {
            return None;
        }
        let mut trace = Vec::with_capacity(self.pending.len() + self.working.len());

        let pending_start = tail.len().saturating_sub(PENDING_WINDOW);
        let pending_lines = &tail[pending_start..];
        let mut pending_hit = None;
        for re in &self.pending {
            let matched = re.is_match(current) || pending_lines.iter().any(|l| re.is_match(l));
            trace.push(PatternTrace {
                pattern: re.as_str().to_owned(),
                matched,
                expected_state: TaskState::Pending,
            });
            if matched && pending_hit.is_none() {
                pending_hit = Some(re.as_str().to_owned());
            }
        }

        let working_start = tail.len().saturating_sub(WORKING_WINDOW);
        let working_lines = &tail[working_start..];
        let mut working_hit = None;
        for re in &self.working {
            let matched = working_lines.iter().any(|l| re.is_match(l)) || re.is_match(current);
            trace.push(PatternTrace {
                pattern: re.as_str().to_owned(),
                matched,
                expected_state: TaskState::Working,
            });
            if matched && working_hit.is_none() {
                working_hit = Some(re.as_str().to_owned());
            }
        }

        if let Some(pattern) = pending_hit {
            return Some(MatchOutcome {
                state: TaskState::Pending,
                confidence: Confidence::High,
                cause: format!("pattern:pending:{pattern}"),
                trace,
            });
        }
        if let Some(pattern) = working_hit {
            return Some(MatchOutcome {
                state: TaskState::Working,
                confidence: Confidence::High,
                cause: format!("pattern:working:{pattern}"),
                trace,
            });
        }

        let (confidence, cause) = idle_confidence(current, tail);
        Some(MatchOutcome { state: TaskState::Idle, confidence, cause, trace })
    }
}

/// Grade an IDLE classification.
///
/// High when a prompt or completion glyph terminates the buffer, medium
/// when a completion glyph appears in the recent tail, low otherwise.
fn idle_confidence(current: &str, tail: &[String]) -> (Confidence, String) {
    let last_non_empty = if current.is_empty() {
        tail.iter().rev().find(|l| !l.is_empty()).map(String::as_str)
    } else {
        Some(current)
    };

    if let Some(line) = last_non_empty {
        let starts_with_prompt = line.chars().next().is_some_and(|c| PROMPT_GLYPHS.contains(&c));
        let ends_with_glyph = line
            .chars()
            .last()
            .is_some_and(|c| PROMPT_GLYPHS.contains(&c) || COMPLETION_GLYPHS.contains(&c));
        if starts_with_prompt || ends_with_glyph {
            return (Confidence::High, "idle:prompt-glyph".to_owned());
        }
    }

    let recent_start = tail.len().saturating_sub(PENDING_WINDOW);
    let glyph_recent = tail[recent_start..]
        .iter()
        .any(|l| l.chars().any(|c| COMPLETION_GLYPHS.contains(&c)));
    if glyph_recent {
        (Confidence::Medium, "idle:recent-completion".to_owned())
    } else {
        (Confidence::Low, "idle:quiet".to_owned())
    }
}

#[cfg(test)]
#[path = "matcher_tests.rs"]
mod tests;
