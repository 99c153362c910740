// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::{Duration, Instant};

use super::*;

fn det(state: TaskState, source: Source, confidence: Confidence) -> Detection {
    Detection::new(state, source, confidence, "test")
}

fn pattern(state: TaskState, confidence: Confidence) -> Detection {
    det(state, Source::Pattern, confidence)
}

fn network(state: TaskState) -> Detection {
    det(state, Source::Network, Confidence::High)
}

#[test]
fn network_transitions_apply_immediately() {
    let t0 = Instant::now();
    let mut fsm = SessionFsm::new(t0);

    let accepted = fsm.apply(&network(TaskState::Working), t0);
    assert!(accepted.is_ok());
    // Straight back to IDLE with zero elapsed time: no cooldown for network.
    let accepted = fsm.apply(&network(TaskState::Idle), t0);
    assert!(accepted.is_ok());
    assert_eq!(fsm.current(), TaskState::Idle);
}

#[test]
fn hook_source_bypasses_cooldowns() {
    let t0 = Instant::now();
    let mut fsm = SessionFsm::new(t0);
    assert!(fsm.apply(&det(TaskState::Working, Source::Hook, Confidence::High), t0).is_ok());
    assert!(fsm.apply(&det(TaskState::Idle, Source::Hook, Confidence::High), t0).is_ok());
}

#[test]
fn duplicate_states_are_suppressed() {
    let t0 = Instant::now();
    let mut fsm = SessionFsm::new(t0);
    let result = fsm.apply(&pattern(TaskState::Idle, Confidence::High), t0);
    assert_eq!(result.err(), Some(Rejection::Duplicate));
}

#[test]
fn first_detection_applies_without_cooldown() {
    let t0 = Instant::now();
    let mut fsm = SessionFsm::new(t0);
    // A prompt on the very first output chunk must land immediately.
    assert!(fsm.apply(&pattern(TaskState::Pending, Confidence::High), t0).is_ok());
    assert_eq!(fsm.current(), TaskState::Pending);
}

#[test]
fn pattern_entry_to_active_needs_500ms() {
    let t0 = Instant::now();
    let mut fsm = SessionFsm::new(t0);
    assert!(fsm.apply(&network(TaskState::Working), t0).is_ok());
    assert!(fsm.apply(&network(TaskState::Idle), t0).is_ok());

    let early =
        fsm.apply(&pattern(TaskState::Working, Confidence::High), t0 + Duration::from_millis(100));
    assert_eq!(early.err(), Some(Rejection::Cooldown));

    let late =
        fsm.apply(&pattern(TaskState::Working, Confidence::High), t0 + ENTER_ACTIVE_COOLDOWN);
    assert!(late.is_ok());
}

#[test]
fn pattern_exit_from_active_needs_3s() {
    let t0 = Instant::now();
    let mut fsm = SessionFsm::new(t0);
    let t1 = t0 + Duration::from_secs(1);
    assert!(fsm.apply(&pattern(TaskState::Working, Confidence::High), t1).is_ok());

    // High-confidence IDLE soon after: held back by the exit cooldown.
    let early = fsm.apply(&pattern(TaskState::Idle, Confidence::High), t1 + Duration::from_secs(1));
    assert_eq!(early.err(), Some(Rejection::Cooldown));

    let late = fsm.apply(&pattern(TaskState::Idle, Confidence::High), t1 + EXIT_ACTIVE_COOLDOWN);
    assert!(late.is_ok());
}

#[test]
fn low_confidence_idle_is_held_through_working_persistence() {
    let t0 = Instant::now();
    let mut fsm = SessionFsm::new(t0);
    let t1 = t0 + Duration::from_secs(1);
    assert!(fsm.apply(&pattern(TaskState::Working, Confidence::High), t1).is_ok());

    // Past the exit cooldown but inside the 10 s persistence window.
    let probe = fsm.apply(&pattern(TaskState::Idle, Confidence::Low), t1 + Duration::from_secs(5));
    assert_eq!(probe.err(), Some(Rejection::IdlePersistence));
    assert_eq!(fsm.current(), TaskState::Working);

    // Once the window elapses with no confirming signal, IDLE lands.
    let result =
        fsm.apply(&pattern(TaskState::Idle, Confidence::Low), t1 + WORKING_PERSISTENCE);
    assert!(result.is_ok());
    assert_eq!(fsm.current(), TaskState::Idle);
}

#[test]
fn high_confidence_idle_breaks_persistence_after_cooldown() {
    let t0 = Instant::now();
    let mut fsm = SessionFsm::new(t0);
    let t1 = t0 + Duration::from_secs(1);
    assert!(fsm.apply(&pattern(TaskState::Working, Confidence::High), t1).is_ok());

    // High confidence skips persistence but still honors the exit cooldown.
    let result = fsm.apply(&pattern(TaskState::Idle, Confidence::High), t1 + EXIT_ACTIVE_COOLDOWN);
    assert!(result.is_ok());
}

#[test]
fn confirming_signals_extend_persistence() {
    let t0 = Instant::now();
    let mut fsm = SessionFsm::new(t0);
    let t1 = t0 + Duration::from_secs(1);
    assert!(fsm.apply(&pattern(TaskState::Working, Confidence::High), t1).is_ok());

    // A duplicate WORKING signal at t+8s refreshes the stamp.
    let t2 = t1 + Duration::from_secs(8);
    assert_eq!(
        fsm.apply(&pattern(TaskState::Working, Confidence::High), t2).err(),
        Some(Rejection::Duplicate)
    );

    // 10 s after the original change but only 4 s after the refresh.
    let probe = fsm.apply(&pattern(TaskState::Idle, Confidence::Low), t2 + Duration::from_secs(4));
    assert_eq!(probe.err(), Some(Rejection::IdlePersistence));

    let result = fsm.apply(&pattern(TaskState::Idle, Confidence::Low), t2 + WORKING_PERSISTENCE);
    assert!(result.is_ok());
}

#[test]
fn pending_persists_fifteen_seconds() {
    let t0 = Instant::now();
    let mut fsm = SessionFsm::new(t0);
    let t1 = t0 + Duration::from_secs(1);
    assert!(fsm.apply(&pattern(TaskState::Pending, Confidence::High), t1).is_ok());

    let probe = fsm.apply(&pattern(TaskState::Idle, Confidence::Low), t1 + Duration::from_secs(12));
    assert_eq!(probe.err(), Some(Rejection::IdlePersistence));

    let result =
        fsm.apply(&pattern(TaskState::Idle, Confidence::Low), t1 + PENDING_PERSISTENCE);
    assert!(result.is_ok());
}

#[test]
fn working_to_pending_uses_entry_cooldown() {
    let t0 = Instant::now();
    let mut fsm = SessionFsm::new(t0);
    let t1 = t0 + Duration::from_secs(1);
    assert!(fsm.apply(&pattern(TaskState::Working, Confidence::High), t1).is_ok());

    // Prompts are urgent: 500 ms, not the 3 s exit cooldown.
    let result =
        fsm.apply(&pattern(TaskState::Pending, Confidence::High), t1 + ENTER_ACTIVE_COOLDOWN);
    assert!(result.is_ok());
    assert_eq!(fsm.current(), TaskState::Pending);
}

#[test]
fn terminal_states_reject_everything() {
    let t0 = Instant::now();
    let mut fsm = SessionFsm::new(t0);
    assert!(fsm.apply(&network(TaskState::Done), t0).is_ok());

    let t_late = t0 + Duration::from_secs(60);
    assert_eq!(fsm.apply(&network(TaskState::Working), t_late).err(), Some(Rejection::Terminal));
    assert_eq!(
        fsm.apply(&pattern(TaskState::Idle, Confidence::High), t_late).err(),
        Some(Rejection::Terminal)
    );
    assert_eq!(fsm.current(), TaskState::Done);
}

#[test]
fn history_is_bounded_to_ten() {
    let t0 = Instant::now();
    let mut fsm = SessionFsm::new(t0);
    let mut now = t0;
    for i in 0..15 {
        let state = if i % 2 == 0 { TaskState::Working } else { TaskState::Idle };
        now += Duration::from_secs(1);
        assert!(fsm.apply(&network(state), now).is_ok());
    }
    assert_eq!(fsm.history().count(), 10);
}

#[test]
fn transition_records_source_and_cause() {
    let t0 = Instant::now();
    let mut fsm = SessionFsm::new(t0);
    let det = Detection::new(
        TaskState::Working,
        Source::Network,
        Confidence::High,
        "network:fetch-start:api.anthropic.com",
    );
    let transition = match fsm.apply(&det, t0) {
        Ok(t) => t,
        Err(e) => panic!("unexpected rejection: {e:?}"),
    };
    assert_eq!(transition.from, TaskState::Idle);
    assert_eq!(transition.to, TaskState::Working);
    assert_eq!(transition.source, Source::Network);
    assert!(transition.cause.contains("fetch-start"));
}
