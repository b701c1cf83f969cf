//! Run-frequency gate.
//!
//! Advisory only: the check and the later `last_run` update are separate
//! steps, so two processes sharing one history can both pass the gate.

use bulletin_shared::RunState;
use chrono::{DateTime, Duration, Utc};

/// True if there is no previous run, or at least `frequency_hours` have
/// passed since it.
pub fn should_run(state: &RunState, now: DateTime<Utc>) -> bool {
    match state.last_run {
        None => true,
        Some(last) => now - last >= frequency(state),
    }
}

/// When the gate opens next. `None` if it is already open.
pub fn next_run_at(state: &RunState, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let last = state.last_run?;
    let next = last + frequency(state);
    (next > now).then_some(next)
}

/// Hours until the gate opens, for logging. Zero if already open.
pub fn hours_remaining(state: &RunState, now: DateTime<Utc>) -> f64 {
    next_run_at(state, now)
        .map(|next| (next - now).num_seconds() as f64 / 3600.0)
        .unwrap_or(0.0)
}

fn frequency(state: &RunState) -> Duration {
    Duration::hours(i64::from(state.frequency_hours))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, hour, 0, 0).unwrap()
    }

    #[test]
    fn first_run_always_allowed() {
        let state = RunState::new(24);
        assert!(should_run(&state, at(0)));
        assert_eq!(next_run_at(&state, at(0)), None);
    }

    #[test]
    fn gate_opens_at_exact_frequency() {
        let state = RunState::new(6).with_last_run(Some(at(2)));
        assert!(!should_run(&state, at(7)));
        assert!(should_run(&state, at(8)));
        assert!(should_run(&state, at(20)));
    }

    #[test]
    fn next_run_and_remaining_hours() {
        let state = RunState::new(6).with_last_run(Some(at(2)));
        assert_eq!(next_run_at(&state, at(5)), Some(at(8)));
        assert!((hours_remaining(&state, at(5)) - 3.0).abs() < f64::EPSILON);
        assert_eq!(next_run_at(&state, at(9)), None);
        assert_eq!(hours_remaining(&state, at(9)), 0.0);
    }

    #[test]
    fn zero_frequency_never_blocks() {
        let state = RunState::new(0).with_last_run(Some(at(10)));
        assert!(should_run(&state, at(10)));
    }

    #[test]
    fn clock_going_backwards_blocks() {
        let state = RunState::new(1).with_last_run(Some(at(10)));
        assert!(!should_run(&state, at(9)));
    }
}
