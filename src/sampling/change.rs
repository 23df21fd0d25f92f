//! Change detection for quality and buffer readings.
//!
//! Both predicates are pure: they inspect the prior [`SessionState`] and never
//! mutate it. The caller decides whether to record, and recording is what
//! moves the state forward.

use std::collections::BTreeSet;

use crate::config::MILESTONE_STEP_SECONDS;
use crate::samples::Resolution;
use crate::sampling::SessionState;

/// True when no resolution has been recorded yet or the pair differs from the
/// last recorded one.
pub fn quality_changed(state: &SessionState, resolution: Resolution) -> bool {
    match state.last_resolution {
        None => true,
        Some(last) => last != resolution,
    }
}

/// Buffer depth rounded down to the nearest milestone bucket.
pub fn milestone_candidate(buffer_seconds: f64) -> u32 {
    if !buffer_seconds.is_finite() || buffer_seconds <= 0.0 {
        return 0;
    }
    let bucket = (buffer_seconds / MILESTONE_STEP_SECONDS as f64).floor();
    (bucket as u32).saturating_mul(MILESTONE_STEP_SECONDS)
}

/// True when the reading lands in a milestone bucket above the watermark.
///
/// Candidates outside `milestones` never fire, so with the default set nothing
/// above 30 s is ever recorded as a milestone.
pub fn buffer_milestone_crossed(
    state: &SessionState,
    buffer_seconds: f64,
    milestones: &BTreeSet<u32>,
) -> bool {
    let candidate = milestone_candidate(buffer_seconds);
    Some(candidate) > state.last_milestone && milestones.contains(&candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_milestones() -> BTreeSet<u32> {
        [5, 10, 15, 20, 25, 30].into_iter().collect()
    }

    #[test]
    fn first_reading_is_always_a_change() {
        let state = SessionState::new();
        assert!(quality_changed(&state, Resolution::new(1280, 720)));
    }

    #[test]
    fn same_resolution_is_not_a_change() {
        let mut state = SessionState::new();
        state.last_resolution = Some(Resolution::new(1280, 720));
        assert!(!quality_changed(&state, Resolution::new(1280, 720)));
        assert!(quality_changed(&state, Resolution::new(1280, 719)));
    }

    #[test]
    fn candidate_floors_to_bucket() {
        assert_eq!(milestone_candidate(4.99), 0);
        assert_eq!(milestone_candidate(5.0), 5);
        assert_eq!(milestone_candidate(14.2), 10);
        assert_eq!(milestone_candidate(-3.0), 0);
        assert_eq!(milestone_candidate(f64::NAN), 0);
    }

    #[test]
    fn milestone_fires_only_above_watermark() {
        let mut state = SessionState::new();
        let milestones = default_milestones();
        assert!(buffer_milestone_crossed(&state, 5.1, &milestones));
        state.last_milestone = Some(5);
        assert!(!buffer_milestone_crossed(&state, 9.9, &milestones));
        assert!(buffer_milestone_crossed(&state, 10.0, &milestones));
    }

    #[test]
    fn zero_bucket_never_fires() {
        let state = SessionState::new();
        assert!(!buffer_milestone_crossed(&state, 3.0, &default_milestones()));
    }

    #[test]
    fn buckets_above_the_set_never_fire() {
        let mut state = SessionState::new();
        state.last_milestone = Some(30);
        assert!(!buffer_milestone_crossed(&state, 35.0, &default_milestones()));
        assert!(!buffer_milestone_crossed(&state, 120.0, &default_milestones()));
    }
}
