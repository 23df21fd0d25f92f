//! Upper bound on silence between recorded quality samples.
//!
//! Evaluated after change detection so an organic quality change is never
//! duplicated by a forced record in the same tick.

use crate::sampling::SessionState;

/// Which forced records a tick must append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForcedRecord {
    pub quality: bool,
    pub buffer: bool,
}

impl ForcedRecord {
    pub fn any(&self) -> bool {
        self.quality || self.buffer
    }
}

/// True once `spacing_seconds` have passed since the last forced record.
pub fn force_due(state: &SessionState, time_offset: u64, spacing_seconds: u64) -> bool {
    let since = time_offset as i64 - state.last_forced_record;
    since >= spacing_seconds as i64
}

/// Resolves the forced records for one tick given what the detectors already
/// decided to record.
pub fn forced_records(due: bool, quality_changed: bool, milestone_crossed: bool) -> ForcedRecord {
    if !due || quality_changed {
        return ForcedRecord::default();
    }
    ForcedRecord {
        quality: true,
        buffer: !milestone_crossed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_force_is_due_one_tick_before_spacing() {
        // The watermark starts at -1, so t=14 already spans 15 s.
        let state = SessionState::new();
        assert!(!force_due(&state, 13, 15));
        assert!(force_due(&state, 14, 15));
    }

    #[test]
    fn due_after_spacing_since_last_force() {
        let mut state = SessionState::new();
        state.last_forced_record = 20;
        assert!(!force_due(&state, 34, 15));
        assert!(force_due(&state, 35, 15));
    }

    #[test]
    fn organic_change_suppresses_forced_records() {
        assert_eq!(forced_records(true, true, false), ForcedRecord::default());
        assert!(!forced_records(false, false, false).any());
    }

    #[test]
    fn milestone_suppresses_forced_buffer_only() {
        let forced = forced_records(true, false, true);
        assert!(forced.quality);
        assert!(!forced.buffer);

        let forced = forced_records(true, false, false);
        assert!(forced.quality && forced.buffer);
    }
}
