//! Network phase scheduling.
//!
//! Maps elapsed session time to one of three phases. The scheduler itself only
//! decides; the session controller issues the throttle command for each
//! transition it returns.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{CompiledSessionConfig, PhaseParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPhase {
    Phase1,
    Phase2,
    Phase3,
}

impl NetworkPhase {
    pub fn ordinal(&self) -> u8 {
        match self {
            NetworkPhase::Phase1 => 1,
            NetworkPhase::Phase2 => 2,
            NetworkPhase::Phase3 => 3,
        }
    }
}

impl fmt::Display for NetworkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase{}", self.ordinal())
    }
}

/// A phase change the controller must apply through the throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub from: NetworkPhase,
    pub to: NetworkPhase,
    pub params: PhaseParams,
}

/// Decides phase transitions from elapsed time.
#[derive(Debug, Clone)]
pub struct PhaseScheduler {
    enabled: bool,
    phase2_start: Duration,
    phase3_start: Duration,
    high: PhaseParams,
    low: PhaseParams,
}

impl PhaseScheduler {
    pub fn new(config: &CompiledSessionConfig) -> Self {
        Self {
            enabled: config.shaping_enabled,
            phase2_start: Duration::from_secs(config.phase2_start_seconds),
            phase3_start: Duration::from_secs(config.phase3_start_seconds),
            high: config.phase_high,
            low: config.phase_low,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Throttle parameters for a phase. Phase1 and phase3 share the high link.
    pub fn params(&self, phase: NetworkPhase) -> PhaseParams {
        match phase {
            NetworkPhase::Phase1 | NetworkPhase::Phase3 => self.high,
            NetworkPhase::Phase2 => self.low,
        }
    }

    /// Returns the transition due at `elapsed`, if any.
    ///
    /// The phase3 rule is checked first and only from phase2, so a tick delayed
    /// past both boundaries advances a single phase; the next tick completes
    /// the walk. Disabled schedulers never transition.
    pub fn step(&self, elapsed: Duration, current: NetworkPhase) -> Option<PhaseTransition> {
        if !self.enabled {
            return None;
        }
        let to = if elapsed >= self.phase3_start && current == NetworkPhase::Phase2 {
            NetworkPhase::Phase3
        } else if elapsed >= self.phase2_start && current == NetworkPhase::Phase1 {
            NetworkPhase::Phase2
        } else {
            return None;
        };
        Some(PhaseTransition {
            from: current,
            to,
            params: self.params(to),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;

    fn scheduler(shaping: bool) -> PhaseScheduler {
        let mut cfg = SessionConfig::default();
        cfg.shaping_enabled = shaping;
        PhaseScheduler::new(&cfg.compile().unwrap())
    }

    #[test]
    fn transitions_fire_at_boundaries() {
        let s = scheduler(true);
        assert!(s.step(Duration::from_secs_f64(44.9), NetworkPhase::Phase1).is_none());
        let t = s.step(Duration::from_secs(45), NetworkPhase::Phase1).unwrap();
        assert_eq!(t.to, NetworkPhase::Phase2);
        assert_eq!(t.params, PhaseParams::low());

        assert!(s.step(Duration::from_secs(89), NetworkPhase::Phase2).is_none());
        let t = s.step(Duration::from_secs(90), NetworkPhase::Phase2).unwrap();
        assert_eq!(t.to, NetworkPhase::Phase3);
        assert_eq!(t.params, PhaseParams::high());
    }

    #[test]
    fn each_boundary_fires_once() {
        let s = scheduler(true);
        assert!(s.step(Duration::from_secs(60), NetworkPhase::Phase2).is_none());
        assert!(s.step(Duration::from_secs(120), NetworkPhase::Phase3).is_none());
    }

    #[test]
    fn delayed_tick_advances_one_phase_at_a_time() {
        let s = scheduler(true);
        let first = s.step(Duration::from_secs(95), NetworkPhase::Phase1).unwrap();
        assert_eq!(first.to, NetworkPhase::Phase2);
        let second = s.step(Duration::from_secs(96), first.to).unwrap();
        assert_eq!(second.to, NetworkPhase::Phase3);
    }

    #[test]
    fn disabled_scheduler_is_a_no_op() {
        let s = scheduler(false);
        assert!(s.step(Duration::from_secs(50), NetworkPhase::Phase1).is_none());
        assert!(s.step(Duration::from_secs(100), NetworkPhase::Phase2).is_none());
    }

    #[test]
    fn phase1_and_phase3_are_distinct_but_share_params() {
        let s = scheduler(true);
        assert_ne!(NetworkPhase::Phase1, NetworkPhase::Phase3);
        assert_eq!(s.params(NetworkPhase::Phase1), s.params(NetworkPhase::Phase3));
        assert_eq!(NetworkPhase::Phase3.to_string(), "phase3");
    }
}
