use std::fmt;

use thiserror::Error;

/// Lifecycle of a sampling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    Connecting,
    AwaitingSensorReady,
    Running,
    Draining,
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal session transition {from} -> {to}")]
pub struct StageError {
    pub from: SessionStage,
    pub to: SessionStage,
}

impl SessionStage {
    /// Validates and performs a transition.
    ///
    /// Failure edges go straight to `Closed` from the two startup stages;
    /// `Running` may only leave through `Draining`.
    pub fn transition(self, next: SessionStage) -> Result<SessionStage, StageError> {
        use SessionStage::*;
        let allowed = matches!(
            (self, next),
            (Connecting, AwaitingSensorReady)
                | (Connecting, Closed)
                | (AwaitingSensorReady, Running)
                | (AwaitingSensorReady, Closed)
                | (Running, Draining)
                | (Draining, Closed)
        );
        if allowed {
            Ok(next)
        } else {
            Err(StageError { from: self, to: next })
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStage::Closed)
    }
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStage::Connecting => "connecting",
            SessionStage::AwaitingSensorReady => "awaiting_sensor_ready",
            SessionStage::Running => "running",
            SessionStage::Draining => "draining",
            SessionStage::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let stage = SessionStage::Connecting
            .transition(SessionStage::AwaitingSensorReady)
            .and_then(|s| s.transition(SessionStage::Running))
            .and_then(|s| s.transition(SessionStage::Draining))
            .and_then(|s| s.transition(SessionStage::Closed))
            .unwrap();
        assert!(stage.is_terminal());
    }

    #[test]
    fn running_cannot_skip_draining() {
        let err = SessionStage::Running
            .transition(SessionStage::Closed)
            .unwrap_err();
        assert_eq!(err.from, SessionStage::Running);
        assert_eq!(err.to_string(), "illegal session transition running -> closed");
    }

    #[test]
    fn closed_is_terminal() {
        for next in [
            SessionStage::Connecting,
            SessionStage::AwaitingSensorReady,
            SessionStage::Running,
            SessionStage::Draining,
        ] {
            assert!(SessionStage::Closed.transition(next).is_err());
        }
    }
}
