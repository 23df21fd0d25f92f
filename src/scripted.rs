//! In-memory driver that replays a time-keyed reading script.
//!
//! Readings are keyed by [`ManualClock`] time, so a script written against
//! session time lines up exactly when the controller runs with zero readiness
//! backoff and zero countdown. Every throttle and playback command is recorded
//! for later inspection.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, ManualClock};
use crate::config::PhaseParams;
use crate::driver::{
    DriverConnector, DriverError, Playback, PlaybackKick, PlayerDriver, Sensor, Throttle,
};
use crate::samples::PlayerReading;

/// Reading in effect from `at_seconds` until the next step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    pub at_seconds: f64,
    #[serde(default)]
    pub reading: Option<PlayerReading>,
    /// Reads in this step fail with a driver error instead of returning.
    #[serde(default)]
    pub fault: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub steps: Vec<ScriptStep>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, at_seconds: f64, reading: PlayerReading) -> Self {
        self.steps.push(ScriptStep {
            at_seconds,
            reading: Some(reading),
            fault: false,
        });
        self
    }

    /// The player element is missing from `at_seconds` on.
    pub fn unavailable(mut self, at_seconds: f64) -> Self {
        self.steps.push(ScriptStep {
            at_seconds,
            reading: None,
            fault: false,
        });
        self
    }

    pub fn fault(mut self, at_seconds: f64) -> Self {
        self.steps.push(ScriptStep {
            at_seconds,
            reading: None,
            fault: true,
        });
        self
    }

    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    fn step_at(&self, now: Duration) -> Option<&ScriptStep> {
        let now = now.as_secs_f64();
        self.steps
            .iter()
            .filter(|step| step.at_seconds <= now)
            .max_by(|a, b| a.at_seconds.total_cmp(&b.at_seconds))
    }
}

/// Command observed by the scripted driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriverCall {
    Apply { at: Duration, params: PhaseParams },
    Clear { at: Duration },
    EnsurePlaying,
    Quit,
}

#[derive(Debug)]
struct Inner {
    clock: ManualClock,
    script: Script,
    refuse_connection: bool,
    calls: Mutex<Vec<DriverCall>>,
    reads: Mutex<u32>,
    connects: Mutex<u32>,
    /// Emulation currently in force; `None` is an unthrottled link.
    network: Mutex<Option<PhaseParams>>,
}

/// Cheap to clone; clones share the script and the call log.
#[derive(Debug, Clone)]
pub struct ScriptedDriver {
    inner: Arc<Inner>,
}

impl ScriptedDriver {
    pub fn new(clock: ManualClock, script: Script) -> Self {
        Self::build(clock, script, false)
    }

    pub fn constant(clock: ManualClock, reading: PlayerReading) -> Self {
        Self::new(clock, Script::new().at(0.0, reading))
    }

    /// A driver whose `connect` always fails.
    pub fn refusing_connection(clock: ManualClock) -> Self {
        Self::build(clock, Script::new(), true)
    }

    fn build(clock: ManualClock, script: Script, refuse_connection: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                script,
                refuse_connection,
                calls: Mutex::new(Vec::new()),
                reads: Mutex::new(0),
                connects: Mutex::new(0),
                network: Mutex::new(None),
            }),
        }
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.inner.calls.lock().clone()
    }

    /// Only the `apply`/`clear` commands, in order.
    pub fn throttle_calls(&self) -> Vec<DriverCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, DriverCall::Apply { .. } | DriverCall::Clear { .. }))
            .collect()
    }

    pub fn read_count(&self) -> u32 {
        *self.inner.reads.lock()
    }

    pub fn connect_count(&self) -> u32 {
        *self.inner.connects.lock()
    }

    /// Network emulation as the browser would currently see it.
    pub fn network(&self) -> Option<PhaseParams> {
        *self.inner.network.lock()
    }

    fn log(&self, call: DriverCall) {
        self.inner.calls.lock().push(call);
    }
}

#[async_trait]
impl Sensor for ScriptedDriver {
    async fn read(&self) -> Result<Option<PlayerReading>, DriverError> {
        *self.inner.reads.lock() += 1;
        match self.inner.script.step_at(self.inner.clock.now()) {
            Some(step) if step.fault => Err(DriverError::Protocol("scripted fault".into())),
            Some(step) => Ok(step.reading),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Throttle for ScriptedDriver {
    async fn apply(&self, params: PhaseParams) -> Result<(), DriverError> {
        *self.inner.network.lock() = Some(params);
        self.log(DriverCall::Apply {
            at: self.inner.clock.now(),
            params,
        });
        Ok(())
    }

    async fn clear(&self) -> Result<(), DriverError> {
        *self.inner.network.lock() = None;
        self.log(DriverCall::Clear {
            at: self.inner.clock.now(),
        });
        Ok(())
    }
}

#[async_trait]
impl Playback for ScriptedDriver {
    async fn ensure_playing(&self) -> Result<PlaybackKick, DriverError> {
        self.log(DriverCall::EnsurePlaying);
        Ok(PlaybackKick::AlreadyPlaying)
    }
}

#[async_trait]
impl PlayerDriver for ScriptedDriver {
    async fn quit(&self) -> Result<(), DriverError> {
        self.log(DriverCall::Quit);
        Ok(())
    }
}

#[async_trait]
impl DriverConnector for ScriptedDriver {
    type Driver = ScriptedDriver;

    async fn connect(&self) -> Result<Self::Driver, DriverError> {
        *self.inner.connects.lock() += 1;
        if self.inner.refuse_connection {
            return Err(DriverError::Unreachable {
                address: "scripted".into(),
                reason: "connection refused".into(),
            });
        }
        Ok(self.clone())
    }
}
