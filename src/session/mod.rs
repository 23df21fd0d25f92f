//! Session controller: owns the polling loop and the session state.
//!
//! # Lifecycle
//! `Connecting → AwaitingSensorReady → Running → Draining → Closed`, with the
//! two startup stages allowed to fail straight to `Closed`. Once `Running` is
//! entered, every exit (duration reached or external stop) passes through
//! `Draining`, which clears network emulation when shaping was on.
//!
//! # Tick order
//! Phase scheduling, then the sensor read, then detection and recording. A
//! phase change is therefore in effect before the reading that follows it.

pub mod state;

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{CompiledSessionConfig, PhaseParams};
use crate::driver::{DriverConnector, DriverError, PlayerDriver, Sensor, Throttle};
use crate::samples::{BufferSample, PlayerReading, QualitySample, SampleCause};
use crate::sampling::phase::{NetworkPhase, PhaseScheduler};
use crate::sampling::{decide_tick, record_boundary, SessionState, TickDecision};
pub use state::{SessionStage, StageError};

/// Startup-fatal failures. In-loop anomalies never surface here.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot connect to player driver: {0}")]
    Connect(#[source] DriverError),
    #[error("sensor never reported valid geometry after {attempts} probes")]
    SensorNeverReady { attempts: u32 },
    #[error(transparent)]
    Stage(#[from] StageError),
}

/// Moment a network phase took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseMark {
    pub time_offset: u64,
    pub phase: NetworkPhase,
}

/// Everything a finished session hands to the output sink.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub trial_identifier: String,
    pub config_id: String,
    pub quality: Vec<QualitySample>,
    pub buffer: Vec<BufferSample>,
    pub phases: Vec<PhaseMark>,
    /// Loop iterations that attempted a sensor read.
    pub ticks: u32,
    /// Ticks where the sensor was unavailable.
    pub skipped_ticks: u32,
    /// True when an external stop ended the loop before the duration elapsed.
    pub interrupted: bool,
    pub final_state: SessionState,
}

#[derive(Debug, Default)]
struct Recording {
    quality: Vec<QualitySample>,
    buffer: Vec<BufferSample>,
    phases: Vec<PhaseMark>,
    ticks: u32,
    skipped_ticks: u32,
    interrupted: bool,
}

impl Recording {
    fn absorb(&mut self, decision: TickDecision) -> SessionState {
        if let Some(sample) = decision.quality {
            debug!(
                t = sample.time_offset,
                resolution = %sample.resolution(),
                cause = %sample.cause,
                "quality sample"
            );
            self.quality.push(sample);
        }
        if let Some(sample) = decision.buffer {
            debug!(
                t = sample.time_offset,
                buffer = sample.buffer_seconds,
                cause = %sample.cause,
                "buffer sample"
            );
            self.buffer.push(sample);
        }
        decision.state
    }
}

pub struct SessionController<C: Clock> {
    config: CompiledSessionConfig,
    clock: C,
    scheduler: PhaseScheduler,
    stage: SessionStage,
}

impl<C: Clock> SessionController<C> {
    pub fn new(config: CompiledSessionConfig, clock: C) -> Self {
        let scheduler = PhaseScheduler::new(&config);
        Self {
            config,
            clock,
            scheduler,
            stage: SessionStage::Connecting,
        }
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    pub fn config(&self) -> &CompiledSessionConfig {
        &self.config
    }

    /// Runs a full session until the configured duration elapses.
    pub async fn run<K>(&mut self, connector: &K) -> Result<SessionReport, SessionError>
    where
        K: DriverConnector,
    {
        self.run_until(connector, std::future::pending()).await
    }

    /// Runs a session that also ends early when `stop` resolves.
    ///
    /// # Guarantees
    /// * Startup failures return `Err` with no partial output.
    /// * After `Running` is entered the throttle is cleared (when shaping is
    ///   on) and the driver released, whichever way the loop ended.
    pub async fn run_until<K, F>(
        &mut self,
        connector: &K,
        stop: F,
    ) -> Result<SessionReport, SessionError>
    where
        K: DriverConnector,
        F: Future<Output = ()>,
    {
        let session_id = Uuid::new_v4();
        let span = info_span!(
            "session",
            trial = %self.config.trial_identifier,
            %session_id,
            shaping = self.config.shaping_enabled,
        );
        self.run_inner(session_id, connector, stop).instrument(span).await
    }

    async fn run_inner<K, F>(
        &mut self,
        session_id: Uuid,
        connector: &K,
        stop: F,
    ) -> Result<SessionReport, SessionError>
    where
        K: DriverConnector,
        F: Future<Output = ()>,
    {
        if self.stage != SessionStage::Connecting {
            return Err(StageError {
                from: self.stage,
                to: SessionStage::AwaitingSensorReady,
            }
            .into());
        }

        info!(config_id = self.config.config_id(), "connecting to player driver");
        let driver = match connector.connect().await {
            Ok(driver) => driver,
            Err(err) => {
                self.advance(SessionStage::Closed)?;
                return Err(SessionError::Connect(err));
            }
        };
        if let Err(err) = self.advance(SessionStage::AwaitingSensorReady) {
            release(&driver).await;
            return Err(err.into());
        }

        if let Err(err) = self.await_sensor_ready(&driver).await {
            self.advance(SessionStage::Closed)?;
            release(&driver).await;
            return Err(err);
        }
        self.advance(SessionStage::Running)?;

        let (recording, final_state) = self.sample(&driver, stop).await;

        let staged = self.advance(SessionStage::Draining);
        self.drain(&driver).await;
        staged?;
        self.advance(SessionStage::Closed)?;

        info!(
            quality = recording.quality.len(),
            buffer = recording.buffer.len(),
            skipped = recording.skipped_ticks,
            interrupted = recording.interrupted,
            "session complete"
        );

        Ok(SessionReport {
            session_id,
            trial_identifier: self.config.trial_identifier.clone(),
            config_id: self.config.config_id().to_string(),
            quality: recording.quality,
            buffer: recording.buffer,
            phases: recording.phases,
            ticks: recording.ticks,
            skipped_ticks: recording.skipped_ticks,
            interrupted: recording.interrupted,
            final_state,
        })
    }

    fn advance(&mut self, next: SessionStage) -> Result<(), StageError> {
        let from = self.stage;
        self.stage = from.transition(next)?;
        info!(%from, to = %next, "session stage");
        Ok(())
    }

    async fn await_sensor_ready<D: Sensor>(&self, driver: &D) -> Result<PlayerReading, SessionError> {
        let attempts = self.config.readiness_attempts;
        for attempt in 1..=attempts {
            self.clock.sleep(self.config.readiness_backoff).await;
            match driver.read().await {
                Ok(Some(reading)) if reading.resolution().is_valid() => {
                    info!(resolution = %reading.resolution(), attempt, "video ready");
                    return Ok(reading);
                }
                Ok(_) => debug!(attempt, "video not ready"),
                Err(err) => warn!(%err, attempt, "readiness probe failed"),
            }
        }
        Err(SessionError::SensorNeverReady { attempts })
    }

    async fn sample<D, F>(&self, driver: &D, stop: F) -> (Recording, SessionState)
    where
        D: PlayerDriver,
        F: Future<Output = ()>,
    {
        let mut recording = Recording::default();
        let mut state = SessionState::new();
        let mut stop = std::pin::pin!(stop);

        match driver.ensure_playing().await {
            Ok(kick) => debug!(?kick, "playback"),
            Err(err) => warn!(%err, "could not confirm playback"),
        }

        if self.scheduler.enabled() {
            let params = self.scheduler.params(NetworkPhase::Phase1);
            apply_phase(driver, NetworkPhase::Phase1, params).await;
            recording.phases.push(PhaseMark {
                time_offset: 0,
                phase: NetworkPhase::Phase1,
            });
        }

        tokio::select! {
            biased;
            _ = &mut stop => {
                info!("stop requested before sampling started");
                recording.interrupted = true;
                return (recording, state);
            }
            _ = self.countdown() => {}
        }

        let start = self.clock.now();
        match read_or_skip(driver).await {
            Some(reading) => {
                let decision = record_boundary(&state, &self.config, 0, &reading, SampleCause::Startup);
                state = recording.absorb(decision);
            }
            None => warn!("baseline reading unavailable; no startup sample"),
        }

        let duration = Duration::from_secs(self.config.duration_seconds);
        let mut last_status = 0u64;

        loop {
            let elapsed = self.clock.now().saturating_sub(start);
            let time_offset = elapsed.as_secs();

            if let Some(transition) = self.scheduler.step(elapsed, state.phase) {
                apply_phase(driver, transition.to, transition.params).await;
                state.phase = transition.to;
                recording.phases.push(PhaseMark {
                    time_offset,
                    phase: transition.to,
                });
            }

            if elapsed >= duration {
                match read_or_skip(driver).await {
                    Some(reading) => {
                        let decision =
                            record_boundary(&state, &self.config, time_offset, &reading, SampleCause::End);
                        state = recording.absorb(decision);
                    }
                    None => warn!(t = time_offset, "final reading unavailable; no end sample"),
                }
                break;
            }

            recording.ticks += 1;
            match read_or_skip(driver).await {
                Some(reading) => {
                    let decision = decide_tick(&state, &self.config, time_offset, &reading);
                    state = recording.absorb(decision);

                    if time_offset.saturating_sub(last_status) >= self.config.status_interval_seconds {
                        let resolution = reading.resolution();
                        info!(
                            "[{}s] Quality: {} ({} kbps), Buffer: {:.1}s",
                            time_offset,
                            resolution,
                            self.config.bitrate_for(resolution),
                            reading.clamped_buffer()
                        );
                        last_status = time_offset;
                    }
                }
                None => recording.skipped_ticks += 1,
            }

            tokio::select! {
                biased;
                _ = &mut stop => {
                    info!(t = time_offset, "stop requested");
                    recording.interrupted = true;
                    break;
                }
                _ = self.clock.sleep(self.config.polling_interval) => {}
            }
        }

        (recording, state)
    }

    async fn countdown(&self) {
        let seconds = self.config.countdown_seconds;
        if seconds == 0 {
            return;
        }
        info!(
            "Trial {} ready. Starting collection in {} seconds...",
            self.config.trial_identifier, seconds
        );
        for remaining in (1..=seconds).rev() {
            info!("{}...", remaining);
            self.clock.sleep(Duration::from_secs(1)).await;
        }
        info!("Collecting");
    }

    async fn drain<D: PlayerDriver>(&self, driver: &D) {
        if self.scheduler.enabled() {
            match driver.clear().await {
                Ok(()) => info!("network emulation cleared"),
                Err(err) => warn!(%err, "failed to clear network emulation"),
            }
        }
        release(driver).await;
    }
}

async fn apply_phase<D: Throttle>(driver: &D, phase: NetworkPhase, params: PhaseParams) {
    match driver.apply(params).await {
        Ok(()) => info!(
            %phase,
            download_kbps = params.download_kbps,
            upload_kbps = params.upload_kbps,
            latency_ms = params.latency_ms,
            "network phase applied"
        ),
        Err(err) => warn!(%err, %phase, "throttle command failed"),
    }
}

/// A failed read is a skipped tick, never an error.
async fn read_or_skip<D: Sensor>(driver: &D) -> Option<PlayerReading> {
    match driver.read().await {
        Ok(reading) => reading,
        Err(err) => {
            debug!(%err, "sensor read failed");
            None
        }
    }
}

async fn release<D: PlayerDriver>(driver: &D) {
    if let Err(err) = driver.quit().await {
        warn!(%err, "failed to release driver session");
    }
}
