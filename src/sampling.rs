//! Per-tick sampling decisions.
//!
//! [`decide_tick`] composes the change detector and the forced-record policy
//! into one pure step: given the prior [`SessionState`] and a reading it
//! returns the next state plus the zero to two samples the tick appends. No
//! I/O, sleeping, or logging happens here.

pub mod change;
pub mod forced;
pub mod phase;

use crate::config::CompiledSessionConfig;
use crate::samples::{BufferSample, PlayerReading, QualitySample, Resolution, SampleCause};
use change::{buffer_milestone_crossed, milestone_candidate, quality_changed};
use forced::{force_due, forced_records};
use phase::NetworkPhase;

/// `last_forced_record` before any forced record exists.
pub const NEVER_FORCED: i64 = -1;

/// Bookkeeping for one session, owned by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub last_resolution: Option<Resolution>,
    /// Highest milestone bucket ever recorded. `None` sorts below every bucket.
    pub last_milestone: Option<u32>,
    pub last_forced_record: i64,
    pub phase: NetworkPhase,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            last_resolution: None,
            last_milestone: None,
            last_forced_record: NEVER_FORCED,
            phase: NetworkPhase::Phase1,
        }
    }

    fn note_quality(&mut self, resolution: Resolution) {
        self.last_resolution = Some(resolution);
    }

    /// Every recorded buffer sample pushes the watermark forward, whatever its
    /// cause. A startup or periodic record can therefore pre-empt a later
    /// milestone in the same bucket.
    fn note_buffer(&mut self, buffer_seconds: f64) {
        let candidate = milestone_candidate(buffer_seconds);
        if Some(candidate) > self.last_milestone {
            self.last_milestone = Some(candidate);
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of evaluating one tick.
#[derive(Debug, Clone)]
pub struct TickDecision {
    pub state: SessionState,
    pub quality: Option<QualitySample>,
    pub buffer: Option<BufferSample>,
}

impl TickDecision {
    pub fn recorded_anything(&self) -> bool {
        self.quality.is_some() || self.buffer.is_some()
    }
}

/// Runs change detection and the forced-record policy for one reading.
pub fn decide_tick(
    current: &SessionState,
    config: &CompiledSessionConfig,
    time_offset: u64,
    reading: &PlayerReading,
) -> TickDecision {
    let mut next = current.clone();
    let resolution = reading.resolution();
    let buffer = reading.clamped_buffer();

    let changed = quality_changed(current, resolution);
    let milestone = buffer_milestone_crossed(current, buffer, &config.milestones);
    let forced = forced_records(
        force_due(current, time_offset, config.min_event_spacing_seconds),
        changed,
        milestone,
    );

    let quality_cause = if changed {
        Some(SampleCause::QualityChange)
    } else if forced.quality {
        Some(SampleCause::Periodic)
    } else {
        None
    };
    let buffer_cause = if milestone {
        Some(SampleCause::BufferMilestone)
    } else if forced.buffer {
        Some(SampleCause::Periodic)
    } else {
        None
    };

    let quality = quality_cause.map(|cause| record_quality(&mut next, config, time_offset, reading, cause));
    let buffer = buffer_cause.map(|cause| record_buffer(&mut next, time_offset, reading, cause));
    if forced.any() {
        next.last_forced_record = time_offset as i64;
    }

    TickDecision {
        state: next,
        quality,
        buffer,
    }
}

/// Records both sample kinds unconditionally, bypassing every detector.
/// Used for the `startup` and `end` boundary readings.
pub fn record_boundary(
    current: &SessionState,
    config: &CompiledSessionConfig,
    time_offset: u64,
    reading: &PlayerReading,
    cause: SampleCause,
) -> TickDecision {
    let mut next = current.clone();
    let quality = record_quality(&mut next, config, time_offset, reading, cause);
    let buffer = record_buffer(&mut next, time_offset, reading, cause);
    TickDecision {
        state: next,
        quality: Some(quality),
        buffer: Some(buffer),
    }
}

fn record_quality(
    state: &mut SessionState,
    config: &CompiledSessionConfig,
    time_offset: u64,
    reading: &PlayerReading,
    cause: SampleCause,
) -> QualitySample {
    let resolution = reading.resolution();
    state.note_quality(resolution);
    QualitySample {
        time_offset,
        width: resolution.width,
        height: resolution.height,
        bitrate_estimate: config.bitrate_for(resolution),
        cause,
    }
}

fn record_buffer(
    state: &mut SessionState,
    time_offset: u64,
    reading: &PlayerReading,
    cause: SampleCause,
) -> BufferSample {
    let buffer = reading.clamped_buffer();
    state.note_buffer(buffer);
    BufferSample::new(time_offset, buffer, cause)
}
