//! Records produced by a sampling session and the raw player reading they are
//! derived from.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a sample was appended to a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleCause {
    /// Baseline reading taken when the session enters `Running`.
    Startup,
    /// Rendered resolution differs from the last recorded one.
    QualityChange,
    /// Buffer crossed a milestone it had never reached before.
    BufferMilestone,
    /// Recorded only to bound the silence gap between samples.
    Periodic,
    /// Final boundary reading once the duration has elapsed.
    End,
}

impl SampleCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleCause::Startup => "startup",
            SampleCause::QualityChange => "quality_change",
            SampleCause::BufferMilestone => "buffer_milestone",
            SampleCause::Periodic => "periodic",
            SampleCause::End => "end",
        }
    }
}

impl fmt::Display for SampleCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendered video geometry in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A player that has not decoded a frame yet reports 0x0.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One probe of the player element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerReading {
    pub width: u32,
    pub height: u32,
    /// Seconds of media buffered ahead of the play head. May be negative when
    /// the play head has run past the first buffered range.
    pub buffer_seconds: f64,
    pub position_seconds: f64,
}

impl PlayerReading {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Buffer depth clamped at zero.
    pub fn clamped_buffer(&self) -> f64 {
        if self.buffer_seconds.is_finite() {
            self.buffer_seconds.max(0.0)
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualitySample {
    pub time_offset: u64,
    pub width: u32,
    pub height: u32,
    pub bitrate_estimate: u32,
    pub cause: SampleCause,
}

impl QualitySample {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferSample {
    pub time_offset: u64,
    /// Clamped at zero and rounded to one decimal place.
    pub buffer_seconds: f64,
    pub cause: SampleCause,
}

impl BufferSample {
    pub fn new(time_offset: u64, buffer_seconds: f64, cause: SampleCause) -> Self {
        Self {
            time_offset,
            buffer_seconds: round_tenths(buffer_seconds.max(0.0)),
            cause,
        }
    }
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_buffer_clamps_to_zero() {
        let reading = PlayerReading {
            width: 640,
            height: 360,
            buffer_seconds: -0.4,
            position_seconds: 12.0,
        };
        assert_eq!(reading.clamped_buffer(), 0.0);
        assert_eq!(BufferSample::new(3, -2.0, SampleCause::Periodic).buffer_seconds, 0.0);
    }

    #[test]
    fn buffer_sample_rounds_to_tenths() {
        let sample = BufferSample::new(9, 7.36, SampleCause::BufferMilestone);
        assert_eq!(sample.buffer_seconds, 7.4);
    }

    #[test]
    fn cause_strings_match_csv_notes() {
        assert_eq!(SampleCause::QualityChange.to_string(), "quality_change");
        assert_eq!(
            serde_json::to_string(&SampleCause::BufferMilestone).unwrap(),
            "\"buffer_milestone\""
        );
    }
}
