//! ABR probe: measures how an adaptive video player reacts to a scripted
//! bandwidth disturbance.
//!
//! A session polls the player at a fixed interval while the network moves
//! through three phases (high, low, high). Each tick records at most one
//! quality sample and one buffer sample: on a resolution change, on a newly
//! crossed buffer milestone, or periodically so no gap exceeds the configured
//! spacing. The two timelines are handed to the output sink when the session
//! closes.

pub mod clock;
pub mod config;
pub mod driver;
pub mod samples;
pub mod sampling;
pub mod scripted;
pub mod session;
pub mod sink;
pub mod telemetry;

pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{CompiledSessionConfig, ConfigError, DriverSettings, ProbeConfig, SessionConfig};
pub use driver::{DriverConnector, DriverError, PlayerDriver};
pub use samples::{BufferSample, PlayerReading, QualitySample, Resolution, SampleCause};
pub use sampling::phase::NetworkPhase;
pub use sampling::SessionState;
pub use session::{SessionController, SessionError, SessionReport, SessionStage};
