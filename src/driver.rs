//! Capability interfaces onto the player and the network emulation layer.
//!
//! The controller only ever talks to these traits. A live implementation lives
//! in [`webdriver`]; tests and offline replays use
//! [`ScriptedDriver`](crate::scripted::ScriptedDriver).

pub mod webdriver;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::PhaseParams;
use crate::samples::PlayerReading;

/// Errors surfaced by a driver implementation.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver unreachable at {address}: {reason}")]
    Unreachable { address: String, reason: String },
    #[error("http error: {0}")]
    Http(String),
    #[error("webdriver error {error}: {message}")]
    WebDriver { error: String, message: String },
    #[error("unexpected driver response: {0}")]
    Protocol(String),
}

/// Read-only probe of the player element.
#[async_trait]
pub trait Sensor: Send + Sync {
    /// Returns `Ok(None)` when the player element cannot be queried this tick.
    async fn read(&self) -> Result<Option<PlayerReading>, DriverError>;
}

/// Command sink for network emulation. Both commands are idempotent.
#[async_trait]
pub trait Throttle: Send + Sync {
    async fn apply(&self, params: PhaseParams) -> Result<(), DriverError>;
    async fn clear(&self) -> Result<(), DriverError>;
}

/// What `ensure_playing` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackKick {
    Clicked,
    AlreadyPlaying,
    NoButton,
}

#[async_trait]
pub trait Playback: Send + Sync {
    /// Best effort; a no-op when the player is already playing.
    async fn ensure_playing(&self) -> Result<PlaybackKick, DriverError>;
}

/// A connected driver exposing every capability the controller needs.
#[async_trait]
pub trait PlayerDriver: Sensor + Throttle + Playback {
    /// Releases the underlying automation session.
    async fn quit(&self) -> Result<(), DriverError>;
}

/// Establishes a [`PlayerDriver`] with the video page loaded.
#[async_trait]
pub trait DriverConnector: Send + Sync {
    type Driver: PlayerDriver;

    async fn connect(&self) -> Result<Self::Driver, DriverError>;
}
