//! Session configuration.
//!
//! A [`SessionConfig`] is the caller-facing description of one trial. It is
//! plain data (serde, TOML-loadable) and compiles into a validated
//! [`CompiledSessionConfig`] that the controller consumes. Compilation yields a
//! deterministic `config_id` so two trials can be checked for identical
//! parameters after the fact.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::samples::Resolution;

/// Width of one buffer milestone bucket, in seconds.
pub const MILESTONE_STEP_SECONDS: u32 = 5;

pub const DEFAULT_DURATION_SECONDS: u64 = 135;
pub const DEFAULT_POLLING_INTERVAL_SECONDS: f64 = 1.5;
pub const DEFAULT_MIN_EVENT_SPACING_SECONDS: u64 = 15;
pub const DEFAULT_BITRATE_FALLBACK_KBPS: u32 = 1200;
pub const DEFAULT_VIDEO_URL: &str = "https://www.youtube.com/watch?v=KLlXCFG5TnA";

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("session duration must be greater than zero")]
    ZeroDuration,
    #[error("polling interval must be a positive number of seconds")]
    InvalidPollingInterval,
    #[error("minimum event spacing must be greater than zero")]
    ZeroEventSpacing,
    #[error("readiness probes need at least one attempt")]
    ZeroReadinessAttempts,
    #[error("readiness backoff must be a non-negative number of seconds")]
    InvalidReadinessBackoff,
    #[error("phase boundaries must satisfy 0 < phase2_start ({phase2}) < phase3_start ({phase3})")]
    PhaseBoundaryOrder { phase2: u64, phase3: u64 },
    #[error("milestone {0} is not a positive multiple of {MILESTONE_STEP_SECONDS}")]
    InvalidMilestone(u32),
}

/// Emulated link parameters for one network phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseParams {
    pub download_kbps: u32,
    pub upload_kbps: u32,
    pub latency_ms: u32,
}

impl PhaseParams {
    /// 20 Mbps symmetric, 40 ms.
    pub const fn high() -> Self {
        Self {
            download_kbps: 20_000,
            upload_kbps: 20_000,
            latency_ms: 40,
        }
    }

    /// 1.5 Mbps symmetric, 40 ms.
    pub const fn low() -> Self {
        Self {
            download_kbps: 1_500,
            upload_kbps: 1_500,
            latency_ms: 40,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitrateEntry {
    pub width: u32,
    pub height: u32,
    pub kbps: u32,
}

/// Fixed lookup from rendered resolution to an estimated bitrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitrateTable {
    pub entries: Vec<BitrateEntry>,
    pub fallback_kbps: u32,
}

impl BitrateTable {
    pub fn estimate(&self, resolution: Resolution) -> u32 {
        self.entries
            .iter()
            .find(|e| e.width == resolution.width && e.height == resolution.height)
            .map(|e| e.kbps)
            .unwrap_or(self.fallback_kbps)
    }
}

impl Default for BitrateTable {
    fn default() -> Self {
        let entry = |width, height, kbps| BitrateEntry { width, height, kbps };
        Self {
            entries: vec![
                entry(426, 240, 400),
                entry(640, 360, 800),
                entry(854, 480, 1200),
                entry(1280, 720, 2500),
                entry(1920, 1080, 4500),
            ],
            fallback_kbps: DEFAULT_BITRATE_FALLBACK_KBPS,
        }
    }
}

/// Caller-supplied description of one sampling session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub trial_identifier: String,
    pub duration_seconds: u64,
    pub shaping_enabled: bool,
    pub polling_interval_seconds: f64,
    pub min_event_spacing_seconds: u64,
    pub bitrate_table: BitrateTable,
    pub milestone_set: Vec<u32>,
    pub phase2_start_seconds: u64,
    pub phase3_start_seconds: u64,
    /// Parameters for phase1 and phase3.
    pub phase_high: PhaseParams,
    /// Parameters for phase2.
    pub phase_low: PhaseParams,
    pub readiness_attempts: u32,
    pub readiness_backoff_seconds: f64,
    pub countdown_seconds: u32,
    pub status_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            trial_identifier: "test".into(),
            duration_seconds: DEFAULT_DURATION_SECONDS,
            shaping_enabled: false,
            polling_interval_seconds: DEFAULT_POLLING_INTERVAL_SECONDS,
            min_event_spacing_seconds: DEFAULT_MIN_EVENT_SPACING_SECONDS,
            bitrate_table: BitrateTable::default(),
            milestone_set: vec![5, 10, 15, 20, 25, 30],
            phase2_start_seconds: 45,
            phase3_start_seconds: 90,
            phase_high: PhaseParams::high(),
            phase_low: PhaseParams::low(),
            readiness_attempts: 3,
            readiness_backoff_seconds: 3.0,
            countdown_seconds: 5,
            status_interval_seconds: 15,
        }
    }
}

impl SessionConfig {
    pub fn new(trial_identifier: impl Into<String>) -> Self {
        Self {
            trial_identifier: trial_identifier.into(),
            ..Self::default()
        }
    }

    /// Validates the parameters and freezes them for a run.
    ///
    /// # Guarantees
    /// * Rejects degenerate timing (zero duration, non-positive polling) with explicit errors.
    /// * Produces a `config_id` derived only from parameters that affect sampling,
    ///   so the trial identifier does not change it.
    pub fn compile(self) -> Result<CompiledSessionConfig, ConfigError> {
        if self.duration_seconds == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        if !(self.polling_interval_seconds.is_finite() && self.polling_interval_seconds > 0.0) {
            return Err(ConfigError::InvalidPollingInterval);
        }
        let polling_interval = Duration::try_from_secs_f64(self.polling_interval_seconds)
            .map_err(|_| ConfigError::InvalidPollingInterval)?;
        if self.min_event_spacing_seconds == 0 {
            return Err(ConfigError::ZeroEventSpacing);
        }
        if self.readiness_attempts == 0 {
            return Err(ConfigError::ZeroReadinessAttempts);
        }
        let readiness_backoff = Duration::try_from_secs_f64(self.readiness_backoff_seconds)
            .map_err(|_| ConfigError::InvalidReadinessBackoff)?;
        if self.phase2_start_seconds == 0 || self.phase2_start_seconds >= self.phase3_start_seconds {
            return Err(ConfigError::PhaseBoundaryOrder {
                phase2: self.phase2_start_seconds,
                phase3: self.phase3_start_seconds,
            });
        }
        let mut milestones = BTreeSet::new();
        for &m in &self.milestone_set {
            if m == 0 || m % MILESTONE_STEP_SECONDS != 0 {
                return Err(ConfigError::InvalidMilestone(m));
            }
            milestones.insert(m);
        }

        let config_id = self.fingerprint(&milestones);

        Ok(CompiledSessionConfig {
            trial_identifier: self.trial_identifier,
            duration_seconds: self.duration_seconds,
            shaping_enabled: self.shaping_enabled,
            polling_interval,
            min_event_spacing_seconds: self.min_event_spacing_seconds,
            bitrate_table: self.bitrate_table,
            milestones,
            phase2_start_seconds: self.phase2_start_seconds,
            phase3_start_seconds: self.phase3_start_seconds,
            phase_high: self.phase_high,
            phase_low: self.phase_low,
            readiness_attempts: self.readiness_attempts,
            readiness_backoff,
            countdown_seconds: self.countdown_seconds,
            status_interval_seconds: self.status_interval_seconds,
            config_id,
        })
    }

    fn fingerprint(&self, milestones: &BTreeSet<u32>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.duration_seconds.to_le_bytes());
        hasher.update([self.shaping_enabled as u8]);
        hasher.update(self.polling_interval_seconds.to_le_bytes());
        hasher.update(self.min_event_spacing_seconds.to_le_bytes());
        let mut entries = self.bitrate_table.entries.clone();
        entries.sort_by_key(|e| (e.width, e.height));
        for e in &entries {
            hasher.update(e.width.to_le_bytes());
            hasher.update(e.height.to_le_bytes());
            hasher.update(e.kbps.to_le_bytes());
        }
        hasher.update(self.bitrate_table.fallback_kbps.to_le_bytes());
        for m in milestones {
            hasher.update(m.to_le_bytes());
        }
        hasher.update(self.phase2_start_seconds.to_le_bytes());
        hasher.update(self.phase3_start_seconds.to_le_bytes());
        for p in [self.phase_high, self.phase_low] {
            hasher.update(p.download_kbps.to_le_bytes());
            hasher.update(p.upload_kbps.to_le_bytes());
            hasher.update(p.latency_ms.to_le_bytes());
        }
        let digest = hasher.finalize();
        digest.iter().map(|byte| format!("{:02x}", byte)).collect()
    }
}

/// Validated, immutable session parameters.
#[derive(Debug, Clone)]
pub struct CompiledSessionConfig {
    pub trial_identifier: String,
    pub duration_seconds: u64,
    pub shaping_enabled: bool,
    pub polling_interval: Duration,
    pub min_event_spacing_seconds: u64,
    pub bitrate_table: BitrateTable,
    pub milestones: BTreeSet<u32>,
    pub phase2_start_seconds: u64,
    pub phase3_start_seconds: u64,
    pub phase_high: PhaseParams,
    pub phase_low: PhaseParams,
    pub readiness_attempts: u32,
    pub readiness_backoff: Duration,
    pub countdown_seconds: u32,
    pub status_interval_seconds: u64,
    config_id: String,
}

impl CompiledSessionConfig {
    /// Stable identifier of the sampling parameters.
    pub fn config_id(&self) -> &str {
        &self.config_id
    }

    pub fn bitrate_for(&self, resolution: Resolution) -> u32 {
        self.bitrate_table.estimate(resolution)
    }
}

/// Where the live driver lives and what it should load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    /// Base URL of a running chromedriver.
    pub webdriver_url: String,
    /// `host:port` of the Chrome remote debugging endpoint to attach to.
    pub debugger_address: String,
    pub video_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            webdriver_url: "http://127.0.0.1:9515".into(),
            debugger_address: "127.0.0.1:9222".into(),
            video_url: DEFAULT_VIDEO_URL.into(),
            request_timeout_seconds: 10,
        }
    }
}

/// Everything the binary reads from a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub driver: DriverSettings,
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
}

fn default_output_root() -> PathBuf {
    PathBuf::from("data/raw")
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            driver: DriverSettings::default(),
            output_root: default_output_root(),
        }
    }
}

impl ProbeConfig {
    /// Loads a TOML file; missing keys fall back to compiled defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }
}
