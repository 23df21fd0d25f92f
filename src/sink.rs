//! Output sink: persists a finished session as CSV timelines.
//!
//! Layout under the output root:
//!
//! ```text
//! trial_{id}/quality_timeline.csv   time_seconds,resolution_width,resolution_height,bitrate_kbps,notes
//! trial_{id}/buffer_timeline.csv    time_seconds,buffer_seconds,notes
//! trial_{id}/session.json           run metadata (ids, phase marks, tick counts)
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::samples::{BufferSample, QualitySample};
use crate::session::{PhaseMark, SessionReport};

pub const QUALITY_FILE: &str = "quality_timeline.csv";
pub const BUFFER_FILE: &str = "buffer_timeline.csv";
pub const MANIFEST_FILE: &str = "session.json";

const QUALITY_HEADER: &str = "time_seconds,resolution_width,resolution_height,bitrate_kbps,notes";
const BUFFER_HEADER: &str = "time_seconds,buffer_seconds,notes";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("manifest encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Directory for a trial under `root`.
pub fn trial_dir(root: &Path, trial_identifier: &str) -> PathBuf {
    root.join(format!("trial_{}", trial_identifier))
}

/// Paths written for one session.
#[derive(Debug, Clone)]
pub struct WrittenTimeline {
    pub quality: PathBuf,
    pub buffer: PathBuf,
    pub manifest: PathBuf,
}

#[derive(Serialize)]
struct Manifest<'a> {
    session_id: Uuid,
    trial: &'a str,
    config_id: &'a str,
    phases: &'a [PhaseMark],
    quality_samples: usize,
    buffer_samples: usize,
    ticks: u32,
    skipped_ticks: u32,
    interrupted: bool,
}

/// Writes both timelines and the manifest into `dir`, creating it if needed.
pub fn write_session(dir: &Path, report: &SessionReport) -> Result<WrittenTimeline, SinkError> {
    fs::create_dir_all(dir).map_err(|source| SinkError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let quality = dir.join(QUALITY_FILE);
    write_lines(&quality, QUALITY_HEADER, report.quality.iter().map(quality_row))?;

    let buffer = dir.join(BUFFER_FILE);
    write_lines(&buffer, BUFFER_HEADER, report.buffer.iter().map(buffer_row))?;

    let manifest = dir.join(MANIFEST_FILE);
    let body = serde_json::to_vec_pretty(&Manifest {
        session_id: report.session_id,
        trial: &report.trial_identifier,
        config_id: &report.config_id,
        phases: &report.phases,
        quality_samples: report.quality.len(),
        buffer_samples: report.buffer.len(),
        ticks: report.ticks,
        skipped_ticks: report.skipped_ticks,
        interrupted: report.interrupted,
    })?;
    fs::write(&manifest, body).map_err(|source| SinkError::Io {
        path: manifest.clone(),
        source,
    })?;

    Ok(WrittenTimeline {
        quality,
        buffer,
        manifest,
    })
}

fn quality_row(sample: &QualitySample) -> String {
    format!(
        "{},{},{},{},{}",
        sample.time_offset, sample.width, sample.height, sample.bitrate_estimate, sample.cause
    )
}

fn buffer_row(sample: &BufferSample) -> String {
    format!("{},{:.1},{}", sample.time_offset, sample.buffer_seconds, sample.cause)
}

fn write_lines<I>(path: &Path, header: &str, rows: I) -> Result<(), SinkError>
where
    I: Iterator<Item = String>,
{
    let io_err = |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    writeln!(out, "{}", header).map_err(io_err)?;
    for row in rows {
        writeln!(out, "{}", row).map_err(io_err)?;
    }
    out.flush().map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::SampleCause;
    use crate::sampling::phase::NetworkPhase;
    use crate::sampling::SessionState;

    fn report() -> SessionReport {
        SessionReport {
            session_id: Uuid::nil(),
            trial_identifier: "007".into(),
            config_id: "abc".into(),
            quality: vec![
                QualitySample {
                    time_offset: 0,
                    width: 640,
                    height: 360,
                    bitrate_estimate: 800,
                    cause: SampleCause::Startup,
                },
                QualitySample {
                    time_offset: 135,
                    width: 1280,
                    height: 720,
                    bitrate_estimate: 2500,
                    cause: SampleCause::End,
                },
            ],
            buffer: vec![
                BufferSample::new(0, 0.0, SampleCause::Startup),
                BufferSample::new(9, 5.04, SampleCause::BufferMilestone),
            ],
            phases: vec![PhaseMark {
                time_offset: 0,
                phase: NetworkPhase::Phase1,
            }],
            ticks: 90,
            skipped_ticks: 1,
            interrupted: false,
            final_state: SessionState::new(),
        }
    }

    #[test]
    fn writes_timelines_with_headers() {
        let root = tempfile::tempdir().unwrap();
        let dir = trial_dir(root.path(), "007");
        let written = write_session(&dir, &report()).unwrap();

        let quality = fs::read_to_string(&written.quality).unwrap();
        assert_eq!(
            quality,
            "time_seconds,resolution_width,resolution_height,bitrate_kbps,notes\n\
             0,640,360,800,startup\n\
             135,1280,720,2500,end\n"
        );

        let buffer = fs::read_to_string(&written.buffer).unwrap();
        assert_eq!(
            buffer,
            "time_seconds,buffer_seconds,notes\n0,0.0,startup\n9,5.0,buffer_milestone\n"
        );
    }

    #[test]
    fn manifest_records_phases() {
        let root = tempfile::tempdir().unwrap();
        let written = write_session(root.path(), &report()).unwrap();
        let manifest: serde_json::Value =
            serde_json::from_slice(&fs::read(&written.manifest).unwrap()).unwrap();
        assert_eq!(manifest["trial"], "007");
        assert_eq!(manifest["phases"][0]["phase"], "phase1");
        assert_eq!(manifest["skipped_ticks"], 1);
    }

    #[test]
    fn trial_dir_uses_prefix() {
        assert_eq!(
            trial_dir(Path::new("data/raw"), "test"),
            PathBuf::from("data/raw/trial_test")
        );
    }
}
