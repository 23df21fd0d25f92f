//! abr-probe - sample an adaptive video player under a scripted bandwidth dip
//!
//! Subcommands:
//! - `abr-probe collect --trial <ID>` - run a live session against Chrome
//! - `abr-probe replay <script.json>` - run the same session logic over a recorded script

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use abr_probe::driver::webdriver::WebDriverConnector;
use abr_probe::scripted::{Script, ScriptedDriver};
use abr_probe::sink::{trial_dir, write_session};
use abr_probe::{
    telemetry, Clock, DriverConnector, ManualClock, ProbeConfig, SessionController,
    SessionReport, TokioClock,
};

#[derive(Parser)]
#[command(name = "abr-probe")]
#[command(about = "Samples player resolution and buffer while network phases play out")]
#[command(version)]
struct Cli {
    /// TOML config file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Root directory for trial output
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a live session against a Chrome instance via chromedriver
    Collect {
        /// Trial identifier, written to trial_<ID>
        #[arg(long, required_unless_present = "test", conflicts_with = "test")]
        trial: Option<String>,

        /// Write to trial_test instead of a numbered trial
        #[arg(long)]
        test: bool,

        /// Session length in seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Enable the high/low/high network phases
        #[arg(long)]
        with_shaping: bool,

        /// chromedriver base URL
        #[arg(long)]
        webdriver: Option<String>,

        /// Chrome remote debugging address (host:port)
        #[arg(long)]
        debugger: Option<String>,

        /// Video page to load
        #[arg(long)]
        video_url: Option<String>,
    },

    /// Drive the session logic from a JSON reading script on a synthetic clock
    Replay {
        /// Script file: {"steps": [{"at_seconds": .., "reading": {..}}, ..]}
        script: PathBuf,

        /// Trial identifier for the output directory
        #[arg(long, default_value = "replay")]
        trial: String,

        #[arg(long)]
        duration: Option<u64>,

        #[arg(long)]
        with_shaping: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log_level)?;

    let mut probe = match &cli.config {
        Some(path) => ProbeConfig::load_from(path)?,
        None => ProbeConfig::default(),
    };
    if let Some(dir) = cli.output_dir {
        probe.output_root = dir;
    }

    match cli.command {
        Commands::Collect {
            trial,
            test,
            duration,
            with_shaping,
            webdriver,
            debugger,
            video_url,
        } => {
            probe.session.trial_identifier = if test {
                "test".to_string()
            } else {
                trial.context("either --trial or --test is required")?
            };
            if let Some(duration) = duration {
                probe.session.duration_seconds = duration;
            }
            probe.session.shaping_enabled |= with_shaping;
            if let Some(url) = webdriver {
                probe.driver.webdriver_url = url;
            }
            if let Some(addr) = debugger {
                probe.driver.debugger_address = addr;
            }
            if let Some(url) = video_url {
                probe.driver.video_url = url;
            }

            let connector = WebDriverConnector::new(probe.driver.clone())
                .context("failed to build webdriver client")?;
            let report = run(&probe, TokioClock::new(), &connector).await?;
            persist(&probe.output_root, &report)
        }
        Commands::Replay {
            script,
            trial,
            duration,
            with_shaping,
        } => {
            let script = Script::load(&script)
                .with_context(|| format!("failed to load script {}", script.display()))?;
            probe.session.trial_identifier = trial;
            if let Some(duration) = duration {
                probe.session.duration_seconds = duration;
            }
            probe.session.shaping_enabled |= with_shaping;
            // Script times are session times only when nothing runs before t=0.
            probe.session.readiness_backoff_seconds = 0.0;
            probe.session.countdown_seconds = 0;

            let clock = ManualClock::new();
            let driver = ScriptedDriver::new(clock.clone(), script);
            let report = run(&probe, clock, &driver).await?;
            persist(&probe.output_root, &report)
        }
    }
}

async fn run<C, K>(probe: &ProbeConfig, clock: C, connector: &K) -> Result<SessionReport>
where
    C: Clock,
    K: DriverConnector,
{
    let compiled = probe
        .session
        .clone()
        .compile()
        .context("invalid session configuration")?;
    let mut controller = SessionController::new(compiled, clock);
    controller
        .run_until(connector, interrupt_requested())
        .await
        .context("session failed to start")
}

/// Installs the Ctrl-C listener now, before any throttle is applied, and
/// returns a future that resolves once the signal has arrived.
fn interrupt_requested() -> impl Future<Output = ()> {
    let (tx, mut rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received; draining session");
                let _ = tx.send(true);
            }
            Err(err) => {
                warn!(%err, "cannot listen for ctrl-c");
                // Keep the sender alive so the stop future never fires.
                std::future::pending::<()>().await;
            }
        }
    });
    async move {
        if rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn persist(root: &Path, report: &SessionReport) -> Result<()> {
    let dir = trial_dir(root, &report.trial_identifier);
    let written = write_session(&dir, report)
        .with_context(|| format!("failed to write timelines to {}", dir.display()))?;
    info!(
        "Saved: {} ({} events)",
        written.quality.display(),
        report.quality.len()
    );
    info!(
        "Saved: {} ({} events)",
        written.buffer.display(),
        report.buffer.len()
    );
    info!("Collection complete: trial_{}", report.trial_identifier);
    Ok(())
}
