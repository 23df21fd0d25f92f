//! Live driver speaking the W3C WebDriver protocol to chromedriver.
//!
//! The browser is expected to be running already with remote debugging
//! enabled; chromedriver attaches to it through the `debuggerAddress` option.
//! Player probes run as synchronous scripts and network emulation goes
//! through chromedriver's CDP passthrough (`goog/cdp/execute`).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::{
    DriverConnector, DriverError, Playback, PlaybackKick, PlayerDriver, Sensor, Throttle,
};
use crate::config::{DriverSettings, PhaseParams};
use crate::samples::PlayerReading;

const CHROME_ARGS: [&str; 2] = ["--no-sandbox", "--disable-dev-shm-usage"];

const READ_PLAYER_JS: &str = r#"
const video = document.querySelector('video');
if (!video) return null;
return {
    width: video.videoWidth,
    height: video.videoHeight,
    buffer_seconds: video.buffered.length > 0 ?
        video.buffered.end(0) - video.currentTime : 0,
    position_seconds: video.currentTime
};
"#;

const ENSURE_PLAYING_JS: &str = r#"
const video = document.querySelector('video');
if (video && video.paused) {
    const playButton = document.querySelector('.ytp-play-button');
    if (playButton) {
        playButton.click();
        return 'clicked';
    }
    return 'no_button';
}
return 'already_playing';
"#;

impl From<reqwest::Error> for DriverError {
    fn from(err: reqwest::Error) -> Self {
        DriverError::Http(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

/// Throughput in bytes per second as the emulation layer expects it.
fn kbps_to_bytes_per_second(kbps: u32) -> f64 {
    kbps as f64 * 1024.0 / 8.0
}

fn emulate_params(params: PhaseParams) -> Value {
    json!({
        "offline": false,
        "downloadThroughput": kbps_to_bytes_per_second(params.download_kbps),
        "uploadThroughput": kbps_to_bytes_per_second(params.upload_kbps),
        "latency": params.latency_ms,
    })
}

fn unthrottled_params() -> Value {
    json!({
        "offline": false,
        "downloadThroughput": -1,
        "uploadThroughput": -1,
        "latency": 0,
    })
}

/// Opens WebDriver sessions against a Chrome instance.
#[derive(Debug, Clone)]
pub struct WebDriverConnector {
    settings: DriverSettings,
    client: reqwest::Client,
}

impl WebDriverConnector {
    pub fn new(settings: DriverSettings) -> Result<Self, DriverError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()?;
        Ok(Self { settings, client })
    }

    /// TCP probe of the debugging port, so a missing browser fails fast with a
    /// clear message rather than a chromedriver timeout.
    async fn check_debugger(&self) -> Result<(), DriverError> {
        let address = &self.settings.debugger_address;
        let probe = tokio::time::timeout(Duration::from_secs(2), TcpStream::connect(address.as_str())).await;
        match probe {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(DriverError::Unreachable {
                address: address.clone(),
                reason: err.to_string(),
            }),
            Err(_) => Err(DriverError::Unreachable {
                address: address.clone(),
                reason: "connect timed out".into(),
            }),
        }
    }
}

#[async_trait]
impl DriverConnector for WebDriverConnector {
    type Driver = WebDriverSession;

    async fn connect(&self) -> Result<Self::Driver, DriverError> {
        self.check_debugger().await?;
        info!(debugger = %self.settings.debugger_address, "attaching to chrome");

        let base = self.settings.webdriver_url.trim_end_matches('/').to_string();
        let body = json!({
            "capabilities": {
                "alwaysMatch": {
                    "goog:chromeOptions": {
                        "debuggerAddress": self.settings.debugger_address,
                        "args": CHROME_ARGS,
                    }
                }
            }
        });
        let value = post(&self.client, &format!("{}/session", base), &body).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Protocol("new session response lacks sessionId".into()))?
            .to_string();

        let session = WebDriverSession {
            client: self.client.clone(),
            base,
            session_id,
        };
        info!(url = %self.settings.video_url, "loading video");
        session.navigate(&self.settings.video_url).await?;
        Ok(session)
    }
}

/// An attached WebDriver session with the video page loaded.
#[derive(Debug)]
pub struct WebDriverSession {
    client: reqwest::Client,
    base: String,
    session_id: String,
}

impl WebDriverSession {
    fn url(&self, path: &str) -> String {
        format!("{}/session/{}/{}", self.base, self.session_id, path)
    }

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        post(&self.client, &self.url("url"), &json!({ "url": url })).await?;
        Ok(())
    }

    async fn execute(&self, script: &str) -> Result<Value, DriverError> {
        post(
            &self.client,
            &self.url("execute/sync"),
            &json!({ "script": script, "args": [] }),
        )
        .await
    }

    async fn cdp(&self, cmd: &str, params: Value) -> Result<Value, DriverError> {
        post(
            &self.client,
            &self.url("goog/cdp/execute"),
            &json!({ "cmd": cmd, "params": params }),
        )
        .await
    }
}

#[async_trait]
impl Sensor for WebDriverSession {
    async fn read(&self) -> Result<Option<PlayerReading>, DriverError> {
        let value = self.execute(READ_PLAYER_JS).await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| DriverError::Protocol(format!("player reading: {}", e)))
    }
}

#[async_trait]
impl Throttle for WebDriverSession {
    async fn apply(&self, params: PhaseParams) -> Result<(), DriverError> {
        self.cdp("Network.emulateNetworkConditions", emulate_params(params))
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), DriverError> {
        self.cdp("Network.emulateNetworkConditions", unthrottled_params())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Playback for WebDriverSession {
    async fn ensure_playing(&self) -> Result<PlaybackKick, DriverError> {
        let value = self.execute(ENSURE_PLAYING_JS).await?;
        let kick = match value.as_str() {
            Some("clicked") => PlaybackKick::Clicked,
            Some("already_playing") => PlaybackKick::AlreadyPlaying,
            Some("no_button") => PlaybackKick::NoButton,
            other => {
                return Err(DriverError::Protocol(format!(
                    "unexpected playback result {:?}",
                    other
                )))
            }
        };
        // Give the player a moment to react before sampling starts.
        let settle = match kick {
            PlaybackKick::Clicked => Duration::from_secs(1),
            _ => Duration::from_millis(500),
        };
        tokio::time::sleep(settle).await;
        Ok(kick)
    }
}

#[async_trait]
impl PlayerDriver for WebDriverSession {
    async fn quit(&self) -> Result<(), DriverError> {
        let url = format!("{}/session/{}", self.base, self.session_id);
        let response = self.client.delete(&url).send().await?;
        unwrap_value(response).await?;
        debug!(session = %self.session_id, "webdriver session closed");
        Ok(())
    }
}

async fn post(client: &reqwest::Client, url: &str, body: &Value) -> Result<Value, DriverError> {
    let response = client.post(url).json(body).send().await?;
    unwrap_value(response).await
}

/// Every WebDriver response wraps its payload in `{"value": ...}`; errors carry
/// `{"value": {"error": ..., "message": ...}}` with a non-2xx status.
async fn unwrap_value(response: reqwest::Response) -> Result<Value, DriverError> {
    let status = response.status();
    let mut body: Value = response.json().await?;
    let value = body.get_mut("value").map(Value::take).unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(value);
    }
    match serde_json::from_value::<WireError>(value) {
        Ok(wire) => Err(DriverError::WebDriver {
            error: wire.error,
            message: wire.message,
        }),
        Err(_) => Err(DriverError::Protocol(format!("http status {}", status))),
    }
}
