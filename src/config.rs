use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::playback::PlaybackOutput;
use crate::session::SessionConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub backend: BackendConfig,
    pub session: SessionTimeouts,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

/// Where the reply stream comes from
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the response-generating backend, without trailing slash
    pub base_url: String,
    /// POST endpoint that takes the captured audio and answers with the event stream
    pub submit_path: String,
    /// Fire-and-forget stop notification endpoint
    pub stop_path: String,
}

impl BackendConfig {
    pub fn submit_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.submit_path)
    }

    pub fn stop_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.stop_path)
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionTimeouts {
    pub open_timeout_secs: u64,
    pub frame_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    pub output: PlaybackOutput,
    pub wav_output_dir: String,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            open_timeout: Duration::from_secs(self.session.open_timeout_secs),
            frame_timeout: Duration::from_secs(self.session.frame_timeout_secs),
        }
    }
}
