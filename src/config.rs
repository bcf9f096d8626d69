//! Configuration loaded from `~/.config/tryplay/config.toml`.
//!
//! Every key is optional. A missing file means defaults.
//!
//! ```toml
//! [trial]
//! window_ms = 20000
//! poll_interval_ms = 1000   # 0 checks readiness only at window expiry
//! min_buffered_bytes = 131072
//!
//! [http]
//! timeout_secs = 15
//! user_agent = "tryplay/0.1"
//! segment_retries = 3
//!
//! [ffmpeg]
//! path = "/usr/local/bin/ffmpeg"
//! extra_args = ["-rw_timeout", "5000000"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::stream::backends::{self, HttpOptions, MuxedContainerAdapter};
use crate::stream::{AdapterSet, TrialConfig};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub trial: TrialSection,
    pub http: HttpSection,
    pub ffmpeg: FfmpegSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrialSection {
    pub window_ms: u64,
    pub poll_interval_ms: u64,
    pub min_buffered_bytes: u64,
}

impl Default for TrialSection {
    fn default() -> Self {
        let defaults = TrialConfig::default();
        Self {
            window_ms: duration_ms(defaults.window),
            poll_interval_ms: defaults.poll_interval.map_or(0, duration_ms),
            min_buffered_bytes: defaults.min_buffered_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
    /// Attempts per HLS segment.
    pub segment_retries: u32,
}

impl Default for HttpSection {
    fn default() -> Self {
        let defaults = HttpOptions::default();
        Self {
            timeout_secs: defaults.timeout.as_secs(),
            user_agent: None,
            segment_retries: defaults.segment_retries,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FfmpegSection {
    /// Binary to run; searched in PATH when unset.
    pub path: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Config {
    /// Load from the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load from `path`, falling back to defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        toml::from_str(&content).with_context(|| format!("invalid TOML in {}", path.display()))
    }

    pub fn trial_config(&self) -> TrialConfig {
        TrialConfig {
            window: Duration::from_millis(self.trial.window_ms),
            poll_interval: (self.trial.poll_interval_ms > 0)
                .then(|| Duration::from_millis(self.trial.poll_interval_ms)),
            min_buffered_bytes: self.trial.min_buffered_bytes,
        }
    }

    pub fn http_options(&self) -> HttpOptions {
        let defaults = HttpOptions::default();
        HttpOptions {
            timeout: Duration::from_secs(self.http.timeout_secs.max(1)),
            user_agent: self.http.user_agent.clone().unwrap_or(defaults.user_agent),
            segment_retries: self.http.segment_retries.max(1),
        }
    }

    pub fn muxed_adapter(&self) -> MuxedContainerAdapter {
        let mut adapter = MuxedContainerAdapter::new()
            .with_extra_args(self.ffmpeg.extra_args.clone())
            .with_user_agent(&self.http_options().user_agent);
        if let Some(path) = &self.ffmpeg.path {
            adapter = adapter.with_ffmpeg_path(&path.to_string_lossy());
        }
        adapter
    }

    /// The four standard adapters, configured from this file.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn adapters(&self) -> Result<AdapterSet> {
        backends::standard_adapters(&self.http_options(), self.muxed_adapter())
            .context("failed to build backend adapters")
    }
}

/// Return the path to the config file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tryplay")
        .join("config.toml")
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
