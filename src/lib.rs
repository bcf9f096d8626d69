//! `tryplay` - adaptive multi-backend stream playback
//!
//! # Features
//!
//! - **Classification**: URL heuristics pick the likely stream type
//!   (HLS, MPEG-TS, MP4, RTMP) and order the candidate backends
//! - **Fallback**: one backend at a time, each with a bounded trial window,
//!   until one plays or all have failed
//! - **Backend memory**: the backend that worked last is tried first
//! - **Recovery**: cache-busting retry and forced reconnect
//!
//! # Example
//!
//! ```rust,no_run
//! use tryplay::{Config, MountPoint, StreamSessionController};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let session =
//!         StreamSessionController::new(config.adapters()?, MountPoint::new(), config.trial_config());
//!     session.play_stream("http://example.com/live/chan.m3u8")?;
//!     let state = session.settled().await;
//!     println!("{:?}", state.view());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod stream;

pub use config::Config;
pub use stream::{
    classify, AdapterSet, BackendAdapter, BackendKind, MountPoint, PlaybackError, PlayerView,
    SessionError, SessionState, StreamSessionController, TrialConfig,
};

/// Version of tryplay
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
