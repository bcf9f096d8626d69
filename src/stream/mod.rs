//! Adaptive stream playback
//!
//! A URL is classified into a best-guess stream type, which orders the
//! candidate backends. The [`FallbackSequencer`] then attaches one backend
//! at a time to the caller's [`MountPoint`], watches it for a bounded
//! window, and moves on to the next candidate on failure or timeout. The
//! [`StreamSessionController`] wraps this in play / retry / reconnect /
//! clear operations.

pub mod backend;
pub mod backends;
pub mod cache_bust;
pub mod classify;
pub mod error;
pub mod mount;
pub mod sequencer;
pub mod session;
pub mod sniff;
pub mod state;

pub use backend::{
    AdapterSet, AttemptReporter, AttemptToken, BackendAdapter, BackendHandle, BackendKind,
    BackendSignal,
};
pub use classify::{candidate_order, classify, Classification, StreamHint};
pub use error::{PlaybackError, SessionError};
pub use mount::{MountPoint, Readiness, Sink, SinkClosed};
pub use sequencer::{FallbackSequencer, SequencerEvent, TrialConfig};
pub use session::StreamSessionController;
pub use state::{
    AttemptOutcome, PlaybackAttempt, PlayerView, SequencerPhase, SessionState, StreamRequest,
};
