//! Playback and session errors.

use std::time::Duration;

use thiserror::Error;

use super::backend::BackendKind;

/// Why a backend attempt ended, or why the whole trial loop gave up.
///
/// Only [`PlaybackError::AllBackendsExhausted`] is ever surfaced to the
/// caller; the others advance the trial loop and are recorded per attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("{kind} failed to attach: {reason}")]
    AttachFailed { kind: BackendKind, reason: String },

    #[error("{kind} playback failed: {reason}")]
    PlaybackFailed { kind: BackendKind, reason: String },

    #[error("{kind} did not start playing within {}ms", .window.as_millis())]
    TimedOut { kind: BackendKind, window: Duration },

    #[error("Could not play stream with any available backend (tried: {})", join_kinds(.attempted))]
    AllBackendsExhausted { attempted: Vec<BackendKind> },
}

fn join_kinds(kinds: &[BackendKind]) -> String {
    kinds
        .iter()
        .map(|k| k.label())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Misuse of the session API.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("stream URL is empty")]
    EmptyUrl,

    #[error("no stream is loaded")]
    NoActiveStream,
}
