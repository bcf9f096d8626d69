//! Session state published by the sequencer.

use serde::Serialize;

use super::backend::BackendKind;

/// One request issued by a session operation. Superseded, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub url: String,
    pub epoch: u64,
    pub reset_backend_memory: bool,
}

/// Where the sequencer is in its trial loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SequencerPhase {
    Idle,
    Classifying,
    Attempting { index: usize, kind: BackendKind },
    Succeeded { kind: BackendKind },
    ExhaustedFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Succeeded,
    Failed,
    TimedOut,
}

/// Record of one backend tried for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackAttempt {
    pub kind: BackendKind,
    pub epoch: u64,
    pub outcome: AttemptOutcome,
    /// Failure reason, or how success was detected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Everything the session knows about the current stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub phase: SequencerPhase,
    pub current_url: Option<String>,
    pub epoch: u64,
    pub loading: bool,
    pub reconnecting: bool,
    pub last_successful_backend: Option<BackendKind>,
    pub candidates: Vec<BackendKind>,
    pub attempts: Vec<PlaybackAttempt>,
    pub current_backend: Option<BackendKind>,
    pub attempting: Option<BackendKind>,
    pub error_message: Option<String>,
}

impl SessionState {
    /// Idle state with no URL, remembering `epoch` and the backend bias.
    pub fn idle(epoch: u64, last_successful_backend: Option<BackendKind>) -> Self {
        Self {
            phase: SequencerPhase::Idle,
            current_url: None,
            epoch,
            loading: false,
            reconnecting: false,
            last_successful_backend,
            candidates: Vec::new(),
            attempts: Vec::new(),
            current_backend: None,
            attempting: None,
            error_message: None,
        }
    }

    /// Kinds tried for the current request, in order.
    pub fn attempted_kinds(&self) -> Vec<BackendKind> {
        self.attempts.iter().map(|a| a.kind).collect()
    }

    pub fn is_idle(&self) -> bool {
        self.phase == SequencerPhase::Idle
    }

    /// True once the trial loop for the current request has ended.
    pub fn is_settled(&self) -> bool {
        matches!(
            self.phase,
            SequencerPhase::Idle | SequencerPhase::Succeeded { .. } | SequencerPhase::ExhaustedFailed
        )
    }

    /// The minimal surface a presentation layer consumes.
    pub fn view(&self) -> PlayerView {
        PlayerView {
            current_backend_label: self.current_backend.map(|k| k.label().to_string()),
            attempted_kinds: self
                .attempts
                .iter()
                .map(|a| a.kind.label().to_string())
                .collect(),
            error_message: self.error_message.clone(),
            is_loading: self.loading,
            is_reconnecting: self.reconnecting,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::idle(0, None)
    }
}

/// Observable player state for a presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub current_backend_label: Option<String>,
    pub attempted_kinds: Vec<String>,
    pub error_message: Option<String>,
    pub is_loading: bool,
    pub is_reconnecting: bool,
}
