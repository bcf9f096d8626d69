//! Backend adapter contract.
//!
//! A [`BackendAdapter`] wraps one decode engine and knows how to bind it to a
//! [`MountPoint`] for a given URL. Four kinds exist, see [`BackendKind`];
//! the real implementations live in [`backends`](super::backends).
//!
//! Adapters never fail synchronously. `attach` always hands back a
//! [`BackendHandle`] and the outcome arrives later through the
//! [`AttemptReporter`] the sequencer passed in.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::mount::{MountPoint, Readiness, Sink};
use super::sequencer::SequencerEvent;

/// Identifies which decode engine an adapter wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// Direct playback of progressive containers (MP4, WebM, ...).
    Native,
    /// General purpose multi-container runtime (ffmpeg).
    MuxedContainer,
    /// Segmented streaming (HLS manifests).
    SegmentedStreaming,
    /// Continuous MPEG-TS / FLV demuxing.
    TransportStream,
}

impl BackendKind {
    /// Every kind, in declaration order.
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Native,
        BackendKind::MuxedContainer,
        BackendKind::SegmentedStreaming,
        BackendKind::TransportStream,
    ];

    /// Stable label shown to users and used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Native => "Native",
            Self::MuxedContainer => "MuxedContainer",
            Self::SegmentedStreaming => "SegmentedStreaming",
            Self::TransportStream => "TransportStream",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "muxedcontainer" | "muxed" | "ffmpeg" => Ok(Self::MuxedContainer),
            "segmentedstreaming" | "segmented" | "hls" => Ok(Self::SegmentedStreaming),
            "transportstream" | "transport" | "ts" | "mpegts" => Ok(Self::TransportStream),
            other => Err(format!("unknown backend kind: {other}")),
        }
    }
}

/// Identity of one playback attempt: the request epoch plus the position in
/// that request's candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptToken {
    pub epoch: u64,
    pub index: usize,
}

/// Outcome signals an adapter can report for its attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSignal {
    /// The engine reports media is actually playing.
    Playing,
    /// The engine could not be initialised for this URL.
    AttachFailed(String),
    /// Media error after the engine was initialised.
    PlaybackFailed(String),
}

/// Callback channel handed to an adapter on `attach`.
///
/// Every report carries the attempt token, so reports from superseded
/// attempts are discarded by the sequencer no matter when they arrive.
#[derive(Debug, Clone)]
pub struct AttemptReporter {
    token: AttemptToken,
    kind: BackendKind,
    tx: mpsc::UnboundedSender<SequencerEvent>,
}

impl AttemptReporter {
    pub(crate) fn new(
        token: AttemptToken,
        kind: BackendKind,
        tx: mpsc::UnboundedSender<SequencerEvent>,
    ) -> Self {
        Self { token, kind, tx }
    }

    pub fn token(&self) -> AttemptToken {
        self.token
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Report that media is playing.
    pub fn playing(&self) {
        self.send(BackendSignal::Playing);
    }

    /// Report that the engine rejected the URL before producing media.
    pub fn attach_failed(&self, reason: impl Into<String>) {
        self.send(BackendSignal::AttachFailed(reason.into()));
    }

    /// Report a media error after the engine started.
    pub fn playback_failed(&self, reason: impl Into<String>) {
        self.send(BackendSignal::PlaybackFailed(reason.into()));
    }

    fn send(&self, signal: BackendSignal) {
        let event = SequencerEvent::Backend {
            token: self.token,
            signal,
        };
        // The session may already be gone; nothing left to tell.
        if self.tx.send(event).is_err() {
            debug!(kind = %self.kind, epoch = self.token.epoch, "report dropped, session closed");
        }
    }
}

/// Resources owned by one attached backend.
///
/// Holds the sink bound to the mount point and the adapter's worker task.
/// Releasing aborts the worker (which drops its sockets and subprocesses),
/// closes the sink and unbinds it. Releasing twice is a no-op, and dropping
/// an unreleased handle releases it.
pub struct BackendHandle {
    kind: BackendKind,
    mount: MountPoint,
    sink: Arc<Sink>,
    worker: Option<JoinHandle<()>>,
    released: bool,
}

impl BackendHandle {
    pub fn new(kind: BackendKind, mount: MountPoint, sink: Arc<Sink>) -> Self {
        Self {
            kind,
            mount,
            sink,
            worker: None,
            released: false,
        }
    }

    /// Attach the task driving this backend so it is aborted on release.
    #[must_use]
    pub fn with_worker(mut self, worker: JoinHandle<()>) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn readiness(&self) -> Readiness {
        self.sink.readiness()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Tear down everything this handle owns.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.sink.close();
        self.mount.release(self.sink.id());
        debug!(kind = %self.kind, sink = self.sink.id(), "backend handle released");
    }
}

impl Drop for BackendHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("kind", &self.kind)
            .field("sink", &self.sink.id())
            .field("released", &self.released)
            .finish()
    }
}

/// Uniform attach/dispose capability over one decode engine.
pub trait BackendAdapter: Send + Sync {
    /// The kind of engine this adapter wraps.
    fn kind(&self) -> BackendKind;

    /// Bind a fresh sink to `mount` and start loading `url`.
    ///
    /// Must return promptly. Success and failure are reported through
    /// `reporter`, never synchronously.
    fn attach(&self, mount: &MountPoint, url: &str, reporter: AttemptReporter) -> BackendHandle;

    /// Release everything `attach` created. Must tolerate partially attached
    /// handles and repeated calls.
    fn dispose(&self, handle: &mut BackendHandle) {
        handle.release();
    }
}

/// One adapter per [`BackendKind`].
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<BackendKind, Arc<dyn BackendAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own kind, replacing any previous one.
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    pub fn insert(&mut self, adapter: Arc<dyn BackendAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn BackendAdapter>> {
        self.adapters.get(&kind).cloned()
    }
}

impl fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.adapters.keys().map(|k| k.label()).collect();
        kinds.sort_unstable();
        f.debug_struct("AdapterSet").field("kinds", &kinds).finish()
    }
}
