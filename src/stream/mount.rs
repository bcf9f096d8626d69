//! Mount point and sink.
//!
//! The [`MountPoint`] is the caller-owned rendering surface. It holds at
//! most one [`Sink`]: binding a new sink evicts (and closes) whatever was
//! bound before. Media bytes written to the bound sink are counted for
//! readiness polling and optionally forwarded to a tap channel that feeds
//! the real output.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::backend::BackendKind;

/// The sink was closed by `dispose`; the writer should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sink closed")]
pub struct SinkClosed;

/// Point-in-time readiness of a sink, as seen by the polling detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub buffered_bytes: u64,
    pub paused: bool,
    pub error: Option<String>,
    /// The backend delivered its whole stream.
    pub ended: bool,
}

impl Readiness {
    /// Sufficiently buffered, not paused, no error flag.
    pub fn is_playing(&self, min_buffered_bytes: u64) -> bool {
        self.error.is_none() && !self.paused && self.buffered_bytes >= min_buffered_bytes
    }
}

/// The single output a backend renders into.
#[derive(Debug)]
pub struct Sink {
    id: u64,
    kind: BackendKind,
    buffered: AtomicU64,
    paused: AtomicBool,
    closed: AtomicBool,
    ended: AtomicBool,
    error: Mutex<Option<String>>,
    tap: Option<mpsc::Sender<Bytes>>,
}

impl Sink {
    fn new(id: u64, kind: BackendKind, tap: Option<mpsc::Sender<Bytes>>) -> Self {
        Self {
            id,
            kind,
            buffered: AtomicU64::new(0),
            paused: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            error: Mutex::new(None),
            tap,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Render one chunk of media.
    pub async fn write(&self, chunk: Bytes) -> Result<(), SinkClosed> {
        if self.is_closed() {
            return Err(SinkClosed);
        }
        let len = chunk.len() as u64;
        if let Some(tap) = &self.tap {
            // A vanished consumer only means nobody is watching.
            let _ = tap.send(chunk).await;
        }
        // Closed while waiting on the tap.
        if self.is_closed() {
            return Err(SinkClosed);
        }
        self.buffered.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    /// Start (or resume) presenting media.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    /// Raise the error flag, as a media element would on a decode error.
    pub fn set_error(&self, message: impl Into<String>) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(message.into());
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Mark the end of the media; nothing more will be written.
    pub fn mark_ended(&self) {
        self.ended.store(true, Ordering::Relaxed);
    }

    pub fn readiness(&self) -> Readiness {
        Readiness {
            buffered_bytes: self.buffered.load(Ordering::Relaxed),
            paused: self.paused.load(Ordering::Relaxed),
            error: self
                .error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            ended: self.ended.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct MountInner {
    slot: Mutex<Option<Arc<Sink>>>,
    tap: Option<mpsc::Sender<Bytes>>,
    next_id: AtomicU64,
    binds: AtomicU64,
}

/// Caller-owned rendering surface. Cheap to clone; clones share the surface.
#[derive(Debug, Clone, Default)]
pub struct MountPoint {
    inner: Arc<MountInner>,
}

impl MountPoint {
    /// A surface that only counts rendered bytes.
    pub fn new() -> Self {
        Self::default()
    }

    /// A surface whose sinks forward every rendered chunk to `tap`.
    pub fn with_tap(tap: mpsc::Sender<Bytes>) -> Self {
        Self {
            inner: Arc::new(MountInner {
                tap: Some(tap),
                ..MountInner::default()
            }),
        }
    }

    /// Bind a fresh sink for `kind`. Anything still bound is evicted.
    pub fn bind(&self, kind: BackendKind) -> Arc<Sink> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let sink = Arc::new(Sink::new(id, kind, self.inner.tap.clone()));
        let previous = self.lock().replace(Arc::clone(&sink));
        if let Some(previous) = previous {
            warn!(evicted = previous.id(), kind = %previous.kind(), "mount point was not cleared before bind");
            previous.close();
        }
        self.inner.binds.fetch_add(1, Ordering::Relaxed);
        debug!(sink = id, %kind, "sink bound");
        sink
    }

    /// Unbind the sink with `sink_id` if it is still the bound one.
    pub fn release(&self, sink_id: u64) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|s| s.id() == sink_id) {
            if let Some(sink) = slot.take() {
                sink.close();
            }
        }
    }

    /// Close and unbind whatever is bound. Returns how many sinks were evicted.
    pub fn clear(&self) -> usize {
        match self.lock().take() {
            Some(sink) => {
                sink.close();
                1
            }
            None => 0,
        }
    }

    pub fn current(&self) -> Option<Arc<Sink>> {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    /// Total number of sinks ever bound to this surface.
    pub fn bind_count(&self) -> u64 {
        self.inner.binds.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<Sink>>> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
