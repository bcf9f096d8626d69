//! Session controller: the public play / retry / reconnect / clear API.
//!
//! Every operation builds a fresh [`StreamRequest`](super::StreamRequest)
//! and hands it to the [`FallbackSequencer`] synchronously, so the state
//! reports `loading` as soon as the call returns. Adapter reports and timer
//! events are drained by a background task that feeds them to the same
//! sequencer under the same lock, which serializes every attach and dispose.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::AdapterSet;
use super::cache_bust::{reconnect_token, reconnect_url, timestamp_token, with_cache_buster};
use super::error::SessionError;
use super::mount::MountPoint;
use super::sequencer::{FallbackSequencer, SequencerEvent, TrialConfig};
use super::state::{PlayerView, SessionState};

/// Owns one sequencer and one mount point for the lifetime of a player.
pub struct StreamSessionController {
    sequencer: Arc<Mutex<FallbackSequencer>>,
    state: watch::Receiver<SessionState>,
    pump: JoinHandle<()>,
}

impl StreamSessionController {
    /// Create a controller rendering into `mount`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(adapters: AdapterSet, mount: MountPoint, config: TrialConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let sequencer = FallbackSequencer::new(adapters, mount, config, tx);
        let state = sequencer.subscribe();
        let sequencer = Arc::new(Mutex::new(sequencer));
        let pump = tokio::spawn(pump_events(Arc::downgrade(&sequencer), rx));
        Self {
            sequencer,
            state,
            pump,
        }
    }

    /// Play `url` from scratch, keeping the backend that worked last time
    /// as the first candidate. Returns the request epoch.
    pub fn play_stream(&self, url: &str) -> Result<u64, SessionError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SessionError::EmptyUrl);
        }
        info!(url, "play stream");
        Ok(self.submit(url.to_string(), false))
    }

    /// Re-issue the current URL with a fresh cache-busting parameter.
    pub fn retry_stream(&self) -> Result<u64, SessionError> {
        let current = self.current_url().ok_or(SessionError::NoActiveStream)?;
        let url = with_cache_buster(&current, &timestamp_token());
        info!(%url, "retrying stream with cache busting");
        Ok(self.submit(url, false))
    }

    /// Re-issue the current URL without its query, with a fresh reconnect
    /// token, forgetting which backend worked so classification starts over.
    pub fn force_reconnect(&self) -> Result<u64, SessionError> {
        let current = self.current_url().ok_or(SessionError::NoActiveStream)?;
        let url = reconnect_url(&current, &reconnect_token());
        info!(%url, "force reconnect");
        Ok(self.submit(url, true))
    }

    /// Dispose whatever is playing and go back to Idle. Safe to repeat.
    pub fn clear_stream(&self) {
        self.lock().teardown();
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn view(&self) -> PlayerView {
        self.state.borrow().view()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn current_url(&self) -> Option<String> {
        self.state.borrow().current_url.clone()
    }

    /// Wait until the current request's trial loop has ended.
    pub async fn settled(&self) -> SessionState {
        let mut rx = self.state.clone();
        let settled = rx.wait_for(SessionState::is_settled).await.map(|s| s.clone());
        settled.unwrap_or_else(|_| self.state())
    }

    fn submit(&self, url: String, reset_backend_memory: bool) -> u64 {
        let mut sequencer = self.lock();
        let request = sequencer.next_request(url, reset_backend_memory);
        let epoch = request.epoch;
        sequencer.begin(request);
        epoch
    }

    fn lock(&self) -> MutexGuard<'_, FallbackSequencer> {
        self.sequencer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StreamSessionController {
    fn drop(&mut self) {
        self.pump.abort();
        self.lock().teardown();
    }
}

/// Feed adapter and timer events into the sequencer until it goes away.
async fn pump_events(
    sequencer: Weak<Mutex<FallbackSequencer>>,
    mut events: mpsc::UnboundedReceiver<SequencerEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(strong) = sequencer.upgrade() else {
            break;
        };
        strong
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handle(event);
    }
    debug!("session event pump stopped");
}
