//! Fallback sequencer: the trial loop across backends.
//!
//! ```text
//! Idle -> Classifying -> Attempting(0) -> Attempting(1) -> ... -> Succeeded
//!                                                           \-> ExhaustedFailed
//! ```
//!
//! The sequencer is a plain state machine with one entry point per event:
//! [`begin`](FallbackSequencer::begin) for a new request,
//! [`handle`](FallbackSequencer::handle) for asynchronous backend and timer
//! events, and [`teardown`](FallbackSequencer::teardown). It never blocks;
//! observation windows are timer tasks that post events back through the
//! same channel adapters report on.
//!
//! Every asynchronous event carries the [`AttemptToken`] of the attempt that
//! produced it. Events whose token is not the live attempt are dropped, so a
//! slow backend from a superseded request can never touch a newer one.
//!
//! The live attempt's handle is always disposed inside
//! [`attempt`](FallbackSequencer::attempt) before the next adapter is
//! attached, which keeps at most one backend bound to the mount point.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::backend::{
    AdapterSet, AttemptReporter, AttemptToken, BackendAdapter, BackendHandle, BackendKind,
    BackendSignal,
};
use super::classify::{candidate_order, classify};
use super::error::PlaybackError;
use super::mount::MountPoint;
use super::state::{AttemptOutcome, PlaybackAttempt, SequencerPhase, SessionState, StreamRequest};

/// Observation window settings for each backend attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialConfig {
    /// How long one backend gets to prove it is playing.
    pub window: Duration,
    /// Readiness polling period inside the window. `None` checks readiness
    /// only when the window expires.
    pub poll_interval: Option<Duration>,
    /// Bytes a sink must have rendered before polling counts it as playing.
    pub min_buffered_bytes: u64,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(20),
            poll_interval: Some(Duration::from_secs(1)),
            min_buffered_bytes: 128 * 1024,
        }
    }
}

/// Asynchronous input to the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerEvent {
    /// Report from an adapter.
    Backend {
        token: AttemptToken,
        signal: BackendSignal,
    },
    /// Periodic readiness check.
    Poll { token: AttemptToken },
    /// The observation window ran out.
    Expired { token: AttemptToken },
}

impl SequencerEvent {
    pub fn token(&self) -> AttemptToken {
        match self {
            Self::Backend { token, .. } | Self::Poll { token } | Self::Expired { token } => *token,
        }
    }
}

/// How a success was noticed.
#[derive(Debug, Clone, Copy)]
enum Detection {
    Event,
    Poll,
    WindowCheck,
}

impl Detection {
    fn describe(self) -> &'static str {
        match self {
            Self::Event => "playing event",
            Self::Poll => "readiness poll",
            Self::WindowCheck => "readiness check at window expiry",
        }
    }
}

struct LiveAttempt {
    token: AttemptToken,
    adapter: Arc<dyn BackendAdapter>,
    handle: BackendHandle,
    timer: Option<JoinHandle<()>>,
}

struct Trial {
    request: StreamRequest,
    candidates: Vec<BackendKind>,
    index: usize,
    live: Option<LiveAttempt>,
    finished: bool,
}

/// Epoch-guarded trial loop over the registered adapters.
pub struct FallbackSequencer {
    adapters: AdapterSet,
    mount: MountPoint,
    config: TrialConfig,
    events: mpsc::UnboundedSender<SequencerEvent>,
    state: watch::Sender<SessionState>,
    runtime: Handle,
    epoch: u64,
    last_successful: Option<BackendKind>,
    trial: Option<Trial>,
}

impl FallbackSequencer {
    /// Create a sequencer. Adapter and timer events are posted to `events`;
    /// whoever owns the receiver feeds them back through [`handle`](Self::handle).
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(
        adapters: AdapterSet,
        mount: MountPoint,
        config: TrialConfig,
        events: mpsc::UnboundedSender<SequencerEvent>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            adapters,
            mount,
            config,
            events,
            state,
            runtime: Handle::current(),
            epoch: 0,
            last_successful: None,
            trial: None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn last_successful_backend(&self) -> Option<BackendKind> {
        self.last_successful
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Build the next request, one epoch past the current one.
    pub fn next_request(&self, url: impl Into<String>, reset_backend_memory: bool) -> StreamRequest {
        StreamRequest {
            url: url.into(),
            epoch: self.epoch + 1,
            reset_backend_memory,
        }
    }

    /// Start the trial loop for `request`, superseding whatever was running.
    pub fn begin(&mut self, request: StreamRequest) {
        if request.epoch <= self.epoch {
            warn!(
                epoch = request.epoch,
                current = self.epoch,
                "ignoring stale stream request"
            );
            return;
        }

        self.epoch = request.epoch;
        self.release_live();
        if request.reset_backend_memory {
            self.last_successful = None;
        }

        info!(epoch = self.epoch, url = %request.url, "new stream request");
        let epoch = self.epoch;
        let last_successful = self.last_successful;
        let url = request.url.clone();
        let reconnecting = request.reset_backend_memory;
        self.state.send_modify(|s| {
            *s = SessionState {
                phase: SequencerPhase::Classifying,
                current_url: Some(url),
                loading: true,
                reconnecting,
                ..SessionState::idle(epoch, last_successful)
            };
        });

        let hint = classify(&request.url).hint;
        let candidates = candidate_order(&request.url, self.last_successful);
        debug!(
            epoch,
            ?hint,
            ?candidates,
            preferred = ?self.last_successful,
            "classified stream"
        );
        let published = candidates.clone();
        self.state.send_modify(|s| s.candidates = published);

        self.trial = Some(Trial {
            request,
            candidates,
            index: 0,
            live: None,
            finished: false,
        });
        self.attempt(0);
    }

    /// Apply one asynchronous event.
    pub fn handle(&mut self, event: SequencerEvent) {
        let token = event.token();
        if !self.is_live(token) {
            self.discard(&event);
            return;
        }

        match event {
            SequencerEvent::Backend { signal, .. } => match signal {
                BackendSignal::Playing => self.succeed(Detection::Event),
                BackendSignal::AttachFailed(reason) => {
                    let kind = self.live_kind();
                    self.fail(PlaybackError::AttachFailed { kind, reason });
                }
                BackendSignal::PlaybackFailed(reason) => {
                    let kind = self.live_kind();
                    self.fail(PlaybackError::PlaybackFailed { kind, reason });
                }
            },
            SequencerEvent::Poll { .. } => {
                if self.live_is_ready() {
                    self.succeed(Detection::Poll);
                }
            }
            SequencerEvent::Expired { .. } => {
                if self.live_is_ready() {
                    self.succeed(Detection::WindowCheck);
                } else {
                    let kind = self.live_kind();
                    self.fail(PlaybackError::TimedOut {
                        kind,
                        window: self.config.window,
                    });
                }
            }
        }
    }

    /// Dispose any live backend and return to Idle with no URL.
    ///
    /// Repeated calls leave the state untouched.
    pub fn teardown(&mut self) {
        let had_trial = self.trial.is_some();
        self.release_live();
        self.trial = None;
        self.mount.clear();
        if had_trial {
            // Outstanding callbacks of the cleared request become stale.
            self.epoch += 1;
            info!(epoch = self.epoch, "stream cleared");
        }
        let idle = SessionState::idle(self.epoch, self.last_successful);
        self.state.send_if_modified(|s| {
            if *s == idle {
                false
            } else {
                *s = idle;
                true
            }
        });
    }

    /// Enter `Attempting(index)`.
    fn attempt(&mut self, index: usize) {
        self.release_live();

        let Some(trial) = self.trial.as_mut() else {
            return;
        };
        let Some(&kind) = trial.candidates.get(index) else {
            self.exhaust();
            return;
        };
        trial.index = index;
        let url = trial.request.url.clone();
        let token = AttemptToken {
            epoch: self.epoch,
            index,
        };

        let epoch = self.epoch;
        self.state.send_modify(|s| {
            s.phase = SequencerPhase::Attempting { index, kind };
            s.attempting = Some(kind);
            s.attempts.push(PlaybackAttempt {
                kind,
                epoch,
                outcome: AttemptOutcome::Pending,
                detail: None,
            });
        });

        let evicted = self.mount.clear();
        if evicted > 0 {
            warn!(epoch, evicted, "mount point still had a sink bound");
        }

        let Some(adapter) = self.adapters.get(kind) else {
            self.fail(PlaybackError::AttachFailed {
                kind,
                reason: "no adapter registered".to_string(),
            });
            return;
        };

        info!(
            epoch,
            attempt = index + 1,
            of = self.trial.as_ref().map_or(0, |t| t.candidates.len()),
            %kind,
            "trying backend"
        );

        let _runtime = self.runtime.enter();
        let reporter = AttemptReporter::new(token, kind, self.events.clone());
        let handle = adapter.attach(&self.mount, &url, reporter);
        let timer = spawn_observation(token, &self.config, self.events.clone());

        if let Some(trial) = self.trial.as_mut() {
            trial.live = Some(LiveAttempt {
                token,
                adapter,
                handle,
                timer: Some(timer),
            });
        }
    }

    fn succeed(&mut self, detection: Detection) {
        let Some(trial) = self.trial.as_mut() else {
            return;
        };
        let Some(live) = trial.live.as_mut() else {
            return;
        };
        if let Some(timer) = live.timer.take() {
            timer.abort();
        }
        trial.finished = true;
        let kind = live.handle.kind();
        self.last_successful = Some(kind);

        info!(epoch = self.epoch, %kind, via = detection.describe(), "backend is playing");
        self.state.send_modify(|s| {
            s.phase = SequencerPhase::Succeeded { kind };
            s.current_backend = Some(kind);
            s.attempting = None;
            s.loading = false;
            s.reconnecting = false;
            s.error_message = None;
            s.last_successful_backend = Some(kind);
            if let Some(last) = s.attempts.last_mut() {
                last.outcome = AttemptOutcome::Succeeded;
                last.detail = Some(detection.describe().to_string());
            }
        });
    }

    fn fail(&mut self, error: PlaybackError) {
        warn!(epoch = self.epoch, %error, "backend attempt failed");
        self.release_live();

        let outcome = match error {
            PlaybackError::TimedOut { .. } => AttemptOutcome::TimedOut,
            _ => AttemptOutcome::Failed,
        };
        self.state.send_modify(|s| {
            s.attempting = None;
            if let Some(last) = s.attempts.last_mut() {
                last.outcome = outcome;
                last.detail = Some(error.to_string());
            }
        });

        let Some(trial) = self.trial.as_ref() else {
            return;
        };
        let next = trial.index + 1;
        if next < trial.candidates.len() {
            self.attempt(next);
        } else {
            self.exhaust();
        }
    }

    fn exhaust(&mut self) {
        self.release_live();
        if let Some(trial) = self.trial.as_mut() {
            trial.finished = true;
        }

        let attempted = self.state.borrow().attempted_kinds();
        let error = PlaybackError::AllBackendsExhausted { attempted };
        error!(epoch = self.epoch, %error, "no backend could play the stream");
        let message = error.to_string();
        self.state.send_modify(|s| {
            s.phase = SequencerPhase::ExhaustedFailed;
            s.attempting = None;
            s.current_backend = None;
            s.loading = false;
            s.reconnecting = false;
            s.error_message = Some(message);
        });
    }

    /// Dispose the live backend and cancel its observation timer.
    fn release_live(&mut self) {
        let Some(mut live) = self.trial.as_mut().and_then(|t| t.live.take()) else {
            return;
        };
        if let Some(timer) = live.timer.take() {
            timer.abort();
        }
        live.adapter.dispose(&mut live.handle);
        debug!(
            epoch = live.token.epoch,
            index = live.token.index,
            kind = %live.handle.kind(),
            "backend disposed"
        );
    }

    /// True when `token` names the attempt currently under observation.
    fn is_live(&self, token: AttemptToken) -> bool {
        token.epoch == self.epoch
            && self.trial.as_ref().is_some_and(|t| {
                !t.finished && t.live.as_ref().is_some_and(|live| live.token == token)
            })
    }

    fn live_kind(&self) -> BackendKind {
        self.trial
            .as_ref()
            .and_then(|t| t.live.as_ref())
            .map_or(BackendKind::Native, |live| live.handle.kind())
    }

    fn live_is_ready(&self) -> bool {
        self.trial
            .as_ref()
            .and_then(|t| t.live.as_ref())
            .is_some_and(|live| live.handle.readiness().is_playing(self.config.min_buffered_bytes))
    }

    fn discard(&self, event: &SequencerEvent) {
        let token = event.token();
        let playing_token = self
            .trial
            .as_ref()
            .filter(|t| t.finished)
            .and_then(|t| t.live.as_ref())
            .map(|live| live.token);

        match event {
            SequencerEvent::Backend {
                signal: BackendSignal::AttachFailed(reason) | BackendSignal::PlaybackFailed(reason),
                ..
            } if playing_token == Some(token) => {
                warn!(epoch = token.epoch, %reason, "backend reported an error after playback started");
            }
            _ => {
                debug!(
                    epoch = token.epoch,
                    index = token.index,
                    current = self.epoch,
                    ?event,
                    "discarding stale event"
                );
            }
        }
    }
}

impl Drop for FallbackSequencer {
    fn drop(&mut self) {
        self.release_live();
    }
}

/// Spawn the observation timer for one attempt: `Poll` ticks while the
/// window is open (if polling is enabled), then a single `Expired`.
fn spawn_observation(
    token: AttemptToken,
    config: &TrialConfig,
    events: mpsc::UnboundedSender<SequencerEvent>,
) -> JoinHandle<()> {
    let window = config.window;
    let poll_interval = config.poll_interval.filter(|p| !p.is_zero());

    tokio::spawn(async move {
        let deadline = Instant::now() + window;
        if let Some(period) = poll_interval {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let expiry = tokio::time::sleep_until(deadline);
            tokio::pin!(expiry);
            loop {
                tokio::select! {
                    () = &mut expiry => break,
                    _ = ticker.tick() => {
                        if events.send(SequencerEvent::Poll { token }).is_err() {
                            return;
                        }
                    }
                }
            }
        } else {
            tokio::time::sleep_until(deadline).await;
        }
        let _ = events.send(SequencerEvent::Expired { token });
    })
}
