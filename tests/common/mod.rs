//! Scripted backend adapters for session tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tryplay::stream::{
    AdapterSet, AttemptReporter, BackendAdapter, BackendHandle, BackendKind, MountPoint,
    StreamSessionController, TrialConfig,
};

/// Bytes a fake backend renders when it starts playing.
pub const PAYLOAD_LEN: usize = 4096;

/// What a fake backend does after `attach`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Render media and report `playing` after the delay.
    SucceedAfter(Duration),
    /// Report `attach_failed` after the delay.
    FailAfter(Duration),
    /// Render media after the delay without ever reporting `playing`.
    ReadyByPoll(Duration),
    /// Never do anything.
    Silent,
    /// Report `playing` after the delay from a task that outlives disposal.
    DetachedSuccess(Duration),
    /// Report `attach_failed` after the delay from a task that outlives disposal.
    DetachedFailure(Duration),
}

#[derive(Debug, Default)]
struct RigState {
    behaviors: HashMap<BackendKind, Behavior>,
    attaches: Vec<(BackendKind, String)>,
    disposes: usize,
    max_live: usize,
}

/// Shared script and ledger for a set of fake adapters.
#[derive(Debug, Clone, Default)]
pub struct Rig {
    state: Arc<Mutex<RigState>>,
}

impl Rig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, kind: BackendKind, behavior: Behavior) {
        self.state.lock().unwrap().behaviors.insert(kind, behavior);
    }

    pub fn set_all(&self, behavior: Behavior) {
        for kind in BackendKind::ALL {
            self.set(kind, behavior);
        }
    }

    pub fn adapters(&self) -> AdapterSet {
        BackendKind::ALL.into_iter().fold(AdapterSet::new(), |set, kind| {
            set.with(Arc::new(FakeAdapter {
                kind,
                rig: self.clone(),
            }))
        })
    }

    pub fn attached_kinds(&self) -> Vec<BackendKind> {
        self.state.lock().unwrap().attaches.iter().map(|(k, _)| *k).collect()
    }

    pub fn attached_urls(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .attaches
            .iter()
            .map(|(_, u)| u.clone())
            .collect()
    }

    /// Backends attached and not yet disposed.
    pub fn live(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.attaches.len() - state.disposes
    }

    pub fn max_live(&self) -> usize {
        self.state.lock().unwrap().max_live
    }

    fn behavior(&self, kind: BackendKind) -> Behavior {
        self.state
            .lock()
            .unwrap()
            .behaviors
            .get(&kind)
            .copied()
            .unwrap_or(Behavior::Silent)
    }

    fn record_attach(&self, kind: BackendKind, url: &str) {
        let mut state = self.state.lock().unwrap();
        state.attaches.push((kind, url.to_string()));
        let live = state.attaches.len() - state.disposes;
        state.max_live = state.max_live.max(live);
    }

    fn record_dispose(&self) {
        self.state.lock().unwrap().disposes += 1;
    }
}

struct FakeAdapter {
    kind: BackendKind,
    rig: Rig,
}

impl BackendAdapter for FakeAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn attach(&self, mount: &MountPoint, url: &str, reporter: AttemptReporter) -> BackendHandle {
        self.rig.record_attach(self.kind, url);
        let sink = mount.bind(self.kind);
        let handle = BackendHandle::new(self.kind, mount.clone(), sink.clone());

        match self.rig.behavior(self.kind) {
            Behavior::SucceedAfter(delay) => handle.with_worker(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if sink.write(payload()).await.is_ok() {
                    sink.resume();
                    reporter.playing();
                }
            })),
            Behavior::FailAfter(delay) => handle.with_worker(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                sink.set_error("scripted failure");
                reporter.attach_failed("scripted failure");
            })),
            Behavior::ReadyByPoll(delay) => handle.with_worker(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if sink.write(payload()).await.is_ok() {
                    sink.resume();
                }
            })),
            Behavior::Silent => handle,
            Behavior::DetachedSuccess(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    reporter.playing();
                });
                handle
            }
            Behavior::DetachedFailure(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    reporter.attach_failed("late scripted failure");
                });
                handle
            }
        }
    }

    fn dispose(&self, handle: &mut BackendHandle) {
        self.rig.record_dispose();
        handle.release();
    }
}

fn payload() -> Bytes {
    Bytes::from(vec![0x47; PAYLOAD_LEN])
}

/// 20 s window, 1 s polling, ready once one payload is rendered.
pub fn trial() -> TrialConfig {
    TrialConfig {
        window: Duration::from_secs(20),
        poll_interval: Some(Duration::from_secs(1)),
        min_buffered_bytes: PAYLOAD_LEN as u64,
    }
}

/// A session over the rig's adapters, plus a handle on its mount point.
pub fn session(rig: &Rig) -> (StreamSessionController, MountPoint) {
    let mount = MountPoint::new();
    let session = StreamSessionController::new(rig.adapters(), mount.clone(), trial());
    (session, mount)
}
