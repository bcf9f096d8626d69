//! Native backend: the source is a file the player understands directly
//! (MP4, WebM, Ogg, MP3), fetched progressively.

use reqwest::Client;

use super::progressive;
use crate::stream::backend::{AttemptReporter, BackendAdapter, BackendHandle, BackendKind};
use crate::stream::mount::MountPoint;
use crate::stream::sniff::Container;

pub struct NativeAdapter {
    client: Client,
}

impl NativeAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl BackendAdapter for NativeAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn attach(&self, mount: &MountPoint, url: &str, reporter: AttemptReporter) -> BackendHandle {
        let sink = mount.bind(BackendKind::Native);
        let worker = tokio::spawn(progressive::run(
            self.client.clone(),
            url.to_string(),
            sink.clone(),
            reporter,
            Container::is_native_playable,
        ));
        BackendHandle::new(BackendKind::Native, mount.clone(), sink).with_worker(worker)
    }
}
