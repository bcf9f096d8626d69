//! TransportStream backend: a continuous MPEG-TS (or FLV) feed over HTTP,
//! the usual shape of IPTV `.ts` and `type=mpegts` endpoints.

use reqwest::Client;

use super::progressive;
use crate::stream::backend::{AttemptReporter, BackendAdapter, BackendHandle, BackendKind};
use crate::stream::mount::MountPoint;
use crate::stream::sniff::Container;

pub struct TransportStreamAdapter {
    client: Client,
}

impl TransportStreamAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl BackendAdapter for TransportStreamAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::TransportStream
    }

    fn attach(&self, mount: &MountPoint, url: &str, reporter: AttemptReporter) -> BackendHandle {
        let sink = mount.bind(BackendKind::TransportStream);
        let worker = tokio::spawn(progressive::run(
            self.client.clone(),
            url.to_string(),
            sink.clone(),
            reporter,
            Container::is_transport,
        ));
        BackendHandle::new(BackendKind::TransportStream, mount.clone(), sink).with_worker(worker)
    }
}
