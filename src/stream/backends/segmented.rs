//! SegmentedStreaming backend: HLS.
//!
//! Resolves a master playlist to its highest-bandwidth variant, then feeds
//! segments into the sink in sequence order. Live playlists are refreshed
//! every half target duration and only unseen sequence numbers are fetched.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, info};

use super::playlist::{self, MediaPlaylist};
use super::{finish, mark_started, AdapterError};
use crate::stream::backend::{AttemptReporter, BackendAdapter, BackendHandle, BackendKind};
use crate::stream::mount::{MountPoint, Sink};
use crate::stream::sniff::Container;

pub struct SegmentedAdapter {
    client: Client,
    request_timeout: Duration,
    max_retries: u32,
}

impl SegmentedAdapter {
    pub fn new(client: Client, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
            max_retries: 3,
        }
    }

    /// Attempts per segment before the stream is given up.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }
}

impl BackendAdapter for SegmentedAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::SegmentedStreaming
    }

    fn attach(&self, mount: &MountPoint, url: &str, reporter: AttemptReporter) -> BackendHandle {
        let sink = mount.bind(BackendKind::SegmentedStreaming);
        let fetcher = Fetcher {
            client: self.client.clone(),
            timeout: self.request_timeout,
            max_retries: self.max_retries,
        };
        let worker = tokio::spawn(run(fetcher, url.to_string(), sink.clone(), reporter));
        BackendHandle::new(BackendKind::SegmentedStreaming, mount.clone(), sink).with_worker(worker)
    }
}

struct Fetcher {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl Fetcher {
    async fn playlist(&self, url: &str) -> Result<String, AdapterError> {
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        if !response.status().is_success() {
            return Err(AdapterError::Status(response.status()));
        }
        Ok(response.text().await?)
    }

    async fn segment(&self, url: &str) -> Result<Bytes, AdapterError> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            match self.client.get(url).timeout(self.timeout).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp.bytes().await?),
                Ok(resp) => last_error = Some(AdapterError::Status(resp.status())),
                Err(e) => last_error = Some(e.into()),
            }

            if attempt + 1 < self.max_retries {
                debug!(url, attempt, "segment fetch failed, retrying");
                tokio::time::sleep(Duration::from_millis(500 * (u64::from(attempt) + 1))).await;
            }
        }

        Err(last_error.unwrap_or(AdapterError::Empty))
    }
}

async fn run(fetcher: Fetcher, url: String, sink: Arc<Sink>, reporter: AttemptReporter) {
    let mut started = false;
    let result = stream_playlist(&fetcher, &url, &sink, &reporter, &mut started).await;
    finish(&reporter, &sink, started, result);
}

async fn stream_playlist(
    fetcher: &Fetcher,
    url: &str,
    sink: &Sink,
    reporter: &AttemptReporter,
    started: &mut bool,
) -> Result<(), AdapterError> {
    let epoch = reporter.token().epoch;
    let mut content = fetcher.playlist(url).await?;
    if !playlist::looks_like_playlist(&content) {
        return Err(AdapterError::NotAPlaylist);
    }

    let media_url = if playlist::is_master(&content) {
        let variants = playlist::parse_master(&content, url);
        let variant = variants.first().ok_or(AdapterError::EmptyPlaylist)?;
        info!(
            epoch,
            variants = variants.len(),
            height = variant.height,
            bandwidth = variant.bandwidth,
            "selected HLS variant"
        );
        let media_url = variant.uri.clone();
        content = fetcher.playlist(&media_url).await?;
        media_url
    } else {
        url.to_string()
    };

    let mut last_written: Option<u64> = None;
    let mut init_sent: Option<String> = None;
    loop {
        let playlist: MediaPlaylist = playlist::parse_media(&content, &media_url);
        debug!(
            epoch,
            segments = playlist.segments.len(),
            live = playlist.is_live,
            "media playlist"
        );
        if playlist.segments.is_empty() && !*started && !playlist.is_live {
            return Err(AdapterError::EmptyPlaylist);
        }

        // Encoder restarts renumber from a lower media sequence.
        if let (Some(last), Some(newest)) = (last_written, playlist.last_sequence()) {
            if newest < last {
                info!(epoch, last, newest, "media sequence restarted");
                last_written = None;
            }
        }

        let seen = last_written;
        for segment in playlist
            .segments
            .iter()
            .filter(|s| seen.map_or(true, |last| s.sequence > last))
        {
            let data = fetcher.segment(&segment.uri).await?;
            if !*started {
                check_first_segment(&data, playlist.init_uri.is_some())?;
            }
            if let Some(init) = &playlist.init_uri {
                if init_sent.as_ref() != Some(init) {
                    let init_data = fetcher.segment(init).await?;
                    sink.write(init_data).await?;
                    init_sent = Some(init.clone());
                }
            }
            sink.write(data).await?;
            last_written = Some(segment.sequence);
            debug!(
                epoch,
                sequence = segment.sequence,
                duration = segment.duration,
                "segment written"
            );
            mark_started(reporter, sink, started);
        }

        if !playlist.is_live {
            return Ok(());
        }

        tokio::time::sleep(playlist.refresh_interval()).await;
        content = fetcher.playlist(&media_url).await?;
    }
}

/// The first media segment must look like media, not an error page.
fn check_first_segment(data: &[u8], has_init: bool) -> Result<(), AdapterError> {
    if data.is_empty() {
        return Err(AdapterError::Empty);
    }
    let container = Container::sniff(data);
    let playable = matches!(container, Container::MpegTs | Container::Mp4)
        // Packed audio and fMP4 fragments without a recognised box prefix.
        || (container == Container::Unknown && has_init)
        || container == Container::Mp3;
    if playable {
        Ok(())
    } else {
        Err(AdapterError::Unsupported(container))
    }
}
