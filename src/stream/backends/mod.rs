//! Concrete backend adapters.
//!
//! - [`NativeAdapter`]: progressive HTTP download of a browser-playable file
//! - [`MuxedContainerAdapter`]: ffmpeg remux to MPEG-TS
//! - [`SegmentedAdapter`]: HLS playlist with segment fetching
//! - [`TransportStreamAdapter`]: continuous MPEG-TS / FLV over HTTP
//!
//! Every adapter spawns one worker task per attach. The worker binds nothing
//! itself: the sink is bound synchronously in `attach`, so disposal always
//! finds it. Workers report `attach_failed` until the first media byte has
//! been rendered, `playback_failed` afterwards.

mod muxed;
mod native;
pub mod playlist;
mod progressive;
mod segmented;
#[cfg(test)]
mod test_server;
mod transport;

pub use muxed::MuxedContainerAdapter;
pub use native::NativeAdapter;
pub use segmented::SegmentedAdapter;
pub use transport::TransportStreamAdapter;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use super::backend::{AdapterSet, AttemptReporter};
use super::mount::{Sink, SinkClosed};
use super::sniff::Container;

/// Why an adapter worker stopped.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {0}")]
    Status(reqwest::StatusCode),

    #[error("empty response")]
    Empty,

    #[error("unsupported container: {0:?}")]
    Unsupported(Container),

    #[error("not an M3U8 playlist")]
    NotAPlaylist,

    #[error("playlist has no playable entries")]
    EmptyPlaylist,

    #[error("ffmpeg: {0}")]
    Ffmpeg(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sink was disposed; nobody is listening any more.
    #[error(transparent)]
    Closed(#[from] SinkClosed),
}

/// HTTP settings shared by the network adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOptions {
    /// Connect timeout, and total timeout for playlist and segment requests.
    pub timeout: Duration,
    pub user_agent: String,
    /// Attempts per HLS segment before the stream is given up.
    pub segment_retries: u32,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: format!("tryplay/{}", crate::VERSION),
            segment_retries: 3,
        }
    }
}

impl HttpOptions {
    /// Build the client. No total timeout is set on the client itself,
    /// since progressive bodies may stream indefinitely.
    pub fn client(&self) -> Result<reqwest::Client, AdapterError> {
        Ok(reqwest::Client::builder()
            .connect_timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()?)
    }
}

/// The four standard adapters sharing one HTTP client.
pub fn standard_adapters(
    http: &HttpOptions,
    ffmpeg: MuxedContainerAdapter,
) -> Result<AdapterSet, AdapterError> {
    let client = http.client()?;
    Ok(AdapterSet::new()
        .with(Arc::new(NativeAdapter::new(client.clone())))
        .with(Arc::new(ffmpeg))
        .with(Arc::new(
            SegmentedAdapter::new(client.clone(), http.timeout).with_max_retries(http.segment_retries),
        ))
        .with(Arc::new(TransportStreamAdapter::new(client))))
}

/// Report how a worker ended. `started` says whether any media reached the
/// sink, which decides between an attach and a playback failure.
pub(crate) fn finish(
    reporter: &AttemptReporter,
    sink: &Sink,
    started: bool,
    result: Result<(), AdapterError>,
) {
    let token = reporter.token();
    match result {
        Ok(()) => {
            sink.mark_ended();
            debug!(
                epoch = token.epoch,
                kind = %reporter.kind(),
                "backend reached end of stream"
            );
        }
        Err(AdapterError::Closed(_)) => debug!(
            epoch = token.epoch,
            kind = %reporter.kind(),
            "backend stopped after disposal"
        ),
        Err(_) if sink.is_closed() => {}
        Err(error) => {
            let reason = error.to_string();
            sink.set_error(reason.clone());
            if started {
                reporter.playback_failed(reason);
            } else {
                reporter.attach_failed(reason);
            }
        }
    }
}

/// Mark the sink as playing and tell the sequencer, once.
pub(crate) fn mark_started(reporter: &AttemptReporter, sink: &Sink, started: &mut bool) {
    if !*started {
        *started = true;
        sink.resume();
        reporter.playing();
    }
}
