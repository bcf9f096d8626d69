//! Progressive HTTP body streaming shared by the Native and
//! TransportStream adapters.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::Client;
use tracing::debug;

use super::{finish, mark_started, AdapterError};
use crate::stream::backend::AttemptReporter;
use crate::stream::mount::Sink;
use crate::stream::sniff::Container;

/// Bytes collected before the container is sniffed.
pub(super) const PROBE_LEN: usize = 4 * 1024;

/// Worker body: GET `url`, sniff the first bytes, then copy the body into
/// `sink` until it ends or the sink is closed.
pub(super) async fn run(
    client: Client,
    url: String,
    sink: Arc<Sink>,
    reporter: AttemptReporter,
    accepts: fn(Container) -> bool,
) {
    let mut started = false;
    let result = stream_body(&client, &url, &sink, &reporter, accepts, &mut started).await;
    finish(&reporter, &sink, started, result);
}

async fn stream_body(
    client: &Client,
    url: &str,
    sink: &Sink,
    reporter: &AttemptReporter,
    accepts: fn(Container) -> bool,
    started: &mut bool,
) -> Result<(), AdapterError> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(AdapterError::Status(response.status()));
    }

    let mut body = response.bytes_stream();
    let mut probe = BytesMut::new();
    while probe.len() < PROBE_LEN {
        match body.next().await {
            Some(chunk) => probe.extend_from_slice(&chunk?),
            None => break,
        }
    }
    if probe.is_empty() {
        return Err(AdapterError::Empty);
    }

    let container = Container::sniff(&probe);
    debug!(
        epoch = reporter.token().epoch,
        kind = %reporter.kind(),
        ?container,
        "sniffed response body"
    );
    if !accepts(container) {
        return Err(AdapterError::Unsupported(container));
    }

    sink.write(probe.freeze()).await?;
    mark_started(reporter, sink, started);

    while let Some(chunk) = body.next().await {
        let chunk: Bytes = chunk?;
        sink.write(chunk).await?;
    }
    Ok(())
}
