//! Minimal HTTP/1.1 responder for adapter tests.
//!
//! Routes are matched on the request path (query ignored) and can be
//! replaced while the server runs, which is how live playlists advance.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::stream::backend::{AttemptReporter, AttemptToken, BackendKind, BackendSignal};
use crate::stream::sequencer::SequencerEvent;

type Routes = Arc<Mutex<HashMap<String, (u16, Vec<u8>)>>>;

pub(crate) struct TestServer {
    addr: SocketAddr,
    routes: Routes,
    hits: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");
        let routes = Routes::default();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn({
            let routes = routes.clone();
            let hits = hits.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(respond(stream, routes.clone(), hits.clone()));
                }
            }
        });

        Self {
            addr,
            routes,
            hits,
            task,
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Serve `body` with status 200 at `path`.
    pub(crate) fn serve(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.serve_status(path, 200, body);
    }

    pub(crate) fn serve_status(&self, path: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.into()));
    }

    /// How many requests reached `path`.
    pub(crate) fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().iter().filter(|p| *p == path).count()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn respond(mut stream: TcpStream, routes: Routes, hits: Arc<Mutex<Vec<String>>>) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let head = String::from_utf8_lossy(&request);
    let target = head.split_whitespace().nth(1).unwrap_or("/");
    let path = target.split('?').next().unwrap_or(target).to_string();
    hits.lock().unwrap().push(path.clone());

    let (status, body) = routes
        .lock()
        .unwrap()
        .get(&path)
        .cloned()
        .unwrap_or((404, b"not found".to_vec()));
    let header = format!(
        "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes()).await;
    let _ = stream.write_all(&body).await;
    let _ = stream.shutdown().await;
}

/// A reporter for attempt `(1, 0)` and the receiving end of its events.
pub(crate) fn reporter(kind: BackendKind) -> (AttemptReporter, mpsc::UnboundedReceiver<SequencerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let token = AttemptToken { epoch: 1, index: 0 };
    (AttemptReporter::new(token, kind, tx), rx)
}

/// The next backend signal, waiting at most five seconds.
pub(crate) async fn next_signal(rx: &mut mpsc::UnboundedReceiver<SequencerEvent>) -> BackendSignal {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no backend signal within 5s")
            .expect("reporter dropped");
        if let SequencerEvent::Backend { signal, .. } = event {
            return signal;
        }
    }
}

/// Poll `condition` until it holds, failing after five seconds.
pub(crate) async fn wait_for(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
