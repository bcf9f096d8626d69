//! MuxedContainer backend: ffmpeg demuxes whatever the source is and
//! remuxes it, without re-encoding, into MPEG-TS on stdout.

use std::process::Stdio;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tracing::{debug, warn};

use super::{finish, mark_started, AdapterError};
use crate::stream::backend::{AttemptReporter, BackendAdapter, BackendHandle, BackendKind};
use crate::stream::mount::{MountPoint, Sink};

/// ffmpeg-based remuxing adapter
#[derive(Debug, Clone)]
pub struct MuxedContainerAdapter {
    /// Path to ffmpeg binary
    ffmpeg_path: String,
    user_agent: Option<String>,
    /// Additional ffmpeg input arguments
    extra_args: Vec<String>,
}

impl MuxedContainerAdapter {
    /// Search for ffmpeg in PATH, falling back to the bare command name.
    pub fn new() -> Self {
        let ffmpeg_path = which::which("ffmpeg")
            .map_or_else(|_| "ffmpeg".to_string(), |p| p.to_string_lossy().to_string());

        Self {
            ffmpeg_path,
            user_agent: None,
            extra_args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_ffmpeg_path(mut self, path: &str) -> Self {
        self.ffmpeg_path = path.to_string();
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    #[must_use]
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    fn build_args(&self, url: &str) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "warning"]
            .iter()
            .map(ToString::to_string)
            .collect();

        if let Some(agent) = &self.user_agent {
            args.push("-user_agent".to_string());
            args.push(agent.clone());
        }

        args.extend(
            [
                "-fflags", "+genpts+discardcorrupt",
                "-reconnect", "1",
                "-reconnect_streamed", "1",
                "-reconnect_delay_max", "2",
            ]
            .iter()
            .map(ToString::to_string),
        );
        args.extend(self.extra_args.iter().cloned());

        args.push("-i".to_string());
        args.push(url.to_string());

        args.extend(
            ["-c", "copy", "-f", "mpegts", "pipe:1"]
                .iter()
                .map(ToString::to_string),
        );
        args
    }
}

impl Default for MuxedContainerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendAdapter for MuxedContainerAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::MuxedContainer
    }

    fn attach(&self, mount: &MountPoint, url: &str, reporter: AttemptReporter) -> BackendHandle {
        let sink = mount.bind(BackendKind::MuxedContainer);
        let args = self.build_args(url);
        debug!(epoch = reporter.token().epoch, ?args, "ffmpeg args");
        let worker = tokio::spawn(run(self.ffmpeg_path.clone(), args, sink.clone(), reporter));
        BackendHandle::new(BackendKind::MuxedContainer, mount.clone(), sink).with_worker(worker)
    }
}

async fn run(ffmpeg: String, args: Vec<String>, sink: Arc<Sink>, reporter: AttemptReporter) {
    let mut started = false;
    let result = remux(&ffmpeg, &args, &sink, &reporter, &mut started).await;
    finish(&reporter, &sink, started, result);
}

async fn remux(
    ffmpeg: &str,
    args: &[String],
    sink: &Sink,
    reporter: &AttemptReporter,
    started: &mut bool,
) -> Result<(), AdapterError> {
    // Aborting the worker drops the child, which kills ffmpeg.
    let mut child = Command::new(ffmpeg)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AdapterError::Ffmpeg(format!("failed to start {ffmpeg}: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AdapterError::Ffmpeg("failed to capture stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AdapterError::Ffmpeg("failed to capture stderr".to_string()))?;
    let stderr_task = tokio::spawn(watch_stderr(stderr));

    let mut reader = BufReader::new(stdout);
    let mut buffer = vec![0u8; 64 * 1024];
    let mut total_bytes = 0u64;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        sink.write(Bytes::copy_from_slice(&buffer[..n])).await?;
        total_bytes += n as u64;
        mark_started(reporter, sink, started);
    }

    let status = child.wait().await?;
    let last_error = stderr_task.await.ok().flatten();
    debug!(total_bytes, %status, "ffmpeg finished");

    if status.success() {
        if total_bytes == 0 {
            return Err(AdapterError::Empty);
        }
        return Ok(());
    }
    Err(AdapterError::Ffmpeg(match last_error {
        Some(line) => format!("exited with {status}: {line}"),
        None => format!("exited with {status}"),
    }))
}

/// Log ffmpeg's warnings and keep the last one for the failure reason.
async fn watch_stderr(stderr: ChildStderr) -> Option<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut last = None;
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        warn!("ffmpeg: {line}");
        last = Some(line);
    }
    last
}
