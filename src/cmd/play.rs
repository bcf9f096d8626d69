use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use tryplay::stream::{
    MountPoint, SequencerPhase, SessionState, StreamSessionController,
};
use tryplay::Config;

/// Chunks buffered between the sink and the output writer.
const TAP_CAPACITY: usize = 64;

pub struct PlayOptions {
    pub url: String,
    pub output: String,
    pub player: Option<String>,
    pub window: Option<Duration>,
    pub poll: Option<Duration>,
    pub duration: Option<Duration>,
    pub retries: u32,
    pub force_reconnect: bool,
    pub json: bool,
}

pub async fn cmd_play(config: &Config, options: PlayOptions) -> Result<()> {
    let mut trial = config.trial_config();
    if let Some(window) = options.window {
        trial.window = window;
    }
    if let Some(poll) = options.poll {
        trial.poll_interval = (!poll.is_zero()).then_some(poll);
    }

    let (tap, media) = mpsc::channel::<Bytes>(TAP_CAPACITY);
    let mount = MountPoint::with_tap(tap);
    let (writer, player) = open_output(&options.output, options.player.as_deref())?;
    let writer_task = tokio::spawn(write_media(media, writer));

    let session = StreamSessionController::new(config.adapters()?, mount.clone(), trial);
    let reporter = tokio::spawn(report_transitions(session.subscribe(), options.json));

    session.play_stream(&options.url)?;
    let mut state = session.settled().await;

    let mut retries_left = options.retries;
    while !is_playing(&state) && retries_left > 0 {
        retries_left -= 1;
        eprintln!("🔁 Retrying with cache busting ({retries_left} left)");
        session.retry_stream()?;
        state = session.settled().await;
    }
    if !is_playing(&state) && options.force_reconnect {
        eprintln!("🔌 Forcing reconnect");
        session.force_reconnect()?;
        state = session.settled().await;
    }

    let outcome = if is_playing(&state) {
        watch_playback(&mount, &writer_task, options.duration).await
    } else {
        Err(anyhow::anyhow!(state
            .error_message
            .clone()
            .unwrap_or_else(|| "stream did not start".to_string())))
    };

    session.clear_stream();
    drop(session);
    drop(mount);
    reporter.abort();

    match tokio::time::timeout(Duration::from_secs(5), writer_task).await {
        Ok(Ok(Ok(bytes))) => info!(bytes, "output closed"),
        Ok(Ok(Err(e))) => warn!("output error: {e:#}"),
        Ok(Err(e)) => warn!("output writer failed: {e}"),
        Err(_) => warn!("output writer did not finish in time"),
    }
    if let Some(mut child) = player {
        child.wait().await.context("failed to wait for player")?;
    }

    outcome?;
    eprintln!("✅ Stream complete");
    Ok(())
}

fn is_playing(state: &SessionState) -> bool {
    matches!(state.phase, SequencerPhase::Succeeded { .. })
}

/// Wait while the winning backend plays, until it ends, fails, the output
/// goes away, the duration limit is reached, or the user interrupts.
async fn watch_playback(
    mount: &MountPoint,
    writer_task: &tokio::task::JoinHandle<Result<u64>>,
    duration: Option<Duration>,
) -> Result<()> {
    let limit = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(limit, interrupt);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            () = &mut limit => {
                info!("duration limit reached");
                return Ok(());
            }
            _ = &mut interrupt => {
                info!("interrupted");
                return Ok(());
            }
            _ = ticker.tick() => {
                if writer_task.is_finished() {
                    return Ok(());
                }
                let Some(sink) = mount.current() else {
                    return Ok(());
                };
                let readiness = sink.readiness();
                if let Some(error) = readiness.error {
                    anyhow::bail!("playback failed: {error}");
                }
                if readiness.ended {
                    return Ok(());
                }
            }
        }
    }
}

type MediaWriter = Box<dyn AsyncWrite + Unpin + Send>;

fn open_output(output: &str, player: Option<&str>) -> Result<(MediaWriter, Option<Child>)> {
    if let Some(player_cmd) = player {
        eprintln!("🎬 Piping to: {player_cmd}");
        let mut child = tokio::process::Command::new(player_cmd)
            .args(get_player_stdin_args(player_cmd))
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to spawn {player_cmd}"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("Failed to get stdin for {player_cmd}"))?;
        return Ok((Box::new(stdin), Some(child)));
    }

    if output == "-" {
        return Ok((Box::new(tokio::io::stdout()), None));
    }

    let file = std::fs::File::create(output).with_context(|| format!("failed to create {output}"))?;
    Ok((Box::new(tokio::fs::File::from_std(file)), None))
}

async fn write_media(mut media: mpsc::Receiver<Bytes>, mut writer: MediaWriter) -> Result<u64> {
    let mut total = 0u64;
    while let Some(chunk) = media.recv().await {
        writer.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(total)
}

/// Print phase changes on stderr.
async fn report_transitions(mut state: watch::Receiver<SessionState>, json: bool) {
    let mut last_phase = None;
    while state.changed().await.is_ok() {
        let current = state.borrow_and_update().clone();
        if last_phase == Some(current.phase) {
            continue;
        }
        last_phase = Some(current.phase);

        if json {
            if let Ok(line) = serde_json::to_string(&current.view()) {
                eprintln!("{line}");
            }
            continue;
        }
        match current.phase {
            SequencerPhase::Attempting { index, kind } => {
                eprintln!("🔧 Trying {kind} ({}/{})", index + 1, current.candidates.len());
            }
            SequencerPhase::Succeeded { kind } => eprintln!("▶️  Playing via {kind}"),
            SequencerPhase::ExhaustedFailed => {
                eprintln!(
                    "❌ {}",
                    current.error_message.as_deref().unwrap_or("playback failed")
                );
            }
            SequencerPhase::Idle | SequencerPhase::Classifying => {}
        }
    }
}

/// Get arguments for media players to read from stdin
fn get_player_stdin_args(player: &str) -> Vec<&'static str> {
    let name = std::path::Path::new(player)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(player);
    match name {
        "vlc" | "cvlc" => vec!["-", "--intf", "dummy", "--play-and-exit"],
        "ffplay" => vec!["-i", "-"],
        "iina" => vec!["--stdin"],
        _ => vec!["-"],
    }
}
