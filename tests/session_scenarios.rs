//! End-to-end behaviour of the session controller over scripted backends.
//!
//! All tests run on a paused clock, so 20 s trial windows cost nothing.

mod common;

use std::time::Duration;

use common::{session, Behavior, Rig};
use tryplay::stream::{candidate_order, AttemptOutcome, BackendKind, SequencerPhase, SessionError};

const HLS_URL: &str = "http://iptv.example/live/chan.m3u8";
const MP4_URL: &str = "http://vod.example/movies/film.mp4";

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn hls_url_plays_on_segmented_backend() {
    let rig = Rig::new();
    rig.set(BackendKind::SegmentedStreaming, Behavior::SucceedAfter(ms(50)));
    let (session, _mount) = session(&rig);

    session.play_stream(HLS_URL).unwrap();
    assert!(session.view().is_loading);
    let state = session.settled().await;

    let view = state.view();
    assert_eq!(view.current_backend_label.as_deref(), Some("SegmentedStreaming"));
    assert_eq!(view.attempted_kinds, vec!["SegmentedStreaming"]);
    assert!(!view.is_loading);
    assert_eq!(view.error_message, None);
    assert_eq!(state.attempts[0].outcome, AttemptOutcome::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn force_reconnect_forgets_backend_memory() {
    let rig = Rig::new();
    rig.set(BackendKind::Native, Behavior::FailAfter(ms(10)));
    rig.set(BackendKind::MuxedContainer, Behavior::SucceedAfter(ms(50)));
    let (session, _mount) = session(&rig);

    session.play_stream(MP4_URL).unwrap();
    session.settled().await;
    assert_eq!(session.state().last_successful_backend, Some(BackendKind::MuxedContainer));

    session.force_reconnect().unwrap();
    let pending = session.state();
    assert!(pending.reconnecting);
    assert!(pending.loading);
    assert_eq!(pending.last_successful_backend, None);
    let url = pending.current_url.clone().unwrap();
    assert!(url.starts_with("http://vod.example/movies/film.mp4?_="));
    assert!(url.contains("forceReload=true"));
    assert_eq!(pending.candidates, candidate_order(&url, None));
    assert_eq!(pending.candidates[0], BackendKind::Native);

    let state = session.settled().await;
    assert!(!state.reconnecting);
    assert_eq!(state.current_backend, Some(BackendKind::MuxedContainer));
}

#[tokio::test(start_paused = true)]
async fn late_success_from_superseded_request_is_ignored() {
    let rig = Rig::new();
    rig.set(BackendKind::TransportStream, Behavior::DetachedSuccess(ms(5_000)));
    rig.set(BackendKind::SegmentedStreaming, Behavior::SucceedAfter(ms(50)));
    let (session, mount) = session(&rig);

    session.play_stream("http://iptv.example/live/a.ts").unwrap();
    session.play_stream("http://iptv.example/live/b.m3u8").unwrap();
    let settled = session.settled().await;

    // Let the detached success from the first request fire.
    tokio::time::sleep(Duration::from_secs(10)).await;

    let state = session.state();
    assert_eq!(state, settled);
    assert_eq!(state.epoch, 2);
    assert_eq!(state.current_backend, Some(BackendKind::SegmentedStreaming));
    assert_eq!(
        rig.attached_kinds(),
        vec![BackendKind::TransportStream, BackendKind::SegmentedStreaming]
    );
    assert_eq!(rig.live(), 1);
    assert_eq!(
        mount.current().map(|sink| sink.kind()),
        Some(BackendKind::SegmentedStreaming)
    );
}

// ─── Invariants ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn at_most_one_backend_is_ever_live() {
    let rig = Rig::new();
    rig.set_all(Behavior::FailAfter(ms(30)));
    rig.set(BackendKind::TransportStream, Behavior::Silent);
    let (session, mount) = session(&rig);

    session.play_stream(MP4_URL).unwrap();
    tokio::time::sleep(ms(40)).await;
    session.play_stream(HLS_URL).unwrap();
    session.retry_stream().unwrap();
    session.play_stream("http://iptv.example/get.php?type=mpegts").unwrap();
    session.settled().await;

    assert_eq!(rig.max_live(), 1);
    assert!(rig.attached_kinds().len() >= 4);
    session.clear_stream();
    assert_eq!(rig.live(), 0);
    assert!(mount.is_empty());
}

#[tokio::test(start_paused = true)]
async fn clear_is_idempotent() {
    let rig = Rig::new();
    rig.set(BackendKind::Native, Behavior::SucceedAfter(ms(20)));
    let (session, mount) = session(&rig);

    session.play_stream(MP4_URL).unwrap();
    session.settled().await;

    session.clear_stream();
    let first = session.state();
    session.clear_stream();
    let second = session.state();

    assert_eq!(first, second);
    assert_eq!(first.phase, SequencerPhase::Idle);
    assert_eq!(first.current_url, None);
    assert!(!first.loading);
    assert!(mount.is_empty());
    assert_eq!(rig.live(), 0);
    assert_eq!(session.retry_stream(), Err(SessionError::NoActiveStream));
}

#[tokio::test(start_paused = true)]
async fn classified_backend_is_tried_first() {
    let rig = Rig::new();
    let (session, _mount) = session(&rig);

    session.play_stream(HLS_URL).unwrap();

    assert_eq!(rig.attached_kinds(), vec![BackendKind::SegmentedStreaming]);
    assert_eq!(session.state().attempting, Some(BackendKind::SegmentedStreaming));
}

#[tokio::test(start_paused = true)]
async fn successful_backend_is_preferred_next_time() {
    let rig = Rig::new();
    rig.set(BackendKind::Native, Behavior::FailAfter(ms(10)));
    rig.set(BackendKind::MuxedContainer, Behavior::SucceedAfter(ms(10)));
    let (session, _mount) = session(&rig);

    session.play_stream(MP4_URL).unwrap();
    let first = session.settled().await;
    assert_eq!(
        first.attempted_kinds(),
        vec![BackendKind::Native, BackendKind::MuxedContainer]
    );

    session.play_stream(MP4_URL).unwrap();
    let second = session.settled().await;
    assert_eq!(second.attempted_kinds(), vec![BackendKind::MuxedContainer]);
    assert_eq!(second.candidates[0], BackendKind::MuxedContainer);
    assert_eq!(second.candidates.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn remembered_backend_overrides_classification_for_other_urls() {
    let rig = Rig::new();
    rig.set(BackendKind::TransportStream, Behavior::SucceedAfter(ms(10)));
    let (session, _mount) = session(&rig);

    session.play_stream("http://iptv.example/live/a.ts").unwrap();
    session.settled().await;
    assert_eq!(session.state().last_successful_backend, Some(BackendKind::TransportStream));

    session.play_stream(HLS_URL).unwrap();
    let state = session.settled().await;
    assert_eq!(state.candidates[0], BackendKind::TransportStream);
    assert_eq!(state.attempted_kinds(), vec![BackendKind::TransportStream]);
}

#[tokio::test(start_paused = true)]
async fn all_backends_failing_exhausts_with_message() {
    let rig = Rig::new();
    rig.set_all(Behavior::FailAfter(ms(10)));
    let (session, _mount) = session(&rig);

    session.play_stream(HLS_URL).unwrap();
    let state = session.settled().await;

    assert_eq!(state.phase, SequencerPhase::ExhaustedFailed);
    assert_eq!(state.attempts.len(), 4);
    assert!(!state.loading);
    assert_eq!(state.current_backend, None);
    let message = state.error_message.unwrap();
    assert!(message.contains("Could not play stream"));
    assert!(message.contains("SegmentedStreaming"));
}

#[tokio::test(start_paused = true)]
async fn silent_backends_time_out_one_window_each() {
    let rig = Rig::new();
    let (session, _mount) = session(&rig);
    let start = tokio::time::Instant::now();

    session.play_stream(MP4_URL).unwrap();
    let state = session.settled().await;

    assert_eq!(state.phase, SequencerPhase::ExhaustedFailed);
    assert!(state
        .attempts
        .iter()
        .all(|a| a.outcome == AttemptOutcome::TimedOut));
    assert!(start.elapsed() >= Duration::from_secs(80));
    assert!(start.elapsed() < Duration::from_secs(81));
}

// ─── Detection ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn readiness_polling_detects_silent_playback() {
    let rig = Rig::new();
    rig.set(BackendKind::Native, Behavior::ReadyByPoll(ms(100)));
    let (session, _mount) = session(&rig);

    session.play_stream(MP4_URL).unwrap();
    let state = session.settled().await;

    assert_eq!(state.current_backend, Some(BackendKind::Native));
    assert_eq!(state.attempts[0].detail.as_deref(), Some("readiness poll"));
}

#[tokio::test(start_paused = true)]
async fn event_and_poll_racing_succeed_once() {
    let rig = Rig::new();
    // The playing event lands on the same instant as the first poll tick.
    rig.set(BackendKind::Native, Behavior::SucceedAfter(Duration::from_secs(1)));
    let (session, _mount) = session(&rig);

    session.play_stream(MP4_URL).unwrap();
    let state = session.settled().await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(session.state(), state);
    assert_eq!(state.attempts.len(), 1);
    assert_eq!(state.attempts[0].outcome, AttemptOutcome::Succeeded);
    let detail = state.attempts[0].detail.as_deref().unwrap();
    assert!(detail == "playing event" || detail == "readiness poll");
}

#[tokio::test(start_paused = true)]
async fn late_failure_of_previous_attempt_is_ignored() {
    let rig = Rig::new();
    rig.set(BackendKind::Native, Behavior::DetachedFailure(Duration::from_secs(25)));
    rig.set(BackendKind::MuxedContainer, Behavior::SucceedAfter(Duration::from_secs(10)));
    let (session, _mount) = session(&rig);

    session.play_stream(MP4_URL).unwrap();
    let state = session.settled().await;

    assert_eq!(state.current_backend, Some(BackendKind::MuxedContainer));
    assert_eq!(state.attempts[0].outcome, AttemptOutcome::TimedOut);
    assert_eq!(state.attempts[1].outcome, AttemptOutcome::Succeeded);
}

// ─── Session operations ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn retry_keeps_backend_memory_and_busts_cache() {
    let rig = Rig::new();
    rig.set(BackendKind::Native, Behavior::FailAfter(ms(10)));
    rig.set(BackendKind::MuxedContainer, Behavior::SucceedAfter(ms(10)));
    let (session, _mount) = session(&rig);

    session.play_stream(MP4_URL).unwrap();
    session.settled().await;
    session.retry_stream().unwrap();

    let state = session.state();
    assert!(!state.reconnecting);
    assert_eq!(state.candidates[0], BackendKind::MuxedContainer);
    let url = state.current_url.unwrap();
    assert!(url.starts_with("http://vod.example/movies/film.mp4?_="));
    assert_eq!(rig.attached_urls().last(), Some(&url));
}

#[tokio::test(start_paused = true)]
async fn empty_url_is_rejected() {
    let rig = Rig::new();
    let (session, _mount) = session(&rig);

    assert_eq!(session.play_stream("   "), Err(SessionError::EmptyUrl));
    assert_eq!(session.force_reconnect(), Err(SessionError::NoActiveStream));
    assert!(session.state().is_idle());
    assert!(rig.attached_kinds().is_empty());
}
