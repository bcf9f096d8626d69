//! URL heuristics for picking a backend order.
//!
//! The classifier only biases the trial order: a wrong guess costs one extra
//! attempt, never correctness. Matching is a case-insensitive substring test
//! and the first rule that matches wins.

use serde::Serialize;
use tracing::debug;

use super::backend::BackendKind;

/// What the URL looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamHint {
    Hls,
    MpegTs,
    Mp4,
    Rtmp,
    /// Nothing matched; treated as an IPTV-style progressive stream.
    Unknown,
}

/// Classifier result: the hint plus the ordered candidate backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub hint: StreamHint,
    pub candidates: [BackendKind; 4],
}

const HLS_CHAIN: [BackendKind; 4] = [
    BackendKind::SegmentedStreaming,
    BackendKind::MuxedContainer,
    BackendKind::TransportStream,
    BackendKind::Native,
];

const MPEGTS_CHAIN: [BackendKind; 4] = [
    BackendKind::TransportStream,
    BackendKind::MuxedContainer,
    BackendKind::SegmentedStreaming,
    BackendKind::Native,
];

const DEFAULT_CHAIN: [BackendKind; 4] = [
    BackendKind::Native,
    BackendKind::MuxedContainer,
    BackendKind::SegmentedStreaming,
    BackendKind::TransportStream,
];

impl StreamHint {
    /// Detect the hint for `url`.
    pub fn detect(url: &str) -> Self {
        let lower = url.to_lowercase();
        if lower.contains(".m3u8") || lower.contains("playlist.m3u") {
            Self::Hls
        } else if lower.contains(".ts") || lower.contains("mpeg") {
            Self::MpegTs
        } else if lower.contains(".mp4") {
            Self::Mp4
        } else if lower.contains("rtmp://") {
            Self::Rtmp
        } else {
            Self::Unknown
        }
    }

    /// Candidate order for this hint.
    pub fn chain(self) -> [BackendKind; 4] {
        match self {
            Self::Hls => HLS_CHAIN,
            Self::MpegTs => MPEGTS_CHAIN,
            // Browsers cannot decode RTMP; the default chain will surface that.
            Self::Mp4 | Self::Rtmp | Self::Unknown => DEFAULT_CHAIN,
        }
    }
}

/// Classify `url` into an ordered candidate list.
pub fn classify(url: &str) -> Classification {
    let hint = StreamHint::detect(url);
    if hint == StreamHint::Unknown {
        debug!(url, "no format hint in URL, using default chain");
    }
    Classification {
        hint,
        candidates: hint.chain(),
    }
}

/// Candidate order for `url`, with `preferred` (the last backend that
/// worked in this session) moved to the front.
pub fn candidate_order(url: &str, preferred: Option<BackendKind>) -> Vec<BackendKind> {
    let mut candidates = classify(url).candidates.to_vec();
    if let Some(kind) = preferred {
        candidates.retain(|k| *k != kind);
        candidates.insert(0, kind);
    }
    candidates
}
