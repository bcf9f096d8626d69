//! M3U8 playlist parsing for the segmented backend.

use std::collections::HashMap;
use std::time::Duration;

/// Fallback when `#EXT-X-TARGETDURATION` is missing or unusable.
const DEFAULT_TARGET_DURATION: f64 = 10.0;

/// Bounds on how often a live playlist is refetched.
const MIN_REFRESH_SECS: f64 = 0.5;
const MAX_REFRESH_SECS: f64 = 30.0;

/// One rendition listed in a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub bandwidth: u64,
    pub height: u32,
    pub codecs: Option<String>,
    pub uri: String,
}

/// A media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub segments: Vec<Segment>,
    /// No `#EXT-X-ENDLIST` yet, so the playlist must be refreshed.
    pub is_live: bool,
    pub target_duration: f64,
    pub media_sequence: u64,
    /// fMP4 initialization section from `#EXT-X-MAP`.
    pub init_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub sequence: u64,
    pub duration: f64,
    pub uri: String,
}

/// True when `content` lists variants rather than segments.
pub fn is_master(content: &str) -> bool {
    content.contains("#EXT-X-STREAM-INF:")
}

/// True when `content` starts like an M3U8 document.
pub fn looks_like_playlist(content: &str) -> bool {
    content
        .trim_start_matches('\u{feff}')
        .trim_start()
        .starts_with("#EXTM3U")
}

/// Variants of a master playlist, best bandwidth first.
pub fn parse_master(content: &str, playlist_url: &str) -> Vec<Variant> {
    let base = base_url(playlist_url);
    let mut variants = Vec::new();
    let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());

    while let Some(line) = lines.next() {
        let Some(rest) = line.strip_prefix("#EXT-X-STREAM-INF:") else {
            continue;
        };
        let attrs = parse_attributes(rest);
        let Some(uri_line) = lines.next().filter(|l| !l.starts_with('#')) else {
            continue;
        };
        let height = attrs
            .get("RESOLUTION")
            .and_then(|r| r.split('x').nth(1))
            .and_then(|h| h.parse().ok())
            .unwrap_or(0);

        variants.push(Variant {
            bandwidth: attrs
                .get("BANDWIDTH")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            height,
            codecs: attrs.get("CODECS").cloned(),
            uri: resolve_url(base, uri_line),
        });
    }

    variants.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));
    variants
}

/// Segments of a media playlist, numbered from `#EXT-X-MEDIA-SEQUENCE`.
pub fn parse_media(content: &str, playlist_url: &str) -> MediaPlaylist {
    let base = base_url(playlist_url);
    let mut segments = Vec::new();
    let mut is_live = true;
    let mut media_sequence = 0u64;
    let mut target_duration = DEFAULT_TARGET_DURATION;
    let mut current_duration = None;
    let mut init_uri = None;

    for line in content.lines().map(str::trim) {
        if line.starts_with("#EXT-X-ENDLIST") {
            is_live = false;
        } else if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            media_sequence = rest.parse().unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            target_duration = rest
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite() && *d > 0.0)
                .unwrap_or(DEFAULT_TARGET_DURATION);
        } else if let Some(rest) = line.strip_prefix("#EXT-X-MAP:") {
            init_uri = parse_attributes(rest)
                .get("URI")
                .map(|uri| resolve_url(base, uri));
        } else if let Some(rest) = line.strip_prefix("#EXTINF:") {
            current_duration = rest.split(',').next().and_then(|d| d.parse().ok());
        } else if !line.starts_with('#') && !line.is_empty() {
            segments.push(Segment {
                sequence: media_sequence + segments.len() as u64,
                duration: current_duration.take().unwrap_or(target_duration),
                uri: resolve_url(base, line),
            });
        }
    }

    MediaPlaylist {
        segments,
        is_live,
        target_duration,
        media_sequence,
        init_uri,
    }
}

impl MediaPlaylist {
    /// Delay before a live playlist is fetched again: half the target
    /// duration, kept within half a second and thirty seconds.
    pub fn refresh_interval(&self) -> Duration {
        let half = self.target_duration / 2.0;
        let secs = if half.is_finite() {
            half.clamp(MIN_REFRESH_SECS, MAX_REFRESH_SECS)
        } else {
            MAX_REFRESH_SECS
        };
        Duration::from_secs_f64(secs)
    }

    /// Sequence number of the newest listed segment.
    pub fn last_sequence(&self) -> Option<u64> {
        self.segments.last().map(|s| s.sequence)
    }
}

/// Parse an attribute list such as `BANDWIDTH=1280000,CODECS="a,b"`.
pub fn parse_attributes(attr_str: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut chars = attr_str.chars().peekable();

    while chars.peek().is_some() {
        let key: String = chars.by_ref().take_while(|&c| c != '=').collect();
        if key.trim().is_empty() {
            break;
        }

        let value = if chars.peek() == Some(&'"') {
            chars.next();
            let v: String = chars.by_ref().take_while(|&c| c != '"').collect();
            // Trailing comma.
            chars.next();
            v
        } else {
            chars.by_ref().take_while(|&c| c != ',').collect()
        };

        attrs.insert(key.trim().to_string(), value.trim().to_string());
    }

    attrs
}

/// Resolve a playlist entry against the playlist's directory URL.
pub fn resolve_url(base: &str, relative: &str) -> String {
    if relative.starts_with("http://") || relative.starts_with("https://") {
        return relative.to_string();
    }
    if let Ok(joined) = url::Url::parse(&format!("{base}/")).and_then(|b| b.join(relative)) {
        return joined.to_string();
    }
    if relative.starts_with('/') {
        match base.find("://") {
            Some(idx) => match base[idx + 3..].find('/') {
                Some(end) => format!("{}{relative}", &base[..idx + 3 + end]),
                None => format!("{base}{relative}"),
            },
            None => relative.to_string(),
        }
    } else {
        format!("{base}/{relative}")
    }
}

/// The playlist URL without its last path component (and without a query).
fn base_url(playlist_url: &str) -> &str {
    let without_query = playlist_url.split('?').next().unwrap_or(playlist_url);
    without_query
        .rsplit_once('/')
        .map_or("", |(base, _)| base)
}
