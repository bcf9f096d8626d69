//! Container detection from the first bytes of a response.

/// MPEG-TS packet size.
pub const TS_PACKET_LEN: usize = 188;

const TS_SYNC: u8 = 0x47;

/// Container family recognised from a stream prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
    /// WebM or Matroska (EBML header).
    WebM,
    Ogg,
    Mp3,
    MpegTs,
    Flv,
    /// Text playlist (`#EXTM3U`).
    Playlist,
    Html,
    Unknown,
}

impl Container {
    /// Sniff the container from `data`, the first bytes of a stream.
    pub fn sniff(data: &[u8]) -> Self {
        let trimmed = trim_leading_whitespace(data);

        if data.len() >= 8 && matches!(&data[4..8], b"ftyp" | b"moov" | b"styp" | b"moof") {
            Self::Mp4
        } else if data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
            Self::WebM
        } else if data.starts_with(b"OggS") {
            Self::Ogg
        } else if data.starts_with(b"FLV") {
            Self::Flv
        } else if ts_sync_offset(data).is_some() {
            Self::MpegTs
        } else if data.starts_with(b"ID3") || is_mpeg_audio_frame(data) {
            Self::Mp3
        } else if trimmed.starts_with(b"#EXTM3U") {
            Self::Playlist
        } else if starts_with_ignore_case(trimmed, b"<!doctype html")
            || starts_with_ignore_case(trimmed, b"<html")
        {
            Self::Html
        } else {
            Self::Unknown
        }
    }

    /// Containers a browser plays without a helper engine.
    pub fn is_native_playable(self) -> bool {
        matches!(self, Self::Mp4 | Self::WebM | Self::Ogg | Self::Mp3)
    }

    /// Containers a transport-stream demuxer accepts.
    pub fn is_transport(self) -> bool {
        matches!(self, Self::MpegTs | Self::Flv)
    }
}

/// Offset of the first TS packet, if `data` shows the sync byte repeated at
/// a 188-byte stride. With less than two packets of data, a single sync byte
/// at offset zero is accepted.
pub fn ts_sync_offset(data: &[u8]) -> Option<usize> {
    if data.len() < TS_PACKET_LEN * 2 {
        return (data.len() >= 4 && data[0] == TS_SYNC).then_some(0);
    }
    (0..TS_PACKET_LEN).find(|&offset| {
        let mut packets = 0;
        let mut pos = offset;
        while pos < data.len() {
            if data[pos] != TS_SYNC {
                return false;
            }
            packets += 1;
            pos += TS_PACKET_LEN;
        }
        packets >= 2
    })
}

fn is_mpeg_audio_frame(data: &[u8]) -> bool {
    // 11-bit frame sync, layer bits not reserved.
    data.len() >= 2 && data[0] == 0xFF && data[1] & 0xE0 == 0xE0 && data[1] & 0x06 != 0
}

fn trim_leading_whitespace(data: &[u8]) -> &[u8] {
    // Strip a UTF-8 BOM as well.
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    &data[start..]
}

fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts_packets(count: usize) -> Vec<u8> {
        let mut data = vec![0u8; TS_PACKET_LEN * count];
        for i in 0..count {
            data[i * TS_PACKET_LEN] = TS_SYNC;
        }
        data
    }

    #[test]
    fn test_sniff_mp4() {
        let data = b"\x00\x00\x00\x20ftypisom\x00\x00\x02\x00";
        assert_eq!(Container::sniff(data), Container::Mp4);
        assert!(Container::Mp4.is_native_playable());
    }

    #[test]
    fn test_sniff_webm_ogg_flv() {
        assert_eq!(Container::sniff(&[0x1A, 0x45, 0xDF, 0xA3, 0x01]), Container::WebM);
        assert_eq!(Container::sniff(b"OggS\x00\x02"), Container::Ogg);
        assert_eq!(Container::sniff(b"FLV\x01\x05"), Container::Flv);
        assert!(Container::Flv.is_transport());
    }

    #[test]
    fn test_sniff_transport_stream() {
        assert_eq!(Container::sniff(&ts_packets(3)), Container::MpegTs);
        assert!(!Container::MpegTs.is_native_playable());
    }

    #[test]
    fn test_ts_sync_offset_after_garbage() {
        let mut data = vec![0u8; 5];
        data.extend(ts_packets(3));
        assert_eq!(ts_sync_offset(&data), Some(5));
    }

    #[test]
    fn test_broken_stride_is_not_ts() {
        let mut data = ts_packets(3);
        data[TS_PACKET_LEN * 2] = 0;
        assert_eq!(ts_sync_offset(&data), None);
    }

    #[test]
    fn test_sniff_playlist_and_html() {
        assert_eq!(Container::sniff(b"\n#EXTM3U\n#EXT-X-VERSION:3"), Container::Playlist);
        assert_eq!(Container::sniff(b"<!DOCTYPE html><html>"), Container::Html);
        assert_eq!(Container::sniff(b"  <html lang=en>"), Container::Html);
    }

    #[test]
    fn test_sniff_mp3() {
        assert_eq!(Container::sniff(b"ID3\x04\x00"), Container::Mp3);
        assert_eq!(Container::sniff(&[0xFF, 0xFB, 0x90, 0x64]), Container::Mp3);
    }

    #[test]
    fn test_sniff_unknown() {
        assert_eq!(Container::sniff(b"hello world"), Container::Unknown);
        assert_eq!(Container::sniff(b""), Container::Unknown);
    }
}
