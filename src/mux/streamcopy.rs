//! Streamcopy filter: the container-level fixups applied to a packet that is
//! passed through without decode/re-encode, before it is ever queued.
//!
//! Applied in order: (1) drop non-keyframes preceding the first keyframe,
//! unless configured otherwise; (2) drop packets before the configured
//! copy-start timestamp, unless configured otherwise; (3) subtract a global
//! start-time offset from PTS/DTS.

use ffmpeg_next as ffmpeg;

use crate::mux::stream::StreamDescriptor;

/// Per-stream streamcopy configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamcopyOptions {
    /// Keep non-keyframes that precede the first keyframe instead of
    /// dropping them.
    pub copy_initial_nonkeyframes: bool,
    /// Keep packets before the configured copy-start timestamp instead of
    /// dropping them.
    ///
    /// The original source models `copy_prior_start` as a tri-state
    /// (unset/0/-1); this crate collapses it to a `bool` since only the
    /// "true takes effect" behavior is documented and a flag with one
    /// observable effect is better expressed as one.
    pub copy_prior_start: bool,
    /// DTS (in the stream's time base) before which packets are dropped,
    /// unless `copy_prior_start` is set.
    pub copy_start_ts: i64,
}

impl Default for StreamcopyOptions {
    fn default() -> Self {
        Self {
            copy_initial_nonkeyframes: false,
            copy_prior_start: false,
            copy_start_ts: 0,
        }
    }
}

/// Outcome of passing a packet through the streamcopy filter.
pub enum StreamcopyDecision {
    /// The packet is kept, with its timestamps adjusted in place.
    Keep,
    /// The packet is dropped and should be freed by the caller.
    Drop,
}

/// Apply the streamcopy filter to `packet` in place.
///
/// `is_audio` selects the audio-specific PTS override in step 3. Marks
/// `stream.seen_keyframe`/`stream.start_offset` as a side effect so
/// subsequent calls see the state this call established.
pub fn apply(
    packet: &mut ffmpeg::codec::packet::Packet,
    stream: &mut StreamDescriptor,
    options: &StreamcopyOptions,
    is_audio: bool,
) -> StreamcopyDecision {
    // Step 1: drop non-keyframes preceding the first keyframe.
    if !stream.seen_keyframe {
        if packet.is_key() {
            stream.seen_keyframe = true;
        } else if !options.copy_initial_nonkeyframes {
            return StreamcopyDecision::Drop;
        }
    }

    // Step 2: drop packets before the configured copy-start timestamp.
    if !options.copy_prior_start {
        let dts = packet.dts().or_else(|| packet.pts());
        if let Some(dts) = dts {
            if dts < options.copy_start_ts {
                return StreamcopyDecision::Drop;
            }
        }
    }

    // Step 3: subtract the stream's start-time offset from PTS/DTS.
    let offset = *stream.start_offset.get_or_insert_with(|| {
        packet.pts().or_else(|| packet.dts()).unwrap_or(0)
    });

    let mut dts = packet.dts();
    let pts = packet.pts().map(|pts| pts - offset);

    if dts.is_none() {
        dts = pts;
    } else {
        dts = dts.map(|dts| dts - offset);
    }

    if is_audio {
        if let (Some(pts), Some(dts)) = (pts, dts) {
            // Audio streamcopy overrides PTS to track DTS exactly.
            packet.set_pts(Some(dts));
            let _ = pts;
        }
    } else {
        packet.set_pts(pts);
    }
    packet.set_dts(dts);

    StreamcopyDecision::Keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> StreamDescriptor {
        StreamDescriptor::new(0, Some(0), ffmpeg::media::Type::Video, ffmpeg::Rational::new(1, 90_000))
    }

    fn keyframe_packet(pts: i64) -> ffmpeg::codec::packet::Packet {
        let mut p = ffmpeg::codec::packet::Packet::empty();
        p.set_pts(Some(pts));
        p.set_dts(Some(pts));
        p.set_flags(ffmpeg::codec::packet::Flags::KEY);
        p
    }

    fn nonkey_packet(pts: i64) -> ffmpeg::codec::packet::Packet {
        let mut p = ffmpeg::codec::packet::Packet::empty();
        p.set_pts(Some(pts));
        p.set_dts(Some(pts));
        p
    }

    #[test]
    fn drops_nonkeyframes_before_first_keyframe() {
        let mut s = stream();
        let opts = StreamcopyOptions::default();
        let mut p = nonkey_packet(0);
        assert!(matches!(apply(&mut p, &mut s, &opts, false), StreamcopyDecision::Drop));
        assert!(!s.seen_keyframe);
    }

    #[test]
    fn keeps_and_marks_first_keyframe() {
        let mut s = stream();
        let opts = StreamcopyOptions::default();
        let mut p = keyframe_packet(100);
        assert!(matches!(apply(&mut p, &mut s, &opts, false), StreamcopyDecision::Keep));
        assert!(s.seen_keyframe);
        assert_eq!(p.pts(), Some(0));
    }

    #[test]
    fn applies_start_offset_to_subsequent_packets() {
        let mut s = stream();
        let opts = StreamcopyOptions::default();
        let mut first = keyframe_packet(1000);
        apply(&mut first, &mut s, &opts, false);
        assert_eq!(first.pts(), Some(0));

        let mut second = nonkey_packet(1500);
        apply(&mut second, &mut s, &opts, false);
        assert_eq!(second.pts(), Some(500));
    }

    #[test]
    fn drops_packets_before_copy_start_ts() {
        let mut s = stream();
        let opts = StreamcopyOptions {
            copy_start_ts: 500,
            ..StreamcopyOptions::default()
        };
        let mut p = keyframe_packet(100);
        assert!(matches!(apply(&mut p, &mut s, &opts, false), StreamcopyDecision::Drop));
    }
}
