//! Small rational/timestamp and codec-identity helpers shared across the
//! muxer, codec adapters, and filter graphs.

use ffmpeg_next as ffmpeg;

/// Convert a timestamp from one timebase to another via `av_rescale_q`.
///
/// This is the single place packet/frame timestamps cross a timebase
/// boundary — every other module calls through here rather than reaching
/// for `av_rescale_q` directly.
pub fn rescale_ts(ts: i64, from: ffmpeg::Rational, to: ffmpeg::Rational) -> i64 {
    // SAFETY: `av_rescale_q` takes plain `AVRational` values by copy; there is
    // no pointer or lifetime to uphold.
    unsafe { ffmpeg::ffi::av_rescale_q(ts, from.into(), to.into()) }
}

/// Rescale `in_ts` from `in_tb` to `out_tb` through a sample-rate-native
/// intermediate timebase `fs_tb`, carrying sub-unit rounding error across
/// calls in `*carry` (`av_rescale_delta`). Used for audio stream-copy, where
/// repeated independent `rescale_ts` calls on a DTS stream with a duration
/// that doesn't divide evenly into the output timebase accumulate drift.
///
/// `carry` should start at `i64::MIN` (FFmpeg's `AV_NOPTS_VALUE`) to signal
/// "no prior carry" on the first call for a stream.
pub fn rescale_delta(
    in_tb: ffmpeg::Rational,
    in_ts: i64,
    fs_tb: ffmpeg::Rational,
    duration: i32,
    carry: &mut i64,
    out_tb: ffmpeg::Rational,
) -> i64 {
    // SAFETY: `av_rescale_delta` takes all `AVRational`/`int64_t` arguments
    // by value except `carry`, a plain `*mut int64_t` scratch slot that it
    // reads and updates in place; `carry` is a valid, uniquely-borrowed i64
    // for the duration of this call.
    unsafe {
        ffmpeg::ffi::av_rescale_delta(
            in_tb.into(),
            in_ts,
            fs_tb.into(),
            duration,
            carry as *mut i64,
            out_tb.into(),
        )
    }
}

/// Get the codec name for a codec ID.
#[allow(dead_code)]
pub fn codec_name(codec_id: ffmpeg::codec::Id) -> &'static str {
    codec_id.name()
}

/// Get the media type name.
#[allow(dead_code)]
pub fn media_type_name(media_type: ffmpeg::media::Type) -> &'static str {
    match media_type {
        ffmpeg::media::Type::Video => "video",
        ffmpeg::media::Type::Audio => "audio",
        ffmpeg::media::Type::Subtitle => "subtitle",
        ffmpeg::media::Type::Data => "data",
        ffmpeg::media::Type::Attachment => "attachment",
        _ => "unknown",
    }
}

/// Extract language from stream metadata.
#[allow(dead_code)]
pub fn get_stream_language(stream: &ffmpeg::Stream) -> Option<String> {
    stream.metadata().get("language").map(|s| s.to_string())
}

/// Get the title from stream metadata.
#[allow(dead_code)]
pub fn get_stream_title(stream: &ffmpeg::Stream) -> Option<String> {
    stream.metadata().get("title").map(|s| s.to_string())
}

/// Check if a codec ID is one of the common video codecs.
pub fn is_video_codec(codec_id: ffmpeg::codec::Id) -> bool {
    matches!(
        codec_id,
        ffmpeg::codec::Id::H264
            | ffmpeg::codec::Id::HEVC
            | ffmpeg::codec::Id::VP9
            | ffmpeg::codec::Id::AV1
            | ffmpeg::codec::Id::MPEG4
            | ffmpeg::codec::Id::MPEG2VIDEO
            | ffmpeg::codec::Id::VP8
    )
}

/// Check if a codec ID is one of the common audio codecs.
pub fn is_audio_codec(codec_id: ffmpeg::codec::Id) -> bool {
    matches!(
        codec_id,
        ffmpeg::codec::Id::AAC
            | ffmpeg::codec::Id::AC3
            | ffmpeg::codec::Id::EAC3
            | ffmpeg::codec::Id::OPUS
            | ffmpeg::codec::Id::VORBIS
            | ffmpeg::codec::Id::MP3
            | ffmpeg::codec::Id::FLAC
            | ffmpeg::codec::Id::PCM_S16LE
            | ffmpeg::codec::Id::PCM_S24LE
            | ffmpeg::codec::Id::TRUEHD
    )
}

/// Log a one-line summary of a stream at debug level.
pub fn debug_stream_info(stream: &ffmpeg::Stream, index: usize) {
    let codec_id = stream.parameters().id();
    let media_type = stream.parameters().medium();

    tracing::debug!(
        index,
        media_type = media_type_name(media_type),
        codec = codec_name(codec_id),
        "stream"
    );

    if let Some(lang) = get_stream_language(stream) {
        tracing::debug!(index, language = %lang, "stream language");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_video_codecs() {
        assert!(is_video_codec(ffmpeg::codec::Id::H264));
        assert!(is_video_codec(ffmpeg::codec::Id::HEVC));
        assert!(!is_video_codec(ffmpeg::codec::Id::AAC));
    }

    #[test]
    fn recognizes_audio_codecs() {
        assert!(is_audio_codec(ffmpeg::codec::Id::AAC));
        assert!(is_audio_codec(ffmpeg::codec::Id::AC3));
        assert!(!is_audio_codec(ffmpeg::codec::Id::H264));
    }

    #[test]
    fn rescales_timestamps() {
        let from = ffmpeg::Rational(1, 1000);
        let to = ffmpeg::Rational(1, 48000);
        assert_eq!(rescale_ts(1, from, to), 48);
    }

    #[test]
    fn rescale_delta_matches_plain_rescale_on_first_call() {
        let in_tb = ffmpeg::Rational(1, 1000);
        let fs_tb = ffmpeg::Rational(1, 48000);
        let out_tb = ffmpeg::Rational(1, 48000);
        let mut carry = i64::MIN;
        let got = rescale_delta(in_tb, 100, fs_tb, 1024, &mut carry, out_tb);
        assert_eq!(got, rescale_ts(100, in_tb, out_tb));
        assert_ne!(carry, i64::MIN);
    }

    #[test]
    fn rescale_delta_advances_carry_by_duration() {
        let in_tb = ffmpeg::Rational(1, 1000);
        let fs_tb = ffmpeg::Rational(1, 48000);
        let out_tb = ffmpeg::Rational(1, 48000);
        let mut carry = i64::MIN;
        rescale_delta(in_tb, 0, fs_tb, 1024, &mut carry, out_tb);
        let first_carry = carry;
        rescale_delta(in_tb, 1024 * 1000 / 48000, fs_tb, 1024, &mut carry, out_tb);
        assert_eq!(carry, first_carry + 1024);
    }
}
