//! Per-stream bookkeeping the muxer core keeps alongside the underlying
//! `ffmpeg_next` output stream.

use ffmpeg_next as ffmpeg;

/// One stream attached to a [`crate::mux::muxer::Muxer`].
///
/// Tracks the state needed for timestamp-fixup and streamcopy filtering that
/// `ffmpeg-next`'s own `StreamMut` doesn't carry: the last written DTS (for
/// monotonic-DTS enforcement), whether the first keyframe has been seen yet
/// (for streamcopy's initial-nonkeyframe drop), and the stream's start-time
/// offset.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    /// Index of this stream in the muxer's output container.
    pub output_index: usize,
    /// Index of the corresponding input stream, if this stream was added
    /// from a demuxed source rather than an encoder.
    pub input_index: Option<usize>,
    pub medium: ffmpeg::media::Type,
    pub time_base: ffmpeg::Rational,
    /// Set once a keyframe has been observed on a streamcopy'd video stream;
    /// packets before this point are dropped (spec's "initial-nonkeyframe
    /// drop").
    pub seen_keyframe: bool,
    /// Last DTS written to this stream, used to repair a DTS <= previous DTS
    /// or a DTS > PTS condition on the next packet.
    pub last_mux_dts: Option<i64>,
    /// First packet's PTS in this stream's time base, used as the
    /// start-time offset when `copy_prior_start` is `false`.
    pub start_offset: Option<i64>,
    /// Whether this stream is disabled after signature debug-logging an
    /// unrepairable timestamp anomaly, purely a one-shot-log guard.
    pub logged_dts_fallback: bool,
    /// Carry variable for `rescale_delta`-based audio stream-copy timestamp
    /// rescaling (spec's `ts_rescale_delta_last`). `i64::MIN` means "no
    /// prior carry", matching FFmpeg's `AV_NOPTS_VALUE` sentinel.
    pub ts_rescale_delta_last: i64,
}

impl StreamDescriptor {
    pub fn new(
        output_index: usize,
        input_index: Option<usize>,
        medium: ffmpeg::media::Type,
        time_base: ffmpeg::Rational,
    ) -> Self {
        Self {
            output_index,
            input_index,
            medium,
            time_base,
            seen_keyframe: false,
            last_mux_dts: None,
            start_offset: None,
            logged_dts_fallback: false,
            ts_rescale_delta_last: i64::MIN,
        }
    }
}
