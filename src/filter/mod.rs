//! Filter graphs: lazy construction over `ffmpeg_next::filter::Graph`, wired
//! from a libavfilter graph-description string once the first frame's
//! parameters are known.

pub mod complex;
pub mod graph;

use ffmpeg_next as ffmpeg;

/// What to do when a later frame's format/dimensions/rate/layout differs
/// from the frame the graph was built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterChangePolicy {
    /// Silently drop frames whose parameters changed.
    DropChanged,
    /// Return an error ([`crate::error::CodecError::ParameterChange`]).
    Fail,
    /// Tear down and rebuild the graph against the new parameters.
    Reinit,
}

/// The parameters a filter graph was built against, used to detect drift in
/// later frames under [`ParameterChangePolicy`].
#[derive(Debug, Clone, PartialEq)]
pub enum InputParams {
    Audio {
        format: ffmpeg::util::format::sample::Sample,
        rate: u32,
        channel_layout: ffmpeg::util::channel_layout::ChannelLayout,
    },
    Video {
        format: ffmpeg::util::format::pixel::Pixel,
        width: u32,
        height: u32,
    },
}

impl InputParams {
    pub fn of_audio_frame(frame: &ffmpeg::util::frame::Audio) -> Self {
        InputParams::Audio {
            format: frame.format(),
            rate: frame.rate(),
            channel_layout: frame.channel_layout(),
        }
    }

    pub fn of_video_frame(frame: &ffmpeg::util::frame::Video) -> Self {
        InputParams::Video {
            format: frame.format(),
            width: frame.width(),
            height: frame.height(),
        }
    }
}

/// The state of one named graph input or output buffer.
#[derive(Debug, Clone)]
pub struct FilterInputState {
    pub label: String,
    pub params: Option<InputParams>,
}

#[derive(Debug, Clone)]
pub struct FilterOutputState {
    pub label: String,
    pub params: Option<InputParams>,
}
