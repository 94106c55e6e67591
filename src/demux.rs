//! The demuxer façade (C8): consumed by the scheduler, not reimplemented.
//!
//! `ffmpeg_next::format::context::Input` already does the real work; this
//! module only adds the `Demuxer` trait the scheduler is written against
//! (per-label stream lookup, a packet stream that yields a terminal `None`
//! exactly once) and one concrete, thin wrapper over it — the same shape as
//! the teacher's own `AudioDecoder`/`AacEncoder` wrappers rather than a
//! parallel abstraction layer.

use std::path::Path;

use ffmpeg_next as ffmpeg;

use crate::error::Result;
use crate::ffmpeg_utils::context::InputContext;

/// A source of demultiplexed packets, addressable by stream index.
///
/// Implementations must yield `Ok(None)` exactly once to signal end of
/// stream for a given `packets`/`packets_for` sequence; further calls after
/// that are not required to return again.
pub trait Demuxer {
    /// Read the next packet from any stream, or `None` at end of file.
    fn next_packet(&mut self) -> Result<Option<(usize, ffmpeg::codec::packet::Packet)>>;

    /// Read the next packet belonging to `stream_index`, skipping packets
    /// from any other stream, or `None` once that stream (and the whole
    /// demuxer) is exhausted.
    fn next_packet_for(&mut self, stream_index: usize) -> Result<Option<ffmpeg::codec::packet::Packet>> {
        loop {
            match self.next_packet()? {
                Some((index, packet)) if index == stream_index => return Ok(Some(packet)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    fn num_streams(&self) -> usize;

    /// Index of the best video stream, if any.
    fn video(&self) -> Option<usize>;

    /// Index of the best audio stream, if any.
    fn audio(&self) -> Option<usize>;

    fn stream_time_base(&self, index: usize) -> Option<ffmpeg::Rational>;

    fn stream_parameters(&self, index: usize) -> Option<ffmpeg::codec::Parameters>;
}

/// A `Demuxer` backed by an `ffmpeg_next` file input.
pub struct FileDemuxer {
    input: InputContext,
    video_index: Option<usize>,
    audio_index: Option<usize>,
}

impl FileDemuxer {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let input = InputContext::open(path)?;
        let video_index = input.best_video_stream();
        let audio_index = input.best_audio_stream();
        Ok(Self {
            input,
            video_index,
            audio_index,
        })
    }

    /// Access the underlying format context, for container-metadata copy
    /// into a muxer.
    pub fn format_context(&self) -> &ffmpeg::format::context::Input {
        self.input.inner()
    }
}

impl Demuxer for FileDemuxer {
    fn next_packet(&mut self) -> Result<Option<(usize, ffmpeg::codec::packet::Packet)>> {
        match self.input.inner_mut().packets().next() {
            Some((stream, packet)) => Ok(Some((stream.index(), packet))),
            None => Ok(None),
        }
    }

    fn num_streams(&self) -> usize {
        self.input.num_streams()
    }

    fn video(&self) -> Option<usize> {
        self.video_index
    }

    fn audio(&self) -> Option<usize> {
        self.audio_index
    }

    fn stream_time_base(&self, index: usize) -> Option<ffmpeg::Rational> {
        self.input.stream(index).map(|s| s.time_base())
    }

    fn stream_parameters(&self, index: usize) -> Option<ffmpeg::codec::Parameters> {
        self.input.stream(index).map(|s| s.parameters())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_surfaces_a_codec_error_for_a_missing_file() {
        use crate::error::{CodecError, PipelineError};
        ffmpeg::init().ok();
        let err = FileDemuxer::open("/nonexistent/path/does-not-exist.mp4").unwrap_err();
        assert!(matches!(err, PipelineError::Codec(CodecError::OpenInput(_))));
    }
}
