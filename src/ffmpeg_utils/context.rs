//! A thin wrapper over `ffmpeg::format::context::Input` used by the demuxer
//! façade and by tests that need to open a real media file.

use crate::error::{CodecError, PipelineError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::input;
use std::path::Path;

/// A minimally-wrapped input container, opened from a file path.
pub struct InputContext {
    inner: ffmpeg::format::context::Input,
    source_path: std::path::PathBuf,
}

impl InputContext {
    /// Open a media file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let inner = input(&path).map_err(|e| {
            PipelineError::Codec(CodecError::OpenInput(format!(
                "failed to open {:?}: {}",
                path, e
            )))
        })?;

        tracing::debug!(path = ?path, "opened input file");

        Ok(Self {
            inner,
            source_path: path.to_path_buf(),
        })
    }

    /// The path this context was opened from.
    pub fn source_path(&self) -> &std::path::Path {
        &self.source_path
    }

    /// Container duration in seconds, or `0.0` if unknown.
    pub fn duration(&self) -> f64 {
        self.inner.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64
    }

    /// Container-level bitrate in bits per second.
    pub fn bitrate(&self) -> u64 {
        self.inner.bit_rate() as u64
    }

    /// Number of streams in the container.
    pub fn num_streams(&self) -> usize {
        self.inner.streams().len()
    }

    /// Look up a stream by index.
    pub fn stream(&self, index: usize) -> Option<ffmpeg::Stream<'_>> {
        self.inner.streams().into_iter().nth(index)
    }

    /// Direct access to the underlying `ffmpeg-next` input context.
    pub fn inner(&self) -> &ffmpeg::format::context::Input {
        &self.inner
    }

    /// Mutable direct access, needed to read packets.
    pub fn inner_mut(&mut self) -> &mut ffmpeg::format::context::Input {
        &mut self.inner
    }

    /// Iterate over all streams.
    pub fn streams(&self) -> impl Iterator<Item = ffmpeg::Stream<'_>> + '_ {
        self.inner.streams().into_iter()
    }

    /// Index of FFmpeg's best-scoring video stream, if any.
    pub fn best_video_stream(&self) -> Option<usize> {
        self.inner
            .streams()
            .best(ffmpeg::media::Type::Video)
            .map(|s| s.index())
    }

    /// Index of FFmpeg's best-scoring audio stream, if any.
    pub fn best_audio_stream(&self) -> Option<usize> {
        self.inner
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .map(|s| s.index())
    }
}
