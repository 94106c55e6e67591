//! Decoder adapters wrapping `ffmpeg::decoder::{Audio,Video}`.

use ffmpeg_next as ffmpeg;

use crate::codec::{CodecStatus, SendReceive};
use crate::error::{CodecError, PipelineError, Result};

/// A decoder for one stream, audio or video.
///
/// Constructed directly from a demuxed stream's codec parameters — no
/// separate configuration step is needed since the container already
/// describes the codec.
pub enum Decoder {
    Audio(AudioDecoder),
    Video(VideoDecoder),
}

impl Decoder {
    /// Open a decoder matching `stream`'s codec parameters.
    pub fn open(stream: &ffmpeg::format::stream::Stream) -> Result<Self> {
        match stream.parameters().medium() {
            ffmpeg::media::Type::Audio => Ok(Decoder::Audio(AudioDecoder::open(stream)?)),
            ffmpeg::media::Type::Video => Ok(Decoder::Video(VideoDecoder::open(stream)?)),
            other => Err(PipelineError::Codec(CodecError::DecoderNotFound(format!(
                "no decoder adapter for media type {:?}",
                other
            )))),
        }
    }

    /// The source stream index this decoder was opened for.
    pub fn stream_index(&self) -> usize {
        match self {
            Decoder::Audio(d) => d.stream_index,
            Decoder::Video(d) => d.stream_index,
        }
    }
}

/// Decoder for a single audio stream.
///
/// `send_packet` treats `AVERROR_INVALIDDATA` as non-fatal: some decoders
/// (Opus in particular) raise it for pre-roll packets produced by a seek
/// that lands before the nearest keyframe, and dropping the packet is the
/// correct recovery.
pub struct AudioDecoder {
    decoder: ffmpeg::decoder::Audio,
    stream_index: usize,
}

impl AudioDecoder {
    pub fn open(stream: &ffmpeg::format::stream::Stream) -> Result<Self> {
        let stream_index = stream.index();
        let context = ffmpeg::codec::Context::from_parameters(stream.parameters()).map_err(
            |e| {
                PipelineError::Codec(CodecError::DecoderCreate(format!(
                    "failed to create codec context for stream {}: {}",
                    stream_index, e
                )))
            },
        )?;

        let decoder = context.decoder().audio().map_err(|e| {
            PipelineError::Codec(CodecError::DecoderCreate(format!(
                "failed to open audio decoder for stream {}: {}",
                stream_index, e
            )))
        })?;

        Ok(Self {
            decoder,
            stream_index,
        })
    }

    pub fn send_packet(&mut self, packet: &ffmpeg::codec::packet::Packet) -> Result<()> {
        match self.decoder.send_packet(packet) {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::InvalidData) => {
                tracing::debug!(
                    stream_index = self.stream_index,
                    "dropping invalid/pre-roll packet"
                );
                Ok(())
            }
            Err(e) => Err(PipelineError::Codec(CodecError::Send(format!(
                "audio decoder send_packet on stream {}: {}",
                self.stream_index, e
            )))),
        }
    }

    pub fn send_eof(&mut self) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(()),
            Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(PipelineError::Codec(CodecError::Send(format!(
                "audio decoder send_eof on stream {}: {}",
                self.stream_index, e
            )))),
        }
    }

    fn receive_frame_status(&mut self) -> Result<CodecStatus<ffmpeg::util::frame::Audio>> {
        let mut frame = ffmpeg::util::frame::Audio::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(CodecStatus::Output(frame)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                Ok(CodecStatus::NeedMoreInput)
            }
            Err(ffmpeg::Error::Eof) => Ok(CodecStatus::EndOfStream),
            Err(e) => Err(PipelineError::Codec(CodecError::Receive(format!(
                "audio decoder receive_frame on stream {}: {}",
                self.stream_index, e
            )))),
        }
    }

    pub fn receive_frame(&mut self) -> Result<Option<ffmpeg::util::frame::Audio>> {
        Ok(self.receive_frame_status()?.into_output())
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn sample_rate(&self) -> u32 {
        self.decoder.rate()
    }

    pub fn channels(&self) -> u16 {
        self.decoder.channels()
    }

    pub fn format(&self) -> ffmpeg::util::format::sample::Sample {
        self.decoder.format()
    }

    pub fn channel_layout(&self) -> ffmpeg::util::channel_layout::ChannelLayout {
        self.decoder.channel_layout()
    }
}

impl SendReceive for AudioDecoder {
    type Input = ffmpeg::codec::packet::Packet;
    type Output = ffmpeg::util::frame::Audio;

    fn send(&mut self, input: &Self::Input) -> Result<()> {
        self.send_packet(input)
    }

    fn send_eof(&mut self) -> Result<()> {
        AudioDecoder::send_eof(self)
    }

    fn receive(&mut self) -> Result<CodecStatus<Self::Output>> {
        self.receive_frame_status()
    }
}

/// Decoder for a single video stream. Same send/receive shape as
/// [`AudioDecoder`], specialized to `ffmpeg::decoder::Video`.
pub struct VideoDecoder {
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
}

impl VideoDecoder {
    pub fn open(stream: &ffmpeg::format::stream::Stream) -> Result<Self> {
        let stream_index = stream.index();
        let context = ffmpeg::codec::Context::from_parameters(stream.parameters()).map_err(
            |e| {
                PipelineError::Codec(CodecError::DecoderCreate(format!(
                    "failed to create codec context for stream {}: {}",
                    stream_index, e
                )))
            },
        )?;

        let decoder = context.decoder().video().map_err(|e| {
            PipelineError::Codec(CodecError::DecoderCreate(format!(
                "failed to open video decoder for stream {}: {}",
                stream_index, e
            )))
        })?;

        Ok(Self {
            decoder,
            stream_index,
        })
    }

    pub fn send_packet(&mut self, packet: &ffmpeg::codec::packet::Packet) -> Result<()> {
        match self.decoder.send_packet(packet) {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::InvalidData) => {
                tracing::debug!(
                    stream_index = self.stream_index,
                    "dropping invalid packet"
                );
                Ok(())
            }
            Err(e) => Err(PipelineError::Codec(CodecError::Send(format!(
                "video decoder send_packet on stream {}: {}",
                self.stream_index, e
            )))),
        }
    }

    pub fn send_eof(&mut self) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(()),
            Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(PipelineError::Codec(CodecError::Send(format!(
                "video decoder send_eof on stream {}: {}",
                self.stream_index, e
            )))),
        }
    }

    fn receive_frame_status(&mut self) -> Result<CodecStatus<ffmpeg::util::frame::Video>> {
        let mut frame = ffmpeg::util::frame::Video::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(CodecStatus::Output(frame)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                Ok(CodecStatus::NeedMoreInput)
            }
            Err(ffmpeg::Error::Eof) => Ok(CodecStatus::EndOfStream),
            Err(e) => Err(PipelineError::Codec(CodecError::Receive(format!(
                "video decoder receive_frame on stream {}: {}",
                self.stream_index, e
            )))),
        }
    }

    pub fn receive_frame(&mut self) -> Result<Option<ffmpeg::util::frame::Video>> {
        Ok(self.receive_frame_status()?.into_output())
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn width(&self) -> u32 {
        self.decoder.width()
    }

    pub fn height(&self) -> u32 {
        self.decoder.height()
    }

    pub fn format(&self) -> ffmpeg::util::format::pixel::Pixel {
        self.decoder.format()
    }
}

impl SendReceive for VideoDecoder {
    type Input = ffmpeg::codec::packet::Packet;
    type Output = ffmpeg::util::frame::Video;

    fn send(&mut self, input: &Self::Input) -> Result<()> {
        self.send_packet(input)
    }

    fn send_eof(&mut self) -> Result<()> {
        VideoDecoder::send_eof(self)
    }

    fn receive(&mut self) -> Result<CodecStatus<Self::Output>> {
        self.receive_frame_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_aac_decoder() {
        assert!(ffmpeg::codec::decoder::find(ffmpeg::codec::Id::AAC).is_some());
    }

    #[test]
    fn finds_h264_decoder() {
        assert!(ffmpeg::codec::decoder::find(ffmpeg::codec::Id::H264).is_some());
    }
}
