//! Encoder adapters wrapping `ffmpeg::encoder::{Audio,Video}`.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

use crate::codec::{CodecStatus, SendReceive};
use crate::error::{CodecError, PipelineError, Result};

/// Caller-supplied parameters for opening an audio encoder.
///
/// Mirrors the fields spec.md's "Configuration surface" assigns to
/// encoders: codec, sample format/rate/layout, bitrate, and an optional
/// frame-size override for codecs (like AAC) whose packetization is fixed.
#[derive(Debug, Clone)]
pub struct AudioEncoderOptions {
    pub codec_id: codec::Id,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: u64,
    pub sample_format: Sample,
}

impl Default for AudioEncoderOptions {
    fn default() -> Self {
        Self {
            codec_id: codec::Id::AAC,
            sample_rate: 48_000,
            channels: 2,
            bit_rate: 128_000,
            sample_format: Sample::F32(ffmpeg::util::format::sample::Type::Planar),
        }
    }
}

impl AudioEncoderOptions {
    pub fn with_codec(mut self, codec_id: codec::Id) -> Self {
        self.codec_id = codec_id;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = bit_rate;
        self
    }
}

/// Caller-supplied parameters for opening a video encoder.
#[derive(Debug, Clone)]
pub struct VideoEncoderOptions {
    pub codec_id: codec::Id,
    pub width: u32,
    pub height: u32,
    pub time_base: ffmpeg::Rational,
    pub format: ffmpeg::util::format::pixel::Pixel,
    pub bit_rate: u64,
    pub gop_size: u32,
}

impl VideoEncoderOptions {
    pub fn with_codec(mut self, codec_id: codec::Id) -> Self {
        self.codec_id = codec_id;
        self
    }

    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    pub fn with_gop_size(mut self, gop_size: u32) -> Self {
        self.gop_size = gop_size;
        self
    }
}

/// An audio encoder, tracking the rolling PTS an input decoder/filter chain
/// doesn't always set on the encoded side.
///
/// When the encoder itself doesn't stamp a pts/dts on an output packet (some
/// encoders leave this to the caller), one is assigned from an internal
/// counter advanced by the encoder's frame size — matching the behavior
/// AAC's fixed 1024-sample framing requires.
pub struct AudioEncoder {
    encoder: ffmpeg::encoder::Audio,
    frame_size: usize,
    output_timebase: ffmpeg::Rational,
    pts: i64,
}

/// Fallback used only if the opened encoder reports a frame size of 0
/// (meaning "variable"); AAC in practice always reports 1024.
const DEFAULT_FRAME_SIZE: usize = 1024;

impl AudioEncoder {
    pub fn open(options: &AudioEncoderOptions) -> Result<Self> {
        let codec = codec::encoder::find(options.codec_id).ok_or_else(|| {
            PipelineError::Codec(CodecError::EncoderNotFound(format!(
                "{:?} encoder not found in this FFmpeg build",
                options.codec_id
            )))
        })?;

        let ch_layout = if options.channels == 1 {
            ChannelLayout::MONO
        } else {
            ChannelLayout::STEREO
        };

        let mut context = codec::Context::new_with_codec(codec);
        context.set_time_base(ffmpeg::Rational::new(1, options.sample_rate as i32));

        let mut audio_enc = context.encoder().audio().map_err(|e| {
            PipelineError::Codec(CodecError::EncoderCreate(format!(
                "cannot get audio encoder handle: {}",
                e
            )))
        })?;

        audio_enc.set_rate(options.sample_rate as i32);
        audio_enc.set_format(options.sample_format);
        audio_enc.set_channel_layout(ch_layout);
        audio_enc.set_bit_rate(options.bit_rate as usize);

        let encoder = audio_enc.open_as(codec).map_err(|e| {
            PipelineError::Codec(CodecError::EncoderCreate(format!(
                "failed to open {:?} encoder: {}",
                options.codec_id, e
            )))
        })?;

        let frame_size = encoder.frame_size() as usize;
        let output_timebase = ffmpeg::Rational::new(1, options.sample_rate as i32);

        Ok(Self {
            encoder,
            frame_size: if frame_size == 0 {
                DEFAULT_FRAME_SIZE
            } else {
                frame_size
            },
            output_timebase,
            pts: 0,
        })
    }

    pub fn send_frame(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<()> {
        self.encoder.send_frame(frame).map_err(|e| {
            PipelineError::Codec(CodecError::Send(format!(
                "audio encoder send_frame: {}",
                e
            )))
        })
    }

    pub fn send_eof(&mut self) -> Result<()> {
        match self.encoder.send_eof() {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(()),
            Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(PipelineError::Codec(CodecError::Send(format!(
                "audio encoder send_eof: {}",
                e
            )))),
        }
    }

    fn receive_packet_status(&mut self) -> Result<CodecStatus<ffmpeg::codec::packet::Packet>> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        match self.encoder.receive_packet(&mut packet) {
            Ok(()) => {
                if packet.pts().is_none() {
                    packet.set_pts(Some(self.pts));
                    packet.set_dts(Some(self.pts));
                }
                self.pts += self.frame_size as i64;
                Ok(CodecStatus::Output(packet))
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                Ok(CodecStatus::NeedMoreInput)
            }
            Err(ffmpeg::Error::Eof) => Ok(CodecStatus::EndOfStream),
            Err(e) => Err(PipelineError::Codec(CodecError::Receive(format!(
                "audio encoder receive_packet: {}",
                e
            )))),
        }
    }

    pub fn receive_packet(&mut self) -> Result<Option<ffmpeg::codec::packet::Packet>> {
        Ok(self.receive_packet_status()?.into_output())
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn output_timebase(&self) -> ffmpeg::Rational {
        self.output_timebase
    }

    /// Codec parameters for the encoded stream, for attaching to a muxer's
    /// output stream.
    pub fn codec_parameters(&self) -> ffmpeg::codec::Parameters {
        crate::ffmpeg_utils::helpers::encoder_codec_parameters(&self.encoder)
    }
}

impl SendReceive for AudioEncoder {
    type Input = ffmpeg::util::frame::Audio;
    type Output = ffmpeg::codec::packet::Packet;

    fn send(&mut self, input: &Self::Input) -> Result<()> {
        self.send_frame(input)
    }

    fn send_eof(&mut self) -> Result<()> {
        AudioEncoder::send_eof(self)
    }

    fn receive(&mut self) -> Result<CodecStatus<Self::Output>> {
        self.receive_packet_status()
    }
}

/// A video encoder. Same send/receive shape as [`AudioEncoder`], minus the
/// pts-stamping workaround (video encoders reliably propagate the input
/// frame's pts).
pub struct VideoEncoder {
    encoder: ffmpeg::encoder::Video,
    output_timebase: ffmpeg::Rational,
}

impl VideoEncoder {
    pub fn open(options: &VideoEncoderOptions) -> Result<Self> {
        let codec = codec::encoder::find(options.codec_id).ok_or_else(|| {
            PipelineError::Codec(CodecError::EncoderNotFound(format!(
                "{:?} encoder not found in this FFmpeg build",
                options.codec_id
            )))
        })?;

        let mut context = codec::Context::new_with_codec(codec);
        context.set_time_base(options.time_base);

        let mut video_enc = context.encoder().video().map_err(|e| {
            PipelineError::Codec(CodecError::EncoderCreate(format!(
                "cannot get video encoder handle: {}",
                e
            )))
        })?;

        video_enc.set_width(options.width);
        video_enc.set_height(options.height);
        video_enc.set_format(options.format);
        video_enc.set_time_base(options.time_base);
        video_enc.set_bit_rate(options.bit_rate as usize);
        video_enc.set_gop(options.gop_size);

        let encoder = video_enc.open_as(codec).map_err(|e| {
            PipelineError::Codec(CodecError::EncoderCreate(format!(
                "failed to open {:?} encoder: {}",
                options.codec_id, e
            )))
        })?;

        Ok(Self {
            encoder,
            output_timebase: options.time_base,
        })
    }

    pub fn send_frame(&mut self, frame: &ffmpeg::util::frame::Video) -> Result<()> {
        self.encoder.send_frame(frame).map_err(|e| {
            PipelineError::Codec(CodecError::Send(format!(
                "video encoder send_frame: {}",
                e
            )))
        })
    }

    pub fn send_eof(&mut self) -> Result<()> {
        match self.encoder.send_eof() {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(()),
            Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(PipelineError::Codec(CodecError::Send(format!(
                "video encoder send_eof: {}",
                e
            )))),
        }
    }

    fn receive_packet_status(&mut self) -> Result<CodecStatus<ffmpeg::codec::packet::Packet>> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        match self.encoder.receive_packet(&mut packet) {
            Ok(()) => Ok(CodecStatus::Output(packet)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                Ok(CodecStatus::NeedMoreInput)
            }
            Err(ffmpeg::Error::Eof) => Ok(CodecStatus::EndOfStream),
            Err(e) => Err(PipelineError::Codec(CodecError::Receive(format!(
                "video encoder receive_packet: {}",
                e
            )))),
        }
    }

    pub fn receive_packet(&mut self) -> Result<Option<ffmpeg::codec::packet::Packet>> {
        Ok(self.receive_packet_status()?.into_output())
    }

    pub fn output_timebase(&self) -> ffmpeg::Rational {
        self.output_timebase
    }

    /// Codec parameters for the encoded stream, for attaching to a muxer's
    /// output stream.
    pub fn codec_parameters(&self) -> ffmpeg::codec::Parameters {
        crate::ffmpeg_utils::helpers::encoder_codec_parameters_video(&self.encoder)
    }
}

impl SendReceive for VideoEncoder {
    type Input = ffmpeg::util::frame::Video;
    type Output = ffmpeg::codec::packet::Packet;

    fn send(&mut self, input: &Self::Input) -> Result<()> {
        self.send_frame(input)
    }

    fn send_eof(&mut self) -> Result<()> {
        VideoEncoder::send_eof(self)
    }

    fn receive(&mut self) -> Result<CodecStatus<Self::Output>> {
        self.receive_packet_status()
    }
}

/// `true` if the FFmpeg build includes an encoder for `codec_id`.
pub fn is_encoder_available(codec_id: codec::Id) -> bool {
    codec::encoder::find(codec_id).is_some()
}

/// A conservative default AAC bitrate for a given channel count, used when
/// the caller hasn't specified one explicitly.
pub fn recommended_audio_bit_rate(channels: u16) -> u64 {
    match channels {
        1 => 64_000,
        2 => 128_000,
        6 => 384_000,
        8 => 512_000,
        _ => 128_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommended_bitrates() {
        assert_eq!(recommended_audio_bit_rate(1), 64_000);
        assert_eq!(recommended_audio_bit_rate(2), 128_000);
        assert_eq!(recommended_audio_bit_rate(6), 384_000);
    }

    #[test]
    fn opens_aac_encoder_when_available() {
        if !is_encoder_available(codec::Id::AAC) {
            return;
        }
        let options = AudioEncoderOptions::default();
        let enc = AudioEncoder::open(&options);
        assert!(enc.is_ok(), "AAC encoder should open: {:?}", enc.err());
        assert_eq!(
            enc.unwrap().output_timebase(),
            ffmpeg::Rational::new(1, 48_000)
        );
    }

    #[test]
    fn stamps_packet_pts_when_encoder_omits_it() {
        if !is_encoder_available(codec::Id::AAC) {
            return;
        }
        let options = AudioEncoderOptions::default();
        let mut enc = AudioEncoder::open(&options).unwrap();

        let mut frame = ffmpeg::util::frame::Audio::new(
            options.sample_format,
            enc.frame_size(),
            ChannelLayout::STEREO,
        );
        frame.set_rate(options.sample_rate);
        for ch in 0..2 {
            for sample in frame.data_mut(ch) {
                *sample = 0;
            }
        }

        for i in 0..5 {
            frame.set_pts(Some(i * enc.frame_size() as i64));
            enc.send_frame(&frame).unwrap();
            while let Some(packet) = enc.receive_packet().unwrap() {
                assert!(packet.pts().is_some());
            }
        }
    }
}
