//! Bitstream filter adapter, e.g. for extracting extradata into in-band
//! headers (`h264_mp4toannexb`) or as a pass-through no-op (`null`) in test
//! pipelines that exercise the BSF stage without needing a real rewrite.

use ffmpeg_next as ffmpeg;

use crate::codec::{CodecStatus, SendReceive};
use crate::error::{CodecError, PipelineError, Result};

/// A bitstream filter instance bound to one stream's codec parameters.
pub struct BitstreamFilter {
    context: ffmpeg::codec::bsf::Context,
    name: &'static str,
}

impl BitstreamFilter {
    /// Open a bitstream filter by its libavcodec name (e.g. `"null"`,
    /// `"h264_mp4toannexb"`, `"aac_adtstoasc"`).
    pub fn open(name: &'static str, params: &ffmpeg::codec::Parameters) -> Result<Self> {
        let filter = ffmpeg::codec::bsf::find(name).ok_or_else(|| {
            PipelineError::Codec(CodecError::BsfCreate(format!(
                "bitstream filter {:?} not found in this FFmpeg build",
                name
            )))
        })?;

        let context = filter.apply(params).map_err(|e| {
            PipelineError::Codec(CodecError::BsfCreate(format!(
                "failed to apply bitstream filter {:?}: {}",
                name, e
            )))
        })?;

        Ok(Self { context, name })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn send_packet(&mut self, packet: &ffmpeg::codec::packet::Packet) -> Result<()> {
        self.context.send(packet).map_err(|e| {
            PipelineError::Codec(CodecError::Send(format!(
                "bsf {:?} send_packet: {}",
                self.name, e
            )))
        })
    }

    pub fn send_eof(&mut self) -> Result<()> {
        match self.context.send_eof() {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(()),
            Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(PipelineError::Codec(CodecError::Send(format!(
                "bsf {:?} send_eof: {}",
                self.name, e
            )))),
        }
    }

    fn receive_packet_status(&mut self) -> Result<CodecStatus<ffmpeg::codec::packet::Packet>> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        match self.context.receive(&mut packet) {
            Ok(()) => Ok(CodecStatus::Output(packet)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                Ok(CodecStatus::NeedMoreInput)
            }
            Err(ffmpeg::Error::Eof) => Ok(CodecStatus::EndOfStream),
            Err(e) => Err(PipelineError::Codec(CodecError::Receive(format!(
                "bsf {:?} receive_packet: {}",
                self.name, e
            )))),
        }
    }

    pub fn receive_packet(&mut self) -> Result<Option<ffmpeg::codec::packet::Packet>> {
        Ok(self.receive_packet_status()?.into_output())
    }
}

impl SendReceive for BitstreamFilter {
    type Input = ffmpeg::codec::packet::Packet;
    type Output = ffmpeg::codec::packet::Packet;

    fn send(&mut self, input: &Self::Input) -> Result<()> {
        self.send_packet(input)
    }

    fn send_eof(&mut self) -> Result<()> {
        BitstreamFilter::send_eof(self)
    }

    fn receive(&mut self) -> Result<CodecStatus<Self::Output>> {
        self.receive_packet_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_bsf_is_available() {
        assert!(ffmpeg::codec::bsf::find("null").is_some());
    }
}
