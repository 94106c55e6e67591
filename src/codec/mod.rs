//! Send/receive codec adapters (decoder, encoder, bitstream filter) built on
//! top of FFmpeg's two-call per-unit-of-work protocol.
//!
//! Every libav* codec context exposes the same shape: push input with
//! `avcodec_send_*`, then drain zero or more outputs with
//! `avcodec_receive_*` until it asks for more input (`EAGAIN`) or announces
//! it is finished (`EOF`). This module turns that into [`CodecStatus`] so
//! callers never match on a raw `ffmpeg::Error` variant for a condition that
//! isn't actually an error.

pub mod bsf;
pub mod decoder;
pub mod encoder;

use crate::error::Result;

/// The outcome of one `receive` call on a send/receive adapter.
#[derive(Debug)]
pub enum CodecStatus<T> {
    /// A fully-formed output unit (frame, packet) is available.
    Output(T),
    /// The adapter has nothing buffered; send more input before calling
    /// `receive` again. Mirrors `AVERROR(EAGAIN)`.
    NeedMoreInput,
    /// The adapter has been sent EOF and has no more buffered output.
    /// Mirrors `AVERROR_EOF`.
    EndOfStream,
}

impl<T> CodecStatus<T> {
    /// `true` if this status carries an output unit.
    pub fn is_output(&self) -> bool {
        matches!(self, CodecStatus::Output(_))
    }

    /// Unwrap the output, or `None` for `NeedMoreInput`/`EndOfStream`.
    pub fn into_output(self) -> Option<T> {
        match self {
            CodecStatus::Output(v) => Some(v),
            _ => None,
        }
    }
}

/// Common shape shared by decoders, encoders, and bitstream filters: push
/// input, drain output, flush at end of stream.
///
/// Implementors only need `send`/`send_eof`/`receive`; `process_all` and
/// `flush` are derived from them.
pub trait SendReceive {
    /// The unit pushed in (a compressed packet for a decoder/BSF, a raw
    /// frame for an encoder).
    type Input;
    /// The unit drained out (a raw frame for a decoder, a compressed packet
    /// for an encoder/BSF).
    type Output;

    /// Push one input unit.
    fn send(&mut self, input: &Self::Input) -> Result<()>;

    /// Signal end of stream; no more `send` calls follow until the adapter
    /// is reset.
    fn send_eof(&mut self) -> Result<()>;

    /// Drain a single output unit, if one is ready.
    fn receive(&mut self) -> Result<CodecStatus<Self::Output>>;

    /// Push one input unit, then drain every output unit it immediately
    /// makes available.
    fn process(&mut self, input: &Self::Input) -> Result<Vec<Self::Output>> {
        self.send(input)?;
        let mut out = Vec::new();
        loop {
            match self.receive()? {
                CodecStatus::Output(v) => out.push(v),
                CodecStatus::NeedMoreInput | CodecStatus::EndOfStream => break,
            }
        }
        Ok(out)
    }

    /// Send EOF and drain every remaining buffered output unit.
    ///
    /// Once EOF has been sent, no further input is coming, so
    /// `NeedMoreInput` is treated the same as `EndOfStream` here — both end
    /// the drain loop.
    fn flush(&mut self) -> Result<Vec<Self::Output>> {
        self.send_eof()?;
        let mut out = Vec::new();
        loop {
            match self.receive()? {
                CodecStatus::Output(v) => out.push(v),
                CodecStatus::NeedMoreInput | CodecStatus::EndOfStream => break,
            }
        }
        Ok(out)
    }
}
