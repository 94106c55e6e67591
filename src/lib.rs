//! # avmux
//!
//! `avmux` is a library for constructing streaming audio/video pipelines —
//! demux → decode → filter → encode → mux — on top of FFmpeg's libav*
//! libraries via `ffmpeg-next`, without the caller hand-rolling packet/frame
//! send-receive state machines, timestamp rescaling, interleaving,
//! hardware-context propagation, or stream-parameter negotiation.
//!
//! ## Core subsystems
//!
//! - [`mux`] — the muxer core: lazy stream initialization, a two-phase
//!   pre-header/sync-queue buffering system, streamcopy filtering, and
//!   timestamp fixup.
//! - [`filter`] — single-graph and filter-complex graphs, built lazily from
//!   the first frame of every input so format/dimensions/rate/layout are
//!   read from real data rather than guessed.
//! - [`codec`] — send/receive adapters (decoder, encoder, bitstream filter)
//!   turning FFmpeg's `EAGAIN`/`EOF` protocol into [`codec::CodecStatus`].
//! - [`scheduler`] — a component graph wiring the above together with
//!   bounded [`queue`]s, EOF propagation, and cooperative cancellation.
//!
//! ## Usage
//!
//! ```ignore
//! avmux::ffmpeg_utils::init()?;
//! avmux::ffmpeg_utils::install_log_filter();
//!
//! let mut demuxer = avmux::demux::FileDemuxer::open("input.mp4")?;
//! let mut muxer = avmux::mux::Muxer::new("mp4")?;
//! // add_stream/set_stream_parameters per output, then drive with
//! // scheduler::stream_copy_all or a per-stage decode/filter/encode pipe.
//! ```

pub mod codec;
pub mod config;
pub mod demux;
pub mod error;
pub mod ffmpeg_utils;
pub mod filter;
pub mod mux;
pub mod queue;
pub mod scheduler;

pub use error::{CodecError, PipelineError, Result};
