//! Crate-wide error taxonomy.
//!
//! Mirrors the split used throughout the pipeline: a small, codec-facing
//! error (`CodecError`) nested inside the top-level `PipelineError`. Transient
//! codec conditions (`EAGAIN`/`EOF`) are never represented here — they are
//! modeled by [`crate::codec::CodecStatus`] and handled locally by the
//! send/receive adapter before an error would ever need to be constructed.

use thiserror::Error;

/// Top-level error type for the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// An error originating from a codec, BSF, or filter-graph call.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation was attempted in a state that forbids it (e.g. adding a
    /// stream after the header was written, writing after `close`).
    #[error("protocol state violation: {0}")]
    ProtocolState(String),

    /// A PreMuxQueue byte or packet-count threshold was exceeded.
    #[error("backpressure overflow on stream {stream_index}: {detail}")]
    Backpressure { stream_index: usize, detail: String },

    /// An error raised while muxing (header/packet/trailer write, stream
    /// setup) that isn't a bare protocol-state violation.
    #[error("muxing error: {0}")]
    Muxing(String),

    /// An error raised while building or driving a filter graph.
    #[error("filter error: {0}")]
    Filter(String),

    /// An error raised by the scheduler or pipeline assembler (unsupported
    /// component shape, duplicate labels, missing required input/output).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Invalid configuration supplied by the caller.
    #[error("configuration error: {0}")]
    Config(String),

    /// A bounded queue was used after it was closed (without an associated
    /// upstream error).
    #[error("queue closed")]
    QueueClosed,
}

/// Codec/filter/BSF-facing errors — everything that isn't `EAGAIN`/`EOF`.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Failure during global FFmpeg initialization.
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    /// Failure opening an input.
    #[error("failed to open input: {0}")]
    OpenInput(String),

    /// The requested decoder for a codec ID was not found.
    #[error("decoder not found: {0}")]
    DecoderNotFound(String),

    /// Failure instantiating a decoder.
    #[error("failed to create decoder: {0}")]
    DecoderCreate(String),

    /// The requested encoder for a codec ID was not found.
    #[error("encoder not found: {0}")]
    EncoderNotFound(String),

    /// Failure instantiating or configuring an encoder.
    #[error("failed to create encoder: {0}")]
    EncoderCreate(String),

    /// Failure creating or opening a bitstream filter.
    #[error("failed to create bitstream filter: {0}")]
    BsfCreate(String),

    /// Failure sending a packet/frame into a codec or BSF context.
    #[error("send failed: {0}")]
    Send(String),

    /// Failure receiving a packet/frame out of a codec or BSF context.
    #[error("receive failed: {0}")]
    Receive(String),

    /// Failure constructing or configuring a filter graph.
    #[error("filter graph init failed: {0}")]
    FilterInit(String),

    /// A later frame's format/dimensions/rate/layout differ from the first
    /// frame and the configured `ParameterChangePolicy` is `Fail`.
    #[error("filter input parameters changed: {0}")]
    ParameterChange(String),

    /// Cloning or allocating a packet/frame/dictionary returned null.
    #[error("allocation failed: {0}")]
    Alloc(String),

    /// An invalid or unexpected timebase was encountered.
    #[error("invalid timebase")]
    InvalidTimebase,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
