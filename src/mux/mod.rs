//! The muxer core (C5): lazy stream initialization, PreMuxQueue/SyncQueue
//! buffering, streamcopy filtering, and timestamp fixup.

pub mod muxer;
pub mod premux;
pub mod stream;
pub mod streamcopy;
pub mod sync_queue;
pub mod timestamp;

pub use muxer::Muxer;
pub use stream::StreamDescriptor;
pub use streamcopy::StreamcopyOptions;
