//! Caller-facing configuration surface, one builder-style struct per
//! component (muxer, decoder, encoder, filter), mirroring the teacher's
//! `ServerConfig`/`CacheConfig` builder idiom but replacing server-process
//! knobs with the pipeline knobs spec.md §6 enumerates. The library has no
//! on-disk config of its own — loading configuration from a file is an
//! application-layer concern the spec places out of scope — so these
//! structs are constructed in code via `Default` + `with_*`, not
//! deserialized from TOML/JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The muxer's configuration surface (spec.md §6, "Configuration surface").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxerOptions {
    /// Explicit short container-format name (e.g. `"mp4"`, `"mpegts"`).
    /// Required when the muxer is opened against custom I/O rather than a
    /// URL, since there's no file extension to sniff the format from.
    pub format: Option<String>,

    /// Container-format options passed through to `avformat_write_header`
    /// (e.g. `movflags`, `fflags`).
    pub options: HashMap<String, String>,

    /// Custom-I/O buffer size in bytes.
    pub buffer_size: usize,

    /// Custom-I/O maximum packet size in bytes. `0` means no limit.
    pub max_packet_size: usize,

    /// PreMuxQueue packet-count ceiling, enforced only once
    /// `muxing_queue_data_threshold` bytes have accumulated on that stream's
    /// queue (spec.md §4.5, "Backpressure").
    pub max_muxing_queue_size: usize,

    /// Byte threshold after which `max_muxing_queue_size` starts being
    /// enforced.
    pub muxing_queue_data_threshold: usize,

    /// Seconds of interleave buffer the sync queue is allowed to hold
    /// before it must start releasing packets.
    pub sync_queue_buffer_duration: f64,

    /// Seconds subtracted from every streamcopy stream's timestamps
    /// (spec.md §4.5, "streamcopy filter", step 3).
    pub start_time: f64,

    /// Keep non-keyframes preceding a streamcopy stream's first keyframe
    /// instead of dropping them.
    pub copy_initial_nonkeyframes: bool,

    /// Keep packets before `start_time` instead of dropping them. Collapses
    /// the source's tri-state `copy_prior_start` to a bool — see
    /// `DESIGN.md` for the Open Question this resolves.
    pub copy_prior_start: bool,

    /// Master switch for spec.md §4.5 Phase 3 cross-stream DTS interleave.
    /// Only takes effect when at least one attached stream is a streamcopy
    /// stream (spec.md: "if `num_interleaved > num_encoded`").
    pub use_sync_queue: bool,

    /// Route all container writes through a capacity-1 work queue so
    /// concurrent callers can't interleave raw `write_packet` calls.
    pub use_async_write: bool,

    /// Whether non-fatal container-writer errors (other than `EOF`)
    /// propagate as failures, rather than being logged and swallowed.
    pub exit_on_error: bool,
}

/// PreMuxQueue packet-count ceiling used when the caller doesn't override
/// it. Matches the constant used directly in `mux::muxer`.
pub const DEFAULT_MAX_MUXING_QUEUE_SIZE: usize = 1024;
/// Byte threshold used when the caller doesn't override it: 8 MiB.
pub const DEFAULT_MUXING_QUEUE_DATA_THRESHOLD: usize = 8 * 1024 * 1024;

impl Default for MuxerOptions {
    fn default() -> Self {
        Self {
            format: None,
            options: HashMap::new(),
            buffer_size: 32 * 1024,
            max_packet_size: 0,
            max_muxing_queue_size: DEFAULT_MAX_MUXING_QUEUE_SIZE,
            muxing_queue_data_threshold: DEFAULT_MUXING_QUEUE_DATA_THRESHOLD,
            sync_queue_buffer_duration: 1.0,
            start_time: 0.0,
            copy_initial_nonkeyframes: false,
            copy_prior_start: false,
            use_sync_queue: true,
            use_async_write: false,
            exit_on_error: true,
        }
    }
}

impl MuxerOptions {
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    pub fn with_max_muxing_queue_size(mut self, max_muxing_queue_size: usize) -> Self {
        self.max_muxing_queue_size = max_muxing_queue_size;
        self
    }

    pub fn with_muxing_queue_data_threshold(mut self, threshold: usize) -> Self {
        self.muxing_queue_data_threshold = threshold;
        self
    }

    pub fn with_sync_queue_buffer_duration(mut self, seconds: f64) -> Self {
        self.sync_queue_buffer_duration = seconds;
        self
    }

    pub fn with_start_time(mut self, seconds: f64) -> Self {
        self.start_time = seconds;
        self
    }

    pub fn with_copy_initial_nonkeyframes(mut self, value: bool) -> Self {
        self.copy_initial_nonkeyframes = value;
        self
    }

    pub fn with_copy_prior_start(mut self, value: bool) -> Self {
        self.copy_prior_start = value;
        self
    }

    pub fn with_use_sync_queue(mut self, value: bool) -> Self {
        self.use_sync_queue = value;
        self
    }

    pub fn with_use_async_write(mut self, value: bool) -> Self {
        self.use_async_write = value;
        self
    }

    pub fn with_exit_on_error(mut self, value: bool) -> Self {
        self.exit_on_error = value;
        self
    }
}

/// Decoder lazy-initialization overrides (spec.md §4.2, "Lazy
/// initialization"). Most decoder fields come from the input stream's own
/// codec parameters, so this only covers the handful of caller-suppliable
/// knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecoderOptions {
    /// Extra decoder options passed to `avcodec_open2` (e.g. `threads`).
    pub options: HashMap<String, String>,
}

impl DecoderOptions {
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Filter-graph construction overrides shared by [`crate::filter::graph::FilterGraph`]
/// and [`crate::filter::complex::FilterComplexGraph`] (spec.md §4.3/§4.4).
#[derive(Debug, Clone)]
pub struct FilterOptions {
    /// How to react when a later frame's format/dimensions/rate/layout
    /// differs from the frame the graph was built against.
    pub policy: crate::filter::ParameterChangePolicy,

    /// For video inputs: constant-framerate mode uses `1 / framerate` as
    /// the input timebase; variable-framerate mode uses the frame's own
    /// timebase. `None` selects VFR.
    pub cfr_framerate: Option<ffmpeg_next::Rational>,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            policy: crate::filter::ParameterChangePolicy::Fail,
            cfr_framerate: None,
        }
    }
}

impl FilterOptions {
    pub fn with_policy(mut self, policy: crate::filter::ParameterChangePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cfr_framerate(mut self, framerate: ffmpeg_next::Rational) -> Self {
        self.cfr_framerate = Some(framerate);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn muxer_options_defaults_match_spec_constants() {
        let opts = MuxerOptions::default();
        assert_eq!(opts.max_muxing_queue_size, DEFAULT_MAX_MUXING_QUEUE_SIZE);
        assert_eq!(
            opts.muxing_queue_data_threshold,
            DEFAULT_MUXING_QUEUE_DATA_THRESHOLD
        );
        assert!(opts.use_sync_queue);
        assert!(!opts.use_async_write);
    }

    #[test]
    fn muxer_options_builder_chains() {
        let opts = MuxerOptions::default()
            .with_format("mpegts")
            .with_start_time(2.5)
            .with_copy_prior_start(true);
        assert_eq!(opts.format.as_deref(), Some("mpegts"));
        assert_eq!(opts.start_time, 2.5);
        assert!(opts.copy_prior_start);
    }

    #[test]
    fn filter_options_default_is_vfr_with_fail_policy() {
        let opts = FilterOptions::default();
        assert!(opts.cfr_framerate.is_none());
        assert!(matches!(
            opts.policy,
            crate::filter::ParameterChangePolicy::Fail
        ));
    }
}
