//! Thin, safe wrappers around FFmpeg library access shared by every component.
//!
//! This module handles:
//! - FFmpeg global initialization and log filtering
//! - Rational-arithmetic and timestamp-rescaling helpers
//! - Hardware device/frames-context propagation
//! - A custom in-memory `AVIOContext` for tests and callback-driven I/O

pub mod context;
pub mod helpers;
pub mod io;
pub mod utils;

pub use ffmpeg_next as ffmpeg;
#[allow(unused_imports)]
pub use utils::*;

use crate::error::{CodecError, Result};

/// Initialize the FFmpeg library. Must be called exactly once, before any
/// other FFmpeg-related call, and before any threads that touch libav* are
/// spawned (log-callback installation below is not thread-safe to race
/// against).
pub fn init() -> Result<()> {
    ffmpeg::init()
        .map_err(|e| CodecError::InitFailed(format!("ffmpeg::init() failed: {}", e)))?;

    tracing::info!("FFmpeg initialized");

    Ok(())
}

/// Install a custom FFmpeg log callback that suppresses known-noisy messages
/// which are expected side-effects of this crate's deliberate muxer and
/// filter-graph configuration (e.g. empty_moov without delay_moov, Opus
/// pre-roll warnings during seek-and-prime decode loops).
///
/// **Ordering:** must be called after [`init`] and before any threading
/// begins — altering the global log callback is not thread-safe.
pub fn install_log_filter() {
    // SAFETY: both calls mutate global FFmpeg state and are only safe to
    // call after `ffmpeg::init()`, exactly once, before any other thread
    // touches libav*.
    unsafe {
        ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_WARNING as i32);
        ffmpeg_next::ffi::av_log_set_callback(Some(ffmpeg_log_callback));
    }
}

/// Messages that are expected side-effects of this crate's design and should
/// not reach the application log.
const SUPPRESSED_MESSAGES: &[&str] = &[
    "No meaningful edit list will be written when using empty_moov without delay_moov",
    "starts with a nonzero dts",
    "Set the delay_moov flag to handle this case",
    "Could not update timestamps for skipped samples",
    "Could not update timestamps for discarded samples",
];

unsafe extern "C" fn ffmpeg_log_callback(
    avcl: *mut std::ffi::c_void,
    level: std::ffi::c_int,
    fmt: *const std::ffi::c_char,
    vl: ffmpeg_next::ffi::va_list,
) {
    use std::ffi::CStr;

    if level > unsafe { ffmpeg_next::ffi::av_log_get_level() } {
        return;
    }

    let mut buf = [0i8; 1024];
    let mut print_prefix: std::ffi::c_int = 1;
    ffmpeg_next::ffi::av_log_format_line(
        avcl,
        level,
        fmt,
        vl,
        buf.as_mut_ptr(),
        buf.len() as std::ffi::c_int,
        &mut print_prefix,
    );

    let msg = CStr::from_ptr(buf.as_ptr()).to_string_lossy();

    for suppressed in SUPPRESSED_MESSAGES {
        if msg.contains(suppressed) {
            return;
        }
    }

    eprint!("{}", msg);
}

/// Version string of the linked FFmpeg libraries.
pub fn version_info() -> String {
    format!(
        "libavformat {}, libavcodec {}, libavfilter {}, libavutil {}",
        ffmpeg::util::version(),
        ffmpeg::util::version(),
        ffmpeg::util::version(),
        ffmpeg::util::version()
    )
}
