//! Safe wrappers around raw FFmpeg FFI struct access.
//!
//! Every function in this module is `pub` and **safe** to call. All `unsafe`
//! blocks are contained here with explicit safety arguments. Callers outside
//! this module should never need to write `unsafe` for routine FFmpeg access.

use ffmpeg_next as ffmpeg;

// ── Codec-parameter field accessors ─────────────────────────────────────────

/// Read `sample_rate` from an `AVCodecParameters` struct.
pub fn codec_params_sample_rate(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    // SAFETY: `params.as_ptr()` is a valid non-null pointer for the lifetime
    // of `params`. `sample_rate` is a plain i32 field with no ownership.
    unsafe { (*params.as_ptr()).sample_rate as u32 }
}

/// Read `ch_layout.nb_channels` from an `AVCodecParameters` struct.
pub fn codec_params_channels(params: &ffmpeg::codec::parameters::Parameters) -> u16 {
    // SAFETY: same as `codec_params_sample_rate`.
    unsafe { (*params.as_ptr()).ch_layout.nb_channels as u16 }
}

/// Read `width` from an `AVCodecParameters` struct.
pub fn codec_params_width(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    // SAFETY: same as `codec_params_sample_rate`.
    unsafe { (*params.as_ptr()).width as u32 }
}

/// Read `height` from an `AVCodecParameters` struct.
pub fn codec_params_height(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    // SAFETY: same as `codec_params_sample_rate`.
    unsafe { (*params.as_ptr()).height as u32 }
}

/// Read `bit_rate` from an `AVCodecParameters` struct.
pub fn codec_params_bit_rate(params: &ffmpeg::codec::parameters::Parameters) -> u64 {
    // SAFETY: same as `codec_params_sample_rate`.
    unsafe { (*params.as_ptr()).bit_rate as u64 }
}

/// Read `frame_size` from an `AVCodecParameters` struct, the audio
/// streamcopy duration fallback used when `av_get_audio_frame_duration2`
/// cannot derive one from the codec ID and block alignment alone
/// (spec.md §4.5).
pub fn codec_params_frame_size(params: &ffmpeg::codec::parameters::Parameters) -> i32 {
    // SAFETY: same as `codec_params_sample_rate`.
    unsafe { (*params.as_ptr()).frame_size }
}

/// Copy the side-data array attached to a decoder/demuxer `AVCodecParameters`
/// onto an output stream's `AVCodecParameters`, matching spec-required
/// side-data propagation (e.g. Dolby Vision RPU, HDR10+ metadata) that
/// `ffmpeg-next` has no safe accessor for.
///
/// No-op if `src` carries no side data.
pub fn copy_codec_params_side_data(
    src: &ffmpeg::codec::parameters::Parameters,
    dst: &mut ffmpeg::codec::parameters::Parameters,
) {
    // SAFETY: both pointers are valid and non-null for the lifetime of their
    // owning `Parameters` values. `av_packet_side_data_add`-style APIs are
    // for packets, not codecpar — codecpar side data is a plain
    // `AVPacketSideData*` array with a count, copied element-by-element with
    // `av_packet_side_data_copy` semantics emulated here via `avcodec_parameters_copy`
    // when a full clone is acceptable; for append semantics we implement the
    // field copy directly, since `ffmpeg-next` does not expose it.
    unsafe {
        let s = src.as_ptr();
        let d = dst.as_mut_ptr();
        if (*s).nb_coded_side_data == 0 {
            return;
        }
        // `avcodec_parameters_copy` overwrites *all* fields of `dst` from
        // `src`, including side data, in one call — the safe way to do this
        // without manually walking the side-data array.
        ffmpeg::ffi::avcodec_parameters_copy(d, s);
    }
}

/// Zero out `codec_tag` on an output stream's `AVCodecParameters`, so the
/// muxer derives the correct tag for the target container rather than
/// carrying one over from a different container.
///
/// Must be called after `out_stream.set_parameters(...)` and before
/// `write_header`.
pub fn stream_reset_codec_tag(out_stream: &mut ffmpeg::format::stream::StreamMut) {
    // SAFETY: `out_stream.as_mut_ptr()` is valid for the lifetime of the
    // stream. `codecpar` is set by `set_parameters` and is non-null.
    // Writing 0 to `codec_tag` is always safe — it is a plain u32 field.
    unsafe {
        (*(*out_stream.as_mut_ptr()).codecpar).codec_tag = 0;
    }
}

/// Copy the `disposition` flags (default, forced, hearing-impaired, …) from
/// one stream to another.
pub fn copy_stream_disposition(
    src: &ffmpeg::Stream,
    dst: &mut ffmpeg::format::stream::StreamMut,
) {
    // SAFETY: both pointers are valid and non-null for the lifetime of their
    // owning `Stream`/`StreamMut` values. `disposition` is a plain i32
    // bitfield with no ownership semantics.
    unsafe {
        let flags = (*src.as_ptr()).disposition;
        (*dst.as_mut_ptr()).disposition = flags;
    }
}

/// Read the raw `disposition` bitfield off a stream.
pub fn stream_disposition(stream: &ffmpeg::Stream) -> i32 {
    // SAFETY: `stream.as_ptr()` is valid for the lifetime of `stream`.
    unsafe { (*stream.as_ptr()).disposition }
}

/// OR one or more disposition flags (e.g. `AV_DISPOSITION_DEFAULT`) into a
/// stream's existing `disposition` bitfield, used by the muxer's
/// default-disposition inference (spec.md §4.5).
pub fn stream_set_disposition_flag(stream: &mut ffmpeg::format::stream::StreamMut, flag: i32) {
    // SAFETY: `stream.as_mut_ptr()` is valid for the lifetime of `stream`.
    unsafe {
        (*stream.as_mut_ptr()).disposition |= flag;
    }
}

/// Read a video frame's `duration` field (in the frame's own timebase).
/// `ffmpeg-next` exposes packet duration but not frame duration.
pub fn video_frame_duration(frame: &ffmpeg::util::frame::Video) -> i64 {
    // SAFETY: `frame.as_ptr()` is valid for the lifetime of `frame`.
    unsafe { (*frame.as_ptr()).duration }
}

/// Set a video frame's `duration` field, used to fill in a duration a
/// filter graph didn't set from the buffersink's negotiated framerate
/// (spec.md §4.3, "Timestamp handling").
pub fn video_frame_set_duration(frame: &mut ffmpeg::util::frame::Video, duration: i64) {
    // SAFETY: `frame.as_mut_ptr()` is valid for the lifetime of `frame`.
    unsafe {
        (*frame.as_mut_ptr()).duration = duration;
    }
}

/// Read a video frame's own `time_base`, the unit its `pts`/`duration` are
/// expressed in as set by the decoder/caller that produced it. Needed to
/// rescale into a filter graph's computed input timebase before
/// `buffersrc.add` (spec.md §4.3, "Timestamp handling"); `ffmpeg-next`
/// exposes neither a getter nor setter for this field.
pub fn video_frame_time_base(frame: &ffmpeg::util::frame::Video) -> ffmpeg::Rational {
    // SAFETY: `frame.as_ptr()` is valid for the lifetime of `frame`.
    unsafe { (*frame.as_ptr()).time_base }
}

/// Set a video frame's `time_base` field.
pub fn video_frame_set_time_base(frame: &mut ffmpeg::util::frame::Video, time_base: ffmpeg::Rational) {
    // SAFETY: `frame.as_mut_ptr()` is valid for the lifetime of `frame`.
    unsafe {
        (*frame.as_mut_ptr()).time_base = time_base;
    }
}

/// Read an audio frame's `duration` field (in the frame's own timebase).
/// Named distinctly from [`audio_frame_duration`], which instead *derives* a
/// duration from codec parameters for streamcopy packets with none of their
/// own.
pub fn audio_frame_raw_duration(frame: &ffmpeg::util::frame::Audio) -> i64 {
    // SAFETY: `frame.as_ptr()` is valid for the lifetime of `frame`.
    unsafe { (*frame.as_ptr()).duration }
}

/// Set an audio frame's `duration` field.
pub fn audio_frame_set_raw_duration(frame: &mut ffmpeg::util::frame::Audio, duration: i64) {
    // SAFETY: `frame.as_mut_ptr()` is valid for the lifetime of `frame`.
    unsafe {
        (*frame.as_mut_ptr()).duration = duration;
    }
}

/// Read an audio frame's own `time_base`. See [`video_frame_time_base`].
pub fn audio_frame_time_base(frame: &ffmpeg::util::frame::Audio) -> ffmpeg::Rational {
    // SAFETY: `frame.as_ptr()` is valid for the lifetime of `frame`.
    unsafe { (*frame.as_ptr()).time_base }
}

/// Set an audio frame's `time_base` field.
pub fn audio_frame_set_time_base(frame: &mut ffmpeg::util::frame::Audio, time_base: ffmpeg::Rational) {
    // SAFETY: `frame.as_mut_ptr()` is valid for the lifetime of `frame`.
    unsafe {
        (*frame.as_mut_ptr()).time_base = time_base;
    }
}

/// Push a frame into a buffersrc context with `av_buffersrc_add_frame_flags`
/// instead of the safe `Source::add` wrapper, passing `AV_BUFFERSRC_FLAG_PUSH`
/// (process immediately rather than waiting for a batch) and
/// `AV_BUFFERSRC_FLAG_KEEP_REF` (spec.md §4.3: hw-frames fan-out to more than
/// one graph must not have the first graph consume the frame's reference).
pub fn buffersrc_add_frame_with_flags(
    ctx: &mut ffmpeg::filter::context::Source,
    frame: *mut ffmpeg::ffi::AVFrame,
) -> Result<(), ffmpeg::Error> {
    // SAFETY: `ctx.as_mut_ptr()` is a live `AVFilterContext` of type
    // buffer/abuffer; `frame` is a valid, non-null `AVFrame` owned by the
    // caller for the duration of this call. `av_buffersrc_add_frame_flags`
    // does not take ownership when `KEEP_REF` is set — it copies a
    // reference internally and leaves the caller's frame untouched.
    let ret = unsafe {
        ffmpeg::ffi::av_buffersrc_add_frame_flags(
            ctx.as_ptr() as *mut _,
            frame,
            (ffmpeg::ffi::AV_BUFFERSRC_FLAG_PUSH | ffmpeg::ffi::AV_BUFFERSRC_FLAG_KEEP_REF) as i32,
        )
    };
    if ret < 0 {
        Err(ffmpeg::Error::from(ret))
    } else {
        Ok(())
    }
}

/// Allocate a fresh `AVCodecParameters` and copy an open encoder context's
/// parameters into it, for attaching to a muxer's output stream.
pub fn encoder_codec_parameters(
    encoder: &ffmpeg::codec::encoder::Audio,
) -> ffmpeg::codec::Parameters {
    use std::ops::Deref;
    use std::rc::Rc;
    let ctx: &ffmpeg::codec::Context = encoder.deref();
    // SAFETY: `avcodec_parameters_alloc` returns a valid pointer or null
    // (only under OOM, which is unrecoverable and not checked here, matching
    // the rest of this module's treatment of allocation failure).
    // `avcodec_parameters_from_context` copies fields from a valid, open
    // encoder context — `ctx.as_ptr()` is non-null since `encoder` is alive.
    unsafe {
        let params = ffmpeg::ffi::avcodec_parameters_alloc();
        ffmpeg::ffi::avcodec_parameters_from_context(params, ctx.as_ptr());
        ffmpeg::codec::Parameters::wrap(params, None::<Rc<dyn std::any::Any>>)
    }
}

/// Same as `encoder_codec_parameters`, for a video encoder context.
pub fn encoder_codec_parameters_video(
    encoder: &ffmpeg::codec::encoder::Video,
) -> ffmpeg::codec::Parameters {
    use std::ops::Deref;
    use std::rc::Rc;
    let ctx: &ffmpeg::codec::Context = encoder.deref();
    // SAFETY: same as `encoder_codec_parameters`.
    unsafe {
        let params = ffmpeg::ffi::avcodec_parameters_alloc();
        ffmpeg::ffi::avcodec_parameters_from_context(params, ctx.as_ptr());
        ffmpeg::codec::Parameters::wrap(params, None::<Rc<dyn std::any::Any>>)
    }
}

// ── AVIO context management ──────────────────────────────────────────────────

/// Detach the `AVIOContext` (`pb`) from an `AVFormatContext` by setting it to
/// null, preventing `avformat_free_context` from double-freeing it.
///
/// Call this before dropping an `Output` whose `pb` was allocated manually
/// (e.g. via [`super::io::create_memory_io`]).
pub fn detach_avio(output: &mut ffmpeg::format::context::Output) {
    // SAFETY: `output.as_mut_ptr()` is valid for the lifetime of `output`.
    // Setting `pb` to null is the documented way to prevent double-free when
    // the caller owns the AVIO context separately.
    unsafe {
        let ctx = output.as_mut_ptr();
        if !ctx.is_null() && !(*ctx).pb.is_null() {
            (*ctx).pb = std::ptr::null_mut();
        }
    }
}

/// Copy every metadata key/value from an input format context's container
/// metadata onto an output format context, via `av_dict_copy`, skipping any
/// key present in `excluded_keys`.
///
/// `ffmpeg-next` exposes stream/format metadata for reading (`.metadata()`)
/// but not a setter on `Output`, so this reaches into the raw struct.
pub fn copy_container_metadata(
    input: &ffmpeg::format::context::Input,
    output: &mut ffmpeg::format::context::Output,
    excluded_keys: &[&str],
) {
    // SAFETY: both contexts are valid for the duration of this call; the
    // pointers are only used to reach the `metadata` field, and
    // `av_dict_copy` is the documented way to deep-copy an `AVDictionary`.
    unsafe {
        let src = input.as_ptr();
        let dst = output.as_mut_ptr();
        if src.is_null() || dst.is_null() {
            return;
        }
        ffmpeg::ffi::av_dict_copy(&mut (*dst).metadata, (*src).metadata, 0);
        for key in excluded_keys {
            let Ok(c_key) = std::ffi::CString::new(*key) else {
                continue;
            };
            ffmpeg::ffi::av_dict_set(&mut (*dst).metadata, c_key.as_ptr(), std::ptr::null(), 0);
        }
    }
}

/// Derive an audio packet's duration from its codec parameters
/// (`av_get_audio_frame_duration2`), for streams whose packets arrive with
/// no duration of their own. `frame_bytes` is the packet's coded size, `0`
/// if unknown. Returns `0` if no duration could be derived (e.g. a codec
/// with no fixed frame size and unknown bit rate); the caller falls back to
/// `codecpar.frame_size` in that case.
pub fn audio_frame_duration(params: &ffmpeg::codec::parameters::Parameters, frame_bytes: i32) -> i32 {
    // SAFETY: `params.as_ptr()` is a valid non-null pointer for the lifetime
    // of `params`; `av_get_audio_frame_duration2` only reads it.
    unsafe { ffmpeg::ffi::av_get_audio_frame_duration2(params.as_ptr() as *mut _, frame_bytes) }
}

// ── Filter buffersink introspection ─────────────────────────────────────────
//
// `ffmpeg-next`'s filter module exposes pushing/pulling frames through a
// buffersink but not the sink's own negotiated parameters, so these reach
// into the raw `AVFilterContext` the same way the rest of this module
// reaches into structs `ffmpeg-next` doesn't fully wrap.

/// Raw color-space/color-range pair reported by a buffersink, as the
/// underlying `AVColorSpace`/`AVColorRange` integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorProperties {
    pub space: i32,
    pub range: i32,
}

/// The framerate a video buffersink has negotiated, used to fill in a
/// missing packet duration (spec.md §4.3, "Timestamp handling").
pub fn buffersink_frame_rate(ctx: &ffmpeg::filter::context::Sink) -> ffmpeg::Rational {
    // SAFETY: `ctx.as_ptr()` is valid for the lifetime of `ctx`, which wraps
    // a live `AVFilterContext` of type buffersink/abuffersink.
    unsafe { ffmpeg::ffi::av_buffersink_get_frame_rate(ctx.as_ptr() as *mut _) }
}

/// The timebase a buffersink has negotiated; every output frame's `pts` is
/// expressed in this unit (spec.md §4.3).
pub fn buffersink_time_base(ctx: &ffmpeg::filter::context::Sink) -> ffmpeg::Rational {
    // SAFETY: see `buffersink_frame_rate`.
    unsafe { ffmpeg::ffi::av_buffersink_get_time_base(ctx.as_ptr() as *mut _) }
}

/// The sample aspect ratio a video buffersink has negotiated.
pub fn buffersink_sample_aspect_ratio(ctx: &ffmpeg::filter::context::Sink) -> ffmpeg::Rational {
    // SAFETY: see `buffersink_frame_rate`.
    unsafe { ffmpeg::ffi::av_buffersink_get_sample_aspect_ratio(ctx.as_ptr() as *mut _) }
}

/// The pixel format a video buffersink has negotiated.
pub fn buffersink_pixel_format(ctx: &ffmpeg::filter::context::Sink) -> ffmpeg::util::format::pixel::Pixel {
    // SAFETY: see `buffersink_frame_rate`.
    let raw = unsafe { ffmpeg::ffi::av_buffersink_get_format(ctx.as_ptr() as *mut _) };
    ffmpeg::util::format::pixel::Pixel::from(raw)
}

/// The sample format a audio buffersink has negotiated.
pub fn buffersink_sample_format(ctx: &ffmpeg::filter::context::Sink) -> ffmpeg::util::format::sample::Sample {
    // SAFETY: see `buffersink_frame_rate`.
    let raw = unsafe { ffmpeg::ffi::av_buffersink_get_format(ctx.as_ptr() as *mut _) };
    ffmpeg::util::format::sample::Sample::from(raw)
}

/// `(width, height)` a video buffersink has negotiated.
pub fn buffersink_dimensions(ctx: &ffmpeg::filter::context::Sink) -> (u32, u32) {
    // SAFETY: see `buffersink_frame_rate`.
    unsafe {
        let w = ffmpeg::ffi::av_buffersink_get_w(ctx.as_ptr() as *mut _);
        let h = ffmpeg::ffi::av_buffersink_get_h(ctx.as_ptr() as *mut _);
        (w as u32, h as u32)
    }
}

/// The sample rate an audio buffersink has negotiated.
pub fn buffersink_sample_rate(ctx: &ffmpeg::filter::context::Sink) -> u32 {
    // SAFETY: see `buffersink_frame_rate`.
    unsafe { ffmpeg::ffi::av_buffersink_get_sample_rate(ctx.as_ptr() as *mut _) as u32 }
}

/// The channel layout an audio buffersink has negotiated.
pub fn buffersink_channel_layout(ctx: &ffmpeg::filter::context::Sink) -> ffmpeg::util::channel_layout::ChannelLayout {
    // SAFETY: see `buffersink_frame_rate`. `av_buffersink_get_channel_layout`
    // returns the legacy bitmask form, which every channel layout negotiable
    // through `abuffersink` (no custom/ambisonic layouts) can round-trip
    // through.
    let raw = unsafe { ffmpeg::ffi::av_buffersink_get_channel_layout(ctx.as_ptr() as *mut _) };
    ffmpeg::util::channel_layout::ChannelLayout::from_bits_truncate(raw)
}

/// The color space/range a video buffersink has negotiated.
pub fn buffersink_color_properties(ctx: &ffmpeg::filter::context::Sink) -> ColorProperties {
    // SAFETY: see `buffersink_frame_rate`.
    unsafe {
        ColorProperties {
            space: ffmpeg::ffi::av_buffersink_get_colorspace(ctx.as_ptr() as *mut _) as i32,
            range: ffmpeg::ffi::av_buffersink_get_color_range(ctx.as_ptr() as *mut _) as i32,
        }
    }
}

/// Send a runtime command to one or more filters in a graph (e.g.
/// `avfilter_graph_send_command` for `drawtext`'s `reinit`), returning the
/// filter's text response. `target` may be a filter instance name or `"all"`.
pub fn graph_send_command(
    graph: &mut ffmpeg::filter::Graph,
    target: &str,
    cmd: &str,
    arg: &str,
) -> std::result::Result<String, String> {
    let c_target = std::ffi::CString::new(target).map_err(|e| e.to_string())?;
    let c_cmd = std::ffi::CString::new(cmd).map_err(|e| e.to_string())?;
    let c_arg = std::ffi::CString::new(arg).map_err(|e| e.to_string())?;
    let mut response = vec![0u8; 512];
    // SAFETY: `graph.as_mut_ptr()` is a valid, non-null pointer for the
    // lifetime of `graph`. The response buffer is sized and its length
    // passed together, satisfying `avfilter_graph_send_command`'s contract.
    let ret = unsafe {
        ffmpeg::ffi::avfilter_graph_send_command(
            graph.as_mut_ptr(),
            c_target.as_ptr(),
            c_cmd.as_ptr(),
            c_arg.as_ptr(),
            response.as_mut_ptr() as *mut i8,
            response.len() as i32,
            0,
        )
    };
    if ret < 0 {
        return Err(format!("avfilter_graph_send_command failed: {}", ret));
    }
    let end = response.iter().position(|&b| b == 0).unwrap_or(response.len());
    Ok(String::from_utf8_lossy(&response[..end]).into_owned())
}

/// Queue a command to be applied at timestamp `ts` seconds
/// (`avfilter_graph_queue_command`), for filters that support deferred
/// parameter changes.
pub fn graph_queue_command(
    graph: &mut ffmpeg::filter::Graph,
    target: &str,
    cmd: &str,
    arg: &str,
    ts: f64,
) -> std::result::Result<(), String> {
    let c_target = std::ffi::CString::new(target).map_err(|e| e.to_string())?;
    let c_cmd = std::ffi::CString::new(cmd).map_err(|e| e.to_string())?;
    let c_arg = std::ffi::CString::new(arg).map_err(|e| e.to_string())?;
    // SAFETY: `graph.as_mut_ptr()` is valid for the lifetime of `graph`.
    let ret = unsafe {
        ffmpeg::ffi::avfilter_graph_queue_command(
            graph.as_mut_ptr(),
            c_target.as_ptr(),
            c_cmd.as_ptr(),
            c_arg.as_ptr(),
            0,
            ts,
        )
    };
    if ret < 0 {
        return Err(format!("avfilter_graph_queue_command failed: {}", ret));
    }
    Ok(())
}

// ── Codec lookup ─────────────────────────────────────────────────────────────

/// Returns `true` if a decoder is registered for `codec_id`.
pub fn decoder_exists(codec_id: ffmpeg::codec::Id) -> bool {
    // SAFETY: `avcodec_find_decoder` is thread-safe (reads a global read-only
    // registry after `ffmpeg::init()`). The returned pointer is only used
    // for a null check; it is never dereferenced.
    let ptr = unsafe { ffmpeg::ffi::avcodec_find_decoder(codec_id.into()) };
    !ptr.is_null()
}

// ── Hardware device/frames context propagation ──────────────────────────────

/// Attach a hardware device context to a decoder or encoder context, as
/// required before `open2` for hardware-accelerated codecs.
///
/// `device_ctx` must be a valid `AVBufferRef` produced by
/// `av_hwdevice_ctx_create` (not exposed by `ffmpeg-next`); ownership is
/// transferred to the codec context via an internal reference, so the caller
/// retains their own reference and must free it independently.
pub fn set_hw_device_ctx(
    ctx: &mut ffmpeg::codec::Context,
    device_ctx: *mut ffmpeg::ffi::AVBufferRef,
) {
    // SAFETY: `ctx.as_mut_ptr()` is valid for the lifetime of `ctx`.
    // `av_buffer_ref` takes its own reference to `device_ctx`, so the
    // pointer does not need to outlive this call; `ctx` is responsible for
    // freeing its own reference when closed.
    unsafe {
        let c = ctx.as_mut_ptr();
        if !(*c).hw_device_ctx.is_null() {
            ffmpeg::ffi::av_buffer_unref(&mut (*c).hw_device_ctx);
        }
        (*c).hw_device_ctx = ffmpeg::ffi::av_buffer_ref(device_ctx);
    }
}

/// Attach a hardware frames context (`AVBufferRef` wrapping an
/// `AVHWFramesContext`) to an encoder context, required for encoders that
/// consume hardware frames directly (e.g. encoding decoded GPU surfaces
/// without a download round-trip).
pub fn set_hw_frames_ctx(
    ctx: &mut ffmpeg::codec::Context,
    frames_ctx: *mut ffmpeg::ffi::AVBufferRef,
) {
    // SAFETY: same reasoning as `set_hw_device_ctx`.
    unsafe {
        let c = ctx.as_mut_ptr();
        if !(*c).hw_frames_ctx.is_null() {
            ffmpeg::ffi::av_buffer_unref(&mut (*c).hw_frames_ctx);
        }
        (*c).hw_frames_ctx = ffmpeg::ffi::av_buffer_ref(frames_ctx);
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Override codec fields on an `AVCodecParameters` for testing purposes.
#[cfg(test)]
pub fn codec_params_set_for_test(
    params: &mut ffmpeg::codec::parameters::Parameters,
    codec_id: ffmpeg::ffi::AVCodecID,
    frame_size: i32,
    bit_rate: i64,
) {
    // SAFETY: `params.as_mut_ptr()` is valid for the lifetime of `params`.
    // These are plain scalar fields with no ownership semantics. This
    // function is only compiled in test builds.
    unsafe {
        let p = params.as_mut_ptr();
        (*p).codec_id = codec_id;
        (*p).frame_size = frame_size;
        (*p).bit_rate = bit_rate;
    }
}

/// Override `sample_rate` on an `AVCodecParameters` for testing purposes.
#[cfg(test)]
pub fn codec_params_set_sample_rate_for_test(
    params: &mut ffmpeg::codec::parameters::Parameters,
    sample_rate: i32,
) {
    // SAFETY: see `codec_params_set_for_test`.
    unsafe {
        (*params.as_mut_ptr()).sample_rate = sample_rate;
    }
}

// ── Planar audio plane reinterpretation ─────────────────────────────────────

/// Reinterpret a raw byte slice from a planar float32 (FLTP) audio plane as
/// `&[f32]`. Returns `None` if the pointer is not 4-byte aligned or the
/// slice is shorter than `sample_count * 4` bytes.
pub fn fltp_plane_as_f32(byte_slice: &[u8], sample_count: usize) -> Option<&[f32]> {
    let expected_bytes = sample_count.checked_mul(4)?;
    if byte_slice.len() < expected_bytes {
        return None;
    }
    let ptr = byte_slice.as_ptr();
    if (ptr as usize) % std::mem::align_of::<f32>() != 0 {
        return None;
    }
    // SAFETY: alignment and length are verified above. FLTP planes are
    // native-endian f32 values laid out contiguously.
    Some(unsafe { std::slice::from_raw_parts(ptr as *const f32, sample_count) })
}

/// Mutable counterpart of [`fltp_plane_as_f32`].
pub fn fltp_plane_as_f32_mut(byte_slice: &mut [u8], sample_count: usize) -> Option<&mut [f32]> {
    let expected_bytes = sample_count.checked_mul(4)?;
    if byte_slice.len() < expected_bytes {
        return None;
    }
    let ptr = byte_slice.as_mut_ptr();
    if (ptr as usize) % std::mem::align_of::<f32>() != 0 {
        return None;
    }
    // SAFETY: same as `fltp_plane_as_f32`.
    Some(unsafe { std::slice::from_raw_parts_mut(ptr as *mut f32, sample_count) })
}

/// Extract an audio data plane from an `AVFrame`.
///
/// Works around `ffmpeg-next`'s `Audio::data(index)` stopping at the first
/// plane with `linesize[1] == 0` — planar audio frames in libav populate
/// only `linesize[0]` to describe the size of every plane.
pub fn audio_plane_data(frame: &ffmpeg::util::frame::Audio, index: usize) -> &[u8] {
    // SAFETY: `frame.as_ptr()` is valid and non-null for the lifetime of
    // `frame`. `extended_data` is an array of `nb_channels` (planar) or 1
    // (packed) plane pointers, each `linesize[0]` bytes long; both are read
    // directly off the live frame without retaining the pointer afterward.
    unsafe {
        let f = frame.as_ptr();
        let channels = (*f).ch_layout.nb_channels as usize;

        let is_planar = frame.format().is_planar();
        if is_planar {
            if index >= channels {
                return &[];
            }
        } else if index > 0 {
            return &[];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &[];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &[];
        }

        let size = (*f).linesize[0] as usize;
        std::slice::from_raw_parts(plane_ptr, size)
    }
}

/// Mutable counterpart of [`audio_plane_data`].
pub fn audio_plane_data_mut(frame: &mut ffmpeg::util::frame::Audio, index: usize) -> &mut [u8] {
    // SAFETY: same reasoning as `audio_plane_data`, with a mutable frame
    // pointer obtained from an exclusive borrow.
    unsafe {
        let f = frame.as_mut_ptr();
        let channels = (*f).ch_layout.nb_channels as usize;

        let is_planar = frame.format().is_planar();
        if is_planar {
            if index >= channels {
                return &mut [];
            }
        } else if index > 0 {
            return &mut [];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &mut [];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &mut [];
        }

        let size = (*f).linesize[0] as usize;
        std::slice::from_raw_parts_mut(plane_ptr, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fltp_rejects_short_slice() {
        let buf = [0u8; 7];
        assert!(fltp_plane_as_f32(&buf, 2).is_none());
    }

    #[test]
    fn fltp_accepts_aligned_slice() {
        let buf = [0u8; 8];
        assert!(fltp_plane_as_f32(&buf, 2).is_some());
    }
}
