//! Single-input, single-output filter graph (C3): one source stream through
//! a libavfilter description like `"aresample=48000,aformat=sample_fmts=fltp"`
//! (audio) or `"scale=1280:-2,fps=30"` (video).

use ffmpeg_next as ffmpeg;

use crate::codec::{CodecStatus, SendReceive};
use crate::error::{CodecError, PipelineError, Result};
use crate::ffmpeg_utils::helpers;
use crate::filter::{InputParams, ParameterChangePolicy};

/// A frame pushed through or pulled out of a [`FilterGraph`]. Audio and
/// video share the same send/receive adapter since the graph machinery is
/// identical between them; only the buffer-source arguments and sink
/// getters differ.
#[derive(Debug, Clone)]
pub enum FilterFrame {
    Audio(ffmpeg::util::frame::Audio),
    Video(ffmpeg::util::frame::Video),
}

impl FilterFrame {
    fn input_params(&self) -> InputParams {
        match self {
            FilterFrame::Audio(f) => InputParams::of_audio_frame(f),
            FilterFrame::Video(f) => InputParams::of_video_frame(f),
        }
    }

    /// Rescale this frame's `pts`/`duration` from its own declared timebase
    /// into `target_tb` and stamp its timebase with `target_tb`, matching
    /// spec.md §4.3's "Timestamp handling": every frame pushed into a graph
    /// must be expressed in the graph's computed input timebase, not
    /// whatever timebase its producer happened to use.
    ///
    /// A zero source timebase (frame never had one set) is left alone —
    /// there is nothing to rescale from.
    fn rescale_to(&mut self, target_tb: ffmpeg::Rational) {
        use crate::ffmpeg_utils::utils::rescale_ts;

        match self {
            FilterFrame::Audio(f) => {
                let src_tb = helpers::audio_frame_time_base(f);
                if src_tb.0 != 0 {
                    if let Some(pts) = f.pts() {
                        f.set_pts(Some(rescale_ts(pts, src_tb, target_tb)));
                    }
                    let duration = helpers::audio_frame_raw_duration(f);
                    if duration != 0 {
                        helpers::audio_frame_set_raw_duration(f, rescale_ts(duration, src_tb, target_tb));
                    }
                }
                helpers::audio_frame_set_time_base(f, target_tb);
            }
            FilterFrame::Video(f) => {
                let src_tb = helpers::video_frame_time_base(f);
                if src_tb.0 != 0 {
                    if let Some(pts) = f.pts() {
                        f.set_pts(Some(rescale_ts(pts, src_tb, target_tb)));
                    }
                    let duration = helpers::video_frame_duration(f);
                    if duration != 0 {
                        helpers::video_frame_set_duration(f, rescale_ts(duration, src_tb, target_tb));
                    }
                }
                helpers::video_frame_set_time_base(f, target_tb);
            }
        }
    }
}

/// How a video input's timebase is derived (spec.md §4.3, "Lazy
/// initialization").
#[derive(Debug, Clone, Copy)]
pub enum VideoTiming {
    /// Constant framerate: the input timebase is `1 / framerate`.
    Cfr(ffmpeg::Rational),
    /// Variable framerate: the input timebase is supplied directly, taken
    /// from the frame's own timebase by the caller.
    Vfr(ffmpeg::Rational),
}

impl VideoTiming {
    fn time_base(&self) -> ffmpeg::Rational {
        match *self {
            VideoTiming::Cfr(framerate) => ffmpeg::Rational(framerate.1, framerate.0),
            VideoTiming::Vfr(time_base) => time_base,
        }
    }

    fn framerate_hint(&self) -> Option<ffmpeg::Rational> {
        match *self {
            VideoTiming::Cfr(framerate) => Some(framerate),
            VideoTiming::Vfr(_) => None,
        }
    }
}

enum Kind {
    Audio { time_base: ffmpeg::Rational },
    Video { timing: VideoTiming },
}

/// A single-chain audio or video filter graph, built lazily from the first
/// frame it sees so the buffer source can be configured with the real
/// format/rate/dimensions/layout rather than a caller-guessed one.
pub struct FilterGraph {
    description: String,
    policy: ParameterChangePolicy,
    kind: Kind,
    graph: Option<ffmpeg::filter::Graph>,
    built_params: Option<InputParams>,
}

impl FilterGraph {
    /// `description` is a libavfilter filter-chain string, e.g.
    /// `"volume=2.0"` or `"aresample=48000"` — this adapter supplies the
    /// `abuffer`/`abuffersink` endpoints itself.
    pub fn new_audio(description: impl Into<String>, time_base: ffmpeg::Rational) -> Self {
        Self {
            description: description.into(),
            policy: ParameterChangePolicy::Fail,
            kind: Kind::Audio { time_base },
            graph: None,
            built_params: None,
        }
    }

    /// `description` is a libavfilter filter-chain string for video, e.g.
    /// `"scale=1280:-2"`. `timing` selects CFR (`1 / framerate`) or VFR (the
    /// frame's own timebase) input timebase derivation.
    pub fn new_video(description: impl Into<String>, timing: VideoTiming) -> Self {
        Self {
            description: description.into(),
            policy: ParameterChangePolicy::Fail,
            kind: Kind::Video { timing },
            graph: None,
            built_params: None,
        }
    }

    pub fn with_policy(mut self, policy: ParameterChangePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn input_time_base(&self) -> ffmpeg::Rational {
        match &self.kind {
            Kind::Audio { time_base } => *time_base,
            Kind::Video { timing } => timing.time_base(),
        }
    }

    fn build(&mut self, params: &InputParams) -> Result<()> {
        let time_base = self.input_time_base();
        let (src_filter, sink_filter, args) = match params {
            InputParams::Audio {
                format,
                rate,
                channel_layout,
            } => {
                if !matches!(self.kind, Kind::Audio { .. }) {
                    return Err(PipelineError::Codec(CodecError::FilterInit(
                        "graph configured for video received an audio frame".into(),
                    )));
                }
                (
                    "abuffer",
                    "abuffersink",
                    format!(
                        "time_base={}/{}:sample_rate={}:sample_fmt={}:channel_layout=0x{:x}",
                        time_base.0,
                        time_base.1,
                        rate,
                        format.name(),
                        channel_layout.bits()
                    ),
                )
            }
            InputParams::Video {
                format,
                width,
                height,
            } => {
                let Kind::Video { timing } = &self.kind else {
                    return Err(PipelineError::Codec(CodecError::FilterInit(
                        "graph configured for audio received a video frame".into(),
                    )));
                };
                if let VideoTiming::Cfr(framerate) = timing {
                    if framerate.0 == 0 {
                        return Err(PipelineError::Codec(CodecError::FilterInit(
                            "CFR video graph requires a non-zero framerate".into(),
                        )));
                    }
                }
                (
                    "buffer",
                    "buffersink",
                    format!(
                        "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect=1/1",
                        width,
                        height,
                        format.descriptor().map(|d| d.name()).unwrap_or("yuv420p"),
                        time_base.0,
                        time_base.1,
                    ),
                )
            }
        };

        let mut graph = ffmpeg::filter::Graph::new();

        graph
            .add(
                ffmpeg::filter::find(src_filter).ok_or_else(|| {
                    PipelineError::Codec(CodecError::FilterInit(format!(
                        "{} filter missing",
                        src_filter
                    )))
                })?,
                "in",
                &args,
            )
            .map_err(|e| {
                PipelineError::Codec(CodecError::FilterInit(format!(
                    "failed to add {} source: {}",
                    src_filter, e
                )))
            })?;

        graph
            .add(
                ffmpeg::filter::find(sink_filter).ok_or_else(|| {
                    PipelineError::Codec(CodecError::FilterInit(format!(
                        "{} filter missing",
                        sink_filter
                    )))
                })?,
                "out",
                "",
            )
            .map_err(|e| {
                PipelineError::Codec(CodecError::FilterInit(format!(
                    "failed to add {}: {}",
                    sink_filter, e
                )))
            })?;

        graph
            .output("in", 0)
            .and_then(|p| p.input("out", 0))
            .and_then(|p| p.parse(&self.description))
            .map_err(|e| {
                PipelineError::Codec(CodecError::FilterInit(format!(
                    "failed to parse filter chain {:?}: {}",
                    self.description, e
                )))
            })?;

        graph.validate().map_err(|e| {
            PipelineError::Codec(CodecError::FilterInit(format!(
                "filter graph validation failed: {}",
                e
            )))
        })?;

        self.graph = Some(graph);
        self.built_params = Some(params.clone());
        Ok(())
    }

    /// Rescale `frame` into the graph's computed input timebase and push it
    /// into the `in` buffersrc pad with the push/keep-ref flags (spec.md
    /// §4.3). Shared by `filter_frame` and the `SendReceive::send` adapter.
    fn push_frame(&mut self, frame: &FilterFrame) -> Result<()> {
        let target_tb = self.input_time_base();
        let mut prepared = frame.clone();
        prepared.rescale_to(target_tb);

        let graph = self.graph.as_mut().expect("graph built above");
        let mut source = graph.get("in").expect("source pad added in build()").source();
        let result = match &mut prepared {
            FilterFrame::Audio(f) => {
                helpers::buffersrc_add_frame_with_flags(&mut source, f.as_mut_ptr())
            }
            FilterFrame::Video(f) => {
                helpers::buffersrc_add_frame_with_flags(&mut source, f.as_mut_ptr())
            }
        };
        result.map_err(|e| {
            PipelineError::Codec(CodecError::FilterInit(format!(
                "buffersrc add frame failed: {}",
                e
            )))
        })
    }

    /// Push one frame through the graph, returning every filtered frame it
    /// immediately produces.
    ///
    /// Builds the graph lazily on the first call. On later calls, if the
    /// frame's parameters have drifted from the ones the graph was built
    /// against, applies `self.policy`.
    pub fn filter_frame(&mut self, frame: FilterFrame) -> Result<Vec<FilterFrame>> {
        let params = frame.input_params();

        if self.graph.is_none() {
            self.build(&params)?;
        } else if self.built_params.as_ref() != Some(&params) {
            match self.policy {
                ParameterChangePolicy::DropChanged => return Ok(vec![]),
                ParameterChangePolicy::Fail => {
                    return Err(PipelineError::Codec(CodecError::ParameterChange(format!(
                        "input parameters changed: {:?} -> {:?}",
                        self.built_params, params
                    ))))
                }
                ParameterChangePolicy::Reinit => {
                    self.build(&params)?;
                }
            }
        }

        self.push_frame(&frame)?;

        self.drain()
    }

    /// Pull every frame currently buffered at the sink. Stops at the first
    /// `NeedMoreInput`/`EndOfStream`, never loses a buffered frame the way
    /// taking only the last result of a batch pull would.
    fn drain(&mut self) -> Result<Vec<FilterFrame>> {
        let mut out = Vec::new();
        loop {
            match self.pull_one()? {
                CodecStatus::Output(frame) => out.push(frame),
                CodecStatus::NeedMoreInput | CodecStatus::EndOfStream => break,
            }
        }
        Ok(out)
    }

    /// Pull a single frame from the sink, if one is ready.
    fn pull_one(&mut self) -> Result<CodecStatus<FilterFrame>> {
        let is_video = matches!(self.kind, Kind::Video { .. });
        let framerate_hint = match &self.kind {
            Kind::Video { timing } => timing.framerate_hint(),
            Kind::Audio { .. } => None,
        };
        let graph = self.graph.as_mut().expect("graph built before drain");
        let mut sink = graph.get("out").expect("sink pad added in build()").sink();

        if is_video {
            let mut filtered = ffmpeg::util::frame::Video::empty();
            match sink.frame(&mut filtered) {
                Ok(()) => {
                    if helpers::video_frame_duration(&filtered) == 0 {
                        let rate = framerate_hint.unwrap_or_else(|| helpers::buffersink_frame_rate(&sink));
                        if rate.0 != 0 {
                            let time_base = helpers::buffersink_time_base(&sink);
                            let inv_rate = ffmpeg::Rational(rate.1, rate.0);
                            let duration = crate::ffmpeg_utils::utils::rescale_ts(1, inv_rate, time_base);
                            helpers::video_frame_set_duration(&mut filtered, duration);
                        }
                    }
                    Ok(CodecStatus::Output(FilterFrame::Video(filtered)))
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    Ok(CodecStatus::NeedMoreInput)
                }
                Err(ffmpeg::Error::Eof) => Ok(CodecStatus::EndOfStream),
                Err(e) => Err(PipelineError::Codec(CodecError::FilterInit(format!(
                    "buffersink get frame failed: {}",
                    e
                )))),
            }
        } else {
            let mut filtered = ffmpeg::util::frame::Audio::empty();
            match sink.frame(&mut filtered) {
                Ok(()) => Ok(CodecStatus::Output(FilterFrame::Audio(filtered))),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    Ok(CodecStatus::NeedMoreInput)
                }
                Err(ffmpeg::Error::Eof) => Ok(CodecStatus::EndOfStream),
                Err(e) => Err(PipelineError::Codec(CodecError::FilterInit(format!(
                    "buffersink get frame failed: {}",
                    e
                )))),
            }
        }
    }

    /// Signal end-of-stream to the graph and drain any remaining frames.
    pub fn flush(&mut self) -> Result<Vec<FilterFrame>> {
        if self.graph.is_none() {
            return Ok(vec![]);
        }
        {
            let graph = self.graph.as_mut().expect("checked above");
            graph
                .get("in")
                .expect("source pad added in build()")
                .source()
                .flush()
                .ok();
        }
        self.drain()
    }

    /// Send a runtime command to one or more filters in the graph (e.g.
    /// `drawtext`'s `reinit`), returning the filter's text response.
    pub fn send_command(&mut self, target: &str, cmd: &str, arg: &str) -> Result<String> {
        let graph = self.graph.as_mut().ok_or_else(|| {
            PipelineError::Codec(CodecError::FilterInit(
                "graph not yet built — push a frame first".into(),
            ))
        })?;
        helpers::graph_send_command(graph, target, cmd, arg)
            .map_err(|e| PipelineError::Codec(CodecError::FilterInit(e)))
    }

    /// Queue a command to be applied at timestamp `ts` seconds.
    pub fn queue_command(&mut self, target: &str, cmd: &str, arg: &str, ts: f64) -> Result<()> {
        let graph = self.graph.as_mut().ok_or_else(|| {
            PipelineError::Codec(CodecError::FilterInit(
                "graph not yet built — push a frame first".into(),
            ))
        })?;
        helpers::graph_queue_command(graph, target, cmd, arg, ts)
            .map_err(|e| PipelineError::Codec(CodecError::FilterInit(e)))
    }

    /// The parameters the graph was built against (the *input* side).
    pub fn built_params(&self) -> Option<&InputParams> {
        self.built_params.as_ref()
    }

    /// Run `f` against the sink pad's current view, if the graph has been
    /// built. Introspection getters go through this instead of returning a
    /// borrowed `Sink` themselves, since its lifetime is tied to a context
    /// fetched fresh from the graph on every call.
    fn with_sink<T>(&mut self, f: impl FnOnce(&ffmpeg::filter::context::Sink) -> T) -> Option<T> {
        let mut ctx = self.graph.as_mut()?.get("out")?;
        Some(f(&ctx.sink()))
    }

    /// The output's negotiated timebase, once the graph has been built.
    pub fn output_time_base(&mut self) -> Option<ffmpeg::Rational> {
        self.with_sink(helpers::buffersink_time_base)
    }

    /// The output's negotiated framerate (video only).
    pub fn output_frame_rate(&mut self) -> Option<ffmpeg::Rational> {
        self.with_sink(helpers::buffersink_frame_rate)
    }

    /// The output's negotiated sample aspect ratio (video only).
    pub fn output_sample_aspect_ratio(&mut self) -> Option<ffmpeg::Rational> {
        self.with_sink(helpers::buffersink_sample_aspect_ratio)
    }

    /// The output's negotiated pixel format (video only).
    pub fn output_pixel_format(&mut self) -> Option<ffmpeg::util::format::pixel::Pixel> {
        self.with_sink(helpers::buffersink_pixel_format)
    }

    /// The output's negotiated `(width, height)` (video only).
    pub fn output_dimensions(&mut self) -> Option<(u32, u32)> {
        self.with_sink(helpers::buffersink_dimensions)
    }

    /// The output's negotiated sample format (audio only).
    pub fn output_sample_format(&mut self) -> Option<ffmpeg::util::format::sample::Sample> {
        self.with_sink(helpers::buffersink_sample_format)
    }

    /// The output's negotiated sample rate (audio only).
    pub fn output_sample_rate(&mut self) -> Option<u32> {
        self.with_sink(helpers::buffersink_sample_rate)
    }

    /// The output's negotiated channel layout (audio only).
    pub fn output_channel_layout(&mut self) -> Option<ffmpeg::util::channel_layout::ChannelLayout> {
        self.with_sink(helpers::buffersink_channel_layout)
    }

    /// The output's negotiated color space/range (video only).
    pub fn output_color_properties(&mut self) -> Option<helpers::ColorProperties> {
        self.with_sink(helpers::buffersink_color_properties)
    }
}

impl SendReceive for FilterGraph {
    type Input = FilterFrame;
    type Output = FilterFrame;

    fn send(&mut self, input: &Self::Input) -> Result<()> {
        let params = input.input_params();
        if self.graph.is_none() {
            self.build(&params)?;
        } else if self.built_params.as_ref() != Some(&params) {
            match self.policy {
                ParameterChangePolicy::DropChanged => return Ok(()),
                ParameterChangePolicy::Fail => {
                    return Err(PipelineError::Codec(CodecError::ParameterChange(format!(
                        "input parameters changed: {:?} -> {:?}",
                        self.built_params, params
                    ))))
                }
                ParameterChangePolicy::Reinit => self.build(&params)?,
            }
        }

        self.push_frame(input)
    }

    fn send_eof(&mut self) -> Result<()> {
        if let Some(graph) = self.graph.as_mut() {
            graph
                .get("in")
                .expect("source pad added in build()")
                .source()
                .flush()
                .ok();
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<CodecStatus<Self::Output>> {
        if self.graph.is_none() {
            return Ok(CodecStatus::NeedMoreInput);
        }
        self.pull_one()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_frame_rejected_by_video_graph() {
        let mut graph = FilterGraph::new_video("null", VideoTiming::Cfr(ffmpeg::Rational::new(30, 1)));
        let audio_params = InputParams::Audio {
            format: ffmpeg::util::format::sample::Sample::F32(
                ffmpeg::util::format::sample::Type::Planar,
            ),
            rate: 48_000,
            channel_layout: ffmpeg::util::channel_layout::ChannelLayout::STEREO,
        };
        let err = graph.build(&audio_params).unwrap_err();
        assert!(matches!(err, PipelineError::Codec(CodecError::FilterInit(_))));
    }

    #[test]
    fn cfr_with_zero_framerate_is_rejected() {
        let mut graph = FilterGraph::new_video("null", VideoTiming::Cfr(ffmpeg::Rational::new(0, 1)));
        let video_params = InputParams::Video {
            format: ffmpeg::util::format::pixel::Pixel::YUV420P,
            width: 1920,
            height: 1080,
        };
        let err = graph.build(&video_params).unwrap_err();
        assert!(matches!(err, PipelineError::Codec(CodecError::FilterInit(_))));
    }
}
