//! Filter complex graph (C4): an arbitrary multi-input, multi-output
//! libavfilter graph (e.g. `overlay`, `amix`) addressed by named pads
//! instead of the single implicit in/out pair `FilterGraph` assumes.
//!
//! Construction is deferred until every declared input pad has received at
//! least one frame (spec.md §4.4): frames pushed before that point are
//! cloned and queued per input rather than driving the graph, since the
//! buffersrc args string for any one pad can be built immediately but
//! `parse`/`validate` need every pad wired first.
#![allow(dead_code)]

use std::collections::HashMap;

use ffmpeg_next as ffmpeg;

use crate::error::{CodecError, PipelineError, Result};
use crate::filter::{InputParams, ParameterChangePolicy};

/// One frame queued on an input pad before the graph is built.
enum QueuedFrame {
    Audio(ffmpeg::util::frame::Audio),
    Video(ffmpeg::util::frame::Video),
}

/// One named source pad fed into the graph (`abuffer`/`buffer`).
struct InputPad {
    label: String,
    is_video: bool,
    time_base: ffmpeg::Rational,
    params: Option<InputParams>,
    queued: Vec<QueuedFrame>,
}

/// One named sink pad drained from the graph (`buffersink`/`abuffersink`).
/// The media type is declared by the caller, not inferred from the
/// description string — a video-output label is frequently also bracketed
/// elsewhere in the description (e.g. as an `amix`/`overlay` input further
/// down a chain), so a substring test on the description can't tell
/// `buffersink` from `abuffersink` apart.
struct OutputPad {
    label: String,
    is_video: bool,
}

/// A complete libavfilter graph description with explicit named inputs and
/// outputs, for topologies `FilterGraph` can't express (multiple sources,
/// multiple sinks, or both).
pub struct FilterComplexGraph {
    description: String,
    policy: ParameterChangePolicy,
    inputs: Vec<InputPad>,
    outputs: Vec<OutputPad>,
    graph: Option<ffmpeg::filter::Graph>,
}

impl FilterComplexGraph {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            policy: ParameterChangePolicy::Fail,
            inputs: Vec::new(),
            outputs: Vec::new(),
            graph: None,
        }
    }

    pub fn with_policy(mut self, policy: ParameterChangePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Declare an audio input pad named `label` (must match a `[label]` tag
    /// referenced by `description`).
    pub fn add_audio_input(mut self, label: impl Into<String>, time_base: ffmpeg::Rational) -> Self {
        self.inputs.push(InputPad {
            label: label.into(),
            is_video: false,
            time_base,
            params: None,
            queued: Vec::new(),
        });
        self
    }

    /// Declare a video input pad named `label`.
    pub fn add_video_input(mut self, label: impl Into<String>, time_base: ffmpeg::Rational) -> Self {
        self.inputs.push(InputPad {
            label: label.into(),
            is_video: true,
            time_base,
            params: None,
            queued: Vec::new(),
        });
        self
    }

    /// Declare a video output pad named `label` (wired to `buffersink`).
    pub fn add_video_output(mut self, label: impl Into<String>) -> Self {
        self.outputs.push(OutputPad {
            label: label.into(),
            is_video: true,
        });
        self
    }

    /// Declare an audio output pad named `label` (wired to `abuffersink`).
    pub fn add_audio_output(mut self, label: impl Into<String>) -> Self {
        self.outputs.push(OutputPad {
            label: label.into(),
            is_video: false,
        });
        self
    }

    /// True once every declared input pad has recorded a first frame and the
    /// graph is ready to be built.
    fn all_inputs_seeded(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(|i| i.params.is_some())
    }

    /// Validate pad declarations per spec.md §4.4: at least one input and
    /// one output pad, and no label repeated on either side.
    fn validate_pads(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(PipelineError::Codec(CodecError::FilterInit(
                "filter complex graph requires at least one input pad".into(),
            )));
        }
        if self.outputs.is_empty() {
            return Err(PipelineError::Codec(CodecError::FilterInit(
                "filter complex graph requires at least one output pad".into(),
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for input in &self.inputs {
            if !seen.insert(input.label.as_str()) {
                return Err(PipelineError::Codec(CodecError::FilterInit(format!(
                    "duplicate input pad label {:?}",
                    input.label
                ))));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for output in &self.outputs {
            if !seen.insert(output.label.as_str()) {
                return Err(PipelineError::Codec(CodecError::FilterInit(format!(
                    "duplicate output pad label {:?}",
                    output.label
                ))));
            }
        }

        Ok(())
    }

    fn build(&mut self) -> Result<()> {
        self.validate_pads()?;
        let mut graph = ffmpeg::filter::Graph::new();

        for input in &self.inputs {
            let params = input.params.as_ref().ok_or_else(|| {
                PipelineError::Codec(CodecError::FilterInit(format!(
                    "no seed frame supplied for input pad {:?} before graph build",
                    input.label
                )))
            })?;

            let (filter_name, args) = match params {
                InputParams::Audio {
                    format,
                    rate,
                    channel_layout,
                } => (
                    "abuffer",
                    format!(
                        "time_base={}/{}:sample_rate={}:sample_fmt={}:channel_layout=0x{:x}",
                        input.time_base.0,
                        input.time_base.1,
                        rate,
                        format.name(),
                        channel_layout.bits()
                    ),
                ),
                InputParams::Video {
                    format,
                    width,
                    height,
                } => (
                    "buffer",
                    format!(
                        "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect=1/1",
                        width,
                        height,
                        format.descriptor().map(|d| d.name()).unwrap_or("yuv420p"),
                        input.time_base.0,
                        input.time_base.1,
                    ),
                ),
            };

            graph
                .add(
                    ffmpeg::filter::find(filter_name).ok_or_else(|| {
                        PipelineError::Codec(CodecError::FilterInit(format!(
                            "{} filter missing",
                            filter_name
                        )))
                    })?,
                    &input.label,
                    &args,
                )
                .map_err(|e| {
                    PipelineError::Codec(CodecError::FilterInit(format!(
                        "failed to add input pad {:?}: {}",
                        input.label, e
                    )))
                })?;
        }

        for output in &self.outputs {
            let sink_name = if output.is_video { "buffersink" } else { "abuffersink" };
            graph
                .add(
                    ffmpeg::filter::find(sink_name).ok_or_else(|| {
                        PipelineError::Codec(CodecError::FilterInit(format!(
                            "{} filter missing",
                            sink_name
                        )))
                    })?,
                    &output.label,
                    "",
                )
                .map_err(|e| {
                    PipelineError::Codec(CodecError::FilterInit(format!(
                        "failed to add output pad {:?}: {}",
                        output.label, e
                    )))
                })?;
        }

        graph.parse(&self.description).map_err(|e| {
            PipelineError::Codec(CodecError::FilterInit(format!(
                "failed to parse filter complex graph: {}",
                e
            )))
        })?;

        graph.validate().map_err(|e| {
            PipelineError::Codec(CodecError::FilterInit(format!(
                "filter complex graph validation failed: {}",
                e
            )))
        })?;

        self.graph = Some(graph);
        Ok(())
    }

    /// Once the graph has just been built, push every queued frame on every
    /// input pad into its buffersrc, in the order it was queued.
    fn flush_queued(&mut self) -> Result<()> {
        let labels: Vec<String> = self.inputs.iter().map(|i| i.label.clone()).collect();
        for label in labels {
            let queued = {
                let input = self.inputs.iter_mut().find(|i| i.label == label).expect("label from self.inputs");
                std::mem::take(&mut input.queued)
            };
            let graph = self.graph.as_mut().expect("graph built by caller");
            let mut source = graph
                .get(&label)
                .ok_or_else(|| {
                    PipelineError::Codec(CodecError::FilterInit(format!("no such input pad {:?}", label)))
                })?
                .source();
            for frame in queued {
                let result = match &frame {
                    QueuedFrame::Audio(f) => source.add(f),
                    QueuedFrame::Video(f) => source.add(f),
                };
                result.map_err(|e| {
                    PipelineError::Codec(CodecError::FilterInit(format!(
                        "buffersrc add queued frame on pad {:?} failed: {}",
                        label, e
                    )))
                })?;
            }
        }
        Ok(())
    }

    fn pad_mut(&mut self, label: &str) -> Result<&mut InputPad> {
        self.inputs
            .iter_mut()
            .find(|i| i.label == label)
            .ok_or_else(|| {
                PipelineError::Codec(CodecError::FilterInit(format!("no such input pad {:?}", label)))
            })
    }

    /// Push one audio frame into the named input pad.
    pub fn push_audio(&mut self, label: &str, frame: &ffmpeg::util::frame::Audio) -> Result<()> {
        let params = InputParams::of_audio_frame(frame);

        if self.graph.is_none() {
            let pad = self.pad_mut(label)?;
            if pad.params.is_none() {
                pad.params = Some(params);
            }
            pad.queued.push(QueuedFrame::Audio(frame.clone()));

            if self.all_inputs_seeded() {
                self.build()?;
                self.flush_queued()?;
            }
            return Ok(());
        }

        {
            let pad = self.pad_mut(label)?;
            if pad.params.as_ref() != Some(&params) {
                match self.policy {
                    ParameterChangePolicy::DropChanged => return Ok(()),
                    ParameterChangePolicy::Fail => {
                        return Err(PipelineError::Codec(CodecError::ParameterChange(format!(
                            "input pad {:?} parameters changed: {:?} -> {:?}",
                            label, pad.params, params
                        ))))
                    }
                    ParameterChangePolicy::Reinit => {
                        pad.params = Some(params.clone());
                        self.graph = None;
                        self.build()?;
                    }
                }
            }
        }

        let graph = self.graph.as_mut().expect("graph built above");
        graph
            .get(label)
            .ok_or_else(|| PipelineError::Codec(CodecError::FilterInit(format!("no such input pad {:?}", label))))?
            .source()
            .add(frame)
            .map_err(|e| {
                PipelineError::Codec(CodecError::FilterInit(format!(
                    "buffersrc add frame on pad {:?} failed: {}",
                    label, e
                )))
            })
    }

    /// Push one video frame into the named input pad.
    pub fn push_video(&mut self, label: &str, frame: &ffmpeg::util::frame::Video) -> Result<()> {
        let params = InputParams::of_video_frame(frame);

        if self.graph.is_none() {
            let pad = self.pad_mut(label)?;
            if pad.params.is_none() {
                pad.params = Some(params);
            }
            pad.queued.push(QueuedFrame::Video(frame.clone()));

            if self.all_inputs_seeded() {
                self.build()?;
                self.flush_queued()?;
            }
            return Ok(());
        }

        {
            let pad = self.pad_mut(label)?;
            if pad.params.as_ref() != Some(&params) {
                match self.policy {
                    ParameterChangePolicy::DropChanged => return Ok(()),
                    ParameterChangePolicy::Fail => {
                        return Err(PipelineError::Codec(CodecError::ParameterChange(format!(
                            "input pad {:?} parameters changed: {:?} -> {:?}",
                            label, pad.params, params
                        ))))
                    }
                    ParameterChangePolicy::Reinit => {
                        pad.params = Some(params.clone());
                        self.graph = None;
                        self.build()?;
                    }
                }
            }
        }

        let graph = self.graph.as_mut().expect("graph built above");
        graph
            .get(label)
            .ok_or_else(|| PipelineError::Codec(CodecError::FilterInit(format!("no such input pad {:?}", label))))?
            .source()
            .add(frame)
            .map_err(|e| {
                PipelineError::Codec(CodecError::FilterInit(format!(
                    "buffersrc add frame on pad {:?} failed: {}",
                    label, e
                )))
            })
    }

    /// Flush one input pad: signal end-of-stream on its buffersrc. Only takes
    /// effect once the graph has actually been built (it is a no-op while
    /// other inputs are still awaiting their first frame, matching spec.md's
    /// "end-of-iteration without NULL does NOT flush" asymmetry — an
    /// explicit NULL before the graph exists simply never reaches a
    /// buffersrc to flush).
    pub fn flush_input(&mut self, label: &str) -> Result<()> {
        let Some(graph) = self.graph.as_mut() else {
            return Ok(());
        };
        if let Some(mut ctx) = graph.get(label) {
            ctx.source().flush().ok();
        }
        Ok(())
    }

    /// Drain every audio frame immediately available on output pad `label`.
    pub fn pull_audio(&mut self, label: &str) -> Result<Vec<ffmpeg::util::frame::Audio>> {
        let graph = self.graph.as_mut().ok_or_else(|| {
            PipelineError::Codec(CodecError::FilterInit(
                "graph not yet built — not every input has a first frame".into(),
            ))
        })?;
        let mut sink = graph.get(label).ok_or_else(|| {
            PipelineError::Codec(CodecError::FilterInit(format!("no such output pad {:?}", label)))
        })?;
        let mut out = Vec::new();
        loop {
            let mut frame = ffmpeg::util::frame::Audio::empty();
            match sink.sink().frame(&mut frame) {
                Ok(()) => out.push(frame),
                Err(_) => break,
            }
        }
        Ok(out)
    }

    /// Drain every video frame immediately available on output pad `label`.
    pub fn pull_video(&mut self, label: &str) -> Result<Vec<ffmpeg::util::frame::Video>> {
        let graph = self.graph.as_mut().ok_or_else(|| {
            PipelineError::Codec(CodecError::FilterInit(
                "graph not yet built — not every input has a first frame".into(),
            ))
        })?;
        let mut sink = graph.get(label).ok_or_else(|| {
            PipelineError::Codec(CodecError::FilterInit(format!("no such output pad {:?}", label)))
        })?;
        let mut out = Vec::new();
        loop {
            let mut frame = ffmpeg::util::frame::Video::empty();
            match sink.sink().frame(&mut frame) {
                Ok(()) => out.push(frame),
                Err(_) => break,
            }
        }
        Ok(out)
    }

    /// Whether the graph has been built yet (every declared input has
    /// received its first frame).
    pub fn is_built(&self) -> bool {
        self.graph.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_frame(w: u32, h: u32) -> ffmpeg::util::frame::Video {
        ffmpeg::util::frame::Video::new(ffmpeg::util::format::pixel::Pixel::YUV420P, w, h)
    }

    #[test]
    fn graph_waits_for_every_input_before_building() {
        ffmpeg::init().ok();
        let mut g = FilterComplexGraph::new("[a][b]overlay=0:0[out]")
            .add_video_input("a", ffmpeg::Rational::new(1, 25))
            .add_video_input("b", ffmpeg::Rational::new(1, 25))
            .add_video_output("out");

        g.push_video("a", &video_frame(640, 480)).unwrap();
        assert!(!g.is_built(), "graph must not build until every input has a frame");
        assert!(g.pull_video("out").is_err());

        g.push_video("b", &video_frame(640, 480)).unwrap();
        assert!(g.is_built(), "graph must build once the last input arrives");
    }

    #[test]
    fn unknown_input_label_is_rejected_by_pad_lookup() {
        ffmpeg::init().ok();
        let mut g = FilterComplexGraph::new("[a]null[out]")
            .add_video_input("a", ffmpeg::Rational::new(1, 25))
            .add_video_output("out");
        assert!(g.push_video("missing", &video_frame(16, 16)).is_err());
    }

    #[test]
    fn duplicate_input_label_is_rejected_at_build() {
        ffmpeg::init().ok();
        let mut g = FilterComplexGraph::new("[a]null[out]")
            .add_video_input("a", ffmpeg::Rational::new(1, 25))
            .add_video_input("a", ffmpeg::Rational::new(1, 25))
            .add_video_output("out");
        let err = g.push_video("a", &video_frame(640, 480)).unwrap_err();
        assert!(matches!(err, PipelineError::Codec(CodecError::FilterInit(_))));
    }

    #[test]
    fn duplicate_output_label_is_rejected_at_build() {
        ffmpeg::init().ok();
        let mut g = FilterComplexGraph::new("[a]split[out][out]")
            .add_video_input("a", ffmpeg::Rational::new(1, 25))
            .add_video_output("out")
            .add_video_output("out");
        let err = g.push_video("a", &video_frame(640, 480)).unwrap_err();
        assert!(matches!(err, PipelineError::Codec(CodecError::FilterInit(_))));
    }

    #[test]
    fn empty_output_set_is_rejected_at_build() {
        ffmpeg::init().ok();
        let mut g =
            FilterComplexGraph::new("[a]null[out]").add_video_input("a", ffmpeg::Rational::new(1, 25));
        let err = g.push_video("a", &video_frame(640, 480)).unwrap_err();
        assert!(matches!(err, PipelineError::Codec(CodecError::FilterInit(_))));
    }

    #[test]
    fn audio_only_graph_wires_abuffersink_not_buffersink() {
        // Regression test: the output label "out" previously matched a
        // description substring test regardless of media type, wiring a
        // video buffersink onto a purely audio graph.
        ffmpeg::init().ok();
        let mut g = FilterComplexGraph::new("[a]anull[out]")
            .add_audio_input("a", ffmpeg::Rational::new(1, 48_000))
            .add_audio_output("out");

        let mut frame = ffmpeg::util::frame::Audio::new(
            ffmpeg::util::format::sample::Sample::F32(ffmpeg::util::format::sample::Type::Planar),
            1024,
            ffmpeg::util::channel_layout::ChannelLayout::STEREO,
        );
        frame.set_rate(48_000);
        g.push_audio("a", &frame).unwrap();
        assert!(g.is_built());
        assert!(g.pull_audio("out").is_ok());
    }
}
