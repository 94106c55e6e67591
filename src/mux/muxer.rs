//! The muxer core (lazy stream init, PreMuxQueue/SyncQueue integration,
//! streamcopy filtering, timestamp fixup, container-metadata copy).
//!
//! Generalizes the teacher's `Fmp4Muxer` — which assumes every stream's
//! parameters are known up front and muxes exactly one fMP4 segment — into a
//! muxer that spans the whole container lifetime and accepts streams whose
//! parameters arrive at different times (e.g. a late-starting encoder still
//! warming up its first frame).

use std::collections::HashMap;

use ffmpeg_next as ffmpeg;

use crate::config::MuxerOptions;
use crate::error::{CodecError, PipelineError, Result};
use crate::ffmpeg_utils::helpers;
use crate::ffmpeg_utils::io::{create_memory_io, MemoryWriter};
use crate::mux::premux::{drain_in_dts_order, PreMuxQueue, QueuedItem};
use crate::mux::stream::StreamDescriptor;
use crate::mux::streamcopy::{self, StreamcopyOptions};
use crate::mux::sync_queue::SyncQueue;
use crate::mux::timestamp::{rescale_packet, rescale_packet_audio_streamcopy, repair_dts};

/// Container-level metadata keys that are never copied from an input onto
/// an output (spec.md §4.5, "Container-metadata copy") — stale duration/
/// creation-time/encoder-identity metadata from the source would otherwise
/// overwrite values the output muxer establishes on its own.
const EXCLUDED_METADATA_KEYS: &[&str] = &[
    "duration",
    "creation_time",
    "company_name",
    "product_name",
    "product_version",
];

struct StreamSlot {
    descriptor: StreamDescriptor,
    premux: PreMuxQueue,
    initialized: bool,
    is_streamcopy: bool,
    streamcopy_options: StreamcopyOptions,
    /// Recorded by `set_stream_parameters`; audio stream-copy rescaling
    /// reads `sample_rate`/`frame_size` off this to derive packet duration
    /// and the sample-rate-native intermediate timebase (spec.md §4.5).
    params: Option<ffmpeg::codec::Parameters>,
}

/// Lifecycle state of the muxer, mirroring spec's three phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    PreHeader,
    Draining,
    Streaming,
    Closed,
}

/// A streaming container muxer spanning the whole output's lifetime.
pub struct Muxer {
    output: ffmpeg::format::context::Output,
    writer: Box<MemoryWriter>,
    slots: Vec<StreamSlot>,
    input_to_slot: HashMap<usize, usize>,
    phase: Phase,
    options: MuxerOptions,
    use_sync_queue: bool,
    sync_queue: SyncQueue,
    sync_queue_index: HashMap<usize, usize>,
    header_written: bool,
    metadata_copied: bool,
}

impl Muxer {
    /// Open a new muxer writing to an in-memory buffer in the named
    /// container format (`"mp4"`, `"matroska"`, `"mpegts"`, ...), with
    /// default [`MuxerOptions`].
    pub fn new(format_name: &str) -> Result<Self> {
        Self::with_options(format_name, MuxerOptions::default())
    }

    /// Open a new muxer with an explicit [`MuxerOptions`] (spec.md §6).
    pub fn with_options(format_name: &str, options: MuxerOptions) -> Result<Self> {
        let (output, writer) = create_memory_io(format_name, options.buffer_size)?;
        Ok(Self {
            output,
            writer,
            slots: Vec::new(),
            input_to_slot: HashMap::new(),
            phase: Phase::PreHeader,
            options,
            use_sync_queue: false,
            sync_queue: SyncQueue::new(),
            sync_queue_index: HashMap::new(),
            header_written: false,
            metadata_copied: false,
        })
    }

    /// `true` if the output container format requires codec extradata to be
    /// carried in the container header rather than in-band in packets
    /// (spec.md glossary, "Global-header format").
    pub fn requires_global_header(&self) -> bool {
        self.output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER)
    }

    /// `true` if the output container format tolerates non-strictly-monotonic
    /// timestamps (`AVFMT_TS_NONSTRICT`), in which case the DTS-repair floor
    /// in [`crate::mux::timestamp::repair_dts`] allows two successive
    /// packets to share a DTS instead of requiring a strict increase.
    pub fn requires_non_strict_ts(&self) -> bool {
        self.output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::TS_NONSTRICT)
    }

    /// Copy container-level metadata (title, encoder tag, etc.) from an
    /// input format context directly onto the output context, excluding
    /// keys that would otherwise overwrite values this muxer establishes on
    /// its own (spec.md §4.5, "Container-metadata copy"). A no-op on any
    /// call after the first.
    pub fn copy_container_metadata(&mut self, input: &ffmpeg::format::context::Input) {
        if self.metadata_copied {
            return;
        }
        helpers::copy_container_metadata(input, &mut self.output, EXCLUDED_METADATA_KEYS);
        self.metadata_copied = true;
    }

    /// Set the "default" disposition on the first non-attached-picture
    /// stream of every media type that has two or more streams and no
    /// existing default, per spec.md §4.5, "Default-disposition inference".
    /// Must be called after every stream has been added and before the
    /// header is written.
    pub fn infer_default_dispositions(&mut self) {
        let mut counts: HashMap<ffmpeg::media::Type, usize> = HashMap::new();
        for slot in &self.slots {
            *counts.entry(slot.descriptor.medium).or_insert(0) += 1;
        }

        for (medium, count) in counts {
            if count < 2 {
                continue;
            }
            let has_default = self.slots.iter().any(|slot| {
                slot.descriptor.medium == medium
                    && self
                        .output
                        .stream(slot.descriptor.output_index)
                        .map(|s| {
                            helpers::stream_disposition(&s)
                                & ffmpeg::ffi::AV_DISPOSITION_DEFAULT as i32
                                != 0
                        })
                        .unwrap_or(false)
            });
            if has_default {
                continue;
            }
            let target = self.slots.iter().find(|slot| {
                slot.descriptor.medium == medium
                    && self
                        .output
                        .stream(slot.descriptor.output_index)
                        .map(|s| {
                            helpers::stream_disposition(&s)
                                & ffmpeg::ffi::AV_DISPOSITION_ATTACHED_PIC as i32
                                == 0
                        })
                        .unwrap_or(true)
            });
            if let Some(slot) = target {
                if let Some(mut s) = self.output.stream_mut(slot.descriptor.output_index) {
                    helpers::stream_set_disposition_flag(
                        &mut s,
                        ffmpeg::ffi::AV_DISPOSITION_DEFAULT as i32,
                    );
                }
            }
        }
    }

    /// Declare a new stream that will eventually carry either encoded
    /// packets or streamcopy'd packets from `input_index` (if any). Returns
    /// a slot index used for all subsequent calls.
    pub fn add_stream(
        &mut self,
        medium: ffmpeg::media::Type,
        input_index: Option<usize>,
        is_streamcopy: bool,
        streamcopy_options: StreamcopyOptions,
    ) -> Result<usize> {
        if self.phase != Phase::PreHeader {
            return Err(PipelineError::ProtocolState(
                "cannot add a stream after the header has been written".into(),
            ));
        }

        let out_stream = self
            .output
            .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
            .map_err(|e| PipelineError::Muxing(format!("failed to add stream: {}", e)))?;
        let output_index = out_stream.index();

        let slot_index = self.slots.len();
        self.slots.push(StreamSlot {
            descriptor: StreamDescriptor::new(output_index, input_index, medium, ffmpeg::Rational::new(1, 1)),
            premux: PreMuxQueue::new(
                output_index,
                self.options.muxing_queue_data_threshold,
                self.options.max_muxing_queue_size,
            ),
            initialized: false,
            is_streamcopy,
            streamcopy_options,
            params: None,
        });

        if let Some(input_index) = input_index {
            self.input_to_slot.insert(input_index, slot_index);
        }

        Ok(slot_index)
    }

    /// Provide codec parameters for a previously-added stream, completing
    /// its initialization. The stream's time base is set from `time_base`
    /// (or, for streamcopy audio streams, derived from the sample rate).
    pub fn set_stream_parameters(
        &mut self,
        slot_index: usize,
        params: &ffmpeg::codec::Parameters,
        time_base: ffmpeg::Rational,
    ) -> Result<()> {
        if self.phase != Phase::PreHeader {
            return Err(PipelineError::ProtocolState(
                "cannot set stream parameters after the header has been written".into(),
            ));
        }

        let slot = &mut self.slots[slot_index];
        let mut out_stream = self
            .output
            .stream_mut(slot.descriptor.output_index)
            .ok_or_else(|| PipelineError::Muxing("stream vanished from output context".into()))?;

        out_stream.set_parameters(params.clone());
        helpers::stream_reset_codec_tag(&mut out_stream);
        out_stream.set_time_base(time_base);

        slot.descriptor.time_base = time_base;
        slot.params = Some(params.clone());
        slot.initialized = true;

        // A stream added with the library-wide streamcopy defaults (no
        // per-stream override) picks up the muxer's `start_time`/
        // `copy_initial_nonkeyframes`/`copy_prior_start` settings now that
        // its time base — needed to convert `start_time` from seconds to
        // stream ticks — is known.
        if slot.is_streamcopy && slot.streamcopy_options == StreamcopyOptions::default() {
            let copy_start_ts = if self.options.start_time != 0.0 {
                (self.options.start_time * time_base.denominator() as f64 / time_base.numerator() as f64)
                    .round() as i64
            } else {
                0
            };
            slot.streamcopy_options = StreamcopyOptions {
                copy_initial_nonkeyframes: self.options.copy_initial_nonkeyframes,
                copy_prior_start: self.options.copy_prior_start,
                copy_start_ts,
            };
        }

        Ok(())
    }

    fn all_initialized(&self) -> bool {
        self.slots.iter().all(|s| s.initialized)
    }

    /// Accept a packet from `source_time_base` (the decoder/demuxer/encoder
    /// time base it was produced in — `ffmpeg_next`'s `Packet` carries no
    /// time base of its own, so the caller must supply it). Rescaling to
    /// the stream's output time base happens immediately, before any
    /// PreMuxQueue buffering, so DTS-order comparisons during the drain are
    /// always in a consistent unit.
    pub fn write_packet(
        &mut self,
        slot_index: usize,
        mut packet: ffmpeg::codec::packet::Packet,
        source_time_base: ffmpeg::Rational,
    ) -> Result<()> {
        if self.phase == Phase::Closed {
            return Err(PipelineError::ProtocolState("muxer is closed".into()));
        }

        {
            let slot = &mut self.slots[slot_index];
            let is_audio = slot.descriptor.medium == ffmpeg::media::Type::Audio;
            if slot.is_streamcopy {
                match streamcopy::apply(&mut packet, &mut slot.descriptor, &slot.streamcopy_options, is_audio) {
                    streamcopy::StreamcopyDecision::Drop => return Ok(()),
                    streamcopy::StreamcopyDecision::Keep => {}
                }
            }
            if slot.initialized {
                let out_time_base = slot.descriptor.time_base;
                match (slot.is_streamcopy && is_audio, &slot.params) {
                    (true, Some(params)) => {
                        let params = params.clone();
                        rescale_packet_audio_streamcopy(
                            &mut packet,
                            &mut slot.descriptor,
                            &params,
                            source_time_base,
                            out_time_base,
                        )
                    }
                    _ => rescale_packet(&mut packet, source_time_base, out_time_base),
                }
            }
        }

        if !self.all_initialized() {
            let slot = &mut self.slots[slot_index];
            slot.premux.push(QueuedItem::Packet(packet))?;
            return Ok(());
        }

        if !self.header_written {
            self.write_header_and_drain()?;
        }

        self.dispatch_packet(slot_index, packet)
    }

    /// Accept a NULL marker (end-of-stream for this stream) before the
    /// header has been written.
    pub fn write_null_marker(&mut self, slot_index: usize) -> Result<()> {
        if !self.all_initialized() {
            self.slots[slot_index].premux.push(QueuedItem::Null)?;
            return Ok(());
        }
        self.sync_queue.finish_stream(
            *self
                .sync_queue_index
                .get(&slot_index)
                .unwrap_or(&slot_index),
        );
        Ok(())
    }

    fn write_header_and_drain(&mut self) -> Result<()> {
        let has_streamcopy = self.slots.iter().any(|s| s.is_streamcopy);
        self.use_sync_queue = self.options.use_sync_queue && has_streamcopy;

        // spec.md §4.5 Phase 2(c): disposition inference runs exactly once,
        // right before the header is written. Container-metadata copy runs
        // the same moment but needs an external `Input` handle, so it stays
        // a caller-invoked method the caller must call before this point if
        // it wants metadata carried over (`copy_container_metadata` is
        // itself idempotent, so an early call is always safe).
        self.infer_default_dispositions();

        if self.use_sync_queue {
            for (slot_index, slot) in self.slots.iter().enumerate() {
                let sq_index = self.sync_queue.add_stream(slot.descriptor.time_base);
                self.sync_queue_index.insert(slot_index, sq_index);
            }
        }

        self.output
            .write_header()
            .map_err(|e| PipelineError::Muxing(format!("failed to write header: {}", e)))?;
        self.header_written = true;
        self.phase = Phase::Draining;

        let data_threshold = self.options.muxing_queue_data_threshold;
        let packet_limit = self.options.max_muxing_queue_size;
        let mut queues: Vec<(PreMuxQueue, ffmpeg::Rational)> = self
            .slots
            .iter_mut()
            .map(|slot| {
                let time_base = slot.descriptor.time_base;
                (
                    std::mem::replace(
                        &mut slot.premux,
                        PreMuxQueue::new(slot.descriptor.output_index, data_threshold, packet_limit),
                    ),
                    time_base,
                )
            })
            .collect();

        let drained = drain_in_dts_order(&mut queues);
        self.phase = Phase::Streaming;

        for (slot_index, item) in drained {
            match item {
                QueuedItem::Packet(packet) => self.dispatch_packet(slot_index, packet)?,
                QueuedItem::Null => {
                    if let Some(&sq_index) = self.sync_queue_index.get(&slot_index) {
                        self.sync_queue.finish_stream(sq_index);
                    }
                }
            }
        }

        Ok(())
    }

    fn dispatch_packet(&mut self, slot_index: usize, mut packet: ffmpeg::codec::packet::Packet) -> Result<()> {
        let non_strict_ts = self.requires_non_strict_ts();
        let slot = &mut self.slots[slot_index];
        let output_index = slot.descriptor.output_index;

        repair_dts(&mut packet, &mut slot.descriptor, non_strict_ts);
        packet.set_stream(output_index);
        packet.set_position(-1);

        if self.use_sync_queue {
            let sq_index = *self.sync_queue_index.get(&slot_index).unwrap_or(&slot_index);
            self.sync_queue.send(sq_index, packet);
            self.drain_sync_queue()
        } else {
            self.write_to_container(packet)
        }
    }

    fn drain_sync_queue(&mut self) -> Result<()> {
        while let Some((_sq_index, packet)) = self.sync_queue.receive() {
            self.write_to_container(packet)?;
        }
        Ok(())
    }

    fn write_to_container(&mut self, mut packet: ffmpeg::codec::packet::Packet) -> Result<()> {
        if let Err(e) = packet.write_interleaved(&mut self.output) {
            if self.options.exit_on_error {
                return Err(PipelineError::Codec(CodecError::Send(format!(
                    "failed to write packet: {}",
                    e
                ))));
            }
            tracing::warn!("dropping packet after container-write error: {}", e);
        }
        Ok(())
    }

    /// Close the muxer. Idempotent. Flushes any remaining PreMuxQueue/
    /// SyncQueue packets and writes the trailer if the header was already
    /// written.
    pub fn close(&mut self) -> Result<Vec<u8>> {
        if self.phase == Phase::Closed {
            return Ok(self.writer.data());
        }

        if !self.header_written {
            for slot in &mut self.slots {
                slot.premux = PreMuxQueue::new(slot.descriptor.output_index, 0, 0);
            }
            self.phase = Phase::Closed;
            return Ok(Vec::new());
        }

        if self.use_sync_queue {
            for (_, &sq_index) in self.sync_queue_index.iter() {
                self.sync_queue.finish_stream(sq_index);
            }
            for (_, packet) in self.sync_queue.drain_all() {
                self.write_to_container(packet)?;
            }
            self.sync_queue.free();
        }

        if let Err(e) = self.output.write_trailer() {
            tracing::debug!("failed to write trailer, proceeding with available data: {}", e);
        }

        self.phase = Phase::Closed;
        let data = self.writer.data();
        Ok(data)
    }

    /// Peek the bytes written so far without clearing the buffer.
    pub fn current_data(&self) -> Vec<u8> {
        self.writer.data()
    }

    /// Clear the internal memory buffer after the caller has consumed the
    /// bytes returned from `close`/`write_header_and_drain`, so subsequent
    /// writes don't re-deliver already-flushed data.
    pub fn clear_buffer(&mut self) {
        self.writer.clear();
    }

    pub fn slot_for_input(&self, input_index: usize) -> Option<usize> {
        self.input_to_slot.get(&input_index).copied()
    }
}

impl Drop for Muxer {
    fn drop(&mut self) {
        helpers::detach_avio(&mut self.output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encoder::{AudioEncoder, AudioEncoderOptions, is_encoder_available};

    #[test]
    fn single_stream_writes_a_valid_init_segment() {
        ffmpeg::init().unwrap();
        if !is_encoder_available(ffmpeg::codec::Id::AAC) {
            eprintln!("AAC encoder unavailable, skipping");
            return;
        }

        let encoder = AudioEncoder::open(&AudioEncoderOptions::default()).unwrap();
        let params = encoder.codec_parameters();

        let mut muxer = Muxer::new("mp4").unwrap();
        let slot = muxer
            .add_stream(ffmpeg::media::Type::Audio, None, false, StreamcopyOptions::default())
            .unwrap();
        muxer
            .set_stream_parameters(slot, &params, ffmpeg::Rational::new(1, 48_000))
            .unwrap();

        let mut packet = ffmpeg::codec::packet::Packet::empty();
        packet.set_pts(Some(0));
        packet.set_dts(Some(0));
        packet.set_duration(1024);
        muxer
            .write_packet(slot, packet, ffmpeg::Rational::new(1, 48_000))
            .unwrap();

        let data = muxer.close().unwrap();
        assert!(!data.is_empty());
        assert_eq!(&data[4..8], b"ftyp");
    }

    #[test]
    fn closing_before_header_write_discards_buffered_packets() {
        let mut muxer = Muxer::new("mp4").unwrap();
        let slot = muxer
            .add_stream(ffmpeg::media::Type::Audio, None, false, StreamcopyOptions::default())
            .unwrap();

        let mut packet = ffmpeg::codec::packet::Packet::empty();
        packet.set_pts(Some(0));
        packet.set_dts(Some(0));
        muxer
            .write_packet(slot, packet, ffmpeg::Rational::new(1, 48_000))
            .unwrap();

        let data = muxer.close().unwrap();
        assert!(data.is_empty());
    }
}
