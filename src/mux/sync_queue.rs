//! A DTS-ordered synchronization queue across a container's streams.
//!
//! `ffmpeg-next` does not expose libavformat's internal mux sync-queue
//! machinery, so this crate provides its own implementation of the four
//! operations spec-required of anything built in its place: `add_stream`,
//! `send`, `receive`, `free`. Packets are buffered per stream and only
//! released, in global DTS order, once every other stream either has a
//! packet buffered with a DTS at or past the candidate's, or has been
//! marked finished — so a stream that simply produces packets less often
//! (e.g. one keyframe-aligned GOP per video packet against many audio
//! packets) doesn't stall the others indefinitely once it's done.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use ffmpeg_next as ffmpeg;

use crate::ffmpeg_utils::utils::rescale_ts;

/// Common timebase candidate DTS values are normalized into before cross-
/// stream comparison, matching `mux::premux::drain_in_dts_order`.
const COMPARISON_TIME_BASE: ffmpeg::Rational = ffmpeg::Rational(1, 1_000_000);

struct StreamBuffer {
    packets: VecDeque<ffmpeg::codec::packet::Packet>,
    finished: bool,
    time_base: ffmpeg::Rational,
}

impl StreamBuffer {
    fn new(time_base: ffmpeg::Rational) -> Self {
        Self {
            packets: VecDeque::new(),
            finished: false,
            time_base,
        }
    }
}

#[derive(PartialEq, Eq)]
struct Candidate {
    /// DTS normalized to [`COMPARISON_TIME_BASE`], so streams with
    /// different output timebases (e.g. copied 1/48000 audio against
    /// encoded 1/25 video) still interleave correctly.
    dts: i64,
    stream_index: usize,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dts
            .cmp(&other.dts)
            .then_with(|| self.stream_index.cmp(&other.stream_index))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A DTS-ordered cross-stream packet queue.
pub struct SyncQueue {
    streams: Vec<StreamBuffer>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
        }
    }

    /// Register a new stream with its output timebase, returning its index
    /// within the sync queue. The timebase is required to normalize this
    /// stream's DTS values against every other stream's during `receive`,
    /// since sibling streams (e.g. a copied-audio and an encoded-video
    /// output) are rarely on the same timebase.
    pub fn add_stream(&mut self, time_base: ffmpeg::Rational) -> usize {
        self.streams.push(StreamBuffer::new(time_base));
        self.streams.len() - 1
    }

    /// Buffer a packet for `stream_index`.
    pub fn send(&mut self, stream_index: usize, packet: ffmpeg::codec::packet::Packet) {
        self.streams[stream_index].packets.push_back(packet);
    }

    /// Mark a stream as finished — no more packets will arrive for it. Lets
    /// `receive` stop waiting on it when deciding whether a packet is safe
    /// to release.
    pub fn finish_stream(&mut self, stream_index: usize) {
        self.streams[stream_index].finished = true;
    }

    /// Pop the next packet in global DTS order, if every stream either has
    /// a buffered packet or is finished.
    ///
    /// Returns `None` when at least one unfinished stream has nothing
    /// buffered yet — the caller should push more input and try again.
    pub fn receive(&mut self) -> Option<(usize, ffmpeg::codec::packet::Packet)> {
        let mut heap = BinaryHeap::new();

        for (index, buf) in self.streams.iter().enumerate() {
            match buf.packets.front() {
                Some(packet) => {
                    let raw = packet.dts().unwrap_or(packet.pts().unwrap_or(0));
                    let dts = rescale_ts(raw, buf.time_base, COMPARISON_TIME_BASE);
                    heap.push(Reverse(Candidate {
                        dts,
                        stream_index: index,
                    }));
                }
                None if buf.finished => continue,
                None => return None,
            }
        }

        let Reverse(candidate) = heap.pop()?;
        let packet = self.streams[candidate.stream_index]
            .packets
            .pop_front()
            .expect("candidate stream had a front packet");
        Some((candidate.stream_index, packet))
    }

    /// Drain everything remaining regardless of DTS order, for use once all
    /// streams are finished and the muxer is closing.
    pub fn drain_all(&mut self) -> Vec<(usize, ffmpeg::codec::packet::Packet)> {
        let mut out = Vec::new();
        while let Some(item) = self.receive() {
            out.push(item);
        }
        // Any stream left with buffered packets despite being "finished"
        // (receive() returning None only happens for unfinished streams, so
        // this loop only stops when every buffer is empty or non-finished
        // streams block it — callers are expected to call finish_stream on
        // every stream before this).
        out
    }

    /// Drop all buffered packets without returning them, releasing their
    /// memory. Called when the muxer is torn down due to an upstream error.
    pub fn free(&mut self) {
        for stream in &mut self.streams {
            stream.packets.clear();
        }
    }
}

impl Default for SyncQueue {
    fn default() -> Self {
        Self::new()
    }
}
