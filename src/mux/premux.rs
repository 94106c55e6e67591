//! Pre-header packet buffering (spec's "Phase 1").
//!
//! While at least one attached stream has not yet had its codec parameters
//! set, the container header cannot be written, so every accepted packet is
//! cloned and appended to its stream's queue here. Once the last stream
//! initializes, the muxer drains every queue in cross-timebase DTS order and
//! moves on to the sync queue for the rest of the container's lifetime.

use ffmpeg_next as ffmpeg;

use crate::error::{PipelineError, Result};

/// A packet queued before the header was written, or a NULL marker
/// (end-of-stream signal for a stream that produced no more packets before
/// the others finished initializing).
pub enum QueuedItem {
    Packet(ffmpeg::codec::packet::Packet),
    Null,
}

impl QueuedItem {
    fn dts(&self) -> Option<i64> {
        match self {
            QueuedItem::Packet(p) => p.dts(),
            QueuedItem::Null => None,
        }
    }

    fn size(&self) -> usize {
        match self {
            QueuedItem::Packet(p) => p.size(),
            QueuedItem::Null => 0,
        }
    }
}

/// Per-stream pre-header buffer with byte/packet backpressure limits.
///
/// The packet-count limit only takes effect once the byte threshold has
/// been crossed — a stream that produces many tiny packets isn't penalized
/// until it's also accumulated real bytes.
pub struct PreMuxQueue {
    stream_index: usize,
    items: Vec<QueuedItem>,
    bytes: usize,
    byte_threshold: usize,
    packet_limit: usize,
}

impl PreMuxQueue {
    pub fn new(stream_index: usize, byte_threshold: usize, packet_limit: usize) -> Self {
        Self {
            stream_index,
            items: Vec::new(),
            bytes: 0,
            byte_threshold,
            packet_limit,
        }
    }

    /// Append an item, enforcing backpressure. Returns an error (without
    /// taking ownership — the caller still has the packet to free) if the
    /// queue would exceed its limits.
    pub fn push(&mut self, item: QueuedItem) -> Result<()> {
        if self.bytes >= self.byte_threshold && self.items.len() >= self.packet_limit {
            return Err(PipelineError::Backpressure {
                stream_index: self.stream_index,
                detail: format!(
                    "exceeded byte threshold {} and packet limit {}",
                    self.byte_threshold, self.packet_limit
                ),
            });
        }
        self.bytes += item.size();
        self.items.push(item);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn peek_dts(&self) -> Option<i64> {
        self.items.first().and_then(|item| item.dts())
    }

    fn pop_front(&mut self) -> Option<QueuedItem> {
        if self.items.is_empty() {
            None
        } else {
            let item = self.items.remove(0);
            self.bytes = self.bytes.saturating_sub(item.size());
            Some(item)
        }
    }
}

/// Drain every stream's `PreMuxQueue` in cross-timebase DTS order.
///
/// NULL markers and packets with an unknown DTS are treated as having the
/// smallest possible DTS, so they drain as soon as they reach the front of
/// their queue rather than being starved behind streams with real
/// timestamps.
pub fn drain_in_dts_order(
    queues: &mut [(PreMuxQueue, ffmpeg::Rational)],
) -> Vec<(usize, QueuedItem)> {
    let mut out = Vec::new();

    loop {
        let mut best: Option<(usize, i64)> = None;
        for (index, (queue, time_base)) in queues.iter().enumerate() {
            let Some(dts) = queue.peek_dts() else {
                if queue.is_empty() {
                    continue;
                }
                // NULL marker or unknown DTS: drains immediately.
                best = Some((index, i64::MIN));
                break;
            };
            let common = crate::ffmpeg_utils::utils::rescale_ts(dts, *time_base, ffmpeg::Rational::new(1, 1_000_000));
            if best.map_or(true, |(_, best_dts)| common < best_dts) {
                best = Some((index, common));
            }
        }

        let Some((index, _)) = best else { break };
        if let Some(item) = queues[index].0.pop_front() {
            out.push((index, item));
        } else {
            break;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_with_dts(dts: i64) -> ffmpeg::codec::packet::Packet {
        let mut p = ffmpeg::codec::packet::Packet::empty();
        p.set_dts(Some(dts));
        p
    }

    #[test]
    fn drains_across_streams_in_dts_order() {
        let mut audio = PreMuxQueue::new(0, 1 << 20, 64);
        audio.push(QueuedItem::Packet(packet_with_dts(0))).unwrap();
        audio.push(QueuedItem::Packet(packet_with_dts(1024))).unwrap();

        let mut video = PreMuxQueue::new(1, 1 << 20, 64);
        video.push(QueuedItem::Packet(packet_with_dts(0))).unwrap();
        video.push(QueuedItem::Packet(packet_with_dts(3600))).unwrap();

        let mut queues = vec![
            (audio, ffmpeg::Rational::new(1, 48_000)),
            (video, ffmpeg::Rational::new(1, 25)),
        ];

        let drained = drain_in_dts_order(&mut queues);
        assert_eq!(drained.len(), 4);
    }

    #[test]
    fn backpressure_fails_after_limit() {
        let mut queue = PreMuxQueue::new(0, 1 << 20, 2);
        queue.bytes = 1 << 20;
        queue.push(QueuedItem::Packet(packet_with_dts(0))).unwrap();
        queue.push(QueuedItem::Packet(packet_with_dts(1))).unwrap();
        let err = queue.push(QueuedItem::Packet(packet_with_dts(2))).unwrap_err();
        assert!(matches!(err, PipelineError::Backpressure { .. }));
    }

    #[test]
    fn null_marker_drains_first() {
        let mut audio = PreMuxQueue::new(0, 1 << 20, 64);
        audio.push(QueuedItem::Packet(packet_with_dts(5000))).unwrap();

        let mut video = PreMuxQueue::new(1, 1 << 20, 64);
        video.push(QueuedItem::Null).unwrap();

        let mut queues = vec![
            (audio, ffmpeg::Rational::new(1, 48_000)),
            (video, ffmpeg::Rational::new(1, 25)),
        ];

        let drained = drain_in_dts_order(&mut queues);
        assert!(matches!(drained[0].1, QueuedItem::Null));
    }
}
