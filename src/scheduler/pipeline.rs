//! The scheduler primitive (C6) and pipeline assembler (C7).
//!
//! C6 is a two-node "pipe" operator: it wires one `SendReceive` adapter
//! between a bounded input queue and a bounded output queue, propagating EOF
//! downstream and observing cancellation between items. C7 builds runnable
//! pipelines out of these pipes for the shapes spec.md names: stream-copy-all
//! (a demuxer wired directly to a muxer) and the "named" shape (one
//! per-stream pipeline per label, multiplexed into one muxer).
//!
//! The original design describes a single polymorphic `pipeline(...)` entry
//! point that inspects its arguments to pick a shape. Rust's type system
//! makes that impractical without heavy dynamic dispatch for little benefit,
//! so this crate exposes one concrete function per shape instead, which a
//! caller picks explicitly: `stream_copy_all` for the direct demuxer-to-muxer
//! shape, and `fan_out_demuxer` + `pipe` + `write_to_muxer` composed together
//! for the "named" shape (one per-stream decode/filter/encode pipeline per
//! label, multiplexed into one shared muxer).

use std::collections::HashMap;
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use tokio::sync::Mutex;

use crate::codec::{CodecStatus, SendReceive};
use crate::demux::Demuxer;
use crate::error::{PipelineError, Result};
use crate::mux::muxer::Muxer;
use crate::mux::StreamcopyOptions;
use crate::queue::{bounded, Receiver, Sender};
use crate::scheduler::control::Cancel;

/// Drive one `SendReceive` adapter between an input queue and an output
/// queue: receive an item, send it into the adapter, drain every output it
/// produces, repeat until the input queue closes, then flush the adapter and
/// forward its EOF. Checked for cancellation between items, never mid-call.
pub async fn pipe<A>(
    mut adapter: A,
    input: Receiver<A::Input>,
    output: Sender<A::Output>,
    cancel: &Cancel,
) -> Result<()>
where
    A: SendReceive,
{
    loop {
        if cancel.is_stopped() {
            output.close();
            return Ok(());
        }

        match input.receive().await {
            Ok(Some(item)) => {
                adapter.send(&item)?;
                drain(&mut adapter, &output).await?;
            }
            Ok(None) => break,
            Err(e) => {
                output.close_with_error(PipelineError::ProtocolState(e.to_string()));
                return Err(e);
            }
        }
    }

    adapter.send_eof()?;
    drain_until_eof(&mut adapter, &output).await?;
    output.close();
    Ok(())
}

async fn drain<A: SendReceive>(adapter: &mut A, output: &Sender<A::Output>) -> Result<()> {
    loop {
        match adapter.receive()? {
            CodecStatus::Output(item) => output.send(item).await?,
            CodecStatus::NeedMoreInput => return Ok(()),
            CodecStatus::EndOfStream => return Ok(()),
        }
    }
}

async fn drain_until_eof<A: SendReceive>(adapter: &mut A, output: &Sender<A::Output>) -> Result<()> {
    loop {
        match adapter.receive()? {
            CodecStatus::Output(item) => output.send(item).await?,
            CodecStatus::NeedMoreInput => continue,
            CodecStatus::EndOfStream => return Ok(()),
        }
    }
}

/// Build a stream-copy-all pipeline: every stream of `demuxer` is wired
/// directly into `muxer` with no decode/filter/encode stage, each input
/// packet freed after handoff.
///
/// Runs to completion on the calling task (demuxing is inherently
/// sequential — a single `Demuxer` cannot be polled from two tasks at
/// once), but every streamcopy stream must already exist on `muxer` via
/// `add_stream`/`set_stream_parameters` before this is called.
pub async fn stream_copy_all<D: Demuxer>(
    demuxer: &mut D,
    muxer: &mut Muxer,
    stream_slots: &HashMap<usize, usize>,
    cancel: &Cancel,
) -> Result<()> {
    loop {
        if cancel.is_stopped() {
            break;
        }
        match demuxer.next_packet()? {
            Some((input_index, packet)) => {
                if let Some(&slot) = stream_slots.get(&input_index) {
                    let time_base = demuxer
                        .stream_time_base(input_index)
                        .unwrap_or(ffmpeg::Rational::new(1, 1));
                    muxer.write_packet(slot, packet, time_base)?;
                }
            }
            None => break,
        }
    }
    Ok(())
}

/// One labeled per-stream pipeline for the "named" shape: packets from one
/// demuxer stream are decoded, optionally filtered/encoded, and written into
/// the shared muxer slot for that label.
pub struct NamedStage {
    pub label: String,
    pub input_index: usize,
    pub muxer_slot: usize,
}

/// Fan a demuxer's packets out to one bounded queue per named stage,
/// returning the sending halves the demux task owns and the receiving
/// halves each stage's decode task consumes.
///
/// This implements spec.md's "If the single object given in the source
/// position is a demuxer but the stages are named, the demuxer is fanned out
/// by calling `packets(stream_index)` once per label" by running the
/// physical read on one task (the demuxer itself is not `Sync`) and
/// distributing by stream index.
pub async fn fan_out_demuxer<D: Demuxer>(
    mut demuxer: D,
    stages: &[NamedStage],
    queue_capacity: usize,
    cancel: Cancel,
) -> (Vec<(String, Receiver<ffmpeg::codec::packet::Packet>)>, tokio::task::JoinHandle<Result<()>>) {
    let mut senders: HashMap<usize, Sender<ffmpeg::codec::packet::Packet>> = HashMap::new();
    let mut receivers = Vec::new();

    for stage in stages {
        let (tx, rx) = bounded(queue_capacity);
        senders.insert(stage.input_index, tx);
        receivers.push((stage.label.clone(), rx));
    }

    let handle = tokio::spawn(async move {
        loop {
            if cancel.is_stopped() {
                break;
            }
            match demuxer.next_packet()? {
                Some((input_index, packet)) => {
                    if let Some(tx) = senders.get(&input_index) {
                        tx.send(packet).await?;
                    }
                }
                None => break,
            }
        }
        for tx in senders.values() {
            tx.close();
        }
        Ok(())
    });

    (receivers, handle)
}

/// Write packets arriving on `rx` into `muxer_slot` of a shared muxer,
/// stopping once the queue closes (clean or error).
pub async fn write_to_muxer(
    rx: Receiver<ffmpeg::codec::packet::Packet>,
    muxer: Arc<Mutex<Muxer>>,
    muxer_slot: usize,
    source_time_base: ffmpeg::Rational,
    cancel: Cancel,
) -> Result<()> {
    loop {
        if cancel.is_stopped() {
            return Ok(());
        }
        match rx.receive().await? {
            Some(packet) => {
                let mut muxer = muxer.lock().await;
                muxer.write_packet(muxer_slot, packet, source_time_base)?;
            }
            None => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::bsf::BitstreamFilter;
    use crate::codec::encoder::{is_encoder_available, AudioEncoder, AudioEncoderOptions};

    #[tokio::test]
    async fn pipe_forwards_eof_on_clean_close() {
        ffmpeg::init().ok();
        if !is_encoder_available(ffmpeg::codec::Id::AAC) {
            eprintln!("AAC encoder unavailable, skipping");
            return;
        }
        let encoder = AudioEncoder::open(&AudioEncoderOptions::default()).unwrap();
        let params = encoder.codec_parameters();
        let Ok(bsf) = BitstreamFilter::open("null", &params) else {
            eprintln!("null bsf unavailable, skipping");
            return;
        };

        let (tx_in, rx_in) = bounded::<ffmpeg::codec::packet::Packet>(4);
        let (tx_out, rx_out) = bounded::<ffmpeg::codec::packet::Packet>(4);
        tx_in.close();

        let cancel = Cancel::new();
        pipe(bsf, rx_in, tx_out, &cancel).await.unwrap();
        assert_eq!(rx_out.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn cancel_closes_output_without_draining_input() {
        let (tx_in, rx_in) = bounded::<u32>(4);
        let (tx_out, rx_out) = bounded::<u32>(4);
        tx_in.send(1).await.unwrap();

        struct Noop;
        impl SendReceive for Noop {
            type Input = u32;
            type Output = u32;
            fn send(&mut self, _input: &u32) -> Result<()> {
                Ok(())
            }
            fn send_eof(&mut self) -> Result<()> {
                Ok(())
            }
            fn receive(&mut self) -> Result<CodecStatus<u32>> {
                Ok(CodecStatus::EndOfStream)
            }
        }

        let cancel = Cancel::new();
        cancel.stop();
        pipe(Noop, rx_in, tx_out, &cancel).await.unwrap();
        assert_eq!(rx_out.receive().await.unwrap(), None);
    }
}
