//! End-to-end pipeline scenarios, synthetic and in-memory throughout: every
//! "source" is built by this crate's own muxer/encoders rather than checked
//! into the repo as a fixture, and every output is an in-memory buffer
//! wrapped by `Muxer`'s custom-AVIO writer. A source container still has to
//! live somewhere `FileDemuxer` can open it, so it's written to a
//! `tempfile::NamedTempFile` and immediately reopened — no asset ever
//! touches a path outside the test's own temp directory.
//!
//! Covers spec's S1-S6 scenarios and properties 2 (end-to-end drain order)
//! and 9 (cancellation).

use std::io::Write as _;
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use tokio::sync::Mutex;

use avmux::codec::bsf::BitstreamFilter;
use avmux::codec::decoder::AudioDecoder;
use avmux::codec::encoder::{is_encoder_available, AudioEncoder, AudioEncoderOptions, VideoEncoder, VideoEncoderOptions};
use avmux::codec::SendReceive;
use avmux::config::MuxerOptions;
use avmux::demux::{Demuxer, FileDemuxer};
use avmux::filter::complex::FilterComplexGraph;
use avmux::mux::{Muxer, StreamcopyOptions};
use avmux::queue::bounded;
use avmux::scheduler::{stream_copy_all, write_to_muxer, Cancel};

fn channel_stereo() -> ffmpeg::util::channel_layout::ChannelLayout {
    ffmpeg::util::channel_layout::ChannelLayout::STEREO
}

/// Encode `count` frames of silence to AAC and mux them into a standalone
/// mp4 file on disk, returning the open handle (dropped = deleted) and the
/// number of packets written. This is the "real media" every streamcopy/
/// transcode scenario below starts from.
fn build_source_audio_mp4(count: i64) -> (tempfile::NamedTempFile, usize) {
    ffmpeg::init().ok();
    let options = AudioEncoderOptions::default();
    let mut enc = AudioEncoder::open(&options).expect("AAC encoder required for these scenarios");
    let params = enc.codec_parameters();

    let mut muxer = Muxer::new("mp4").unwrap();
    let slot = muxer
        .add_stream(ffmpeg::media::Type::Audio, None, false, StreamcopyOptions::default())
        .unwrap();
    muxer
        .set_stream_parameters(slot, &params, enc.output_timebase())
        .unwrap();

    let frame_size = enc.frame_size();
    let mut frame = ffmpeg::util::frame::Audio::new(options.sample_format, frame_size, channel_stereo());
    frame.set_rate(options.sample_rate);
    for ch in 0..2 {
        for sample in frame.data_mut(ch) {
            *sample = 0;
        }
    }

    let mut written = 0;
    for i in 0..count {
        frame.set_pts(Some(i * frame_size as i64));
        enc.send_frame(&frame).unwrap();
        while let Some(packet) = enc.receive_packet().unwrap() {
            muxer.write_packet(slot, packet, enc.output_timebase()).unwrap();
            written += 1;
        }
    }
    for packet in enc.flush().unwrap() {
        muxer.write_packet(slot, packet, enc.output_timebase()).unwrap();
        written += 1;
    }

    let data = muxer.close().unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();
    (file, written)
}

fn video_encoder_options() -> VideoEncoderOptions {
    VideoEncoderOptions {
        codec_id: ffmpeg::codec::Id::MPEG4,
        width: 64,
        height: 64,
        time_base: ffmpeg::Rational::new(1, 25),
        format: ffmpeg::util::format::pixel::Pixel::YUV420P,
        bit_rate: 200_000,
        gop_size: 10,
    }
}

fn blank_video_frame(w: u32, h: u32) -> ffmpeg::util::frame::Video {
    let mut frame = ffmpeg::util::frame::Video::new(ffmpeg::util::format::pixel::Pixel::YUV420P, w, h);
    for plane in 0..frame.planes() {
        for byte in frame.data_mut(plane) {
            *byte = 0;
        }
    }
    frame
}

// S1: stream-copy MP4 -> MP4. The whole demuxer is wired directly into the
// muxer with no decode/encode stage; the output must carry the same audio
// packet count as the source.
#[tokio::test]
async fn s1_streamcopy_mp4_to_mp4() {
    if !is_encoder_available(ffmpeg::codec::Id::AAC) {
        eprintln!("AAC encoder unavailable, skipping S1");
        return;
    }
    let (source, source_packets) = build_source_audio_mp4(20);

    let mut demuxer = FileDemuxer::open(source.path()).unwrap();
    let audio_index = demuxer.audio().expect("source has an audio stream");
    let params = demuxer.stream_parameters(audio_index).unwrap();
    let time_base = demuxer.stream_time_base(audio_index).unwrap();

    let mut muxer = Muxer::new("mp4").unwrap();
    let slot = muxer
        .add_stream(
            ffmpeg::media::Type::Audio,
            Some(audio_index),
            true,
            StreamcopyOptions::default(),
        )
        .unwrap();
    muxer.set_stream_parameters(slot, &params, time_base).unwrap();

    let mut stream_slots = std::collections::HashMap::new();
    stream_slots.insert(audio_index, slot);

    let cancel = Cancel::new();
    stream_copy_all(&mut demuxer, &mut muxer, &stream_slots, &cancel)
        .await
        .unwrap();

    let data = muxer.close().unwrap();
    assert!(!data.is_empty());
    assert_eq!(&data[4..8], b"ftyp");

    // Round-trip: the streamcopied output should carry the same number of
    // audio packets as the source it was copied from.
    let mut out_file = tempfile::NamedTempFile::new().unwrap();
    out_file.write_all(&data).unwrap();
    out_file.flush().unwrap();
    let mut reopened = FileDemuxer::open(out_file.path()).unwrap();
    let mut count = 0;
    while reopened.next_packet().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, source_packets);
}

// S2: transcode with encoder lazy init. Packets are decoded, re-encoded
// through a freshly opened encoder (whose frame size/timebase are only
// known once it's opened), and muxed — the muxer's stream parameters are
// set only after the first encoded packet exists.
#[tokio::test]
async fn s2_transcode_with_lazy_encoder_init() {
    if !is_encoder_available(ffmpeg::codec::Id::AAC) {
        eprintln!("AAC encoder unavailable, skipping S2");
        return;
    }
    let (source, _) = build_source_audio_mp4(10);

    let mut demuxer = FileDemuxer::open(source.path()).unwrap();
    let audio_index = demuxer.audio().unwrap();
    let in_stream = demuxer
        .format_context()
        .streams()
        .into_iter()
        .nth(audio_index)
        .unwrap();
    let mut decoder = AudioDecoder::open(&in_stream).unwrap();
    let in_time_base = demuxer.stream_time_base(audio_index).unwrap();

    let mut encoder = AudioEncoder::open(&AudioEncoderOptions::default()).unwrap();

    let mut muxer = Muxer::new("mp4").unwrap();
    let slot = muxer
        .add_stream(ffmpeg::media::Type::Audio, None, false, StreamcopyOptions::default())
        .unwrap();

    let mut stream_initialized = false;
    let mut encoded_packets = 0;

    while let Some(packet) = demuxer.next_packet_for(audio_index).unwrap() {
        decoder.send_packet(&packet).unwrap();
        while let Some(frame) = decoder.receive_frame().unwrap() {
            encoder.send_frame(&frame).unwrap();
            while let Some(out_packet) = encoder.receive_packet().unwrap() {
                if !stream_initialized {
                    muxer
                        .set_stream_parameters(slot, &encoder.codec_parameters(), encoder.output_timebase())
                        .unwrap();
                    stream_initialized = true;
                }
                muxer.write_packet(slot, out_packet, encoder.output_timebase()).unwrap();
                encoded_packets += 1;
            }
        }
    }
    decoder.send_eof().unwrap();
    while let Some(frame) = decoder.receive_frame().unwrap() {
        encoder.send_frame(&frame).unwrap();
        while let Some(out_packet) = encoder.receive_packet().unwrap() {
            muxer.write_packet(slot, out_packet, encoder.output_timebase()).unwrap();
            encoded_packets += 1;
        }
    }
    let _ = in_time_base;

    let data = muxer.close().unwrap();
    assert!(stream_initialized, "at least one encoded packet must have set stream parameters");
    assert!(encoded_packets > 0);
    assert_eq!(&data[4..8], b"ftyp");
}

// S3 / property 2: mixed-mode interleave. A streamcopy audio stream (native
// 1/48000 timebase) and an encoded video stream (1/25 timebase) share one
// muxer with the sync queue enabled; reading the container back must yield
// non-decreasing timestamps once every packet is normalized to a common
// timebase, proving the cross-stream interleave is correct rather than an
// artifact of raw-DTS comparison across mismatched timebases.
#[tokio::test]
async fn s3_mixed_mode_interleave_is_globally_dts_ordered() {
    if !is_encoder_available(ffmpeg::codec::Id::AAC) || !is_encoder_available(ffmpeg::codec::Id::MPEG4) {
        eprintln!("AAC/MPEG4 encoder unavailable, skipping S3");
        return;
    }
    let (source, _) = build_source_audio_mp4(30);

    let mut demuxer = FileDemuxer::open(source.path()).unwrap();
    let audio_index = demuxer.audio().unwrap();
    let audio_params = demuxer.stream_parameters(audio_index).unwrap();
    let audio_time_base = demuxer.stream_time_base(audio_index).unwrap();

    let mut video_encoder = VideoEncoder::open(&video_encoder_options()).unwrap();

    let mut muxer = Muxer::new("mp4").unwrap();
    let audio_slot = muxer
        .add_stream(
            ffmpeg::media::Type::Audio,
            Some(audio_index),
            true,
            StreamcopyOptions::default(),
        )
        .unwrap();
    muxer.set_stream_parameters(audio_slot, &audio_params, audio_time_base).unwrap();

    let video_slot = muxer
        .add_stream(ffmpeg::media::Type::Video, None, false, StreamcopyOptions::default())
        .unwrap();
    muxer
        .set_stream_parameters(video_slot, &video_encoder.codec_parameters(), video_encoder.output_timebase())
        .unwrap();

    // Interleave writes deliberately: one video frame per few audio packets,
    // so the sync queue actually has to arbitrate between two differently-
    // timebased streams rather than draining one stream to completion first.
    let mut video_pts = 0i64;
    let mut frames_encoded = 0;
    while let Some(packet) = demuxer.next_packet_for(audio_index).unwrap() {
        muxer.write_packet(audio_slot, packet, audio_time_base).unwrap();

        if frames_encoded < 12 {
            let mut frame = blank_video_frame(64, 64);
            frame.set_pts(Some(video_pts));
            video_pts += 1;
            video_encoder.send_frame(&frame).unwrap();
            while let Some(out_packet) = video_encoder.receive_packet().unwrap() {
                muxer
                    .write_packet(video_slot, out_packet, video_encoder.output_timebase())
                    .unwrap();
            }
            frames_encoded += 1;
        }
    }
    for out_packet in video_encoder.flush().unwrap() {
        muxer.write_packet(video_slot, out_packet, video_encoder.output_timebase()).unwrap();
    }

    let data = muxer.close().unwrap();
    assert_eq!(&data[4..8], b"ftyp");

    let mut out_file = tempfile::NamedTempFile::new().unwrap();
    out_file.write_all(&data).unwrap();
    out_file.flush().unwrap();
    let mut reopened = FileDemuxer::open(out_file.path()).unwrap();

    const COMMON_TB: ffmpeg::Rational = ffmpeg::Rational(1, 1_000_000);
    let mut last_common_dts = i64::MIN;
    let mut per_stream_last: std::collections::HashMap<usize, i64> = std::collections::HashMap::new();
    let mut total = 0;
    while let Some((stream_index, packet)) = reopened.next_packet().unwrap() {
        let tb = reopened.stream_time_base(stream_index).unwrap();
        let dts = packet.dts().or(packet.pts()).unwrap();
        let common = avmux::ffmpeg_utils::utils::rescale_ts(dts, tb, COMMON_TB);

        if let Some(&prev) = per_stream_last.get(&stream_index) {
            assert!(dts >= prev, "per-stream DTS must be monotonic");
        }
        per_stream_last.insert(stream_index, dts);

        assert!(
            common >= last_common_dts,
            "global interleave order must be non-decreasing once normalized to a common timebase"
        );
        last_common_dts = common;
        total += 1;
    }
    assert!(total > 0);
}

// S4: overlay filter complex. Construction is deferred until every declared
// input pad has a first frame; pushing the second pad's frame must trigger
// the build and make filtered output immediately available.
#[tokio::test]
async fn s4_overlay_filter_complex_builds_once_both_inputs_seeded() {
    ffmpeg::init().ok();
    let mut graph = FilterComplexGraph::new("[a][b]overlay=0:0[out]")
        .add_video_input("a", ffmpeg::Rational::new(1, 25))
        .add_video_input("b", ffmpeg::Rational::new(1, 25))
        .add_video_output("out");

    graph.push_video("a", &blank_video_frame(32, 32)).unwrap();
    assert!(!graph.is_built());
    assert!(graph.pull_video("out").unwrap().is_empty());

    graph.push_video("b", &blank_video_frame(32, 32)).unwrap();
    assert!(graph.is_built());

    let overlaid = graph.pull_video("out").unwrap();
    assert!(!overlaid.is_empty(), "overlay must emit at least one frame once both pads are seeded");

    if !is_encoder_available(ffmpeg::codec::Id::MPEG4) {
        eprintln!("MPEG4 encoder unavailable, skipping overlay-to-container leg of S4");
        return;
    }

    let mut encoder = VideoEncoder::open(&video_encoder_options()).unwrap();
    let mut muxer = Muxer::new("mp4").unwrap();
    let slot = muxer
        .add_stream(ffmpeg::media::Type::Video, None, false, StreamcopyOptions::default())
        .unwrap();
    let mut initialized = false;
    let mut pts = 0i64;
    for mut frame in overlaid {
        frame.set_pts(Some(pts));
        pts += 1;
        encoder.send_frame(&frame).unwrap();
        while let Some(packet) = encoder.receive_packet().unwrap() {
            if !initialized {
                muxer
                    .set_stream_parameters(slot, &encoder.codec_parameters(), encoder.output_timebase())
                    .unwrap();
                initialized = true;
            }
            muxer.write_packet(slot, packet, encoder.output_timebase()).unwrap();
        }
    }
    for packet in encoder.flush().unwrap() {
        if !initialized {
            muxer
                .set_stream_parameters(slot, &encoder.codec_parameters(), encoder.output_timebase())
                .unwrap();
            initialized = true;
        }
        muxer.write_packet(slot, packet, encoder.output_timebase()).unwrap();
    }
    let data = muxer.close().unwrap();
    assert!(initialized, "overlay output must have produced at least one encodable frame");
    assert_eq!(&data[4..8], b"ftyp");
}

// S5: BSF null passthrough. Every packet sent through the `null` bitstream
// filter must come back out unchanged in count and size.
#[test]
fn s5_null_bsf_passthrough_preserves_every_packet() {
    ffmpeg::init().ok();
    if !is_encoder_available(ffmpeg::codec::Id::AAC) {
        eprintln!("AAC encoder unavailable, skipping S5");
        return;
    }
    let options = AudioEncoderOptions::default();
    let mut enc = AudioEncoder::open(&options).unwrap();
    let params = enc.codec_parameters();
    let Ok(mut bsf) = BitstreamFilter::open("null", &params) else {
        eprintln!("null bsf unavailable, skipping S5");
        return;
    };

    let frame_size = enc.frame_size();
    let mut frame = ffmpeg::util::frame::Audio::new(options.sample_format, frame_size, channel_stereo());
    frame.set_rate(options.sample_rate);
    for ch in 0..2 {
        for sample in frame.data_mut(ch) {
            *sample = 0;
        }
    }

    let mut sent_sizes = Vec::new();
    let mut received_sizes = Vec::new();

    for i in 0..8 {
        frame.set_pts(Some(i * frame_size as i64));
        enc.send_frame(&frame).unwrap();
        while let Some(packet) = enc.receive_packet().unwrap() {
            sent_sizes.push(packet.size());
            for out in bsf.process(&packet).unwrap() {
                received_sizes.push(out.size());
            }
        }
    }
    for out in bsf.flush().unwrap() {
        received_sizes.push(out.size());
    }

    assert_eq!(sent_sizes, received_sizes, "null bsf must pass every packet through unchanged");
    assert!(!sent_sizes.is_empty());
}

// S6 / property 9: backpressure and cancellation. A PreMuxQueue past its
// byte/packet limits must reject the write rather than buffer unboundedly,
// and a pipeline stage must honor `Cancel` between items without draining
// whatever is still queued upstream.
#[test]
fn s6_premux_queue_rejects_writes_past_its_limit() {
    let mut muxer = Muxer::with_options(
        "mp4",
        MuxerOptions::default()
            .with_max_muxing_queue_size(2)
            .with_muxing_queue_data_threshold(1),
    )
    .unwrap();
    let slot = muxer
        .add_stream(ffmpeg::media::Type::Audio, None, false, StreamcopyOptions::default())
        .unwrap();
    // No `set_stream_parameters` call: the stream stays uninitialized, so
    // every packet is routed through the PreMuxQueue instead of the
    // container writer.

    let mut make_packet = |pts: i64| {
        let mut p = ffmpeg::codec::packet::Packet::new(16);
        p.set_pts(Some(pts));
        p.set_dts(Some(pts));
        p
    };

    muxer.write_packet(slot, make_packet(0), ffmpeg::Rational::new(1, 48_000)).unwrap();
    muxer.write_packet(slot, make_packet(1), ffmpeg::Rational::new(1, 48_000)).unwrap();
    let err = muxer
        .write_packet(slot, make_packet(2), ffmpeg::Rational::new(1, 48_000))
        .unwrap_err();
    assert!(matches!(err, avmux::PipelineError::Backpressure { .. }));
}

#[tokio::test]
async fn s6_cancellation_stops_pipeline_without_draining_queued_input() {
    ffmpeg::init().ok();
    if !is_encoder_available(ffmpeg::codec::Id::AAC) {
        eprintln!("AAC encoder unavailable, skipping cancellation leg of S6");
        return;
    }
    let options = AudioEncoderOptions::default();
    let mut enc = AudioEncoder::open(&options).unwrap();
    let params = enc.codec_parameters();

    let mut muxer = Muxer::new("mp4").unwrap();
    let slot = muxer
        .add_stream(ffmpeg::media::Type::Audio, None, false, StreamcopyOptions::default())
        .unwrap();
    muxer.set_stream_parameters(slot, &params, enc.output_timebase()).unwrap();

    let frame_size = enc.frame_size();
    let mut frame = ffmpeg::util::frame::Audio::new(options.sample_format, frame_size, channel_stereo());
    frame.set_rate(options.sample_rate);
    for ch in 0..2 {
        for sample in frame.data_mut(ch) {
            *sample = 0;
        }
    }

    // Encode a handful of packets up front so the cancellation test isn't
    // gated on encoder throughput.
    let mut packets = Vec::new();
    for i in 0..6 {
        frame.set_pts(Some(i * frame_size as i64));
        enc.send_frame(&frame).unwrap();
        while let Some(packet) = enc.receive_packet().unwrap() {
            packets.push(packet);
        }
    }
    assert!(packets.len() >= 2, "need at least two packets to exercise backpressure");
    let queued = packets.len();

    // Capacity large enough that every packet sends without blocking — the
    // point of this test is what happens when cancellation is observed
    // *before* the consumer ever looks at them, not queue backpressure.
    let (tx, rx) = bounded::<ffmpeg::codec::packet::Packet>(queued.max(1));
    for packet in packets {
        tx.send(packet).await.unwrap();
    }

    let cancel = Cancel::new();
    cancel.stop();
    let muxer = Arc::new(Mutex::new(muxer));
    let source_tb = enc.output_timebase();

    assert_eq!(rx.len(), queued);

    write_to_muxer(rx, muxer.clone(), slot, source_tb, cancel)
        .await
        .unwrap();

    // Cancellation was already observed before `write_to_muxer` ever called
    // `receive`, so nothing should have reached the muxer's buffer.
    assert!(muxer.lock().await.current_data().is_empty(), "no packet should have reached the muxer");
}
