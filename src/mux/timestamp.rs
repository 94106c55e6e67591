//! Timestamp rescaling and repair applied to every packet just before it is
//! handed to the sync queue.
//!
//! Three independent fixups, applied in order:
//! 1. rescale from the source timebase to the output stream's timebase
//! 2. repair DTS > PTS (some sources emit this transiently around edits)
//! 3. enforce a strictly-monotonic DTS per stream

use ffmpeg_next as ffmpeg;

use crate::ffmpeg_utils::helpers;
use crate::ffmpeg_utils::utils::{rescale_delta, rescale_ts};
use crate::mux::stream::StreamDescriptor;

/// Rescale a packet's pts/dts/duration from `from` to `to` in place.
pub fn rescale_packet(
    packet: &mut ffmpeg::codec::packet::Packet,
    from: ffmpeg::Rational,
    to: ffmpeg::Rational,
) {
    if let Some(pts) = packet.pts() {
        packet.set_pts(Some(rescale_ts(pts, from, to)));
    }
    if let Some(dts) = packet.dts() {
        packet.set_dts(Some(rescale_ts(dts, from, to)));
    }
    if packet.duration() > 0 {
        packet.set_duration(rescale_ts(packet.duration(), from, to));
    }
}

/// Rescale an audio stream-copy packet's DTS/PTS from `from` to `to` via an
/// FFmpeg-style `rescale_delta` with the stream's carry, instead of plain
/// `rescale_packet`'s independent `rescale_q` calls — accumulated rounding
/// error matters here because audio packet durations rarely divide evenly
/// into the output timebase (spec.md §4.5).
///
/// Duration is taken from the packet if it has one, else derived from
/// `codec_params` (`av_get_audio_frame_duration2`, falling back to
/// `codecpar.frame_size`). `PTS` is set equal to the rescaled `DTS`,
/// matching the streamcopy filter's own audio PTS-tracks-DTS behavior.
pub fn rescale_packet_audio_streamcopy(
    packet: &mut ffmpeg::codec::packet::Packet,
    stream: &mut StreamDescriptor,
    codec_params: &ffmpeg::codec::parameters::Parameters,
    from: ffmpeg::Rational,
    to: ffmpeg::Rational,
) {
    let Some(in_ts) = packet.dts().or_else(|| packet.pts()) else {
        return;
    };

    let sample_rate = helpers::codec_params_sample_rate(codec_params);
    if sample_rate == 0 {
        rescale_packet(packet, from, to);
        return;
    }
    let fs_tb = ffmpeg::Rational::new(1, sample_rate as i32);

    let duration = if packet.duration() > 0 {
        packet.duration() as i32
    } else {
        let derived = helpers::audio_frame_duration(codec_params, packet.size() as i32);
        if derived > 0 {
            derived
        } else {
            helpers::codec_params_frame_size(codec_params).max(0)
        }
    };

    let new_dts = rescale_delta(
        from,
        in_ts,
        fs_tb,
        duration,
        &mut stream.ts_rescale_delta_last,
        to,
    );
    packet.set_dts(Some(new_dts));
    packet.set_pts(Some(new_dts));

    if packet.duration() > 0 {
        packet.set_duration(rescale_ts(packet.duration(), from, to));
    }
}

/// Repair a packet whose DTS exceeds its PTS, and enforce that DTS is
/// monotonic relative to the stream's previously-written DTS without ever
/// letting DTS overtake PTS.
///
/// When `stream.last_mux_dts` is unset (the very first packet on this
/// stream), the fallback value is `0` — matching the documented behavior of
/// the system this crate's muxer design is modeled on. The first time this
/// fallback fires for a stream it is logged once at debug level, purely for
/// observability; the behavior itself is unchanged.
///
/// `non_strict_ts` mirrors the output format's `AVFMT_TS_NONSTRICT` flag: a
/// format advertising it permits successive packets to share a DTS, so the
/// monotonic floor only requires `dts >= last_mux_dts` rather than `>`.
pub fn repair_dts(
    packet: &mut ffmpeg::codec::packet::Packet,
    stream: &mut StreamDescriptor,
    non_strict_ts: bool,
) {
    let Some(mut pts) = packet.pts() else { return };
    let Some(mut dts) = packet.dts() else { return };

    let floor = stream.last_mux_dts.unwrap_or_else(|| {
        if !stream.logged_dts_fallback {
            tracing::debug!(
                output_index = stream.output_index,
                "no prior DTS recorded for stream, using 0 as repair floor"
            );
        }
        0
    });
    stream.logged_dts_fallback = true;

    // Step 4: if DTS overtook PTS, replace both with the median of
    // (pts, dts, floor + 1) rather than just clamping DTS down to PTS —
    // clamping alone can still leave the pair behind the stream's floor.
    if dts > pts {
        let candidate = median3(pts, dts, floor + 1);
        pts = candidate;
        dts = candidate;
    }

    // Step 5: enforce monotonic DTS, raising PTS alongside DTS so the
    // DTS <= PTS invariant never regresses from the bump itself.
    if stream.last_mux_dts.is_some() {
        let max_allowed = floor + if non_strict_ts { 0 } else { 1 };
        if dts < max_allowed {
            let bump = max_allowed - dts;
            dts = max_allowed;
            pts += bump;
        }
    }

    packet.set_pts(Some(pts));
    packet.set_dts(Some(dts));
    stream.last_mux_dts = Some(dts);
}

/// The median of three `i64` values.
fn median3(a: i64, b: i64, c: i64) -> i64 {
    let mut v = [a, b, c];
    v.sort_unstable();
    v[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> StreamDescriptor {
        StreamDescriptor::new(0, Some(0), ffmpeg::media::Type::Video, ffmpeg::Rational::new(1, 90_000))
    }

    #[test]
    fn rescale_doubles_timebase_denominator() {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        packet.set_pts(Some(100));
        packet.set_dts(Some(100));
        rescale_packet(
            &mut packet,
            ffmpeg::Rational::new(1, 1000),
            ffmpeg::Rational::new(1, 2000),
        );
        assert_eq!(packet.pts(), Some(200));
        assert_eq!(packet.dts(), Some(200));
    }

    #[test]
    fn repairs_dts_greater_than_pts() {
        // No prior DTS: floor + 1 == 1, so median(10, 20, 1) == 10 — both
        // pts and dts land on the median, preserving dts <= pts.
        let mut s = stream();
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        packet.set_pts(Some(10));
        packet.set_dts(Some(20));
        repair_dts(&mut packet, &mut s, false);
        assert_eq!(packet.dts(), Some(10));
        assert_eq!(packet.pts(), Some(10));
    }

    #[test]
    fn enforces_monotonic_dts() {
        let mut s = stream();
        s.last_mux_dts = Some(50);
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        packet.set_pts(Some(50));
        packet.set_dts(Some(50));
        repair_dts(&mut packet, &mut s, false);
        assert_eq!(packet.dts(), Some(51));
        assert_eq!(packet.pts(), Some(51));
    }

    #[test]
    fn enforces_monotonic_dts_raises_pts_with_dts() {
        // DTS bumped by 3 past floor; PTS must be raised by the same delta
        // so DTS never overtakes PTS as a side effect of the repair.
        let mut s = stream();
        s.last_mux_dts = Some(50);
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        packet.set_pts(Some(48));
        packet.set_dts(Some(48));
        repair_dts(&mut packet, &mut s, false);
        assert_eq!(packet.dts(), Some(51));
        assert_eq!(packet.pts(), Some(51));
    }

    #[test]
    fn non_strict_ts_allows_equal_dts() {
        let mut s = stream();
        s.last_mux_dts = Some(50);
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        packet.set_pts(Some(50));
        packet.set_dts(Some(50));
        repair_dts(&mut packet, &mut s, true);
        assert_eq!(packet.dts(), Some(50));
        assert_eq!(packet.pts(), Some(50));
    }

    #[test]
    fn median_repair_uses_floor_plus_one_when_highest() {
        // pts=5, dts=9, floor+1=20: median is 9, so dts clamps down to 9 but
        // a subsequent monotonic check (floor=8) would still need to apply.
        let mut s = stream();
        s.last_mux_dts = Some(8);
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        packet.set_pts(Some(5));
        packet.set_dts(Some(9));
        repair_dts(&mut packet, &mut s, false);
        assert_eq!(packet.dts(), Some(9));
        assert_eq!(packet.pts(), Some(9));
    }

    fn audio_stream() -> StreamDescriptor {
        StreamDescriptor::new(0, Some(0), ffmpeg::media::Type::Audio, ffmpeg::Rational::new(1, 48_000))
    }

    fn audio_params(sample_rate: i32) -> ffmpeg::codec::parameters::Parameters {
        let mut params = ffmpeg::codec::parameters::Parameters::default();
        helpers::codec_params_set_sample_rate_for_test(&mut params, sample_rate);
        params
    }

    #[test]
    fn audio_streamcopy_rescale_sets_pts_equal_to_dts() {
        let mut s = audio_stream();
        let params = audio_params(48_000);
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        packet.set_pts(Some(1000));
        packet.set_dts(Some(1000));
        rescale_packet_audio_streamcopy(
            &mut packet,
            &mut s,
            &params,
            ffmpeg::Rational::new(1, 1000),
            ffmpeg::Rational::new(1, 48_000),
        );
        assert_eq!(packet.pts(), packet.dts());
        assert!(s.ts_rescale_delta_last != i64::MIN);
    }

    #[test]
    fn audio_streamcopy_rescale_carries_across_packets() {
        let mut s = audio_stream();
        let params = audio_params(48_000);

        let mut first = ffmpeg::codec::packet::Packet::empty();
        first.set_pts(Some(0));
        first.set_dts(Some(0));
        first.set_duration(1024);
        rescale_packet_audio_streamcopy(
            &mut first,
            &mut s,
            &params,
            ffmpeg::Rational::new(1, 1000),
            ffmpeg::Rational::new(1, 48_000),
        );
        let carry_after_first = s.ts_rescale_delta_last;

        let mut second = ffmpeg::codec::packet::Packet::empty();
        second.set_pts(Some(1024 * 1000 / 48_000));
        second.set_dts(Some(1024 * 1000 / 48_000));
        second.set_duration(1024);
        rescale_packet_audio_streamcopy(
            &mut second,
            &mut s,
            &params,
            ffmpeg::Rational::new(1, 1000),
            ffmpeg::Rational::new(1, 48_000),
        );
        assert_eq!(s.ts_rescale_delta_last, carry_after_first + 1024);
    }
}
