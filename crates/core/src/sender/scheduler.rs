//! Packetizer selection and RTCP pacing for the sender loop.

use std::net::SocketAddr;
use std::time::Instant;

use crate::error::{RelayError, Result};
use crate::media::audio::AudioPacketizer;
use crate::media::h264::H264Packetizer;
use crate::media::jpeg::JpegPacketizer;
use crate::media::rtcp::{RtcpFeedback, RtcpSession};
use crate::media::{MediaCodec, Packetizer, StreamCodec, VideoCodec};
use crate::transport::UdpTransport;

/// The packetizer a sender is bound to after its first frame.
#[derive(Debug)]
pub enum TxPacketizer {
    H264(H264Packetizer),
    Jpeg(JpegPacketizer),
    Audio(AudioPacketizer),
}

impl TxPacketizer {
    /// Pick the packetizer for `codec`.
    pub fn for_codec(codec: &MediaCodec, mtu: usize) -> Result<Self> {
        match codec {
            MediaCodec::Video(video) => match video.stream_codec() {
                Some(StreamCodec::H264) => Ok(Self::H264(
                    H264Packetizer::with_random_ssrc(StreamCodec::H264.payload_type())
                        .with_mtu(mtu),
                )),
                Some(StreamCodec::Jpeg) => {
                    Ok(Self::Jpeg(JpegPacketizer::with_random_ssrc().with_mtu(mtu)))
                }
                None => Err(RelayError::UnsupportedCodec(video.name().to_string())),
            },
            MediaCodec::Audio(format) => Ok(Self::Audio(AudioPacketizer::with_random_ssrc(format))),
        }
    }

    /// Whether a frame tagged `codec` belongs to the bound stream.
    pub fn accepts(&self, codec: &MediaCodec) -> bool {
        match (self, codec) {
            (Self::H264(_), MediaCodec::Video(VideoCodec::H264)) => true,
            (Self::Jpeg(_), MediaCodec::Video(VideoCodec::Jpeg | VideoCodec::Mjpg)) => true,
            (Self::Audio(p), MediaCodec::Audio(format)) => p.format() == format,
            _ => false,
        }
    }

    /// Stream codec to advertise for a video stream.
    pub fn stream_codec(&self) -> Option<StreamCodec> {
        match self {
            Self::H264(_) => Some(StreamCodec::H264),
            Self::Jpeg(_) => Some(StreamCodec::Jpeg),
            Self::Audio(_) => None,
        }
    }

    /// Extra `a=fmtp` line for the session description, when known.
    pub fn fmtp_line(&self) -> Option<String> {
        match self {
            Self::H264(p) => p.fmtp_line(),
            _ => None,
        }
    }

    pub fn packetizer(&mut self) -> &mut dyn Packetizer {
        match self {
            Self::H264(p) => p,
            Self::Jpeg(p) => p,
            Self::Audio(p) => p,
        }
    }
}

/// Drives the RTCP session of a stream from the sender loop.
///
/// Called once per frame: the session clock is derived from wall time since
/// the pacer was created (`elapsed / 100 µs * clock_rate / 10 000`, i.e. ×9
/// at 90 kHz), a report goes out when the randomized interval elapsed, and
/// inbound RTCP is drained without blocking.
#[derive(Debug)]
pub struct RtcpPacer {
    session: RtcpSession,
    socket: UdpTransport,
    clock_rate: u32,
    start: Instant,
    reports_sent: u64,
}

impl RtcpPacer {
    pub fn new(socket: UdpTransport, ssrc: u32, clock_rate: u32) -> Self {
        tracing::debug!(
            port = socket.local_port(),
            ssrc = format_args!("{:#010X}", ssrc),
            clock_rate,
            "RTCP pacing enabled"
        );
        Self {
            session: RtcpSession::new(ssrc),
            socket,
            clock_rate,
            start: Instant::now(),
            reports_sent: 0,
        }
    }

    pub fn on_rtp_sent(&mut self, packet_len: usize) {
        self.session.on_rtp_sent(packet_len);
    }

    pub fn reports_sent(&self) -> u64 {
        self.reports_sent
    }

    /// Media clock value for `now`.
    pub fn media_timestamp(&self, now: Instant) -> u32 {
        let ticks_100us = now.saturating_duration_since(self.start).as_micros() as u64 / 100;
        (ticks_100us * self.clock_rate as u64 / 10_000) as u32
    }

    pub fn after_frame(&mut self, now: Instant, rtcp_dest: SocketAddr) -> Result<RtcpFeedback> {
        self.session.update(self.media_timestamp(now));

        if let Some(report) = self.session.poll_report(now) {
            self.socket.send_to(&report, rtcp_dest)?;
            self.reports_sent += 1;
            tracing::trace!(dest = %rtcp_dest, bytes = report.len(), "RTCP sender report sent");
        }

        let mut feedback = RtcpFeedback::default();
        let mut buf = [0u8; 1500];
        while let Some((len, from)) = self.socket.try_recv(&mut buf)? {
            let incoming = self.session.handle_incoming(&buf[..len]);
            for block in &incoming.reports {
                tracing::debug!(
                    %from,
                    reporter = format_args!("{:#010X}", block.reporter),
                    fraction_lost = block.fraction_lost,
                    cumulative_lost = block.cumulative_lost,
                    jitter = block.jitter,
                    "RTCP receiver report"
                );
            }
            for ssrc in &incoming.byes {
                tracing::info!(%from, ssrc = format_args!("{:#010X}", ssrc), "RTCP BYE");
            }
            feedback.reports.extend(incoming.reports);
            feedback.byes.extend(incoming.byes);
            feedback.own_packets += incoming.own_packets;
        }
        Ok(feedback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AudioCodec, AudioFormat};
    use std::time::Duration;

    #[test]
    fn selects_by_codec() {
        let h264 = TxPacketizer::for_codec(&MediaCodec::Video(VideoCodec::H264), 1400).unwrap();
        assert!(matches!(h264, TxPacketizer::H264(_)));
        let mjpg = TxPacketizer::for_codec(&MediaCodec::Video(VideoCodec::Mjpg), 1400).unwrap();
        assert_eq!(mjpg.stream_codec(), Some(StreamCodec::Jpeg));
    }

    #[test]
    fn unsupported_video_codec() {
        let err = TxPacketizer::for_codec(&MediaCodec::Video(VideoCodec::Vp8), 1400).unwrap_err();
        assert!(matches!(err, RelayError::UnsupportedCodec(name) if name == "VP8"));
    }

    #[test]
    fn other_family_not_accepted() {
        let p = TxPacketizer::for_codec(&MediaCodec::Video(VideoCodec::H264), 1400).unwrap();
        assert!(p.accepts(&MediaCodec::Video(VideoCodec::H264)));
        assert!(!p.accepts(&MediaCodec::Video(VideoCodec::Jpeg)));
        let opus = MediaCodec::Audio(AudioFormat::new(AudioCodec::Opus, 48000, 2));
        assert!(!p.accepts(&opus));
        let a = TxPacketizer::for_codec(&opus, 1400).unwrap();
        assert!(a.accepts(&opus));
    }

    #[test]
    fn audio_format_change_not_accepted() {
        let pcmu = AudioFormat::new(AudioCodec::Pcmu, 8000, 1);
        let p = TxPacketizer::for_codec(&MediaCodec::Audio(pcmu), 1400).unwrap();
        assert!(p.accepts(&MediaCodec::Audio(pcmu)));
        assert!(!p.accepts(&MediaCodec::Audio(AudioFormat::new(AudioCodec::Pcmu, 16000, 1))));
        assert!(!p.accepts(&MediaCodec::Audio(AudioFormat::new(AudioCodec::Pcmu, 8000, 2))));
        assert!(!p.accepts(&MediaCodec::Audio(AudioFormat::new(AudioCodec::Pcma, 8000, 1))));
    }

    #[test]
    fn media_clock_is_nine_ticks_per_100us_at_90k() {
        let pacer = RtcpPacer::new(UdpTransport::bind(0).unwrap(), 1, 90000);
        let ts = pacer.media_timestamp(pacer.start + Duration::from_millis(1));
        assert_eq!(ts, 90);
    }
}
