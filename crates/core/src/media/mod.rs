//! Media codecs and RTP packetization.
//!
//! This module provides the [`Packetizer`] trait and the payload formats the
//! transmission scheduler can emit, plus the RTCP sender-side session.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded frame is split into one or more RTP packets. Every packet
//! carries a 12-byte fixed header ([`rtp::RtpHeader`]) with a wrapping
//! sequence number, a media-clock timestamp, the stream SSRC and a marker
//! bit on the last packet of a frame.
//!
//! ## Payload formats
//!
//! | Codec | Module | RFC |
//! |-------|--------|-----|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) |
//! | JPEG | [`jpeg`] | [RFC 2435](https://tools.ietf.org/html/rfc2435) |
//! | PCMU / PCMA / Opus | [`audio`] | [RFC 3551](https://tools.ietf.org/html/rfc3551), [RFC 7587](https://tools.ietf.org/html/rfc7587) |
//! | MP3 | [`audio`] | [RFC 2250](https://tools.ietf.org/html/rfc2250) §3.5 |

pub mod audio;
mod codec;
pub mod h264;
pub mod jpeg;
pub mod rtcp;
pub mod rtp;

pub use codec::{
    AudioCodec, AudioFormat, EncodedFrame, MediaCodec, MediaKind, StreamCodec, VideoCodec,
};

/// Codec-specific RTP packetizer.
///
/// The generic RTP header is handled by [`rtp::RtpHeader`]; packetizers
/// compose it rather than reimplementing header serialization.
pub trait Packetizer: Send {
    /// Packetize one encoded frame into RTP packets.
    ///
    /// Each returned `Vec<u8>` is a complete RTP packet: 12-byte header
    /// (RFC 3550 §5.1) followed by the codec-specific payload.
    ///
    /// `timestamp_increment` advances the RTP timestamp after this frame,
    /// in media clock ticks.
    fn packetize(&mut self, encoded_data: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>>;

    /// Encoding name for the SDP `a=rtpmap` attribute (e.g. `"H264"`).
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// RTP payload type number (RFC 3551).
    fn payload_type(&self) -> u8;

    /// Synchronization source of the stream; shared with RTCP reports.
    fn ssrc(&self) -> u32;

    /// Sequence number the next packet will carry.
    fn next_sequence(&self) -> u16;

    /// RTP timestamp the next frame will carry, truncated to 32 bits.
    fn next_rtp_timestamp(&self) -> u32;
}
