//! Network transport for RTSP signaling and RTP/RTCP media.
//!
//! - **TCP** ([`tcp`]): RTSP request/response signaling, one thread per
//!   client connection.
//! - **UDP** ([`udp`]): RTP and RTCP datagrams, one socket per direction of
//!   each stream.
//!
//! Interleaved TCP transport (RFC 2326 §10.12) is not offered; SETUP
//! answers it with 461.

pub mod tcp;
pub mod udp;

pub use udp::UdpTransport;
