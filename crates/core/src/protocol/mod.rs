//! RTSP signaling (RFC 2326) for the relay's video and audio streams.
//!
//! A connection reads one request head at a time, plus a body when
//! `Content-Length` is present. [`MethodHandler`] routes it by [`Method`]
//! and answers with an [`RtspResponse`]. DESCRIBE renders [`sdp`]; the
//! stream-control methods reach the sender as bus messages.
//!
//! ```text
//! client                      server                    sender
//!   | SETUP client_port=a-b ->  |  (records destination)    |
//!   | PLAY                ->    | -- port a, receiver ---->  | RTP to client:a
//!   | PAUSE               ->    | -- pause -------------->   |
//!   | TEARDOWN            ->    | -- port, 127.0.0.1 ---->   | parked
//! ```
//!
//! Only `RTP/AVP` over UDP unicast is accepted. Interleaved TCP gets
//! 461. A session id is unique per server; the `Session` header of
//! every later request must match one.

pub mod handler;
pub mod request;
pub mod response;
pub mod sdp;

pub use handler::MethodHandler;
pub use request::{Method, RtspRequest};
pub use response::RtspResponse;
