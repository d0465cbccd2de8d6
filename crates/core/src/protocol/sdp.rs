//! SDP session description (RFC 4566 / RFC 8866) for DESCRIBE.
//!
//! The session-level part comes from [`ServerConfig`]; each advertised
//! stream appends the media section built by its
//! [`Subsession`](crate::session::Subsession):
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                             ← session name
//! t=0 0                                        ← timing (live stream)
//! a=tool:avrelay                               ← server software
//! a=type:broadcast                             ← conference type
//! a=control:*                                  ← aggregate control
//! m=video 5004 RTP/AVP 96                      ← per-stream sections
//! c=IN IP4 0.0.0.0
//! b=AS:5000
//! a=rtcp:5005
//! a=rtpmap:96 H264/90000
//! a=control:track1
//! ```

use std::fmt::Write as _;

use crate::server::ServerConfig;
use crate::session::AddressFamily;

/// Build the DESCRIBE body from the session header and `media` sections.
pub fn session_description<'a>(
    config: &ServerConfig,
    host: &str,
    family: AddressFamily,
    media: impl IntoIterator<Item = &'a str>,
) -> String {
    let addr_type = match family {
        AddressFamily::Ipv4 => "IP4",
        AddressFamily::Ipv6 => "IP6",
    };

    let mut sdp = String::with_capacity(512);
    let _ = write!(
        sdp,
        "v=0\r\no={} {} {} IN {} {}\r\ns={}\r\nt=0 0\r\n",
        config.sdp_username,
        config.sdp_session_id,
        config.sdp_session_version,
        addr_type,
        host,
        config.sdp_session_name
    );
    sdp.push_str("a=tool:avrelay\r\na=type:broadcast\r\na=control:*\r\n");
    for section in media {
        sdp.push_str(section);
    }

    tracing::trace!(%sdp, "session description");
    sdp
}
