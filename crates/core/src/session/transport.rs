use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Address family of the RTSP peer; selects the SDP `c=` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub fn of(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::Ipv4,
            IpAddr::V6(v6) if v6.to_ipv4_mapped().is_some() => Self::Ipv4,
            IpAddr::V6(_) => Self::Ipv6,
        }
    }

    /// Connection data value (`IP4 0.0.0.0` / `IP6 ::`).
    pub fn connection_data(self) -> &'static str {
        match self {
            Self::Ipv4 => "IP4 0.0.0.0",
            Self::Ipv6 => "IP6 ::",
        }
    }
}

/// Client address and ports recorded by SETUP (RFC 2326 §12.39).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub ip: IpAddr,
    pub rtp_port: u16,
    pub rtcp_port: u16,
}

impl Destination {
    pub fn rtp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.rtp_port)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rtp_addr())
    }
}

/// Fixed server RTP/RTCP ports returned to the client in SETUP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPorts {
    pub rtp: u16,
    pub rtcp: u16,
}

/// Client-side transport request from the RTSP `Transport` header.
///
/// ```text
/// Transport: RTP/AVP;unicast;client_port=8000-8001
/// ```
///
/// A single `client_port=N` is accepted with RTCP on `N + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub client_rtp_port: u16,
    pub client_rtcp_port: u16,
}

/// Why a `Transport` header was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportRejection {
    /// TCP interleaved or another lower transport (RTSP 461).
    Unsupported,
    /// No usable `client_port` (RTSP 400).
    Invalid,
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// ```
    /// use avrelay::session::transport::{TransportHeader, TransportRejection};
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!((th.client_rtp_port, th.client_rtcp_port), (8000, 8001));
    ///
    /// assert_eq!(
    ///     TransportHeader::parse("RTP/AVP/TCP;interleaved=0-1"),
    ///     Err(TransportRejection::Unsupported)
    /// );
    /// ```
    pub fn parse(header: &str) -> Result<Self, TransportRejection> {
        // Clients may offer several specs separated by commas; take the
        // first UDP one.
        let mut rejection = TransportRejection::Invalid;
        for spec in header.split(',') {
            match Self::parse_spec(spec) {
                Ok(th) => return Ok(th),
                Err(TransportRejection::Unsupported) => rejection = TransportRejection::Unsupported,
                Err(TransportRejection::Invalid) => {}
            }
        }
        Err(rejection)
    }

    fn parse_spec(spec: &str) -> Result<Self, TransportRejection> {
        let mut parts = spec.split(';').map(str::trim);
        let protocol = parts.next().unwrap_or_default();
        if protocol.eq_ignore_ascii_case("RTP/AVP/TCP") || spec.contains("interleaved=") {
            return Err(TransportRejection::Unsupported);
        }
        if !(protocol.eq_ignore_ascii_case("RTP/AVP") || protocol.eq_ignore_ascii_case("RTP/AVP/UDP"))
        {
            return Err(TransportRejection::Unsupported);
        }

        let ports = parts
            .find_map(|p| p.strip_prefix("client_port="))
            .ok_or(TransportRejection::Invalid)?;
        let (rtp, rtcp) = match ports.split_once('-') {
            Some((rtp, rtcp)) => (rtp.parse::<u16>(), rtcp.parse::<u16>()),
            None => {
                let rtp = ports.parse::<u16>();
                let rtcp = rtp.clone().map(|p| p.wrapping_add(1));
                (rtp, rtcp)
            }
        };
        match (rtp, rtcp) {
            (Ok(client_rtp_port), Ok(client_rtcp_port)) => Ok(Self {
                client_rtp_port,
                client_rtcp_port,
            }),
            _ => Err(TransportRejection::Invalid),
        }
    }
}
