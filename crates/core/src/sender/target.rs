use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};

use crate::messaging::{Message, Response, ResponseStatus, SenderMessage};

/// Where the sender currently transmits.
///
/// Owned by the sender thread and mutated only through [`apply`](Self::apply),
/// between two frames. Every send reads one [`SocketAddr`] snapshot, so a
/// frame never goes out to a half-updated destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmissionTarget {
    receiver: String,
    ip: IpAddr,
    rtp_port: u16,
    paused: bool,
}

impl TransmissionTarget {
    pub fn new(ip: IpAddr, rtp_port: u16) -> Self {
        Self {
            receiver: ip.to_string(),
            ip,
            rtp_port,
            paused: false,
        }
    }

    /// Loopback target on `rtp_port`, used before any client connects.
    pub fn loopback(rtp_port: u16) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), rtp_port)
    }

    /// Receiver as last requested (host name or numeric address).
    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn rtp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.rtp_port)
    }

    pub fn rtcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.rtp_port.wrapping_add(1))
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Apply one control message and produce its response.
    pub fn apply(&mut self, message: &Message) -> Response {
        let Message::Sender(message) = message else {
            return Response::new(
                ResponseStatus::NotImplemented,
                Some("sender accepts only sender messages"),
            );
        };

        match message {
            SenderMessage::ChangePort(port) => {
                self.rtp_port = *port;
                tracing::info!(rtp = %self.rtp_addr(), "destination port changed");
                Response::ok()
            }
            SenderMessage::ChangeReceiver(name) => match resolve(name.as_str()) {
                Some(ip) => {
                    self.receiver = name.to_string();
                    self.ip = ip;
                    tracing::info!(receiver = %name, rtp = %self.rtp_addr(), "destination changed");
                    Response::ok()
                }
                None => {
                    tracing::warn!(receiver = %name, "cannot resolve receiver");
                    Response::bad_request("unable to change receiver")
                }
            },
            SenderMessage::Pause => {
                self.paused = true;
                tracing::info!("transmission paused");
                Response::ok()
            }
            SenderMessage::Play => {
                self.paused = false;
                tracing::info!(rtp = %self.rtp_addr(), "transmission resumed");
                Response::ok()
            }
        }
    }
}

fn resolve(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse() {
        return Some(ip);
    }
    (host, 0).to_socket_addrs().ok()?.next().map(|a| a.ip())
}
