use std::fmt;
use std::net::IpAddr;

use crossbeam_channel::Sender;

use crate::error::{RelayError, Result};

/// Upper bound on the textual receiver carried by
/// [`SenderMessage::ChangeReceiver`], including room for any IPv6 literal.
pub const MAX_RECEIVER_LEN: usize = 128;

/// A request delivered through the module bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Reconfiguration of a running RTP sender.
    Sender(SenderMessage),
    /// Free-form command text (window title, key codes, ...).
    Text(String),
}

/// Operations understood by the RTP sender module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderMessage {
    /// Change the destination RTP port (RTCP follows at `port + 1`).
    ChangePort(u16),
    /// Change the destination host.
    ChangeReceiver(ReceiverName),
    /// Stop emitting packets without stopping the sender thread.
    Pause,
    /// Resume emitting packets after [`Pause`](Self::Pause).
    Play,
}

impl SenderMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChangePort(_) => "CHANGE_PORT",
            Self::ChangeReceiver(_) => "CHANGE_RECEIVER",
            Self::Pause => "PAUSE",
            Self::Play => "PLAY",
        }
    }
}

impl From<SenderMessage> for Message {
    fn from(msg: SenderMessage) -> Self {
        Message::Sender(msg)
    }
}

/// Receiver host text bounded to [`MAX_RECEIVER_LEN`] bytes.
///
/// Built either from a typed address (always fits) or from user text
/// (validated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverName(String);

impl ReceiverName {
    /// Validate a textual receiver (numeric address or host name).
    pub fn new(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() || text.len() > MAX_RECEIVER_LEN {
            return Err(RelayError::InvalidReceiver(text.to_string()));
        }
        if text.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(RelayError::InvalidReceiver(text.to_string()));
        }
        Ok(Self(text.to_string()))
    }

    /// Numeric-host form of an address.
    pub fn from_ip(ip: IpAddr) -> Self {
        Self(ip.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiverName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome class of a handled message. Numeric values follow HTTP/RTSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok = 200,
    Accepted = 202,
    BadRequest = 400,
    NotFound = 404,
    InternalServerError = 500,
    NotImplemented = 501,
}

impl ResponseStatus {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::Accepted)
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "OK",
            Self::Accepted => "Accepted",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
        };
        write!(f, "{} {}", self.code(), text)
    }
}

/// Answer produced by the module that handled a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: ResponseStatus,
    pub detail: Option<String>,
}

impl Response {
    pub fn new(status: ResponseStatus, detail: Option<&str>) -> Self {
        Self {
            status,
            detail: detail.map(str::to_string),
        }
    }

    pub fn ok() -> Self {
        Self::new(ResponseStatus::Ok, None)
    }

    pub fn bad_request(detail: &str) -> Self {
        Self::new(ResponseStatus::BadRequest, Some(detail))
    }

    pub fn not_found(detail: &str) -> Self {
        Self::new(ResponseStatus::NotFound, Some(detail))
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    /// Convert a non-success response into [`RelayError::SenderRejected`].
    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(RelayError::SenderRejected {
                status: self.status,
                detail: self.detail.unwrap_or_default(),
            })
        }
    }
}

/// A delivered message together with its one-shot reply slot.
///
/// The handling module answers with [`respond`](Self::respond). An envelope
/// dropped without an answer replies `500` on its own, so the waiting sender
/// never hangs on a lost message.
#[derive(Debug)]
pub struct Envelope {
    message: Message,
    reply: Option<Sender<Response>>,
}

impl Envelope {
    pub(crate) fn new(message: Message, reply: Sender<Response>) -> Self {
        Self {
            message,
            reply: Some(reply),
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn respond(mut self, response: Response) {
        if let Some(reply) = self.reply.take() {
            // The sender may have timed out already.
            let _ = reply.send(response);
        }
    }
}

impl Drop for Envelope {
    fn drop(&mut self) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Response::new(
                ResponseStatus::InternalServerError,
                Some("message dropped without response"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_name_bounds() {
        assert!(ReceiverName::new("203.0.113.5").is_ok());
        assert!(ReceiverName::new("").is_err());
        assert!(ReceiverName::new("bad host").is_err());
        assert!(ReceiverName::new(&"a".repeat(MAX_RECEIVER_LEN + 1)).is_err());
    }

    #[test]
    fn ipv6_receiver_fits() {
        let ip: IpAddr = "ffff:ffff:ffff:ffff:ffff:ffff:255.255.255.255".parse().unwrap();
        assert!(ReceiverName::from_ip(ip).as_str().len() <= MAX_RECEIVER_LEN);
    }

    #[test]
    fn dropped_envelope_answers() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        drop(Envelope::new(Message::Text("x".into()), tx));
        let resp = rx.try_recv().unwrap();
        assert_eq!(resp.status, ResponseStatus::InternalServerError);
    }

    #[test]
    fn rejected_response_into_error() {
        let err = Response::bad_request("bad port").into_result().unwrap_err();
        assert!(matches!(
            err,
            RelayError::SenderRejected {
                status: ResponseStatus::BadRequest,
                ..
            }
        ));
        assert!(Response::ok().into_result().is_ok());
    }
}
