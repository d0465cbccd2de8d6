use std::fmt;

use crate::error::{ParseErrorKind, RelayError, Result};

fn parse_error(kind: ParseErrorKind) -> RelayError {
    RelayError::Parse { kind }
}

/// RTSP method token of a request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Pause,
    Teardown,
    GetParameter,
    /// Any other token (ANNOUNCE, RECORD, SET_PARAMETER, ...).
    Other(String),
}

impl Method {
    /// Method tokens are case-sensitive (RFC 2326 §6.1).
    pub fn from_token(token: &str) -> Self {
        match token {
            "OPTIONS" => Self::Options,
            "DESCRIBE" => Self::Describe,
            "SETUP" => Self::Setup,
            "PLAY" => Self::Play,
            "PAUSE" => Self::Pause,
            "TEARDOWN" => Self::Teardown,
            "GET_PARAMETER" => Self::GetParameter,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
            Self::GetParameter => "GET_PARAMETER",
            Self::Other(token) => token,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed RTSP request head (RFC 2326 §6) plus its optional body.
///
/// ```text
/// SETUP rtsp://host/stream/track1 RTSP/1.0
/// CSeq: 3
/// Transport: RTP/AVP;unicast;client_port=6000-6001
/// ```
///
/// Header names keep their received spelling; lookups ignore case.
#[derive(Debug)]
pub struct RtspRequest {
    pub method: Method,
    pub uri: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    /// Filled by the connection once `Content-Length` bytes were read.
    pub body: Option<String>,
}

impl RtspRequest {
    /// Parse a request head, from the request line up to the first blank
    /// line. Anything after the blank line is ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines().map(|l| l.trim_end_matches('\r'));

        let request_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| parse_error(ParseErrorKind::EmptyRequest))?;

        let mut tokens = request_line.split_whitespace();
        let (Some(method), Some(uri), Some(version), None) =
            (tokens.next(), tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(parse_error(ParseErrorKind::InvalidRequestLine));
        };
        if version != "RTSP/1.0" {
            tracing::warn!(version, "unexpected RTSP version");
        }

        let headers = lines
            .take_while(|l| !l.is_empty())
            .map(|line| {
                line.split_once(':')
                    .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                    .ok_or_else(|| parse_error(ParseErrorKind::InvalidHeader))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RtspRequest {
            method: Method::from_token(method),
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
            body: None,
        })
    }

    /// Case-insensitive header lookup (RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find_map(|(key, value)| key.eq_ignore_ascii_case(name).then_some(value.as_str()))
    }

    /// `CSeq` value to echo in the response.
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Session id from the `Session` header, without `;timeout=`.
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .and_then(|s| s.split(';').next())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Declared body length; `0` when the header is absent.
    pub fn content_length(&self) -> Result<usize> {
        self.get_header("Content-Length").map_or(Ok(0), |v| {
            v.parse()
                .map_err(|_| parse_error(ParseErrorKind::InvalidContentLength))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_request() {
        let raw = "SETUP rtsp://10.0.0.2:8554/live/track1 RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=6000-6001\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Method::Setup);
        assert_eq!(req.uri, "rtsp://10.0.0.2:8554/live/track1");
        assert_eq!(req.cseq(), Some("3"));
        assert_eq!(
            req.get_header("transport"),
            Some("RTP/AVP;unicast;client_port=6000-6001")
        );
    }

    #[test]
    fn unknown_method_is_kept() {
        let req = RtspRequest::parse("RECORD rtsp://h/s RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
        assert_eq!(req.method, Method::Other("RECORD".into()));
        assert_eq!(req.method.to_string(), "RECORD");
    }

    #[test]
    fn session_and_body_length() {
        let raw = "GET_PARAMETER rtsp://h/s RTSP/1.0\r\nCSeq: 9\r\n\
                   Session: 0A1B2C3D4E5F6071;timeout=60\r\nContent-Length: 12\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Method::GetParameter);
        assert_eq!(req.session_id(), Some("0A1B2C3D4E5F6071"));
        assert_eq!(req.content_length().unwrap(), 12);

        let bad = RtspRequest::parse("OPTIONS * RTSP/1.0\r\nContent-Length: x\r\n\r\n").unwrap();
        assert!(matches!(
            bad.content_length(),
            Err(RelayError::Parse {
                kind: ParseErrorKind::InvalidContentLength
            })
        ));
        assert_eq!(bad.session_id(), None);
    }

    #[test]
    fn malformed_heads() {
        assert!(matches!(
            RtspRequest::parse(""),
            Err(RelayError::Parse {
                kind: ParseErrorKind::EmptyRequest
            })
        ));
        assert!(matches!(
            RtspRequest::parse("PLAY rtsp://h/s\r\n\r\n"),
            Err(RelayError::Parse {
                kind: ParseErrorKind::InvalidRequestLine
            })
        ));
        assert!(matches!(
            RtspRequest::parse("PLAY rtsp://h/s RTSP/1.0\r\nno colon here\r\n\r\n"),
            Err(RelayError::Parse {
                kind: ParseErrorKind::InvalidHeader
            })
        ));
    }
}
