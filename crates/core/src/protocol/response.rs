use std::fmt::Write as _;

/// `Server` header sent with every response (RFC 2326 §12.36).
pub const SERVER_AGENT: &str = concat!("avrelay/", env!("CARGO_PKG_VERSION"));

/// Reason phrase for the status codes this server emits (RFC 2326 §7.1.1).
fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        454 => "Session Not Found",
        455 => "Method Not Valid in This State",
        461 => "Unsupported Transport",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}

/// An RTSP response under construction.
///
/// Built by chaining [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body); [`serialize`](Self::serialize) appends
/// `Content-Length` for a body.
#[must_use]
#[derive(Debug)]
pub struct RtspResponse {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    pub fn new(status_code: u16) -> Self {
        RtspResponse {
            status_code,
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn bad_request() -> Self {
        Self::new(400)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    /// The `Session` header names no session of this connection.
    pub fn session_not_found() -> Self {
        Self::new(454)
    }

    /// E.g. PLAY before any SETUP.
    pub fn method_not_valid() -> Self {
        Self::new(455)
    }

    /// TCP interleaved or otherwise unusable `Transport`.
    pub fn unsupported_transport() -> Self {
        Self::new(461)
    }

    pub fn internal_error() -> Self {
        Self::new(500)
    }

    pub fn not_implemented() -> Self {
        Self::new(501)
    }

    pub fn reason(&self) -> &'static str {
        reason_phrase(self.status_code)
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Wire form of the response.
    pub fn serialize(&self) -> String {
        let body = self.body.as_deref().unwrap_or("");
        let mut out = String::with_capacity(128 + body.len());
        let _ = write!(out, "RTSP/1.0 {} {}\r\n", self.status_code, self.reason());
        for (name, value) in &self.headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        if !body.is_empty() {
            let _ = write!(out, "Content-Length: {}\r\n", body.len());
        }
        out.push_str("\r\n");
        out.push_str(body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_only() {
        let wire = RtspResponse::ok()
            .add_header("CSeq", "1")
            .add_header("Public", "OPTIONS, DESCRIBE")
            .serialize();
        assert_eq!(
            wire,
            format!("RTSP/1.0 200 OK\r\nServer: {SERVER_AGENT}\r\nCSeq: 1\r\nPublic: OPTIONS, DESCRIBE\r\n\r\n")
        );
    }

    #[test]
    fn body_gets_length() {
        let wire = RtspResponse::ok()
            .add_header("CSeq", "2")
            .with_body("v=0\r\n".to_string())
            .serialize();
        assert!(wire.contains("Content-Length: 5\r\n\r\nv=0\r\n"));
        assert!(wire.ends_with("v=0\r\n"));
    }

    #[test]
    fn error_statuses_carry_reason() {
        assert!(
            RtspResponse::unsupported_transport()
                .serialize()
                .starts_with("RTSP/1.0 461 Unsupported Transport\r\n")
        );
        assert_eq!(RtspResponse::session_not_found().reason(), "Session Not Found");
        assert_eq!(RtspResponse::new(299).reason(), "Unknown");
    }
}
