//! Stream and RTSP endpoint parameters.

use crate::error::{RelayError, Result};
use crate::media::{AudioFormat, MediaKind, StreamCodec};

/// Default RTSP listening port.
pub const DEFAULT_RTSP_PORT: u16 = 8554;

/// Default RTP port of the primary (video) stream. RTCP uses `port + 1`.
pub const DEFAULT_RTP_PORT: u16 = 5004;

/// Usage text for the RTSP option string.
pub const RTSP_USAGE: &str = "\
rtsp[:port=number]
    default RTSP server port number: 8554
Supported audio codecs: MP3, Opus, PCMA (A-law), PCMU (u-law)
Supported video codecs: H.264, JPEG";

/// Media types advertised by the RTSP endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AvType {
    #[default]
    Video,
    Audio,
    Both,
}

impl AvType {
    pub fn has_video(self) -> bool {
        matches!(self, Self::Video | Self::Both)
    }

    pub fn has_audio(self) -> bool {
        matches!(self, Self::Audio | Self::Both)
    }
}

/// Parameters of the RTSP endpoint and the streams it advertises.
///
/// Server RTP ports are fixed here at startup; they are never derived from
/// what a client asks for.
#[derive(Debug, Clone)]
pub struct RtspParams {
    /// TCP port of the RTSP listener (`0` binds an ephemeral port).
    pub rtsp_port: u16,
    /// Interface the RTSP listener binds to.
    pub bind_host: String,
    /// Server-side video RTP port.
    pub rtp_port: u16,
    /// Server-side audio RTP port.
    pub rtp_port_audio: u16,
    pub av_type: AvType,
    pub audio: AudioFormat,
    pub video_codec: StreamCodec,
    /// Codec parameter line (`a=fmtp:...`) added after the video rtpmap.
    pub video_fmtp: Option<String>,
}

impl Default for RtspParams {
    fn default() -> Self {
        Self {
            rtsp_port: DEFAULT_RTSP_PORT,
            bind_host: "0.0.0.0".to_string(),
            rtp_port: DEFAULT_RTP_PORT,
            rtp_port_audio: DEFAULT_RTP_PORT + 2,
            av_type: AvType::default(),
            audio: AudioFormat::default(),
            video_codec: StreamCodec::default(),
            video_fmtp: None,
        }
    }
}

impl RtspParams {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.rtsp_port)
    }

    /// Server RTP port advertised for `kind`.
    pub fn server_rtp_port(&self, kind: MediaKind) -> u16 {
        match kind {
            MediaKind::Video => self.rtp_port,
            MediaKind::Audio => self.rtp_port_audio,
        }
    }

    pub fn set_server_rtp_port(&mut self, kind: MediaKind, port: u16) {
        match kind {
            MediaKind::Video => self.rtp_port = port,
            MediaKind::Audio => self.rtp_port_audio = port,
        }
    }
}

/// Parsed RTSP option string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtspOption {
    Port(u16),
    Help,
}

/// Parse the RTSP option string: empty, `help`, `port=<n>` or the deprecated
/// `port:<n>`.
pub fn parse_rtsp_option(config: &str) -> Result<RtspOption> {
    let config = config.trim();
    if config.is_empty() {
        return Ok(RtspOption::Port(DEFAULT_RTSP_PORT));
    }
    if config == "help" {
        return Ok(RtspOption::Help);
    }

    let value = if let Some(v) = config.strip_prefix("port=") {
        v
    } else if let Some(v) = config.strip_prefix("port:") {
        tracing::warn!("deprecated usage - use port=number, not port:number");
        v
    } else {
        return Err(RelayError::InvalidOption(format!(
            "'{config}', expected port=<number>"
        )));
    };

    if value.is_empty() {
        return Err(RelayError::InvalidOption("missing port number".to_string()));
    }
    if !value.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(RelayError::InvalidOption(format!("invalid port '{value}'")));
    }
    value
        .parse::<u16>()
        .map(RtspOption::Port)
        .map_err(|_| RelayError::InvalidOption(format!("invalid port '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_option_is_default_port() {
        assert_eq!(
            parse_rtsp_option("").unwrap(),
            RtspOption::Port(DEFAULT_RTSP_PORT)
        );
    }

    #[test]
    fn port_forms() {
        assert_eq!(parse_rtsp_option("port=9000").unwrap(), RtspOption::Port(9000));
        assert_eq!(parse_rtsp_option("port:9001").unwrap(), RtspOption::Port(9001));
        assert_eq!(parse_rtsp_option("help").unwrap(), RtspOption::Help);
    }

    #[test]
    fn rejects_bad_options() {
        assert!(parse_rtsp_option("port=").is_err());
        assert!(parse_rtsp_option("port=-1").is_err());
        assert!(parse_rtsp_option("port=70000").is_err());
        assert!(parse_rtsp_option("bogus").is_err());
    }

    #[test]
    fn audio_port_follows_video_port() {
        let params = RtspParams::default();
        assert_eq!(params.rtp_port, 5004);
        assert_eq!(params.rtp_port_audio, 5006);
        assert!(params.av_type.has_video());
        assert!(!params.av_type.has_audio());
    }

    #[test]
    fn server_port_per_media_kind() {
        let mut params = RtspParams::default();
        params.set_server_rtp_port(MediaKind::Audio, 7000);
        assert_eq!(params.server_rtp_port(MediaKind::Audio), 7000);
        assert_eq!(params.server_rtp_port(MediaKind::Video), 5004);
    }
}
