//! One media stream of an RTSP session.
//!
//! A subsession never touches the sender directly: redirects go out as
//! `CHANGE_PORT` / `CHANGE_RECEIVER` messages over the module bus to
//! `sender` (video) or `audio.sender` (audio).

use std::net::{IpAddr, Ipv4Addr};

use crate::config::RtspParams;
use crate::error::{RelayError, Result};
use crate::media::MediaKind;
use crate::media::audio::AudioPayload;
use crate::messaging::{
    Message, MessagePath, ModuleRef, ReceiverName, SenderMessage, send_message,
};
use crate::sender::sender_path;

use super::transport::{AddressFamily, Destination, ServerPorts};

const VIDEO_BANDWIDTH_KBPS: u32 = 5000;
const AUDIO_BANDWIDTH_KBPS: u32 = 384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsessionState {
    Idle,
    Described,
    Setup,
    Playing,
    Paused,
    TornDown,
}

/// Per-client, per-media-type stream state.
#[derive(Debug)]
pub struct Subsession {
    kind: MediaKind,
    track: String,
    server_rtp_port: u16,
    payload_type: u8,
    codec_attributes: String,
    parent: ModuleRef,
    sdp: Option<(AddressFamily, String)>,
    destination: Option<Destination>,
    state: SubsessionState,
}

impl Subsession {
    /// Subsession for `kind` advertised under control URI `track`.
    ///
    /// `parent` is the module the sender path is resolved from.
    pub fn new(kind: MediaKind, track: &str, params: &RtspParams, parent: ModuleRef) -> Self {
        let (server_rtp_port, payload_type, codec_attributes) = match kind {
            MediaKind::Video => {
                let codec = params.video_codec;
                let pt = codec.payload_type();
                let mut attrs = format!(
                    "a=rtpmap:{pt} {}/{}\r\n",
                    codec.encoding_name(),
                    codec.clock_rate()
                );
                if let Some(fmtp) = &params.video_fmtp {
                    attrs.push_str(fmtp);
                    attrs.push_str("\r\n");
                }
                (params.server_rtp_port(kind), pt, attrs)
            }
            MediaKind::Audio => {
                let payload = AudioPayload::lookup(&params.audio);
                (
                    params.server_rtp_port(kind),
                    payload.payload_type,
                    format!("a=rtpmap:{}\r\n", payload.rtpmap()),
                )
            }
        };

        Self {
            kind,
            track: track.to_string(),
            server_rtp_port,
            payload_type,
            codec_attributes,
            parent,
            sdp: None,
            destination: None,
            state: SubsessionState::Idle,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn track(&self) -> &str {
        &self.track
    }

    pub fn state(&self) -> SubsessionState {
        self.state
    }

    pub fn destination(&self) -> Option<Destination> {
        self.destination
    }

    pub fn server_ports(&self) -> ServerPorts {
        ServerPorts {
            rtp: self.server_rtp_port,
            rtcp: self.server_rtp_port.wrapping_add(1),
        }
    }

    fn sender_path(&self) -> MessagePath {
        sender_path(self.kind)
    }

    /// SDP media section of this stream; built once per address family.
    pub fn sdp_lines(&mut self, family: AddressFamily) -> &str {
        let cached = matches!(&self.sdp, Some((f, _)) if *f == family);
        if !cached {
            let bandwidth = match self.kind {
                MediaKind::Video => VIDEO_BANDWIDTH_KBPS,
                MediaKind::Audio => AUDIO_BANDWIDTH_KBPS,
            };
            let ports = self.server_ports();
            let lines = format!(
                "m={} {} RTP/AVP {}\r\nc=IN {}\r\nb=AS:{}\r\na=rtcp:{}\r\n{}a=control:{}\r\n",
                self.kind,
                ports.rtp,
                self.payload_type,
                family.connection_data(),
                bandwidth,
                ports.rtcp,
                self.codec_attributes,
                self.track
            );
            self.sdp = Some((family, lines));
        }
        if self.state == SubsessionState::Idle {
            self.state = SubsessionState::Described;
        }
        self.sdp.as_ref().map(|(_, s)| s.as_str()).unwrap_or_default()
    }

    /// Record the client destination (replacing any earlier one) and return
    /// the fixed server ports.
    pub fn get_stream_parameters(
        &mut self,
        client_ip: IpAddr,
        client_rtp_port: u16,
        client_rtcp_port: u16,
    ) -> ServerPorts {
        let destination = Destination {
            ip: client_ip,
            rtp_port: client_rtp_port,
            rtcp_port: client_rtcp_port,
        };
        if let Some(previous) = self.destination.replace(destination) {
            tracing::debug!(track = %self.track, %previous, "destination replaced");
        }
        if matches!(
            self.state,
            SubsessionState::Idle | SubsessionState::Described | SubsessionState::TornDown
        ) {
            self.state = SubsessionState::Setup;
        }
        tracing::debug!(track = %self.track, %destination, "stream parameters recorded");
        self.server_ports()
    }

    /// Point the sender at the recorded destination.
    ///
    /// Sends `CHANGE_PORT` then `CHANGE_RECEIVER`; a paused stream is also
    /// resumed. Any non-OK answer aborts with the error.
    pub fn start_stream(&mut self) -> Result<()> {
        let destination = self
            .destination
            .ok_or_else(|| RelayError::TransportNotConfigured(self.track.clone()))?;

        self.send(SenderMessage::ChangePort(destination.rtp_port))?;
        self.send(SenderMessage::ChangeReceiver(ReceiverName::from_ip(
            destination.ip.to_canonical(),
        )))?;
        if self.state == SubsessionState::Paused {
            self.send(SenderMessage::Play)?;
        }

        self.state = SubsessionState::Playing;
        tracing::info!(kind = %self.kind, %destination, "stream started");
        Ok(())
    }

    /// Suspend transmission, keeping the destination.
    pub fn pause_stream(&mut self) -> Result<()> {
        if self.state != SubsessionState::Playing {
            return Ok(());
        }
        self.send(SenderMessage::Pause)?;
        self.state = SubsessionState::Paused;
        Ok(())
    }

    /// Forget the destination and park the sender on loopback at the
    /// server's own RTP port. Failures are logged; teardown always completes.
    pub fn delete_stream(&mut self) {
        let was_paused = self.state == SubsessionState::Paused;
        self.destination = None;
        self.state = SubsessionState::TornDown;

        self.park_sender();
        if was_paused {
            self.send_logged(SenderMessage::Play);
        }
        tracing::info!(kind = %self.kind, "stream deleted");
    }

    /// Undo a [`start_stream`](Self::start_stream) made by a PLAY that failed
    /// on another subsession. The destination is kept and the state goes
    /// back to `previous`, so the client can retry.
    pub fn abort_start(&mut self, previous: SubsessionState) {
        if previous == SubsessionState::Playing || self.state != SubsessionState::Playing {
            return;
        }
        self.park_sender();
        if previous == SubsessionState::Paused {
            self.send_logged(SenderMessage::Pause);
        }
        self.state = previous;
        tracing::info!(kind = %self.kind, state = ?previous, "stream start rolled back");
    }

    /// Point the sender back at `127.0.0.1:<server rtp port>`.
    fn park_sender(&self) {
        self.send_logged(SenderMessage::ChangePort(self.server_rtp_port));
        self.send_logged(SenderMessage::ChangeReceiver(ReceiverName::from_ip(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
        )));
    }

    fn send_logged(&self, message: SenderMessage) {
        let kind = message.kind();
        if let Err(e) = self.send(message) {
            tracing::warn!(track = %self.track, message = kind, error = %e, "parking sender failed");
        }
    }

    fn send(&self, message: SenderMessage) -> Result<()> {
        send_message(&self.parent, &self.sender_path(), Message::Sender(message))?.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AudioCodec, AudioFormat, StreamCodec};
    use crate::messaging::{Envelope, Module, ModuleClass, Response};
    use std::thread;

    fn params() -> RtspParams {
        RtspParams {
            audio: AudioFormat::new(AudioCodec::Opus, 48000, 2),
            ..Default::default()
        }
    }

    /// Answers every message with OK and records it.
    fn fake_sender(module: Module, count: usize) -> thread::JoinHandle<Vec<Message>> {
        thread::spawn(move || {
            let mailbox = module.mailbox();
            let mut seen = Vec::new();
            for _ in 0..count {
                let envelope: Envelope = mailbox.recv().unwrap();
                seen.push(envelope.message().clone());
                envelope.respond(Response::ok());
            }
            seen
        })
    }

    #[test]
    fn video_sdp_fragment() {
        let root = Module::root();
        let mut s = Subsession::new(MediaKind::Video, "track1", &params(), root.handle());
        assert_eq!(
            s.sdp_lines(AddressFamily::Ipv4),
            "m=video 5004 RTP/AVP 96\r\nc=IN IP4 0.0.0.0\r\nb=AS:5000\r\na=rtcp:5005\r\n\
             a=rtpmap:96 H264/90000\r\na=control:track1\r\n"
        );
        assert_eq!(s.state(), SubsessionState::Described);
    }

    #[test]
    fn jpeg_uses_static_payload() {
        let root = Module::root();
        let p = RtspParams {
            video_codec: StreamCodec::Jpeg,
            ..params()
        };
        let mut s = Subsession::new(MediaKind::Video, "track1", &p, root.handle());
        let sdp = s.sdp_lines(AddressFamily::Ipv6);
        assert!(sdp.starts_with("m=video 5004 RTP/AVP 26\r\nc=IN IP6 ::\r\n"));
        assert!(sdp.contains("a=rtpmap:26 JPEG/90000\r\n"));
    }

    #[test]
    fn audio_sdp_fragment() {
        let root = Module::root();
        let mut s = Subsession::new(MediaKind::Audio, "track2", &params(), root.handle());
        assert_eq!(
            s.sdp_lines(AddressFamily::Ipv4),
            "m=audio 5006 RTP/AVP 97\r\nc=IN IP4 0.0.0.0\r\nb=AS:384\r\na=rtcp:5007\r\n\
             a=rtpmap:97 opus/48000/2\r\na=control:track2\r\n"
        );
    }

    #[test]
    fn start_stream_without_setup_fails() {
        let root = Module::root();
        let mut s = Subsession::new(MediaKind::Video, "track1", &params(), root.handle());
        assert!(matches!(
            s.start_stream(),
            Err(RelayError::TransportNotConfigured(_))
        ));
    }

    #[test]
    fn start_then_delete_redirects_sender() {
        let root = Module::root();
        let audio = Module::new(ModuleClass::Audio, &root.handle());
        let sender = Module::new(ModuleClass::Sender, &audio.handle());
        let seen = fake_sender(sender, 4);

        let mut s = Subsession::new(MediaKind::Audio, "track2", &params(), root.handle());
        let ports = s.get_stream_parameters("10.1.2.3".parse().unwrap(), 6000, 6001);
        assert_eq!(ports, ServerPorts { rtp: 5006, rtcp: 5007 });
        s.start_stream().unwrap();
        assert_eq!(s.state(), SubsessionState::Playing);
        s.delete_stream();
        assert!(s.destination().is_none());

        let seen = seen.join().unwrap();
        assert_eq!(
            seen,
            vec![
                Message::Sender(SenderMessage::ChangePort(6000)),
                Message::Sender(SenderMessage::ChangeReceiver(
                    ReceiverName::new("10.1.2.3").unwrap()
                )),
                Message::Sender(SenderMessage::ChangePort(5006)),
                Message::Sender(SenderMessage::ChangeReceiver(
                    ReceiverName::new("127.0.0.1").unwrap()
                )),
            ]
        );
    }

    #[test]
    fn missing_sender_is_reported_on_start() {
        let root = Module::root();
        let mut s = Subsession::new(MediaKind::Video, "track1", &params(), root.handle());
        s.get_stream_parameters("10.1.2.3".parse().unwrap(), 6000, 6001);
        assert!(matches!(s.start_stream(), Err(RelayError::NoRoute { .. })));
        s.delete_stream();
        assert_eq!(s.state(), SubsessionState::TornDown);
    }
}
