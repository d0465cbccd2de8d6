use std::net::SocketAddr;
use std::sync::Arc;

use crate::media::MediaKind;
use crate::protocol::request::{Method, RtspRequest};
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp;
use crate::server::ServerContext;
use crate::session::transport::TransportRejection;
use crate::session::{
    AddressFamily, Session, SessionState, Subsession, SubsessionState, TransportHeader,
};

/// Handles RTSP method requests for a single TCP connection.
///
/// Owns the subsessions of this client (one per advertised media type) and
/// the RTSP session they are grouped under once SETUP ran.
pub struct MethodHandler {
    ctx: Arc<ServerContext>,
    client_addr: SocketAddr,
    subsessions: Vec<Subsession>,
    session: Option<Arc<Session>>,
}

impl MethodHandler {
    pub fn new(ctx: Arc<ServerContext>, client_addr: SocketAddr) -> Self {
        let params = &ctx.params;
        let mut subsessions = Vec::new();
        if params.av_type.has_video() {
            subsessions.push(Subsession::new(
                MediaKind::Video,
                "track1",
                params,
                ctx.parent.clone(),
            ));
        }
        if params.av_type.has_audio() {
            let track = if subsessions.is_empty() { "track1" } else { "track2" };
            subsessions.push(Subsession::new(
                MediaKind::Audio,
                track,
                params,
                ctx.parent.clone(),
            ));
        }

        MethodHandler {
            ctx,
            client_addr,
            subsessions,
            session: None,
        }
    }

    pub fn subsessions(&self) -> &[Subsession] {
        &self.subsessions
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0");

        match &request.method {
            Method::Options => self.handle_options(cseq),
            Method::Describe => self.handle_describe(cseq, &request.uri),
            Method::Setup => self.handle_setup(cseq, request),
            Method::Play => self.handle_play(cseq, request),
            Method::Pause => self.handle_pause(cseq, request),
            Method::Teardown => self.handle_teardown(cseq, request),
            Method::GetParameter => self.handle_get_parameter(cseq, request),
            Method::Other(method) => {
                tracing::warn!(%method, %cseq, "unsupported RTSP method");
                RtspResponse::not_implemented().add_header("CSeq", cseq)
            }
        }
    }

    fn handle_options(&self, cseq: &str) -> RtspResponse {
        tracing::debug!(%cseq, "OPTIONS");
        RtspResponse::ok().add_header("CSeq", cseq).add_header(
            "Public",
            "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER",
        )
    }

    /// Host for the SDP origin: configured public host, else the request
    /// URI host, else the client address.
    fn origin_host(&self, uri: &str) -> String {
        if let Some(host) = &self.ctx.config.public_host {
            return host.clone();
        }

        let authority = uri
            .strip_prefix("rtsp://")
            .or_else(|| uri.strip_prefix("rtsps://"))
            .and_then(|rest| rest.split('/').next())
            .unwrap_or("");
        let host = match authority.strip_prefix('[') {
            Some(v6) => v6.split(']').next().unwrap_or(""),
            None => authority.split(':').next().unwrap_or(""),
        };
        if host.is_empty() {
            self.client_addr.ip().to_string()
        } else {
            host.to_string()
        }
    }

    fn family(&self) -> AddressFamily {
        AddressFamily::of(self.client_addr.ip())
    }

    fn handle_describe(&mut self, cseq: &str, uri: &str) -> RtspResponse {
        tracing::debug!(%cseq, uri, "DESCRIBE");

        let host = self.origin_host(uri);
        let family = self.family();
        let media: Vec<String> = self
            .subsessions
            .iter_mut()
            .map(|s| s.sdp_lines(family).to_string())
            .collect();
        let body = sdp::session_description(
            &self.ctx.config,
            &host,
            family,
            media.iter().map(String::as_str),
        );

        let base = if uri.ends_with('/') {
            uri.to_string()
        } else {
            format!("{uri}/")
        };
        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", &base)
            .with_body(body)
    }

    /// Subsession addressed by a request URI. An aggregate URI selects the
    /// only subsession when there is exactly one.
    fn track_index(&self, uri: &str) -> Option<usize> {
        let last = uri.trim_end_matches('/').rsplit('/').next().unwrap_or("");
        self.subsessions
            .iter()
            .position(|s| s.track() == last)
            .or_else(|| (self.subsessions.len() == 1).then_some(0))
    }

    /// Whether the request's `Session` header names our session.
    fn owns_session(&self, request: &RtspRequest) -> Option<Arc<Session>> {
        let id = request.session_id()?;
        self.session.as_ref().filter(|s| s.id == id).cloned()
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(index) = self.track_index(&request.uri) else {
            tracing::warn!(uri = %request.uri, "SETUP for unknown track");
            return RtspResponse::not_found().add_header("CSeq", cseq);
        };

        let Some(transport_header) = request.get_header("Transport") else {
            tracing::warn!(%cseq, "SETUP missing Transport header");
            return RtspResponse::bad_request().add_header("CSeq", cseq);
        };

        let client_transport = match TransportHeader::parse(transport_header) {
            Ok(t) => t,
            Err(TransportRejection::Unsupported) => {
                tracing::warn!(%cseq, transport = %transport_header, "client requested unsupported transport");
                return RtspResponse::unsupported_transport()
                    .add_header("CSeq", cseq)
                    .add_header(
                        "Unsupported",
                        "RTP/AVP/TCP (interleaved) not supported; use RTP/AVP (UDP)",
                    );
            }
            Err(TransportRejection::Invalid) => {
                tracing::warn!(%cseq, transport_header, "SETUP invalid Transport header");
                return RtspResponse::bad_request().add_header("CSeq", cseq);
            }
        };

        let session = match request.session_id() {
            Some(id) => match self.owns_session(request) {
                Some(session) => session,
                None => {
                    tracing::warn!(session_id = id, "SETUP for foreign session");
                    return RtspResponse::session_not_found().add_header("CSeq", cseq);
                }
            },
            None => match self.session.clone() {
                Some(session) => session,
                None => {
                    let session = self.ctx.sessions.create_session(&request.uri);
                    self.session = Some(session.clone());
                    session
                }
            },
        };

        let client_ip = self.client_addr.ip();
        let subsession = &mut self.subsessions[index];
        let ports = subsession.get_stream_parameters(
            client_ip,
            client_transport.client_rtp_port,
            client_transport.client_rtcp_port,
        );

        tracing::info!(
            session_id = %session.id,
            track = subsession.track(),
            client_rtp = %SocketAddr::new(client_ip, client_transport.client_rtp_port),
            server_rtp_port = ports.rtp,
            "subsession set up"
        );

        let transport_response = format!(
            "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
            client_transport.client_rtp_port,
            client_transport.client_rtcp_port,
            ports.rtp,
            ports.rtcp
        );

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Transport", &transport_response)
            .add_header("Session", &session.session_header_value())
    }

    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session) = self.owns_session(request) else {
            tracing::warn!(%cseq, "PLAY for unknown session");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        let mut started: Vec<(usize, SubsessionState)> = Vec::new();
        for index in 0..self.subsessions.len() {
            let subsession = &mut self.subsessions[index];
            let previous = subsession.state();
            if !matches!(
                previous,
                SubsessionState::Setup | SubsessionState::Paused | SubsessionState::Playing
            ) {
                continue;
            }
            if let Err(e) = subsession.start_stream() {
                tracing::error!(session_id = %session.id, track = subsession.track(), error = %e, "PLAY failed to redirect sender");
                for (index, previous) in started {
                    self.subsessions[index].abort_start(previous);
                }
                return RtspResponse::internal_error()
                    .add_header("CSeq", cseq)
                    .add_header("Session", &session.session_header_value());
            }
            started.push((index, previous));
        }
        if started.is_empty() {
            return RtspResponse::method_not_valid().add_header("CSeq", cseq);
        }

        session.set_state(SessionState::Playing);
        tracing::info!(
            session_id = %session.id,
            streams = started.len(),
            playing_sessions = self.ctx.sessions.playing_count(),
            "session playing"
        );

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", &session.session_header_value())
            .add_header("Range", "npt=0.000-")
    }

    fn handle_pause(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session) = self.owns_session(request) else {
            tracing::warn!(%cseq, "PAUSE for unknown session");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        for subsession in &mut self.subsessions {
            if let Err(e) = subsession.pause_stream() {
                tracing::error!(session_id = %session.id, error = %e, "PAUSE failed");
                return RtspResponse::internal_error().add_header("CSeq", cseq);
            }
        }
        session.set_state(SessionState::Paused);
        tracing::info!(session_id = %session.id, "session paused");

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", &session.session_header_value())
    }

    fn handle_teardown(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session) = self.owns_session(request) else {
            tracing::warn!(%cseq, "TEARDOWN for unknown session");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        self.release_streams();
        self.ctx.sessions.remove_session(&session.id);
        self.session = None;
        tracing::info!(session_id = %session.id, "session terminated via TEARDOWN");
        RtspResponse::ok().add_header("CSeq", cseq)
    }

    /// GET_PARAMETER is used by clients (e.g. VLC) as a keepalive (RFC 2326 §10.8).
    fn handle_get_parameter(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        tracing::trace!(%cseq, "GET_PARAMETER keepalive");

        let resp = RtspResponse::ok().add_header("CSeq", cseq);
        match self.owns_session(request) {
            Some(session) => resp.add_header("Session", &session.session_header_value()),
            None => resp,
        }
    }

    fn release_streams(&mut self) {
        for subsession in &mut self.subsessions {
            if matches!(
                subsession.state(),
                SubsessionState::Setup | SubsessionState::Playing | SubsessionState::Paused
            ) {
                subsession.delete_stream();
            }
        }
    }

    /// Park every stream of this client and drop its session; used when the
    /// connection goes away without TEARDOWN.
    pub fn park(&mut self) {
        let mut parked = 0;
        for subsession in &mut self.subsessions {
            if matches!(
                subsession.state(),
                SubsessionState::Playing | SubsessionState::Paused
            ) {
                subsession.delete_stream();
                parked += 1;
            }
        }
        if let Some(session) = self.session.take() {
            self.ctx.sessions.remove_session(&session.id);
            tracing::info!(session_id = %session.id, parked, "session closed on disconnect");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AvType, RtspParams};
    use crate::messaging::{Message, Module, ModuleClass, ReceiverName, Response, SenderMessage};
    use crate::server::ServerConfig;
    use crate::session::SessionManager;
    use std::thread;

    fn handler(params: RtspParams, root: &Module) -> MethodHandler {
        let ctx = Arc::new(ServerContext {
            params,
            config: ServerConfig::default(),
            sessions: SessionManager::new(),
            parent: root.handle(),
        });
        MethodHandler::new(ctx, "192.0.2.10:40000".parse().unwrap())
    }

    fn request(method: &str, uri: &str, headers: &[(&str, &str)]) -> RtspRequest {
        let mut raw = format!("{method} {uri} RTSP/1.0\r\nCSeq: 1\r\n");
        for (k, v) in headers {
            raw.push_str(&format!("{k}: {v}\r\n"));
        }
        raw.push_str("\r\n");
        RtspRequest::parse(&raw).unwrap()
    }

    fn session_of(resp: &RtspResponse) -> String {
        let value = &resp.headers.iter().find(|(k, _)| k == "Session").unwrap().1;
        value.split(';').next().unwrap().to_string()
    }

    #[test]
    fn describe_lists_both_tracks() {
        let root = Module::root();
        let mut h = handler(
            RtspParams {
                av_type: AvType::Both,
                ..Default::default()
            },
            &root,
        );
        let resp = h.handle(&request("DESCRIBE", "rtsp://cam:8554/", &[]));
        assert_eq!(resp.status_code, 200);
        let body = resp.body.unwrap();
        assert!(body.contains("o=- 0 0 IN IP4 cam\r\n"));
        assert!(body.contains("a=control:track1\r\n"));
        assert!(body.contains("m=audio 5006 RTP/AVP 97\r\n"));
        assert!(body.contains("a=control:track2\r\n"));
    }

    #[test]
    fn setup_rejects_tcp_and_missing_transport() {
        let root = Module::root();
        let mut h = handler(RtspParams::default(), &root);
        let uri = "rtsp://cam:8554/track1";

        let resp = h.handle(&request("SETUP", uri, &[("Transport", "RTP/AVP/TCP;interleaved=0-1")]));
        assert_eq!(resp.status_code, 461);
        let resp = h.handle(&request("SETUP", uri, &[]));
        assert_eq!(resp.status_code, 400);
        let resp = h.handle(&request("SETUP", uri, &[("Transport", "RTP/AVP;unicast")]));
        assert_eq!(resp.status_code, 400);
        assert!(h.session_id().is_none());
    }

    #[test]
    fn setup_unknown_track_is_404() {
        let root = Module::root();
        let mut h = handler(
            RtspParams {
                av_type: AvType::Both,
                ..Default::default()
            },
            &root,
        );
        let resp = h.handle(&request(
            "SETUP",
            "rtsp://cam:8554/track9",
            &[("Transport", "RTP/AVP;unicast;client_port=6000-6001")],
        ));
        assert_eq!(resp.status_code, 404);
    }

    #[test]
    fn play_without_sender_is_500() {
        let root = Module::root();
        let mut h = handler(RtspParams::default(), &root);
        let resp = h.handle(&request(
            "SETUP",
            "rtsp://cam:8554/track1",
            &[("Transport", "RTP/AVP;unicast;client_port=6000-6001")],
        ));
        assert_eq!(resp.status_code, 200);
        let id = session_of(&resp);

        let resp = h.handle(&request("PLAY", "rtsp://cam:8554/", &[("Session", id.as_str())]));
        assert_eq!(resp.status_code, 500);
    }

    #[test]
    fn failed_play_parks_streams_already_started() {
        let root = Module::root();
        // Only the video sender exists; the audio redirect fails.
        let sender = Module::new(ModuleClass::Sender, &root.handle());
        let fake = thread::spawn(move || {
            let mailbox = sender.mailbox();
            let mut seen = Vec::new();
            while let Ok(envelope) =
                mailbox.recv_timeout(std::time::Duration::from_millis(500))
            {
                seen.push(envelope.message().clone());
                envelope.respond(Response::ok());
            }
            seen
        });

        let mut h = handler(
            RtspParams {
                av_type: AvType::Both,
                ..Default::default()
            },
            &root,
        );
        let resp = h.handle(&request(
            "SETUP",
            "rtsp://cam:8554/track1",
            &[("Transport", "RTP/AVP;unicast;client_port=6000-6001")],
        ));
        let id = session_of(&resp);
        let resp = h.handle(&request(
            "SETUP",
            "rtsp://cam:8554/track2",
            &[
                ("Transport", "RTP/AVP;unicast;client_port=6002-6003"),
                ("Session", id.as_str()),
            ],
        ));
        assert_eq!(resp.status_code, 200);

        let resp = h.handle(&request("PLAY", "rtsp://cam:8554/", &[("Session", id.as_str())]));
        assert_eq!(resp.status_code, 500);
        assert_eq!(h.subsessions()[0].state(), SubsessionState::Setup);
        assert_eq!(h.subsessions()[1].state(), SubsessionState::Setup);
        assert!(h.subsessions()[0].destination().is_some());

        let seen = fake.join().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], Message::Sender(SenderMessage::ChangePort(6000)));
        assert_eq!(seen[2], Message::Sender(SenderMessage::ChangePort(5004)));
        assert_eq!(
            seen[3],
            Message::Sender(SenderMessage::ChangeReceiver(ReceiverName::from_ip(
                std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
            )))
        );
    }

    #[test]
    fn play_with_wrong_session_is_454() {
        let root = Module::root();
        let mut h = handler(RtspParams::default(), &root);
        let resp = h.handle(&request("PLAY", "rtsp://cam:8554/", &[("Session", "NOPE")]));
        assert_eq!(resp.status_code, 454);
    }

    #[test]
    fn full_exchange_drives_sender() {
        let root = Module::root();
        let sender = Module::new(ModuleClass::Sender, &root.handle());
        let fake = thread::spawn(move || {
            let mailbox = sender.mailbox();
            let mut seen = Vec::new();
            for _ in 0..6 {
                let envelope = mailbox.recv().unwrap();
                seen.push(envelope.message().clone());
                envelope.respond(Response::ok());
            }
            seen
        });

        let mut h = handler(RtspParams::default(), &root);
        let resp = h.handle(&request(
            "SETUP",
            "rtsp://cam:8554/track1",
            &[("Transport", "RTP/AVP;unicast;client_port=6000-6001")],
        ));
        let id = session_of(&resp);
        assert_eq!(
            resp.headers.iter().find(|(k, _)| k == "Transport").unwrap().1,
            "RTP/AVP;unicast;client_port=6000-6001;server_port=5004-5005"
        );

        for method in ["PLAY", "PAUSE", "PLAY"] {
            let resp = h.handle(&request(method, "rtsp://cam:8554/", &[("Session", id.as_str())]));
            assert_eq!(resp.status_code, 200, "{method}");
        }
        // PLAY: port+receiver, PAUSE: pause, PLAY: port+receiver+play = 6
        let seen = fake.join().unwrap();
        assert_eq!(seen[0], Message::Sender(SenderMessage::ChangePort(6000)));
        assert_eq!(seen[2], Message::Sender(SenderMessage::Pause));
        assert_eq!(seen[5], Message::Sender(SenderMessage::Play));
    }
}
