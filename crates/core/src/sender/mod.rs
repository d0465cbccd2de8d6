//! RTP transmission scheduler.
//!
//! An [`RtpSender`] owns one outgoing stream: a worker thread that
//! `select!`s over encoded frames and its module mailbox.
//! The destination lives in a [`TransmissionTarget`] that only the worker
//! touches, so a reconfiguration always lands between two frames:
//!
//! ```text
//!  encoder ──frames──▶ ┌────────────┐ ──RTP──▶ target.rtp_addr()
//!                      │   worker   │ ──RTCP─▶ target.rtcp_addr()
//!  RTSP  ──messages──▶ └────────────┘
//! ```
//!
//! Pending control messages are drained before every frame. The first frame
//! fixes the packetizer and, when RTSP launch parameters are configured,
//! starts the [`RtspServer`] advertising that codec.

pub mod scheduler;
pub mod target;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, select};
use parking_lot::Mutex;

use crate::config::{DEFAULT_RTP_PORT, RtspParams};
use crate::error::{RelayError, Result};
use crate::media::h264::DEFAULT_MTU;
use crate::media::rtp::RTP_HEADER_LEN;
use crate::media::{EncodedFrame, MediaCodec, MediaKind};
use crate::messaging::{Envelope, MessagePath, Module, ModuleClass, ModuleRef};
use crate::server::{RtspServer, ServerConfig};
use crate::transport::UdpTransport;

pub use scheduler::{RtcpPacer, TxPacketizer};
pub use target::TransmissionTarget;

/// Module path of the sender for `kind`: `sender` or `audio.sender`.
pub fn sender_path(kind: MediaKind) -> MessagePath {
    match kind {
        MediaKind::Video => MessagePath::new([ModuleClass::Sender]),
        MediaKind::Audio => MessagePath::new([ModuleClass::Audio, ModuleClass::Sender]),
    }
}

/// RTSP endpoint started by the sender on its first frame.
#[derive(Debug, Clone, Default)]
pub struct RtspLaunch {
    pub params: RtspParams,
    pub server: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub kind: MediaKind,
    /// Initial destination host.
    pub receiver: IpAddr,
    /// Initial destination RTP port.
    pub rtp_port: u16,
    /// Local RTP port (`0` for ephemeral, or the RTSP server port when
    /// launching RTSP). RTCP binds `port + 1`.
    pub local_rtp_port: u16,
    pub mtu: usize,
    /// A receiver runs in this process; RTCP pacing is skipped.
    pub co_located_receiver: bool,
    /// Frames queued between the encoder and the worker.
    pub queue_len: usize,
    pub rtsp: Option<RtspLaunch>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            kind: MediaKind::Video,
            receiver: IpAddr::V4(Ipv4Addr::LOCALHOST),
            rtp_port: DEFAULT_RTP_PORT,
            local_rtp_port: 0,
            mtu: DEFAULT_MTU,
            co_located_receiver: false,
            queue_len: 4,
            rtsp: None,
        }
    }
}

/// Snapshot of sender counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub packets_sent: u64,
    pub rtcp_reports: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    packets_sent: AtomicU64,
    rtcp_reports: AtomicU64,
}

type RtspSlot = Arc<Mutex<Option<RtspServer>>>;

/// Handle of a running RTP sender.
pub struct RtpSender {
    kind: MediaKind,
    frames: Option<Sender<EncodedFrame>>,
    worker: Option<JoinHandle<()>>,
    rtsp: RtspSlot,
    counters: Arc<Counters>,
    local_rtp_port: u16,
    // Intermediate `audio` node for `audio.sender`; outlives the worker.
    _group: Option<Module>,
}

impl RtpSender {
    /// Register the sender module below `parent` and start the worker.
    pub fn spawn(mut config: SenderConfig, parent: &ModuleRef) -> Result<Self> {
        if let Some(launch) = &config.rtsp
            && config.local_rtp_port == 0
        {
            config.local_rtp_port = launch.params.server_rtp_port(config.kind);
        }
        let (rtp, rtcp) = bind_rtp_pair(config.local_rtp_port, !config.co_located_receiver)?;
        // SETUP and the parked destination name the ports bound here.
        if let Some(launch) = config.rtsp.as_mut() {
            launch
                .params
                .set_server_rtp_port(config.kind, rtp.local_port());
        }

        let group = match config.kind {
            MediaKind::Video => None,
            MediaKind::Audio => Some(Module::new(ModuleClass::Audio, parent)),
        };
        let module = match &group {
            Some(group) => Module::new(ModuleClass::Sender, &group.handle()),
            None => Module::new(ModuleClass::Sender, parent),
        };

        let (frames_tx, frames_rx) = crossbeam_channel::bounded(config.queue_len.max(1));
        let rtsp: RtspSlot = Arc::new(Mutex::new(None));
        let counters = Arc::new(Counters::default());
        let local_rtp_port = rtp.local_port();

        tracing::info!(
            kind = %config.kind,
            local_rtp_port,
            dest = %SocketAddr::new(config.receiver, config.rtp_port),
            rtsp = config.rtsp.is_some(),
            "RTP sender starting"
        );

        let worker = Worker {
            kind: config.kind,
            root: parent.root(),
            target: TransmissionTarget::new(config.receiver, config.rtp_port),
            mtu: config.mtu,
            packetizer: None,
            rtp,
            rtcp_socket: rtcp,
            pacer: None,
            launch: config.rtsp,
            rtsp: rtsp.clone(),
            counters: counters.clone(),
            module,
        };
        let handle = thread::Builder::new()
            .name(format!("{}-sender", config.kind))
            .spawn(move || worker.run(frames_rx))?;

        Ok(Self {
            kind: config.kind,
            frames: Some(frames_tx),
            worker: Some(handle),
            rtsp,
            counters,
            local_rtp_port,
            _group: group,
        })
    }

    /// Queue one encoded frame, blocking while the queue is full.
    pub fn send_frame(&self, frame: EncodedFrame) -> Result<()> {
        let frames = self.frames.as_ref().ok_or(RelayError::NotStarted)?;
        frames.send(frame).map_err(|_| RelayError::NotStarted)
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn local_rtp_port(&self) -> u16 {
        self.local_rtp_port
    }

    /// Address of the RTSP listener once the first frame started it.
    pub fn rtsp_local_addr(&self) -> Option<SocketAddr> {
        self.rtsp.lock().as_ref().and_then(RtspServer::local_addr)
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.counters.frames_dropped.load(Ordering::Relaxed),
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            rtcp_reports: self.counters.rtcp_reports.load(Ordering::Relaxed),
        }
    }

    /// Stop the RTSP endpoint, then the worker. Blocks until both are gone.
    ///
    /// The worker keeps answering its mailbox while the RTSP connections
    /// park their subsessions.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let server = self.rtsp.lock().take();
        if let Some(mut server) = server {
            server.stop();
        }

        // Queued frames are still sent; the worker exits once the queue
        // is empty and disconnected.
        self.frames.take();
        if worker.join().is_err() {
            tracing::error!(kind = %self.kind, "sender worker panicked");
        }

        // A launch racing with the stop above.
        let late = self.rtsp.lock().take();
        if let Some(mut server) = late {
            server.stop();
        }
        tracing::info!(kind = %self.kind, "RTP sender stopped");
    }
}

impl Drop for RtpSender {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Attempts at finding a free ephemeral port whose successor is free too.
const EPHEMERAL_PAIR_ATTEMPTS: usize = 8;

/// RTP socket on `port` and, with `with_rtcp`, RTCP on `port + 1`.
///
/// Port `0` picks an ephemeral RTP port and retries until its RTCP
/// neighbour binds.
fn bind_rtp_pair(port: u16, with_rtcp: bool) -> Result<(UdpTransport, Option<UdpTransport>)> {
    if !with_rtcp {
        return Ok((UdpTransport::bind(port)?, None));
    }
    if port != 0 {
        let rtp = UdpTransport::bind(port)?;
        let rtcp = UdpTransport::bind(port.wrapping_add(1))?;
        return Ok((rtp, Some(rtcp)));
    }

    let mut last_error = None;
    for _ in 0..EPHEMERAL_PAIR_ATTEMPTS {
        let rtp = UdpTransport::bind(0)?;
        let Some(rtcp_port) = rtp.local_port().checked_add(1) else {
            continue;
        };
        match UdpTransport::bind(rtcp_port) {
            Ok(rtcp) => return Ok((rtp, Some(rtcp))),
            Err(e) => {
                tracing::debug!(rtcp_port, error = %e, "RTCP neighbour taken, retrying");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        RelayError::Io(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            "no free RTP/RTCP port pair",
        ))
    }))
}

struct Worker {
    kind: MediaKind,
    root: ModuleRef,
    target: TransmissionTarget,
    mtu: usize,
    packetizer: Option<TxPacketizer>,
    rtp: UdpTransport,
    rtcp_socket: Option<UdpTransport>,
    pacer: Option<RtcpPacer>,
    launch: Option<RtspLaunch>,
    rtsp: RtspSlot,
    counters: Arc<Counters>,
    module: Module,
}

impl Worker {
    fn run(mut self, frames: Receiver<EncodedFrame>) {
        let mailbox = self.module.mailbox();
        loop {
            select! {
                recv(mailbox) -> envelope => match envelope {
                    Ok(envelope) => self.handle_message(envelope),
                    Err(_) => break,
                },
                recv(frames) -> frame => match frame {
                    Ok(frame) => {
                        while let Some(envelope) = self.module.check_message() {
                            self.handle_message(envelope);
                        }
                        self.transmit(frame);
                    }
                    Err(_) => break,
                },
            }
        }
        tracing::debug!(kind = %self.kind, "sender worker exiting");
    }

    fn handle_message(&mut self, envelope: Envelope) {
        tracing::debug!(kind = %self.kind, message = ?envelope.message(), "control message");
        let response = self.target.apply(envelope.message());
        envelope.respond(response);
    }

    fn transmit(&mut self, frame: EncodedFrame) {
        if self.packetizer.is_none() && !self.bind_packetizer(&frame.codec) {
            self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let Some(packetizer) = self.packetizer.as_mut() else {
            return;
        };
        if !packetizer.accepts(&frame.codec) {
            tracing::warn!(
                codec = %frame.codec,
                "frame codec differs from the bound stream, dropped"
            );
            self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let packets = if self.target.is_paused() {
            Vec::new()
        } else {
            packetizer
                .packetizer()
                .packetize(&frame.data, frame.timestamp_increment)
        };

        if self.launch.is_some() {
            self.launch_rtsp(&frame.codec);
        }
        if self.target.is_paused() {
            tracing::trace!(kind = %self.kind, "paused, frame skipped");
            return;
        }

        let dest = self.target.rtp_addr();
        let mut sent = 0u64;
        for packet in &packets {
            match self.rtp.send_to(packet, dest) {
                Ok(_) => {
                    sent += 1;
                    if let Some(pacer) = self.pacer.as_mut() {
                        pacer.on_rtp_sent(packet.len().saturating_sub(RTP_HEADER_LEN));
                    }
                }
                Err(e) => {
                    tracing::warn!(%dest, error = %e, "RTP send failed");
                    break;
                }
            }
        }
        self.counters.packets_sent.fetch_add(sent, Ordering::Relaxed);
        self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%dest, packets = sent, "frame sent");

        if let Some(pacer) = self.pacer.as_mut() {
            let before = pacer.reports_sent();
            if let Err(e) = pacer.after_frame(Instant::now(), self.target.rtcp_addr()) {
                tracing::warn!(error = %e, "RTCP I/O failed");
            }
            self.counters
                .rtcp_reports
                .fetch_add(pacer.reports_sent() - before, Ordering::Relaxed);
        }
    }

    fn bind_packetizer(&mut self, codec: &MediaCodec) -> bool {
        match TxPacketizer::for_codec(codec, self.mtu) {
            Ok(mut packetizer) => {
                let p = packetizer.packetizer();
                tracing::info!(
                    kind = %self.kind,
                    %codec,
                    pt = p.payload_type(),
                    ssrc = format_args!("{:#010X}", p.ssrc()),
                    "stream bound to codec"
                );
                if let Some(socket) = self.rtcp_socket.take() {
                    self.pacer = Some(RtcpPacer::new(socket, p.ssrc(), p.clock_rate()));
                }
                self.packetizer = Some(packetizer);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame dropped");
                false
            }
        }
    }

    fn launch_rtsp(&mut self, codec: &MediaCodec) {
        let Some(mut launch) = self.launch.take() else {
            return;
        };
        match codec {
            MediaCodec::Video(_) => {
                if let Some(p) = &self.packetizer {
                    if let Some(stream_codec) = p.stream_codec() {
                        launch.params.video_codec = stream_codec;
                    }
                    launch.params.video_fmtp = p.fmtp_line();
                }
            }
            MediaCodec::Audio(format) => launch.params.audio = *format,
        }

        let mut server = RtspServer::new(launch.params, launch.server, self.root.clone());
        match server.start() {
            Ok(()) => *self.rtsp.lock() = Some(server),
            Err(e) => tracing::error!(error = %e, "failed to start RTSP server"),
        }
    }
}
