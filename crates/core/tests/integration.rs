//! Integration tests: RTSP negotiation redirecting a live RTP sender, and
//! the frame exchange driven by a real display loop.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpStream, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use avrelay::display::headless::HeadlessPresenter;
use avrelay::display::{Display, PixelFormat, SubmitOutcome, SubmitPolicy, VideoFormat};
use avrelay::media::VideoCodec;
use avrelay::media::rtp::packet_sequence;
use avrelay::messaging::{ReceiverName, SenderMessage};
use avrelay::{
    EncodedFrame, MessagePath, Module, RelayError, RtpSender, RtspLaunch, RtspParams,
    SenderConfig, send_message,
};

fn rtsp_request(stream: &mut TcpStream, request: &str) -> std::io::Result<String> {
    stream.write_all(request.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        response.push_str(&line);
        if line == "\r\n" || line == "\n" {
            break;
        }
    }

    if let Some(len) = response
        .lines()
        .find(|l| l.to_lowercase().starts_with("content-length:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse::<usize>().ok())
        && len > 0
    {
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;
        response.push_str(&String::from_utf8_lossy(&body));
    }

    Ok(response)
}

fn header<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response.lines().find_map(|l| {
        let (key, value) = l.split_once(':')?;
        key.eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

/// SPS, PPS and a single-slice IDR picture.
fn access_unit() -> Vec<u8> {
    let mut au = vec![0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1F, 0xDA];
    au.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80]);
    au.extend_from_slice(&[0, 0, 0, 1, 0x65, 0x88]);
    au.extend(std::iter::repeat_n(0x5A, 200));
    au
}

fn frame() -> EncodedFrame {
    EncodedFrame::video(VideoCodec::H264, access_unit(), 3000)
}

fn udp_sink() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    socket
}

/// Send frames until `socket` sees an RTP packet, up to two seconds.
fn frames_reach(sender: &RtpSender, socket: &UdpSocket) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut buf = [0u8; 2048];
    while Instant::now() < deadline {
        sender.send_frame(frame()).unwrap();
        if let Ok((n, _)) = socket.recv_from(&mut buf)
            && packet_sequence(&buf[..n]).is_some()
        {
            return true;
        }
    }
    false
}

fn drain(socket: &UdpSocket) {
    socket
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    let mut buf = [0u8; 2048];
    while socket.recv_from(&mut buf).is_ok() {}
    socket
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
}

/// Send a few frames and report whether none of them reached `socket`.
fn frames_stay_away(sender: &RtpSender, socket: &UdpSocket) -> bool {
    drain(socket);
    for _ in 0..5 {
        sender.send_frame(frame()).unwrap();
    }
    let mut buf = [0u8; 2048];
    socket.recv_from(&mut buf).is_err()
}

/// A local port whose successor was free too, released for the caller.
fn free_port_pair() -> u16 {
    loop {
        let rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = rtp.local_addr().unwrap().port();
        if port < u16::MAX && UdpSocket::bind(("127.0.0.1", port + 1)).is_ok() {
            return port;
        }
    }
}

fn wait_for_rtsp(sender: &RtpSender) -> std::net::SocketAddr {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(addr) = sender.rtsp_local_addr() {
            return addr;
        }
        assert!(Instant::now() < deadline, "RTSP server did not start");
        thread::sleep(Duration::from_millis(10));
    }
}

/// Every RTP packet pending on `socket`, checked to come from `source_port`.
fn collect_sequences(socket: &UdpSocket, source_port: u16, sequences: &mut Vec<u16>) -> usize {
    socket
        .set_read_timeout(Some(Duration::from_millis(100)))
        .unwrap();
    let mut buf = [0u8; 2048];
    let mut count = 0;
    while let Ok((n, from)) = socket.recv_from(&mut buf) {
        assert_eq!(from.port(), source_port);
        sequences.push(packet_sequence(&buf[..n]).expect("RTP packet"));
        count += 1;
    }
    count
}

#[test]
fn rtsp_setup_play_teardown_redirects_sender() {
    let root = Module::root();
    let first = udp_sink();
    let client_rtp = udp_sink();
    let client_port = client_rtp.local_addr().unwrap().port();

    let config = SenderConfig {
        receiver: IpAddr::V4(Ipv4Addr::LOCALHOST),
        rtp_port: first.local_addr().unwrap().port(),
        rtsp: Some(RtspLaunch {
            params: RtspParams {
                rtsp_port: 0,
                bind_host: "127.0.0.1".into(),
                rtp_port: 0,
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    };
    let mut sender = RtpSender::spawn(config, &root.handle()).expect("spawn sender");
    let server_port = sender.local_rtp_port();
    assert_ne!(server_port, 0);

    // The first frame starts the RTSP endpoint.
    assert!(frames_reach(&sender, &first));
    let rtsp_addr = wait_for_rtsp(&sender);

    let mut stream = TcpStream::connect_timeout(&rtsp_addr, Duration::from_secs(2)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let base = format!("rtsp://{rtsp_addr}/stream");

    let describe = rtsp_request(
        &mut stream,
        &format!("DESCRIBE {base} RTSP/1.0\r\nCSeq: 1\r\nAccept: application/sdp\r\n\r\n"),
    )
    .unwrap();
    assert!(describe.starts_with("RTSP/1.0 200 OK"), "{describe}");
    assert!(describe.contains(&format!("m=video {server_port} RTP/AVP 96")));
    assert!(describe.contains(&format!("a=rtcp:{}", server_port + 1)));
    assert!(describe.contains("a=rtpmap:96 H264/90000"));
    assert!(describe.contains("sprop-parameter-sets="));

    let setup = rtsp_request(
        &mut stream,
        &format!(
            "SETUP {base}/track1 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP;unicast;client_port={}-{}\r\n\r\n",
            client_port,
            client_port + 1
        ),
    )
    .unwrap();
    assert!(setup.starts_with("RTSP/1.0 200 OK"), "{setup}");
    let session = header(&setup, "Session")
        .and_then(|v| v.split(';').next())
        .expect("Session header")
        .to_string();
    assert!(
        header(&setup, "Transport")
            .unwrap()
            .contains(&format!("server_port={}-{}", server_port, server_port + 1))
    );

    let play = rtsp_request(
        &mut stream,
        &format!("PLAY {base} RTSP/1.0\r\nCSeq: 3\r\nSession: {session}\r\n\r\n"),
    )
    .unwrap();
    assert!(play.starts_with("RTSP/1.0 200 OK"), "{play}");
    assert!(frames_reach(&sender, &client_rtp), "no RTP at the client port");
    assert!(frames_stay_away(&sender, &first));

    let teardown = rtsp_request(
        &mut stream,
        &format!("TEARDOWN {base} RTSP/1.0\r\nCSeq: 4\r\nSession: {session}\r\n\r\n"),
    )
    .unwrap();
    assert!(teardown.starts_with("RTSP/1.0 200 OK"), "{teardown}");
    let before = sender.stats().packets_sent;
    assert!(frames_stay_away(&sender, &client_rtp), "stream was not parked");
    assert!(sender.stats().packets_sent > before);

    let stale = rtsp_request(
        &mut stream,
        &format!("PLAY {base} RTSP/1.0\r\nCSeq: 5\r\nSession: {session}\r\n\r\n"),
    )
    .unwrap();
    assert!(stale.starts_with("RTSP/1.0 454"), "{stale}");

    drop(stream);
    sender.stop();
    assert!(sender.rtsp_local_addr().is_none());
}

#[test]
fn disconnect_without_teardown_parks_stream() {
    let root = Module::root();
    let first = udp_sink();
    let client_rtp = udp_sink();
    let client_port = client_rtp.local_addr().unwrap().port();
    let server_port = free_port_pair();

    let config = SenderConfig {
        rtp_port: first.local_addr().unwrap().port(),
        rtsp: Some(RtspLaunch {
            params: RtspParams {
                rtsp_port: 0,
                bind_host: "127.0.0.1".into(),
                rtp_port: server_port,
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    };
    let sender = RtpSender::spawn(config, &root.handle()).unwrap();
    // The configured server port is the one the sender transmits from.
    assert_eq!(sender.local_rtp_port(), server_port);
    assert!(frames_reach(&sender, &first));
    let rtsp_addr = wait_for_rtsp(&sender);

    {
        let mut stream = TcpStream::connect(rtsp_addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let base = format!("rtsp://{rtsp_addr}/stream");
        let setup = rtsp_request(
            &mut stream,
            &format!(
                "SETUP {base}/track1 RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;unicast;client_port={client_port}\r\n\r\n"
            ),
        )
        .unwrap();
        assert!(
            header(&setup, "Transport")
                .unwrap()
                .contains(&format!("server_port={}-{}", server_port, server_port + 1)),
            "{setup}"
        );
        let session = header(&setup, "Session")
            .and_then(|v| v.split(';').next())
            .unwrap()
            .to_string();
        let play = rtsp_request(
            &mut stream,
            &format!("PLAY {base} RTSP/1.0\r\nCSeq: 2\r\nSession: {session}\r\n\r\n"),
        )
        .unwrap();
        assert!(play.starts_with("RTSP/1.0 200 OK"), "{play}");

        let mut buf = [0u8; 2048];
        sender.send_frame(frame()).unwrap();
        let (_, from) = client_rtp.recv_from(&mut buf).expect("RTP at the client");
        assert_eq!(from.port(), server_port);
    }

    // The connection thread parks the stream once it notices the close.
    let deadline = Instant::now() + Duration::from_secs(2);
    while !frames_stay_away(&sender, &client_rtp) {
        assert!(Instant::now() < deadline, "stream was not parked on disconnect");
    }
}

#[test]
fn malformed_rtcp_does_not_stop_sender() {
    let root = Module::root();
    let sink = udp_sink();
    let config = SenderConfig {
        rtp_port: sink.local_addr().unwrap().port(),
        ..Default::default()
    };
    let mut sender = RtpSender::spawn(config, &root.handle()).unwrap();
    assert!(frames_reach(&sender, &sink));

    let rtcp_port = sender.local_rtp_port() + 1;
    let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
    let datagrams: [&[u8]; 5] = [
        // Length fields shorter than an SSRC.
        &[0x80, 201, 0, 0, 0, 0, 0, 0],
        &[0x80, 200, 0, 0, 0xde, 0xad, 0xbe, 0xef],
        // Length field past the datagram.
        &[0x81, 201, 0, 7, 1, 2, 3, 4],
        // Not RTP version 2.
        &[0x40, 201, 0, 1, 1, 2, 3, 4],
        &[0x80],
    ];
    for datagram in datagrams {
        peer.send_to(datagram, ("127.0.0.1", rtcp_port)).unwrap();
    }

    // Inbound RTCP is drained after every frame.
    assert!(frames_reach(&sender, &sink));
    assert!(frames_reach(&sender, &sink), "sender worker died");
    sender.stop();
    assert!(sender.stats().frames_sent >= 2);
}

#[test]
fn bus_redirect_lands_on_next_frame() {
    let root = Module::root();
    let first = udp_sink();
    let second = udp_sink();

    let config = SenderConfig {
        rtp_port: first.local_addr().unwrap().port(),
        co_located_receiver: true,
        ..Default::default()
    };
    let sender = RtpSender::spawn(config, &root.handle()).unwrap();
    assert!(frames_reach(&sender, &first));

    let path: MessagePath = "sender".parse().unwrap();
    let port = second.local_addr().unwrap().port();
    send_message(&root.handle(), &path, SenderMessage::ChangePort(port))
        .unwrap()
        .into_result()
        .unwrap();
    let receiver = ReceiverName::from_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
    send_message(&root.handle(), &path, SenderMessage::ChangeReceiver(receiver))
        .unwrap()
        .into_result()
        .unwrap();

    drain(&first);
    sender.send_frame(frame()).unwrap();
    let mut buf = [0u8; 2048];
    let (n, from) = second.recv_from(&mut buf).expect("redirected packet");
    assert!(packet_sequence(&buf[..n]).is_some());
    assert_eq!(from.port(), sender.local_rtp_port());
    assert!(first.recv_from(&mut buf).is_err());
}

#[test]
fn concurrent_redirects_never_lose_packets() {
    let root = Module::root();
    let a = udp_sink();
    let b = udp_sink();
    let ports = [a.local_addr().unwrap().port(), b.local_addr().unwrap().port()];

    let config = SenderConfig {
        rtp_port: ports[0],
        co_located_receiver: true,
        queue_len: 1,
        ..Default::default()
    };
    let mut sender = RtpSender::spawn(config, &root.handle()).unwrap();

    let control = {
        let parent = root.handle();
        thread::spawn(move || {
            let path: MessagePath = "sender".parse().unwrap();
            let receiver = ReceiverName::from_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
            for i in 0..50 {
                send_message(&parent, &path, SenderMessage::ChangePort(ports[i % 2]))
                    .unwrap()
                    .into_result()
                    .unwrap();
                send_message(&parent, &path, SenderMessage::ChangeReceiver(receiver.clone()))
                    .unwrap()
                    .into_result()
                    .unwrap();
            }
        })
    };
    for _ in 0..100 {
        // One P slice, one packet.
        let slice = vec![0, 0, 0, 1, 0x41, 0x9A, 0x11, 0x22];
        sender
            .send_frame(EncodedFrame::video(VideoCodec::H264, slice, 3000))
            .unwrap();
    }
    control.join().unwrap();

    let source = sender.local_rtp_port();
    let mut sequences = Vec::new();
    let mut received = 0;
    for socket in [&a, &b] {
        received += collect_sequences(socket, source, &mut sequences);
    }

    // The last redirect pointed at `b`; nothing may trickle into `a`.
    for _ in 0..10 {
        let slice = vec![0, 0, 0, 1, 0x41, 0x9A, 0x11, 0x22];
        sender
            .send_frame(EncodedFrame::video(VideoCodec::H264, slice, 3000))
            .unwrap();
    }
    sender.stop();
    let mut after = Vec::new();
    assert_eq!(collect_sequences(&a, source, &mut after), 0);
    assert_eq!(collect_sequences(&b, source, &mut after), 10);
    received += after.len();
    sequences.extend(after);

    let stats = sender.stats();
    assert_eq!(stats.frames_sent, 110);
    assert_eq!(received as u64, stats.packets_sent);
    // Each packet went to exactly one destination.
    sequences.sort_unstable();
    sequences.dedup();
    assert_eq!(sequences.len(), received);
}

#[test]
fn unknown_path_is_no_route() {
    let root = Module::root();
    let path: MessagePath = "audio.sender".parse().unwrap();
    let err = send_message(&root.handle(), &path, SenderMessage::Pause).unwrap_err();
    assert!(matches!(err, RelayError::NoRoute { .. }));
    assert_eq!(root.handle().child_count(), 0);
}

#[test]
fn producer_paced_by_display() {
    let root = Module::root();
    let presenter = HeadlessPresenter::new();
    let stats = presenter.stats();
    let mut display = Display::new(presenter, &root.handle());
    let exchange = display.exchange();
    let consumer = thread::spawn(move || display.run());

    let format = VideoFormat::new(320, 240, PixelFormat::Uyvy, 30.0);
    assert!(exchange.reconfigure(format).unwrap());

    let mut queued = 0;
    for i in 0..20u8 {
        let mut frame = exchange.acquire_buffer().unwrap();
        frame.buffer_mut()[0] = i;
        if exchange.submit(frame, SubmitPolicy::Blocking).unwrap() == SubmitOutcome::Queued {
            queued += 1;
        }
    }
    assert_eq!(queued, 20);

    let path: MessagePath = "display".parse().unwrap();
    let quit = avrelay::Message::Text(u32::from('q').to_string());
    assert!(send_message(&root.handle(), &path, quit).unwrap().is_ok());
    consumer.join().unwrap();

    assert_eq!(stats.presented().len(), 20);
    assert!(exchange.acquire_buffer().is_err());
}
