use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use avrelay::capture::annexb::ANNEXB_USAGE;
use avrelay::capture::{AnnexBFileCapture, Capture, CaptureParams, InitOutcome};
use avrelay::config::RTSP_USAGE;
use avrelay::{
    Module, RtpSender, RtspLaunch, RtspOption, RtspParams, SenderConfig, ServerConfig,
    parse_rtsp_option,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "avrelay",
    about = "Stream an H.264 Annex B file over RTP, optionally controlled over RTSP"
)]
struct Args {
    /// Input file (raw H.264 Annex B), or `help`
    input: Option<String>,

    /// Enable the RTSP endpoint: `port=<n>` or `help`
    #[arg(long, num_args = 0..=1, default_missing_value = "", value_name = "OPTS")]
    rtsp: Option<String>,

    /// Destination host
    #[arg(long, short, default_value = "127.0.0.1")]
    receiver: String,

    /// Destination RTP port; with RTSP, the server RTP port
    #[arg(long, short, default_value_t = 5004)]
    port: u16,

    /// Frames per second
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Maximum RTP packet payload size
    #[arg(long, default_value_t = 1400)]
    mtu: usize,

    /// RTSP bind host
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Host advertised in the SDP origin line
    #[arg(long)]
    public_host: Option<String>,

    /// Restart the input when it ends
    #[arg(long = "loop")]
    repeat: bool,
}

fn resolve(host: &str) -> Option<IpAddr> {
    (host, 0)
        .to_socket_addrs()
        .ok()?
        .next()
        .map(|addr| addr.ip())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let rtsp = match args.rtsp.as_deref().map(parse_rtsp_option) {
        None => None,
        Some(Ok(RtspOption::Help)) => {
            println!("{RTSP_USAGE}");
            return ExitCode::SUCCESS;
        }
        Some(Ok(RtspOption::Port(port))) => Some(port),
        Some(Err(e)) => {
            eprintln!("{e}\n\n{RTSP_USAGE}");
            return ExitCode::FAILURE;
        }
    };

    let Some(input) = args.input else {
        eprintln!("missing input file\n\n{ANNEXB_USAGE}");
        return ExitCode::FAILURE;
    };
    let params = CaptureParams {
        repeat: args.repeat,
        ..CaptureParams::new(input, args.fps)
    };
    let mut capture = match AnnexBFileCapture::init(&params) {
        InitOutcome::Ready(capture) => capture,
        InitOutcome::NoError => {
            println!("{ANNEXB_USAGE}");
            return ExitCode::SUCCESS;
        }
        InitOutcome::Failed(e) => {
            eprintln!("Failed to open input: {e}");
            return ExitCode::FAILURE;
        }
    };

    let receiver = if rtsp.is_some() {
        // Parked on its own RTP port until a client sets up the stream.
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        match resolve(&args.receiver) {
            Some(ip) => ip,
            None => {
                eprintln!("Cannot resolve receiver '{}'", args.receiver);
                return ExitCode::FAILURE;
            }
        }
    };

    let config = SenderConfig {
        receiver,
        rtp_port: args.port,
        local_rtp_port: if rtsp.is_some() { args.port } else { 0 },
        mtu: args.mtu,
        rtsp: rtsp.map(|rtsp_port| RtspLaunch {
            params: RtspParams {
                rtsp_port,
                bind_host: args.bind.clone(),
                rtp_port: args.port,
                ..Default::default()
            },
            server: ServerConfig {
                public_host: args.public_host.clone(),
                ..Default::default()
            },
        }),
        ..Default::default()
    };

    let root = Module::root();
    let mut sender = match RtpSender::spawn(config, &root.handle()) {
        Ok(sender) => sender,
        Err(e) => {
            eprintln!("Failed to start sender: {e}");
            return ExitCode::FAILURE;
        }
    };

    let interval = Duration::from_secs_f64(1.0 / args.fps.max(1.0));
    let mut next = Instant::now();
    while let Some(frame) = capture.grab() {
        if let Err(e) = sender.send_frame(frame) {
            tracing::error!(error = %e, "sender stopped");
            break;
        }
        next += interval;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    }

    let stats = sender.stats();
    sender.stop();
    capture.done();
    tracing::info!(
        frames = stats.frames_sent,
        packets = stats.packets_sent,
        dropped = stats.frames_dropped,
        "done"
    );
    ExitCode::SUCCESS
}
