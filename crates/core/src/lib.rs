pub mod capture;
pub mod config;
pub mod display;
pub mod error;
pub mod media;
pub mod messaging;
pub mod protocol;
pub mod sender;
pub mod server;
pub mod session;
pub mod transport;

pub use config::{AvType, RtspOption, RtspParams, parse_rtsp_option};
pub use error::{RelayError, Result};
pub use media::{EncodedFrame, MediaKind, Packetizer};
pub use messaging::{Message, MessagePath, Module, ModuleClass, ModuleRef, Response, send_message};
pub use sender::{RtpSender, RtspLaunch, SenderConfig};
pub use server::{RtspServer, ServerConfig};
