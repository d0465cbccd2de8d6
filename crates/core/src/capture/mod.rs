//! Frame sources feeding the transmission path.
//!
//! A capture backend is probed for devices, initialized from a
//! [`CaptureParams`], then polled with [`Capture::grab`] until it runs dry.

use crate::error::RelayError;
use crate::media::EncodedFrame;

pub mod annexb;

pub use annexb::AnnexBFileCapture;

/// A device a backend can open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Value to pass as [`CaptureParams::device`].
    pub device: String,
    /// Human readable name.
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct CaptureParams {
    /// Backend specific device string; `help` asks for usage only.
    pub device: String,
    pub fps: f64,
    /// Restart from the beginning when the source is exhausted.
    pub repeat: bool,
}

impl CaptureParams {
    pub fn new(device: impl Into<String>, fps: f64) -> Self {
        Self {
            device: device.into(),
            fps,
            repeat: false,
        }
    }

    /// Whether the caller only asked for usage text.
    pub fn is_help(&self) -> bool {
        self.device == "help"
    }

    /// RTP timestamp advance per frame at 90 kHz.
    pub fn video_timestamp_increment(&self) -> u32 {
        if self.fps > 0.0 {
            (90_000.0 / self.fps).round() as u32
        } else {
            3000
        }
    }
}

/// Result of [`Capture::init`].
#[derive(Debug)]
pub enum InitOutcome<T> {
    Ready(T),
    Failed(RelayError),
    /// Nothing to capture and nothing went wrong (e.g. usage was requested).
    NoError,
}

impl<T> InitOutcome<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(capture) => Some(capture),
            _ => None,
        }
    }
}

/// Capture backend.
pub trait Capture: Sized + Send {
    /// Devices this backend can currently open.
    fn probe() -> Vec<DeviceInfo>;

    fn init(params: &CaptureParams) -> InitOutcome<Self>;

    /// Next frame, or `None` when no frame is available.
    fn grab(&mut self) -> Option<EncodedFrame>;

    /// Release the device.
    fn done(self) {}
}
