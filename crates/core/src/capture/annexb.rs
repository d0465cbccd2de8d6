use std::fs;
use std::path::PathBuf;

use super::{Capture, CaptureParams, DeviceInfo, InitOutcome};
use crate::error::RelayError;
use crate::media::h264::H264Packetizer;
use crate::media::{EncodedFrame, VideoCodec};

pub const ANNEXB_USAGE: &str = "\
Annex B file capture
Usage
\t<path-to-file.h264>
\tReads a raw H.264 elementary stream and emits one access unit per frame.";

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Replays a raw H.264 Annex B elementary stream one access unit at a time.
#[derive(Debug)]
pub struct AnnexBFileCapture {
    path: PathBuf,
    units: Vec<Vec<u8>>,
    next: usize,
    repeat: bool,
    timestamp_increment: u32,
}

impl AnnexBFileCapture {
    /// Build a capture from an in-memory bitstream.
    pub fn from_bytes(data: &[u8], params: &CaptureParams) -> Self {
        let units = split_access_units(data);
        tracing::debug!(access_units = units.len(), bytes = data.len(), "Annex B stream loaded");
        Self {
            path: PathBuf::new(),
            units,
            next: 0,
            repeat: params.repeat,
            timestamp_increment: params.video_timestamp_increment(),
        }
    }

    pub fn access_units(&self) -> usize {
        self.units.len()
    }
}

impl Capture for AnnexBFileCapture {
    fn probe() -> Vec<DeviceInfo> {
        Vec::new()
    }

    fn init(params: &CaptureParams) -> InitOutcome<Self> {
        if params.is_help() {
            return InitOutcome::NoError;
        }
        let path = PathBuf::from(&params.device);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "cannot read input");
                return InitOutcome::Failed(RelayError::Io(e));
            }
        };

        let mut capture = Self::from_bytes(&data, params);
        if capture.units.is_empty() {
            return InitOutcome::Failed(RelayError::UnsupportedCodec(format!(
                "{} holds no H.264 access units",
                path.display()
            )));
        }
        tracing::info!(path = %path.display(), access_units = capture.units.len(), "input opened");
        capture.path = path;
        InitOutcome::Ready(capture)
    }

    fn grab(&mut self) -> Option<EncodedFrame> {
        if self.next == self.units.len() {
            if !self.repeat || self.units.is_empty() {
                return None;
            }
            self.next = 0;
        }
        let unit = self.units[self.next].clone();
        self.next += 1;
        Some(EncodedFrame::video(VideoCodec::H264, unit, self.timestamp_increment))
    }

    fn done(self) {
        tracing::debug!(path = %self.path.display(), sent = self.next, "input closed");
    }
}

/// Group NAL units into access units (ITU-T H.264 §7.4.1.2.3).
///
/// A new access unit starts at an AUD, SPS, PPS, SEI or prefix NAL, or at a
/// slice with `first_mb_in_slice == 0`, once the current one holds a
/// picture.
pub fn split_access_units(data: &[u8]) -> Vec<Vec<u8>> {
    let mut units = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    let mut has_picture = false;

    for nal in H264Packetizer::extract_nal_units(data) {
        let nal_type = nal[0] & 0x1F;
        let is_vcl = matches!(nal_type, 1..=5);
        let starts_picture = match nal_type {
            1..=5 => nal.get(1).is_some_and(|b| b & 0x80 != 0),
            6..=9 | 14..=18 => true,
            _ => false,
        };

        if has_picture && starts_picture {
            units.push(std::mem::take(&mut current));
            has_picture = false;
        }
        current.extend_from_slice(&START_CODE);
        current.extend_from_slice(nal);
        has_picture |= is_vcl;
    }

    if has_picture {
        units.push(current);
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nal(header: u8, first_byte: u8) -> Vec<u8> {
        let mut out = START_CODE.to_vec();
        out.extend_from_slice(&[header, first_byte, 0xAA, 0xBB]);
        out
    }

    fn stream() -> Vec<u8> {
        [
            nal(0x67, 0x42), // SPS
            nal(0x68, 0xCE), // PPS
            nal(0x65, 0x88), // IDR, first slice
            nal(0x65, 0x40), // IDR, second slice
            nal(0x41, 0x9A), // P slice
            nal(0x09, 0x10), // AUD
            nal(0x41, 0x9A), // P slice
        ]
        .concat()
    }

    #[test]
    fn splits_on_picture_boundaries() {
        let units = split_access_units(&stream());
        assert_eq!(units.len(), 3);
        assert_eq!(H264Packetizer::extract_nal_units(&units[0]).len(), 4);
        assert_eq!(H264Packetizer::extract_nal_units(&units[1]).len(), 1);
        assert_eq!(H264Packetizer::extract_nal_units(&units[2]).len(), 2);
    }

    #[test]
    fn trailing_parameter_sets_without_picture_are_dropped() {
        let mut data = stream();
        data.extend(nal(0x67, 0x42));
        assert_eq!(split_access_units(&data).len(), 3);
    }

    #[test]
    fn grab_until_exhausted_or_repeat() {
        let mut params = CaptureParams::new("memory", 30.0);
        let mut capture = AnnexBFileCapture::from_bytes(&stream(), &params);
        let frames: Vec<_> = std::iter::from_fn(|| capture.grab()).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].timestamp_increment, 3000);

        params.repeat = true;
        let mut capture = AnnexBFileCapture::from_bytes(&stream(), &params);
        assert_eq!((0..7).filter_map(|_| capture.grab()).count(), 7);
    }

    #[test]
    fn init_outcomes() {
        assert!(matches!(
            AnnexBFileCapture::init(&CaptureParams::new("help", 30.0)),
            InitOutcome::NoError
        ));
        assert!(matches!(
            AnnexBFileCapture::init(&CaptureParams::new("/nonexistent/input.h264", 30.0)),
            InitOutcome::Failed(RelayError::Io(_))
        ));
    }
}
