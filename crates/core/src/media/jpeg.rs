//! JPEG over RTP (RFC 2435).
//!
//! Baseline JFIF images are reduced to their entropy-coded scan and sent
//! with the 8-byte JPEG main header. Quantization tables travel in-band
//! (Q = 255, §3.1.8) in the first fragment of every frame so a receiver can
//! start decoding at any frame.

use super::Packetizer;
use super::h264::DEFAULT_MTU;
use super::rtp::RtpHeader;

const MARKER_SOF0: u8 = 0xC0;
const MARKER_DQT: u8 = 0xDB;
const MARKER_DRI: u8 = 0xDD;
const MARKER_SOS: u8 = 0xDA;
const MARKER_EOI: u8 = 0xD9;

const MAIN_HEADER_LEN: usize = 8;

/// Frame parameters recovered from a JFIF header.
#[derive(Debug, Clone, PartialEq, Eq)]
struct JpegFrame<'a> {
    /// RFC 2435 type: 0 for 4:2:2, 1 for 4:2:0, +64 with restart markers.
    kind: u8,
    width: u16,
    height: u16,
    restart_interval: u16,
    /// Concatenated 8-bit quantization tables, luma first.
    tables: Vec<u8>,
    scan: &'a [u8],
}

fn parse_jfif(data: &[u8]) -> Option<JpegFrame<'_>> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return None;
    }

    let mut tables: Vec<(u8, &[u8])> = Vec::new();
    let mut size = None;
    let mut kind = None;
    let mut restart_interval = 0u16;
    let mut pos = 2;

    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let body = data.get(pos + 4..pos + 2 + len)?;

        match marker {
            MARKER_DQT => {
                let mut rest = body;
                while !rest.is_empty() {
                    let precision = rest[0] >> 4;
                    let id = rest[0] & 0x0f;
                    if precision != 0 || rest.len() < 65 {
                        return None;
                    }
                    tables.push((id, &rest[1..65]));
                    rest = &rest[65..];
                }
            }
            MARKER_SOF0 => {
                if body.len() < 9 {
                    return None;
                }
                let height = u16::from_be_bytes([body[1], body[2]]);
                let width = u16::from_be_bytes([body[3], body[4]]);
                let luma_sampling = body[7];
                kind = match luma_sampling {
                    0x21 => Some(0),
                    0x22 => Some(1),
                    _ => None,
                };
                size = Some((width, height));
            }
            MARKER_DRI if body.len() >= 2 => {
                restart_interval = u16::from_be_bytes([body[0], body[1]]);
            }
            MARKER_SOS => {
                let start = pos + 2 + len;
                let end = data
                    .windows(2)
                    .rposition(|w| w == [0xFF, MARKER_EOI])
                    .filter(|&e| e >= start)
                    .unwrap_or(data.len());
                let (width, height) = size?;
                tables.sort_by_key(|(id, _)| *id);
                let mut kind = kind?;
                if restart_interval > 0 {
                    kind += 64;
                }
                return Some(JpegFrame {
                    kind,
                    width,
                    height,
                    restart_interval,
                    tables: tables.iter().flat_map(|(_, t)| t.iter().copied()).collect(),
                    scan: &data[start..end],
                });
            }
            _ => {}
        }
        pos += 2 + len;
    }
    None
}

/// JPEG RTP packetizer (RFC 2435), static payload type 26.
#[derive(Debug)]
pub struct JpegPacketizer {
    header: RtpHeader,
    mtu: usize,
}

impl JpegPacketizer {
    pub const PAYLOAD_TYPE: u8 = 26;

    pub fn new(ssrc: u32) -> Self {
        Self {
            header: RtpHeader::new(Self::PAYLOAD_TYPE, ssrc),
            mtu: DEFAULT_MTU,
        }
    }

    pub fn with_random_ssrc() -> Self {
        Self {
            header: RtpHeader::with_random_ssrc(Self::PAYLOAD_TYPE),
            mtu: DEFAULT_MTU,
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu.max(64);
        self
    }
}

impl Packetizer for JpegPacketizer {
    fn packetize(&mut self, encoded_data: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>> {
        let Some(frame) = parse_jfif(encoded_data) else {
            tracing::warn!(bytes = encoded_data.len(), "not a baseline JFIF image, dropped");
            self.header.advance_timestamp(timestamp_increment);
            return Vec::new();
        };

        // Dimensions are carried in 8-pixel blocks; 2040 is the largest.
        let width_blocks = (frame.width / 8).min(255) as u8;
        let height_blocks = (frame.height / 8).min(255) as u8;

        let mut restart = Vec::new();
        if frame.restart_interval > 0 {
            restart.extend_from_slice(&frame.restart_interval.to_be_bytes());
            restart.extend_from_slice(&[0xFF, 0xFF]);
        }
        let mut quant = vec![0u8, 0];
        quant.extend_from_slice(&(frame.tables.len() as u16).to_be_bytes());
        quant.extend_from_slice(&frame.tables);

        let mut packets = Vec::new();
        let mut offset = 0usize;
        while offset < frame.scan.len() {
            let mut overhead = MAIN_HEADER_LEN + restart.len();
            if offset == 0 {
                overhead += quant.len();
            }
            let room = self.mtu.saturating_sub(overhead).max(1);
            let end = (offset + room).min(frame.scan.len());

            let off = (offset as u32).to_be_bytes();
            let main = [
                0,
                off[1],
                off[2],
                off[3],
                frame.kind,
                255,
                width_blocks,
                height_blocks,
            ];
            let quant_part: &[u8] = if offset == 0 { &quant } else { &[] };
            packets.push(self.header.packet(
                end == frame.scan.len(),
                &[&main, &restart, quant_part, &frame.scan[offset..end]],
            ));
            offset = end;
        }
        self.header.advance_timestamp(timestamp_increment);

        tracing::trace!(
            width = frame.width,
            height = frame.height,
            rtp_packets = packets.len(),
            "JPEG frame packetized"
        );
        packets
    }

    fn codec_name(&self) -> &'static str {
        "JPEG"
    }

    fn clock_rate(&self) -> u32 {
        90000
    }

    fn payload_type(&self) -> u8 {
        Self::PAYLOAD_TYPE
    }

    fn ssrc(&self) -> u32 {
        self.header.ssrc()
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.header.timestamp() as u32
    }
}
