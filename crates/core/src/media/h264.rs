use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::Packetizer;
use super::rtp::RtpHeader;

pub(crate) const DEFAULT_MTU: usize = 1400;

const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_FU_A: u8 = 28;

/// H.264 RTP packetizer (RFC 6184).
///
/// Converts Annex B access units into RTP packets:
///
/// - **Single NAL Unit** (§5.6): a NAL that fits the MTU is sent as-is.
/// - **FU-A** (§5.8): larger NALs are split; each fragment carries
///   `[F|NRI|28]` followed by `[S|E|R|type]` before the NAL payload.
///
/// The marker bit is set on the last packet of the access unit (§5.1).
/// SPS/PPS seen in the bitstream are kept so the session description can
/// carry `profile-level-id` and `sprop-parameter-sets` (§8.1).
#[derive(Debug)]
pub struct H264Packetizer {
    header: RtpHeader,
    mtu: usize,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H264Packetizer {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self::from_header(RtpHeader::new(pt, ssrc))
    }

    pub fn with_random_ssrc(pt: u8) -> Self {
        Self::from_header(RtpHeader::with_random_ssrc(pt))
    }

    fn from_header(header: RtpHeader) -> Self {
        Self {
            header,
            mtu: DEFAULT_MTU,
            sps: None,
            pps: None,
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu.max(16);
        self
    }

    /// `a=fmtp` line once SPS and PPS have been seen.
    pub fn fmtp_line(&self) -> Option<String> {
        let sps = self.sps.as_deref().filter(|s| s.len() >= 4)?;
        let pps = self.pps.as_deref()?;
        Some(format!(
            "a=fmtp:{} packetization-mode=1;profile-level-id={:02x}{:02x}{:02x};sprop-parameter-sets={},{}",
            self.header.payload_type(),
            sps[1],
            sps[2],
            sps[3],
            BASE64_STANDARD.encode(sps),
            BASE64_STANDARD.encode(pps)
        ))
    }

    fn remember_parameter_sets(&mut self, nal_units: &[&[u8]]) {
        for nal in nal_units {
            match nal.first().map(|b| b & 0x1f) {
                Some(NAL_TYPE_SPS) if self.sps.as_deref() != Some(*nal) => {
                    tracing::debug!(bytes = nal.len(), "H.264 SPS captured");
                    self.sps = Some(nal.to_vec());
                }
                Some(NAL_TYPE_PPS) if self.pps.as_deref() != Some(*nal) => {
                    tracing::debug!(bytes = nal.len(), "H.264 PPS captured");
                    self.pps = Some(nal.to_vec());
                }
                _ => {}
            }
        }
    }

    fn packetize_nal(&mut self, nal_unit: &[u8], is_last_nal: bool, out: &mut Vec<Vec<u8>>) {
        if nal_unit.is_empty() {
            return;
        }

        if nal_unit.len() <= self.mtu {
            out.push(self.header.packet(is_last_nal, &[nal_unit]));
            return;
        }

        let nal_type = nal_unit[0] & 0x1f;
        let fu_indicator = (nal_unit[0] & 0x60) | NAL_TYPE_FU_A;
        let payload = &nal_unit[1..];
        let max_fragment = self.mtu - 2;

        let chunks = payload.chunks(max_fragment);
        let count = chunks.len();
        for (i, chunk) in chunks.enumerate() {
            let first = i == 0;
            let last = i + 1 == count;
            let fu_header = if first { 0x80 } else { 0 } | if last { 0x40 } else { 0 } | nal_type;
            out.push(
                self.header
                    .packet(is_last_nal && last, &[&[fu_indicator, fu_header], chunk]),
            );
        }

        tracing::trace!(
            nal_type,
            nal_size = nal_unit.len(),
            fragments = count,
            "FU-A fragmented NAL unit"
        );
    }

    /// Split an Annex B bitstream on 3- and 4-byte start codes.
    ///
    /// Start code length is tracked per NAL so that mixed start codes give
    /// correct boundaries.
    pub fn extract_nal_units(data: &[u8]) -> Vec<&[u8]> {
        let mut starts: Vec<(usize, usize)> = Vec::new();
        let mut i = 0usize;
        while i < data.len() {
            if data[i..].starts_with(&[0, 0, 0, 1]) {
                starts.push((i + 4, 4));
                i += 4;
            } else if data[i..].starts_with(&[0, 0, 1]) {
                starts.push((i + 3, 3));
                i += 3;
            } else {
                i += 1;
            }
        }

        let mut nal_units = Vec::with_capacity(starts.len());
        for (idx, &(start, _)) in starts.iter().enumerate() {
            let end = match starts.get(idx + 1) {
                Some(&(next_start, sc_len)) => next_start - sc_len,
                None => data.len(),
            };
            if start < end {
                nal_units.push(&data[start..end]);
            }
        }
        nal_units
    }
}

impl Packetizer for H264Packetizer {
    fn packetize(&mut self, encoded_data: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>> {
        let nal_units = Self::extract_nal_units(encoded_data);
        self.remember_parameter_sets(&nal_units);

        let mut packets = Vec::new();
        for (i, nal) in nal_units.iter().enumerate() {
            self.packetize_nal(nal, i + 1 == nal_units.len(), &mut packets);
        }
        self.header.advance_timestamp(timestamp_increment);

        tracing::trace!(
            nal_count = nal_units.len(),
            rtp_packets = packets.len(),
            frame_bytes = encoded_data.len(),
            seq = self.header.sequence(),
            "H.264 frame packetized"
        );
        packets
    }

    fn codec_name(&self) -> &'static str {
        "H264"
    }

    fn clock_rate(&self) -> u32 {
        90000
    }

    fn payload_type(&self) -> u8 {
        self.header.payload_type()
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
