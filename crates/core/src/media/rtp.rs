use rand::RngExt;

/// Size of the RTP fixed header without CSRCs.
pub const RTP_HEADER_LEN: usize = 12;

/// RTP fixed-header state of one outgoing stream (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Shared by every packetizer. The sequence number wraps at 16 bits; the
/// timestamp is kept as u64 and truncated on the wire. Padding, extension
/// and CSRC count are always zero.
#[derive(Debug)]
pub struct RtpHeader {
    pt: u8,
    ssrc: u32,
    sequence: u16,
    timestamp: u64,
}

impl RtpHeader {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP stream state created"
        );
        Self {
            pt: pt & 0x7f,
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Random SSRC per RFC 3550 §8.1.
    pub fn with_random_ssrc(pt: u8) -> Self {
        Self::new(pt, rand::rng().random::<u32>())
    }

    pub fn payload_type(&self) -> u8 {
        self.pt
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next packet will carry.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Build one complete packet: header followed by the concatenated
    /// `payload` parts. Advances the sequence number.
    pub fn packet(&mut self, marker: bool, payload: &[&[u8]]) -> Vec<u8> {
        let len: usize = payload.iter().map(|p| p.len()).sum();
        let mut packet = Vec::with_capacity(RTP_HEADER_LEN + len);

        packet.push(2 << 6);
        packet.push(((marker as u8) << 7) | self.pt);
        packet.extend_from_slice(&self.sequence.to_be_bytes());
        packet.extend_from_slice(&(self.timestamp as u32).to_be_bytes());
        packet.extend_from_slice(&self.ssrc.to_be_bytes());
        for part in payload {
            packet.extend_from_slice(part);
        }

        self.sequence = self.sequence.wrapping_add(1);
        packet
    }

    /// Advance the media clock after a frame.
    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment as u64);
    }
}

/// Sequence number of a serialized RTP packet.
pub fn packet_sequence(packet: &[u8]) -> Option<u16> {
    packet.get(2..4).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

/// Marker bit of a serialized RTP packet.
pub fn packet_marker(packet: &[u8]) -> bool {
    packet.get(1).is_some_and(|b| b & 0x80 != 0)
}
