//! Sender-side RTCP (RFC 3550 §6).
//!
//! [`RtcpSession`] keeps the counters of one outgoing stream and builds a
//! compound Sender Report + SDES CNAME packet whenever the randomized report
//! interval elapses. Inbound compound packets are parsed for report blocks.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::RngExt;

const RTCP_SR: u8 = 200;
const RTCP_RR: u8 = 201;
const RTCP_SDES: u8 = 202;
const RTCP_BYE: u8 = 203;
const SDES_CNAME: u8 = 1;

/// Nominal report interval before jitter (RFC 3550 §6.2 minimum).
pub const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Seconds between the NTP epoch (1900) and the Unix epoch.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// One reception report block (RFC 3550 §6.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportBlock {
    /// Reporter of the block.
    pub reporter: u32,
    /// Source the block is about.
    pub source: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: u32,
    pub highest_sequence: u32,
    pub jitter: u32,
}

/// What an inbound RTCP compound packet carried.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RtcpFeedback {
    pub reports: Vec<ReportBlock>,
    pub byes: Vec<u32>,
    /// Packets carrying our own SSRC as sender (looped back), skipped.
    pub own_packets: usize,
}

#[derive(Debug)]
pub struct RtcpSession {
    ssrc: u32,
    cname: String,
    packets_sent: u32,
    octets_sent: u32,
    rtp_timestamp: u32,
    next_report: Option<Instant>,
}

impl RtcpSession {
    pub fn new(ssrc: u32) -> Self {
        Self {
            ssrc,
            cname: format!("avrelay-{ssrc:08x}"),
            packets_sent: 0,
            octets_sent: 0,
            rtp_timestamp: 0,
            next_report: None,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn cname(&self) -> &str {
        &self.cname
    }

    /// Account for one sent RTP packet of `payload_len` bytes.
    pub fn on_rtp_sent(&mut self, payload_len: usize) {
        self.packets_sent = self.packets_sent.wrapping_add(1);
        self.octets_sent = self.octets_sent.wrapping_add(payload_len as u32);
    }

    /// Advance the session clock to the media time `rtp_timestamp`.
    pub fn update(&mut self, rtp_timestamp: u32) {
        self.rtp_timestamp = rtp_timestamp;
    }

    /// Compound SR + SDES packet if the report interval elapsed at `now`.
    ///
    /// The first call only arms the timer.
    pub fn poll_report(&mut self, now: Instant) -> Option<Vec<u8>> {
        match self.next_report {
            None => {
                self.next_report = Some(now + jittered_interval());
                None
            }
            Some(due) if now >= due => {
                self.next_report = Some(now + jittered_interval());
                Some(self.compound_report(SystemTime::now()))
            }
            Some(_) => None,
        }
    }

    fn compound_report(&self, wallclock: SystemTime) -> Vec<u8> {
        let since_epoch = wallclock.duration_since(UNIX_EPOCH).unwrap_or_default();
        let ntp_sec = (since_epoch.as_secs() + NTP_UNIX_OFFSET) as u32;
        let ntp_frac = ((since_epoch.subsec_nanos() as u64) << 32) / 1_000_000_000;

        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&[0x80, RTCP_SR, 0, 6]);
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        out.extend_from_slice(&ntp_sec.to_be_bytes());
        out.extend_from_slice(&(ntp_frac as u32).to_be_bytes());
        out.extend_from_slice(&self.rtp_timestamp.to_be_bytes());
        out.extend_from_slice(&self.packets_sent.to_be_bytes());
        out.extend_from_slice(&self.octets_sent.to_be_bytes());

        // SDES chunk: SSRC, CNAME item, terminating null, pad to 32 bits.
        let cname = &self.cname.as_bytes()[..self.cname.len().min(255)];
        let mut chunk = Vec::with_capacity(8 + cname.len());
        chunk.extend_from_slice(&self.ssrc.to_be_bytes());
        chunk.push(SDES_CNAME);
        chunk.push(cname.len() as u8);
        chunk.extend_from_slice(cname);
        chunk.push(0);
        while chunk.len() % 4 != 0 {
            chunk.push(0);
        }
        let words = (chunk.len() / 4) as u16;
        out.extend_from_slice(&[0x81, RTCP_SDES]);
        out.extend_from_slice(&words.to_be_bytes());
        out.extend_from_slice(&chunk);
        out
    }

    /// Parse an inbound compound packet. Truncated trailing packets are
    /// ignored.
    pub fn handle_incoming(&self, data: &[u8]) -> RtcpFeedback {
        let mut feedback = RtcpFeedback::default();
        let mut rest = data;

        while rest.len() >= 8 {
            if rest[0] >> 6 != 2 {
                break;
            }
            let count = (rest[0] & 0x1f) as usize;
            let pt = rest[1];
            let len = (u16::from_be_bytes([rest[2], rest[3]]) as usize + 1) * 4;
            // Every packet we read carries at least the sender SSRC.
            if len < 8 {
                break;
            }
            let Some(packet) = rest.get(..len) else {
                break;
            };
            rest = &rest[len..];

            let sender = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
            match pt {
                RTCP_SR | RTCP_RR if sender == self.ssrc => feedback.own_packets += 1,
                RTCP_SR => parse_blocks(sender, &packet[28.min(len)..], count, &mut feedback),
                RTCP_RR => parse_blocks(sender, &packet[8..], count, &mut feedback),
                RTCP_BYE => {
                    feedback.byes.extend(
                        packet[4..]
                            .chunks_exact(4)
                            .take(count)
                            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
                    );
                }
                _ => {}
            }
        }
        feedback
    }
}

fn parse_blocks(reporter: u32, body: &[u8], count: usize, feedback: &mut RtcpFeedback) {
    for b in body.chunks_exact(24).take(count) {
        feedback.reports.push(ReportBlock {
            reporter,
            source: u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            fraction_lost: b[4],
            cumulative_lost: u32::from_be_bytes([0, b[5], b[6], b[7]]),
            highest_sequence: u32::from_be_bytes([b[8], b[9], b[10], b[11]]),
            jitter: u32::from_be_bytes([b[12], b[13], b[14], b[15]]),
        });
    }
}

/// Report interval scaled by a uniform factor in `[0.5, 1.5)` (§6.3.1).
fn jittered_interval() -> Duration {
    REPORT_INTERVAL.mul_f64(rand::rng().random_range(0.5..1.5))
}
