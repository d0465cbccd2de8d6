//! Audio payload mapping and packetization.
//!
//! The payload-type table follows RFC 3551 §6 for the static assignments
//! (PCMU 0, PCMA 8, MPA 14) and uses dynamic type 97 for the rest.

use super::Packetizer;
use super::codec::{AudioCodec, AudioFormat};
use super::h264::DEFAULT_MTU;
use super::rtp::RtpHeader;

const DYNAMIC_AUDIO_PT: u8 = 97;

/// RTP payload mapping of an audio format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub payload_type: u8,
    pub encoding_name: String,
    pub clock_rate: u32,
    pub channels: u8,
}

impl AudioPayload {
    /// Look up the payload mapping for `format`.
    pub fn lookup(format: &AudioFormat) -> Self {
        let static_pt = match (format.codec, format.sample_rate, format.channels) {
            (AudioCodec::Pcmu, 8000, 1) => Some(0),
            (AudioCodec::Pcma, 8000, 1) => Some(8),
            (AudioCodec::Mp3, _, _) => Some(14),
            _ => None,
        };

        let (encoding_name, clock_rate, channels) = match format.codec {
            AudioCodec::Mp3 => ("MPA".to_string(), 90000, format.channels),
            // RFC 7587 §7: always 48000/2 regardless of the coded rate.
            AudioCodec::Opus => ("opus".to_string(), 48000, 2),
            codec => (codec.name().to_string(), format.sample_rate, format.channels),
        };

        Self {
            payload_type: static_pt.unwrap_or(DYNAMIC_AUDIO_PT),
            encoding_name,
            clock_rate,
            channels,
        }
    }

    /// `a=rtpmap:` value, e.g. `97 opus/48000/2`.
    ///
    /// The channel count is omitted for mono static payloads and MPA, as in
    /// RFC 3551 Table 4.
    pub fn rtpmap(&self) -> String {
        let mono_static = self.payload_type < 96 && self.channels <= 1;
        if mono_static || self.encoding_name == "MPA" {
            format!("{} {}/{}", self.payload_type, self.encoding_name, self.clock_rate)
        } else {
            format!(
                "{} {}/{}/{}",
                self.payload_type, self.encoding_name, self.clock_rate, self.channels
            )
        }
    }
}

/// Packetizer for frame-based and sample-based audio.
///
/// G.711 and Opus frames go out one per packet, split at the MTU for
/// oversized G.711 buffers. MP3 frames carry the RFC 2250 §3.5 header
/// (16 zero bits plus a 16-bit fragment offset).
#[derive(Debug)]
pub struct AudioPacketizer {
    header: RtpHeader,
    payload: AudioPayload,
    format: AudioFormat,
    mtu: usize,
}

impl AudioPacketizer {
    pub fn new(format: &AudioFormat, ssrc: u32) -> Self {
        let payload = AudioPayload::lookup(format);
        Self {
            header: RtpHeader::new(payload.payload_type, ssrc),
            payload,
            format: *format,
            mtu: DEFAULT_MTU,
        }
    }

    pub fn with_random_ssrc(format: &AudioFormat) -> Self {
        let payload = AudioPayload::lookup(format);
        Self {
            header: RtpHeader::with_random_ssrc(payload.payload_type),
            payload,
            format: *format,
            mtu: DEFAULT_MTU,
        }
    }

    pub fn payload(&self) -> &AudioPayload {
        &self.payload
    }

    /// Format the stream was bound to.
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }
}

impl Packetizer for AudioPacketizer {
    fn packetize(&mut self, encoded_data: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        match self.format.codec {
            AudioCodec::Mp3 => {
                for (i, chunk) in encoded_data.chunks(self.mtu - 4).enumerate() {
                    let offset = ((i * (self.mtu - 4)) as u16).to_be_bytes();
                    packets.push(self.header.packet(false, &[&[0, 0, offset[0], offset[1]], chunk]));
                }
            }
            AudioCodec::Opus => {
                packets.push(self.header.packet(false, &[encoded_data]));
            }
            AudioCodec::Pcmu | AudioCodec::Pcma => {
                for chunk in encoded_data.chunks(self.mtu) {
                    packets.push(self.header.packet(false, &[chunk]));
                }
            }
        }
        self.header.advance_timestamp(timestamp_increment);

        tracing::trace!(
            codec = %self.format.codec,
            rtp_packets = packets.len(),
            frame_bytes = encoded_data.len(),
            "audio frame packetized"
        );
        packets
    }

    fn codec_name(&self) -> &'static str {
        self.format.codec.name()
    }

    fn clock_rate(&self) -> u32 {
        self.payload.clock_rate
    }

    fn payload_type(&self) -> u8 {
        self.payload.payload_type
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opus_is_dynamic_48k_stereo() {
        let p = AudioPayload::lookup(&AudioFormat::new(AudioCodec::Opus, 48000, 2));
        assert_eq!(p.rtpmap(), "97 opus/48000/2");
    }

    #[test]
    fn g711_narrowband_mono_is_static() {
        let p = AudioPayload::lookup(&AudioFormat::new(AudioCodec::Pcmu, 8000, 1));
        assert_eq!(p.rtpmap(), "0 PCMU/8000");
        let p = AudioPayload::lookup(&AudioFormat::new(AudioCodec::Pcma, 8000, 1));
        assert_eq!(p.rtpmap(), "8 PCMA/8000");
    }

    #[test]
    fn g711_wideband_falls_back_to_dynamic() {
        let p = AudioPayload::lookup(&AudioFormat::new(AudioCodec::Pcma, 16000, 2));
        assert_eq!(p.rtpmap(), "97 PCMA/16000/2");
    }

    #[test]
    fn mp3_uses_mpa_90k() {
        let p = AudioPayload::lookup(&AudioFormat::new(AudioCodec::Mp3, 44100, 2));
        assert_eq!(p.rtpmap(), "14 MPA/90000");
    }

    #[test]
    fn mp3_packets_carry_fragment_offset() {
        let mut p = AudioPacketizer::new(&AudioFormat::new(AudioCodec::Mp3, 44100, 2), 1);
        let packets = p.packetize(&vec![0xAB; DEFAULT_MTU * 2], 2351);
        assert_eq!(packets.len(), 3);
        assert_eq!(&packets[0][12..16], &[0, 0, 0, 0]);
        let off = (DEFAULT_MTU - 4) as u16;
        assert_eq!(u16::from_be_bytes([packets[1][14], packets[1][15]]), off);
        assert_eq!(p.next_rtp_timestamp(), 2351);
    }
}
