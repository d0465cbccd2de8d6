use std::fmt;

/// Media type of a stream; names the SDP `m=` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video compression tag carried by an encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    H265,
    Jpeg,
    Mjpg,
    Vp8,
    Vp9,
    Av1,
}

impl VideoCodec {
    pub fn name(self) -> &'static str {
        match self {
            Self::H264 => "H.264",
            Self::H265 => "H.265",
            Self::Jpeg => "JPEG",
            Self::Mjpg => "MJPEG",
            Self::Vp8 => "VP8",
            Self::Vp9 => "VP9",
            Self::Av1 => "AV1",
        }
    }

    /// The RTSP-advertisable stream codec for this tag, if any.
    pub fn stream_codec(self) -> Option<StreamCodec> {
        match self {
            Self::H264 => Some(StreamCodec::H264),
            Self::Jpeg | Self::Mjpg => Some(StreamCodec::Jpeg),
            _ => None,
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Video codec families that have an RTP packetizer and an SDP mapping.
///
/// A session is bound to one of these when the first frame arrives and keeps
/// it for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamCodec {
    #[default]
    H264,
    Jpeg,
}

impl StreamCodec {
    /// RTP payload type: dynamic 96 for H.264, static 26 for JPEG (RFC 3551).
    pub fn payload_type(self) -> u8 {
        match self {
            Self::H264 => 96,
            Self::Jpeg => 26,
        }
    }

    /// Encoding name used in `a=rtpmap`.
    pub fn encoding_name(self) -> &'static str {
        match self {
            Self::H264 => "H264",
            Self::Jpeg => "JPEG",
        }
    }

    pub fn clock_rate(self) -> u32 {
        90000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    /// G.711 µ-law.
    Pcmu,
    /// G.711 A-law.
    Pcma,
    /// MPEG-1/2 Layer III.
    Mp3,
    Opus,
}

impl AudioCodec {
    pub fn name(self) -> &'static str {
        match self {
            Self::Pcmu => "PCMU",
            Self::Pcma => "PCMA",
            Self::Mp3 => "MPA",
            Self::Opus => "opus",
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u8,
}

impl AudioFormat {
    pub fn new(codec: AudioCodec, sample_rate: u32, channels: u8) -> Self {
        Self {
            codec,
            sample_rate,
            channels,
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(AudioCodec::Opus, 48000, 2)
    }
}

/// Codec tag used to pick a packetizer for an outgoing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCodec {
    Video(VideoCodec),
    Audio(AudioFormat),
}

impl MediaCodec {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Video(_) => MediaKind::Video,
            Self::Audio(_) => MediaKind::Audio,
        }
    }
}

impl fmt::Display for MediaCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video(codec) => write!(f, "{codec}"),
            Self::Audio(fmt) => write!(f, "{}/{}/{}", fmt.codec, fmt.sample_rate, fmt.channels),
        }
    }
}

/// An encoded frame handed to the transmission path.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub codec: MediaCodec,
    pub data: Vec<u8>,
    /// RTP timestamp advance after this frame, in media clock ticks
    /// (e.g. 3000 for 30 fps at 90 kHz, 960 for a 20 ms Opus frame).
    pub timestamp_increment: u32,
}

impl EncodedFrame {
    pub fn video(codec: VideoCodec, data: Vec<u8>, timestamp_increment: u32) -> Self {
        Self {
            codec: MediaCodec::Video(codec),
            data,
            timestamp_increment,
        }
    }

    pub fn audio(format: AudioFormat, data: Vec<u8>, timestamp_increment: u32) -> Self {
        Self {
            codec: MediaCodec::Audio(format),
            data,
            timestamp_increment,
        }
    }
}
