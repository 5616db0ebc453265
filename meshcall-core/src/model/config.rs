use crate::model::format::VideoFormat;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// STUN/TURN server entry handed to the engine at connection creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

bitflags! {
    /// Which candidate types may be signaled to peers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct IceFilter: u8 {
        const LOCAL = 1 << 0;
        const STUN = 1 << 1;
        const TURN = 1 << 2;
        const ANY = Self::LOCAL.bits() | Self::STUN.bits() | Self::TURN.bits();
    }
}

bitflags! {
    /// Transport protocols candidates may use. Must not be empty.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct IceProtocol: u8 {
        const UDP = 1 << 0;
        const TCP = 1 << 1;
        const ANY = Self::UDP.bits() | Self::TCP.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodec {
    /// Wideband, higher quality.
    Opus,
    /// Lower quality, more compatible.
    Isac,
}

impl AudioCodec {
    pub fn rtp_name(&self) -> &'static str {
        match self {
            AudioCodec::Opus => "opus",
            AudioCodec::Isac => "ISAC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    Vp8,
    H264,
}

impl VideoCodec {
    pub fn rtp_name(&self) -> &'static str {
        match self {
            VideoCodec::Vp8 => "VP8",
            VideoCodec::H264 => "H264",
        }
    }
}

/// Renderer selection. Carried for the UI layer, never inspected here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RendererType {
    SampleBuffer,
    OpenGles,
    Quartz,
}

/// Session-wide media preferences. Copied into each connection at creation;
/// mutating the session's copy affects future connections only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConfiguration {
    pub renderer_type: RendererType,
    pub ice_filter: IceFilter,
    pub ice_protocol: IceProtocol,
    pub preferred_audio_codec: AudioCodec,
    pub preferred_video_codec: VideoCodec,
    /// kbps, applied for one-to-one calls.
    pub max_audio_bitrate: u32,
    /// kbps, applied once more than one connection is live.
    pub max_audio_bitrate_multiparty: u32,
    /// kbps cap for the computed video rate.
    pub max_video_bitrate: u32,
    /// Target bits per pixel for the video rate estimate.
    pub target_bpp: f64,
    pub preferred_receiver_format: VideoFormat,
    /// How many ICE restarts a single connection may attempt.
    pub max_ice_restarts: u32,
}

impl Default for MediaConfiguration {
    fn default() -> Self {
        Self {
            renderer_type: RendererType::SampleBuffer,
            ice_filter: IceFilter::ANY,
            ice_protocol: IceProtocol::ANY,
            preferred_audio_codec: AudioCodec::Opus,
            preferred_video_codec: VideoCodec::Vp8,
            max_audio_bitrate: 64,
            max_audio_bitrate_multiparty: 48,
            max_video_bitrate: 1000,
            target_bpp: 0.00008403125,
            preferred_receiver_format: VideoFormat::default(),
            max_ice_restarts: 3,
        }
    }
}

impl MediaConfiguration {
    /// A configuration with no usable transport protocol cannot negotiate.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.ice_protocol.is_empty() {
            return Err("ice_protocol must allow at least one of UDP/TCP");
        }
        Ok(())
    }
}
