mod config;
mod format;
mod message;
mod peer;

pub use config::{
    AudioCodec, IceFilter, IceProtocol, IceServerConfig, MediaConfiguration, RendererType,
    VideoCodec,
};
pub use format::{
    frame_rate_weight, peak_video_rate, PixelFormat, VideoFormat, REFERENCE_FRAME_RATE,
};
pub use message::{
    ByeData, IceCandidate, IceData, Message, MessagePayload, SdpData, SdpType, SessionDescription,
    UsersUpdateData,
};
pub use peer::{ConnectionId, Peer, PeerId};
