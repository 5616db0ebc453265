use crate::room::Room;
use meshcall_core::{MediaConfiguration, VideoFormat};

/// Commands into the broker's event loop.
pub enum BrokerCommand {
    ConnectToRoom {
        room: Room,
        config: MediaConfiguration,
    },
    Disconnect,
    /// Adaptive-quality decision from the UI layer.
    SetReceiverFormat { format: VideoFormat },
}
