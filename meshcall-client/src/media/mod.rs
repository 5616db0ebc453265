mod peer_connection;
pub mod sdp;
mod session;

pub use peer_connection::*;
pub use session::*;
