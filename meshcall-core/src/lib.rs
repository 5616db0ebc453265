pub mod error;
pub mod model;

pub use error::{ProtocolError, SignalingError};
pub use model::*;
