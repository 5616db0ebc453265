mod observer;
mod room;

pub use observer::*;
pub use room::*;
