mod broker;
mod command;
mod task;

pub use broker::*;
pub use command::*;
