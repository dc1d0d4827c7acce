mod signaling_channel;
mod signaling_output;
mod signaling_service;
mod stomp;

pub use signaling_channel::*;
pub use signaling_output::*;
pub use signaling_service::*;
pub use stomp::*;
