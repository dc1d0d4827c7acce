mod data_context;
mod peer_command;
mod peer_manager;

pub use data_context::*;
pub use peer_command::*;
pub use peer_manager::*;
