pub mod model;

mod error;

pub use error::SessionError;
pub use model::*;
