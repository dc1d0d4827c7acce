pub use sangha_core::PeerId;

pub mod model {
    pub use sangha_core::model::*;
}

pub use sangha_core::SessionError;

#[cfg(feature = "session")]
pub mod session {
    pub use sangha_session::*;
}
