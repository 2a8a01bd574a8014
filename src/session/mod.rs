//! Generative-audio session management.

mod envelope;
mod manager;
mod state;

pub use envelope::{parse_envelope, EnvelopeContent, EnvelopeError};
pub use manager::{
    FrameListener, GenerativeSessionManager, SessionClientMessage, SessionErrorListener,
};
pub use state::SessionState;
