//! Rate-limited link to the interpretation backend.
//!
//! Maintains a persistent duplex websocket, throttles outbound sample
//! transmission adaptively based on measured round-trip latency, queues while
//! disconnected, and reconnects with exponential backoff.

mod backoff;
mod client;
mod models;
mod payload_parser;
mod rate_limiter;

pub use backoff::ReconnectPolicy;
pub use client::{InterpretationLink, InterpretationListener, LinkError, LinkErrorListener};
pub use models::{ClientMessage, LinkStatus, ServerMessage};
pub use payload_parser::{parse_interpretation, parse_interpretation_text, ParseError};
pub use rate_limiter::{AdaptiveRateLimiter, RateLimiterStats};
