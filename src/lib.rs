//! Real-time motion-to-music orchestration engine.
//!
//! Turns a stream of device motion samples into control parameters for a
//! generative-audio backend and plays the resulting audio gaplessly:
//! interpreter (motion -> musical parameters), rate-limited interpretation
//! link, generative session manager, adaptive playback buffer, and a
//! coordinator wiring them together.

pub mod config;
pub mod coordinator;
pub mod interpreter;
pub mod link;
pub mod playback;
pub mod session;
pub mod storage;

pub use config::AppConfig;
pub use coordinator::{Coordinator, EngineStatus};
