//! Common test infrastructure
//!
//! Provides a fake websocket backend standing in for the interpretation and
//! generation services. Each test spawns its own backend on an ephemeral
//! port; the backend records every message the engine sends and can push
//! scripted responses or drop the connection to exercise reconnect paths.

#![allow(dead_code)]

mod backend;

pub use backend::FakeBackend;

use std::time::Duration;

/// Poll until `condition` holds, panicking after a few seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
