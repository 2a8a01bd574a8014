//! End-to-end tests for the generative session manager
//!
//! Each test runs a fake generation backend and a real session manager
//! against it, exercising style application, envelope decoding, error
//! surfacing and the fixed-delay reconnect.

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{wait_until, FakeBackend};
use serde_json::json;
use std::sync::{Arc, Mutex};
use vibeflow_engine::config::SessionSettings;
use vibeflow_engine::interpreter::Interpretation;
use vibeflow_engine::session::{GenerativeSessionManager, SessionState};

fn fast_settings() -> SessionSettings {
    SessionSettings {
        connect_timeout_secs: 5,
        reconnect_delay_secs: 1,
    }
}

fn collect_frames(manager: &GenerativeSessionManager) -> Arc<Mutex<Vec<Vec<u8>>>> {
    let frames: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let listener_frames = frames.clone();
    manager.on_audio_frame(Box::new(move |frame| {
        listener_frames.lock().unwrap().push(frame.to_vec());
    }));
    frames
}

#[tokio::test]
async fn test_apply_interpretation_sends_set_styles() {
    let backend = FakeBackend::start().await;
    let manager = GenerativeSessionManager::start(&backend.url, None, fast_settings());
    wait_until(|| backend.connection_count() >= 1, "connection").await;

    manager.apply_interpretation(Interpretation::fallback(0));
    wait_until(
        || backend.received_of_type("set-styles").len() == 1,
        "set-styles message",
    )
    .await;

    let message = &backend.received_of_type("set-styles")[0];
    assert_eq!(message["generationConfig"]["bpm"], 80);
    assert_eq!(message["weightedStyles"][0]["weight"], 1.0);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_audio_envelope_decoded_and_forwarded() {
    let backend = FakeBackend::start().await;
    let manager = GenerativeSessionManager::start(&backend.url, None, fast_settings());
    let frames = collect_frames(&manager);
    wait_until(|| backend.connection_count() >= 1, "connection").await;

    let payload = vec![1u8, 2, 3, 4];
    backend.send_json(json!({"audio": STANDARD.encode(&payload)}));
    wait_until(|| !frames.lock().unwrap().is_empty(), "audio frame").await;

    assert_eq!(frames.lock().unwrap()[0], payload);
    assert_eq!(manager.state(), SessionState::Streaming);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_nested_envelope_paths_accepted() {
    let backend = FakeBackend::start().await;
    let manager = GenerativeSessionManager::start(&backend.url, None, fast_settings());
    let frames = collect_frames(&manager);
    wait_until(|| backend.connection_count() >= 1, "connection").await;

    backend.send_json(json!({"data": {"audio": STANDARD.encode([10u8])}}));
    backend.send_json(json!({
        "serverContent": {"audioChunk": {"data": STANDARD.encode([20u8])}}
    }));
    wait_until(|| frames.lock().unwrap().len() == 2, "both audio frames").await;

    let frames = frames.lock().unwrap();
    assert_eq!(frames[0], vec![10u8]);
    assert_eq!(frames[1], vec![20u8]);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_binary_frames_forwarded_verbatim() {
    let backend = FakeBackend::start().await;
    let manager = GenerativeSessionManager::start(&backend.url, None, fast_settings());
    let frames = collect_frames(&manager);
    wait_until(|| backend.connection_count() >= 1, "connection").await;

    backend.send_binary(vec![7u8; 96]);
    wait_until(|| !frames.lock().unwrap().is_empty(), "binary frame").await;
    assert_eq!(frames.lock().unwrap()[0], vec![7u8; 96]);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_backend_error_surfaces_without_closing_session() {
    let backend = FakeBackend::start().await;
    let manager = GenerativeSessionManager::start(&backend.url, None, fast_settings());
    let frames = collect_frames(&manager);
    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let listener_errors = errors.clone();
    manager.on_error(Box::new(move |message| {
        listener_errors.lock().unwrap().push(message.to_string());
    }));
    wait_until(|| backend.connection_count() >= 1, "connection").await;

    backend.send_json(json!({"type": "error", "message": "quota exceeded"}));
    wait_until(|| !errors.lock().unwrap().is_empty(), "error callback").await;
    assert_eq!(errors.lock().unwrap()[0], "quota exceeded");

    // The session keeps streaming after a rejection.
    backend.send_json(json!({"audio": STANDARD.encode([5u8])}));
    wait_until(|| !frames.lock().unwrap().is_empty(), "audio after error").await;
    assert_eq!(backend.connection_count(), 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_reapplies_latest_interpretation() {
    let backend = FakeBackend::start().await;
    let manager = GenerativeSessionManager::start(&backend.url, None, fast_settings());
    wait_until(|| backend.connection_count() >= 1, "first connection").await;

    manager.apply_interpretation(Interpretation::fallback(0));
    wait_until(
        || backend.received_of_type("set-styles").len() == 1,
        "initial set-styles",
    )
    .await;

    backend.drop_connections();
    wait_until(|| backend.connection_count() >= 2, "reconnection").await;
    // The new session resumes with the interpretation from before the drop.
    wait_until(
        || backend.received_of_type("set-styles").len() == 2,
        "re-applied set-styles",
    )
    .await;
    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_session() {
    let backend = FakeBackend::start().await;
    let manager = GenerativeSessionManager::start(&backend.url, None, fast_settings());
    wait_until(|| backend.connection_count() >= 1, "connection").await;

    manager.shutdown().await;
    manager.shutdown().await;
    assert_eq!(manager.state(), SessionState::Closed);
}
