//! Fake websocket backend for end-to-end tests.
//!
//! Accepts connections in a loop so reconnect behavior can be observed,
//! records inbound text messages as JSON, and forwards scripted outbound
//! messages to whichever client is currently connected.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub struct FakeBackend {
    pub url: String,
    received: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    outbound_tx: broadcast::Sender<Message>,
    drop_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake backend");
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (outbound_tx, _) = broadcast::channel::<Message>(64);
        let (drop_tx, _) = broadcast::channel::<()>(4);

        let accept_received = received.clone();
        let accept_connections = connections.clone();
        let accept_outbound = outbound_tx.clone();
        let accept_drop = drop_tx.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => continue,
                };
                accept_connections.fetch_add(1, Ordering::SeqCst);

                let received = accept_received.clone();
                let mut outbound_rx = accept_outbound.subscribe();
                let mut drop_rx = accept_drop.subscribe();
                tokio::spawn(async move {
                    let (mut sink, mut stream) = ws.split();
                    loop {
                        tokio::select! {
                            incoming = stream.next() => match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    if let Ok(value) = serde_json::from_str(text.as_str()) {
                                        received.lock().unwrap().push(value);
                                    }
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                            outgoing = outbound_rx.recv() => {
                                if let Ok(message) = outgoing {
                                    if sink.send(message).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            _ = drop_rx.recv() => break,
                        }
                    }
                });
            }
        });

        Self {
            url,
            received,
            connections,
            outbound_tx,
            drop_tx,
            accept_task,
        }
    }

    /// Every JSON text message received so far, in arrival order.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    /// Received messages whose `type` field matches.
    pub fn received_of_type(&self, message_type: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|m| m["type"] == message_type)
            .collect()
    }

    /// How many websocket connections have been accepted in total.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Push a JSON message to the connected client.
    pub fn send_json(&self, value: Value) {
        let _ = self.outbound_tx.send(Message::Text(value.to_string().into()));
    }

    /// Push a raw binary frame to the connected client.
    pub fn send_binary(&self, bytes: Vec<u8>) {
        let _ = self.outbound_tx.send(Message::Binary(bytes.into()));
    }

    /// Sever the current connection without stopping the accept loop.
    pub fn drop_connections(&self) {
        let _ = self.drop_tx.send(());
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
