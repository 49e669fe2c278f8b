//! Common test utilities for resock-client integration tests
//!
//! This module provides a mock WebSocket backend for testing client
//! behavior without a real server.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

type Handler = Arc<dyn Fn(String) -> Option<String> + Send + Sync>;

/// Mock WebSocket backend
///
/// Accepts any number of connections. Every text frame received is recorded
/// and passed to the handler; its reply, if any, goes back on the same
/// connection. Frames can also be pushed to all connected clients.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    drop_tx: broadcast::Sender<()>,
    push_tx: broadcast::Sender<String>,
    message_rx: mpsc::UnboundedReceiver<String>,
    accepted: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a server that acknowledges every message the way the search
    /// backend does: `{"status": "received", "message": <text>}`
    pub async fn new() -> Self {
        Self::with_handler(|text| Some(ack(&text))).await
    }

    /// Start a server that never replies
    pub async fn silent() -> Self {
        Self::with_handler(|_| None).await
    }

    /// Start a server with a custom reply function
    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(String) -> Option<String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handler: Handler = Arc::new(handler);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (drop_tx, _) = broadcast::channel::<()>(4);
        let (push_tx, _) = broadcast::channel::<String>(64);
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));

        let conn_shutdown = shutdown_rx.clone();
        let conn_drop = drop_tx.clone();
        let conn_push = push_tx.clone();
        let conn_accepted = accepted.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accept_result = listener.accept() => {
                        let Ok((stream, _)) = accept_result else { continue };
                        tokio::spawn(serve_connection(
                            stream,
                            handler.clone(),
                            message_tx.clone(),
                            conn_shutdown.clone(),
                            conn_drop.subscribe(),
                            conn_push.subscribe(),
                            conn_accepted.clone(),
                        ));
                    }
                }
            }
            // Listener dropped here: further connects are refused
        });

        Self {
            addr,
            shutdown_tx,
            drop_tx,
            push_tx,
            message_rx,
            accepted,
        }
    }

    /// WebSocket URL of this server
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Bound socket address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of completed WebSocket handshakes
    pub fn connections_accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Wait up to five seconds until at least `count` handshakes completed
    pub async fn wait_for_connections(&self, count: usize) -> bool {
        let poll = async {
            while self.connections_accepted() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), poll).await.is_ok()
    }

    /// Send a text frame to every connected client
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.push_tx.send(text.into());
    }

    /// Close every open connection but keep accepting new ones
    pub fn drop_connections(&self) {
        let _ = self.drop_tx.send(());
    }

    /// Wait up to five seconds for the next message from a client
    pub async fn wait_for_message(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next message already received from a client, without waiting
    pub fn try_message(&mut self) -> Option<String> {
        self.message_rx.try_recv().ok()
    }

    /// Stop listening and close every connection
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        // Give connection tasks time to send their close frames
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    handler: Handler,
    message_tx: mpsc::UnboundedSender<String>,
    mut shutdown_rx: watch::Receiver<bool>,
    mut drop_rx: broadcast::Receiver<()>,
    mut push_rx: broadcast::Receiver<String>,
    accepted: Arc<AtomicUsize>,
) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    accepted.fetch_add(1, Ordering::SeqCst);

    let (mut write, mut read) = ws_stream.split();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = drop_rx.recv() => break,
            pushed = push_rx.recv() => {
                if let Ok(text) = pushed {
                    let _ = write.send(Message::Text(text)).await;
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = message_tx.send(text.clone());
                    if let Some(reply) = handler(text) {
                        let _ = write.send(Message::Text(reply)).await;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    }

    let _ = write.send(Message::Close(None)).await;
}

/// Acknowledgement frame for a received client message
pub fn ack(text: &str) -> String {
    serde_json::json!({
        "status": "received",
        "message": text,
    })
    .to_string()
}

/// A loopback URL nothing is listening on
pub async fn unused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}/ws", addr)
}

/// A loopback URL whose listener accepts TCP but never answers the handshake
///
/// The listener is returned so the caller controls how long it stays bound.
pub async fn stalled_endpoint() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("ws://{}/ws", addr))
}
