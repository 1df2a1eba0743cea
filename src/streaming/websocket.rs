// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! WebSocket server for live cycle events
//!
//! Clients connecting to `/ws/live/{stream_id}` receive that stream's events;
//! any other path subscribes to every stream. Subscriptions can be changed
//! with `{"type":"subscribe","stream_id":..}` / `unsubscribe` messages.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::core::{Event, EventBus};

use super::StreamingConfig;

const ALL_STREAMS: &str = "*";
const LIVE_PATH: &str = "/ws/live/";

/// WebSocket server
pub struct WebSocketServer {
    port: u16,
    max_clients: usize,
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
}

struct ClientHandle {
    addr: SocketAddr,
    subscriptions: HashSet<String>,
}

impl ClientHandle {
    fn wants(&self, stream_id: &str) -> bool {
        self.subscriptions.contains(ALL_STREAMS) || self.subscriptions.contains(stream_id)
    }
}

/// Initial subscription from the request path
fn subscription_for_path(path: &str) -> String {
    match path.strip_prefix(LIVE_PATH) {
        Some(id) if !id.is_empty() => id.trim_end_matches('/').to_string(),
        _ => ALL_STREAMS.to_string(),
    }
}

impl WebSocketServer {
    pub fn new(config: &StreamingConfig) -> Self {
        Self {
            port: config.websocket_port,
            max_clients: config.websocket_max_clients,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Bind and start accepting. Returns the bound address.
    pub async fn start(
        &self,
        bus: Arc<EventBus>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<SocketAddr> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        info!("WebSocket server listening on ws://{}", local_addr);

        let clients = self.clients.clone();
        let max_clients = self.max_clients;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, addr)) => {
                                let client_count = clients.read().await.len();
                                if client_count >= max_clients {
                                    warn!("Max clients reached, rejecting connection from {}", addr);
                                    continue;
                                }

                                let clients = clients.clone();
                                let events = bus.subscribe();

                                tokio::spawn(handle_connection(stream, addr, clients, events));
                            }
                            Err(e) => {
                                error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("WebSocket server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(local_addr)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
    mut events: broadcast::Receiver<Event>,
) {
    let client_id = uuid::Uuid::new_v4().to_string();

    let mut path = String::new();
    let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        path = req.uri().path().to_string();
        Ok(resp)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let subscription = subscription_for_path(&path);
    info!(
        "New WebSocket connection from {} (id: {}, stream: {})",
        addr, client_id, subscription
    );

    clients.write().await.insert(
        client_id.clone(),
        ClientHandle {
            addr,
            subscriptions: HashSet::from([subscription.clone()]),
        },
    );

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let welcome = serde_json::json!({
        "type": "connection_established",
        "client_id": client_id,
        "stream_id": subscription,
        "server": "vertac",
        "version": env!("CARGO_PKG_VERSION"),
    });

    if let Err(e) = ws_sender.send(Message::Text(welcome.to_string())).await {
        warn!("Failed to send welcome to {}: {}", addr, e);
        clients.write().await.remove(&client_id);
        return;
    }

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received from {}: {}", addr, text);

                        let Ok(cmd) = serde_json::from_str::<serde_json::Value>(&text) else {
                            continue;
                        };
                        let stream_id = cmd.get("stream_id").and_then(|v| v.as_str());

                        match cmd.get("type").and_then(|v| v.as_str()) {
                            Some("ping") => {
                                let pong = serde_json::json!({"type": "pong"});
                                if ws_sender.send(Message::Text(pong.to_string())).await.is_err() {
                                    break;
                                }
                            }
                            Some("subscribe") => {
                                if let Some(stream_id) = stream_id {
                                    if let Some(client) = clients.write().await.get_mut(&client_id) {
                                        client.subscriptions.insert(stream_id.to_string());
                                    }
                                }
                            }
                            Some("unsubscribe") => {
                                if let Some(stream_id) = stream_id {
                                    if let Some(client) = clients.write().await.get_mut(&client_id) {
                                        client.subscriptions.remove(stream_id);
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket closed by client {}", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_sender.send(Message::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let wanted = clients
                            .read()
                            .await
                            .get(&client_id)
                            .map_or(false, |c| c.wants(&event.stream_id));
                        if !wanted {
                            continue;
                        }

                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                error!("Failed to encode {} event: {}", event.event.kind(), e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sender.send(Message::Text(json)).await {
                            warn!("Failed to send to {}: {}", addr, e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {} lagging, skipped {} events", addr, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    if let Some(client) = clients.write().await.remove(&client_id) {
        info!(
            "WebSocket client {} disconnected ({} subscriptions)",
            client.addr,
            client.subscriptions.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;

    use super::*;
    use crate::core::LiveEvent;

    #[test]
    fn test_subscription_for_path() {
        assert_eq!(subscription_for_path("/ws/live/s-1"), "s-1");
        assert_eq!(subscription_for_path("/ws/live/s-1/"), "s-1");
        assert_eq!(subscription_for_path("/ws/live/"), "*");
        assert_eq!(subscription_for_path("/"), "*");
    }

    async fn next_json<S>(ws: &mut S) -> serde_json::Value
    where
        S: StreamExt<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for message")
                .expect("socket closed")
                .expect("socket error");
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_per_stream_delivery_and_pruning() {
        let server = WebSocketServer::new(&StreamingConfig {
            websocket_enabled: true,
            websocket_port: 0,
            ..StreamingConfig::default()
        });
        let bus = Arc::new(EventBus::new(16));
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let addr = server.start(bus.clone(), shutdown_rx).await.unwrap();

        let url = format!("ws://127.0.0.1:{}/ws/live/s-1", addr.port());
        let (mut ws, _) = connect_async(url).await.unwrap();

        let welcome = next_json(&mut ws).await;
        assert_eq!(welcome["type"], "connection_established");
        assert_eq!(welcome["stream_id"], "s-1");
        assert_eq!(server.client_count().await, 1);

        bus.publish("s-2", LiveEvent::Samples { sample_count: 2, samples: vec![] });
        bus.publish("s-1", LiveEvent::Samples { sample_count: 1, samples: vec![] });

        let event = next_json(&mut ws).await;
        assert_eq!(event["stream_id"], "s-1");
        assert_eq!(event["type"], "samples");
        assert_eq!(event["data"]["sample_count"], 1);

        ws.send(Message::Text(r#"{"type":"ping"}"#.to_string())).await.unwrap();
        assert_eq!(next_json(&mut ws).await["type"], "pong");

        ws.close(None).await.unwrap();
        drop(ws);

        let pruned = timeout(Duration::from_secs(5), async {
            while server.client_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(pruned.is_ok());
    }
}
