//! WebSocket connector for a rosbridge server.
//!
//! Opens the socket with `tokio-tungstenite`, then splits it into two pump
//! tasks bound to one [`TransportHandle`]:
//!
//! * **writer** – drains the handle's outbound channel onto the socket and
//!   sends a close frame once the handle is closed locally.
//! * **reader** – hands every text frame to [`TransportHandle::ingest`] and
//!   closes the handle when the peer goes away.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rosdeck_types::DeckError;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::transport::{Connector, TransportHandle};

/// Production [`Connector`] speaking rosbridge over a websocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Map `http(s)://` bridge URLs onto the matching websocket scheme.
pub fn websocket_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<TransportHandle, DeckError> {
        let target = websocket_url(url);
        let (ws_stream, _response) = connect_async(target.as_str())
            .await
            .map_err(|e| DeckError::Transport(format!("ws connect to {target}: {e}")))?;
        info!(url = %target, "websocket open");

        let (handle, mut outbound) = TransportHandle::new(url);
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let writer = handle.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound.recv() => {
                        let Some(json) = frame else { break };
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            writer.close();
                            break;
                        }
                    }
                    _ = writer.closed() => {
                        // Flush whatever was queued before the close.
                        while let Ok(json) = outbound.try_recv() {
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            debug!(transport = writer.id(), "ws writer stopped");
        });

        let reader = handle.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = ws_rx.next() => match msg {
                        Some(Ok(Message::Text(text))) => reader.ingest(text.as_str()),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            warn!(transport = reader.id(), error = %e, "ws read error");
                            break;
                        }
                        Some(Ok(_)) => {}
                    },
                    _ = reader.closed() => break,
                }
            }
            reader.close();
            debug!(transport = reader.id(), "ws reader stopped");
        });

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SubscribeOptions;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::accept_async;

    #[test]
    fn http_urls_map_to_websocket_schemes() {
        assert_eq!(websocket_url("http://localhost:3000"), "ws://localhost:3000");
        assert_eq!(websocket_url("https://robot.example.com"), "wss://robot.example.com");
        assert_eq!(websocket_url("ws://10.0.0.2:9090"), "ws://10.0.0.2:9090");
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = WsConnector::new().open(&format!("ws://{addr}")).await.unwrap_err();
        assert!(matches!(err, DeckError::Transport(_)));
    }

    #[tokio::test]
    async fn frames_flow_both_ways_and_peer_close_is_observed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Minimal bridge: answer the first subscribe with one publish, then hang up.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                if frame["op"] == "subscribe" {
                    let publish = serde_json::json!({
                        "op": "publish",
                        "topic": frame["topic"],
                        "msg": {"data": 41.5}
                    });
                    ws.send(Message::Text(publish.to_string().into())).await.unwrap();
                    ws.close(None).await.unwrap();
                    break;
                }
            }
        });

        let handle = WsConnector::new().open(&format!("ws://{addr}")).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = handle
            .subscribe(
                "/imu_temp",
                "std_msgs/Float32",
                SubscribeOptions::default(),
                Arc::new(move |msg| {
                    let _ = tx.send(msg);
                }),
            )
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg["data"], 41.5);

        handle.closed().await;
        assert!(!handle.is_connected());
    }
}
