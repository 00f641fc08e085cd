//! Heartbeat / control-plane interface. Contract: `device_update` merges an
//! overlay into the device's published state recursively; `restart_wda_proxy`
//! and `wda_healthcheck` are invoked from the cold-reset HTTP handler.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

#[async_trait]
pub trait HeartbeatClient: Send + Sync {
    async fn device_update(&self, udid: &str, payload: Value);
}

/// Overlay leaves replace; mapping-typed values recurse.
pub fn merge_recursive(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) if overlay_value.is_object() => {
                        merge_recursive(existing, overlay_value);
                    }
                    _ => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Persistent WebSocket connection to the control plane, reconnecting with a
/// fixed backoff on drop. `device_update` frames are JSON:
/// `{"type": "device_update", "udid": ..., "payload": ...}`.
pub struct WsHeartbeatClient {
    server_addr: String,
    sink: Mutex<Option<futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        Message,
    >>>,
}

impl WsHeartbeatClient {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            sink: Mutex::new(None),
        }
    }

    async fn ensure_connected(&self) {
        let mut guard = self.sink.lock().await;
        if guard.is_some() {
            return;
        }
        match tokio_tungstenite::connect_async(&self.server_addr).await {
            Ok((stream, _)) => {
                let (sink, mut stream_rx) = stream.split();
                *guard = Some(sink);
                tokio::spawn(async move {
                    while stream_rx.next().await.is_some() {
                        // Inbound control-plane requests (restart/healthcheck)
                        // are dispatched by the coordinator, not here.
                    }
                });
            }
            Err(e) => {
                log::warn!("heartbeat connect to {} failed: {e}", self.server_addr);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

#[async_trait]
impl HeartbeatClient for WsHeartbeatClient {
    async fn device_update(&self, udid: &str, payload: Value) {
        self.ensure_connected().await;
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else { return };

        let frame = serde_json::json!({
            "type": "device_update",
            "udid": udid,
            "payload": payload,
        });

        if sink.send(Message::Text(frame.to_string())).await.is_err() {
            *guard = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overlay_leaf_replaces_base_leaf() {
        let mut base = json!({"colding": false, "provider": null});
        let overlay = json!({"colding": true});
        merge_recursive(&mut base, &overlay);
        assert_eq!(base, json!({"colding": true, "provider": null}));
    }

    #[test]
    fn mapping_values_recurse() {
        let mut base = json!({"properties": {"name": "a", "product": "x"}});
        let overlay = json!({"properties": {"product": "y"}});
        merge_recursive(&mut base, &overlay);
        assert_eq!(base, json!({"properties": {"name": "a", "product": "y"}}));
    }

    #[test]
    fn overlay_introduces_new_keys() {
        let mut base = json!({"a": 1});
        let overlay = json!({"b": 2});
        merge_recursive(&mut base, &overlay);
        assert_eq!(base, json!({"a": 1, "b": 2}));
    }
}
