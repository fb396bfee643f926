use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

/// Typed protocol events, pushed by the sidecar callback route onto a
/// single-consumer channel and drained in arrival order by the event router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProtocolEvent {
    AuthSuccess {
        identity: String,
    },
    AuthFailure {
        identity: String,
        reason: String,
    },
    Disconnected {
        reason: String,
    },
    MessageReceived {
        message_id: String,
        jid: String,
        text: String,
        timestamp: Option<i64>,
        wants_receipt: bool,
        display_name: Option<String>,
        #[serde(default)]
        is_broadcast: bool,
    },
    GroupMessageReceived {
        message_id: String,
        group_jid: String,
        author_jid: String,
        text: String,
        timestamp: Option<i64>,
        wants_receipt: bool,
        display_name: Option<String>,
    },
    ImageReceived {
        message_id: String,
        jid: String,
        preview: Option<String>,
        url: String,
        size: Option<i64>,
        wants_receipt: bool,
        #[serde(default)]
        is_broadcast: bool,
    },
    DeliveryReceipt {
        jid: String,
        message_id: String,
    },
}

/// Source ids arrive as `<phone>@<host>` jids.
pub fn phone_from_jid(jid: &str) -> &str {
    jid.split('@').next().unwrap_or(jid)
}

/// The slice of the protocol session the bridge core drives. The network
/// connection itself lives in the sidecar; everything here is best-effort
/// request/response, with auth outcomes arriving later as events.
#[async_trait]
pub trait ProtocolSession: Send + Sync {
    async fn login(&self, identity: &str, secret: &[u8]) -> Result<(), BridgeError>;
    async fn send_message(&self, target: &str, body: &str) -> Result<String, BridgeError>;
    async fn acknowledge_message(&self, source_jid: &str, message_id: &str)
        -> Result<(), BridgeError>;
    async fn announce_presence(&self) -> Result<(), BridgeError>;
    async fn sync_config(&self) -> Result<(), BridgeError>;
    async fn ready(&self) -> Result<(), BridgeError>;
}

/// HTTP client for the protocol sidecar's action interface.
#[derive(Clone)]
pub struct SidecarSession {
    client: Client,
    base_url: String,
}

impl SidecarSession {
    pub fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    async fn call(&self, path: &str, payload: Value) -> Result<Value, BridgeError> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&payload)
            .send()
            .await
            .map_err(BridgeError::send)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Send(format!(
                "sidecar {} returned {}: {}",
                path, status, body
            )));
        }
        resp.json().await.map_err(BridgeError::send)
    }
}

#[async_trait]
impl ProtocolSession for SidecarSession {
    async fn login(&self, identity: &str, secret: &[u8]) -> Result<(), BridgeError> {
        let payload = serde_json::json!({
            "identity": identity,
            "secret": BASE64.encode(secret),
        });
        self.call("/login", payload).await.map(|_| ()).map_err(|err| match err {
            BridgeError::Send(msg) => BridgeError::Auth(msg),
            other => other,
        })
    }

    async fn send_message(&self, target: &str, body: &str) -> Result<String, BridgeError> {
        let payload = serde_json::json!({
            "to": target,
            "text": body,
        });
        let value = self.call("/send", payload).await?;
        value
            .get("message_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| BridgeError::Send("sidecar send returned no message id".to_string()))
    }

    async fn acknowledge_message(
        &self,
        source_jid: &str,
        message_id: &str,
    ) -> Result<(), BridgeError> {
        let payload = serde_json::json!({
            "jid": source_jid,
            "message_id": message_id,
        });
        self.call("/ack", payload).await.map(|_| ())
    }

    async fn announce_presence(&self) -> Result<(), BridgeError> {
        self.call("/presence", serde_json::json!({})).await.map(|_| ())
    }

    async fn sync_config(&self) -> Result<(), BridgeError> {
        self.call("/clientconfig", serde_json::json!({})).await.map(|_| ())
    }

    async fn ready(&self) -> Result<(), BridgeError> {
        self.call("/ready", serde_json::json!({})).await.map(|_| ())
    }
}
