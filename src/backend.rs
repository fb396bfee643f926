use reqwest::Client;
use serde_json::Value;
use tracing::info;

use crate::error::BridgeError;

/// Webhook client for the backend API. Every payload is tagged with the
/// owning account's phone number before it leaves the process.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    account: String,
}

impl BackendClient {
    pub fn new(client: Client, base_url: String, account: String) -> Self {
        Self {
            client,
            base_url,
            account,
        }
    }

    fn tag_account(&self, mut payload: Value) -> Value {
        if let Some(map) = payload.as_object_mut() {
            map.insert("account".to_string(), Value::String(self.account.clone()));
        }
        payload
    }

    pub async fn post_event(&self, path: &str, payload: Value) -> Result<(), BridgeError> {
        let body = self.tag_account(payload);
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .map_err(BridgeError::sink)?;
        if !resp.status().is_success() {
            return Err(BridgeError::Sink(format!(
                "backend {} returned {}",
                path,
                resp.status()
            )));
        }
        Ok(())
    }

    pub async fn patch_event(&self, path: &str, payload: Value) -> Result<(), BridgeError> {
        let body = self.tag_account(payload);
        let resp = self
            .client
            .patch(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .map_err(BridgeError::sink)?;
        if !resp.status().is_success() {
            return Err(BridgeError::Sink(format!(
                "backend {} returned {}",
                path,
                resp.status()
            )));
        }
        Ok(())
    }

    pub async fn set_status(&self, status: i64, message: &str) -> Result<(), BridgeError> {
        info!(status, "setting account status");
        self.post_event(
            "/status",
            serde_json::json!({ "status": status, "message": message }),
        )
        .await
    }

    pub async fn report_auth_error(&self) -> Result<(), BridgeError> {
        self.post_event("/wa_auth_error", serde_json::json!({})).await
    }
}
