use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::RealtimeConfig;
use crate::error::BridgeError;

/// Body shapes pushed to the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RealtimeMessage {
    Text {
        phone_number: String,
        text: String,
        name: String,
    },
    Image {
        phone_number: String,
        url: String,
        name: String,
    },
    Receipt {
        message_id: i64,
    },
}

pub fn channel_name(prefix: &str, phone_number: &str) -> String {
    format!("{}_{}", prefix, phone_number)
}

/// Publishes account-tagged messages to the pub/sub service over its HTTP
/// publish endpoint. Disabled entirely when the session opts out or no keys
/// are configured.
#[derive(Clone)]
pub struct RealtimePublisher {
    client: Client,
    origin: String,
    publish_key: Option<String>,
    subscribe_key: Option<String>,
    channel: String,
    account: String,
    enabled: bool,
}

impl RealtimePublisher {
    pub fn new(client: Client, cfg: &RealtimeConfig, account: String) -> Self {
        Self {
            client,
            origin: cfg.origin.clone(),
            publish_key: cfg.publish_key.clone(),
            subscribe_key: cfg.subscribe_key.clone(),
            channel: channel_name(&cfg.channel_prefix, &account),
            account,
            enabled: cfg.enabled,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn publish(&self, message: RealtimeMessage) -> Result<(), BridgeError> {
        if !self.enabled {
            return Ok(());
        }
        let (Some(publish_key), Some(subscribe_key)) =
            (self.publish_key.as_deref(), self.subscribe_key.as_deref())
        else {
            return Ok(());
        };

        let body = serde_json::json!({
            "channel": self.channel,
            "account": self.account,
            "message": message,
        });
        let encoded = utf8_percent_encode(&body.to_string(), NON_ALPHANUMERIC).to_string();
        let url = format!(
            "{}/publish/{}/{}/0/{}/0/{}",
            self.origin, publish_key, subscribe_key, self.channel, encoded
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(BridgeError::sink)?;
        if !resp.status().is_success() {
            return Err(BridgeError::Sink(format!(
                "realtime publish returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
