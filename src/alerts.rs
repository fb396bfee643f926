use reqwest::Client;
use tracing::warn;
use uuid::Uuid;

use crate::config::AlertConfig;

const CRASH_REPORT_URL: &str = "https://api.rollbar.com/api/1/item/";

/// Operational alert sink. Every alert lands in the log; with a crash-report
/// key configured it is also shipped to the reporting service. Delivery is
/// best-effort and never blocks the caller's unit of work.
#[derive(Clone)]
pub struct AlertReporter {
    client: Client,
    access_token: Option<String>,
    environment: String,
}

impl AlertReporter {
    pub fn new(client: Client, cfg: &AlertConfig) -> Self {
        Self {
            client,
            access_token: cfg.crash_report_key.clone(),
            environment: cfg.environment.clone(),
        }
    }

    pub async fn report(&self, level: &str, message: &str) {
        warn!(level, "{message}");

        let Some(token) = self.access_token.as_deref() else {
            return;
        };

        let payload = serde_json::json!({
            "access_token": token,
            "data": {
                "environment": self.environment,
                "level": level,
                "uuid": Uuid::new_v4().to_string(),
                "body": { "message": { "body": message } },
            },
        });

        let result = self.client.post(CRASH_REPORT_URL).json(&payload).send().await;
        match result {
            Ok(resp) if !resp.status().is_success() => {
                warn!("crash report rejected: {}", resp.status());
            }
            Err(err) => warn!("crash report delivery failed: {err}"),
            _ => {}
        }
    }
}
