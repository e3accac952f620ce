use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use super::{error_message_from, probe_reachable, ProviderError, SendReceipt};

/// Verification-code carrier: it generates and texts a numeric code itself,
/// so there is no body to send.
#[derive(Debug, Clone)]
pub struct VerifyProvider {
    client: Client,
    base_url: String,
    api_key: String,
    api_host: String,
}

impl VerifyProvider {
    pub fn new(client: Client, api_key: String, api_host: String) -> Self {
        Self {
            client,
            base_url: format!("https://{}", api_host),
            api_key,
            api_host,
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub async fn send(&self, phone: &str) -> Result<SendReceipt, ProviderError> {
        let resp = self
            .client
            .post(format!("{}/send-numeric-verify", self.base_url))
            .header("x-rapidapi-key", &self.api_key)
            .header("x-rapidapi-host", &self.api_host)
            .json(&json!({ "target": phone }))
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(ProviderError::from_reqwest)?;
        if !status.is_success() {
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                code: None,
                message: error_message_from(&text),
            });
        }

        let payload: JsonValue = serde_json::from_str(&text)
            .map_err(|e| ProviderError::InvalidResponse(format!("invalid JSON: {}", e)))?;
        let failed = payload.get("error").is_some_and(|e| !e.is_null())
            || payload.get("success").and_then(|v| v.as_bool()) == Some(false)
            || payload
                .get("status")
                .and_then(|v| v.as_str())
                .is_some_and(|s| s.eq_ignore_ascii_case("error") || s.eq_ignore_ascii_case("failed"));
        if failed {
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                code: None,
                message: error_message_from(&text),
            });
        }

        let correlation_id = ["id", "verify_id", "request_id", "messageId"]
            .iter()
            .find_map(|key| match payload.get(*key) {
                Some(JsonValue::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(JsonValue::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| format!("vf-{}", Uuid::new_v4()));

        Ok(SendReceipt {
            correlation_id,
            carrier_status: payload
                .get("status")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }

    pub async fn probe(&self) -> Result<(), ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::Misconfigured("missing RapidAPI key".into()));
        }
        probe_reachable(&self.client, &self.base_url).await
    }
}
