use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{error_message_from, probe_reachable, ProviderError, SendReceipt};

const API_BASE_URL: &str = "https://textlinksms.com";

#[derive(Debug, Clone)]
pub struct TextLinkProvider {
    client: Client,
    base_url: String,
    api_key: String,
    sim_card_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SendSmsRequest<'a> {
    phone_number: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sim_card_id: Option<i64>,
}

impl TextLinkProvider {
    pub fn new(client: Client, api_key: String, sim_card_id: Option<i64>) -> Self {
        Self {
            client,
            base_url: API_BASE_URL.to_string(),
            api_key,
            sim_card_id,
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub async fn send(&self, phone: &str, body: &str) -> Result<SendReceipt, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::Misconfigured("missing TextLink API key".into()));
        }

        let resp = self
            .client
            .post(format!("{}/api/send-sms", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&SendSmsRequest {
                phone_number: phone,
                text: body,
                sim_card_id: self.sim_card_id,
            })
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
        if payload.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                code: payload.get("code").map(|c| c.to_string().trim_matches('"').to_string()),
                message: error_message_from(&text),
            });
        }

        // Older API versions acknowledge without an id; mint a unique one so
        // the correlation column stays unique.
        let correlation_id = ["id", "message_id", "messageId"]
            .iter()
            .find_map(|key| match payload.get(*key) {
                Some(JsonValue::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(JsonValue::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| format!("tl-{}", Uuid::new_v4()));

        Ok(SendReceipt {
            correlation_id,
            carrier_status: None,
        })
    }

    pub async fn probe(&self) -> Result<(), ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::Misconfigured("missing TextLink API key".into()));
        }
        probe_reachable(&self.client, &self.base_url).await
    }
}
