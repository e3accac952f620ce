use reqwest::Client;
use serde_json::Value as JsonValue;

use super::{error_message_from, probe_reachable, ProviderError, SendReceipt};

/// Bulk-SMS gateway reached through RapidAPI.
///
/// The gateway answers HTTP 200 even for rejected messages and signals the
/// failure with a bare numeric code in the body (e.g. `1002` bad key, `1006`
/// inactive account). Those bodies are failures.
#[derive(Debug, Clone)]
pub struct EasySendProvider {
    client: Client,
    base_url: String,
    api_key: String,
    api_host: String,
    sender: String,
}

impl EasySendProvider {
    pub fn new(client: Client, api_key: String, api_host: String, sender: String) -> Self {
        Self {
            client,
            base_url: format!("https://{}", api_host),
            api_key,
            api_host,
            sender,
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// The gateway wants the number without the leading `+`.
    pub async fn send(&self, phone: &str, body: &str) -> Result<SendReceipt, ProviderError> {
        let to = phone.trim_start_matches('+');
        let form = [
            ("from", self.sender.as_str()),
            ("to", to),
            ("text", body),
            ("type", "0"),
        ];

        let resp = self
            .client
            .post(format!("{}/bulksms", self.base_url))
            .header("x-rapidapi-key", &self.api_key)
            .header("x-rapidapi-host", &self.api_host)
            .form(&form)
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

        parse_response(status.as_u16(), &text)
    }

    pub async fn probe(&self) -> Result<(), ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::Misconfigured("missing RapidAPI key".into()));
        }
        probe_reachable(&self.client, &self.base_url).await
    }
}

fn parse_response(status: u16, text: &str) -> Result<SendReceipt, ProviderError> {
    let trimmed = text.trim();

    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(ProviderError::Rejected {
            status,
            code: Some(trimmed.to_string()),
            message: format!("gateway returned error code {}", trimmed),
        });
    }

    if let Some(rest) = trimmed.strip_prefix("OK") {
        let id = rest.trim_start_matches(':').trim();
        if !id.is_empty() {
            return Ok(SendReceipt {
                correlation_id: id.split(',').next().unwrap_or(id).trim().to_string(),
                carrier_status: Some("OK".into()),
            });
        }
    }

    if let Ok(payload) = serde_json::from_str::<JsonValue>(trimmed) {
        let ok = payload
            .get("status")
            .and_then(|v| v.as_str())
            .is_some_and(|s| s.eq_ignore_ascii_case("ok"));
        let id = payload
            .get("messageIds")
            .and_then(|v| v.as_array())
            .and_then(|ids| ids.first())
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if let (true, Some(id)) = (ok, id) {
            return Ok(SendReceipt {
                correlation_id: id,
                carrier_status: Some("OK".into()),
            });
        }
        return Err(ProviderError::Rejected {
            status,
            code: payload.get("error").map(|c| c.to_string()),
            message: error_message_from(trimmed),
        });
    }

    Err(ProviderError::InvalidResponse(format!(
        "unrecognised gateway response: {}",
        error_message_from(trimmed)
    )))
}
