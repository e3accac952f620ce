//! Carrier adapters behind a single `send` capability.
//!
//! Exactly one variant is wired in per deployment, chosen from configuration
//! at startup. Every variant reports carrier failures as a typed
//! [`ProviderError`]; none of them reports success for a failed call.

pub mod easysend;
pub mod textlink;
pub mod twilio;
pub mod verify;

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use crate::config::ProviderSettings;
use crate::error::Result;
use crate::utils::phone;

pub use easysend::EasySendProvider;
pub use textlink::TextLinkProvider;
pub use twilio::TwilioProvider;
pub use verify::VerifyProvider;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("carrier request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("carrier rejected message (HTTP {status}): {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("unexpected carrier response: {0}")]
    InvalidResponse(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("provider misconfigured: {0}")]
    Misconfigured(String),

    #[error("{0} does not support this operation")]
    Unsupported(&'static str),
}

impl ProviderError {
    /// Carrier-side failures count against the retry budget; bad input and
    /// bad configuration fail the message straight away.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProviderError::InvalidInput(_)
                | ProviderError::Misconfigured(_)
                | ProviderError::Unsupported(_)
        )
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// What a carrier hands back for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub correlation_id: String,
    pub carrier_status: Option<String>,
}

/// A sender number registered with the carrier account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderNumber {
    pub sid: String,
    pub phone: String,
    pub friendly_name: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Provider {
    Twilio(TwilioProvider),
    TextLink(TextLinkProvider),
    EasySend(EasySendProvider),
    Verify(VerifyProvider),
}

impl Provider {
    pub fn from_settings(settings: &ProviderSettings, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let provider = match settings {
            ProviderSettings::Twilio {
                account_sid,
                auth_token,
                from_number,
                status_callback_url,
            } => Provider::Twilio(TwilioProvider::new(
                client,
                account_sid.clone(),
                auth_token.clone(),
                from_number.clone(),
                status_callback_url.clone(),
            )),
            ProviderSettings::TextLink {
                api_key,
                sim_card_id,
            } => Provider::TextLink(TextLinkProvider::new(client, api_key.clone(), *sim_card_id)),
            ProviderSettings::EasySend {
                api_key,
                api_host,
                sender,
            } => Provider::EasySend(EasySendProvider::new(
                client,
                api_key.clone(),
                api_host.clone(),
                sender.clone(),
            )),
            ProviderSettings::Verify { api_key, api_host } => {
                Provider::Verify(VerifyProvider::new(client, api_key.clone(), api_host.clone()))
            }
        };
        Ok(provider)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Twilio(_) => "twilio",
            Provider::TextLink(_) => "textlink",
            Provider::EasySend(_) => "easysend",
            Provider::Verify(_) => "verify",
        }
    }

    /// Sends `body` to `phone`. The verification variant ignores `body`: the
    /// carrier composes the code message itself.
    pub async fn send(&self, phone: &str, body: &str) -> std::result::Result<SendReceipt, ProviderError> {
        if !phone::has_digits(phone) {
            return Err(ProviderError::InvalidInput("recipient phone is empty".into()));
        }
        let phone = phone::normalize(phone);

        let result = match self {
            Provider::Twilio(p) => p.send(&phone, require_body(body)?).await,
            Provider::TextLink(p) => p.send(&phone, require_body(body)?).await,
            Provider::EasySend(p) => p.send(&phone, require_body(body)?).await,
            Provider::Verify(p) => p.send(&phone).await,
        };

        match &result {
            Ok(receipt) => tracing::debug!(
                provider = self.name(),
                correlation_id = %receipt.correlation_id,
                "carrier accepted message"
            ),
            Err(err) => tracing::warn!(provider = self.name(), error = %err, "carrier send failed"),
        }
        result
    }

    /// Sender numbers on the carrier account. Only Twilio exposes them.
    pub async fn sender_numbers(&self) -> std::result::Result<Vec<SenderNumber>, ProviderError> {
        match self {
            Provider::Twilio(p) => p.sender_numbers().await,
            other => Err(ProviderError::Unsupported(other.name())),
        }
    }

    /// Startup connectivity check against the configured carrier.
    pub async fn probe(&self) -> std::result::Result<(), ProviderError> {
        match self {
            Provider::Twilio(p) => p.probe().await,
            Provider::TextLink(p) => p.probe().await,
            Provider::EasySend(p) => p.probe().await,
            Provider::Verify(p) => p.probe().await,
        }
    }
}

fn require_body(body: &str) -> std::result::Result<&str, ProviderError> {
    if body.trim().is_empty() {
        Err(ProviderError::InvalidInput("message body is empty".into()))
    } else {
        Ok(body)
    }
}

/// Pulls a human-readable reason out of a carrier error body.
pub(crate) fn error_message_from(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error", "error_message", "detail"] {
            if let Some(msg) = value.get(key).and_then(|v| v.as_str()) {
                return msg.to_string();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

/// Any HTTP answer from the carrier host counts as reachable; only transport
/// failures fail the probe.
pub(crate) async fn probe_reachable(
    client: &Client,
    url: &str,
) -> std::result::Result<(), ProviderError> {
    client
        .get(url)
        .send()
        .await
        .map(|_| ())
        .map_err(ProviderError::from_reqwest)
}
