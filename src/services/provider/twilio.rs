use reqwest::Client;
use serde::Deserialize;

use super::{error_message_from, ProviderError, SendReceipt, SenderNumber};

const API_BASE_URL: &str = "https://api.twilio.com";

#[derive(Debug, Clone)]
pub struct TwilioProvider {
    client: Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    status_callback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IncomingNumbersPage {
    #[serde(default)]
    incoming_phone_numbers: Vec<IncomingNumber>,
}

#[derive(Debug, Deserialize)]
struct IncomingNumber {
    sid: String,
    phone_number: String,
    friendly_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<i64>,
    message: Option<String>,
}

impl TwilioProvider {
    pub fn new(
        client: Client,
        account_sid: String,
        auth_token: String,
        from_number: String,
        status_callback_url: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: API_BASE_URL.to_string(),
            account_sid,
            auth_token,
            from_number,
            status_callback_url,
        }
    }

    /// Points the adapter at another host (mock carriers in tests).
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn account_url(&self) -> String {
        format!("{}/2010-04-01/Accounts/{}", self.base_url, self.account_sid)
    }

    /// `phone` is already E.164, which is what the Messages resource expects.
    pub async fn send(&self, phone: &str, body: &str) -> Result<SendReceipt, ProviderError> {
        if self.account_sid.is_empty() || self.from_number.is_empty() {
            return Err(ProviderError::Misconfigured(
                "Twilio account SID and sender number are required".into(),
            ));
        }

        let mut form: Vec<(&str, &str)> = vec![
            ("To", phone),
            ("From", self.from_number.as_str()),
            ("Body", body),
        ];
        if let Some(callback) = &self.status_callback_url {
            form.push(("StatusCallback", callback.as_str()));
        }

        let resp = self
            .client
            .post(format!("{}/Messages.json", self.account_url()))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(ProviderError::from_reqwest)?;

        if !status.is_success() {
            let (code, message) = match serde_json::from_str::<ApiError>(&text) {
                Ok(err) => (
                    err.code.map(|c| c.to_string()),
                    err.message.unwrap_or_else(|| error_message_from(&text)),
                ),
                Err(_) => (None, error_message_from(&text)),
            };
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let resource: MessageResource = serde_json::from_str(&text)
            .map_err(|e| ProviderError::InvalidResponse(format!("invalid message resource: {}", e)))?;
        let sid = resource
            .sid
            .filter(|sid| !sid.is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("message resource without sid".into()))?;

        if resource.status.as_deref() == Some("failed") {
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                code: None,
                message: format!("message {} reported failed on creation", sid),
            });
        }

        Ok(SendReceipt {
            correlation_id: sid,
            carrier_status: resource.status,
        })
    }

    pub async fn sender_numbers(&self) -> Result<Vec<SenderNumber>, ProviderError> {
        let resp = self
            .client
            .get(format!("{}/IncomingPhoneNumbers.json", self.account_url()))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(ProviderError::from_reqwest)?;
        if !status.is_success() {
            return Err(account_error(status.as_u16(), &text));
        }

        let page: IncomingNumbersPage = serde_json::from_str(&text)
            .map_err(|e| ProviderError::InvalidResponse(format!("invalid number list: {}", e)))?;
        Ok(page
            .incoming_phone_numbers
            .into_iter()
            .map(|n| SenderNumber {
                sid: n.sid,
                phone: n.phone_number,
                friendly_name: n.friendly_name,
            })
            .collect())
    }

    pub async fn probe(&self) -> Result<(), ProviderError> {
        let resp = self
            .client
            .get(format!("{}.json", self.account_url()))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(account_error(status.as_u16(), &text))
    }
}

/// Failure reading an account resource. Credential problems are configuration
/// errors, not carrier hiccups.
fn account_error(status: u16, body: &str) -> ProviderError {
    if status == 401 || status == 403 {
        ProviderError::Misconfigured(format!(
            "Twilio rejected credentials: {}",
            error_message_from(body)
        ))
    } else {
        ProviderError::Rejected {
            status,
            code: None,
            message: error_message_from(body),
        }
    }
}
