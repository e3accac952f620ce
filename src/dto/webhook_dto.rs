use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Delivery status callback posted by the carrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCallback {
    pub message_sid: String,
    pub status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Inbound message posted by the carrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCallback {
    pub message_sid: String,
    pub from: String,
    pub to: Option<String>,
    pub body: String,
}

fn field(form: &BTreeMap<String, String>, key: &str) -> Option<String> {
    form.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(form: &BTreeMap<String, String>, key: &str) -> Result<String> {
    field(form, key).ok_or_else(|| Error::BadRequest(format!("missing form field {}", key)))
}

impl StatusCallback {
    /// `MessageStatus` wins over the legacy `SmsStatus` field.
    pub fn from_form(form: &BTreeMap<String, String>) -> Result<Self> {
        let status = field(form, "MessageStatus")
            .or_else(|| field(form, "SmsStatus"))
            .ok_or_else(|| Error::BadRequest("missing form field MessageStatus".into()))?;
        Ok(Self {
            message_sid: required(form, "MessageSid")?,
            status,
            error_code: field(form, "ErrorCode"),
            error_message: field(form, "ErrorMessage"),
        })
    }
}

impl InboundCallback {
    pub fn from_form(form: &BTreeMap<String, String>) -> Result<Self> {
        Ok(Self {
            message_sid: required(form, "MessageSid")?,
            from: required(form, "From")?,
            to: field(form, "To"),
            body: form.get("Body").cloned().unwrap_or_default(),
        })
    }
}
