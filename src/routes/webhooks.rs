use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{OriginalUri, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};

use crate::{
    dto::webhook_dto::{InboundCallback, StatusCallback},
    error::{Error, Result},
    services::rate_limiter::RateLimit,
    utils::signature::{verify_signature, SIGNATURE_HEADER},
    AppState,
};

const CALLBACK_RATE_KEY: &str = "rps:webhooks";

fn acknowledged() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "success": true })))
}

/// Form parameters from the raw body, whatever content type was declared.
fn parse_form(body: &Bytes) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

/// Counts authenticated callbacks against `WEBHOOK_RPS`. The carrier retries
/// anything but 200, so an exceeded budget is only logged.
async fn note_callback_rate(state: &AppState) {
    let limit = RateLimit::per_second(state.config.rate_limit.webhook_rps);
    match state.limiter.check(CALLBACK_RATE_KEY, limit).await {
        Ok(decision) if !decision.allowed => tracing::warn!(
            current = decision.current,
            limit = decision.limit,
            "carrier callbacks above configured rate"
        ),
        Ok(_) => {}
        Err(err) => tracing::debug!(error = %err, "callback rate not recorded"),
    }
}

/// Checks the carrier signature over the public callback URL and the form.
fn verify_carrier_signature(
    state: &AppState,
    headers: &HeaderMap,
    uri: &OriginalUri,
    form: &BTreeMap<String, String>,
) -> Result<()> {
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Unauthorized("missing carrier signature".into()))?;

    let path = uri
        .0
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.0.path());
    let url = format!("{}{}", state.config.public_base_url, path);

    if verify_signature(&state.config.webhook_signing_secret, &url, form, provided) {
        Ok(())
    } else {
        tracing::warn!(url = %url, "rejected carrier callback with bad signature");
        Err(Error::Unauthorized("invalid carrier signature".into()))
    }
}

pub async fn twilio_status(
    State(state): State<AppState>,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>)> {
    let form = parse_form(&body);
    verify_carrier_signature(&state, &headers, &uri, &form)?;
    note_callback_rate(&state).await;

    let callback = match StatusCallback::from_form(&form) {
        Ok(callback) => callback,
        Err(err) => {
            tracing::warn!(error = %err, "malformed status callback");
            return Ok(acknowledged());
        }
    };

    match state.webhook_service.reconcile(&callback).await {
        Ok(outcome) => tracing::debug!(correlation_id = %callback.message_sid, ?outcome, "status callback handled"),
        Err(err) => tracing::error!(
            correlation_id = %callback.message_sid,
            error = %err,
            "failed to reconcile status callback"
        ),
    }
    Ok(acknowledged())
}

pub async fn twilio_incoming(
    State(state): State<AppState>,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>)> {
    let form = parse_form(&body);
    verify_carrier_signature(&state, &headers, &uri, &form)?;
    note_callback_rate(&state).await;

    let callback = match InboundCallback::from_form(&form) {
        Ok(callback) => callback,
        Err(err) => {
            tracing::warn!(error = %err, "malformed inbound callback");
            return Ok(acknowledged());
        }
    };

    match state.webhook_service.record_inbound(&callback).await {
        Ok(outcome) => tracing::debug!(correlation_id = %callback.message_sid, ?outcome, "inbound callback handled"),
        Err(err) => tracing::error!(
            correlation_id = %callback.message_sid,
            error = %err,
            "failed to store inbound message"
        ),
    }
    Ok(acknowledged())
}
