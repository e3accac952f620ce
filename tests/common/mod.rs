#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request, Router};
use jsonwebtoken::{encode, EncodingKey, Header};
use sms_campaign_backend::{
    build_router,
    config::{Config, DeliverySettings, ProviderSettings, RateLimitSettings},
    database::{MemoryMessageStore, MessageStore},
    middleware::auth::Claims,
    services::{
        delivery_service::{DeliveryWorker, RetryPolicy},
        provider::{Provider, TwilioProvider},
        queue_service::DeliveryQueue,
        rate_limiter::RateLimiter,
    },
    utils::signature::compute_signature,
    AppState,
};
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

pub const JWT_SECRET: &str = "test_secret_key";
pub const SIGNING_SECRET: &str = "twilio_auth_token";
pub const PUBLIC_BASE_URL: &str = "https://sms.example.com";

pub fn test_config() -> Config {
    Config {
        server_address: "127.0.0.1:0".into(),
        database_url: "postgres://unused".into(),
        jwt_secret: JWT_SECRET.into(),
        public_base_url: PUBLIC_BASE_URL.into(),
        webhook_signing_secret: SIGNING_SECRET.into(),
        provider: ProviderSettings::Twilio {
            account_sid: "AC123".into(),
            auth_token: SIGNING_SECRET.into(),
            from_number: "+15559990000".into(),
            status_callback_url: None,
        },
        provider_timeout: Duration::from_secs(2),
        skip_provider_probe: true,
        delivery: DeliverySettings {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            ..DeliverySettings::default()
        },
        rate_limit: RateLimitSettings {
            api_rps: 1_000,
            webhook_rps: 1_000,
            ..RateLimitSettings::default()
        },
        inbound_default_owner: None,
    }
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
    }
}

pub fn twilio_provider(server: &MockServer) -> Provider {
    Provider::Twilio(
        TwilioProvider::new(
            reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .build()
                .unwrap(),
            "AC123".into(),
            SIGNING_SECRET.into(),
            "+15559990000".into(),
            None,
        )
        .with_base_url(server.uri()),
    )
}

pub fn bearer(owner: &str) -> String {
    let claims = Claims {
        sub: owner.into(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {}", token)
}

pub struct TestApp {
    pub router: Router,
    pub store: MemoryMessageStore,
    pub queue: DeliveryQueue,
    pub shutdown: CancellationToken,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Router over an in-memory store with live in-process delivery workers.
pub async fn spawn_app(provider: Provider) -> TestApp {
    spawn_app_with(provider, test_config()).await
}

pub async fn spawn_app_with(provider: Provider, config: Config) -> TestApp {
    let store = MemoryMessageStore::new();
    let shared: Arc<dyn MessageStore> = Arc::new(store.clone());
    let queue = DeliveryQueue::in_process(config.delivery.concurrency);
    let limiter = RateLimiter::memory();

    let worker = DeliveryWorker::new(shared.clone(), provider.clone(), fast_policy(), Duration::from_secs(30));
    let shutdown = CancellationToken::new();
    queue.start(worker, shutdown.clone()).await.unwrap();

    let router = build_router(AppState::new(config, shared, queue.clone(), limiter, provider));
    TestApp {
        router,
        store,
        queue,
        shutdown,
    }
}

pub fn form_body(params: &BTreeMap<String, String>) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}

/// A carrier callback request signed the way the carrier signs it.
pub fn signed_callback(path: &str, params: &[(&str, &str)]) -> Request<Body> {
    let params: BTreeMap<String, String> = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let url = format!("{}{}", PUBLIC_BASE_URL, path);
    let signature = compute_signature(SIGNING_SECRET, &url, &params).unwrap();
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/x-www-form-urlencoded")
        .header("x-twilio-signature", signature)
        .body(Body::from(form_body(&params)))
        .unwrap()
}

pub async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Polls `check` until it returns true or the timeout elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
