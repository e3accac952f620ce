pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::database::MessageStore;
use crate::middleware::rate_limit::{rps_middleware, RouteLimit};
use crate::services::{
    campaign_service::CampaignService,
    provider::Provider,
    queue_service::DeliveryQueue,
    rate_limiter::{RateLimit, RateLimiter},
    webhook_service::WebhookService,
};

const BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn MessageStore>,
    pub queue: DeliveryQueue,
    pub limiter: RateLimiter,
    pub provider: Provider,
    pub campaign_service: CampaignService,
    pub webhook_service: WebhookService,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn MessageStore>,
        queue: DeliveryQueue,
        limiter: RateLimiter,
        provider: Provider,
    ) -> Self {
        let submit_limit = RateLimit::new(
            config.rate_limit.submit_limit,
            config.rate_limit.submit_window,
        );
        let campaign_service =
            CampaignService::new(store.clone(), queue.clone(), limiter.clone(), submit_limit);
        let webhook_service = WebhookService::new(store.clone(), config.inbound_default_owner.clone());

        Self {
            config: Arc::new(config),
            store,
            queue,
            limiter,
            provider,
            campaign_service,
            webhook_service,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let limits = &state.config.rate_limit;
    let api_limit = RouteLimit::new(state.limiter.clone(), "api", RateLimit::per_second(limits.api_rps));

    let api = Router::new()
        .route("/api/sms/send", post(routes::campaigns::submit_campaign))
        .route("/api/reply/send", post(routes::messages::send_reply))
        .route("/api/campaigns", get(routes::campaigns::list_campaigns))
        .route("/api/campaigns/:id", get(routes::campaigns::get_campaign))
        .route("/api/messages", get(routes::messages::list_messages))
        .route("/api/conversations", get(routes::messages::list_conversations))
        .route("/api/conversations/:phone", get(routes::messages::conversation))
        .route("/api/queue/status", get(routes::queue::queue_status))
        .route("/api/twilio/numbers", get(routes::provider::sender_numbers))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth::require_bearer_auth,
        ))
        .route_layer(from_fn_with_state(api_limit, rps_middleware));

    let webhooks = Router::new()
        .route("/api/webhooks/twilio/status", post(routes::webhooks::twilio_status))
        .route("/api/webhooks/twilio/incoming", post(routes::webhooks::twilio_incoming));

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/startup/check", get(routes::health::startup_check))
        .merge(api)
        .merge(webhooks)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES)),
        )
        .with_state(state)
}
