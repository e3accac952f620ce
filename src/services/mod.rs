pub mod campaign_service;
pub mod delivery_service;
pub mod provider;
pub mod queue_service;
pub mod rate_limiter;
pub mod webhook_service;
