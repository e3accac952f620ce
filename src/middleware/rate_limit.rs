use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::services::rate_limiter::{RateLimit, RateLimiter};

/// Shared request budget for one group of routes.
#[derive(Clone)]
pub struct RouteLimit {
    limiter: RateLimiter,
    key: String,
    limit: RateLimit,
}

impl RouteLimit {
    pub fn new(limiter: RateLimiter, group: &str, limit: RateLimit) -> Self {
        Self {
            limiter,
            key: format!("rps:{}", group),
            limit,
        }
    }
}

/// Rejects with 429 once the group's window is spent. A limiter backend
/// failure lets the request through.
pub async fn rps_middleware(
    State(state): State<RouteLimit>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match state.limiter.check(&state.key, state.limit).await {
        Ok(decision) if !decision.allowed => {
            let mut resp = (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded").into_response();
            let retry_after = decision.reset_in_ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                resp.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
            resp
        }
        Ok(_) => next.run(req).await,
        Err(err) => {
            tracing::warn!(key = %state.key, error = %err, "rate limiter unavailable, allowing request");
            next.run(req).await
        }
    }
}
