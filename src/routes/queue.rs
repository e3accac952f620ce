use axum::{extract::State, Extension, Json};
use serde_json::{json, Value};

use crate::{
    error::Result, middleware::auth::Claims, services::campaign_service::CampaignService,
    AppState,
};

pub async fn queue_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>> {
    let stats = state.queue.stats().await?;
    let submit_limit = state
        .limiter
        .status(
            &CampaignService::submit_key(claims.owner_id()),
            state.campaign_service.submit_limit(),
        )
        .await?;
    Ok(Json(json!({
        "backend": state.queue.backend(),
        "stats": stats,
        "submitLimit": submit_limit,
    })))
}
