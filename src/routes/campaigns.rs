use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use uuid::Uuid;

use crate::{
    dto::campaign_dto::{CampaignDetail, SubmitCampaignRequest, SubmitCampaignResponse},
    error::Result,
    middleware::auth::Claims,
    models::campaign::Campaign,
    AppState,
};

pub async fn submit_campaign(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SubmitCampaignRequest>,
) -> Result<(StatusCode, Json<SubmitCampaignResponse>)> {
    let response = state
        .campaign_service
        .submit_campaign(claims.owner_id(), payload)
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_campaigns(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Campaign>>> {
    let campaigns = state.campaign_service.list_campaigns(claims.owner_id()).await?;
    Ok(Json(campaigns))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignDetail>> {
    let detail = state.campaign_service.get_campaign(claims.owner_id(), id).await?;
    Ok(Json(detail))
}
