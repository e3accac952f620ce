use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};

use crate::{
    dto::message_dto::{MessagesQuery, SendReplyRequest, SendReplyResponse},
    error::Result,
    middleware::auth::Claims,
    models::message::{Conversation, Message},
    AppState,
};

pub async fn send_reply(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SendReplyRequest>,
) -> Result<(StatusCode, Json<SendReplyResponse>)> {
    let message = state
        .campaign_service
        .send_reply(claims.owner_id(), payload)
        .await?;
    Ok((StatusCode::CREATED, Json(SendReplyResponse { message })))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<Message>>> {
    let messages = state
        .campaign_service
        .list_messages(claims.owner_id(), &query)
        .await?;
    Ok(Json(messages))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Conversation>>> {
    let conversations = state
        .campaign_service
        .list_conversations(claims.owner_id())
        .await?;
    Ok(Json(conversations))
}

pub async fn conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(phone): Path<String>,
) -> Result<Json<Vec<Message>>> {
    let messages = state
        .campaign_service
        .conversation(claims.owner_id(), &phone)
        .await?;
    Ok(Json(messages))
}
