use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{
    error::{Error, Result},
    services::provider::ProviderError,
    AppState,
};

pub async fn sender_numbers(State(state): State<AppState>) -> Result<Json<Value>> {
    let numbers = state.provider.sender_numbers().await.map_err(|err| match err {
        ProviderError::Unsupported(name) => {
            Error::BadRequest(format!("{} has no sender number listing", name))
        }
        other => Error::Provider(other),
    })?;
    Ok(Json(json!({ "success": true, "numbers": numbers })))
}
