use crate::models::{
    error::ApiResult,
    openai::{Model, ModelList},
};
use axum::{Json, response::IntoResponse};
use chrono::Utc;
use miui_search_sdk::UPSTREAM_MODEL;

pub async fn list_models() -> ApiResult<impl IntoResponse> {
    let response = ModelList {
        object: "list".to_string(),
        data: vec![Model {
            id: UPSTREAM_MODEL.to_string(),
            object: "model".to_string(),
            created: Utc::now().timestamp(),
            owned_by: "miui".to_string(),
        }],
    };

    Ok(Json(response))
}
