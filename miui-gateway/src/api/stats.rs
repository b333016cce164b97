use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;

use crate::{api::chat::ChatState, core::store::CacheStats, models::error::ApiResult};

#[derive(Debug, Serialize)]
pub struct SystemStats {
    pub cache: CacheStats,
    pub version: &'static str,
}

pub async fn get_stats(State(state): State<ChatState>) -> ApiResult<impl IntoResponse> {
    let stats = SystemStats {
        cache: state.service.cache().stats(),
        version: env!("CARGO_PKG_VERSION"),
    };

    Ok(Json(stats))
}
