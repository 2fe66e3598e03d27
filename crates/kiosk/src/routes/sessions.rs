//! Session Routes

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::AppState;
use storage::StoredSession;

/// Query parameters for sessions endpoint
#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    /// Maximum number of records
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// Response for sessions endpoint
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub data: Vec<StoredSession>,
    pub count: usize,
    pub total: i64,
}

/// Recently archived sessions, newest first
pub async fn get_sessions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SessionQuery>,
) -> Result<Json<SessionResponse>, (StatusCode, String)> {
    let limit = params.limit.min(500);

    let query = async {
        let data = state.repository.recent(limit).await?;
        let total = state.repository.count().await?;
        Ok::<_, storage::StorageError>((data, total))
    };

    match query.await {
        Ok((data, total)) => Ok(Json(SessionResponse {
            count: data.len(),
            data,
            total,
        })),
        Err(e) => {
            error!("Session query failed: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
