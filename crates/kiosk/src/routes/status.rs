//! Status Routes

use axum::{extract::State, Json};
use session::SessionSnapshot;
use std::sync::Arc;

use crate::AppState;

/// Latest snapshot published by the analysis thread
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    let snapshot = state.snapshots.borrow().clone();
    Json(snapshot)
}
