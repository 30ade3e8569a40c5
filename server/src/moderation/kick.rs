use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::state::AppState;
use crate::ws::broadcast::force_close;

/// Close code for a kicked connection.
pub const CLOSE_KICKED: u16 = 4004;

#[derive(Debug, Deserialize)]
pub struct KickRequest {
    pub user_id: String,
    #[serde(default)]
    pub reason: String,
}

/// POST /api/moderation/kick
///
/// Disconnect a player (developers only).
/// The player may reconnect immediately.
pub async fn kick_user(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<KickRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    if !claims.developer {
        return Err((StatusCode::FORBIDDEN, "Developer access required".to_string()));
    }

    let reason = if req.reason.is_empty() {
        "kicked".to_string()
    } else {
        req.reason
    };

    if !force_close(&state.connections, &req.user_id, CLOSE_KICKED, &reason) {
        return Err((StatusCode::NOT_FOUND, "User is not connected".to_string()));
    }

    state
        .audit
        .record(format!("User {} kicked by {}: {}", req.user_id, claims.id, reason))
        .await;

    Ok(StatusCode::OK)
}
