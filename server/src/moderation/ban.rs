use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::error::AuthFailure;
use crate::players::Ban;
use crate::state::AppState;
use crate::ws::broadcast::force_close;
use crate::ws::codec::CLOSE_AUTH_FAILED;

#[derive(Debug, Deserialize)]
pub struct BanRequest {
    pub user_id: String,
    #[serde(default)]
    pub reason: String,
    /// Ban length in seconds
    pub duration_secs: i64,
}

#[derive(Debug, Serialize)]
pub struct BanResponse {
    /// Unix milliseconds at which the ban lapses
    pub end_ts: i64,
    /// Whether a live connection was closed
    pub disconnected: bool,
}

/// POST /api/moderation/ban
///
/// Add a timed ban and drop the player's live
/// connection (developers only).
pub async fn ban_user(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<BanRequest>,
) -> Result<Json<BanResponse>, (StatusCode, String)> {
    if !claims.developer {
        return Err((StatusCode::FORBIDDEN, "Developer access required".to_string()));
    }
    if req.duration_secs <= 0 {
        return Err((StatusCode::BAD_REQUEST, "duration_secs must be positive".to_string()));
    }

    let end_ts = Utc::now().timestamp_millis() + req.duration_secs.saturating_mul(1000);
    let ban = Ban {
        reason: req.reason.clone(),
        end_ts,
    };

    let found = state.players.add_ban(&req.user_id, ban).await.map_err(|e| {
        tracing::error!(user_id = %req.user_id, error = %e, "Failed to store ban");
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to store ban".to_string())
    })?;
    if !found {
        return Err((StatusCode::NOT_FOUND, "User not found".to_string()));
    }

    let disconnected = force_close(
        &state.connections,
        &req.user_id,
        CLOSE_AUTH_FAILED,
        AuthFailure::Banned.as_str(),
    );

    state
        .audit
        .record(format!(
            "User {} banned by {} until {}: {}",
            req.user_id, claims.id, end_ts, req.reason
        ))
        .await;

    Ok(Json(BanResponse {
        end_ts,
        disconnected,
    }))
}
