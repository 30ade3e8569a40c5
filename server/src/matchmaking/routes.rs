use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::auth::middleware::Claims;
use crate::error::MatchmakingError;
use crate::matchmaking::InstanceSummary;
use crate::state::AppState;

/// GET /api/matchmaking/{room_id}/instances
pub async fn list_public_instances(
    State(state): State<AppState>,
    claims: Claims,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<InstanceSummary>>, (StatusCode, String)> {
    state
        .matchmaker
        .list_public(&room_id)
        .await
        .map(Json)
        .map_err(|err| {
            let status = match &err {
                MatchmakingError::RoomNotFound => StatusCode::NOT_FOUND,
                MatchmakingError::Store(e) => {
                    tracing::error!(
                        user_id = %claims.id,
                        room_id = %room_id,
                        error = %e,
                        "Failed to list instances"
                    );
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                _ => StatusCode::BAD_REQUEST,
            };
            (status, err.client_message())
        })
}
