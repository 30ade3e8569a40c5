use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::state::AppState;
use crate::ws::actor;
use crate::ws::codec::GatewayProtocol;

/// GET /ws
pub async fn legacy_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(ws, state, GatewayProtocol::LegacyText)
}

/// GET /messaging-gateway
pub async fn v1_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(ws, state, GatewayProtocol::V1Text)
}

/// GET /ws-v2
pub async fn v2_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(ws, state, GatewayProtocol::V2Json)
}

/// Authentication happens in-band on the first frame, so every upgrade is
/// accepted and handed to a fresh actor.
fn upgrade(ws: WebSocketUpgrade, state: AppState, protocol: GatewayProtocol) -> Response {
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, protocol))
}
