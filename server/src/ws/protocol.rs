use axum::extract::ws::Message;
use chrono::Utc;
use uuid::Uuid;

use crate::auth::jwt;
use crate::error::{AuthFailure, GatewayError, MatchmakingError};
use crate::matchmaking::{Placement, SessionLocation};
use crate::presence;
use crate::state::AppState;
use crate::ws::broadcast;
use crate::ws::codec::{GatewayProtocol, InboundCommand, MatchmakingRequest, Outbound};
use crate::ws::registry::{ConnectedClient, ControlSender};
use crate::ws::ConnectionSender;

/// Per-connection state once the handshake has succeeded.
#[derive(Debug)]
pub struct Session {
    pub user_id: String,
    pub username: String,
    pub developer: bool,
    pub connection_id: Uuid,
    pub location: Option<SessionLocation>,
}

/// Encode `payload` for `protocol` and queue it on the writer.
pub fn send(tx: &ConnectionSender, protocol: GatewayProtocol, payload: &Outbound) {
    if let Some(text) = payload.encode(protocol) {
        let _ = tx.send(Message::Text(text.into()));
    }
}

/// Run the handshake for a bearer credential.
///
/// On success the connection is registered, presence is set online and the
/// acknowledgement has been queued. On failure nothing has been registered.
pub async fn authenticate(
    state: &AppState,
    protocol: GatewayProtocol,
    token: Option<String>,
    connection_id: Uuid,
    tx: &ConnectionSender,
    control: &ControlSender,
) -> Result<Session, GatewayError> {
    let token = token.ok_or(GatewayError::Authentication(AuthFailure::MissingToken))?;

    let claims = jwt::validate_access_token(&state.jwt_secret, &token).map_err(|e| {
        tracing::debug!(error = %e, "Token rejected");
        GatewayError::Authentication(AuthFailure::InvalidToken)
    })?;

    let record = state
        .players
        .pull(&claims.id)
        .await?
        .ok_or(GatewayError::Authentication(AuthFailure::InvalidToken))?;

    if let Some(ban) = record.active_ban(Utc::now().timestamp_millis()) {
        tracing::info!(
            user_id = %claims.id,
            reason = %ban.reason,
            until = ban.end_ts,
            "Banned user refused"
        );
        return Err(GatewayError::Authentication(AuthFailure::Banned));
    }

    state.connections.register(
        &claims.id,
        ConnectedClient {
            connection_id,
            sender: tx.clone(),
            control: control.clone(),
            protocol,
            developer: claims.developer,
            connected_at: Utc::now(),
        },
    )?;

    let reward = match presence::go_online(state, &claims.id).await {
        Ok(reward) => reward,
        Err(e) => {
            tracing::error!(user_id = %claims.id, error = %e, "Failed to update presence");
            None
        }
    };

    send(
        tx,
        protocol,
        &Outbound::Authorized {
            id: claims.id.clone(),
            username: record.username.clone(),
        },
    );
    if let Some(message) = reward.as_ref().and_then(presence::reward_message) {
        send(tx, protocol, &Outbound::ScreenMessage(message));
    }

    Ok(Session {
        user_id: claims.id,
        username: record.username,
        developer: claims.developer,
        connection_id,
        location: None,
    })
}

/// Dispatch a command from an authenticated connection.
pub async fn handle_command(
    state: &AppState,
    protocol: GatewayProtocol,
    session: &mut Session,
    command: InboundCommand,
    tx: &ConnectionSender,
) {
    match command {
        InboundCommand::Authenticate { .. } => {
            tracing::debug!(user_id = %session.user_id, "Ignoring repeated authentication");
        }
        InboundCommand::Matchmaking(request) => {
            handle_matchmaking(state, protocol, session, request, tx).await;
        }
        InboundCommand::Log(text) => {
            tracing::info!(target: "client", user_id = %session.user_id, "{}", text);
        }
        InboundCommand::BroadcastString(data) => {
            if !session.developer {
                tracing::debug!(user_id = %session.user_id, "Developer command ignored");
                return;
            }
            let delivered = broadcast::broadcast(&state.connections, &Outbound::Raw(data));
            tracing::info!(user_id = %session.user_id, delivered, "Forced string broadcast");
        }
        InboundCommand::SendString { user_id, data } => {
            if !session.developer {
                tracing::debug!(user_id = %session.user_id, "Developer command ignored");
                return;
            }
            let delivered = broadcast::unicast(&state.connections, &user_id, &Outbound::Raw(data));
            tracing::info!(
                user_id = %session.user_id,
                target_user = %user_id,
                delivered,
                "Forced string sent"
            );
        }
    }
}

async fn handle_matchmaking(
    state: &AppState,
    protocol: GatewayProtocol,
    session: &mut Session,
    request: MatchmakingRequest,
    tx: &ConnectionSender,
) {
    let mm = &state.matchmaker;
    let user_id = session.user_id.as_str();
    let location = &mut session.location;

    let placed: Result<Option<Placement>, MatchmakingError> = match &request {
        MatchmakingRequest::Leave => mm.leave(user_id, location).await.map(|_| None),
        MatchmakingRequest::CreatePrivate { room_id } => {
            mm.create_private(user_id, room_id, location).await.map(Some)
        }
        MatchmakingRequest::CreatePublic { room_id } => {
            mm.create_public(user_id, room_id, location).await.map(Some)
        }
        MatchmakingRequest::JoinPublic { room_id } => {
            mm.join_public(user_id, room_id, location).await.map(Some)
        }
        MatchmakingRequest::JoinSpecific {
            room_id,
            instance_id,
        } => mm
            .join_specific(user_id, room_id, instance_id, location)
            .await
            .map(Some),
        MatchmakingRequest::ListPublic { room_id } => match mm.list_public(room_id).await {
            Ok(list) => {
                send(tx, protocol, &Outbound::PublicInstanceList(list));
                return;
            }
            Err(e) => Err(e),
        },
    };

    match placed {
        Ok(Some(placement)) => {
            send(
                tx,
                protocol,
                &Outbound::JoinInstance {
                    join_code: placement.instance.join_code.clone(),
                    max_players: placement.instance.max_players,
                },
            );
        }
        Ok(None) => {}
        Err(err) => {
            if let MatchmakingError::Store(e) = &err {
                tracing::error!(
                    user_id = %session.user_id,
                    request = ?request,
                    error = %e,
                    "Matchmaking store failure"
                );
            } else {
                tracing::debug!(
                    user_id = %session.user_id,
                    request = ?request,
                    error = %err,
                    "Matchmaking request refused"
                );
            }
            send(tx, protocol, &Outbound::Exception(err.client_message()));
        }
    }
}
