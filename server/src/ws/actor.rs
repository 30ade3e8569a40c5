use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::presence;
use crate::state::AppState;
use crate::ws::codec::{self, GatewayProtocol, InboundCommand, Outbound};
use crate::ws::protocol::{self as dispatch, Session};
use crate::ws::registry::ConnectionControl;
use crate::ws::ConnectionSender;

/// Close code sent when the peer stops answering pings.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Server-driven keep-alive timing.
#[derive(Debug, Clone, Copy)]
pub struct KeepAlive {
    /// Time between WebSocket pings.
    pub ping_interval: Duration,
    /// How long a ping may go unanswered before the connection is dropped.
    pub pong_timeout: Duration,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Client closed or the stream ended.
    GracefulClose,
    /// Server ended the connection (refused handshake, kick, ban, missed
    /// pong). A refused handshake never registered, so it leaves the user's
    /// presence and any existing session alone.
    ForcedDisconnect(String),
}

enum ConnectionState {
    Unauthenticated,
    Authenticated(Session),
}

/// Run one gateway connection from upgrade to cleanup.
///
/// The socket is split: a writer task owns the sink and drains an mpsc
/// channel that the registry hands out to other parts of the system, while
/// this task reads frames and dispatches them in order.
pub async fn run_connection(socket: WebSocket, state: AppState, protocol: GatewayProtocol) {
    let connection_id = Uuid::now_v7();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<ConnectionControl>();

    tracing::debug!(
        connection_id = %connection_id,
        protocol = protocol.as_str(),
        "Gateway connection opened"
    );

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_tx = tx.clone();
    let timeout_tx = control_tx.clone();
    let keepalive = state.keepalive;
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(keepalive.ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                break;
            }

            match timeout(keepalive.pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(connection_id = %connection_id, "Pong timeout, closing connection");
                    // A silent peer never yields a frame; end the reader here.
                    let _ = timeout_tx.send(ConnectionControl::ForceClose {
                        code: CLOSE_GOING_AWAY,
                        reason: "pong_timeout".to_string(),
                    });
                    break;
                }
            }
        }
    });

    let mut conn_state = ConnectionState::Unauthenticated;

    let outcome = loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            Some(ConnectionControl::ForceClose { code, reason }) = control_rx.recv() => {
                let _ = tx.send(close_frame(code, &reason));
                break ConnectionOutcome::ForcedDisconnect(reason);
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                let command = match codec::decode(protocol, text.as_str()) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(GatewayError::Decode(message)) => {
                        dispatch::send(&tx, protocol, &Outbound::JsonParseFailed(message));
                        continue;
                    }
                    Err(_) => continue,
                };

                match conn_state {
                    ConnectionState::Authenticated(ref mut session) => {
                        dispatch::handle_command(&state, protocol, session, command, &tx).await;
                    }
                    ConnectionState::Unauthenticated => {
                        let InboundCommand::Authenticate { token } = command else {
                            tracing::debug!(
                                connection_id = %connection_id,
                                "Command before authentication ignored"
                            );
                            continue;
                        };

                        match dispatch::authenticate(
                            &state,
                            protocol,
                            token,
                            connection_id,
                            &tx,
                            &control_tx,
                        )
                        .await
                        {
                            Ok(session) => {
                                tracing::info!(
                                    user_id = %session.user_id,
                                    username = %session.username,
                                    protocol = protocol.as_str(),
                                    "Gateway session authenticated"
                                );
                                state
                                    .audit
                                    .record(format!("User {} connected", session.user_id))
                                    .await;
                                conn_state = ConnectionState::Authenticated(session);
                            }
                            Err(err) => {
                                let reason = refuse_handshake(&tx, protocol, &err);
                                break ConnectionOutcome::ForcedDisconnect(reason);
                            }
                        }
                    }
                }
            }
            Some(Ok(Message::Binary(_))) => {
                tracing::debug!(connection_id = %connection_id, "Binary frame ignored");
            }
            Some(Ok(Message::Pong(_))) => {
                let _ = pong_tx.send(());
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = tx.send(Message::Pong(data));
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(connection_id = %connection_id, reason = ?frame, "Client initiated close");
                break ConnectionOutcome::GracefulClose;
            }
            Some(Err(e)) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                break ConnectionOutcome::GracefulClose;
            }
            None => break ConnectionOutcome::GracefulClose,
        }
    };

    ping_handle.abort();

    if let ConnectionState::Authenticated(session) = conn_state {
        finish_session(&state, session, &outcome).await;
    }

    // Let queued replies and the close frame drain before the sink is dropped.
    drop(tx);
    drop(control_tx);
    let mut writer_handle = writer_handle;
    if timeout(Duration::from_secs(5), &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    tracing::debug!(
        connection_id = %connection_id,
        outcome = ?outcome,
        "Gateway connection closed"
    );
}

/// Reply to a refused handshake and queue the close frame. Returns the reason.
fn refuse_handshake(tx: &ConnectionSender, protocol: GatewayProtocol, err: &GatewayError) -> String {
    let reply = match err {
        GatewayError::Authentication(failure) => Outbound::AuthFailed(*failure),
        GatewayError::DuplicateConnection => Outbound::DuplicateConnection,
        GatewayError::Store(e) => {
            tracing::error!(error = %e, "Store failure during handshake");
            Outbound::Exception("An internal error occurred while signing in.".to_string())
        }
        GatewayError::Decode(m) => Outbound::JsonParseFailed(m.clone()),
    };
    dispatch::send(tx, protocol, &reply);

    let reason = match err {
        GatewayError::Authentication(failure) => failure.as_str().to_string(),
        GatewayError::DuplicateConnection => "duplicate_connection".to_string(),
        _ => "internal_error".to_string(),
    };
    tracing::info!(
        protocol = protocol.as_str(),
        reason = %reason,
        "Gateway handshake refused"
    );
    let _ = tx.send(close_frame(protocol.close_code(err), &reason));
    reason
}

/// Release everything an authenticated session holds.
async fn finish_session(state: &AppState, mut session: Session, outcome: &ConnectionOutcome) {
    if let Err(e) = state
        .matchmaker
        .release(&session.user_id, &mut session.location)
        .await
    {
        tracing::error!(user_id = %session.user_id, error = %e, "Failed to release instance on disconnect");
    }

    if let Err(e) = presence::go_offline(state, &session.user_id).await {
        tracing::error!(user_id = %session.user_id, error = %e, "Failed to update presence");
    }

    state
        .connections
        .unregister(&session.user_id, session.connection_id);

    let message = match outcome {
        ConnectionOutcome::GracefulClose => format!("User {} disconnected", session.user_id),
        ConnectionOutcome::ForcedDisconnect(reason) => {
            format!("User {} disconnected by server ({reason})", session.user_id)
        }
    };
    state.audit.record(message).await;
}

fn close_frame(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}
