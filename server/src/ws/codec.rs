//! Frame grammar for the three gateway protocols.
//!
//! LegacyText and V1Text share a whitespace-delimited text grammar and only
//! differ in how a failed handshake is closed. V2Json wraps every message in
//! a `{code, data}` envelope.

use serde::Deserialize;
use serde_json::json;

use crate::error::{AuthFailure, GatewayError};
use crate::matchmaking::InstanceSummary;

/// Policy violation, used by the legacy protocol for every refused handshake.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Invalid token or banned.
pub const CLOSE_AUTH_FAILED: u16 = 4001;
pub const CLOSE_DUPLICATE_CONNECTION: u16 = 4002;
pub const CLOSE_MISSING_TOKEN: u16 = 4003;
/// Server-side failure during the handshake.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayProtocol {
    /// `/ws`
    LegacyText,
    /// `/messaging-gateway`
    V1Text,
    /// `/ws-v2`
    V2Json,
}

impl GatewayProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LegacyText => "legacy",
            Self::V1Text => "v1",
            Self::V2Json => "v2",
        }
    }

    /// Close code sent after the reply to a refused handshake.
    pub fn close_code(&self, err: &GatewayError) -> u16 {
        match (self, err) {
            (_, GatewayError::Store(_)) | (_, GatewayError::Decode(_)) => CLOSE_INTERNAL_ERROR,
            (Self::LegacyText, _) => CLOSE_POLICY_VIOLATION,
            (_, GatewayError::Authentication(AuthFailure::MissingToken)) => CLOSE_MISSING_TOKEN,
            (_, GatewayError::Authentication(_)) => CLOSE_AUTH_FAILED,
            (_, GatewayError::DuplicateConnection) => CLOSE_DUPLICATE_CONNECTION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchmakingAction {
    Leave,
    CreatePrivate,
    CreatePublic,
    JoinPublic,
    JoinSpecific,
    ListPublic,
}

impl MatchmakingAction {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "LEAVE" => Some(Self::Leave),
            "CREATE-PRIVATE-INSTANCE" => Some(Self::CreatePrivate),
            "CREATE-PUBLIC-INSTANCE" => Some(Self::CreatePublic),
            "JOIN-PUBLIC-INSTANCE" => Some(Self::JoinPublic),
            "JOIN-SPECIFIC-INSTANCE" => Some(Self::JoinSpecific),
            "LIST-PUBLIC-INSTANCES" => Some(Self::ListPublic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCommand {
    /// `None` when the frame carried no credential.
    Authenticate { token: Option<String> },
    Matchmaking(MatchmakingRequest),
    Log(String),
    BroadcastString(String),
    SendString { user_id: String, data: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchmakingRequest {
    Leave,
    CreatePrivate { room_id: String },
    CreatePublic { room_id: String },
    JoinPublic { room_id: String },
    JoinSpecific { room_id: String, instance_id: String },
    ListPublic { room_id: String },
}

/// Server-to-client messages, encoded per protocol by [`Outbound::encode`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Authorized { id: String, username: String },
    AuthFailed(AuthFailure),
    DuplicateConnection,
    JoinInstance { join_code: String, max_players: u32 },
    SignOut,
    Exception(String),
    PublicInstanceList(Vec<InstanceSummary>),
    ScreenMessage(String),
    /// Delivered verbatim as a text frame on every protocol.
    Raw(String),
    JsonParseFailed(String),
}

impl Outbound {
    /// Render for `protocol`. `None` when the protocol has no encoding for
    /// this message.
    pub fn encode(&self, protocol: GatewayProtocol) -> Option<String> {
        if let Outbound::Raw(text) = self {
            return Some(text.clone());
        }
        match protocol {
            GatewayProtocol::LegacyText | GatewayProtocol::V1Text => self.encode_text(),
            GatewayProtocol::V2Json => self.encode_json(),
        }
    }

    fn encode_text(&self) -> Option<String> {
        let text = match self {
            Outbound::Authorized { .. } => "AUTHORIZED".to_string(),
            Outbound::AuthFailed(AuthFailure::Banned) => "BANNED".to_string(),
            Outbound::AuthFailed(_) => "UNAUTHORIZED".to_string(),
            Outbound::DuplicateConnection => "DUPLICATE CONNECTION".to_string(),
            Outbound::JoinInstance {
                join_code,
                max_players,
            } => format!("PUN_CMD CREATE-OR-JOIN-ROOM {join_code} {max_players}"),
            Outbound::SignOut => "CVR_CMD SIGN-OUT".to_string(),
            Outbound::Exception(message) => format!("EXCEPT {message}"),
            Outbound::PublicInstanceList(list) => {
                format!("PUBLIC-INSTANCE-LIST {}", serde_json::to_string(list).ok()?)
            }
            Outbound::Raw(text) => text.clone(),
            Outbound::ScreenMessage(_) | Outbound::JsonParseFailed(_) => return None,
        };
        Some(text)
    }

    fn encode_json(&self) -> Option<String> {
        let (code, data) = match self {
            Outbound::Authorized { id, username } => {
                ("authenticated", json!({ "id": id, "username": username }))
            }
            Outbound::AuthFailed(reason) => {
                ("authentication_failed", json!({ "reason": reason.as_str() }))
            }
            Outbound::DuplicateConnection => (
                "connection_declined",
                json!({ "reason": "duplicate_connection" }),
            ),
            Outbound::Exception(text) => ("throw_exception", json!({ "text": text })),
            Outbound::ScreenMessage(message) => {
                ("show_screen_message", json!({ "message": message }))
            }
            Outbound::JsonParseFailed(message) => {
                ("json_parse_failed", json!({ "message": message }))
            }
            Outbound::Raw(text) => return Some(text.clone()),
            Outbound::JoinInstance { .. }
            | Outbound::SignOut
            | Outbound::PublicInstanceList(_) => return None,
        };
        Some(json!({ "code": code, "data": data }).to_string())
    }
}

/// Decode a text frame.
///
/// `Ok(None)` means the frame is not a command and is ignored. Only V2Json
/// reports an error, for frames that are not a valid envelope.
pub fn decode(protocol: GatewayProtocol, frame: &str) -> Result<Option<InboundCommand>, GatewayError> {
    match protocol {
        GatewayProtocol::LegacyText | GatewayProtocol::V1Text => Ok(decode_text(frame)),
        GatewayProtocol::V2Json => decode_json(frame),
    }
}

/// Split off the first whitespace-delimited token; the rest is left-trimmed.
fn next_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn decode_text(frame: &str) -> Option<InboundCommand> {
    let frame = frame.trim_end_matches(['\r', '\n']);
    let (keyword, rest) = next_token(frame);

    match keyword {
        "Bearer" => {
            let (token, _) = next_token(rest);
            Some(InboundCommand::Authenticate {
                token: (!token.is_empty()).then(|| token.to_string()),
            })
        }
        "MM_CMD" => decode_mm_command(rest).map(InboundCommand::Matchmaking),
        "LOG" => Some(InboundCommand::Log(rest.to_string())),
        "BROADCAST_STRING" => Some(InboundCommand::BroadcastString(rest.to_string())),
        "SEND_STRING" => {
            let (user_id, data) = next_token(rest);
            if user_id.is_empty() {
                return None;
            }
            Some(InboundCommand::SendString {
                user_id: user_id.to_string(),
                data: data.to_string(),
            })
        }
        _ => None,
    }
}

fn decode_mm_command(args: &str) -> Option<MatchmakingRequest> {
    let mut tokens = args.split_whitespace();
    let action = MatchmakingAction::parse(tokens.next()?)?;
    if action == MatchmakingAction::Leave {
        return Some(MatchmakingRequest::Leave);
    }

    let room_id = tokens.next()?.to_string();
    let request = match action {
        MatchmakingAction::CreatePrivate => MatchmakingRequest::CreatePrivate { room_id },
        MatchmakingAction::CreatePublic => MatchmakingRequest::CreatePublic { room_id },
        MatchmakingAction::JoinPublic => MatchmakingRequest::JoinPublic { room_id },
        MatchmakingAction::ListPublic => MatchmakingRequest::ListPublic { room_id },
        MatchmakingAction::JoinSpecific => MatchmakingRequest::JoinSpecific {
            room_id,
            instance_id: tokens.next()?.to_string(),
        },
        MatchmakingAction::Leave => MatchmakingRequest::Leave,
    };
    Some(request)
}

#[derive(Deserialize)]
struct Envelope {
    code: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct AuthenticatePayload {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Deserialize)]
struct EmitPayload {
    data: String,
}

#[derive(Deserialize)]
struct SendPayload {
    id: String,
    data: String,
}

fn decode_json(frame: &str) -> Result<Option<InboundCommand>, GatewayError> {
    let envelope: Envelope =
        serde_json::from_str(frame).map_err(|e| GatewayError::Decode(e.to_string()))?;

    let payload_error = |e: serde_json::Error| GatewayError::Decode(e.to_string());

    let command = match envelope.code.as_str() {
        "authenticate" => {
            let payload: AuthenticatePayload = if envelope.data.is_null() {
                AuthenticatePayload { token: None }
            } else {
                serde_json::from_value(envelope.data).map_err(payload_error)?
            };
            InboundCommand::Authenticate {
                token: payload.token.filter(|t| !t.is_empty()),
            }
        }
        "dev_force_emit_string" => {
            let payload: EmitPayload =
                serde_json::from_value(envelope.data).map_err(payload_error)?;
            InboundCommand::BroadcastString(payload.data)
        }
        "dev_force_send_string" => {
            let payload: SendPayload =
                serde_json::from_value(envelope.data).map_err(payload_error)?;
            InboundCommand::SendString {
                user_id: payload.id,
                data: payload.data,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(command))
}
