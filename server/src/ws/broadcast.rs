use axum::extract::ws::Message;

use super::codec::Outbound;
use super::registry::{ConnectedClient, ConnectionControl, ConnectionRegistry};

fn deliver(client: &ConnectedClient, payload: &Outbound) -> bool {
    match payload.encode(client.protocol) {
        Some(text) => client.sender.send(Message::Text(text.into())).is_ok(),
        None => false,
    }
}

/// Send to one user in their own protocol. No-op if they are not connected.
pub fn unicast(registry: &ConnectionRegistry, user_id: &str, payload: &Outbound) -> bool {
    match registry.lookup(user_id) {
        Some(client) => deliver(&client, payload),
        None => false,
    }
}

/// Send to every connected user, each in their own protocol. Returns how
/// many sockets accepted the message.
pub fn broadcast(registry: &ConnectionRegistry, payload: &Outbound) -> usize {
    registry
        .list_all()
        .iter()
        .filter(|(_, client)| deliver(client, payload))
        .count()
}

/// Disconnect a user (kick). Text clients are told to sign out first.
pub fn force_close(registry: &ConnectionRegistry, user_id: &str, code: u16, reason: &str) -> bool {
    let Some(client) = registry.lookup(user_id) else {
        return false;
    };
    deliver(&client, &Outbound::SignOut);
    client
        .control
        .send(ConnectionControl::ForceClose {
            code,
            reason: reason.to_string(),
        })
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::codec::GatewayProtocol;
    use chrono::Utc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn connect(
        registry: &ConnectionRegistry,
        user_id: &str,
        protocol: GatewayProtocol,
    ) -> (
        mpsc::UnboundedReceiver<Message>,
        mpsc::UnboundedReceiver<ConnectionControl>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (control, control_rx) = mpsc::unbounded_channel();
        registry
            .register(
                user_id,
                ConnectedClient {
                    connection_id: Uuid::now_v7(),
                    sender: tx,
                    control,
                    protocol,
                    developer: false,
                    connected_at: Utc::now(),
                },
            )
            .unwrap();
        (rx, control_rx)
    }

    fn text(msg: Message) -> String {
        match msg {
            Message::Text(t) => t.as_str().to_string(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_unicast_encodes_for_recipient() {
        let registry = ConnectionRegistry::new();
        let (mut legacy, _c1) = connect(&registry, "a", GatewayProtocol::LegacyText);
        let (mut v2, _c2) = connect(&registry, "b", GatewayProtocol::V2Json);

        let msg = Outbound::Exception("boom".into());
        assert!(unicast(&registry, "a", &msg));
        assert!(unicast(&registry, "b", &msg));
        assert!(!unicast(&registry, "nobody", &msg));

        assert_eq!(text(legacy.try_recv().unwrap()), "EXCEPT boom");
        let json: serde_json::Value = serde_json::from_str(&text(v2.try_recv().unwrap())).unwrap();
        assert_eq!(json["code"], "throw_exception");
        assert_eq!(json["data"]["text"], "boom");
    }

    #[test]
    fn test_broadcast_raw_reaches_everyone() {
        let registry = ConnectionRegistry::new();
        let (mut a, _c1) = connect(&registry, "a", GatewayProtocol::V1Text);
        let (mut b, _c2) = connect(&registry, "b", GatewayProtocol::V2Json);

        assert_eq!(broadcast(&registry, &Outbound::Raw("hello".into())), 2);
        assert_eq!(text(a.try_recv().unwrap()), "hello");
        assert_eq!(text(b.try_recv().unwrap()), "hello");
    }

    #[test]
    fn test_force_close_signals_actor() {
        let registry = ConnectionRegistry::new();
        let (mut out, mut control) = connect(&registry, "a", GatewayProtocol::V1Text);

        assert!(force_close(&registry, "a", 4004, "kicked"));
        assert_eq!(text(out.try_recv().unwrap()), "CVR_CMD SIGN-OUT");
        assert!(matches!(
            control.try_recv().unwrap(),
            ConnectionControl::ForceClose { code: 4004, .. }
        ));
    }
}
