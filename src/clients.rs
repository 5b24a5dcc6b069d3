use dashmap::DashMap;

use crate::protocol::{Message, MessageWriter};

/// Registry of authenticated player connections, keyed by player id.
///
/// Room broadcasts (`ROOM_UPDATE`, `GAME_STARTED`) look members up here;
/// players without an open session are simply skipped. A relogin replaces
/// the previous writer, so deregistration only removes the entry when it
/// still belongs to the departing connection.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<i64, MessageWriter>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, player_id: i64, writer: MessageWriter) {
        self.clients.insert(player_id, writer);
    }

    pub fn deregister(&self, player_id: i64, writer: &MessageWriter) {
        self.clients
            .remove_if(&player_id, |_, registered| registered.same_writer(writer));
    }

    /// Send to one player if connected. Write failures are logged and
    /// swallowed; a broken session is torn down by its own read loop.
    pub async fn notify(&self, player_id: i64, message: &Message) {
        let writer = self.clients.get(&player_id).map(|entry| entry.value().clone());
        if let Some(writer) = writer {
            if let Err(e) = writer.send(message).await {
                tracing::warn!(
                    player_id,
                    msg_type = message.msg_type.name(),
                    error = %e,
                    "Failed to deliver notification"
                );
            }
        }
    }

    /// Send to every listed player that currently has an open session.
    pub async fn notify_all(&self, player_ids: &[i64], message: &Message) {
        for &player_id in player_ids {
            self.notify(player_id, message).await;
        }
    }
}
