use crate::error::TransportError;
use crate::sender::ResilientSender;
use crate::traits::{ChatTransport, ContactHandle, Destination, RoomHandle};
use crate::types::{ChatMessage, ContactId, RoomId, RoomMembership};
use dashmap::DashMap;
use std::sync::Arc;

/// Lazily creates, joins, and caches per-room and per-contact session
/// handles. Entries live for the process lifetime; state is mutated only by
/// resolve calls (no background repair).
pub struct DestinationRegistry {
    transport: Arc<dyn ChatTransport>,
    nickname: String,
    configured_rooms: Vec<RoomId>,
    rooms: DashMap<RoomId, Arc<dyn RoomHandle>>,
    membership: DashMap<RoomId, RoomMembership>,
    contacts: DashMap<ContactId, Arc<dyn ContactHandle>>,
}

impl DestinationRegistry {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        nickname: impl Into<String>,
        configured_rooms: Vec<RoomId>,
    ) -> Self {
        let membership = DashMap::new();
        for room_id in &configured_rooms {
            membership.insert(room_id.clone(), RoomMembership::NotJoined);
        }
        Self {
            transport,
            nickname: nickname.into(),
            configured_rooms,
            rooms: DashMap::new(),
            membership,
            contacts: DashMap::new(),
        }
    }

    pub fn configured_rooms(&self) -> &[RoomId] {
        &self.configured_rooms
    }

    pub fn membership(&self, room_id: &RoomId) -> RoomMembership {
        self.membership
            .get(room_id)
            .map(|entry| *entry.value())
            .unwrap_or(RoomMembership::NotJoined)
    }

    /// Resolve a room handle, creating it on first use and joining it when
    /// it is not currently joined. A join failure is logged and swallowed:
    /// the handle comes back unjoined and the subsequent send fails fast
    /// through the non-retry path.
    pub async fn resolve_room(
        &self,
        room_id: &RoomId,
    ) -> Result<Arc<dyn RoomHandle>, TransportError> {
        let handle = match self.rooms.get(room_id) {
            Some(entry) => entry.value().clone(),
            None => {
                let created = self.transport.resolve_room(room_id).await?;
                // A racing resolve may have inserted first; keep whichever
                // handle won and drop the other.
                self.rooms
                    .entry(room_id.clone())
                    .or_insert(created)
                    .value()
                    .clone()
            }
        };

        if handle.is_joined().await {
            self.membership.insert(room_id.clone(), RoomMembership::Joined);
        } else {
            self.membership
                .insert(room_id.clone(), RoomMembership::Joining);
            tracing::info!(room = %room_id, "joining room");
            match handle.join(&self.nickname).await {
                Ok(()) => {
                    self.membership.insert(room_id.clone(), RoomMembership::Joined);
                }
                Err(e) => {
                    tracing::warn!(room = %room_id, error = %e, "could not join room");
                    self.membership
                        .insert(room_id.clone(), RoomMembership::NotJoined);
                }
            }
        }
        Ok(handle)
    }

    /// Resolve a one-to-one chat handle, creating it on first use.
    pub async fn resolve_contact(
        &self,
        contact_id: &ContactId,
    ) -> Result<Arc<dyn ContactHandle>, TransportError> {
        if let Some(entry) = self.contacts.get(contact_id) {
            return Ok(entry.value().clone());
        }
        let created = self.transport.resolve_contact(contact_id).await?;
        Ok(self
            .contacts
            .entry(contact_id.clone())
            .or_insert(created)
            .value()
            .clone())
    }

    /// Join every configured room, typically once at startup. Per-room
    /// failures are logged and do not stop the sweep.
    pub async fn join_configured(&self) {
        for room_id in &self.configured_rooms {
            if let Err(e) = self.resolve_room(room_id).await {
                tracing::warn!(room = %room_id, error = %e, "could not join room");
            }
        }
    }

    /// Deliver one message to every configured room, resolving and joining
    /// lazily. Returns how many rooms the message reached.
    pub async fn broadcast(&self, sender: &ResilientSender, message: &ChatMessage) -> usize {
        tracing::info!(
            body = %message.body,
            rooms = self.configured_rooms.len(),
            "delivering message to all configured rooms"
        );
        let mut delivered = 0;
        for room_id in &self.configured_rooms {
            match self.resolve_room(room_id).await {
                Ok(handle) => {
                    if sender.send(&Destination::Room(handle), message).await {
                        delivered += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(room = %room_id, error = %e, "could not deliver message");
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::DestinationRegistry;
    use crate::loopback::LoopbackTransport;
    use crate::sender::ResilientSender;
    use crate::session::{ChatSessionManager, SessionConfig};
    use crate::types::{ChatMessage, ContactId, RoomId, RoomMembership};
    use std::sync::Arc;

    fn registry_with(rooms: &[&str]) -> (Arc<LoopbackTransport>, DestinationRegistry) {
        let transport = Arc::new(LoopbackTransport::new());
        transport.set_connected(true);
        let registry = DestinationRegistry::new(
            transport.clone(),
            "Jabberwock",
            rooms.iter().map(|id| RoomId::from(*id)).collect(),
        );
        (transport, registry)
    }

    #[tokio::test]
    async fn resolve_room_joins_once_and_caches_the_handle() {
        let (transport, registry) = registry_with(&["ops"]);
        let room_id = RoomId::from("ops");

        let first = registry.resolve_room(&room_id).await.unwrap();
        let second = registry.resolve_room(&room_id).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(transport.room_join_calls(&room_id), 1);
        assert_eq!(registry.membership(&room_id), RoomMembership::Joined);
    }

    #[tokio::test]
    async fn join_failure_is_swallowed_and_leaves_room_unjoined() {
        let (transport, registry) = registry_with(&["ops"]);
        let room_id = RoomId::from("ops");
        transport.fail_next_joins(1);

        let handle = registry.resolve_room(&room_id).await.unwrap();
        assert!(!handle.is_joined().await);
        assert_eq!(registry.membership(&room_id), RoomMembership::NotJoined);

        // The next resolve retries the join and recovers.
        let handle = registry.resolve_room(&room_id).await.unwrap();
        assert!(handle.is_joined().await);
        assert_eq!(registry.membership(&room_id), RoomMembership::Joined);
    }

    #[tokio::test]
    async fn resolve_contact_caches_the_created_chat() {
        let (transport, registry) = registry_with(&[]);
        let contact_id = ContactId::from("alice@chat.example.com");

        let first = registry.resolve_contact(&contact_id).await.unwrap();
        let second = registry.resolve_contact(&contact_id).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(transport.contact_resolve_calls(), 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_configured_room() {
        let (transport, registry) = registry_with(&["ops", "dev"]);
        let session = Arc::new(ChatSessionManager::new(
            transport.clone(),
            SessionConfig {
                host: "chat.example.com".to_string(),
                port: 5222,
                user: "bot@chat.example.com".to_string(),
                nickname: "Jabberwock".to_string(),
                conference_domain: "conf.chat.example.com".to_string(),
            },
        ));
        let sender = ResilientSender::new(session);

        let delivered = registry
            .broadcast(&sender, &ChatMessage::plain("deploy finished"))
            .await;

        assert_eq!(delivered, 2);
        let destinations: Vec<String> = transport
            .sent()
            .into_iter()
            .map(|record| record.destination)
            .collect();
        assert_eq!(destinations, vec!["room:ops", "room:dev"]);
    }
}
