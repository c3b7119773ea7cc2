//! Message routing: lifecycle gate, dedup persistence, role-based fan-out
//!
//! Every chat message takes the same path: reject it if the chat is
//! terminated, persist exactly one copy per `message_id`, resolve the
//! recipient set from the sender's role, then deliver best-effort to every
//! resolved connection. Duplicate deliveries from client retries are
//! absorbed by the store's uniqueness key, which makes `route` safe under
//! at-least-once transports.

use std::collections::HashSet;
use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use livedesk_shared::{ChatMessage, MediaItem, Role, TerminatedBy};

use crate::store::ChatStore;

use super::connection::Connection;
use super::events::ServerEvent;
use super::presence;
use super::state::ChatState;

/// A message accepted from the wire, before the server stamps it
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_role: Role,
    pub text: String,
    pub media: Vec<MediaItem>,
}

/// What `route` did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Fanned out to `recipients` live connections. `persisted` is false
    /// when the store could not take the row and delivery was live-only.
    Delivered { recipients: usize, persisted: bool },
    /// A message with this id was already persisted; nothing was re-broadcast
    Duplicate,
    /// The chat is terminated; nothing was persisted or forwarded
    Terminated(TerminatedBy),
}

/// Route one inbound message: gate, persist, fan out.
pub async fn route(
    chat: &ChatState,
    store: &dyn ChatStore,
    sender_connection_id: Uuid,
    inbound: InboundMessage,
) -> RouteOutcome {
    // Terminated chats accept nothing
    if let Some(by) = chat.lifecycle.termination(store, &inbound.chat_id).await {
        tracing::debug!(
            chat_id = %inbound.chat_id,
            message_id = %inbound.message_id,
            "Message rejected: chat terminated"
        );
        return RouteOutcome::Terminated(by);
    }

    let message = ChatMessage {
        message_id: inbound.message_id.clone(),
        chat_id: inbound.chat_id.clone(),
        sender_id: inbound.sender_id.clone(),
        sender_role: inbound.sender_role,
        text: inbound.text.clone(),
        sent_at: OffsetDateTime::now_utc(),
    };

    // The uniqueness key lives in the store, so concurrent duplicates race
    // safely: exactly one insert wins
    let persisted = match store.insert_message_if_absent(&message).await {
        Ok(true) => true,
        Ok(false) => {
            // Harmless retry. Media inserts are individually idempotent, so
            // run them again in case the first delivery lost them mid-way.
            persist_media(store, &message.message_id, &inbound.media).await;
            tracing::debug!(message_id = %message.message_id, "Duplicate message absorbed");
            return RouteOutcome::Duplicate;
        }
        Err(err) => {
            // Availability over durability: the message still goes out live,
            // flagged as not-yet-durable
            tracing::error!(
                message_id = %message.message_id,
                error = %err,
                "Message not persisted; broadcasting live only"
            );
            false
        }
    };

    if persisted {
        persist_media(store, &message.message_id, &inbound.media).await;
    }

    let recipients = resolve_recipients(
        chat,
        &inbound.chat_id,
        inbound.sender_role,
        sender_connection_id,
    )
    .await;

    let event = ServerEvent::ReceiveMessage {
        message_id: message.message_id.clone(),
        chat_id: message.chat_id.clone(),
        sender_id: message.sender_id.clone(),
        sender_role: message.sender_role,
        text: message.text.clone(),
        timestamp: message.sent_at,
        delivered: persisted,
        media: inbound.media.clone(),
    };

    // Fire-and-forget: one closed connection must not hold up the rest
    let mut sent = 0;
    let mut failed = 0;
    for conn in &recipients {
        match conn.send(event.clone()) {
            Ok(()) => sent += 1,
            Err(_) => failed += 1,
        }
    }
    if failed > 0 {
        tracing::warn!(
            chat_id = %message.chat_id,
            failed,
            "Some recipients were unreachable during fan-out"
        );
    }

    if let Err(err) = store.touch_session(&message.chat_id).await {
        tracing::warn!(
            chat_id = %message.chat_id,
            error = %err,
            "Failed to bump session activity"
        );
    }

    // Customer traffic moves the admin-side unread counters
    if inbound.sender_role == Role::Customer {
        presence::broadcast_customer_list(chat, store).await;
    }

    RouteOutcome::Delivered {
        recipients: sent,
        persisted,
    }
}

async fn persist_media(store: &dyn ChatStore, message_id: &str, media: &[MediaItem]) {
    if media.is_empty() {
        return;
    }
    if let Err(err) = store.insert_media(message_id, media).await {
        tracing::error!(
            message_id = %message_id,
            error = %err,
            "Failed to persist media attachments"
        );
    }
}

/// Resolve the fan-out set for a message, deduplicated by connection.
///
/// Customers reach their own chat room (echo and other devices) plus every
/// registered admin. Admins reach the target customer's connections plus
/// the other admins watching the same room; the sending connection itself
/// is never in the set.
async fn resolve_recipients(
    chat: &ChatState,
    chat_id: &str,
    sender_role: Role,
    sender_connection_id: Uuid,
) -> Vec<Arc<Connection>> {
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut recipients: Vec<Arc<Connection>> = Vec::new();

    match sender_role {
        Role::Customer => {
            for conn in chat.rooms.members(chat_id).await {
                if seen.insert(conn.connection_id) {
                    recipients.push(conn);
                }
            }
            for admin in chat.participants_by_role(Role::Admin).await {
                if seen.insert(admin.conn.connection_id) {
                    recipients.push(Arc::clone(&admin.conn));
                }
            }
        }
        Role::Admin => {
            for conn in chat.resolve(chat_id).await {
                if seen.insert(conn.connection_id) {
                    recipients.push(conn);
                }
            }

            let room_members: HashSet<Uuid> = chat
                .rooms
                .members(chat_id)
                .await
                .iter()
                .map(|c| c.connection_id)
                .collect();
            for admin in chat.participants_by_role(Role::Admin).await {
                let connection_id = admin.conn.connection_id;
                if connection_id == sender_connection_id || !room_members.contains(&connection_id)
                {
                    continue;
                }
                if seen.insert(connection_id) {
                    recipients.push(Arc::clone(&admin.conn));
                }
            }
        }
    }

    recipients
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::error::TryRecvError;

    use livedesk_shared::MediaType;

    use crate::store::{ChatStore, MemoryStore};

    use super::*;

    fn connection() -> (Arc<Connection>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Connection::new(tx)), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn customer_message(message_id: &str, chat_id: &str) -> InboundMessage {
        InboundMessage {
            message_id: message_id.to_string(),
            chat_id: chat_id.to_string(),
            sender_id: chat_id.to_string(),
            sender_role: Role::Customer,
            text: "hi".to_string(),
            media: Vec::new(),
        }
    }

    fn admin_message(message_id: &str, chat_id: &str) -> InboundMessage {
        InboundMessage {
            message_id: message_id.to_string(),
            chat_id: chat_id.to_string(),
            sender_id: "agent-1".to_string(),
            sender_role: Role::Admin,
            text: "hello, how can I help?".to_string(),
            media: Vec::new(),
        }
    }

    fn media_item(url: &str) -> MediaItem {
        MediaItem {
            file_name: "a.png".to_string(),
            file_url: url.to_string(),
            media_type: MediaType::Image,
            file_size: Some(42),
            mime_type: Some("image/png".to_string()),
        }
    }

    #[tokio::test]
    async fn test_route_is_idempotent() {
        let chat = ChatState::new();
        let store = MemoryStore::new();
        let (customer, mut customer_rx) = connection();

        chat.register(Arc::clone(&customer), Role::Customer, "cust-1", "Ada")
            .await;
        chat.rooms.join("cust-1", Arc::clone(&customer)).await;

        let outcome = route(
            &chat,
            &store,
            customer.connection_id,
            customer_message("m1", "cust-1"),
        )
        .await;
        assert_eq!(
            outcome,
            RouteOutcome::Delivered {
                recipients: 1,
                persisted: true
            }
        );
        assert!(matches!(
            customer_rx.try_recv(),
            Ok(ServerEvent::ReceiveMessage { .. })
        ));

        // The retry persists nothing new and broadcasts nothing at all
        let outcome = route(
            &chat,
            &store,
            customer.connection_id,
            customer_message("m1", "cust-1"),
        )
        .await;
        assert_eq!(outcome, RouteOutcome::Duplicate);
        assert_eq!(store.message_count(), 1);
        assert!(matches!(customer_rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_terminated_chat_rejects_messages() {
        let chat = ChatState::new();
        let store = MemoryStore::new();
        chat.lifecycle
            .terminate(&store, "cust-1", TerminatedBy::Support)
            .await;

        let outcome = route(
            &chat,
            &store,
            Uuid::new_v4(),
            customer_message("m1", "cust-1"),
        )
        .await;
        assert_eq!(outcome, RouteOutcome::Terminated(TerminatedBy::Support));
        assert_eq!(store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_customer_message_reaches_every_admin_tab() {
        let chat = ChatState::new();
        let store = MemoryStore::new();
        let (customer, mut customer_rx) = connection();
        let (admin_tab1, mut admin_rx1) = connection();
        let (admin_tab2, mut admin_rx2) = connection();

        chat.register(Arc::clone(&customer), Role::Customer, "cust-1", "Ada")
            .await;
        chat.rooms.join("cust-1", Arc::clone(&customer)).await;
        chat.register(Arc::clone(&admin_tab1), Role::Admin, "agent-1", "Sam")
            .await;
        chat.register(Arc::clone(&admin_tab2), Role::Admin, "agent-1", "Sam")
            .await;

        let outcome = route(
            &chat,
            &store,
            customer.connection_id,
            customer_message("m1", "cust-1"),
        )
        .await;
        assert_eq!(
            outcome,
            RouteOutcome::Delivered {
                recipients: 3,
                persisted: true
            }
        );

        // Echo to the sender, and both tabs of the same agent
        assert!(matches!(
            customer_rx.try_recv(),
            Ok(ServerEvent::ReceiveMessage { .. })
        ));
        assert!(matches!(
            admin_rx1.try_recv(),
            Ok(ServerEvent::ReceiveMessage { .. })
        ));
        assert!(matches!(
            admin_rx2.try_recv(),
            Ok(ServerEvent::ReceiveMessage { .. })
        ));
    }

    #[tokio::test]
    async fn test_admin_reply_routing() {
        let chat = ChatState::new();
        let store = MemoryStore::new();
        let (customer_tab1, mut customer_rx1) = connection();
        let (customer_tab2, mut customer_rx2) = connection();
        let (sender, mut sender_rx) = connection();
        let (watcher, mut watcher_rx) = connection();
        let (elsewhere, mut elsewhere_rx) = connection();

        // Customer on two devices, both in their room
        for conn in [&customer_tab1, &customer_tab2] {
            chat.register(Arc::clone(conn), Role::Customer, "cust-1", "Ada")
                .await;
            chat.rooms.join("cust-1", Arc::clone(conn)).await;
        }
        // Two agents watching this chat, a third working another chat
        chat.register(Arc::clone(&sender), Role::Admin, "agent-1", "Sam")
            .await;
        chat.rooms.join("cust-1", Arc::clone(&sender)).await;
        chat.register(Arc::clone(&watcher), Role::Admin, "agent-2", "Kim")
            .await;
        chat.rooms.join("cust-1", Arc::clone(&watcher)).await;
        chat.register(Arc::clone(&elsewhere), Role::Admin, "agent-3", "Lee")
            .await;
        chat.rooms.join("cust-9", Arc::clone(&elsewhere)).await;

        let outcome = route(
            &chat,
            &store,
            sender.connection_id,
            admin_message("m1", "cust-1"),
        )
        .await;
        assert_eq!(
            outcome,
            RouteOutcome::Delivered {
                recipients: 3,
                persisted: true
            }
        );

        // Both customer devices and the co-watching agent hear the reply
        assert!(matches!(
            customer_rx1.try_recv(),
            Ok(ServerEvent::ReceiveMessage { .. })
        ));
        assert!(matches!(
            customer_rx2.try_recv(),
            Ok(ServerEvent::ReceiveMessage { .. })
        ));
        assert!(matches!(
            watcher_rx.try_recv(),
            Ok(ServerEvent::ReceiveMessage { .. })
        ));
        // Not the sender, not agents on other chats
        assert!(matches!(sender_rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(elsewhere_rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_store_outage_degrades_to_live_delivery() {
        let chat = ChatState::new();
        let store = MemoryStore::new();
        let (customer, mut customer_rx) = connection();

        chat.register(Arc::clone(&customer), Role::Customer, "cust-1", "Ada")
            .await;
        chat.rooms.join("cust-1", Arc::clone(&customer)).await;
        store.set_unavailable(true);

        let outcome = route(
            &chat,
            &store,
            customer.connection_id,
            customer_message("m1", "cust-1"),
        )
        .await;
        assert_eq!(
            outcome,
            RouteOutcome::Delivered {
                recipients: 1,
                persisted: false
            }
        );
        assert_eq!(store.message_count(), 0);

        // Live delivery happens anyway, flagged as not-yet-durable
        match customer_rx.try_recv() {
            Ok(ServerEvent::ReceiveMessage { delivered, .. }) => assert!(!delivered),
            other => panic!("Expected ReceiveMessage, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_media_lands_even_on_duplicate_delivery() {
        let chat = ChatState::new();
        let store = MemoryStore::new();

        // The message row landed on a previous delivery, but its media never
        // did (partial failure)
        let mut inbound = customer_message("m1", "cust-1");
        inbound.media = vec![media_item("https://cdn.example.com/a.png")];
        let first_copy = ChatMessage {
            message_id: inbound.message_id.clone(),
            chat_id: inbound.chat_id.clone(),
            sender_id: inbound.sender_id.clone(),
            sender_role: inbound.sender_role,
            text: inbound.text.clone(),
            sent_at: OffsetDateTime::now_utc(),
        };
        store.insert_message_if_absent(&first_copy).await.unwrap();

        let outcome = route(&chat, &store, Uuid::new_v4(), inbound).await;
        assert_eq!(outcome, RouteOutcome::Duplicate);
        assert_eq!(store.message_count(), 1);
        assert_eq!(store.media_count(), 1);
    }

    #[tokio::test]
    async fn test_customer_message_refreshes_admin_roster() {
        let chat = ChatState::new();
        let store = MemoryStore::new();
        let (customer, _customer_rx) = connection();
        let (admin, mut admin_rx) = connection();

        store
            .upsert_session_activity("cust-1", Some("Ada"), true)
            .await
            .unwrap();
        chat.register(Arc::clone(&customer), Role::Customer, "cust-1", "Ada")
            .await;
        chat.register(Arc::clone(&admin), Role::Admin, "agent-1", "Sam")
            .await;

        route(
            &chat,
            &store,
            customer.connection_id,
            customer_message("m1", "cust-1"),
        )
        .await;

        let events = drain(&mut admin_rx);
        // The message itself, then the refreshed roster with the unread bump
        assert!(matches!(events[0], ServerEvent::ReceiveMessage { .. }));
        match &events[1] {
            ServerEvent::CustomerList { customers } => {
                assert_eq!(customers.len(), 1);
                assert_eq!(customers[0].customer_id, "cust-1");
                assert_eq!(customers[0].unread_count, 1);
            }
            other => panic!("Expected CustomerList, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fan_out_with_no_admins_is_a_noop() {
        let chat = ChatState::new();
        let store = MemoryStore::new();
        let (customer, mut customer_rx) = connection();

        // Registered but never joined a room, no admins online: the message
        // persists and nobody hears it live
        chat.register(Arc::clone(&customer), Role::Customer, "cust-7", "Grace")
            .await;

        let outcome = route(
            &chat,
            &store,
            customer.connection_id,
            customer_message("m1", "cust-7"),
        )
        .await;
        assert_eq!(
            outcome,
            RouteOutcome::Delivered {
                recipients: 0,
                persisted: true
            }
        );
        assert_eq!(store.message_count(), 1);
        assert!(matches!(customer_rx.try_recv(), Err(TryRecvError::Empty)));
    }
}
