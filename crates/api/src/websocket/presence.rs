//! Presence tracking and broadcasts
//!
//! Derives aggregate online/offline signals from the connection registry and
//! pushes them to the opposite role as full resyncs: admins get the complete
//! online-customer list, customers get the pooled admin flag. Replacing state
//! instead of diffing it keeps clients consistent even when they missed
//! individual events. Admin presence is pooled: the pool counts as online
//! while at least one admin connection remains.

use std::collections::BTreeMap;

use livedesk_shared::{Role, SessionSummary, StoreResult};

use crate::store::ChatStore;

use super::events::{OnlineUser, ServerEvent};
use super::state::ChatState;

/// Online customers, one entry per participant regardless of how many
/// connections they hold, ordered by participant id for stable payloads
pub async fn online_customers(chat: &ChatState) -> Vec<OnlineUser> {
    let mut by_id: BTreeMap<String, String> = BTreeMap::new();
    for participant in chat.participants_by_role(Role::Customer).await {
        by_id
            .entry(participant.participant_id)
            .or_insert(participant.display_name);
    }

    by_id
        .into_iter()
        .map(|(participant_id, display_name)| OnlineUser {
            participant_id,
            display_name,
        })
        .collect()
}

/// Aggregate admin availability plus one agent's display name for the
/// customer-facing banner
pub async fn admin_pool_status(chat: &ChatState) -> (bool, Option<String>) {
    let mut admins = chat.participants_by_role(Role::Admin).await;
    admins.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));

    let display_name = admins.first().map(|a| a.display_name.clone());
    (!admins.is_empty(), display_name)
}

/// Full presence resync to every connection of the opposite role
pub async fn broadcast_presence(chat: &ChatState) {
    let users = online_customers(chat).await;
    let admin_event = ServerEvent::OnlineUsers { users };
    for admin in chat.participants_by_role(Role::Admin).await {
        let _ = admin.conn.send(admin_event.clone());
    }

    let (online, display_name) = admin_pool_status(chat).await;
    let customer_event = ServerEvent::AdminStatus {
        online,
        display_name,
    };
    for customer in chat.participants_by_role(Role::Customer).await {
        let _ = customer.conn.send(customer_event.clone());
    }
}

/// Tell every admin that one customer's aggregate presence flipped
///
/// Sent when a customer's first connection arrives or their last one goes
/// away, alongside the full `online_users` resync.
pub async fn broadcast_customer_flip(chat: &ChatState, participant_id: &str, online: bool) {
    let event = ServerEvent::CustomerStatus {
        participant_id: participant_id.to_string(),
        online,
    };
    for admin in chat.participants_by_role(Role::Admin).await {
        let _ = admin.conn.send(event.clone());
    }

    tracing::debug!(
        participant_id = %participant_id,
        online,
        "Customer presence flipped"
    );
}

/// Session roster with the live-online overlay applied.
///
/// The store keeps an `is_online` column, but liveness is always answered
/// from the registry so presence never survives a process restart. This is
/// the payload behind both the `customer_list` resync and the HTTP session
/// list.
pub async fn customer_list(
    chat: &ChatState,
    store: &dyn ChatStore,
) -> StoreResult<Vec<SessionSummary>> {
    let mut sessions = store.list_sessions(false).await?;
    for session in &mut sessions {
        session.is_online = chat.is_participant_online(&session.customer_id).await;
    }
    Ok(sessions)
}

/// Push the current session roster to every admin connection
pub async fn broadcast_customer_list(chat: &ChatState, store: &dyn ChatStore) {
    let admins = chat.participants_by_role(Role::Admin).await;
    if admins.is_empty() {
        return;
    }

    match customer_list(chat, store).await {
        Ok(customers) => {
            let event = ServerEvent::CustomerList { customers };
            for admin in admins {
                let _ = admin.conn.send(event.clone());
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "Failed to load customer list for admin resync");
        }
    }
}
