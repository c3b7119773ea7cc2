//! WebSocket handler for Axum
//!
//! Accepts socket upgrades, decodes client events, and drives the registry,
//! presence, lifecycle, and routing layers. Connections carry no
//! authentication; a participant announces its identity with its first
//! register or join event.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use livedesk_shared::{Role, TerminatedBy, MAX_MEDIA_PER_MESSAGE, MAX_TEXT_LEN};

use crate::state::AppState;
use crate::store::ChatStore;

use super::connection::Connection;
use super::events::{ClientEvent, ServerEvent};
use super::lifecycle::TerminateOutcome;
use super::presence;
use super::router::{self, InboundMessage, RouteOutcome};
use super::state::ChatState;

/// WebSocket handler - upgrades HTTP connection to WebSocket
pub async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending events to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let conn = Arc::new(Connection::new(tx));
    let connection_id = conn.connection_id;
    let chat = app_state.ws_state.clone();
    let store = Arc::clone(&app_state.store);

    tracing::info!(connection_id = %connection_id, "WebSocket connection opened");

    // Send connection acknowledgment
    let _ = conn.send(ServerEvent::Connected { connection_id });

    // Spawn task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        if let Ok(msg) = msg {
            match msg {
                Message::Text(text) => {
                    match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => {
                            handle_client_event(event, Arc::clone(&conn), &chat, store.as_ref())
                                .await;
                        }
                        Err(e) => {
                            tracing::warn!(
                                connection_id = %connection_id,
                                error = ?e,
                                "Failed to parse client event"
                            );
                            let _ = conn.send(ServerEvent::Error {
                                message: "Invalid event format".to_string(),
                            });
                        }
                    }
                }
                Message::Close(_) => {
                    tracing::info!(connection_id = %connection_id, "WebSocket close frame received");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // Axum answers transport pings itself
                }
                _ => {} // Ignore binary messages
            }
        }
    }

    // Cleanup on disconnect
    handle_disconnect(&chat, store.as_ref(), &connection_id).await;
    send_task.abort();
}

/// Handle client event
async fn handle_client_event(
    event: ClientEvent,
    conn: Arc<Connection>,
    chat: &ChatState,
    store: &dyn ChatStore,
) {
    use ClientEvent::*;

    match event {
        Register {
            role,
            participant_id,
            display_name,
        } => {
            register_participant(
                chat,
                store,
                conn,
                role,
                &participant_id,
                display_name.as_deref(),
            )
            .await;
        }

        JoinChat {
            chat_id,
            role,
            participant_id,
        } => {
            // Joining implies registration, for clients that skip the
            // explicit register event
            if !register_participant(chat, store, Arc::clone(&conn), role, &participant_id, None)
                .await
            {
                return;
            }

            // A terminated chat cannot be watched back into existence
            if let Some(by) = chat.lifecycle.termination(store, &chat_id).await {
                let _ = conn.send(ServerEvent::ChatTerminated { chat_id, by });
                return;
            }

            chat.rooms.join(&chat_id, Arc::clone(&conn)).await;
        }

        SendMessage {
            message_id,
            chat_id,
            sender_id,
            sender_role,
            text,
            media,
        } => {
            if text.len() > MAX_TEXT_LEN {
                let _ = conn.send(ServerEvent::Error {
                    message: format!("Message text exceeds {MAX_TEXT_LEN} bytes"),
                });
                return;
            }
            if media.len() > MAX_MEDIA_PER_MESSAGE {
                let _ = conn.send(ServerEvent::Error {
                    message: format!(
                        "A message may carry at most {MAX_MEDIA_PER_MESSAGE} media items"
                    ),
                });
                return;
            }

            let outcome = router::route(
                chat,
                store,
                conn.connection_id,
                InboundMessage {
                    message_id,
                    chat_id: chat_id.clone(),
                    sender_id,
                    sender_role,
                    text,
                    media,
                },
            )
            .await;

            // Gate rejections go back to the sender; everything else is
            // already on its way
            if let RouteOutcome::Terminated(by) = outcome {
                let _ = conn.send(ServerEvent::ChatTerminated { chat_id, by });
            }
        }

        TerminateChat { customer_id, by } => {
            terminate_chat(chat, store, &conn, &customer_id, by).await;
        }

        Ping => {
            let _ = conn.send(ServerEvent::Pong);
        }
    }
}

/// Register the identity behind a connection and fan out presence.
///
/// Returns `false` when the identity is a terminated customer session,
/// which may not re-register; a returning customer starts over under a new
/// identity.
async fn register_participant(
    chat: &ChatState,
    store: &dyn ChatStore,
    conn: Arc<Connection>,
    role: Role,
    participant_id: &str,
    display_name: Option<&str>,
) -> bool {
    if role == Role::Customer {
        if let Some(by) = chat.lifecycle.termination(store, participant_id).await {
            let _ = conn.send(ServerEvent::ChatTerminated {
                chat_id: participant_id.to_string(),
                by,
            });
            return false;
        }
    }

    // A bare re-register keeps the previously announced name
    let resolved_name = match display_name {
        Some(name) => name.to_string(),
        None => match chat.get_participant(&conn.connection_id).await {
            Some(existing) if existing.participant_id == participant_id => existing.display_name,
            _ => participant_id.to_string(),
        },
    };

    let was_online = chat.is_participant_online(participant_id).await;
    chat.register(Arc::clone(&conn), role, participant_id, &resolved_name)
        .await;

    match role {
        Role::Customer => {
            if let Err(err) = store
                .upsert_session_activity(participant_id, display_name, true)
                .await
            {
                tracing::warn!(
                    participant_id = %participant_id,
                    error = %err,
                    "Failed to mark session online"
                );
            }
        }
        Role::Admin => {
            // A freshly arrived agent picks up where the others left off
            match presence::customer_list(chat, store).await {
                Ok(customers) => {
                    let _ = conn.send(ServerEvent::CustomerList { customers });
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to load customer list for new admin");
                }
            }
        }
    }

    presence::broadcast_presence(chat).await;
    if role == Role::Customer && !was_online {
        presence::broadcast_customer_flip(chat, participant_id, true).await;
    }

    true
}

/// Close a customer's chat and notify everyone affected
async fn terminate_chat(
    chat: &ChatState,
    store: &dyn ChatStore,
    conn: &Arc<Connection>,
    customer_id: &str,
    by: TerminatedBy,
) {
    match chat.lifecycle.terminate(store, customer_id, by).await {
        TerminateOutcome::Applied => {
            let _ = conn.send(ServerEvent::ChatTerminated {
                chat_id: customer_id.to_string(),
                by,
            });

            let customer_conns = chat.resolve(customer_id).await;
            let customer_was_online = !customer_conns.is_empty();

            match by {
                TerminatedBy::Support => {
                    // The affected customer hears it on every device
                    for target in &customer_conns {
                        let _ = target.send(ServerEvent::ChatTerminatedByAdmin {
                            chat_id: customer_id.to_string(),
                        });
                    }
                }
                TerminatedBy::Customer => {
                    for admin in chat.participants_by_role(Role::Admin).await {
                        let _ = admin.conn.send(ServerEvent::ChatTerminatedByCustomer {
                            chat_id: customer_id.to_string(),
                        });
                    }
                    // The customer's other devices hear the closure too
                    for target in &customer_conns {
                        if target.connection_id != conn.connection_id {
                            let _ = target.send(ServerEvent::ChatTerminated {
                                chat_id: customer_id.to_string(),
                                by,
                            });
                        }
                    }
                }
            }

            // The customer's connections drop out of routing eligibility
            for target in &customer_conns {
                chat.unregister(&target.connection_id).await;
            }

            presence::broadcast_presence(chat).await;
            if customer_was_online {
                presence::broadcast_customer_flip(chat, customer_id, false).await;
            }
            presence::broadcast_customer_list(chat, store).await;
        }
        TerminateOutcome::AlreadyTerminated(existing) => {
            let _ = conn.send(ServerEvent::ChatTerminated {
                chat_id: customer_id.to_string(),
                by: existing,
            });
        }
    }
}

/// Cleanup after a socket closes: drop the registry entry, resync presence,
/// and mark the session offline once its last connection is gone
async fn handle_disconnect(chat: &ChatState, store: &dyn ChatStore, connection_id: &Uuid) {
    let Some(participant) = chat.unregister(connection_id).await else {
        // Never registered; nothing to announce
        return;
    };

    presence::broadcast_presence(chat).await;

    if participant.role == Role::Customer
        && !chat
            .is_participant_online(&participant.participant_id)
            .await
    {
        if let Err(err) = store
            .upsert_session_activity(&participant.participant_id, None, false)
            .await
        {
            tracing::warn!(
                participant_id = %participant.participant_id,
                error = %err,
                "Failed to mark session offline"
            );
        }
        presence::broadcast_customer_flip(chat, &participant.participant_id, false).await;
    }
}
