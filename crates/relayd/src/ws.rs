//! Websocket upgrade and per-connection read loop (SPEC_FULL.md §4.11, §6).
//!
//! Grounded on `gossipd/src/server.rs::run`'s `tokio::select!` between
//! "new work arrives" and "shutdown requested"; here the two arms are an
//! incoming client frame and the broadcast fan-out of newly accepted events
//! matching one of this connection's live subscriptions.

use crate::accept::{accept_event, AcceptOutcome};
use crate::protocol::{challenge_notice, closed, generate_challenge, notice, ok, validate_auth_event};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use relay_core::types::{ClientMessage, Event, Filter, RelayMessage};
use relay_store::query;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// How often an authenticated connection re-checks whether its pubkey has
/// been blocked since it authenticated (§3, §7: a blocked pubkey's existing
/// session must be terminated, not just refused on its next authorization).
const BLOCK_RECHECK_INTERVAL: Duration = Duration::from_secs(5);

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(mut socket: WebSocket, state: AppState) {
    let challenge = generate_challenge();
    if send(&mut socket, challenge_notice(&challenge)).await.is_err() {
        return;
    }

    let mut subscriptions: HashMap<String, Vec<Filter>> = HashMap::new();
    let mut authed_pubkey: Option<String> = None;
    let mut events_rx = state.subscribe();
    let mut block_recheck = tokio::time::interval(BLOCK_RECHECK_INTERVAL);

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_client_frame(&mut socket, &state, &text, &challenge, &mut subscriptions, &mut authed_pubkey).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(?e, "websocket receive error");
                        break;
                    }
                }
            }
            broadcast_event = events_rx.recv() => {
                match broadcast_event {
                    Ok(event) => {
                        if let Err(()) = fan_out(&mut socket, &subscriptions, event).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "connection lagged behind event broadcast, resubscribing");
                        events_rx = state.subscribe();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = block_recheck.tick() => {
                if let Some(pubkey) = &authed_pubkey {
                    if state.access.is_blocked(pubkey) {
                        let _ = send(&mut socket, notice("blocked: session terminated, pubkey was blocked")).await;
                        break;
                    }
                }
            }
        }
    }
}

/// Sends `event` to every subscription whose filters it matches. Returns
/// `Err(())` only on a send failure (dead socket), not a filter mismatch.
async fn fan_out(
    socket: &mut WebSocket,
    subscriptions: &HashMap<String, Vec<Filter>>,
    event: Event,
) -> Result<(), ()> {
    for (sub_id, filters) in subscriptions {
        if filters.iter().any(|f| f.matches(&event)) {
            let msg = RelayMessage::Event { sub_id: sub_id.clone(), event: event.clone() };
            if send(socket, msg).await.is_err() {
                return Err(());
            }
        }
    }
    Ok(())
}

/// Parses and dispatches one client frame. Returns `false` if the
/// connection should close.
async fn handle_client_frame(
    socket: &mut WebSocket,
    state: &AppState,
    text: &str,
    challenge: &str,
    subscriptions: &mut HashMap<String, Vec<Filter>>,
    authed_pubkey: &mut Option<String>,
) -> bool {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    let message = match parsed {
        Ok(m) => m,
        Err(e) => {
            return send(socket, notice(format!("invalid: malformed message: {e}"))).await.is_ok();
        }
    };

    match message {
        ClientMessage::Event { event } => {
            let id = event.id.clone();
            let reply = match accept_event(state, event) {
                AcceptOutcome::Accepted => ok(&id, true, ""),
                AcceptOutcome::Invalid(reason) => ok(&id, false, format!("invalid: {reason}")),
                AcceptOutcome::Rejected(reason) => ok(&id, false, reason),
            };
            send(socket, reply).await.is_ok()
        }
        ClientMessage::Req { sub_id, filters } => {
            let mut seen = std::collections::HashSet::new();
            let mut results: Vec<Event> = Vec::new();
            for filter in &filters {
                for event in query::query(&state.events, filter) {
                    if seen.insert(event.id.clone()) {
                        results.push(event);
                    }
                }
            }
            results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            for event in results {
                if send(socket, RelayMessage::Event { sub_id: sub_id.clone(), event }).await.is_err() {
                    return false;
                }
            }
            if send(socket, RelayMessage::Eose { sub_id: sub_id.clone() }).await.is_err() {
                return false;
            }
            subscriptions.insert(sub_id, filters);
            true
        }
        ClientMessage::Close { sub_id } => {
            subscriptions.remove(&sub_id);
            send(socket, closed(&sub_id, "closed by client")).await.is_ok()
        }
        ClientMessage::Auth { event } => {
            if state.access.is_blocked(&event.pubkey) {
                send(socket, ok(&event.id, false, "blocked: pubkey is blocked")).await.is_ok()
            } else if validate_auth_event(&event, challenge) {
                *authed_pubkey = Some(event.pubkey.clone());
                send(socket, ok(&event.id, true, "")).await.is_ok()
            } else {
                send(socket, ok(&event.id, false, "invalid: challenge mismatch or bad signature")).await.is_ok()
            }
        }
    }
}

async fn send(socket: &mut WebSocket, message: RelayMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(&message).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(text)).await
}
