//! Relay metadata endpoint (SPEC_FULL.md §4.11's "NIP-11-style" JSON info).

use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
pub struct RelayInfo {
    name: String,
    description: String,
    pubkey: String,
    software: String,
    version: String,
    supported_limits: Limits,
    kind_nip_map: BTreeMap<u32, String>,
}

#[derive(Serialize)]
pub struct Limits {
    max_message_length: usize,
    max_subscriptions: usize,
    default_query_limit: usize,
}

pub async fn relay_info(State(state): State<AppState>) -> Json<RelayInfo> {
    let config = state.config.current();
    Json(RelayInfo {
        name: config.server.relay_name.clone(),
        description: config.server.relay_description.clone(),
        pubkey: hex::encode(state.identity.public_key()),
        software: "relayd".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        supported_limits: Limits {
            max_message_length: 65536,
            max_subscriptions: 64,
            default_query_limit: relay_core::types::DEFAULT_QUERY_LIMIT,
        },
        kind_nip_map: config.server.kind_nip_map.clone(),
    })
}
