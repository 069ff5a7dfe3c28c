//! Blob upload/download HTTP routes (SPEC_FULL.md §4.7).
//!
//! Grounded on the `ioi-foundation-ioi-network` gateway's `Router` +
//! `State<AppState>` handler shape; content-addressing is enforced here by
//! re-hashing the uploaded body and rejecting a mismatch, the HTTP-layer
//! analogue of `events.rs` storing identifiers as-received but rejecting
//! obviously-wrong ones upstream.

use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use relay_core::crypto::content_hash;

const OWNER_HEADER: &str = "x-pubkey";
const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

pub async fn put_blob(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let computed = hex::encode(content_hash(&body));
    if computed != hash.to_lowercase() {
        return (StatusCode::BAD_REQUEST, "content hash mismatch").into_response();
    }

    let owner = headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let media_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_MEDIA_TYPE)
        .to_string();

    match state.blob.put(&hash, &body, &owner, &media_type) {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => {
            tracing::error!(?e, "blob put failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_blob(State(state): State<AppState>, Path(hash): Path<String>) -> impl IntoResponse {
    let meta = match state.blob.meta(&hash) {
        Ok(Some(meta)) => meta,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(?e, "blob meta lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    match state.blob.get(&hash) {
        Ok(Some(bytes)) => {
            let mut response = bytes.into_response();
            if let Ok(value) = axum::http::HeaderValue::from_str(&meta.media_type) {
                response.headers_mut().insert(axum::http::header::CONTENT_TYPE, value);
            }
            response
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(?e, "blob get failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_deterministic_and_path_matchable() {
        let body = b"hello world";
        let hash = hex::encode(content_hash(body));
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hex::encode(content_hash(body)));
    }
}
