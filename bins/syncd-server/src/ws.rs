// SPDX-License-Identifier: Apache-2.0
//! Event channel gateway: the WebSocket handshake, per-connection
//! room membership, and inbound-event-to-ack dispatch.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use syncd_auth::{authenticate, Identity, Permission};
use syncd_core::{AppError, ErrorCode, FileStore};
use syncd_proto::{AckEnvelope, InboundEvent, InboundFrame, OutboundEvent};
use tracing::{info, warn};

/// Handshake query parameters for the `/ws` upgrade.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
}

/// Pre-upgrade handshake over the `apiKey` query parameter: resolved before
/// the protocol switch so an invalid key never gets a successful upgrade.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let identity = match authenticate(query.api_key.as_deref(), &state.admin_api_key, state.lookup.as_ref()).await
    {
        Ok(identity) => identity,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, identity: Identity) {
    let (conn_id, mut outbound_rx) = state.registry.join(identity.tenant_id);
    info!(tenant_id = %identity.tenant_id, conn_id, "connection joined room");

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let Some(ack) = handle_frame(&text, conn_id, &identity, &state).await else {
                            continue;
                        };
                        let payload = match serde_json::to_string(&ack) {
                            Ok(p) => p,
                            Err(err) => {
                                warn!(?err, "failed to serialize ack envelope");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(?err, conn_id, "websocket recv error");
                        break;
                    }
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(payload) => {
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    state.registry.leave(identity.tenant_id, conn_id);
    info!(tenant_id = %identity.tenant_id, conn_id, "connection left room");
}

/// Parse, authorize, and apply one inbound frame, returning the ack to
/// send back. `None` only when the frame itself could not be parsed as
/// JSON at all (malformed frames are logged and dropped rather than
/// acked, since there is no `ackId` to attach a response to).
async fn handle_frame(
    text: &str,
    conn_id: syncd_gateway::ConnId,
    identity: &Identity,
    state: &AppState,
) -> Option<AckEnvelope> {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(?err, "dropping unparseable inbound frame");
            return None;
        }
    };

    if !identity.permissions.has(Permission::Write) {
        return Some(AckEnvelope::err(
            frame.ack_id,
            ErrorCode::Forbidden,
            "credential lacks write permission".to_string(),
        ));
    }

    Some(apply_event(frame, conn_id, identity, state).await)
}

/// Apply one inbound event to the store, broadcast to the room if it
/// changed visible state, and build the corresponding ack. Mirrors the
/// exact per-event gating table.
async fn apply_event(
    frame: InboundFrame,
    conn_id: syncd_gateway::ConnId,
    identity: &Identity,
    state: &AppState,
) -> AckEnvelope {
    let ack_id = frame.ack_id;
    let tenant_id = identity.tenant_id;

    let result = match frame.event {
        InboundEvent::CreatedFile { path } => {
            apply_created(state, tenant_id, conn_id, &path).await
        }
        InboundEvent::ModifiedFile { path, content } => {
            apply_modified(state, tenant_id, conn_id, &path, &content).await
        }
        InboundEvent::DeletedFile { path } => apply_deleted(state, tenant_id, conn_id, &path).await,
        InboundEvent::RenamedFile { old_path, new_path } => {
            apply_renamed(state, tenant_id, conn_id, &old_path, &new_path).await
        }
    };

    match result {
        Ok(hash) => AckEnvelope::ok(ack_id, hash),
        Err(err) => to_ack_error(ack_id, err),
    }
}

/// Map an [`AppError`] to an ack per the restricted code set: a missing
/// path is never an error on the channel path (callers get a success ack
/// with no hash), and only `FORBIDDEN`/`VALIDATION_ERROR`/`INTERNAL_ERROR`
/// ever populate the error half.
fn to_ack_error(ack_id: String, err: AppError) -> AckEnvelope {
    match err.code() {
        ErrorCode::NotFound => AckEnvelope::ok(ack_id, None),
        code @ (ErrorCode::Forbidden | ErrorCode::ValidationError | ErrorCode::InternalError) => {
            AckEnvelope::err(ack_id, code, err.client_message())
        }
        // Unauthorized/Conflict never arise on this path: identity is
        // already resolved, and createEmpty/upsert never run strict create.
        _ => AckEnvelope::err(ack_id, ErrorCode::InternalError, err.client_message()),
    }
}

async fn apply_created(
    state: &AppState,
    tenant_id: uuid::Uuid,
    conn_id: syncd_gateway::ConnId,
    path: &str,
) -> Result<Option<String>, AppError> {
    syncd_core::validate::validate_path(path)?;
    let outcome = state.store.create_empty(tenant_id, path).await?;
    if outcome.created {
        state
            .registry
            .broadcast_excluding(tenant_id, conn_id, &OutboundEvent::created(&outcome.record))
            .await;
    }
    Ok(Some(outcome.record.hash))
}

async fn apply_modified(
    state: &AppState,
    tenant_id: uuid::Uuid,
    conn_id: syncd_gateway::ConnId,
    path: &str,
    content: &str,
) -> Result<Option<String>, AppError> {
    syncd_core::validate::validate_path(path)?;
    syncd_core::validate::validate_content_size(content)?;
    let outcome = state.store.upsert(tenant_id, path, content).await?;
    let event = if outcome.created {
        OutboundEvent::created(&outcome.record)
    } else {
        OutboundEvent::modified(&outcome.record)
    };
    state.registry.broadcast_excluding(tenant_id, conn_id, &event).await;
    Ok(Some(outcome.record.hash))
}

async fn apply_deleted(
    state: &AppState,
    tenant_id: uuid::Uuid,
    conn_id: syncd_gateway::ConnId,
    path: &str,
) -> Result<Option<String>, AppError> {
    syncd_core::validate::validate_path(path)?;
    let affected = state.store.soft_delete(tenant_id, path).await?;
    if affected {
        if let Some(record) = state.store.get_including_tombstones(tenant_id, path).await? {
            let deleted_at = record.updated_at;
            state
                .registry
                .broadcast_excluding(tenant_id, conn_id, &OutboundEvent::deleted(path, deleted_at))
                .await;
        }
    }
    Ok(None)
}

async fn apply_renamed(
    state: &AppState,
    tenant_id: uuid::Uuid,
    conn_id: syncd_gateway::ConnId,
    old_path: &str,
    new_path: &str,
) -> Result<Option<String>, AppError> {
    syncd_core::validate::validate_path(old_path)?;
    syncd_core::validate::validate_path(new_path)?;
    let outcome = state.store.rename(tenant_id, old_path, new_path).await?;
    let event = if outcome.created {
        OutboundEvent::created(&outcome.record)
    } else {
        OutboundEvent::renamed(old_path, &outcome.record)
    };
    state.registry.broadcast_excluding(tenant_id, conn_id, &event).await;
    Ok(Some(outcome.record.hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_state;
    use syncd_core::FileStore as _;

    #[tokio::test]
    async fn created_file_broadcasts_excluding_sender_and_acks_hash() {
        let (state, tenant_id) = test_state().await;
        let (conn_id, mut rx) = state.registry.join(tenant_id);
        let identity = Identity { tenant_id, permissions: syncd_auth::Permissions::READ_WRITE, credential_id: None };

        let frame = InboundFrame {
            ack_id: "1".to_string(),
            event: InboundEvent::CreatedFile { path: "a.txt".to_string() },
        };
        let ack = apply_event(frame, conn_id, &identity, &state).await;
        assert!(ack.success);
        assert!(ack.hash.is_some());
        assert!(rx.try_recv().is_err(), "sender's own connection excluded");

        let record = state.store.get(tenant_id, "a.txt").await.unwrap();
        assert!(record.is_some());
    }

    #[tokio::test]
    async fn deleted_file_on_missing_path_is_success_with_no_hash() {
        let (state, tenant_id) = test_state().await;
        let (conn_id, _rx) = state.registry.join(tenant_id);
        let identity = Identity { tenant_id, permissions: syncd_auth::Permissions::READ_WRITE, credential_id: None };

        let frame = InboundFrame {
            ack_id: "2".to_string(),
            event: InboundEvent::DeletedFile { path: "missing.txt".to_string() },
        };
        let ack = apply_event(frame, conn_id, &identity, &state).await;
        assert!(ack.success);
        assert!(ack.hash.is_none());
    }

    #[tokio::test]
    async fn other_connection_in_room_receives_broadcast() {
        let (state, tenant_id) = test_state().await;
        let (conn_id, _rx) = state.registry.join(tenant_id);
        let (_other_id, mut other_rx) = state.registry.join(tenant_id);
        let identity = Identity { tenant_id, permissions: syncd_auth::Permissions::READ_WRITE, credential_id: None };

        let frame = InboundFrame {
            ack_id: "3".to_string(),
            event: InboundEvent::ModifiedFile { path: "a.txt".to_string(), content: "hi".to_string() },
        };
        apply_event(frame, conn_id, &identity, &state).await;

        let raw = tokio::time::timeout(std::time::Duration::from_secs(1), other_rx.recv())
            .await
            .expect("no timeout")
            .expect("channel open");
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["event"], "file-created");
    }
}
