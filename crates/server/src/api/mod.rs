use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use chat_core::ChatSession;
use serde_json::{Map, Value};
use shared::error::{ApiError, ErrorCode};
use signer::{codec, format_address, EthNode, Signer, SignerError};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

pub const MAX_SEND_BODY_BYTES: usize = 64 * 1024;

type HttpError = (StatusCode, Json<ApiError>);

/// Latest block height of the connected chain.
#[async_trait]
pub trait ChainHead: Send + Sync {
    async fn latest_block(&self) -> Result<u64, SignerError>;
}

#[async_trait]
impl ChainHead for EthNode {
    async fn latest_block(&self) -> Result<u64, SignerError> {
        self.block_number().await
    }
}

#[derive(Clone)]
pub struct AppState {
    pub signer: Arc<dyn Signer>,
    pub session: Arc<ChatSession>,
    pub chain: Arc<dyn ChainHead>,
    pub storage: Storage,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/block", get(block))
        .route(
            "/send",
            post(send).layer(RequestBodyLimitLayer::new(MAX_SEND_BODY_BYTES)),
        )
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    if !state.session.is_prepared() {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(ErrorCode::NotReady, "chat session is still syncing")),
        ));
    }
    state.storage.health_check().await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(ErrorCode::Internal, format!("{e:#}"))),
        )
    })?;
    Ok("ok")
}

async fn block(State(state): State<Arc<AppState>>) -> Result<String, HttpError> {
    let number = state.chain.latest_block().await.map_err(upstream)?;
    Ok(number.to_string())
}

/// Signs the canonical JSON form once and broadcasts it to every joined room.
///
/// Responds with the signer address, chat user id and signature on separate lines.
async fn send(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Map<String, Value>>,
) -> Result<String, HttpError> {
    if !state.session.is_prepared() {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(ErrorCode::NotReady, "chat session is still syncing")),
        ));
    }

    let payload = Value::Object(body).to_string();
    let user_id = state.session.user_id().as_str();
    let envelope = codec::encode(&payload, user_id, state.signer.as_ref())
        .await
        .map_err(|err| {
            error!(%err, "failed to sign payload");
            upstream(err)
        })?;

    let deliveries = state.session.broadcast(&envelope.body()).await;
    let failed = deliveries.iter().filter(|d| d.result.is_err()).count();
    if failed > 0 {
        warn!(failed, rooms = deliveries.len(), "payload not delivered to every room");
    }
    info!(rooms = deliveries.len() - failed, "payload relayed");

    Ok(format!(
        "{}\n{}\n{}",
        format_address(&state.signer.address()),
        user_id,
        envelope.signature
    ))
}

fn upstream(err: SignerError) -> HttpError {
    (
        StatusCode::BAD_GATEWAY,
        Json(ApiError::new(ErrorCode::Upstream, err.to_string())),
    )
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
