use super::{ApiError, AppState};
use crate::gateway::{AudioRequest, DispatchReceipt, DocumentRequest, ImageRequest, TextRequest};
use crate::session::PairingArtifact;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::{json, Value};

type JsonBody<T> = Result<Json<T>, JsonRejection>;
type ApiResult = Result<Json<Value>, ApiError>;

pub(crate) async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.session.status().await;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connected": status.connected,
    }))
}

pub(crate) async fn pairing_code(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.pairing_artifact().await {
        PairingArtifact::AlreadyConnected => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "already connected to WhatsApp",
                "connected": true,
            })),
        ),
        PairingArtifact::Available(qr) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "qr": qr,
                "message": "scan this code with WhatsApp",
            })),
        ),
        PairingArtifact::NotYetAvailable => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": "pairing code not available yet",
                "message": "waiting for a pairing code...",
            })),
        ),
    }
}

pub(crate) async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.session.status().await;
    Json(json!({
        "success": true,
        "connected": snapshot.connected,
        "state": snapshot.status,
    }))
}

pub(crate) async fn send_text(
    State(state): State<AppState>,
    body: JsonBody<TextRequest>,
) -> ApiResult {
    let Json(req) = body?;
    sent(state.gateway.send_text(req).await?)
}

pub(crate) async fn send_image(
    State(state): State<AppState>,
    body: JsonBody<ImageRequest>,
) -> ApiResult {
    let Json(req) = body?;
    sent(state.gateway.send_image(req).await?)
}

pub(crate) async fn send_document(
    State(state): State<AppState>,
    body: JsonBody<DocumentRequest>,
) -> ApiResult {
    let Json(req) = body?;
    sent(state.gateway.send_document(req).await?)
}

pub(crate) async fn send_audio(
    State(state): State<AppState>,
    body: JsonBody<AudioRequest>,
) -> ApiResult {
    let Json(req) = body?;
    sent(state.gateway.send_audio(req).await?)
}

pub(crate) async fn logout(State(state): State<AppState>) -> ApiResult {
    state.session.logout().await?;
    Ok(Json(json!({
        "success": true,
        "message": "session closed",
    })))
}

pub(crate) async fn reset(State(state): State<AppState>) -> ApiResult {
    state.session.reset().await?;
    Ok(Json(json!({
        "success": true,
        "message": "session reset, generating a new pairing code...",
    })))
}

fn sent(receipt: DispatchReceipt) -> ApiResult {
    Ok(Json(json!({
        "success": true,
        "messageId": receipt.message_id,
        "timestamp": receipt.timestamp,
    })))
}
