//! /status and /daemon/shutdown handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub node: u32,
    pub label: String,
    pub exposed: usize,
    pub remote: usize,
    pub pending: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let node = &state.node;
    Json(StatusResponse {
        node: node.identity.id.0,
        label: node.identity.label.clone(),
        exposed: node.host.capability_list().len(),
        remote: node.client.get_count(),
        pending: node.client.pending_len(),
    })
}

// ── /daemon/shutdown ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    let _ = state.shutdown_tx.send(());
    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
    })
}
