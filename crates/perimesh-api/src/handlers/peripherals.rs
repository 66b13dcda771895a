//! /local, /remote, /call, /discover, /rescan handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use perimesh_core::CapabilityDescriptor;
use perimesh_services::ProxyHealth;

use super::ApiState;

// ── /local ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct LocalResponse {
    pub capabilities: Vec<CapabilityDescriptor>,
}

pub async fn handle_local(State(state): State<ApiState>) -> Json<LocalResponse> {
    Json(LocalResponse {
        capabilities: state.node.host.capability_list(),
    })
}

// ── /remote ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RemoteResponse {
    pub peripherals: Vec<RemoteInfo>,
}

#[derive(Debug, Serialize)]
pub struct RemoteInfo {
    pub key: String,
    pub owner: u32,
    pub label: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub methods: Vec<String>,
    pub health: ProxyHealth,
}

pub async fn handle_remote(State(state): State<ApiState>) -> Json<RemoteResponse> {
    let client = &state.node.client;
    let peripherals = client
        .entries()
        .into_iter()
        .map(|e| RemoteInfo {
            key: e.key().to_string(),
            owner: e.owner.0,
            label: client.owner_label(e.owner),
            name: e.name.clone(),
            kind: e.kind.clone(),
            methods: e.methods.clone(),
            health: e.proxy.health(),
        })
        .collect();
    Json(RemoteResponse { peripherals })
}

// ── /call ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    /// Bare name or `owner::name`.
    pub key: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct CallResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn handle_call(
    State(state): State<ApiState>,
    Json(req): Json<CallRequest>,
) -> Result<Json<CallResponse>, (StatusCode, String)> {
    let proxy = state.node.client.wrap(&req.key).ok_or((
        StatusCode::NOT_FOUND,
        format!("no remote peripheral '{}'", req.key),
    ))?;

    tracing::debug!(key = %req.key, method = %req.method, "call requested via API");
    let response = match proxy.invoke(&req.method, req.args).await {
        Some(results) => CallResponse {
            results: Some(results),
            error: None,
        },
        None => {
            let health = proxy.health();
            let reason = if health.connected {
                "call failed"
            } else {
                "peripheral disconnected"
            };
            CallResponse {
                results: None,
                error: Some(format!("{reason} ({} consecutive failures)", health.consecutive_failures)),
            }
        }
    };
    Ok(Json(response))
}

// ── /discover ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
    /// First node to answer, if any did.
    pub first: Option<u32>,
    pub remote: usize,
}

pub async fn handle_discover(State(state): State<ApiState>) -> Json<DiscoverResponse> {
    let first = state.node.client.discover().await;
    Json(DiscoverResponse {
        first: first.map(|n| n.0),
        remote: state.node.client.get_count(),
    })
}

// ── /rescan ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RescanResponse {
    pub changed: bool,
    pub exposed: usize,
}

pub async fn handle_rescan(State(state): State<ApiState>) -> Json<RescanResponse> {
    let changed = state.node.refresh();
    Json(RescanResponse {
        changed,
        exposed: state.node.host.capability_list().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::status::handle_status;
    use std::sync::Arc;
    use std::time::Duration;

    use perimesh_core::config::ClientConfig;
    use perimesh_core::{NodeId, NodeIdentity};
    use perimesh_services::{LocalBench, MemoryNetwork, Node, SharingPolicy, TablePeripheral};
    use serde_json::json;
    use tokio::sync::broadcast;

    struct Mesh {
        api: ApiState,
        _shutdown: broadcast::Sender<()>,
    }

    fn mesh() -> Mesh {
        let net = MemoryNetwork::new();
        let (shutdown, _) = broadcast::channel(1);
        let settings = ClientConfig {
            call_timeout_ms: 200,
            discover_wait_ms: 200,
            ..ClientConfig::default()
        };

        let server_bench = LocalBench::new();
        server_bench.attach(Arc::new(
            TablePeripheral::new("left", "energy_detector")
                .method("getTransferRate", |_| Ok(vec![json!(512)])),
        ));
        let server = Node::new(
            NodeIdentity::new(NodeId(10), "server"),
            Arc::new(server_bench.clone()),
            SharingPolicy::default(),
            Arc::new(net.join(NodeId(10))),
            settings.clone(),
        );
        server.start(Duration::ZERO, &shutdown);

        let local = Node::new(
            NodeIdentity::new(NodeId(1), "desk"),
            Arc::new(LocalBench::new()),
            SharingPolicy::default(),
            Arc::new(net.join(NodeId(1))),
            settings,
        );
        local.start(Duration::ZERO, &shutdown);

        Mesh {
            api: ApiState::new(local, shutdown.clone()),
            _shutdown: shutdown,
        }
    }

    #[tokio::test]
    async fn discover_then_call_through_proxy() {
        let m = mesh();
        let Json(found) = handle_discover(State(m.api.clone())).await;
        assert_eq!(found.first, Some(10));
        assert_eq!(found.remote, 1);

        let Json(remote) = handle_remote(State(m.api.clone())).await;
        assert_eq!(remote.peripherals[0].key, "10::left");
        assert_eq!(remote.peripherals[0].label.as_deref(), Some("server"));
        assert!(remote.peripherals[0].health.connected);

        let req = CallRequest {
            key: "left".to_string(),
            method: "getTransferRate".to_string(),
            args: vec![],
        };
        let Json(resp) = handle_call(State(m.api.clone()), Json(req)).await.unwrap();
        assert_eq!(resp.results, Some(vec![json!(512)]));
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn unknown_key_is_404() {
        let m = mesh();
        let req = CallRequest {
            key: "99::left".to_string(),
            method: "getTransferRate".to_string(),
            args: vec![],
        };
        let err = handle_call(State(m.api.clone()), Json(req)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unadvertised_method_reports_error() {
        let m = mesh();
        handle_discover(State(m.api.clone())).await;

        let req = CallRequest {
            key: "left".to_string(),
            method: "missing".to_string(),
            args: vec![],
        };
        let Json(resp) = handle_call(State(m.api.clone()), Json(req)).await.unwrap();
        assert!(resp.results.is_none());
        assert!(resp.error.unwrap().contains("call failed"));
    }

    #[tokio::test]
    async fn status_and_rescan() {
        let m = mesh();
        let Json(status) = handle_status(State(m.api.clone())).await;
        assert_eq!(status.node, 1);
        assert_eq!(status.label, "desk");
        assert_eq!(status.exposed, 0);

        let Json(rescan) = handle_rescan(State(m.api.clone())).await;
        assert!(!rescan.changed);
        assert_eq!(rescan.exposed, 0);
    }
}
