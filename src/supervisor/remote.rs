//! Remote dispatcher (C11): forwards lifecycle and data-plane calls for an
//! instance assigned to a peer node over HTTP. Failures bubble up
//! untranslated (§4.11): the dispatcher does not retry on 4xx/5xx
//! application errors, only on transient connection failures, and a small
//! bounded backoff.

use std::collections::HashMap;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;

use crate::config::NodeConfiguration;
use crate::error::SupervisorError;

const RETRY_MAX_ELAPSED: Duration = Duration::from_secs(5);

/// What the dispatcher knows about each peer: its base URL and, if the
/// deployment requires it, the bearer token to present.
pub struct RemoteDispatcher {
    http: reqwest::Client,
    nodes: HashMap<String, NodeConfiguration>,
}

impl RemoteDispatcher {
    pub fn new(nodes: HashMap<String, NodeConfiguration>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client with static config never fails to build");
        Self { http, nodes }
    }

    fn node(&self, node_id: &str) -> Result<&NodeConfiguration, SupervisorError> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| SupervisorError::RemoteUnreachable(node_id.to_string(), "node is not configured".into()))
    }

    /// `nodes` names exactly one node in practice (§3: a remote instance's
    /// `nodes` set names the peer it runs on); the first configured member
    /// is used as the dispatch target.
    pub fn target_node<'a>(&self, candidates: impl IntoIterator<Item = &'a String>) -> Result<&'a str, SupervisorError> {
        for candidate in candidates {
            if self.nodes.contains_key(candidate) {
                return Ok(candidate.as_str());
            }
        }
        Err(SupervisorError::RemoteUnreachable("<none>".into(), "no configured node in instance's node set".into()))
    }

    pub async fn start(&self, node_id: &str, name: &str) -> Result<(), SupervisorError> {
        self.lifecycle_call(node_id, name, "start").await
    }

    pub async fn stop(&self, node_id: &str, name: &str) -> Result<(), SupervisorError> {
        self.lifecycle_call(node_id, name, "stop").await
    }

    pub async fn restart(&self, node_id: &str, name: &str) -> Result<(), SupervisorError> {
        self.lifecycle_call(node_id, name, "restart").await
    }

    async fn lifecycle_call(&self, node_id: &str, name: &str, op: &str) -> Result<(), SupervisorError> {
        let node = self.node(node_id)?;
        let url = format!("{}/instances/{name}/{op}", node.address.trim_end_matches('/'));
        let node_id = node_id.to_string();

        let mut backoff = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(RETRY_MAX_ELAPSED))
            .build();

        loop {
            let mut req = self.http.post(&url);
            if let Some(key) = &node.api_key {
                req = req.bearer_auth(key);
            }

            match req.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(SupervisorError::RemoteUnreachable(node_id, format!("{status}: {body}")));
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    match backoff.next_backoff() {
                        Some(delay) => {
                            tracing::warn!(node = %node_id, error = %e, "transient error dispatching to peer, retrying");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        None => return Err(SupervisorError::RemoteUnreachable(node_id, e.to_string())),
                    }
                }
                Err(e) => return Err(SupervisorError::RemoteUnreachable(node_id, e.to_string())),
            }
        }
    }

    /// Forward a data-plane request to the peer's own proxy endpoint,
    /// injecting its API key. CORS headers are NOT stripped here — that is
    /// delegated to the peer, which applies its own policy (§4.5).
    pub async fn proxy(&self, node_id: &str, name: &str, request: Request<Body>) -> Result<Response<Body>, SupervisorError> {
        let node = self.node(node_id)?;
        let node_id_owned = node_id.to_string();

        let (parts, body) = request.into_parts();
        let path_and_query = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        let url = format!("{}/instances/{name}/proxy{}", node.address.trim_end_matches('/'), path_and_query);
        let body_bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| SupervisorError::Internal(e.to_string()))?;

        let mut upstream_req = self.http.request(parts.method.clone(), &url).body(body_bytes.to_vec());
        for (name, value) in parts.headers.iter() {
            if name == axum::http::header::HOST {
                continue;
            }
            upstream_req = upstream_req.header(name, value);
        }
        if let Some(key) = &node.api_key {
            upstream_req = upstream_req.bearer_auth(key);
        }

        let upstream_resp = upstream_req
            .send()
            .await
            .map_err(|e| SupervisorError::RemoteUnreachable(node_id_owned, e.to_string()))?;

        let status = StatusCode::from_u16(upstream_resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let headers = upstream_resp.headers().clone();
        let resp_body = upstream_resp
            .bytes()
            .await
            .map_err(|e| SupervisorError::Internal(e.to_string()))?;

        let mut builder = Response::builder().status(status);
        if let Some(h) = builder.headers_mut() {
            *h = headers;
        }
        builder
            .body(Body::from(resp_body))
            .map_err(|e| SupervisorError::Internal(e.to_string()))
    }
}
