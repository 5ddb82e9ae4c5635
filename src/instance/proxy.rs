//! Reverse proxy: forwards data-plane HTTP requests to a running
//! instance's subprocess (local) or to a peer node's proxy endpoint
//! (remote), tracking inflight requests and last-activity for idle reaping.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, Request, Response, StatusCode};
use parking_lot::RwLock;

use crate::error::SupervisorError;
use crate::instance::status::StatusCell;
use std::sync::Arc;

/// Injectable so tests can fast-forward "now" without sleeping.
pub trait TimeSource: Send + Sync {
    fn now_unix(&self) -> i64;
}

pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Where requests for this instance's proxy go.
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    pub base_url: String,
    pub api_key: Option<String>,
    pub is_remote: bool,
}

struct CachedClient {
    target: ProxyTarget,
    client: reqwest::Client,
}

/// Per-instance reverse proxy. Built lazily on first `serve()`, dropped by
/// `clear()` when options change so the next call rebuilds against the new
/// target.
pub struct Proxy {
    status: Arc<StatusCell>,
    response_headers: HeaderMap,
    last_request_ts: AtomicI64,
    inflight: AtomicU32,
    time_source: Box<dyn TimeSource>,
    cached: RwLock<Option<CachedClient>>,
}

impl Proxy {
    pub fn new(status: Arc<StatusCell>, response_headers: HeaderMap) -> Self {
        Self::with_time_source(status, response_headers, Box::new(SystemTimeSource))
    }

    pub fn with_time_source(
        status: Arc<StatusCell>,
        response_headers: HeaderMap,
        time_source: Box<dyn TimeSource>,
    ) -> Self {
        Self {
            status,
            response_headers,
            last_request_ts: AtomicI64::new(0),
            inflight: AtomicU32::new(0),
            time_source,
            cached: RwLock::new(None),
        }
    }

    /// Forward `request` to `target`, stamping activity and inflight
    /// counters around the dispatch. Rejects with 503 while the instance is
    /// shutting down.
    pub async fn serve(
        &self,
        target: ProxyTarget,
        request: Request<Body>,
    ) -> Result<Response<Body>, SupervisorError> {
        if self.status.get() == crate::instance::status::Status::ShuttingDown {
            return Ok(Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .body(Body::from("Instance is shutting down"))
                .expect("static response always builds"));
        }

        self.update_last_request();
        self.inflight.fetch_add(1, Ordering::SeqCst);
        let result = self.dispatch(target, request).await;
        self.inflight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn dispatch(
        &self,
        target: ProxyTarget,
        request: Request<Body>,
    ) -> Result<Response<Body>, SupervisorError> {
        let client = self.client_for(&target);

        let (parts, body) = request.into_parts();
        let path_and_query = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        let url = format!("{}{}", target.base_url.trim_end_matches('/'), path_and_query);
        let body_bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| SupervisorError::Internal(e.to_string()))?;

        let mut upstream_req = client.request(parts.method.clone(), &url).body(body_bytes.to_vec());
        for (name, value) in parts.headers.iter() {
            if name == axum::http::header::HOST {
                continue;
            }
            upstream_req = upstream_req.header(name, value);
        }
        if let Some(key) = &target.api_key {
            upstream_req = upstream_req.bearer_auth(key);
        }

        let upstream_resp = upstream_req
            .send()
            .await
            .map_err(|e| SupervisorError::Internal(e.to_string()))?;

        let status = upstream_resp.status();
        let mut headers = upstream_resp.headers().clone();
        let resp_body = upstream_resp
            .bytes()
            .await
            .map_err(|e| SupervisorError::Internal(e.to_string()))?;

        if !target.is_remote {
            headers.retain(|name, _| !name.as_str().to_ascii_lowercase().starts_with("access-control-"));
        }
        for (name, value) in self.response_headers.iter() {
            headers.insert(name.clone(), value.clone());
        }

        let mut builder = Response::builder().status(status);
        if let Some(h) = builder.headers_mut() {
            *h = headers;
        }
        builder
            .body(Body::from(resp_body))
            .map_err(|e| SupervisorError::Internal(e.to_string()))
    }

    fn client_for(&self, target: &ProxyTarget) -> reqwest::Client {
        {
            let guard = self.cached.read();
            if let Some(cached) = guard.as_ref() {
                if cached.target.base_url == target.base_url && cached.target.api_key == target.api_key {
                    return cached.client.clone();
                }
            }
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("reqwest client with static config never fails to build");
        *self.cached.write() = Some(CachedClient {
            target: target.clone(),
            client: client.clone(),
        });
        client
    }

    pub fn update_last_request(&self) {
        self.last_request_ts.store(self.time_source.now_unix(), Ordering::SeqCst);
    }

    pub fn last_request_ts(&self) -> i64 {
        self.last_request_ts.load(Ordering::SeqCst)
    }

    pub fn should_timeout(&self, idle_timeout_minutes: u32) -> bool {
        if !self.status.is_running() || idle_timeout_minutes == 0 {
            return false;
        }
        let now = self.time_source.now_unix();
        let elapsed = now - self.last_request_ts.load(Ordering::SeqCst);
        elapsed > (idle_timeout_minutes as i64) * 60
    }

    pub fn inflight_count(&self) -> u32 {
        self.inflight.load(Ordering::SeqCst)
    }

    /// Drop the cached upstream client; the next `serve()` rebuilds it
    /// against whatever target it is given.
    pub fn clear(&self) {
        *self.cached.write() = None;
    }
}

pub fn parse_header_name(name: &str) -> Option<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::status::Status;
    use std::sync::atomic::AtomicI64 as StdAtomicI64;

    struct FixedTime(StdAtomicI64);

    impl TimeSource for FixedTime {
        fn now_unix(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn proxy_with_clock(clock: i64) -> (Proxy, Arc<StatusCell>) {
        let status = Arc::new(StatusCell::new(Status::Stopped));
        let proxy = Proxy::with_time_source(status.clone(), HeaderMap::new(), Box::new(FixedTime(StdAtomicI64::new(clock))));
        (proxy, status)
    }

    #[test]
    fn should_timeout_requires_running_and_positive_timeout() {
        let (proxy, status) = proxy_with_clock(1_000);
        proxy.update_last_request();
        assert!(!proxy.should_timeout(5));

        status.set(Status::Running);
        assert!(!proxy.should_timeout(0));
        assert!(!proxy.should_timeout(5));
    }

    #[test]
    fn inflight_counter_tracks_manual_increments() {
        let (proxy, _status) = proxy_with_clock(0);
        assert_eq!(proxy.inflight_count(), 0);
        proxy.inflight.fetch_add(1, Ordering::SeqCst);
        assert_eq!(proxy.inflight_count(), 1);
        proxy.inflight.fetch_sub(1, Ordering::SeqCst);
        assert_eq!(proxy.inflight_count(), 0);
    }
}
