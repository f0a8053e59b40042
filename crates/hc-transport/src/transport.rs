use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::AuthProvider;
use crate::error::TransportError;

pub const API_HOST: &str = "https://api.home-connect.com";
pub const SIM_HOST: &str = "https://simulator.home-connect.com";

const ACCEPT: &str = "application/vnd.bsh.sdk.v1+json";
const MAX_ATTEMPTS: u32 = 3;

/// REST client for the Home Connect API.
///
/// Every request carries a fresh bearer token from the [`AuthProvider`] and
/// the BSH-specific accept headers. `get`/`put`/`delete` share a fixed
/// 3-attempt retry budget: a `429` sleeps out `Retry-After` before
/// consuming one of those attempts, a `401` is assumed to be a stale token
/// the next attempt's fresh `access_token()` call will fix, and `404`/`409`
/// on a `GET` are treated as "no data" rather than an error, since not
/// every appliance has an active or selected program.
pub struct HomeConnectTransport {
    client: Client,
    auth: Arc<dyn AuthProvider>,
    host: String,
    language: String,
    rate_limit_hook: std::option::Option<Arc<dyn Fn(Duration) + Send + Sync>>,
}

impl HomeConnectTransport {
    pub fn new(auth: Arc<dyn AuthProvider>, simulate: bool, language: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            auth,
            host: if simulate { SIM_HOST } else { API_HOST }.to_string(),
            language: language.into(),
            rate_limit_hook: None,
        }
    }

    /// Builds a transport against an arbitrary host, bypassing the
    /// production/simulator choice. Used by other crates' test harnesses to
    /// point at a local mock server.
    pub fn for_host(auth: Arc<dyn AuthProvider>, host: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            auth,
            host: host.into(),
            language: language.into(),
            rate_limit_hook: None,
        }
    }

    /// Registers a callback fired with the sleep duration every time a `429`
    /// forces this transport to back off, so a caller (the coordinator's
    /// health tracker) can surface `BLOCKED` without this crate depending on
    /// `hc-engine`.
    pub fn with_rate_limit_hook(mut self, hook: Arc<dyn Fn(Duration) + Send + Sync>) -> Self {
        self.rate_limit_hook = Some(hook);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn get(&self, endpoint: &str) -> Result<Option<Value>, TransportError> {
        self.request(Method::GET, endpoint, None).await
    }

    pub async fn put(&self, endpoint: &str, body: Value) -> Result<bool, TransportError> {
        self.request(Method::PUT, endpoint, Some(body)).await?;
        Ok(true)
    }

    pub async fn delete(&self, endpoint: &str) -> Result<bool, TransportError> {
        self.request(Method::DELETE, endpoint, None).await?;
        Ok(true)
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<Option<Value>, TransportError> {
        let url = format!("{}{}", self.host, endpoint);
        let mut attempts_left = MAX_ATTEMPTS;

        loop {
            let token = self.auth.access_token().await?;
            let mut req = self
                .client
                .request(method.clone(), &url)
                .header("Authorization", format!("Bearer {token}"))
                .header("Accept", ACCEPT)
                .header("Accept-Language", &self.language);

            if let Some(b) = &body {
                req = req.header("Content-Type", ACCEPT).json(b);
            }

            let response = match req.send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, endpoint, "unexpected transport error, retrying");
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        return Err(e.into());
                    }
                    continue;
                }
            };

            let status = response.status();
            match status {
                StatusCode::OK if method == Method::GET => {
                    let json: Value = response.json().await?;
                    return Ok(json.get("data").cloned().or(Some(json)));
                }
                StatusCode::OK | StatusCode::NO_CONTENT => {
                    return Ok(Some(Value::Bool(true)));
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let wait = response
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(1);
                    debug!(wait_secs = wait, endpoint, "429 Too Many Requests, sleeping and retrying");
                    let wait_duration = Duration::from_secs(wait + 1);
                    if let Some(hook) = &self.rate_limit_hook {
                        hook(wait_duration);
                    }
                    tokio::time::sleep(wait_duration).await;
                }
                StatusCode::NOT_FOUND | StatusCode::CONFLICT if method == Method::GET => {
                    return Ok(None);
                }
                StatusCode::UNAUTHORIZED => {
                    debug!(endpoint, "401 Unauthorized, assuming stale token and retrying");
                }
                other => {
                    let body_text = response.text().await.unwrap_or_default();
                    info!(status = %other, endpoint, body = %body_text, "HTTP error calling Home Connect API");
                    return Err(TransportError::Service {
                        status: other.as_u16(),
                        body: body_text,
                    });
                }
            }

            attempts_left -= 1;
            if attempts_left == 0 {
                return Err(TransportError::RetriesExhausted { endpoint: endpoint.to_string() });
            }
        }
    }
}
