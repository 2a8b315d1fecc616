//! HTTP client adapter for the cluster daemon REST API.
//!
//! One process-wide [`DaemonClient`] wraps every outbound call with the
//! configured timeout, the certificate-verification toggle, and a bounded
//! retry on transient upstream errors (502/503/504). Transport failures are
//! reduced to the closed [`ClientError`] taxonomy at this boundary; nothing
//! above it sees a raw `reqwest::Error`.

use crate::config::Config;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

/// Retries for 502/503/504 answers before giving up.
const MAX_RETRIES: u32 = 3;
/// Pause between retries.
const RETRY_BACKOFF: std::time::Duration = std::time::Duration::from_millis(300);

/// Transport and protocol errors surfaced by the adapter.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("SSL error on {url}: {message}")]
    Ssl { url: String, message: String },

    #[error("Timeout on {url}")]
    Timeout { url: String },

    #[error("Too many redirects on {url}")]
    TooManyRedirects { url: String },

    #[error("Unable to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("Token fetch failed: {0}")]
    Token(String),

    #[error("[{status}]: {body}")]
    Status { status: u16, body: String },
}

impl ClientError {
    fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        let message = e.to_string();
        if e.is_timeout() {
            ClientError::Timeout {
                url: url.to_string(),
            }
        } else if e.is_redirect() {
            ClientError::TooManyRedirects {
                url: url.to_string(),
            }
        } else if message.contains("certificate") || message.contains("SSL") {
            ClientError::Ssl {
                url: url.to_string(),
                message,
            }
        } else if e.is_connect() {
            ClientError::Connect {
                url: url.to_string(),
                message,
            }
        } else {
            ClientError::Transport {
                url: url.to_string(),
                message,
            }
        }
    }
}

/// Status and body of a daemon answer. The dispatcher needs to branch on
/// raw status codes, so no status is treated as an error at this level.
#[derive(Debug, Clone)]
pub struct DaemonResponse {
    pub status: u16,
    pub body: String,
}

impl DaemonResponse {
    /// Parse the body as JSON, if there is one.
    #[must_use]
    pub fn json(&self) -> Option<Value> {
        if self.body.is_empty() {
            return None;
        }
        serde_json::from_str(&self.body).ok()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Client for the cluster daemon. Cheap to share by reference; the auth
/// token lives behind a lock so concurrent callers can refresh it
/// idempotently without affecting each other.
pub struct DaemonClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    token: RwLock<Option<String>>,
}

impl DaemonClient {
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.api.timeout())
            .danger_accept_invalid_certs(!config.api.verify_certificate)
            .build()
            .map_err(|e| ClientError::Transport {
                url: config.api.base_url(),
                message: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: config.api.base_url(),
            username: config.api.username.clone(),
            password: config.api.password.clone(),
            token: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fetch a fresh token from the daemon and cache it.
    ///
    /// Safe to call from concurrent tasks; the last writer wins and every
    /// caller ends up with a valid token.
    pub async fn refresh_token(&self) -> Result<String, ClientError> {
        let url = self.url("/token");
        let credentials = serde_json::json!({
            "username": self.username,
            "password": self.password,
        });

        let response = self
            .http
            .post(&url)
            .json(&credentials)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&url, e))?;

        match response.status().as_u16() {
            401 => return Err(ClientError::Token("invalid credentials".to_string())),
            400 => return Err(ClientError::Token("bad request".to_string())),
            _ => {}
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ClientError::from_reqwest(&url, e))?;
        let token = body
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ClientError::Token("daemon did not return a token".to_string())
            })?
            .to_string();

        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn token(&self) -> Result<String, ClientError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.refresh_token().await
    }

    /// GET a daemon path. Known-transient upstream statuses are retried a
    /// bounded number of times; a stale token is refreshed once.
    pub async fn get(&self, path: &str) -> Result<DaemonResponse, ClientError> {
        self.request(reqwest::Method::GET, path, None).await
    }

    /// POST a JSON body to a daemon path.
    pub async fn post(&self, path: &str, body: &Value) -> Result<DaemonResponse, ClientError> {
        self.request(reqwest::Method::POST, path, Some(body)).await
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<DaemonResponse, ClientError> {
        let url = self.url(path);
        let mut token = self.token().await?;
        let mut refreshed = false;
        let mut retries = 0u32;

        loop {
            let mut builder = self
                .http
                .request(method.clone(), &url)
                .header("x-access-tokens", &token);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| ClientError::from_reqwest(&url, e))?;
            let status = response.status().as_u16();

            if matches!(status, 502 | 503 | 504) && retries < MAX_RETRIES {
                retries += 1;
                tracing::debug!(url = %url, status, retries, "transient upstream error, retrying");
                tokio::time::sleep(RETRY_BACKOFF).await;
                continue;
            }

            if status == 401 && !refreshed {
                tracing::debug!(url = %url, "401 from daemon, refreshing token");
                token = self.refresh_token().await?;
                refreshed = true;
                continue;
            }

            let body = response
                .text()
                .await
                .map_err(|e| ClientError::from_reqwest(&url, e))?;
            return Ok(DaemonResponse { status, body });
        }
    }

    // ------------------------------------------------------------------
    // Inventory and hostlist resolution helpers
    // ------------------------------------------------------------------

    /// Full node inventory with each node's daemon status.
    /// Order follows the daemon's answer.
    pub async fn node_inventory(&self) -> Result<Vec<(String, String)>, ClientError> {
        let response = self.get("/config/node").await?;
        if !response.is_success() {
            return Err(ClientError::Status {
                status: response.status,
                body: response.body,
            });
        }
        let body = response.json().ok_or_else(|| ClientError::Status {
            status: response.status,
            body: "response is not JSON".to_string(),
        })?;

        let nodes = body
            .get("config")
            .and_then(|c| c.get("node"))
            .and_then(Value::as_object)
            .ok_or_else(|| ClientError::Status {
                status: response.status,
                body: "returned unrecognized format while fetching node inventory".to_string(),
            })?;

        Ok(nodes
            .iter()
            .map(|(name, attrs)| {
                let status = attrs
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                (name.clone(), status)
            })
            .collect())
    }

    /// Member nodes of a configured group.
    pub async fn group_members(&self, group: &str) -> Result<Vec<String>, ClientError> {
        let response = self
            .get(&format!("/config/group/{}/_member", group))
            .await?;
        if !response.is_success() {
            return Err(ClientError::Status {
                status: response.status,
                body: response.body,
            });
        }
        response
            .json()
            .as_ref()
            .and_then(|body| {
                body.get("config")?
                    .get("group")?
                    .get(group)?
                    .get("members")?
                    .as_array()
                    .map(|members| {
                        members
                            .iter()
                            .filter_map(|m| m.as_str().map(str::to_string))
                            .collect()
                    })
            })
            .ok_or_else(|| ClientError::Status {
                status: response.status,
                body: "returned unrecognized format while fetching nodes in group".to_string(),
            })
    }

    /// Nodes racked in a configured rack (devices of type `node`).
    pub async fn rack_nodes(&self, rack: &str) -> Result<Vec<String>, ClientError> {
        let response = self.get(&format!("/config/rack/{}", rack)).await?;
        if !response.is_success() {
            return Err(ClientError::Status {
                status: response.status,
                body: response.body,
            });
        }
        response
            .json()
            .as_ref()
            .and_then(|body| {
                body.get("config")?
                    .get("rack")?
                    .get(rack)?
                    .get("devices")?
                    .as_array()
                    .map(|devices| {
                        devices
                            .iter()
                            .filter(|d| {
                                d.get("type").and_then(Value::as_str) == Some("node")
                            })
                            .filter_map(|d| {
                                d.get("name").and_then(Value::as_str).map(str::to_string)
                            })
                            .collect()
                    })
            })
            .ok_or_else(|| ClientError::Status {
                status: response.status,
                body: "returned unrecognized format while fetching nodes in rack".to_string(),
            })
    }
}
