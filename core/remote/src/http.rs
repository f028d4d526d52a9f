//! HTTP backend: one POST per record to a REST endpoint per record type.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use fieldsync_common::{Error, RecordType, Result};

use crate::backend::{ReachabilityProbe, RemoteBackend};
use crate::routes::Routes;

/// Connection settings for the HTTP backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Base URL that endpoint paths are appended to.
    pub base_url: String,
    /// Project API key, sent as `apikey` and bearer token.
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Timeout for reachability probes in seconds.
    pub probe_timeout_secs: u64,
    /// Endpoint overrides keyed by record type tag.
    pub routes: HashMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321/rest/v1".to_string(),
            api_key: None,
            request_timeout_secs: 30,
            probe_timeout_secs: 5,
            routes: HashMap::new(),
        }
    }
}

impl HttpConfig {
    /// Create a config for `base_url` with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// REST backend built on reqwest.
pub struct HttpBackend {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
    routes: Routes,
    probe_timeout: Duration,
}

impl HttpBackend {
    /// Create a backend from configuration.
    ///
    /// # Errors
    /// - Base URL is not a valid absolute URL
    /// - A route override is empty
    /// - HTTP client construction failure
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let routes = Routes::default().with_overrides(&config.routes)?;
        Self::with_routes(config, routes)
    }

    /// Create a backend with an explicit route table.
    pub fn with_routes(config: &HttpConfig, routes: Routes) -> Result<Self> {
        // A trailing slash makes `Url::join` append instead of replace.
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)
            .map_err(|e| Error::Config(format!("Invalid base URL '{}': {}", config.base_url, e)))?;

        let http = Client::builder()
            .user_agent(concat!("fieldsync/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            routes,
            probe_timeout: config.probe_timeout(),
        })
    }

    /// Full endpoint URL for a record type.
    ///
    /// # Errors
    /// - `UnsupportedType` if the type has no route
    pub fn endpoint(&self, record_type: &RecordType) -> Result<Url> {
        let path = self.routes.resolve(record_type)?;
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid endpoint '{}': {}", path, e)))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request
                .header("apikey", key)
                .header(header::AUTHORIZATION, format!("Bearer {}", key)),
            None => request,
        }
    }

    /// Map a response status to the delivery outcome.
    async fn handle_response(response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(err.to_string())
    } else {
        Error::Network(err.to_string())
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn submit(&self, record_type: &RecordType, payload: &serde_json::Value) -> Result<()> {
        let url = self.endpoint(record_type)?;
        debug!("POST {}", url);

        let request = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .header("Prefer", "return=minimal")
            .json(payload);

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(transport_error)?;

        Self::handle_response(response).await
    }
}

#[async_trait]
impl ReachabilityProbe for HttpBackend {
    async fn is_reachable(&self) -> bool {
        let request = self
            .http
            .head(self.base_url.clone())
            .timeout(self.probe_timeout);

        // Any answer at all, even an error status, means the host is reachable.
        match self.authorize(request).send().await {
            Ok(response) => {
                debug!("Probe answered with {}", response.status());
                true
            }
            Err(e) => {
                debug!("Probe failed: {}", e);
                false
            }
        }
    }
}
