//! HTTP North connector.
//!
//! Posts value batches as JSON and forwards files as raw bodies to a
//! configured endpoint. Authentication headers are built once at init from
//! the configured scheme; the actual wire work goes through the [`Transport`]
//! seam so tests can substitute a scripted transport.
//!
//! Delivery failures keep the default retry classification: connection
//! errors, timeouts and 408/429/5xx responses are retried by the cache,
//! while 4xx client errors drop the batch.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::connector::traits::NorthConnector;
use crate::core::config::NorthConfig;
use crate::core::data::DataValue;
use crate::core::error::{EngineError, Result};
use crate::transport::{
    build_auth_headers, Authentication, CredentialDecrypter, Method, Payload, Transport,
    TransportRequest,
};

/// HTTP parameters (deserialized from the North's `settings`).
///
/// # Example JSON
/// ```json
/// {
///     "url": "https://historian.example.com/api/values",
///     "method": "POST",
///     "authentication": { "type": "basic", "username": "gw", "password": "..." },
///     "proxy": "http://proxy.local:3128",
///     "timeoutMs": 30000
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSettings {
    /// Endpoint receiving the data.
    pub url: String,

    /// HTTP method, POST by default.
    #[serde(default)]
    pub method: Method,

    /// Optional authentication scheme.
    #[serde(default)]
    pub authentication: Option<Authentication>,

    /// Optional proxy URL.
    #[serde(default)]
    pub proxy: Option<String>,

    /// Per-request timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// North connector delivering over HTTP.
pub struct HttpNorth {
    north_id: String,
    settings: HttpSettings,
    subscribed_to: Vec<String>,
    transport: Arc<dyn Transport>,
    decrypter: Arc<dyn CredentialDecrypter>,
    auth_headers: Vec<(String, String)>,
}

impl HttpNorth {
    pub fn from_config(
        config: &NorthConfig,
        transport: Arc<dyn Transport>,
        decrypter: Arc<dyn CredentialDecrypter>,
    ) -> Result<Self> {
        let settings: HttpSettings = serde_json::from_value(config.settings.clone())
            .map_err(|e| EngineError::Config(format!("http settings: {e}")))?;
        Ok(Self {
            north_id: config.id.clone(),
            settings,
            subscribed_to: config.subscribed_to.clone(),
            transport,
            decrypter,
            auth_headers: Vec::new(),
        })
    }

    fn request(&self, headers: Vec<(String, String)>, body: Payload) -> TransportRequest {
        TransportRequest {
            url: self.settings.url.clone(),
            method: self.settings.method,
            headers,
            proxy: self.settings.proxy.clone(),
            body,
            timeout: Duration::from_millis(self.settings.timeout_ms),
        }
    }
}

#[async_trait]
impl NorthConnector for HttpNorth {
    async fn init(&mut self) -> Result<()> {
        self.auth_headers = match &self.settings.authentication {
            Some(auth) => build_auth_headers(auth, self.decrypter.as_ref())?,
            None => Vec::new(),
        };
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn handle_values(&mut self, values: &[DataValue]) -> Result<()> {
        let mut headers = self.auth_headers.clone();
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        let body = serde_json::to_string(values)?;

        self.transport
            .send(self.request(headers, Payload::Text(body)))
            .await?;
        debug!(north_id = %self.north_id, count = values.len(), "values posted");
        Ok(())
    }

    async fn handle_file(&mut self, path: &Path) -> Result<()> {
        let mut headers = self.auth_headers.clone();
        headers.push((
            "Content-Type".to_string(),
            "application/octet-stream".to_string(),
        ));
        if let Some(name) = path.file_name() {
            headers.push((
                "Content-Disposition".to_string(),
                format!("attachment; filename=\"{}\"", name.to_string_lossy()),
            ));
        }

        self.transport
            .send(self.request(headers, Payload::File(path.to_path_buf())))
            .await?;
        debug!(north_id = %self.north_id, path = %path.display(), "file posted");
        Ok(())
    }

    fn handles_values(&self) -> bool {
        true
    }

    fn handles_files(&self) -> bool {
        true
    }

    fn subscribed_to(&self) -> &[String] {
        &self.subscribed_to
    }
}
