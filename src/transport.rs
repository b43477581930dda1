//! Outbound transport and credential collaborators.
//!
//! HTTP-based North connectors do not talk to the network themselves: they
//! describe a request (url, method, authentication, payload, headers) and
//! hand it to a [`Transport`]. The cache flush loop treats a transport
//! rejection as a retryable-or-not delivery error per the engine's error
//! classification.
//!
//! Secrets in configuration are stored encrypted; a [`CredentialDecrypter`]
//! turns them back into plaintext when authentication headers are built.
//! Decrypted values are never logged.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, Result};

/// HTTP method of an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    #[default]
    Post,
    Put,
    Patch,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
        }
    }
}

/// Authentication descriptor for outbound requests.
///
/// Password/secret/token fields hold *encrypted* values; they pass through
/// the [`CredentialDecrypter`] when headers are built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Authentication {
    /// HTTP Basic authentication.
    Basic { username: String, password: String },

    /// Custom header carrying an API key.
    ApiKey { key: String, secret: String },

    /// Bearer token in the Authorization header.
    Bearer { token: String },
}

/// Payload of an outbound request.
#[derive(Debug, Clone)]
pub enum Payload {
    /// A string body (the caller sets Content-Type through headers).
    Text(String),

    /// A file read from disk and sent as the body.
    File(PathBuf),
}

/// An outbound request descriptor.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Target URL.
    pub url: String,

    /// HTTP method.
    pub method: Method,

    /// Headers, including any authentication headers.
    pub headers: Vec<(String, String)>,

    /// Optional proxy URL.
    pub proxy: Option<String>,

    /// Request body.
    pub body: Payload,

    /// Request timeout.
    pub timeout: Duration,
}

/// Collaborator that turns an encrypted secret back into plaintext.
pub trait CredentialDecrypter: Send + Sync {
    /// Decrypt a secret from configuration.
    fn decrypt(&self, secret: &str) -> Result<String>;
}

/// Pass-through decrypter for configurations holding plaintext secrets.
#[derive(Debug, Default)]
pub struct PlainTextCredentials;

impl CredentialDecrypter for PlainTextCredentials {
    fn decrypt(&self, secret: &str) -> Result<String> {
        Ok(secret.to_string())
    }
}

/// Build the authentication headers for a request.
pub fn build_auth_headers(
    authentication: &Authentication,
    decrypter: &dyn CredentialDecrypter,
) -> Result<Vec<(String, String)>> {
    match authentication {
        Authentication::Basic { username, password } => {
            let password = decrypter.decrypt(password)?;
            let credentials =
                base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
            Ok(vec![(
                "Authorization".to_string(),
                format!("Basic {}", credentials),
            )])
        }
        Authentication::ApiKey { key, secret } => {
            let secret = decrypter.decrypt(secret)?;
            Ok(vec![(key.clone(), secret)])
        }
        Authentication::Bearer { token } => {
            let token = decrypter.decrypt(token)?;
            Ok(vec![(
                "Authorization".to_string(),
                format!("Bearer {}", token),
            )])
        }
    }
}

/// Collaborator that performs outbound requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the request. A non-success response or a network failure is
    /// returned as an error classified by [`EngineError::is_retryable`].
    async fn send(&self, request: TransportRequest) -> Result<()>;
}

/// Default [`Transport`] backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a shared connection pool.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<reqwest::Client> {
        match proxy {
            // reqwest configures proxies per client, not per request
            Some(url) => {
                let proxy = reqwest::Proxy::all(url)
                    .map_err(|e| EngineError::Config(format!("invalid proxy {}: {}", url, e)))?;
                reqwest::Client::builder()
                    .proxy(proxy)
                    .build()
                    .map_err(|e| EngineError::Delivery(e.to_string()))
            }
            None => Ok(self.client.clone()),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<()> {
        let client = self.client_for(request.proxy.as_deref())?;

        let mut builder = client
            .request(request.method.as_reqwest(), &request.url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        builder = match request.body {
            Payload::Text(text) => builder.body(text),
            Payload::File(path) => {
                let bytes = tokio::fs::read(&path).await?;
                builder.body(bytes)
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::Delivery(format!("request to {} failed: {}", request.url, e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(EngineError::Http {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_header() {
        let auth = Authentication::Basic {
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        let headers = build_auth_headers(&auth, &PlainTextCredentials).unwrap();
        // base64("user:pass")
        assert_eq!(
            headers,
            vec![("Authorization".to_string(), "Basic dXNlcjpwYXNz".to_string())]
        );
    }

    #[test]
    fn test_api_key_header() {
        let auth = Authentication::ApiKey {
            key: "X-Api-Key".to_string(),
            secret: "s3cret".to_string(),
        };
        let headers = build_auth_headers(&auth, &PlainTextCredentials).unwrap();
        assert_eq!(headers, vec![("X-Api-Key".to_string(), "s3cret".to_string())]);
    }

    #[test]
    fn test_bearer_header() {
        let auth = Authentication::Bearer {
            token: "tok".to_string(),
        };
        let headers = build_auth_headers(&auth, &PlainTextCredentials).unwrap();
        assert_eq!(
            headers,
            vec![("Authorization".to_string(), "Bearer tok".to_string())]
        );
    }

    #[test]
    fn test_authentication_settings_shape() {
        let raw = r#"{ "type": "basic", "username": "u", "password": "p" }"#;
        let auth: Authentication = serde_json::from_str(raw).unwrap();
        assert!(matches!(auth, Authentication::Basic { .. }));

        let raw = r#"{ "type": "api-key", "key": "X-K", "secret": "s" }"#;
        let auth: Authentication = serde_json::from_str(raw).unwrap();
        assert!(matches!(auth, Authentication::ApiKey { .. }));
    }
}
