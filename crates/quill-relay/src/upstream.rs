//! Upstream completion API client.
//!
//! Uses reqwest to open a single streaming completion request per turn.

use std::time::Duration;

use quill_core::config::RelayConfig;
use quill_core::wire::{ChatRequest, CompletionRequest};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::RelayError;

/// Model parameters applied when a request leaves them out.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionDefaults {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Client for the upstream completion endpoint.
///
/// Holds the pooled HTTP client shared by every relay request.
pub struct UpstreamClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    defaults: CompletionDefaults,
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("url", &self.url)
            .field("has_api_key", &self.api_key.is_some())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl UpstreamClient {
    /// Create a new upstream client from relay configuration.
    pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
        // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
        // The `Err` case just means it was already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.upstream_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            url: config.upstream_url.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            defaults: CompletionDefaults {
                model: config.default_model.clone(),
                temperature: config.default_temperature,
                max_tokens: config.default_max_tokens,
            },
        })
    }

    /// Fail fast when no credential is configured.
    pub const fn ensure_configured(&self) -> Result<(), RelayError> {
        if self.api_key.is_none() {
            return Err(RelayError::MissingCredential);
        }
        Ok(())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build the upstream body for a validated chat request.
    pub fn completion_request(&self, request: ChatRequest) -> CompletionRequest {
        CompletionRequest {
            model: request
                .model
                .unwrap_or_else(|| self.defaults.model.clone()),
            messages: request.messages,
            stream: true,
            temperature: request.temperature.unwrap_or(self.defaults.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.defaults.max_tokens),
        }
    }

    /// Send the completion request and wait for response headers.
    ///
    /// `cancel` is the inbound request's cancellation signal: if it fires
    /// while the request is in flight, the request future is dropped (closing
    /// the upstream socket) and [`RelayError::Cancelled`] is returned.
    pub async fn open(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, RelayError> {
        let api_key = self.api_key.as_deref().ok_or(RelayError::MissingCredential)?;

        let send = self
            .http
            .post(&self.url)
            .bearer_auth(api_key)
            .json(request)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RelayError::Cancelled),
            response = send => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RelayError::Cancelled),
                body = response.text() => body.unwrap_or_default(),
            };
            error!(status = status.as_u16(), body = %body, "Upstream rejected request");
            return Err(RelayError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        debug!(status = status.as_u16(), model = %request.model, "Upstream stream opened");
        Ok(response)
    }
}
