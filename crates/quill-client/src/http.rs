//! HTTP layer for talking to the relay.
//!
//! Request and error interceptors are plain functions stored on an explicit
//! [`HttpConfig`]. They run in registration order on every request.

use std::sync::Arc;

use quill_core::config::ClientConfig;
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use tracing::debug;

use crate::error::ClientError;

/// Everything an interceptor may rewrite before a request is sent.
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub url: Url,
    pub headers: HeaderMap,
    /// Appended to the URL's query string at send time.
    pub query: Vec<(String, String)>,
}

impl RequestParts {
    /// Final URL with query parameters applied.
    pub fn into_url(self) -> Url {
        let mut url = self.url;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        url
    }
}

pub type RequestInterceptor = Arc<dyn Fn(RequestParts) -> RequestParts + Send + Sync>;
pub type ErrorInterceptor = Arc<dyn Fn(ClientError) -> ClientError + Send + Sync>;

/// Connection settings shared by every relay request.
#[derive(Clone)]
pub struct HttpConfig {
    pub base_url: String,
    pub headers: HeaderMap,
    request_interceptors: Vec<RequestInterceptor>,
    error_interceptors: Vec<ErrorInterceptor>,
}

impl std::fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConfig")
            .field("base_url", &self.base_url)
            .field("headers", &self.headers)
            .field("request_interceptors", &self.request_interceptors.len())
            .field("error_interceptors", &self.error_interceptors.len())
            .finish()
    }
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            headers: HeaderMap::new(),
            request_interceptors: Vec::new(),
            error_interceptors: Vec::new(),
        }
    }

    /// Build from the `client` settings section, attaching the auth token if set.
    pub fn from_client_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let mut http = Self::new(&config.relay_url);
        if let Some(token) = config.auth_token.as_deref().filter(|t| !t.is_empty()) {
            http = http.with_request_interceptor(bearer_token(token)?);
        }
        Ok(http)
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_request_interceptor(
        mut self,
        interceptor: impl Fn(RequestParts) -> RequestParts + Send + Sync + 'static,
    ) -> Self {
        self.request_interceptors.push(Arc::new(interceptor));
        self
    }

    #[must_use]
    pub fn with_error_interceptor(
        mut self,
        interceptor: impl Fn(ClientError) -> ClientError + Send + Sync + 'static,
    ) -> Self {
        self.error_interceptors.push(Arc::new(interceptor));
        self
    }
}

/// Interceptor that sets `Authorization: Bearer <token>`.
pub fn bearer_token(
    token: &str,
) -> Result<impl Fn(RequestParts) -> RequestParts + Send + Sync + 'static, ClientError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| ClientError::InvalidHeader(e.to_string()))?;
    value.set_sensitive(true);
    Ok(move |mut parts: RequestParts| {
        parts.headers.insert(AUTHORIZATION, value.clone());
        parts
    })
}

/// Relay HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self, ClientError> {
        // reqwest is built with rustls-no-provider; `Err` means already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        Ok(Self {
            http: reqwest::Client::builder().build()?,
            config,
        })
    }

    pub const fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Resolve `path` against the base URL and run the request interceptors.
    pub fn prepare(&self, path: &str) -> Result<RequestParts, ClientError> {
        let joined = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let url = Url::parse(&joined).map_err(|e| ClientError::InvalidUrl(format!("{joined}: {e}")))?;
        let parts = RequestParts {
            url,
            headers: self.config.headers.clone(),
            query: Vec::new(),
        };
        Ok(self
            .config
            .request_interceptors
            .iter()
            .fold(parts, |parts, interceptor| interceptor(parts)))
    }

    /// Run the error interceptors over `err`.
    pub fn intercept_error(&self, err: ClientError) -> ClientError {
        self.config
            .error_interceptors
            .iter()
            .fold(err, |err, interceptor| interceptor(err))
    }

    /// POST a JSON body and return the response once its status is known to
    /// be a success.
    pub async fn post_json<T>(&self, path: &str, body: &T) -> Result<reqwest::Response, ClientError>
    where
        T: Serialize + ?Sized,
    {
        self.send_json(path, body)
            .await
            .map_err(|e| self.intercept_error(e))
    }

    async fn send_json<T>(&self, path: &str, body: &T) -> Result<reqwest::Response, ClientError>
    where
        T: Serialize + ?Sized,
    {
        let parts = self.prepare(path)?;
        let headers = parts.headers.clone();
        let url = parts.into_url();
        debug!(url = %url, "POST");

        let response = self
            .http
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }
        Ok(response)
    }
}
