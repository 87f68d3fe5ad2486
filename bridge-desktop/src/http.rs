//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse},
};
use reqwest::Client;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("audiobook-core/", env!("CARGO_PKG_VERSION"));

/// Reqwest-based HTTP client implementation
///
/// Provides single-attempt HTTP operations with:
/// - Connection pooling via reqwest
/// - TLS support by default
/// - Transport failures mapped onto the transient `BridgeError` variants
///
/// Non-2xx responses are returned as-is; interpreting them is up to the caller.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a new HTTP client with a default per-request timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });

        Self { client }
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Convert bridge HttpMethod to reqwest Method
    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }

    /// Build reqwest request from bridge request
    fn build_request(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if let Some(body) = request.body {
            req = req.body(body);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        req
    }
}

/// Map a reqwest failure onto the bridge error taxonomy.
fn classify(error: &reqwest::Error) -> BridgeError {
    let detail = error_chain(error);

    if error.is_timeout() {
        BridgeError::Timeout(detail)
    } else if error.is_connect() {
        if looks_like_dns_failure(&detail) {
            BridgeError::DnsFailure(detail)
        } else {
            BridgeError::ConnectionRefused(detail)
        }
    } else if error.is_builder() {
        BridgeError::OperationFailed(detail)
    } else if error.is_decode() {
        BridgeError::InvalidResponse(detail)
    } else {
        BridgeError::Io(std::io::Error::other(detail))
    }
}

fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn looks_like_dns_failure(detail: &str) -> bool {
    let detail = detail.to_ascii_lowercase();
    detail.contains("dns")
        || detail.contains("failed to lookup address")
        || detail.contains("name or service not known")
        || detail.contains("no such host")
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(method = ?request.method, url = %request.url, "Executing HTTP request");

        let response = self.build_request(request).send().await.map_err(|e| {
            let error = classify(&e);
            warn!(error = %error, "HTTP request failed");
            error
        })?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let body = response.bytes().await.map_err(|e| classify(&e))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
