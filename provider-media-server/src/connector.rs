//! Media server HTTP connector
//!
//! Implements the `MediaServer` trait. Every call is exactly one HTTP round
//! trip; retrying is left to the playback core.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::server::{MediaServer, NegotiationRequest, PlaybackDecision};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::MediaServerError;
use crate::types::{DecisionResponse, IdentityResponse};

/// Identity endpoint probed during connection selection
const IDENTITY_PATH: &str = "/identity";

/// Playback decision endpoint
const DECISION_PATH: &str = "/audio/:/transcode/universal/decision";

const TOKEN_HEADER: &str = "X-Media-Token";
const CLIENT_HEADER: &str = "X-Media-Client-Identifier";

/// Connector settings.
#[derive(Debug, Clone)]
pub struct ConnectorOptions {
    /// Access token sent with every request
    pub token: Option<String>,
    /// Identifies this client installation to the server
    pub client_identifier: String,
    /// Per-request timeout handed to the HTTP client
    pub request_timeout: Duration,
    /// When set, probes reject servers reporting another machine identifier
    pub expected_machine_identifier: Option<String>,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            token: None,
            client_identifier: "audiobook-core".to_string(),
            request_timeout: Duration::from_secs(10),
            expected_machine_identifier: None,
        }
    }
}

/// HTTP implementation of [`MediaServer`].
///
/// # Example
///
/// ```ignore
/// use provider_media_server::{ConnectorOptions, MediaServerConnector};
///
/// let connector = MediaServerConnector::new(http_client, ConnectorOptions {
///     token: Some(token),
///     ..ConnectorOptions::default()
/// });
/// connector.check_server("https://10-0-0-2.example.direct:32400").await?;
/// ```
pub struct MediaServerConnector {
    http_client: Arc<dyn HttpClient>,
    options: ConnectorOptions,
}

impl MediaServerConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, options: ConnectorOptions) -> Self {
        Self {
            http_client,
            options,
        }
    }

    pub fn options(&self) -> &ConnectorOptions {
        &self.options
    }

    fn request(&self, url: String) -> HttpRequest {
        let mut request = HttpRequest::new(HttpMethod::Get, url)
            .header("Accept", "application/json")
            .header(CLIENT_HEADER, self.options.client_identifier.clone())
            .timeout(self.options.request_timeout);
        if let Some(token) = &self.options.token {
            request = request.header(TOKEN_HEADER, token.clone());
        }
        request
    }

    async fn get(&self, url: String) -> std::result::Result<HttpResponse, MediaServerError> {
        let response = self.http_client.execute(self.request(url)).await?;

        if !response.is_success() {
            warn!(status = response.status, "Media server request failed");
            return Err(MediaServerError::ApiError {
                status_code: response.status,
                message: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        Ok(response)
    }

    fn decision_url(request: &NegotiationRequest) -> String {
        format!(
            "{}{}?path={}&protocol={}&audioBitrate={}&maxAudioBitrate={}&directPlay=1",
            request.server_url.trim_end_matches('/'),
            DECISION_PATH,
            urlencoding::encode(&request.path),
            urlencoding::encode(&request.protocol),
            request.bitrate_hints.preferred_kbps,
            request.bitrate_hints.max_kbps,
        )
    }
}

fn parse<T: serde::de::DeserializeOwned>(
    response: &HttpResponse,
    what: &str,
) -> std::result::Result<T, MediaServerError> {
    serde_json::from_slice(&response.body)
        .map_err(|e| MediaServerError::ParseError(format!("Failed to parse {}: {}", what, e)))
}

#[async_trait]
impl MediaServer for MediaServerConnector {
    #[instrument(skip(self))]
    async fn check_server(&self, uri: &str) -> Result<()> {
        let url = format!("{}{}", uri.trim_end_matches('/'), IDENTITY_PATH);
        let response = self.get(url).await?;
        let identity: IdentityResponse = parse(&response, "server identity")?;

        if let Some(expected) = &self.options.expected_machine_identifier {
            if *expected != identity.machine_identifier {
                return Err(MediaServerError::IdentityMismatch {
                    expected: expected.clone(),
                    actual: identity.machine_identifier,
                }
                .into());
            }
        }

        debug!(
            machine_identifier = %identity.machine_identifier,
            version = ?identity.version,
            "Server reachable"
        );
        Ok(())
    }

    #[instrument(skip(self, request), fields(path = %request.path))]
    async fn negotiate_playback(&self, request: &NegotiationRequest) -> Result<PlaybackDecision> {
        let response = self.get(Self::decision_url(request)).await?;
        let decision: DecisionResponse = parse(&response, "playback decision")?;

        if !decision.is_playable() {
            debug!(reason = ?decision.reason, "Server cannot deliver media");
        }

        Ok(PlaybackDecision {
            playable: decision.is_playable(),
            url: decision.url.filter(|url| !url.trim().is_empty()),
        })
    }
}
