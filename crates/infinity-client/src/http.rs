//! HTTP transport.
//!
//! Wraps two `reqwest` clients sharing a user agent: one for ordinary
//! requests with a total timeout, and one for long-lived streamed responses
//! that only bounds the connect phase.

use crate::config::HttpConfig;
use crate::errors::{StreamError, TransportError};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder};
use tracing::{debug, error, instrument, warn};

/// Media type of JSON bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Media type of server-sent event streams.
pub const CONTENT_TYPE_EVENT_STREAM: &str = "text/event-stream";

/// Raw byte chunks of a streamed response body.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Which properties of a response must hold before it is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validation {
    check_status: bool,
    content_types: &'static [&'static str],
}

impl Validation {
    /// Return any response as-is.
    pub const NONE: Self = Self {
        check_status: false,
        content_types: &[],
    };

    /// Require a 2xx status.
    pub const SUCCESS: Self = Self {
        check_status: true,
        content_types: &[],
    };

    /// Require a 2xx status and a JSON body.
    pub const JSON: Self = Self {
        check_status: true,
        content_types: &[CONTENT_TYPE_JSON],
    };

    /// Require a 2xx status and an event stream body.
    pub const EVENT_STREAM: Self = Self {
        check_status: true,
        content_types: &[CONTENT_TYPE_EVENT_STREAM],
    };

    /// Check a status code and optional `Content-Type` header value.
    ///
    /// # Errors
    ///
    /// - `TransportError::UnexpectedStatus` if the status is outside 200-299
    /// - `TransportError::UnexpectedContentType` if the media type is not accepted
    pub fn check(&self, status: u16, content_type: Option<&str>) -> Result<(), TransportError> {
        if self.check_status && !(200..=299).contains(&status) {
            return Err(TransportError::UnexpectedStatus { status });
        }

        if self.content_types.is_empty() {
            return Ok(());
        }

        let media_type = content_type
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_default();

        if self.content_types.iter().any(|accepted| *accepted == media_type) {
            Ok(())
        } else {
            Err(TransportError::UnexpectedContentType {
                content_type: content_type.unwrap_or_default().to_string(),
            })
        }
    }
}

/// A fully read response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    /// Value of the `Content-Type` header, if present and valid text.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidBody` if the body is not valid JSON for `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::InvalidBody(e.to_string()))
    }
}

/// HTTP transport shared by every component.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    stream_client: Client,
}

impl HttpTransport {
    /// Build the transport.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Client` if either HTTP client cannot be built.
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| {
                error!(target: "infinity.http", error = %e, "Failed to build HTTP client");
                TransportError::Client(e.to_string())
            })?;

        let stream_client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| {
                error!(target: "infinity.http", error = %e, "Failed to build streaming HTTP client");
                TransportError::Client(e.to_string())
            })?;

        Ok(Self {
            client,
            stream_client,
        })
    }

    /// Start a request with the transport's defaults applied.
    #[must_use]
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Start a streamed request; no total timeout applies.
    #[must_use]
    pub fn stream_request(&self, method: Method, url: &str) -> RequestBuilder {
        self.stream_client.request(method, url)
    }

    /// Send a request and read the whole body.
    ///
    /// # Errors
    ///
    /// Returns connectivity errors, and the validation errors described
    /// in [`Validation::check`].
    #[instrument(skip_all)]
    pub async fn send(
        &self,
        request: RequestBuilder,
        validation: Validation,
    ) -> Result<HttpResponse, TransportError> {
        let response = request.send().await.map_err(|e| {
            warn!(target: "infinity.http", error = %e, "HTTP request failed");
            TransportError::from(e)
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            warn!(target: "infinity.http", error = %e, status, "Failed to read response body");
            TransportError::from(e)
        })?;

        let response = HttpResponse {
            status,
            headers,
            body,
        };

        validation.check(status, response.content_type()).map_err(|e| {
            debug!(target: "infinity.http", status, error = %e, "Response failed validation");
            e
        })?;

        Ok(response)
    }

    /// Open a streamed response and return its body as byte chunks.
    ///
    /// # Errors
    ///
    /// - `StreamError::Http` carrying the status of a non-2xx response
    /// - `StreamError::Transport` for connectivity and content-type failures
    #[instrument(skip_all)]
    pub async fn open_stream(
        &self,
        request: RequestBuilder,
        validation: Validation,
    ) -> Result<ByteStream, StreamError> {
        let response = request.send().await.map_err(|e| {
            warn!(target: "infinity.http", error = %e, "Stream request failed");
            StreamError::Transport(TransportError::from(e))
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match validation.check(status, content_type.as_deref()) {
            Ok(()) => {}
            Err(TransportError::UnexpectedStatus { status }) => {
                return Err(StreamError::Http { status });
            }
            Err(e) => return Err(StreamError::Transport(e)),
        }

        debug!(target: "infinity.http", status, "Stream opened");
        Ok(response.bytes_stream().map_err(TransportError::from).boxed())
    }
}
