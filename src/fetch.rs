//! # Weather Data Fetching
//!
//! This module issues the single GET against the OpenWeatherMap "current
//! weather" endpoint, streams the body through a [`ResponseAccumulator`] and
//! feeds the result to the extractor.
//!
//! ## Data Source
//!
//! - **URL**: `<endpoint>/data/2.5/weather?q=<city>,<country>&appid=<key>&units=metric`
//! - **Transport**: plain HTTP by default, 5 second overall timeout
//! - **Format**: JSON, see [`crate::extractor`]
//!
//! ## Error Handling
//!
//! Nothing here is retried and nothing propagates: each failure becomes a
//! [`FetchOutcome`] plus a log line, and the record keeps its previous values.
//! - **Transport failures**: connect errors, timeouts, allocation failure
//! - **HTTP errors**: any status other than 200
//! - **Empty body**: status 200 but nothing accumulated (including chunked
//!   transfer encoding, which is deliberately not accumulated)
//! - **Parse failures**: body is not JSON

use crate::accumulator::ResponseAccumulator;
use crate::config::WeatherConfig;
use crate::credentials::Credentials;
use crate::extractor::{extract, ExtractOutcome};
use crate::WeatherRecord;
use log::{debug, error, info};
use reqwest::header::{HeaderMap, TRANSFER_ENCODING};
use std::time::Duration;
use thiserror::Error;

const WEATHER_PATH: &str = "/data/2.5/weather";

/// Why a request produced no usable body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// Connection, protocol or body-read error
    #[error("request failed: {0}")]
    Request(String),

    /// Overall request timeout elapsed
    #[error("request timed out")]
    Timeout,

    /// Response buffer could not grow
    #[error("response buffer allocation failed")]
    Allocation,

    /// Status 200 without an accumulated body
    #[error("empty response body")]
    EmptyBody,
}

/// Result of one fetch-and-apply cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Body parsed and applied to the record
    Applied,
    /// Server answered with a status other than 200
    HttpError(u16),
    /// No usable body
    TransportError(TransportFailure),
    /// Body is not JSON
    ParseError,
}

/// Minimal HTTP GET seam.
///
/// Implementations deliver body bytes to `body` as they arrive, except for
/// chunked-transfer responses, and return the status code.
#[allow(async_fn_in_trait)]
pub trait HttpTransport {
    async fn get(
        &self,
        url: &str,
        timeout: Duration,
        body: &mut ResponseAccumulator,
    ) -> Result<u16, TransportFailure>;
}

/// Production transport on top of `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(reqwest::Client::builder().build()?))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        timeout: Duration,
        body: &mut ResponseAccumulator,
    ) -> Result<u16, TransportFailure> {
        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_failure)?;
        let status = response.status().as_u16();

        if is_chunked(response.headers()) {
            debug!(target: "Fetch", "Chunked response, body not accumulated");
            return Ok(status);
        }

        while let Some(chunk) = response.chunk().await.map_err(transport_failure)? {
            debug!(target: "Fetch", "HTTP data, len={}", chunk.len());
            body.on_chunk(&chunk).map_err(|e| {
                error!(target: "Fetch", "{}", e);
                TransportFailure::Allocation
            })?;
        }
        Ok(status)
    }
}

fn transport_failure(e: reqwest::Error) -> TransportFailure {
    if e.is_timeout() {
        TransportFailure::Timeout
    } else {
        TransportFailure::Request(e.to_string())
    }
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get(TRANSFER_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false)
}

/// Request URL with every templated component percent-encoded.
pub fn build_url(endpoint: &str, credentials: &Credentials) -> String {
    format!(
        "{}{}?q={},{}&appid={}&units=metric",
        endpoint.trim_end_matches('/'),
        WEATHER_PATH,
        urlencoding::encode(&credentials.city),
        urlencoding::encode(&credentials.country),
        urlencoding::encode(&credentials.api_key),
    )
}

/// Fetch current conditions and apply them to `record`.
///
/// The body buffer lives only for this call and is released on every path.
pub async fn fetch_and_apply<T: HttpTransport>(
    transport: &T,
    config: &WeatherConfig,
    credentials: &Credentials,
    record: &mut WeatherRecord,
) -> FetchOutcome {
    let url = build_url(&config.endpoint, credentials);
    let mut body = ResponseAccumulator::new();

    info!(
        target: "Fetch",
        "HTTP GET {}{}?q={},{}",
        config.endpoint.trim_end_matches('/'),
        WEATHER_PATH,
        credentials.city,
        credentials.country
    );

    let status = match transport.get(&url, config.timeout(), &mut body).await {
        Ok(status) => status,
        Err(failure) => {
            error!(target: "Fetch", "HTTP GET request failed: {}", failure);
            return FetchOutcome::TransportError(failure);
        }
    };
    info!(target: "Fetch", "HTTP GET Status = {}", status);

    if status != 200 {
        error!(target: "Fetch", "HTTP GET request failed with status code: {}", status);
        return FetchOutcome::HttpError(status);
    }

    let Some(json) = body.finalize() else {
        error!(target: "Fetch", "Response buffer is empty");
        return FetchOutcome::TransportError(TransportFailure::EmptyBody);
    };
    debug!(target: "Fetch", "Received weather data: {}", String::from_utf8_lossy(&json));

    match extract(record, &json) {
        ExtractOutcome::Parsed => FetchOutcome::Applied,
        ExtractOutcome::MalformedInput => FetchOutcome::ParseError,
    }
}
