/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Outbound I/O used by the reporter: fetching the config resource and posting
//! reports to the collector.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use url::Url;

/// Matches the request timeout the collector is provisioned for.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundError {
    UnsupportedScheme(String),
    Network(String),
    /// Non-2xx answer, with whatever body came back with it.
    HttpStatus { status: u16, body: String },
    Body(String),
    Io(String),
}

impl std::fmt::Display for OutboundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedScheme(scheme) => write!(f, "unsupported scheme '{scheme}'"),
            Self::Network(e) => write!(f, "network error: {e}"),
            Self::HttpStatus { status, .. } => write!(f, "HTTP status {status}"),
            Self::Body(e) => write!(f, "failed to read response body: {e}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for OutboundError {}

pub trait Outbound: Send + Sync {
    /// Fetch a text resource (the reporter config).
    fn fetch_text(&self, url: &Url) -> Result<String, OutboundError>;

    /// POST a JSON body and return the response body.
    fn post_json(&self, url: &Url, body: String) -> Result<String, OutboundError>;
}

/// reqwest-backed outbound I/O. `file:` URLs are read from disk.
pub struct HttpOutbound {
    client: Client,
}

impl HttpOutbound {
    pub fn new(timeout: Duration) -> Result<Self, OutboundError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OutboundError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    fn read_response(response: reqwest::blocking::Response) -> Result<String, OutboundError> {
        let status = response.status();
        if !status.is_success() {
            // Collectors explain refusals in the body, so keep it.
            return Err(OutboundError::HttpStatus {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        response
            .text()
            .map_err(|e| OutboundError::Body(e.to_string()))
    }
}

impl Outbound for HttpOutbound {
    fn fetch_text(&self, url: &Url) -> Result<String, OutboundError> {
        match url.scheme() {
            "http" | "https" => {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .map_err(|e| OutboundError::Network(e.to_string()))?;
                Self::read_response(response)
            }
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|()| OutboundError::Io(format!("not a local path: {url}")))?;
                std::fs::read_to_string(path).map_err(|e| OutboundError::Io(e.to_string()))
            }
            other => Err(OutboundError::UnsupportedScheme(other.to_owned())),
        }
    }

    fn post_json(&self, url: &Url, body: String) -> Result<String, OutboundError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(OutboundError::UnsupportedScheme(url.scheme().to_owned()));
        }
        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .map_err(|e| OutboundError::Network(e.to_string()))?;
        Self::read_response(response)
    }
}
