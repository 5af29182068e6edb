//! HTTP transport seam.
//!
//! The fetch pipeline only needs plain GETs, so the seam is a single async
//! method. [`ReqwestTransport`] is the production implementation;
//! [`crate::mock::MockTransport`] serves canned responses.

use async_trait::async_trait;
use bytes::Bytes;
use eduvpn_core::TransportConfig;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::TransportError;

pub const ACCEPT_JSON: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: Url,
    /// Send `Accept: application/json`
    pub accept_json: bool,
}

impl HttpRequest {
    pub fn json(url: Url) -> Self {
        Self {
            url,
            accept_json: true,
        }
    }

    pub fn plain(url: Url) -> Self {
        Self {
            url,
            accept_json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Converts a non-2xx response into [`TransportError::Status`].
    pub fn error_for_status(self) -> Result<Self, TransportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransportError::Status {
                url: self.url.to_string(),
                status: self.status,
            })
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issues a GET. Implementations report non-2xx responses as
    /// [`TransportError::Status`].
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `reqwest` backed transport with a per-request timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }

        let client = builder.build().map_err(|e| TransportError::Client {
            reason: e.to_string(),
        })?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(url: &Url, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransportError::Network {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url;
        let mut builder = self.client.get(url.clone());
        if request.accept_json {
            builder = builder.header(reqwest::header::ACCEPT, ACCEPT_JSON);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(&url, e))?;

        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "GET completed");

        Ok(HttpResponse {
            url,
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> HttpResponse {
        HttpResponse {
            url: Url::parse("https://disco.eduvpn.org/v2/server_list.json").unwrap(),
            status,
            content_type: Some(ACCEPT_JSON.to_string()),
            body: Bytes::from_static(b"{}"),
        }
    }

    #[test]
    fn test_error_for_status() {
        assert!(response(200).error_for_status().is_ok());
        assert!(response(204).error_for_status().is_ok());
        assert_eq!(
            response(404).error_for_status(),
            Err(TransportError::Status {
                url: "https://disco.eduvpn.org/v2/server_list.json".to_string(),
                status: 404
            })
        );
        assert!(response(301).error_for_status().is_err());
    }

    #[test]
    fn test_request_constructors() {
        let url = Url::parse("https://example.org/a.minisig").unwrap();
        assert!(HttpRequest::json(url.clone()).accept_json);
        assert!(!HttpRequest::plain(url).accept_json);
    }

    #[test]
    fn test_reqwest_transport_builds_from_config() {
        let config = TransportConfig {
            timeout_secs: 3,
            user_agent: Some("eduVPN/3.0".to_string()),
        };
        assert!(ReqwestTransport::new(&config).is_ok());
    }
}
