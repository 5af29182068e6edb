//! In-memory [`HttpTransport`] serving canned responses.
//!
//! Unknown URLs answer with a 404. Every request is recorded so tests can
//! assert on what was fetched and with which headers.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::error::TransportError;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, ACCEPT_JSON};

#[derive(Debug, Clone)]
struct MockRoute {
    outcome: Result<(u16, Bytes), TransportError>,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, MockRoute>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn route(&self, url: &str, route: MockRoute) {
        lock(&self.routes).insert(url.to_string(), route);
    }

    /// Serves `body` with status 200 for `url`.
    pub fn insert(&self, url: &str, body: impl Into<Bytes>) {
        self.route(
            url,
            MockRoute {
                outcome: Ok((200, body.into())),
                delay: None,
            },
        );
    }

    /// Serves `body` for `url` after `delay`.
    pub fn insert_delayed(&self, url: &str, body: impl Into<Bytes>, delay: Duration) {
        self.route(
            url,
            MockRoute {
                outcome: Ok((200, body.into())),
                delay: Some(delay),
            },
        );
    }

    /// Answers `url` with an HTTP status error.
    pub fn insert_status(&self, url: &str, status: u16) {
        self.route(
            url,
            MockRoute {
                outcome: Err(TransportError::Status {
                    url: url.to_string(),
                    status,
                }),
                delay: None,
            },
        );
    }

    /// Fails `url` with the given transport error.
    pub fn insert_error(&self, url: &str, error: TransportError) {
        self.route(
            url,
            MockRoute {
                outcome: Err(error),
                delay: None,
            },
        );
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.url.as_str() == url)
            .count()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn not_found(url: &Url) -> TransportError {
    TransportError::Status {
        url: url.to_string(),
        status: 404,
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        lock(&self.requests).push(request.clone());

        let route = lock(&self.routes).get(request.url.as_str()).cloned();
        let Some(route) = route else {
            return Err(not_found(&request.url));
        };

        if let Some(delay) = route.delay {
            tokio::time::sleep(delay).await;
        }

        let (status, body) = route.outcome?;
        let content_type = request.accept_json.then(|| ACCEPT_JSON.to_string());

        HttpResponse {
            url: request.url,
            status,
            content_type,
            body,
        }
        .error_for_status()
    }
}
