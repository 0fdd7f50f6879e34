//! Outbound HTTP.
//!
//! - [`Fetcher`]: async GET returning a status code and body
//! - [`HttpFetcher`]: the `reqwest` implementation with browser-like headers
//! - [`RetryFetcher`]: decorator that backs off on HTTP 429

mod retry;

pub use retry::RetryFetcher;

use crate::error::FetchError;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, REFERER};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

pub const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 ",
    "(KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
);

const ACCEPT_HTML: &str = concat!(
    "text/html,application/xhtml+xml,application/xml;q=0.9,",
    "application/json;q=0.8,*/*;q=0.7"
);

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A GET request with the per-site headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub referer: Option<String>,
    pub accept_language: Option<String>,
    pub bearer_token: Option<String>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            referer: None,
            accept_language: None,
            bearer_token: None,
        }
    }

    pub fn with_referer(mut self, referer: &str) -> Self {
        self.referer = Some(referer.to_string());
        self
    }

    pub fn with_accept_language(mut self, value: &str) -> Self {
        self.accept_language = Some(value.to_string());
        self
    }

    pub fn with_bearer_token(mut self, token: Option<&str>) -> Self {
        self.bearer_token = token.map(str::to_string);
        self
    }
}

/// Any status code, including errors, is a response; only transport failures are `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Async GET.
pub trait Fetcher {
    async fn get(&self, req: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

impl<T: Fetcher> Fetcher for &T {
    async fn get(&self, req: &FetchRequest) -> Result<FetchResponse, FetchError> {
        (**self).get(req).await
    }
}

/// `reqwest`-backed fetcher with a fixed timeout and a desktop browser User-Agent.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(url = %req.url))]
    async fn get(&self, req: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let t0 = Instant::now();
        let mut builder = self.client.get(&req.url).header(ACCEPT, ACCEPT_HTML);
        if let Some(referer) = &req.referer {
            builder = builder.header(REFERER, referer);
        }
        if let Some(lang) = &req.accept_language {
            builder = builder.header(ACCEPT_LANGUAGE, lang);
        }
        if let Some(token) = &req.bearer_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;

        debug!(
            status,
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "GET completed"
        );
        Ok(FetchResponse { status, body })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        warn!(error = %e, "request timed out");
        FetchError::Timeout
    } else {
        FetchError::Transport(e.to_string())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory fetcher. Unknown URLs answer 404; the request log records
    /// every URL asked for, in order.
    #[derive(Debug, Default)]
    pub struct StubFetcher {
        routes: HashMap<String, Result<FetchResponse, FetchError>>,
        log: Mutex<Vec<String>>,
    }

    impl StubFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_page(mut self, url: &str, status: u16, body: &str) -> Self {
            self.routes.insert(
                url.to_string(),
                Ok(FetchResponse {
                    status,
                    body: body.to_string(),
                }),
            );
            self
        }

        pub fn with_error(mut self, url: &str, error: FetchError) -> Self {
            self.routes.insert(url.to_string(), Err(error));
            self
        }

        pub fn requests(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        pub fn request_count(&self, url: &str) -> usize {
            self.log.lock().unwrap().iter().filter(|u| *u == url).count()
        }
    }

    impl Fetcher for StubFetcher {
        async fn get(&self, req: &FetchRequest) -> Result<FetchResponse, FetchError> {
            self.log.lock().unwrap().push(req.url.clone());
            self.routes.get(&req.url).cloned().unwrap_or(Ok(FetchResponse {
                status: 404,
                body: String::new(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StubFetcher;
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = FetchRequest::new("https://example.com/a")
            .with_referer("https://example.com")
            .with_accept_language("en-US")
            .with_bearer_token(Some("tok"));
        assert_eq!(req.referer.as_deref(), Some("https://example.com"));
        assert_eq!(req.accept_language.as_deref(), Some("en-US"));
        assert_eq!(req.bearer_token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_stub_fetcher_logs_and_defaults_to_404() {
        let stub = StubFetcher::new().with_page("https://example.com/", 200, "<html></html>");
        let ok = stub.get(&FetchRequest::new("https://example.com/")).await.unwrap();
        assert!(ok.is_ok());
        let missing = stub.get(&FetchRequest::new("https://example.com/nope")).await.unwrap();
        assert_eq!(missing.status, 404);
        assert_eq!(stub.requests().len(), 2);
    }

    #[test]
    fn test_http_fetcher_builds() {
        assert!(HttpFetcher::new(DEFAULT_TIMEOUT).is_ok());
    }
}
