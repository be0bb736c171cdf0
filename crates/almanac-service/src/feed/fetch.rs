//! Conditional retrieval of published calendar feeds.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};

use almanac_core::config::SyncConfig;

use crate::error::FetchError;

/// Validators from the previous successful fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub etag: Option<&'a str>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedBody {
    pub text: String,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResponse {
    NotModified,
    Body(FeedBody),
}

pub trait FeedFetcher: Send + Sync {
    fn fetch(
        &self,
        request: FetchRequest<'_>,
    ) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send;
}

/// Rewrites `webcal://` subscription links to `https://`.
#[must_use]
pub fn normalize_feed_url(url: &str) -> String {
    let trimmed = url.trim();
    match trimmed.get(..9) {
        Some(scheme) if scheme.eq_ignore_ascii_case("webcal://") => {
            format!("https://{}", &trimmed[9..])
        }
        _ => trimmed.to_owned(),
    }
}

/// RFC 1123 date as sent in `If-Modified-Since`.
#[must_use]
pub fn http_date(instant: DateTime<Utc>) -> String {
    instant.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|instant| instant.with_timezone(&Utc))
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// ## Summary
    /// Builds a client with the configured timeout and user agent.
    ///
    /// ## Errors
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(config: &SyncConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

fn classify(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else if error.is_connect() {
        FetchError::Connection(error.to_string())
    } else {
        FetchError::Client(error)
    }
}

impl FeedFetcher for HttpFetcher {
    #[tracing::instrument(skip_all, fields(url = %request.url))]
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchResponse, FetchError> {
        let url = normalize_feed_url(request.url);
        let mut builder = self.client.get(&url);
        if let Some(etag) = request.etag {
            builder = builder.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = request.last_modified {
            builder = builder.header(IF_MODIFIED_SINCE, http_date(last_modified));
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        tracing::debug!(status = status.as_u16(), "Feed responded");

        match status {
            StatusCode::NOT_MODIFIED => return Ok(FetchResponse::NotModified),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(FetchError::PermissionDenied(status.as_u16()));
            }
            StatusCode::NOT_FOUND => return Err(FetchError::NotFound),
            s if !s.is_success() => return Err(FetchError::Http(s.as_u16())),
            _ => {}
        }

        let headers = response.headers();
        if let Some(content_type) = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            && content_type.to_ascii_lowercase().contains("text/html")
        {
            return Err(FetchError::NotCalendar(content_type.to_owned()));
        }
        let etag = headers
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let last_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date);

        let text = response.text().await.map_err(classify)?;

        Ok(FetchResponse::Body(FeedBody {
            text,
            etag,
            last_modified,
        }))
    }
}
