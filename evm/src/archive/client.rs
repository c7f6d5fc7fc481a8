use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use error_stack::{Report, Result, ResultExt};
use evm_source_observability::{KeyValue, RecordRequest, RequestMetrics};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveClientError {
    /// The request couldn't be sent or the connection failed.
    Request,
    Timeout,
    /// The gateway answered with an error status.
    Status(u16),
    Deserialize,
    Configuration,
}

/// HTTP client for the archive gateway.
#[derive(Clone)]
pub struct ArchiveHttpClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
    post_retry: ConstantBuilder,
    metrics: RequestMetrics,
}

impl ArchiveHttpClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ArchiveClientError> {
        let client = Client::builder()
            .build()
            .change_context(ArchiveClientError::Configuration)
            .attach_printable("failed to build http client")?;

        Ok(Self {
            client,
            base_url,
            timeout,
            post_retry: ConstantBuilder::default()
                .with_delay(Duration::from_secs(1))
                .with_max_times(2),
            metrics: RequestMetrics::new("evm_source_archive", "archive.request"),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves `path` against the base url. Absolute urls are returned as is.
    pub fn resolve(&self, path: &str) -> Result<Url, ArchiveClientError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path)
                .change_context(ArchiveClientError::Configuration)
                .attach_printable_lazy(|| format!("invalid url: {path}"));
        }

        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{base}/{path}"))
            .change_context(ArchiveClientError::Configuration)
            .attach_printable_lazy(|| format!("invalid path: {path}"))
    }

    pub async fn get_text(&self, path: &str) -> Result<String, ArchiveClientError> {
        let url = self.resolve(path)?;

        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .record_request_with_attributes(
                self.metrics.clone(),
                &[KeyValue::new("method", "GET")],
            )
            .await;

        let response = check_response(response, &url)?;

        response
            .text()
            .await
            .change_context(ArchiveClientError::Request)
            .attach_printable_lazy(|| format!("url: {url}"))
    }

    /// Posts `body` as JSON, retrying retryable failures a couple of times.
    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, ArchiveClientError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.resolve(url)?;

        let request = || async {
            let response = self
                .client
                .post(url.clone())
                .json(body)
                .timeout(self.timeout)
                .send()
                .record_request_with_attributes(
                    self.metrics.clone(),
                    &[KeyValue::new("method", "POST")],
                )
                .await;

            let response = check_response(response, &url)?;

            let bytes = response
                .bytes()
                .await
                .change_context(ArchiveClientError::Request)
                .attach_printable_lazy(|| format!("url: {url}"))?;

            serde_json::from_slice::<T>(&bytes)
                .change_context(ArchiveClientError::Deserialize)
                .attach_printable_lazy(|| format!("url: {url}"))
        };

        request
            .retry(self.post_retry)
            .when(|err: &Report<ArchiveClientError>| err.current_context().is_retryable())
            .notify(|err: &Report<ArchiveClientError>, pause: Duration| {
                warn!(%url, ?pause, error = %err.current_context(), "retrying archive request");
            })
            .await
    }
}

fn check_response(
    response: std::result::Result<reqwest::Response, reqwest::Error>,
    url: &Url,
) -> Result<reqwest::Response, ArchiveClientError> {
    let response = match response {
        Ok(response) => response,
        Err(err) if err.is_timeout() => {
            return Err(err)
                .change_context(ArchiveClientError::Timeout)
                .attach_printable_lazy(|| format!("url: {url}"));
        }
        Err(err) => {
            return Err(err)
                .change_context(ArchiveClientError::Request)
                .attach_printable_lazy(|| format!("url: {url}"));
        }
    };

    let status = response.status();
    if !status.is_success() {
        return Err(ArchiveClientError::Status(status.as_u16()))
            .attach_printable_lazy(|| format!("url: {url}"));
    }

    Ok(response)
}

impl ArchiveClientError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ArchiveClientError::Request | ArchiveClientError::Timeout => true,
            ArchiveClientError::Status(status) => matches!(
                StatusCode::from_u16(*status),
                Ok(StatusCode::TOO_MANY_REQUESTS
                    | StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT)
            ),
            ArchiveClientError::Deserialize | ArchiveClientError::Configuration => false,
        }
    }
}

impl error_stack::Context for ArchiveClientError {}

impl std::fmt::Display for ArchiveClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveClientError::Request => write!(f, "archive client error: request failed"),
            ArchiveClientError::Timeout => write!(f, "archive client error: request timed out"),
            ArchiveClientError::Status(status) => {
                write!(f, "archive client error: unexpected status {status}")
            }
            ArchiveClientError::Deserialize => {
                write!(f, "archive client error: failed to deserialize response")
            }
            ArchiveClientError::Configuration => write!(f, "archive client error: configuration"),
        }
    }
}
