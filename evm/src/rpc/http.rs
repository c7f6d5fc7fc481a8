use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use error_stack::{Report, Result, ResultExt};
use evm_source_observability::{KeyValue, RecordRequest, RequestMetrics};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client, StatusCode,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use url::Url;

use super::{
    gate::PriorityGate,
    transport::{RpcCall, RpcClientError, RpcTransport},
};

#[derive(Debug, Clone)]
pub struct HttpRpcTransportOptions {
    /// Request timeout.
    pub timeout: Duration,
    /// Request headers.
    pub headers: HeaderMap<HeaderValue>,
    /// Maximum number of requests per second.
    pub rate_limit: Option<u32>,
    /// Maximum number of requests in flight.
    pub max_concurrent_requests: usize,
    /// Batches larger than this are split into multiple requests.
    pub max_batch_call_size: usize,
    /// Backoff for retryable failures.
    pub exponential_backoff: ExponentialBuilder,
}

/// JSON-RPC 2.0 over HTTP.
#[derive(Clone)]
pub struct HttpRpcTransport {
    client: Client,
    url: Url,
    options: HttpRpcTransportOptions,
    next_id: Arc<AtomicU64>,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    gate: PriorityGate,
    metrics: RequestMetrics,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
}

impl HttpRpcTransport {
    pub fn new(url: Url, options: HttpRpcTransportOptions) -> Result<Self, RpcClientError> {
        let client = Client::builder()
            .default_headers(options.headers.clone())
            .build()
            .change_context(RpcClientError::Configuration)
            .attach_printable("failed to build http client")?;

        let limiter = options.rate_limit.map(|rate_limit| Arc::new(new_limiter(rate_limit)));

        Ok(Self {
            client,
            url,
            gate: PriorityGate::new(options.max_concurrent_requests),
            options,
            next_id: Arc::new(AtomicU64::new(1)),
            limiter,
            metrics: RequestMetrics::new("evm_source_rpc", "rpc.request"),
        })
    }

    fn next_ids(&self, count: usize) -> u64 {
        self.next_id.fetch_add(count as u64, Ordering::Relaxed)
    }

    /// Sends a JSON-RPC body, retrying retryable failures.
    async fn send(
        &self,
        body: &Value,
        method: &str,
        priority: u64,
    ) -> Result<Value, RpcClientError> {
        let request = || async {
            let _permit = self.gate.acquire(priority).await;
            if let Some(limiter) = self.limiter.as_ref() {
                limiter.until_ready().await;
            }

            self.send_once(body)
                .record_request_with_attributes(
                    self.metrics.clone(),
                    &[KeyValue::new("method", method.to_string())],
                )
                .await
        };

        request
            .retry(self.options.exponential_backoff)
            .when(|err: &Report<RpcClientError>| err.current_context().is_retryable())
            .notify(|err: &Report<RpcClientError>, pause: Duration| {
                warn!(method, ?pause, error = %err.current_context(), "retrying rpc request");
            })
            .await
            .attach_printable_lazy(|| format!("method: {method}"))
    }

    async fn send_once(&self, body: &Value) -> Result<Value, RpcClientError> {
        let response = match self
            .client
            .post(self.url.clone())
            .json(body)
            .timeout(self.options.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return Err(err).change_context(RpcClientError::Timeout);
            }
            Err(err) => {
                return Err(err).change_context(RpcClientError::Request);
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(RpcClientError::Request)
                .attach_printable("node is unavailable")
                .attach_printable_lazy(|| format!("status: {status}"));
        }

        if !status.is_success() {
            return Err(RpcClientError::Rpc {
                code: i64::from(status.as_u16()),
                message: status.to_string(),
            }
            .into());
        }

        response
            .json::<Value>()
            .await
            .change_context(RpcClientError::Deserialize)
    }

    async fn send_batch(
        &self,
        calls: Vec<RpcCall>,
        priority: u64,
    ) -> Result<Vec<Value>, RpcClientError> {
        let first_id = self.next_ids(calls.len());
        let method = calls
            .first()
            .map(|c| c.method.clone())
            .unwrap_or_default();

        let body = Value::Array(
            calls
                .iter()
                .enumerate()
                .map(|(i, call)| request_body(first_id + i as u64, call))
                .collect(),
        );

        let response = self.send(&body, &method, priority).await?;

        let responses: Vec<JsonRpcResponse> = serde_json::from_value(response)
            .change_context(RpcClientError::Deserialize)
            .attach_printable("expected batch response")?;

        if responses.len() != calls.len() {
            return Err(RpcClientError::Deserialize)
                .attach_printable("batch response size doesn't match request size")
                .attach_printable_lazy(|| format!("expected: {}", calls.len()))
                .attach_printable_lazy(|| format!("received: {}", responses.len()));
        }

        let mut results = vec![Value::Null; calls.len()];
        for response in responses {
            let index = response
                .id
                .and_then(|id| id.checked_sub(first_id))
                .map(|offset| offset as usize)
                .filter(|index| *index < calls.len())
                .ok_or(RpcClientError::Deserialize)
                .attach_printable("batch response has an unknown id")?;

            let result = into_result(response)
                .attach_printable_lazy(|| format!("method: {}", calls[index].method))
                .attach_printable_lazy(|| format!("params: {}", calls[index].params))?;
            results[index] = result;
        }

        Ok(results)
    }
}

#[async_trait]
impl RpcTransport for HttpRpcTransport {
    #[tracing::instrument(level = "trace", skip_all, fields(method = %call.method))]
    async fn call(&self, call: RpcCall, priority: Option<u64>) -> Result<Value, RpcClientError> {
        let id = self.next_ids(1);
        let body = request_body(id, &call);

        let response = self
            .send(&body, &call.method, priority.unwrap_or(u64::MAX))
            .await?;

        let response: JsonRpcResponse = serde_json::from_value(response)
            .change_context(RpcClientError::Deserialize)
            .attach_printable_lazy(|| format!("method: {}", call.method))?;

        into_result(response)
            .attach_printable_lazy(|| format!("method: {}", call.method))
            .attach_printable_lazy(|| format!("params: {}", call.params))
    }

    #[tracing::instrument(level = "trace", skip_all, fields(size = calls.len()))]
    async fn batch_call(
        &self,
        calls: Vec<RpcCall>,
        priority: Option<u64>,
    ) -> Result<Vec<Value>, RpcClientError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let priority = priority.unwrap_or(u64::MAX);
        let chunk_size = self.options.max_batch_call_size.max(1);

        let chunks = calls
            .chunks(chunk_size)
            .map(|chunk| self.send_batch(chunk.to_vec(), priority));

        let results = futures::future::try_join_all(chunks).await?;
        Ok(results.into_iter().flatten().collect())
    }
}

fn request_body(id: u64, call: &RpcCall) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": call.method,
        "params": call.params,
    })
}

fn into_result(response: JsonRpcResponse) -> Result<Value, RpcClientError> {
    if let Some(error) = response.error {
        return Err(Report::new(RpcClientError::Rpc {
            code: error.code,
            message: error.message,
        }));
    }

    Ok(response.result.unwrap_or(Value::Null))
}

fn new_limiter(rate_limit: u32) -> DefaultDirectRateLimiter {
    let quota = NonZeroU32::new(rate_limit).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::per_second(quota).allow_burst(quota);
    RateLimiter::direct(quota)
}

impl Default for HttpRpcTransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            headers: HeaderMap::default(),
            rate_limit: None,
            max_concurrent_requests: 64,
            max_batch_call_size: 100,
            exponential_backoff: ExponentialBuilder::default()
                .with_max_times(3)
                .with_max_delay(Duration::from_secs(5)),
        }
    }
}
