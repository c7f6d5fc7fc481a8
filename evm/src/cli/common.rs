use std::{io::Write, sync::Arc, time::Duration};

use backon::ExponentialBuilder;
use clap::Args;
use error_stack::ResultExt;
use evm_source_common::{BlockRange, RangeRequest};
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use crate::{
    error::{DataSourceError, Result},
    model::{DataRequest, LogRequest, StateDiffRequest, TraceRequest, TransactionRequest},
    rpc::{HttpRpcTransport, HttpRpcTransportOptions, RpcDataSource, RpcDataSourceOptions},
};

#[derive(Args, Debug, Clone)]
pub struct RpcArgs {
    /// EVM node RPC URL.
    #[arg(long, env = "EVM_RPC_URL")]
    pub rpc_url: String,
    /// Request timeout, in seconds.
    #[arg(long, env = "EVM_RPC_TIMEOUT_SEC", default_value = "20")]
    pub rpc_timeout_sec: u64,
    /// Headers to send with the requests, as `name:value`.
    #[arg(long, env = "EVM_RPC_HEADERS")]
    pub rpc_headers: Vec<String>,
    /// RPC rate limit, in requests per second.
    #[arg(long, env = "EVM_RPC_RATE_LIMIT")]
    pub rpc_rate_limit: Option<u32>,
    /// How many concurrent requests to send.
    #[arg(long, env = "EVM_RPC_CONCURRENCY", default_value = "100")]
    pub rpc_concurrency: usize,
    /// Maximum number of calls in a single batch request.
    #[arg(long, env = "EVM_RPC_MAX_BATCH_CALL_SIZE", default_value = "100")]
    pub rpc_max_batch_call_size: usize,

    /// Number of blocks below the head considered final.
    #[arg(long, env = "EVM_FINALITY_CONFIRMATION", default_value = "75")]
    pub finality_confirmation: u64,
    /// Number of blocks fetched by a single stride.
    #[arg(long, env = "EVM_STRIDE_SIZE", default_value = "10")]
    pub stride_size: u64,
    /// Number of strides fetched concurrently.
    #[arg(long, env = "EVM_STRIDE_CONCURRENCY", default_value = "5")]
    pub stride_concurrency: usize,
    /// How often to poll the chain head, in milliseconds.
    #[arg(long, env = "EVM_POLL_INTERVAL_MS", default_value = "1000")]
    pub poll_interval_ms: u64,
    /// Use `trace_replayBlockTransactions` instead of `debug_traceBlockByHash` for traces.
    #[arg(long, env = "EVM_USE_TRACE_API")]
    pub use_trace_api: bool,
    /// Use the debug prestate tracer instead of trace replays for state diffs.
    #[arg(long, env = "EVM_USE_DEBUG_API_FOR_STATE_DIFFS")]
    pub use_debug_api_for_state_diffs: bool,
    /// Don't check whether the node is on a chain with a tracing cutover.
    #[arg(long, env = "EVM_NO_TRACING_SPLIT")]
    pub no_tracing_split: bool,
    /// Fail when the node doesn't replay every transaction of a block.
    #[arg(long, env = "EVM_REQUIRE_ALL_REPLAYS")]
    pub require_all_replays: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// First block to fetch.
    #[arg(long, env = "EVM_FROM_BLOCK", default_value = "0")]
    pub from_block: u64,
    /// Last block to fetch, follow the chain if not set.
    #[arg(long, env = "EVM_TO_BLOCK")]
    pub to_block: Option<u64>,
    /// Data request as JSON. Overrides the item flags.
    #[arg(long, env = "EVM_REQUEST")]
    pub request: Option<String>,
    /// Fetch all transactions.
    #[arg(long)]
    pub transactions: bool,
    /// Fetch all logs.
    #[arg(long)]
    pub logs: bool,
    /// Fetch all traces.
    #[arg(long)]
    pub traces: bool,
    /// Fetch all state diffs.
    #[arg(long)]
    pub state_diffs: bool,
    /// Return blocks without any selected item.
    #[arg(long)]
    pub include_all_blocks: bool,
}

impl RpcArgs {
    pub fn to_rpc_data_source(&self) -> Result<RpcDataSource> {
        let url = self
            .rpc_url
            .parse::<Url>()
            .change_context(DataSourceError::Configuration)
            .attach_printable("failed to parse RPC URL")
            .attach_printable_lazy(|| format!("url: {}", self.rpc_url))?;

        let headers = self.headers()?;

        let timeout = Duration::from_secs(self.rpc_timeout_sec);
        let max_delay = Duration::from_secs(self.rpc_timeout_sec / 2);
        let transport_options = HttpRpcTransportOptions {
            timeout,
            headers,
            rate_limit: self.rpc_rate_limit,
            max_concurrent_requests: self.rpc_concurrency,
            max_batch_call_size: self.rpc_max_batch_call_size,
            exponential_backoff: ExponentialBuilder::default().with_max_delay(max_delay),
        };

        let transport = HttpRpcTransport::new(url, transport_options)
            .change_context(DataSourceError::Configuration)?;

        let mut options = RpcDataSourceOptions::new(self.finality_confirmation)
            .with_stride_size(self.stride_size)
            .with_stride_concurrency(self.stride_concurrency)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_trace_api(self.use_trace_api)
            .with_debug_api_for_state_diffs(self.use_debug_api_for_state_diffs)
            .with_missing_replays_allowed(!self.require_all_replays);

        if self.no_tracing_split {
            options = options.with_tracing_split(None);
        }

        Ok(RpcDataSource::new(Arc::new(transport), options))
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::default();

        for kv in self.rpc_headers.iter() {
            let (key, value) = kv
                .split_once(':')
                .ok_or(DataSourceError::Configuration)
                .attach_printable("invalid header")
                .attach_printable_lazy(|| format!("header: {}", kv))?;

            headers.insert(
                key.trim()
                    .parse::<HeaderName>()
                    .change_context(DataSourceError::Configuration)
                    .attach_printable("invalid header name")
                    .attach_printable_lazy(|| format!("header name: {}", key))?,
                value
                    .trim()
                    .parse::<HeaderValue>()
                    .change_context(DataSourceError::Configuration)
                    .attach_printable("invalid header value")
                    .attach_printable_lazy(|| format!("header value: {}", value))?,
            );
        }

        Ok(headers)
    }
}

impl RequestArgs {
    pub fn to_data_request(&self) -> Result<DataRequest> {
        if let Some(request) = &self.request {
            return serde_json::from_str(request)
                .change_context(DataSourceError::Configuration)
                .attach_printable("failed to parse data request");
        }

        let mut request = DataRequest {
            include_all_blocks: self.include_all_blocks,
            ..Default::default()
        };

        if self.transactions {
            request.transactions.push(TransactionRequest::default());
        }
        if self.logs {
            request.logs.push(LogRequest::default());
        }
        if self.traces {
            request.traces.push(TraceRequest::default());
        }
        if self.state_diffs {
            request.state_diffs.push(StateDiffRequest::default());
        }

        Ok(request)
    }

    pub fn to_range_requests(&self) -> Result<Vec<RangeRequest<DataRequest>>> {
        let range = BlockRange::new(self.from_block, self.to_block);
        range
            .validate()
            .change_context(DataSourceError::Configuration)?;

        Ok(vec![RangeRequest::new(range, self.to_data_request()?)])
    }
}

/// Writes `value` to stdout as a single JSON line.
pub fn print_json_line<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, value)
        .change_context(DataSourceError::Fatal)
        .attach_printable("failed to serialize output")?;
    writeln!(stdout)
        .change_context(DataSourceError::Fatal)
        .attach_printable("failed to write to stdout")
}

/// Calls `f` with every item of `stream` until the stream ends or `ct` is cancelled.
pub async fn consume_stream<S, T, F>(stream: S, ct: CancellationToken, mut f: F) -> Result<()>
where
    S: Stream<Item = Result<T>>,
    F: FnMut(T) -> Result<()>,
{
    let mut stream = std::pin::pin!(stream);

    loop {
        tokio::select! {
            _ = ct.cancelled() => {
                info!("stream cancelled");
                return Ok(());
            }
            item = stream.next() => {
                let Some(item) = item else {
                    return Ok(());
                };
                f(item?)?;
            }
        }
    }
}
