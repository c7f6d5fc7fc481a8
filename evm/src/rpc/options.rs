use std::time::Duration;

use alloy_primitives::{b256, B256};

/// Chains that switched tracing API at a known height.
///
/// Blocks up to `legacy_end` are traced with `legacy_method` (a replay style API), blocks from
/// `debug_start` with the debug API. Blocks in between can't be traced by either API and get
/// no traces nor state diffs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingSplit {
    /// Genesis hash that identifies the chain.
    pub genesis_hash: B256,
    pub legacy_method: String,
    /// Last block served by `legacy_method`.
    pub legacy_end: u64,
    /// First block served by the debug API.
    pub debug_start: u64,
}

#[derive(Debug, Clone)]
pub struct RpcDataSourceOptions {
    /// Number of blocks behind the head considered final.
    pub finality_confirmation: u64,
    /// How often to poll the node for its head.
    pub poll_interval: Duration,
    /// Maximum number of blocks fetched in one batch call by the finalized stream.
    pub stride_size: u64,
    /// Number of strides in flight.
    pub stride_concurrency: usize,
    /// Maximum number of hot blocks enriched together.
    pub hot_chunk_size: usize,
    /// Trace with `trace_replayBlockTransactions` instead of `debug_traceBlockByHash`.
    pub use_trace_api: bool,
    /// Fetch state diffs with the `prestateTracer` instead of replays.
    pub use_debug_api_for_state_diffs: bool,
    pub tracing_split: Option<TracingSplit>,
    /// Accept replays missing for some transactions, as nodes skip precompiled contract calls.
    pub allow_missing_replays: bool,
    /// How many times a hot step is retried after an inconsistency.
    pub consistency_retries: usize,
    pub consistency_retry_pause: Duration,
}

impl TracingSplit {
    /// Arbitrum One switched from `arbtrace_*` to the debug API with the Nitro upgrade. The two
    /// migration blocks are served by neither.
    pub fn arbitrum_one() -> Self {
        Self {
            genesis_hash: b256!(
                "7ee576b35482195fc49205cec9af72ce14f003b9ae69f6ba0faef4514be8b442"
            ),
            legacy_method: "arbtrace_replayBlockTransactions".to_string(),
            legacy_end: 22_207_815,
            debug_start: 22_207_818,
        }
    }

    pub fn is_legacy(&self, height: u64) -> bool {
        height <= self.legacy_end
    }

    pub fn is_debug(&self, height: u64) -> bool {
        height >= self.debug_start
    }
}

impl RpcDataSourceOptions {
    pub fn new(finality_confirmation: u64) -> Self {
        Self {
            finality_confirmation,
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stride_size(mut self, stride_size: u64) -> Self {
        self.stride_size = stride_size.max(1);
        self
    }

    pub fn with_stride_concurrency(mut self, stride_concurrency: usize) -> Self {
        self.stride_concurrency = stride_concurrency.max(1);
        self
    }

    pub fn with_hot_chunk_size(mut self, hot_chunk_size: usize) -> Self {
        self.hot_chunk_size = hot_chunk_size.max(1);
        self
    }

    pub fn with_trace_api(mut self, use_trace_api: bool) -> Self {
        self.use_trace_api = use_trace_api;
        self
    }

    pub fn with_debug_api_for_state_diffs(mut self, enabled: bool) -> Self {
        self.use_debug_api_for_state_diffs = enabled;
        self
    }

    pub fn with_tracing_split(mut self, tracing_split: Option<TracingSplit>) -> Self {
        self.tracing_split = tracing_split;
        self
    }

    pub fn with_missing_replays_allowed(mut self, allowed: bool) -> Self {
        self.allow_missing_replays = allowed;
        self
    }

    pub fn with_consistency_retries(mut self, retries: usize, pause: Duration) -> Self {
        self.consistency_retries = retries;
        self.consistency_retry_pause = pause;
        self
    }
}

impl Default for RpcDataSourceOptions {
    fn default() -> Self {
        Self {
            finality_confirmation: 0,
            poll_interval: Duration::from_millis(1_000),
            stride_size: 10,
            stride_concurrency: 5,
            hot_chunk_size: 20,
            use_trace_api: false,
            use_debug_api_for_state_diffs: false,
            tracing_split: Some(TracingSplit::arbitrum_one()),
            allow_missing_replays: true,
            consistency_retries: 3,
            consistency_retry_pause: Duration::from_millis(200),
        }
    }
}
