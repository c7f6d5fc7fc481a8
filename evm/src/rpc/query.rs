//! Node RPC fetch primitives.
use std::sync::Arc;

use alloy_primitives::{B256, U64};
use error_stack::ResultExt;
use evm_source_common::FiniteRange;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{DataSourceError, Result};

use super::{
    models::{
        Block, DebugFrameResult, DebugStateDiffResult, Log, TraceTracer, TraceTransactionReplay,
        TransactionReceipt,
    },
    transport::{RpcCall, RpcTransport},
};

/// Typed node queries over a [RpcTransport].
///
/// Batched queries return results in request order.
#[derive(Clone)]
pub struct NodeClient {
    transport: Arc<dyn RpcTransport>,
}

impl NodeClient {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    pub async fn get_head_height(&self) -> Result<u64> {
        let call = RpcCall::new("eth_blockNumber", Vec::<Value>::new());
        let height: U64 = self.call(call, None).await?;
        Ok(height.to::<u64>())
    }

    pub async fn get_block_by_height(
        &self,
        height: u64,
        with_transactions: bool,
    ) -> Result<Option<Block>> {
        self.call(block_by_height_call(height, with_transactions), Some(height))
            .await
    }

    pub async fn get_block_by_hash(
        &self,
        hash: B256,
        with_transactions: bool,
    ) -> Result<Option<Block>> {
        self.call(
            RpcCall::new("eth_getBlockByHash", (hash, with_transactions)),
            None,
        )
        .await
    }

    /// Returns the hash of the block at `height`, if the node has it.
    pub async fn get_block_hash(&self, height: u64) -> Result<Option<B256>> {
        let block = self.get_block_by_height(height, false).await?;
        Ok(block.map(|block| block.hash))
    }

    /// Fetches a contiguous range of blocks in one batch.
    ///
    /// The batch priority is the first height of the range.
    pub async fn get_stride(
        &self,
        range: &FiniteRange,
        with_transactions: bool,
    ) -> Result<Vec<Option<Block>>> {
        let calls = range
            .heights()
            .map(|height| block_by_height_call(height, with_transactions))
            .collect();
        self.batch_call(calls, Some(range.from)).await
    }

    /// Fetches all logs between `from` and `to` (inclusive) in one call.
    pub async fn get_logs(&self, from: u64, to: u64) -> Result<Vec<Log>> {
        let filter = json!({
            "fromBlock": U64::from(from),
            "toBlock": U64::from(to),
        });
        self.call(RpcCall::new("eth_getLogs", [filter]), Some(from))
            .await
    }

    /// Fetches the receipts of the given transactions.
    ///
    /// Receipts of unknown transactions are `None`.
    pub async fn get_receipts(
        &self,
        transactions: &[B256],
        priority: u64,
    ) -> Result<Vec<Option<TransactionReceipt>>> {
        let calls = transactions
            .iter()
            .map(|hash| RpcCall::new("eth_getTransactionReceipt", [hash]))
            .collect();
        self.batch_call(calls, Some(priority)).await
    }

    /// Replays the transactions of the given blocks with `method` (a
    /// `trace_replayBlockTransactions` compatible method).
    pub async fn get_trace_replays(
        &self,
        method: &str,
        heights: &[u64],
        tracers: &[TraceTracer],
    ) -> Result<Vec<Vec<TraceTransactionReplay>>> {
        let calls = heights
            .iter()
            .map(|height| RpcCall::new(method, (U64::from(*height), tracers)))
            .collect();
        self.batch_call(calls, heights.first().copied()).await
    }

    /// Fetches `callTracer` frames of the given blocks.
    pub async fn get_debug_frames(
        &self,
        blocks: &[B256],
        priority: u64,
    ) -> Result<Vec<Vec<DebugFrameResult>>> {
        let config = json!({
            "tracer": "callTracer",
            "tracerConfig": {
                "onlyTopCall": false,
                "withLog": false,
            }
        });
        let results = self
            .debug_trace_blocks(blocks, config, priority)
            .await?;

        results
            .into_iter()
            .map(|frames| deserialize(wrap_results(frames), "debug_traceBlockByHash"))
            .collect()
    }

    /// Fetches `prestateTracer` diffs of the given blocks.
    pub async fn get_debug_state_diffs(
        &self,
        blocks: &[B256],
        priority: u64,
    ) -> Result<Vec<Vec<DebugStateDiffResult>>> {
        let config = json!({
            "tracer": "prestateTracer",
            "tracerConfig": {
                "onlyTopCall": false,
                "diffMode": true,
            }
        });
        let results = self
            .debug_trace_blocks(blocks, config, priority)
            .await?;

        results
            .into_iter()
            .map(|diffs| deserialize(wrap_results(diffs), "debug_traceBlockByHash"))
            .collect()
    }

    async fn debug_trace_blocks(
        &self,
        blocks: &[B256],
        config: Value,
        priority: u64,
    ) -> Result<Vec<Vec<Value>>> {
        let calls = blocks
            .iter()
            .map(|hash| RpcCall::new("debug_traceBlockByHash", (hash, &config)))
            .collect();
        self.batch_call(calls, Some(priority)).await
    }

    async fn call<T: DeserializeOwned>(&self, call: RpcCall, priority: Option<u64>) -> Result<T> {
        let method = call.method.clone();
        let value = self
            .transport
            .call(call, priority)
            .await
            .change_context(DataSourceError::Rpc)?;
        deserialize(value, &method)
    }

    async fn batch_call<T: DeserializeOwned>(
        &self,
        calls: Vec<RpcCall>,
        priority: Option<u64>,
    ) -> Result<Vec<T>> {
        let Some(method) = calls.first().map(|call| call.method.clone()) else {
            return Ok(Vec::new());
        };

        let values = self
            .transport
            .batch_call(calls, priority)
            .await
            .change_context(DataSourceError::Rpc)?;

        values
            .into_iter()
            .map(|value| deserialize(value, &method))
            .collect()
    }
}

fn block_by_height_call(height: u64, with_transactions: bool) -> RpcCall {
    RpcCall::new(
        "eth_getBlockByNumber",
        (U64::from(height), with_transactions),
    )
}

fn deserialize<T: DeserializeOwned>(value: Value, method: &str) -> Result<T> {
    serde_json::from_value(value)
        .change_context(DataSourceError::Protocol)
        .attach_printable("unexpected response from node")
        .attach_printable_lazy(|| format!("method: {method}"))
}

/// Some nodes return tracer results without the `{"result": ..}` envelope.
fn wrap_results(items: Vec<Value>) -> Value {
    items
        .into_iter()
        .map(|item| {
            if item.get("result").is_some() {
                item
            } else {
                json!({ "result": item })
            }
        })
        .collect()
}
