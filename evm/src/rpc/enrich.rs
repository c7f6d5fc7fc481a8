//! Attaches logs, receipts, traces and state diffs to fetched blocks.
use std::{collections::HashMap, ops::Range};

use alloy_primitives::B256;
use error_stack::{Report, ResultExt};
use futures::future::{try_join_all, BoxFuture, FutureExt};
use tracing::debug;

use crate::{
    error::{DataSourceError, Result},
    model::RpcDataRequest,
};

use super::{
    models::{
        Block, DebugFrameResult, DebugStateDiffResult, Log, TraceTracer, TraceTransactionReplay,
        TransactionReceipt,
    },
    options::TracingSplit,
    query::NodeClient,
};

pub const DEFAULT_REPLAY_METHOD: &str = "trace_replayBlockTransactions";

/// A node block plus the data fetched for it.
///
/// Slots are owned by the enrichment step until the block is mapped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    pub block: Block,
    pub logs: Option<Vec<Log>>,
    pub receipts: Option<Vec<TransactionReceipt>>,
    pub trace_replays: Option<Vec<TraceTransactionReplay>>,
    pub debug_frames: Option<Vec<DebugFrameResult>>,
    pub debug_state_diffs: Option<Vec<DebugStateDiffResult>>,
}

/// Which tracing API the node supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingCapabilities {
    pub use_trace_api: bool,
    pub use_debug_api_for_state_diffs: bool,
    /// Set if the chain was identified as one that switched API at a given height.
    pub split: Option<TracingSplit>,
    /// Accept blocks where some transactions have no replay.
    pub allow_missing_replays: bool,
}

/// One fetch issued by the enrichment step.
///
/// `blocks` indexes the (ascending) blocks the subtask covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subtask {
    Logs,
    Receipts,
    Replays {
        method: String,
        tracers: Vec<TraceTracer>,
        blocks: Range<usize>,
    },
    DebugFrames {
        blocks: Range<usize>,
    },
    DebugStateDiffs {
        blocks: Range<usize>,
    },
}

/// Data returned by a subtask, applied to blocks once all subtasks completed.
enum SubtaskOutput {
    Logs(Vec<Vec<Log>>),
    Receipts(Vec<Vec<TransactionReceipt>>),
    Replays(Range<usize>, Vec<Vec<TraceTransactionReplay>>),
    DebugFrames(Range<usize>, Vec<Vec<DebugFrameResult>>),
    DebugStateDiffs(Range<usize>, Vec<Vec<DebugStateDiffResult>>),
}

impl RawBlock {
    pub fn new(block: Block) -> Self {
        Self {
            block,
            logs: None,
            receipts: None,
            trace_replays: None,
            debug_frames: None,
            debug_state_diffs: None,
        }
    }
}

/// Decides which fetches are needed for `request`.
///
/// `heights` are the ascending heights of the blocks being enriched.
pub fn plan_subtasks(
    request: &RpcDataRequest,
    capabilities: &TracingCapabilities,
    heights: &[u64],
) -> Vec<Subtask> {
    let mut subtasks = Vec::new();
    if heights.is_empty() {
        return subtasks;
    }

    if request.logs && !request.receipts {
        subtasks.push(Subtask::Logs);
    }

    if request.receipts {
        subtasks.push(Subtask::Receipts);
    }

    if !request.traces && !request.state_diffs {
        return subtasks;
    }

    let all = 0..heights.len();

    if let Some(split) = capabilities.split.as_ref() {
        let legacy = 0..heights.partition_point(|height| split.is_legacy(*height));
        let debug = heights.partition_point(|height| !split.is_debug(*height))..heights.len();

        if !legacy.is_empty() {
            subtasks.push(Subtask::Replays {
                method: split.legacy_method.clone(),
                tracers: replay_tracers(request.traces, request.state_diffs),
                blocks: legacy,
            });
        }

        if !debug.is_empty() {
            if request.traces {
                subtasks.push(Subtask::DebugFrames {
                    blocks: debug.clone(),
                });
            }
            if request.state_diffs {
                subtasks.push(Subtask::DebugStateDiffs { blocks: debug });
            }
        }

        return subtasks;
    }

    let mut tracers = Vec::new();
    if request.traces {
        if capabilities.use_trace_api {
            tracers.push(TraceTracer::Trace);
        } else {
            subtasks.push(Subtask::DebugFrames {
                blocks: all.clone(),
            });
        }
    }

    if request.state_diffs {
        if capabilities.use_debug_api_for_state_diffs {
            subtasks.push(Subtask::DebugStateDiffs {
                blocks: all.clone(),
            });
        } else {
            tracers.push(TraceTracer::StateDiff);
        }
    }

    if !tracers.is_empty() {
        subtasks.push(Subtask::Replays {
            method: DEFAULT_REPLAY_METHOD.to_string(),
            tracers,
            blocks: all,
        });
    }

    subtasks
}

fn replay_tracers(traces: bool, state_diffs: bool) -> Vec<TraceTracer> {
    let mut tracers = Vec::new();
    if traces {
        tracers.push(TraceTracer::Trace);
    }
    if state_diffs {
        tracers.push(TraceTracer::StateDiff);
    }
    tracers
}

/// Fetches the data requested by `request` for a run of linked blocks.
///
/// Subtasks run concurrently. Their results are validated against the blocks and attached only
/// if all of them succeeded.
pub async fn enrich_blocks(
    client: &NodeClient,
    capabilities: &TracingCapabilities,
    request: &RpcDataRequest,
    blocks: Vec<Block>,
) -> Result<Vec<RawBlock>> {
    let heights = blocks.iter().map(Block::height).collect::<Vec<_>>();
    let subtasks = plan_subtasks(request, capabilities, &heights);

    if !subtasks.is_empty() {
        debug!(
            from = heights.first().copied().unwrap_or_default(),
            to = heights.last().copied().unwrap_or_default(),
            subtasks = subtasks.len(),
            "enriching blocks"
        );
    }

    let outputs = try_join_all(
        subtasks
            .into_iter()
            .map(|subtask| run_subtask(client, capabilities, &blocks, subtask)),
    )
    .await?;

    let mut raw_blocks = blocks.into_iter().map(RawBlock::new).collect::<Vec<_>>();

    for output in outputs {
        match output {
            SubtaskOutput::Logs(logs) => {
                for (block, logs) in raw_blocks.iter_mut().zip(logs) {
                    block.logs = Some(logs);
                }
            }
            SubtaskOutput::Receipts(receipts) => {
                for (block, receipts) in raw_blocks.iter_mut().zip(receipts) {
                    block.receipts = Some(receipts);
                }
            }
            SubtaskOutput::Replays(range, replays) => {
                for (block, replays) in raw_blocks[range].iter_mut().zip(replays) {
                    block.trace_replays = Some(replays);
                }
            }
            SubtaskOutput::DebugFrames(range, frames) => {
                for (block, frames) in raw_blocks[range].iter_mut().zip(frames) {
                    block.debug_frames = Some(frames);
                }
            }
            SubtaskOutput::DebugStateDiffs(range, diffs) => {
                for (block, diffs) in raw_blocks[range].iter_mut().zip(diffs) {
                    block.debug_state_diffs = Some(diffs);
                }
            }
        }
    }

    Ok(raw_blocks)
}

fn run_subtask<'a>(
    client: &'a NodeClient,
    capabilities: &'a TracingCapabilities,
    blocks: &'a [Block],
    subtask: Subtask,
) -> BoxFuture<'a, Result<SubtaskOutput>> {
    async move {
        match subtask {
            Subtask::Logs => fetch_logs(client, blocks).await.map(SubtaskOutput::Logs),
            Subtask::Receipts => fetch_receipts(client, blocks)
                .await
                .map(SubtaskOutput::Receipts),
            Subtask::Replays {
                method,
                tracers,
                blocks: range,
            } => {
                let replays = fetch_replays(
                    client,
                    &blocks[range.clone()],
                    &method,
                    &tracers,
                    capabilities.allow_missing_replays,
                )
                .await?;
                Ok(SubtaskOutput::Replays(range, replays))
            }
            Subtask::DebugFrames { blocks: range } => {
                let frames = fetch_debug_frames(client, &blocks[range.clone()]).await?;
                Ok(SubtaskOutput::DebugFrames(range, frames))
            }
            Subtask::DebugStateDiffs { blocks: range } => {
                let diffs = fetch_debug_state_diffs(client, &blocks[range.clone()]).await?;
                Ok(SubtaskOutput::DebugStateDiffs(range, diffs))
            }
        }
    }
    .boxed()
}

async fn fetch_logs(client: &NodeClient, blocks: &[Block]) -> Result<Vec<Vec<Log>>> {
    let (Some(first), Some(last)) = (blocks.first(), blocks.last()) else {
        return Ok(Vec::new());
    };

    let logs = client.get_logs(first.height(), last.height()).await?;
    group_logs(blocks, logs)
}

/// Groups logs by block hash.
///
/// A block without logs must have an empty logs bloom.
pub fn group_logs(blocks: &[Block], logs: Vec<Log>) -> Result<Vec<Vec<Log>>> {
    let mut by_block = HashMap::<B256, Vec<Log>>::new();
    for log in logs {
        by_block.entry(log.block_hash).or_default().push(log);
    }

    blocks
        .iter()
        .map(|block| {
            let logs = by_block.remove(&block.hash).unwrap_or_default();
            if logs.is_empty() && !block.has_empty_logs_bloom() {
                return Err(DataSourceError::consistency(block.name()))
                    .attach_printable("node returned no logs for a block with a non-empty bloom");
            }
            Ok(logs)
        })
        .collect()
}

async fn fetch_receipts(
    client: &NodeClient,
    blocks: &[Block],
) -> Result<Vec<Vec<TransactionReceipt>>> {
    let Some(first) = blocks.first() else {
        return Ok(Vec::new());
    };

    let transactions = blocks
        .iter()
        .flat_map(Block::transaction_hashes)
        .collect::<Vec<_>>();

    let receipts = client
        .get_receipts(&transactions, first.height())
        .await?;

    group_receipts(blocks, receipts)
}

/// Groups receipts by block hash.
///
/// Each block must have one receipt per transaction, in transaction order.
pub fn group_receipts(
    blocks: &[Block],
    receipts: Vec<Option<TransactionReceipt>>,
) -> Result<Vec<Vec<TransactionReceipt>>> {
    let mut by_block = HashMap::<B256, Vec<TransactionReceipt>>::new();
    for receipt in receipts.into_iter().flatten() {
        by_block.entry(receipt.block_hash).or_default().push(receipt);
    }

    blocks
        .iter()
        .map(|block| {
            let receipts = by_block.remove(&block.hash).unwrap_or_default();
            if receipts.len() != block.transactions.len() {
                return Err(DataSourceError::consistency(block.name()))
                    .attach_printable("receipts count doesn't match transactions count")
                    .attach_printable_lazy(|| {
                        format!("transactions: {}", block.transactions.len())
                    })
                    .attach_printable_lazy(|| format!("receipts: {}", receipts.len()));
            }

            let aligned = receipts
                .iter()
                .zip(block.transaction_hashes())
                .all(|(receipt, hash)| receipt.transaction_hash == hash);
            if !aligned {
                return Err(DataSourceError::consistency(block.name()))
                    .attach_printable("receipts don't match transactions");
            }

            Ok(receipts)
        })
        .collect()
}

async fn fetch_replays(
    client: &NodeClient,
    blocks: &[Block],
    method: &str,
    tracers: &[TraceTracer],
    allow_missing: bool,
) -> Result<Vec<Vec<TraceTransactionReplay>>> {
    let heights = blocks.iter().map(Block::height).collect::<Vec<_>>();
    let replays = client.get_trace_replays(method, &heights, tracers).await?;

    blocks
        .iter()
        .zip(replays)
        .map(|(block, replays)| reconcile_replays(block, replays, allow_missing))
        .collect()
}

/// Links each replay to its transaction.
///
/// Some networks don't replay precompiled contract calls, so replays may be missing when
/// `allow_missing` is set. A replay of a transaction that isn't in the block means the node
/// moved to another branch.
pub fn reconcile_replays(
    block: &Block,
    mut replays: Vec<TraceTransactionReplay>,
    allow_missing: bool,
) -> Result<Vec<TraceTransactionReplay>> {
    let transactions = block.transaction_hashes().collect::<Vec<_>>();

    for replay in replays.iter_mut() {
        let hash = match replay.transaction_hash {
            Some(hash) => hash,
            None => {
                let hash = infer_replay_hash(replay).attach_printable_lazy(|| {
                    format!("block: {}", block.name())
                })?;
                replay.transaction_hash = Some(hash);
                hash
            }
        };

        if !transactions.contains(&hash) {
            return Err(DataSourceError::consistency(block.name()))
                .attach_printable("replay of a transaction not in the block")
                .attach_printable_lazy(|| format!("transaction hash: {hash}"));
        }
    }

    if !allow_missing && replays.len() != transactions.len() {
        return Err(DataSourceError::consistency(block.name()))
            .attach_printable("replays count doesn't match transactions count")
            .attach_printable_lazy(|| format!("transactions: {}", transactions.len()))
            .attach_printable_lazy(|| format!("replays: {}", replays.len()));
    }

    Ok(replays)
}

fn infer_replay_hash(replay: &TraceTransactionReplay) -> Result<B256> {
    let mut hash = None;
    for frame in replay.trace.iter().flatten() {
        let Some(frame_hash) = frame.transaction_hash else {
            return Err(Report::new(DataSourceError::Protocol))
                .attach_printable("trace frame of a replay without transaction hash")
                .attach_printable_lazy(|| format!("trace address: {:?}", frame.trace_address));
        };
        match hash {
            None => hash = Some(frame_hash),
            Some(hash) if hash == frame_hash => {}
            Some(hash) => {
                return Err(Report::new(DataSourceError::Protocol))
                    .attach_printable("trace frames of one replay refer to different transactions")
                    .attach_printable_lazy(|| format!("hashes: {hash}, {frame_hash}"));
            }
        }
    }

    hash.ok_or(DataSourceError::Protocol)
        .attach_printable("can't match transaction replay with its transaction")
}

async fn fetch_debug_frames(
    client: &NodeClient,
    blocks: &[Block],
) -> Result<Vec<Vec<DebugFrameResult>>> {
    let Some(first) = blocks.first() else {
        return Ok(Vec::new());
    };

    let hashes = blocks.iter().map(|block| block.hash).collect::<Vec<_>>();
    let frames = client.get_debug_frames(&hashes, first.height()).await?;

    blocks
        .iter()
        .zip(frames)
        .map(|(block, frames)| check_per_transaction(block, frames, "call frames"))
        .collect()
}

async fn fetch_debug_state_diffs(
    client: &NodeClient,
    blocks: &[Block],
) -> Result<Vec<Vec<DebugStateDiffResult>>> {
    let Some(first) = blocks.first() else {
        return Ok(Vec::new());
    };

    let hashes = blocks.iter().map(|block| block.hash).collect::<Vec<_>>();
    let diffs = client
        .get_debug_state_diffs(&hashes, first.height())
        .await?;

    blocks
        .iter()
        .zip(diffs)
        .map(|(block, diffs)| check_per_transaction(block, diffs, "state diffs"))
        .collect()
}

/// Debug tracer results are positionally aligned with the block transactions.
fn check_per_transaction<T>(block: &Block, items: Vec<T>, what: &str) -> Result<Vec<T>> {
    if items.len() != block.transactions.len() {
        return Err(DataSourceError::consistency(block.name()))
            .attach_printable_lazy(|| format!("{what} count doesn't match transactions count"))
            .attach_printable_lazy(|| format!("transactions: {}", block.transactions.len()))
            .attach_printable_lazy(|| format!("{what}: {}", items.len()));
    }
    Ok(items)
}
