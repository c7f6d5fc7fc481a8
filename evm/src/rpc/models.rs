//! Node JSON-RPC models.
use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use evm_source_common::HasHeight;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Logs bloom of a block without logs.
pub const EMPTY_LOGS_BLOOM: [u8; 256] = [0; 256];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub number: U64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: U64,
    #[serde(default)]
    pub miner: Option<Address>,
    #[serde(default)]
    pub gas_used: Option<U256>,
    #[serde(default)]
    pub gas_limit: Option<U256>,
    #[serde(default)]
    pub base_fee_per_gas: Option<U256>,
    #[serde(default)]
    pub difficulty: Option<U256>,
    #[serde(default)]
    pub size: Option<U256>,
    pub logs_bloom: Bytes,
    #[serde(default)]
    pub state_root: Option<B256>,
    #[serde(default)]
    pub transactions_root: Option<B256>,
    #[serde(default)]
    pub receipts_root: Option<B256>,
    #[serde(default)]
    pub extra_data: Option<Bytes>,
    #[serde(default)]
    pub transactions: Vec<BlockTransaction>,
}

/// Either a transaction hash or the full transaction, depending on the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockTransaction {
    Hash(B256),
    Full(Box<Transaction>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: B256,
    pub transaction_index: U64,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    pub gas: U256,
    #[serde(default)]
    pub gas_price: Option<U256>,
    #[serde(default)]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<U256>,
    pub input: Bytes,
    pub nonce: U64,
    pub value: U256,
    #[serde(default, rename = "type")]
    pub type_: Option<U64>,
    #[serde(default)]
    pub chain_id: Option<U64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_hash: B256,
    pub block_number: U64,
    pub transaction_hash: B256,
    pub transaction_index: U64,
    pub log_index: U64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub transaction_index: U64,
    pub block_hash: B256,
    pub block_number: U64,
    pub gas_used: U256,
    pub cumulative_gas_used: U256,
    #[serde(default)]
    pub effective_gas_price: Option<U256>,
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub logs: Vec<Log>,
}

/// Tracers of `trace_replayBlockTransactions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TraceTracer {
    Trace,
    StateDiff,
}

/// Result of replaying one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceTransactionReplay {
    #[serde(default)]
    pub transaction_hash: Option<B256>,
    #[serde(default)]
    pub trace: Option<Vec<TraceFrame>>,
    #[serde(default)]
    pub state_diff: Option<BTreeMap<Address, TraceStateDiff>>,
}

/// Parity style flat trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceFrame {
    #[serde(default)]
    pub transaction_hash: Option<B256>,
    #[serde(default)]
    pub trace_address: Vec<u32>,
    pub subtraces: u32,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub action: TraceAction,
    #[serde(default)]
    pub result: Option<TraceResult>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Union of the actions of all trace types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceAction {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<U256>,
    pub gas: Option<U256>,
    pub input: Option<Bytes>,
    pub call_type: Option<String>,
    /// Create init code.
    pub init: Option<Bytes>,
    /// Suicide: destroyed contract.
    pub address: Option<Address>,
    pub refund_address: Option<Address>,
    pub balance: Option<U256>,
    /// Reward.
    pub author: Option<Address>,
    pub reward_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceResult {
    pub gas_used: Option<U256>,
    pub output: Option<Bytes>,
    /// Create: new contract.
    pub address: Option<Address>,
    pub code: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStateDiff {
    pub balance: TraceDiff,
    pub code: TraceDiff,
    pub nonce: TraceDiff,
    #[serde(default)]
    pub storage: BTreeMap<String, TraceDiff>,
}

/// Change of a value: `"="` unchanged, `{"+": v}`, `{"*": {"from", "to"}}`, `{"-": v}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceDiff {
    Unchanged(String),
    Add {
        #[serde(rename = "+")]
        next: Value,
    },
    Change {
        #[serde(rename = "*")]
        change: TraceDiffChange,
    },
    Delete {
        #[serde(rename = "-")]
        prev: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceDiffChange {
    pub from: Value,
    pub to: Value,
}

/// `callTracer` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugFrame {
    #[serde(rename = "type")]
    pub type_: String,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub value: Option<U256>,
    #[serde(default)]
    pub gas: Option<U256>,
    #[serde(default)]
    pub gas_used: Option<U256>,
    #[serde(default)]
    pub input: Option<Bytes>,
    #[serde(default)]
    pub output: Option<Bytes>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub revert_reason: Option<String>,
    #[serde(default)]
    pub calls: Vec<DebugFrame>,
}

/// `debug_traceBlockByHash` result item for `callTracer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugFrameResult {
    #[serde(default)]
    pub tx_hash: Option<B256>,
    pub result: DebugFrame,
}

/// `prestateTracer` account state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugAccountState {
    #[serde(default)]
    pub balance: Option<Value>,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub nonce: Option<Value>,
    #[serde(default)]
    pub storage: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugStateMap {
    #[serde(default)]
    pub pre: BTreeMap<Address, DebugAccountState>,
    #[serde(default)]
    pub post: BTreeMap<Address, DebugAccountState>,
}

/// `debug_traceBlockByHash` result item for `prestateTracer` in diff mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugStateDiffResult {
    #[serde(default)]
    pub tx_hash: Option<B256>,
    pub result: DebugStateMap,
}

impl Block {
    pub fn height(&self) -> u64 {
        self.number.to::<u64>()
    }

    /// Short name used in diagnostics.
    pub fn name(&self) -> String {
        let hash = self.hash.to_string();
        format!("{}#{}", self.height(), &hash[2..hash.len().min(9)])
    }

    pub fn has_empty_logs_bloom(&self) -> bool {
        self.logs_bloom.iter().all(|b| *b == 0)
    }

    pub fn transaction_hashes(&self) -> impl Iterator<Item = B256> + '_ {
        self.transactions.iter().map(BlockTransaction::hash)
    }
}

impl HasHeight for Block {
    fn height(&self) -> u64 {
        self.number.to::<u64>()
    }
}

impl BlockTransaction {
    pub fn hash(&self) -> B256 {
        match self {
            BlockTransaction::Hash(hash) => *hash,
            BlockTransaction::Full(tx) => tx.hash,
        }
    }
}

impl TraceDiff {
    /// Returns `(prev, next)`, or `None` if unchanged.
    pub fn values(&self) -> Option<(Option<&Value>, Option<&Value>)> {
        match self {
            TraceDiff::Unchanged(_) => None,
            TraceDiff::Add { next } => Some((None, Some(next))),
            TraceDiff::Change { change } => Some((Some(&change.from), Some(&change.to))),
            TraceDiff::Delete { prev } => Some((Some(prev), None)),
        }
    }
}
