#![allow(dead_code)]
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_primitives::{Address, B256, U64};
use async_trait::async_trait;
use error_stack::Result;
use evm_source::{
    model::{CanonicalBlock, DataRequest},
    rpc::{RpcCall, RpcClientError, RpcDataSource, RpcDataSourceOptions, RpcTransport},
};
use evm_source_common::{BlockRange, ChainPointer, Hash, RangeRequest};
use serde_json::{json, Value};

/// A block of the scripted chain.
#[derive(Debug, Clone)]
pub struct MockBlock {
    pub height: u64,
    pub hash: B256,
    pub parent_hash: B256,
    /// Every transaction emits exactly one log.
    pub transactions: Vec<B256>,
}

/// Faults injected by the mock node. Each counter is decreased when the fault triggers.
#[derive(Debug, Default)]
pub struct Faults {
    /// `eth_getLogs` returns no logs.
    pub drop_logs: usize,
    /// Receipt batches are returned in reverse order.
    pub reorder_receipts: usize,
    /// `eth_getBlockByNumber` returns no block.
    pub hide_blocks: usize,
}

#[derive(Debug, Default)]
struct MockChain {
    head: u64,
    canonical: BTreeMap<u64, B256>,
    blocks: HashMap<B256, MockBlock>,
    transactions: HashMap<B256, (B256, usize)>,
    faults: Faults,
    calls: Vec<RpcCall>,
}

/// In-memory node that serves a synthetic chain.
#[derive(Debug, Clone, Default)]
pub struct MockRpc {
    chain: Arc<Mutex<MockChain>>,
}

pub fn block_hash(height: u64, branch: u8) -> B256 {
    let mut hash = B256::ZERO;
    hash[..8].copy_from_slice(&height.to_be_bytes());
    hash[8] = branch;
    hash[31] = 0xbb;
    hash
}

pub fn tx_hash(block: &B256, index: usize) -> B256 {
    let mut hash = *block;
    hash[9] = index as u8 + 1;
    hash[31] = 0xcc;
    hash
}

pub fn pointer(height: u64, branch: u8) -> ChainPointer {
    ChainPointer::new(height, Hash(block_hash(height, branch).to_vec()))
}

fn sender() -> Address {
    Address::with_last_byte(0xaa)
}

fn receiver() -> Address {
    Address::with_last_byte(0xbb)
}

impl MockRpc {
    /// A chain of blocks `0..=head` on branch 0.
    ///
    /// Blocks with an odd height have `transactions` transactions, the others are empty.
    pub fn linear(head: u64, transactions: usize) -> Self {
        let rpc = MockRpc::default();
        rpc.extend(0, 0, head, transactions);
        rpc
    }

    /// Adds blocks `from..=to` on `branch`, linked to the canonical block before `from`. The new
    /// blocks become canonical and the head moves to `to`.
    ///
    /// Replaced blocks are still returned when queried by hash.
    pub fn extend(&self, branch: u8, from: u64, to: u64, transactions: usize) {
        let mut chain = self.chain.lock().unwrap();

        let mut parent_hash = match from.checked_sub(1) {
            None => B256::ZERO,
            Some(parent) => chain.canonical[&parent],
        };

        for height in from..=to {
            let hash = block_hash(height, branch);
            let count = if height % 2 == 1 { transactions } else { 0 };
            let transactions = (0..count).map(|i| tx_hash(&hash, i)).collect::<Vec<_>>();

            for (index, tx) in transactions.iter().enumerate() {
                chain.transactions.insert(*tx, (hash, index));
            }

            chain.blocks.insert(
                hash,
                MockBlock {
                    height,
                    hash,
                    parent_hash,
                    transactions,
                },
            );
            chain.canonical.insert(height, hash);
            parent_hash = hash;
        }

        chain.canonical.retain(|height, _| *height <= to);
        chain.head = to;
    }

    /// Replaces the parent hash of the canonical block at `height`.
    pub fn break_link(&self, height: u64) {
        let mut chain = self.chain.lock().unwrap();
        let hash = chain.canonical[&height];
        if let Some(block) = chain.blocks.get_mut(&hash) {
            block.parent_hash = B256::repeat_byte(0xee);
        }
    }

    pub fn set_head(&self, head: u64) {
        self.chain.lock().unwrap().head = head;
    }

    pub fn with_faults(&self, f: impl FnOnce(&mut Faults)) {
        f(&mut self.chain.lock().unwrap().faults);
    }

    /// Calls received for `method`.
    pub fn calls(&self, method: &str) -> Vec<RpcCall> {
        self.chain
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }

    pub fn data_source(&self, options: RpcDataSourceOptions) -> RpcDataSource {
        RpcDataSource::new(Arc::new(self.clone()), options)
    }

    fn handle(&self, call: &RpcCall) -> Value {
        let mut chain = self.chain.lock().unwrap();
        chain.calls.push(call.clone());
        let params = call.params.as_array().cloned().unwrap_or_default();

        match call.method.as_str() {
            "eth_blockNumber" => json!(U64::from(chain.head)),
            "eth_getBlockByNumber" => {
                if chain.faults.hide_blocks > 0 {
                    chain.faults.hide_blocks -= 1;
                    return Value::Null;
                }
                let height = parse_height(&params[0]);
                let full = params[1].as_bool().unwrap_or(false);
                chain
                    .canonical
                    .get(&height)
                    .filter(|_| height <= chain.head)
                    .and_then(|hash| chain.blocks.get(hash))
                    .map(|block| block_json(block, full))
                    .unwrap_or(Value::Null)
            }
            "eth_getBlockByHash" => {
                let hash = parse_hash(&params[0]);
                let full = params[1].as_bool().unwrap_or(false);
                chain
                    .blocks
                    .get(&hash)
                    .map(|block| block_json(block, full))
                    .unwrap_or(Value::Null)
            }
            "eth_getLogs" => {
                if chain.faults.drop_logs > 0 {
                    chain.faults.drop_logs -= 1;
                    return json!([]);
                }
                let from = parse_height(&params[0]["fromBlock"]);
                let to = parse_height(&params[0]["toBlock"]);
                let logs = chain
                    .canonical
                    .range(from..=to)
                    .filter_map(|(_, hash)| chain.blocks.get(hash))
                    .flat_map(|block| {
                        (0..block.transactions.len()).map(move |index| log_json(block, index))
                    })
                    .collect::<Vec<_>>();
                json!(logs)
            }
            "eth_getTransactionReceipt" => {
                let hash = parse_hash(&params[0]);
                chain
                    .transactions
                    .get(&hash)
                    .and_then(|(block, index)| {
                        chain
                            .blocks
                            .get(block)
                            .map(|block| receipt_json(block, *index))
                    })
                    .unwrap_or(Value::Null)
            }
            "trace_replayBlockTransactions" | "arbtrace_replayBlockTransactions" => {
                let height = parse_height(&params[0]);
                let tracers = params[1].as_array().cloned().unwrap_or_default();
                let with_trace = tracers.contains(&json!("trace"));
                let with_state_diff = tracers.contains(&json!("stateDiff"));
                let block = chain
                    .canonical
                    .get(&height)
                    .and_then(|hash| chain.blocks.get(hash));
                match block {
                    None => json!([]),
                    Some(block) => json!(block
                        .transactions
                        .iter()
                        .map(|tx| replay_json(tx, with_trace, with_state_diff))
                        .collect::<Vec<_>>()),
                }
            }
            "debug_traceBlockByHash" => {
                let hash = parse_hash(&params[0]);
                let tracer = params[1]["tracer"].as_str().unwrap_or_default().to_string();
                match chain.blocks.get(&hash) {
                    None => Value::Null,
                    Some(block) => json!(block
                        .transactions
                        .iter()
                        .map(|tx| debug_trace_json(tx, &tracer))
                        .collect::<Vec<_>>()),
                }
            }
            method => panic!("unexpected rpc method {method}"),
        }
    }
}

#[async_trait]
impl RpcTransport for MockRpc {
    async fn call(&self, call: RpcCall, _priority: Option<u64>) -> Result<Value, RpcClientError> {
        Ok(self.handle(&call))
    }

    async fn batch_call(
        &self,
        calls: Vec<RpcCall>,
        _priority: Option<u64>,
    ) -> Result<Vec<Value>, RpcClientError> {
        let mut results = calls.iter().map(|call| self.handle(call)).collect::<Vec<_>>();

        let is_receipts = calls
            .first()
            .map(|call| call.method == "eth_getTransactionReceipt")
            .unwrap_or(false);
        if is_receipts {
            let mut chain = self.chain.lock().unwrap();
            if chain.faults.reorder_receipts > 0 && results.len() > 1 {
                chain.faults.reorder_receipts -= 1;
                results.reverse();
            }
        }

        Ok(results)
    }
}

fn parse_height(value: &Value) -> u64 {
    serde_json::from_value::<U64>(value.clone())
        .unwrap()
        .to::<u64>()
}

fn parse_hash(value: &Value) -> B256 {
    serde_json::from_value(value.clone()).unwrap()
}

fn logs_bloom(block: &MockBlock) -> String {
    let byte = if block.transactions.is_empty() { "00" } else { "ff" };
    format!("0x{}{}", byte, "00".repeat(255))
}

fn block_json(block: &MockBlock, full: bool) -> Value {
    let transactions = block
        .transactions
        .iter()
        .enumerate()
        .map(|(index, hash)| {
            if full {
                json!({
                    "hash": hash,
                    "transactionIndex": U64::from(index),
                    "from": sender(),
                    "to": receiver(),
                    "gas": "0x5208",
                    "gasPrice": "0x3b9aca00",
                    "input": "0xa9059cbb0000",
                    "nonce": U64::from(index),
                    "value": "0x0",
                    "type": "0x2",
                    "chainId": "0x1",
                })
            } else {
                json!(hash)
            }
        })
        .collect::<Vec<_>>();

    json!({
        "number": U64::from(block.height),
        "hash": block.hash,
        "parentHash": block.parent_hash,
        "timestamp": U64::from(1_700_000_000 + block.height * 12),
        "miner": receiver(),
        "gasUsed": "0x5208",
        "gasLimit": "0x1c9c380",
        "logsBloom": logs_bloom(block),
        "transactions": transactions,
    })
}

fn log_json(block: &MockBlock, index: usize) -> Value {
    json!({
        "address": receiver(),
        "topics": [B256::repeat_byte(0x11)],
        "data": "0x",
        "blockHash": block.hash,
        "blockNumber": U64::from(block.height),
        "transactionHash": block.transactions[index],
        "transactionIndex": U64::from(index),
        "logIndex": U64::from(index),
    })
}

fn receipt_json(block: &MockBlock, index: usize) -> Value {
    json!({
        "transactionHash": block.transactions[index],
        "transactionIndex": U64::from(index),
        "blockHash": block.hash,
        "blockNumber": U64::from(block.height),
        "gasUsed": "0x5208",
        "cumulativeGasUsed": format!("{:#x}", 21_000 * (index + 1)),
        "effectiveGasPrice": "0x3b9aca00",
        "status": "0x1",
        "logs": [log_json(block, index)],
    })
}

fn replay_json(tx: &B256, with_trace: bool, with_state_diff: bool) -> Value {
    let mut replay = json!({ "transactionHash": tx });

    if with_trace {
        replay["trace"] = json!([{
            "traceAddress": [],
            "subtraces": 0,
            "type": "call",
            "action": {
                "from": sender(),
                "to": receiver(),
                "value": "0x0",
                "gas": "0x5208",
                "input": "0xa9059cbb0000",
                "callType": "call",
            },
            "result": {"gasUsed": "0x5208", "output": "0x"},
        }]);
    }

    if with_state_diff {
        replay["stateDiff"] = json!({
            receiver().to_string(): {
                "balance": {"*": {"from": "0x1", "to": "0x2"}},
                "code": "=",
                "nonce": "=",
                "storage": {},
            }
        });
    }

    replay
}

fn debug_trace_json(tx: &B256, tracer: &str) -> Value {
    let result = if tracer == "prestateTracer" {
        json!({
            "pre": {receiver().to_string(): {"balance": "0x1"}},
            "post": {receiver().to_string(): {"balance": "0x2"}},
        })
    } else {
        json!({
            "type": "CALL",
            "from": sender(),
            "to": receiver(),
            "value": "0x0",
            "gas": "0x5208",
            "gasUsed": "0x5208",
            "input": "0xa9059cbb0000",
            "output": "0x",
        })
    };

    json!({ "txHash": tx, "result": result })
}

pub fn test_options(finality_confirmation: u64) -> RpcDataSourceOptions {
    RpcDataSourceOptions::new(finality_confirmation)
        .with_poll_interval(Duration::from_millis(10))
        .with_stride_size(4)
        .with_stride_concurrency(3)
        .with_tracing_split(None)
        .with_consistency_retries(3, Duration::from_millis(5))
}

pub fn range_request(
    from: u64,
    to: impl Into<Option<u64>>,
    request: DataRequest,
) -> Vec<RangeRequest<DataRequest>> {
    vec![RangeRequest::new(BlockRange::new(from, to), request)]
}

pub fn heights(blocks: &[CanonicalBlock]) -> Vec<u64> {
    blocks.iter().map(|block| block.header.number).collect()
}
