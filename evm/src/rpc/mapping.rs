//! Node blocks to canonical blocks.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use alloy_primitives::{Address, B256, U256};
use error_stack::{Report, ResultExt};
use serde_json::Value;

use crate::{
    error::{DataSourceError, Result},
    filter::apply_item_filters,
    model::{
        block::sighash, BlockHeader, CanonicalBlock, DataRequest, Log, StateDiff, StateDiffKind,
        Trace, TraceType, Transaction,
    },
};

use super::{
    enrich::RawBlock,
    models::{self, BlockTransaction, DebugFrame, DebugStateMap, TraceFrame, TraceStateDiff},
};

/// Maps an enriched node block and applies the request item filters and field selection.
pub fn map_raw_block(raw: RawBlock, request: &DataRequest) -> Result<CanonicalBlock> {
    let name = raw.block.name();
    let mut block = to_canonical_block(raw).attach_printable_lazy(|| format!("block: {name}"))?;
    apply_item_filters(&mut block, request);
    block.project(&request.fields);
    Ok(block)
}

fn to_canonical_block(raw: RawBlock) -> Result<CanonicalBlock> {
    let RawBlock {
        block,
        logs,
        receipts,
        trace_replays,
        debug_frames,
        debug_state_diffs,
    } = raw;

    let transaction_index = block
        .transaction_hashes()
        .enumerate()
        .map(|(index, hash)| (hash, index as u32))
        .collect::<HashMap<B256, u32>>();

    let mut canonical = CanonicalBlock::new(BlockHeader {
        number: block.height(),
        hash: block.hash,
        parent_hash: block.parent_hash,
        timestamp: Some(block.timestamp.to::<u64>()),
        miner: block.miner,
        gas_used: block.gas_used,
        gas_limit: block.gas_limit,
        base_fee_per_gas: block.base_fee_per_gas,
        difficulty: block.difficulty,
        size: block.size,
        logs_bloom: Some(block.logs_bloom.clone()),
        state_root: block.state_root,
        transactions_root: block.transactions_root,
        receipts_root: block.receipts_root,
        extra_data: block.extra_data.clone(),
    });

    for (index, tx) in block.transactions.iter().enumerate() {
        if let BlockTransaction::Full(tx) = tx {
            canonical.transactions.push(map_transaction(index as u32, tx));
        }
    }

    if let Some(receipts) = receipts.as_ref() {
        for (tx, receipt) in canonical.transactions.iter_mut().zip(receipts) {
            tx.gas_used = Some(receipt.gas_used);
            tx.cumulative_gas_used = Some(receipt.cumulative_gas_used);
            tx.effective_gas_price = receipt.effective_gas_price;
            tx.contract_address = receipt.contract_address;
            tx.status = receipt.status.map(|status| status.to::<u64>());
        }
    }

    let logs = match (logs, receipts) {
        (Some(logs), _) => logs,
        (None, Some(receipts)) => receipts.into_iter().flat_map(|r| r.logs).collect(),
        (None, None) => Vec::new(),
    };
    canonical.logs = logs.iter().map(map_log).collect();

    for replay in trace_replays.into_iter().flatten() {
        let index = replay
            .transaction_hash
            .and_then(|hash| transaction_index.get(&hash).copied())
            .ok_or(DataSourceError::Protocol)
            .attach_printable("replay is not linked to a transaction of the block")?;

        for frame in replay.trace.iter().flatten() {
            canonical.traces.push(map_trace_frame(index, frame)?);
        }

        for (address, diff) in replay.state_diff.iter().flatten() {
            map_replay_state_diff(index, *address, diff, &mut canonical.state_diffs);
        }
    }

    for (index, frame) in debug_frames.into_iter().flatten().enumerate() {
        flatten_debug_frame(
            index as u32,
            Vec::new(),
            &frame.result,
            &mut canonical.traces,
        )?;
    }

    for (index, diff) in debug_state_diffs.into_iter().flatten().enumerate() {
        map_debug_state_diff(index as u32, &diff.result, &mut canonical.state_diffs);
    }

    Ok(canonical)
}

fn map_transaction(index: u32, tx: &models::Transaction) -> Transaction {
    Transaction {
        transaction_index: index,
        from: Some(tx.from),
        to: tx.to,
        hash: Some(tx.hash),
        gas: Some(tx.gas),
        gas_price: tx.gas_price,
        max_fee_per_gas: tx.max_fee_per_gas,
        max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
        input: Some(tx.input.clone()),
        nonce: Some(tx.nonce.to::<u64>()),
        value: Some(tx.value),
        type_: tx.type_.map(|t| t.to::<u64>()),
        chain_id: tx.chain_id.map(|id| id.to::<u64>()),
        sighash: sighash(&tx.input),
        ..Default::default()
    }
}

fn map_log(log: &models::Log) -> Log {
    Log {
        log_index: log.log_index.to::<u32>(),
        transaction_index: log.transaction_index.to::<u32>(),
        address: Some(log.address),
        topics: Some(log.topics.clone()),
        data: Some(log.data.clone()),
        transaction_hash: Some(log.transaction_hash),
    }
}

fn map_trace_frame(transaction_index: u32, frame: &TraceFrame) -> Result<Trace> {
    let type_ = match frame.type_.as_str() {
        "call" => TraceType::Call,
        "create" => TraceType::Create,
        "suicide" => TraceType::Suicide,
        "reward" => TraceType::Reward,
        other => {
            return Err(Report::new(DataSourceError::Protocol))
                .attach_printable_lazy(|| format!("unknown trace type: {other}"));
        }
    };

    let mut trace = Trace::new(transaction_index, frame.trace_address.clone(), type_);
    trace.subtraces = Some(frame.subtraces);
    trace.error = frame.error.clone();

    let action = &frame.action;
    let result = frame.result.clone().unwrap_or_default();

    match type_ {
        TraceType::Call => {
            trace.from = action.from;
            trace.to = action.to;
            trace.value = action.value;
            trace.gas = action.gas;
            trace.sighash = action.input.as_ref().and_then(sighash);
            trace.input = action.input.clone();
            trace.call_type = action.call_type.clone();
            trace.gas_used = result.gas_used;
            trace.output = result.output;
        }
        TraceType::Create => {
            trace.from = action.from;
            trace.value = action.value;
            trace.gas = action.gas;
            trace.input = action.init.clone();
            trace.gas_used = result.gas_used;
            trace.output = result.code;
            trace.result_address = result.address;
        }
        TraceType::Suicide => {
            trace.from = action.address;
            trace.to = action.refund_address;
            trace.value = action.balance;
        }
        TraceType::Reward => {
            trace.to = action.author;
            trace.value = action.value;
        }
    }

    Ok(trace)
}

/// Flattens a call tree depth first, numbering subcalls with their trace address.
fn flatten_debug_frame(
    transaction_index: u32,
    trace_address: Vec<u32>,
    frame: &DebugFrame,
    traces: &mut Vec<Trace>,
) -> Result<()> {
    let kind = frame.type_.to_ascii_uppercase();
    let type_ = match kind.as_str() {
        "CALL" | "CALLCODE" | "DELEGATECALL" | "STATICCALL" => TraceType::Call,
        "CREATE" | "CREATE2" => TraceType::Create,
        "SELFDESTRUCT" => TraceType::Suicide,
        _ => {
            return Err(Report::new(DataSourceError::Protocol))
                .attach_printable_lazy(|| format!("unknown call frame type: {}", frame.type_));
        }
    };

    let mut trace = Trace::new(transaction_index, trace_address.clone(), type_);
    trace.subtraces = Some(frame.calls.len() as u32);
    trace.error = frame.error.clone();
    trace.revert_reason = frame.revert_reason.clone();
    trace.from = Some(frame.from);
    trace.value = frame.value;

    match type_ {
        TraceType::Call => {
            trace.to = frame.to;
            trace.gas = frame.gas;
            trace.sighash = frame.input.as_ref().and_then(sighash);
            trace.input = frame.input.clone();
            trace.call_type = Some(kind.to_ascii_lowercase());
            trace.gas_used = frame.gas_used;
            trace.output = frame.output.clone();
        }
        TraceType::Create => {
            trace.gas = frame.gas;
            trace.input = frame.input.clone();
            trace.gas_used = frame.gas_used;
            trace.output = frame.output.clone();
            trace.result_address = frame.to;
        }
        TraceType::Suicide => {
            trace.to = frame.to;
        }
        TraceType::Reward => {}
    }

    traces.push(trace);

    for (index, call) in frame.calls.iter().enumerate() {
        let mut address = trace_address.clone();
        address.push(index as u32);
        flatten_debug_frame(transaction_index, address, call, traces)?;
    }

    Ok(())
}

fn map_replay_state_diff(
    transaction_index: u32,
    address: Address,
    diff: &TraceStateDiff,
    out: &mut Vec<StateDiff>,
) {
    let fields = [
        ("balance", &diff.balance),
        ("code", &diff.code),
        ("nonce", &diff.nonce),
    ];
    let storage = diff
        .storage
        .iter()
        .map(|(key, value)| (key.as_str(), value));

    for (key, value) in fields.into_iter().chain(storage) {
        let Some((prev, next)) = value.values() else {
            continue;
        };
        out.push(StateDiff {
            transaction_index,
            address,
            key: key.to_string(),
            kind: Some(state_diff_kind(prev.is_some(), next.is_some())),
            prev: prev.map(value_to_string),
            next: next.map(value_to_string),
        });
    }
}

fn map_debug_state_diff(transaction_index: u32, diff: &DebugStateMap, out: &mut Vec<StateDiff>) {
    let addresses = diff
        .pre
        .keys()
        .chain(diff.post.keys())
        .copied()
        .collect::<BTreeSet<_>>();

    for address in addresses {
        let pre = flatten_account(diff.pre.get(&address));
        let post = flatten_account(diff.post.get(&address));

        let keys = pre.keys().chain(post.keys()).cloned().collect::<BTreeSet<_>>();
        for key in keys {
            let prev = pre.get(&key).map(value_to_string);
            let next = post.get(&key).map(value_to_string);
            if prev.is_some() && prev == next {
                continue;
            }
            out.push(StateDiff {
                transaction_index,
                address,
                kind: Some(state_diff_kind(prev.is_some(), next.is_some())),
                key,
                prev,
                next,
            });
        }
    }
}

fn flatten_account(state: Option<&models::DebugAccountState>) -> BTreeMap<String, Value> {
    let mut values = BTreeMap::new();
    let Some(state) = state else {
        return values;
    };

    for (key, value) in [
        ("balance", &state.balance),
        ("code", &state.code),
        ("nonce", &state.nonce),
    ] {
        if let Some(value) = value {
            values.insert(key.to_string(), value.clone());
        }
    }

    for (key, value) in state.storage.iter() {
        values.insert(key.clone(), value.clone());
    }

    values
}

fn state_diff_kind(has_prev: bool, has_next: bool) -> StateDiffKind {
    match (has_prev, has_next) {
        (false, _) => StateDiffKind::Add,
        (true, true) => StateDiffKind::Change,
        (true, false) => StateDiffKind::Delete,
    }
}

/// Quantities are rendered as hex, strings as is.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_u64() {
            Some(n) => format!("{:#x}", U256::from(n)),
            None => n.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, Bytes, B256, U256, U64};
    use serde_json::json;

    use crate::{
        model::{DataRequest, StateDiffKind, TraceRequest, TraceType},
        rpc::{
            enrich::RawBlock,
            models::{Block, BlockTransaction, DebugFrameResult, DebugStateDiffResult},
        },
    };

    use super::map_raw_block;

    fn block(txs: &[u8]) -> Block {
        Block {
            number: U64::from(7),
            hash: B256::repeat_byte(7),
            parent_hash: B256::repeat_byte(6),
            timestamp: U64::from(1_700_000_000),
            miner: None,
            gas_used: Some(U256::from(1)),
            gas_limit: None,
            base_fee_per_gas: None,
            difficulty: None,
            size: None,
            logs_bloom: Bytes::from(vec![0; 256]),
            state_root: None,
            transactions_root: None,
            receipts_root: None,
            extra_data: None,
            transactions: txs
                .iter()
                .map(|tx| BlockTransaction::Hash(B256::repeat_byte(*tx)))
                .collect(),
        }
    }

    #[test]
    fn test_debug_frames_are_flattened_depth_first() {
        let frame: DebugFrameResult = serde_json::from_value(json!({
            "result": {
                "type": "CALL",
                "from": "0x0000000000000000000000000000000000000001",
                "to": "0x0000000000000000000000000000000000000002",
                "input": "0xa9059cbb00",
                "calls": [
                    {
                        "type": "DELEGATECALL",
                        "from": "0x0000000000000000000000000000000000000002",
                        "to": "0x0000000000000000000000000000000000000003",
                        "calls": [{
                            "type": "CREATE2",
                            "from": "0x0000000000000000000000000000000000000003",
                            "to": "0x0000000000000000000000000000000000000004"
                        }]
                    },
                    {
                        "type": "SELFDESTRUCT",
                        "from": "0x0000000000000000000000000000000000000002",
                        "to": "0x0000000000000000000000000000000000000005",
                        "value": "0x1"
                    }
                ]
            }
        }))
        .unwrap();

        let mut raw = RawBlock::new(block(&[1]));
        raw.debug_frames = Some(vec![frame]);

        let mut request = DataRequest {
            traces: vec![TraceRequest::default()],
            ..Default::default()
        };
        request.fields.trace.call_type = true;
        request.fields.trace.result_address = true;

        let block = map_raw_block(raw, &request).unwrap();
        let addresses = block
            .traces
            .iter()
            .map(|t| (t.trace_address.clone(), t.type_))
            .collect::<Vec<_>>();

        assert_eq!(
            addresses,
            vec![
                (vec![], TraceType::Call),
                (vec![0], TraceType::Call),
                (vec![0, 0], TraceType::Create),
                (vec![1], TraceType::Suicide),
            ]
        );
        assert_eq!(block.traces[1].call_type.as_deref(), Some("delegatecall"));
        assert_eq!(block.traces[2].result_address, Some(Address::with_last_byte(4)));
    }

    #[test]
    fn test_debug_state_diffs() {
        let diff: DebugStateDiffResult = serde_json::from_value(json!({
            "result": {
                "pre": {
                    "0x0000000000000000000000000000000000000001": {
                        "balance": "0x10",
                        "nonce": 1,
                        "storage": {"0x01": "0xaa"}
                    }
                },
                "post": {
                    "0x0000000000000000000000000000000000000001": {
                        "balance": "0x08",
                        "nonce": 2
                    },
                    "0x0000000000000000000000000000000000000002": {
                        "balance": "0x08"
                    }
                }
            }
        }))
        .unwrap();

        let mut raw = RawBlock::new(block(&[1]));
        raw.debug_state_diffs = Some(vec![diff]);

        let request = DataRequest {
            state_diffs: vec![Default::default()],
            ..Default::default()
        };
        let block = map_raw_block(raw, &request).unwrap();

        let diffs = block
            .state_diffs
            .iter()
            .map(|d| (d.address.0[19], d.key.as_str(), d.kind.unwrap()))
            .collect::<Vec<_>>();
        assert_eq!(
            diffs,
            vec![
                (1, "0x01", StateDiffKind::Delete),
                (1, "balance", StateDiffKind::Change),
                (1, "nonce", StateDiffKind::Change),
                (2, "balance", StateDiffKind::Add),
            ]
        );
        assert_eq!(block.state_diffs[2].prev.as_deref(), Some("0x1"));
        assert_eq!(block.state_diffs[2].next.as_deref(), Some("0x2"));
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let mut raw = RawBlock::new(block(&[]));
        raw.logs = Some(Vec::new());
        let request = DataRequest::default();

        let a = serde_json::to_vec(&map_raw_block(raw.clone(), &request).unwrap()).unwrap();
        let b = serde_json::to_vec(&map_raw_block(raw, &request).unwrap()).unwrap();
        assert_eq!(a, b);
    }
}
