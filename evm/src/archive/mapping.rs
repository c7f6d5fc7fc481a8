//! Gateway blocks to canonical blocks.
use crate::{
    model::{
        BlockHeader, CanonicalBlock, FieldSelection, Log, StateDiff, Trace, TraceType,
        Transaction,
    },
    rpc::mapping::value_to_string,
};

use super::gateway::{
    GatewayBlock, GatewayHeader, GatewayLog, GatewayStateDiff, GatewayTrace, GatewayTransaction,
};

/// Maps a gateway block and applies the field selection.
///
/// Items are already filtered by the gateway.
pub fn map_gateway_block(block: GatewayBlock, fields: &FieldSelection) -> CanonicalBlock {
    let mut canonical = CanonicalBlock::new(map_header(block.header));
    canonical.transactions = block.transactions.into_iter().map(map_transaction).collect();
    canonical.logs = block.logs.into_iter().map(map_log).collect();
    canonical.traces = block.traces.into_iter().map(map_trace).collect();
    canonical.state_diffs = block.state_diffs.into_iter().map(map_state_diff).collect();
    canonical.project(fields);
    canonical
}

fn map_header(header: GatewayHeader) -> BlockHeader {
    BlockHeader {
        number: header.number,
        hash: header.hash,
        parent_hash: header.parent_hash,
        timestamp: header.timestamp,
        miner: header.miner,
        gas_used: header.gas_used,
        gas_limit: header.gas_limit,
        base_fee_per_gas: header.base_fee_per_gas,
        difficulty: header.difficulty,
        size: header.size,
        logs_bloom: header.logs_bloom,
        state_root: header.state_root,
        transactions_root: header.transactions_root,
        receipts_root: header.receipts_root,
        extra_data: header.extra_data,
    }
}

fn map_transaction(tx: GatewayTransaction) -> Transaction {
    Transaction {
        transaction_index: tx.transaction_index,
        from: tx.from,
        to: tx.to,
        hash: tx.hash,
        gas: tx.gas,
        gas_price: tx.gas_price,
        max_fee_per_gas: tx.max_fee_per_gas,
        max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
        input: tx.input,
        nonce: tx.nonce,
        value: tx.value,
        type_: tx.type_,
        chain_id: tx.chain_id,
        sighash: tx.sighash,
        gas_used: tx.gas_used,
        cumulative_gas_used: tx.cumulative_gas_used,
        effective_gas_price: tx.effective_gas_price,
        contract_address: tx.contract_address,
        status: tx.status,
    }
}

fn map_log(log: GatewayLog) -> Log {
    Log {
        log_index: log.log_index,
        transaction_index: log.transaction_index,
        address: log.address,
        topics: log.topics,
        data: log.data,
        transaction_hash: log.transaction_hash,
    }
}

fn map_trace(trace: GatewayTrace) -> Trace {
    let GatewayTrace {
        transaction_index,
        trace_address,
        type_,
        subtraces,
        error,
        revert_reason,
        action,
        result,
    } = trace;

    let mut out = Trace::new(transaction_index, trace_address, type_);
    out.subtraces = subtraces;
    out.error = error;
    out.revert_reason = revert_reason;

    match type_ {
        TraceType::Call => {
            out.from = action.from;
            out.to = action.to;
            out.value = action.value;
            out.gas = action.gas;
            out.sighash = action.sighash;
            out.input = action.input;
            out.call_type = action.call_type;
            out.gas_used = result.gas_used;
            out.output = result.output;
        }
        TraceType::Create => {
            out.from = action.from;
            out.value = action.value;
            out.gas = action.gas;
            out.input = action.init;
            out.gas_used = result.gas_used;
            out.output = result.code;
            out.result_address = result.address;
        }
        TraceType::Suicide => {
            out.from = action.address;
            out.to = action.refund_address;
            out.value = action.balance;
        }
        TraceType::Reward => {
            out.to = action.author;
            out.value = action.value;
        }
    }

    out
}

fn map_state_diff(diff: GatewayStateDiff) -> StateDiff {
    StateDiff {
        transaction_index: diff.transaction_index,
        address: diff.address,
        key: diff.key,
        kind: diff.kind,
        prev: diff.prev.as_ref().map(value_to_string),
        next: diff.next.as_ref().map(value_to_string),
    }
}
