//! Archive gateway wire format.
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use evm_source_common::FiniteRange;

use crate::model::{
    DataRequest, FieldSelection, LogRequest, StateDiffKind, StateDiffRequest, TraceRequest,
    TraceType, TransactionRequest,
};

/// Query posted to a gateway worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayQuery {
    pub from_block: u64,
    pub to_block: u64,
    pub fields: FieldSelection,
    pub include_all_blocks: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transactions: Vec<TransactionRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub traces: Vec<TraceRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub state_diffs: Vec<StateDiffRequest>,
}

impl GatewayQuery {
    pub fn new(range: FiniteRange, request: &DataRequest) -> Self {
        Self {
            from_block: range.from,
            to_block: range.to,
            fields: request.fields.clone(),
            include_all_blocks: request.include_all_blocks,
            transactions: request.transactions.clone(),
            logs: request.logs.clone(),
            traces: request.traces.clone(),
            state_diffs: request.state_diffs.clone(),
        }
    }

    /// Query for the header of a single block.
    pub fn single_block(height: u64) -> Self {
        let request = DataRequest {
            include_all_blocks: true,
            ..Default::default()
        };
        Self::new(FiniteRange::new(height, height), &request)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayBlock {
    pub header: GatewayHeader,
    #[serde(default)]
    pub transactions: Vec<GatewayTransaction>,
    #[serde(default)]
    pub logs: Vec<GatewayLog>,
    #[serde(default)]
    pub traces: Vec<GatewayTrace>,
    #[serde(default)]
    pub state_diffs: Vec<GatewayStateDiff>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayHeader {
    #[serde(deserialize_with = "quantity_u64")]
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    #[serde(default, deserialize_with = "opt_quantity_u64")]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub miner: Option<Address>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub gas_used: Option<U256>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub gas_limit: Option<U256>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub base_fee_per_gas: Option<U256>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub difficulty: Option<U256>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub size: Option<U256>,
    #[serde(default)]
    pub logs_bloom: Option<Bytes>,
    #[serde(default)]
    pub state_root: Option<B256>,
    #[serde(default)]
    pub transactions_root: Option<B256>,
    #[serde(default)]
    pub receipts_root: Option<B256>,
    #[serde(default)]
    pub extra_data: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayTransaction {
    pub transaction_index: u32,
    #[serde(default)]
    pub from: Option<Address>,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub hash: Option<B256>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub gas: Option<U256>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub gas_price: Option<U256>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(default)]
    pub input: Option<Bytes>,
    #[serde(default, deserialize_with = "opt_quantity_u64")]
    pub nonce: Option<u64>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub value: Option<U256>,
    #[serde(default, rename = "type", deserialize_with = "opt_quantity_u64")]
    pub type_: Option<u64>,
    #[serde(default, deserialize_with = "opt_quantity_u64")]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub sighash: Option<Bytes>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub gas_used: Option<U256>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub cumulative_gas_used: Option<U256>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub effective_gas_price: Option<U256>,
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(default, deserialize_with = "opt_quantity_u64")]
    pub status: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayLog {
    pub log_index: u32,
    pub transaction_index: u32,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub topics: Option<Vec<B256>>,
    #[serde(default)]
    pub data: Option<Bytes>,
    #[serde(default)]
    pub transaction_hash: Option<B256>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayTrace {
    pub transaction_index: u32,
    pub trace_address: Vec<u32>,
    #[serde(rename = "type")]
    pub type_: TraceType,
    #[serde(default)]
    pub subtraces: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub revert_reason: Option<String>,
    #[serde(default)]
    pub action: GatewayTraceAction,
    #[serde(default)]
    pub result: GatewayTraceResult,
}

/// Fields of all trace types, only the ones of the trace type are set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayTraceAction {
    pub from: Option<Address>,
    pub to: Option<Address>,
    #[serde(deserialize_with = "opt_quantity")]
    pub value: Option<U256>,
    #[serde(deserialize_with = "opt_quantity")]
    pub gas: Option<U256>,
    pub input: Option<Bytes>,
    pub init: Option<Bytes>,
    pub sighash: Option<Bytes>,
    pub call_type: Option<String>,
    pub address: Option<Address>,
    pub refund_address: Option<Address>,
    #[serde(deserialize_with = "opt_quantity")]
    pub balance: Option<U256>,
    pub author: Option<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayTraceResult {
    #[serde(deserialize_with = "opt_quantity")]
    pub gas_used: Option<U256>,
    pub output: Option<Bytes>,
    pub code: Option<Bytes>,
    pub address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStateDiff {
    pub transaction_index: u32,
    pub address: Address,
    pub key: String,
    #[serde(default)]
    pub kind: Option<StateDiffKind>,
    #[serde(default)]
    pub prev: Option<Value>,
    #[serde(default)]
    pub next: Option<Value>,
}

/// Quantities are returned either as JSON numbers, hex strings or decimal strings.
fn parse_quantity<E: de::Error>(value: Value) -> Result<Option<U256>, E> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(|n| Some(U256::from(n)))
            .ok_or_else(|| E::custom(format!("invalid quantity: {n}"))),
        Value::String(s) => {
            let parsed = match s.strip_prefix("0x") {
                Some(hex) => U256::from_str_radix(hex, 16),
                None => U256::from_str_radix(&s, 10),
            };
            parsed
                .map(Some)
                .map_err(|_| E::custom(format!("invalid quantity: {s}")))
        }
        other => Err(E::custom(format!("invalid quantity: {other}"))),
    }
}

fn opt_quantity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<U256>, D::Error> {
    parse_quantity(Value::deserialize(deserializer)?)
}

fn opt_quantity_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    match opt_quantity(deserializer)? {
        None => Ok(None),
        Some(value) => u64::try_from(value)
            .map(Some)
            .map_err(|_| de::Error::custom(format!("quantity too large: {value}"))),
    }
}

fn quantity_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    opt_quantity_u64(deserializer)?.ok_or_else(|| de::Error::custom("missing quantity"))
}
