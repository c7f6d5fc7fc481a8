use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

use super::{block::TraceType, fields::FieldSelection};

/// What to fetch for a range of blocks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataRequest {
    pub fields: FieldSelection,
    /// Return blocks even if they contain no selected items.
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

/// Selects transactions. Empty lists match anything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub from: Vec<Address>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<Address>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sighash: Vec<Bytes>,
}

/// Selects logs. Empty lists match anything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<Address>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topic0: Vec<B256>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topic1: Vec<B256>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topic2: Vec<B256>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topic3: Vec<B256>,
}

/// Selects traces. Empty lists match anything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraceRequest {
    #[serde(rename = "type", skip_serializing_if = "Vec::is_empty")]
    pub type_: Vec<TraceType>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub from: Vec<Address>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<Address>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sighash: Vec<Bytes>,
}

/// Selects state diffs. Empty lists match anything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateDiffRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<Address>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<String>,
}

/// What the node source must fetch to answer a [DataRequest].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RpcDataRequest {
    /// Fetch full transaction bodies.
    pub transactions: bool,
    pub receipts: bool,
    pub logs: bool,
    pub traces: bool,
    pub state_diffs: bool,
    pub request: DataRequest,
}

impl RpcDataRequest {
    pub fn new(request: DataRequest) -> Self {
        let transactions = !request.transactions.is_empty();
        let receipts = transactions && request.fields.transaction.needs_receipts();

        Self {
            transactions,
            receipts,
            logs: !request.logs.is_empty(),
            traces: !request.traces.is_empty(),
            state_diffs: !request.state_diffs.is_empty(),
            request,
        }
    }

    /// Fetches receipts even if no receipt field is selected.
    ///
    /// Logs are then taken from the receipts.
    pub fn with_receipts(mut self) -> Self {
        self.receipts = true;
        self
    }
}

impl From<DataRequest> for RpcDataRequest {
    fn from(value: DataRequest) -> Self {
        RpcDataRequest::new(value)
    }
}
