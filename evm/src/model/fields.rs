//! Selection of the optional fields of each entity.
//!
//! Identity fields (block number and hashes, transaction and log indices, trace addresses,
//! state diff keys) are always present. The `Default` selection is the base set returned when
//! a request doesn't select anything.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldSelection {
    pub block: BlockFields,
    pub transaction: TransactionFields,
    pub log: LogFields,
    pub trace: TraceFields,
    pub state_diff: StateDiffFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockFields {
    pub timestamp: bool,
    pub miner: bool,
    pub gas_used: bool,
    pub gas_limit: bool,
    pub base_fee_per_gas: bool,
    pub difficulty: bool,
    pub size: bool,
    pub logs_bloom: bool,
    pub state_root: bool,
    pub transactions_root: bool,
    pub receipts_root: bool,
    pub extra_data: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionFields {
    pub from: bool,
    pub to: bool,
    pub hash: bool,
    pub gas: bool,
    pub gas_price: bool,
    pub max_fee_per_gas: bool,
    pub max_priority_fee_per_gas: bool,
    pub input: bool,
    pub nonce: bool,
    pub value: bool,
    #[serde(rename = "type")]
    pub type_: bool,
    pub chain_id: bool,
    pub sighash: bool,
    pub gas_used: bool,
    pub cumulative_gas_used: bool,
    pub effective_gas_price: bool,
    pub contract_address: bool,
    pub status: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogFields {
    pub address: bool,
    pub topics: bool,
    pub data: bool,
    pub transaction_hash: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraceFields {
    pub subtraces: bool,
    pub error: bool,
    pub revert_reason: bool,
    pub from: bool,
    pub to: bool,
    pub value: bool,
    pub gas: bool,
    pub input: bool,
    pub sighash: bool,
    pub call_type: bool,
    pub gas_used: bool,
    pub output: bool,
    pub result_address: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateDiffFields {
    pub kind: bool,
    pub prev: bool,
    pub next: bool,
}

impl TransactionFields {
    /// Returns true if any field that is only available from receipts is selected.
    pub fn needs_receipts(&self) -> bool {
        self.gas_used
            || self.cumulative_gas_used
            || self.effective_gas_price
            || self.contract_address
            || self.status
    }
}

impl Default for BlockFields {
    fn default() -> Self {
        Self {
            timestamp: true,
            miner: false,
            gas_used: false,
            gas_limit: false,
            base_fee_per_gas: false,
            difficulty: false,
            size: false,
            logs_bloom: false,
            state_root: false,
            transactions_root: false,
            receipts_root: false,
            extra_data: false,
        }
    }
}

impl Default for TransactionFields {
    fn default() -> Self {
        Self {
            from: true,
            to: true,
            hash: true,
            gas: false,
            gas_price: false,
            max_fee_per_gas: false,
            max_priority_fee_per_gas: false,
            input: false,
            nonce: false,
            value: false,
            type_: false,
            chain_id: false,
            sighash: false,
            gas_used: false,
            cumulative_gas_used: false,
            effective_gas_price: false,
            contract_address: false,
            status: false,
        }
    }
}

impl Default for LogFields {
    fn default() -> Self {
        Self {
            address: true,
            topics: true,
            data: true,
            transaction_hash: false,
        }
    }
}

impl Default for TraceFields {
    fn default() -> Self {
        Self {
            subtraces: false,
            error: true,
            revert_reason: false,
            from: false,
            to: false,
            value: false,
            gas: false,
            input: false,
            sighash: false,
            call_type: false,
            gas_used: false,
            output: false,
            result_address: false,
        }
    }
}

impl Default for StateDiffFields {
    fn default() -> Self {
        Self {
            kind: true,
            prev: true,
            next: true,
        }
    }
}
