use alloy_primitives::{Address, Bytes, B256, U256};
use evm_source_common::HasHeight;
use serde::{Deserialize, Serialize};

use super::fields::{
    BlockFields, FieldSelection, LogFields, StateDiffFields, TraceFields, TransactionFields,
};

/// Origin independent EVM block.
///
/// Optional fields are populated only if they were selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalBlock {
    pub header: BlockHeader,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transactions: Vec<Transaction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<Log>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traces: Vec<Trace>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_diffs: Vec<StateDiff>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_bloom: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_root: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions_root: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipts_root: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sighash: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cumulative_gas_used: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_gas_price: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub log_index: u32,
    pub transaction_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<B256>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<B256>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceType {
    Call,
    Create,
    Suicide,
    Reward,
}

/// A single trace, flattened.
///
/// `from`, `to` and `value` carry the sender, receiver and amount for all trace types: for
/// `suicide` they are the destroyed contract, the refund address and the balance; for `reward`
/// only `to` (the author) and `value` are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub transaction_index: u32,
    pub trace_address: Vec<u32>,
    #[serde(rename = "type")]
    pub type_: TraceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtraces: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sighash: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_address: Option<Address>,
}

/// Kind of a state change: `+` added, `*` changed, `-` removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateDiffKind {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "*")]
    Change,
    #[serde(rename = "-")]
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDiff {
    pub transaction_index: u32,
    pub address: Address,
    /// `balance`, `code`, `nonce` or a storage slot.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<StateDiffKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl Trace {
    pub fn new(transaction_index: u32, trace_address: Vec<u32>, type_: TraceType) -> Self {
        Self {
            transaction_index,
            trace_address,
            type_,
            subtraces: None,
            error: None,
            revert_reason: None,
            from: None,
            to: None,
            value: None,
            gas: None,
            input: None,
            sighash: None,
            call_type: None,
            gas_used: None,
            output: None,
            result_address: None,
        }
    }
}

impl CanonicalBlock {
    pub fn new(header: BlockHeader) -> Self {
        Self {
            header,
            transactions: Vec::new(),
            logs: Vec::new(),
            traces: Vec::new(),
            state_diffs: Vec::new(),
        }
    }

    /// Removes unselected fields and sorts items in canonical order.
    pub fn project(&mut self, fields: &FieldSelection) {
        self.header.project(&fields.block);

        self.transactions
            .sort_by_key(|tx| tx.transaction_index);
        for tx in self.transactions.iter_mut() {
            tx.project(&fields.transaction);
        }

        self.logs.sort_by_key(|log| log.log_index);
        for log in self.logs.iter_mut() {
            log.project(&fields.log);
        }

        self.traces.sort_by(|a, b| {
            (a.transaction_index, &a.trace_address).cmp(&(b.transaction_index, &b.trace_address))
        });
        for trace in self.traces.iter_mut() {
            trace.project(&fields.trace);
        }

        self.state_diffs.sort_by(|a, b| {
            (a.transaction_index, a.address, &a.key).cmp(&(b.transaction_index, b.address, &b.key))
        });
        for diff in self.state_diffs.iter_mut() {
            diff.project(&fields.state_diff);
        }
    }
}

fn keep<T>(value: &mut Option<T>, selected: bool) {
    if !selected {
        *value = None;
    }
}

impl BlockHeader {
    fn project(&mut self, fields: &BlockFields) {
        keep(&mut self.timestamp, fields.timestamp);
        keep(&mut self.miner, fields.miner);
        keep(&mut self.gas_used, fields.gas_used);
        keep(&mut self.gas_limit, fields.gas_limit);
        keep(&mut self.base_fee_per_gas, fields.base_fee_per_gas);
        keep(&mut self.difficulty, fields.difficulty);
        keep(&mut self.size, fields.size);
        keep(&mut self.logs_bloom, fields.logs_bloom);
        keep(&mut self.state_root, fields.state_root);
        keep(&mut self.transactions_root, fields.transactions_root);
        keep(&mut self.receipts_root, fields.receipts_root);
        keep(&mut self.extra_data, fields.extra_data);
    }
}

impl Transaction {
    fn project(&mut self, fields: &TransactionFields) {
        keep(&mut self.from, fields.from);
        keep(&mut self.to, fields.to);
        keep(&mut self.hash, fields.hash);
        keep(&mut self.gas, fields.gas);
        keep(&mut self.gas_price, fields.gas_price);
        keep(&mut self.max_fee_per_gas, fields.max_fee_per_gas);
        keep(
            &mut self.max_priority_fee_per_gas,
            fields.max_priority_fee_per_gas,
        );
        keep(&mut self.input, fields.input);
        keep(&mut self.nonce, fields.nonce);
        keep(&mut self.value, fields.value);
        keep(&mut self.type_, fields.type_);
        keep(&mut self.chain_id, fields.chain_id);
        keep(&mut self.sighash, fields.sighash);
        keep(&mut self.gas_used, fields.gas_used);
        keep(&mut self.cumulative_gas_used, fields.cumulative_gas_used);
        keep(&mut self.effective_gas_price, fields.effective_gas_price);
        keep(&mut self.contract_address, fields.contract_address);
        keep(&mut self.status, fields.status);
    }
}

impl Log {
    fn project(&mut self, fields: &LogFields) {
        keep(&mut self.address, fields.address);
        keep(&mut self.topics, fields.topics);
        keep(&mut self.data, fields.data);
        keep(&mut self.transaction_hash, fields.transaction_hash);
    }
}

impl Trace {
    fn project(&mut self, fields: &TraceFields) {
        keep(&mut self.subtraces, fields.subtraces);
        keep(&mut self.error, fields.error);
        keep(&mut self.revert_reason, fields.revert_reason);
        keep(&mut self.from, fields.from);
        keep(&mut self.to, fields.to);
        keep(&mut self.value, fields.value);
        keep(&mut self.gas, fields.gas);
        keep(&mut self.input, fields.input);
        keep(&mut self.sighash, fields.sighash);
        keep(&mut self.call_type, fields.call_type);
        keep(&mut self.gas_used, fields.gas_used);
        keep(&mut self.output, fields.output);
        keep(&mut self.result_address, fields.result_address);
    }
}

impl StateDiff {
    fn project(&mut self, fields: &StateDiffFields) {
        keep(&mut self.kind, fields.kind);
        keep(&mut self.prev, fields.prev);
        keep(&mut self.next, fields.next);
    }
}

impl HasHeight for CanonicalBlock {
    fn height(&self) -> u64 {
        self.header.number
    }
}

/// Returns the first four bytes of the call input, if any.
pub fn sighash(input: &Bytes) -> Option<Bytes> {
    if input.len() >= 4 {
        Some(Bytes::copy_from_slice(&input[..4]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, Bytes, B256, U256};

    use crate::model::fields::FieldSelection;

    use super::{BlockHeader, CanonicalBlock, Log, Transaction};

    #[test]
    fn test_project_removes_unselected_fields_and_sorts() {
        let mut block = CanonicalBlock::new(BlockHeader {
            number: 1,
            hash: B256::repeat_byte(1),
            parent_hash: B256::repeat_byte(0),
            timestamp: Some(100),
            gas_used: Some(U256::from(21_000)),
            ..Default::default()
        });
        block.transactions = vec![
            Transaction {
                transaction_index: 1,
                from: Some(Address::repeat_byte(1)),
                input: Some(Bytes::from_static(&[1, 2, 3, 4, 5])),
                ..Default::default()
            },
            Transaction {
                transaction_index: 0,
                from: Some(Address::repeat_byte(2)),
                ..Default::default()
            },
        ];
        block.logs = vec![
            Log {
                log_index: 3,
                data: Some(Bytes::new()),
                ..Default::default()
            },
            Log {
                log_index: 2,
                ..Default::default()
            },
        ];

        block.project(&FieldSelection::default());

        assert_eq!(block.header.timestamp, Some(100));
        assert_eq!(block.header.gas_used, None);
        assert_eq!(block.transactions[0].transaction_index, 0);
        assert_eq!(block.transactions[1].input, None);
        assert_eq!(block.transactions[1].from, Some(Address::repeat_byte(1)));
        assert_eq!(block.logs[0].log_index, 2);

        let json = serde_json::to_value(&block).unwrap();
        assert!(json["header"].get("gasUsed").is_none());
        assert!(json.get("traces").is_none());
    }

    #[test]
    fn test_sighash() {
        let input = Bytes::from_static(&[0xa9, 0x05, 0x9c, 0xbb, 0x00]);
        assert_eq!(
            super::sighash(&input),
            Some(Bytes::from_static(&[0xa9, 0x05, 0x9c, 0xbb]))
        );
        assert_eq!(super::sighash(&Bytes::new()), None);
    }
}
