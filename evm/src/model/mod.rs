//! Canonical EVM block model shared by the node and archive sources.
pub mod block;
pub mod fields;
pub mod request;

pub use self::block::{
    BlockHeader, CanonicalBlock, Log, StateDiff, StateDiffKind, Trace, TraceType, Transaction,
};
pub use self::fields::FieldSelection;
pub use self::request::{
    DataRequest, LogRequest, RpcDataRequest, StateDiffRequest, TraceRequest, TransactionRequest,
};
