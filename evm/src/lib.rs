//! EVM block data from a node JSON-RPC endpoint or an archive gateway.
pub mod archive;
pub mod cli;
pub mod error;
pub mod filter;
pub mod model;
pub mod rpc;
