//! Node JSON-RPC data source.
pub mod enrich;
mod gate;
pub mod http;
pub mod mapping;
pub mod models;
pub mod navigator;
pub mod options;
pub mod query;
mod source;
pub mod transport;

pub use self::http::{HttpRpcTransport, HttpRpcTransportOptions};
pub use self::options::{RpcDataSourceOptions, TracingSplit};
pub use self::query::NodeClient;
pub use self::source::{FinalizedHeight, HeadHeight, HotUpdate, RpcDataSource};
pub use self::transport::{RpcCall, RpcClientError, RpcTransport};
