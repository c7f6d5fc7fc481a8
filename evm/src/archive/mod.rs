//! Archive gateway data source.
pub mod client;
pub mod gateway;
pub mod mapping;
mod source;

pub use self::client::{ArchiveClientError, ArchiveHttpClient};
pub use self::gateway::{GatewayBlock, GatewayQuery};
pub use self::source::{ArchiveDataSource, ArchiveHeight, ArchiveOptions};
