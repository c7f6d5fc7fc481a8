pub mod concurrency;
pub mod core;
pub mod fork;
pub mod height;
pub mod ingest;
pub mod range;
pub mod requests;
pub mod source;
pub mod stride;

pub use self::core::{BlockRef, ChainPointer, HasHeight, Hash};
pub use self::fork::{ForkNavigator, HotState, HotUpdate, NavigationTarget};
pub use self::range::{Batch, BlockRange, DataSplit, FiniteRange, RangeRequest};
pub use self::requests::RequestsTracker;
pub use self::source::{DataSource, HotDataSource};
