use std::{future::Future, pin::Pin};

use error_stack::Result;
use futures::Stream;

use crate::{
    core::Hash,
    fork::{HotState, HotUpdate},
    range::{Batch, RangeRequest},
};

pub type BatchStream<B, E> = Pin<Box<dyn Stream<Item = Result<Batch<B>, E>> + Send>>;

pub type HotUpdateStream<B, E> = Pin<Box<dyn Stream<Item = Result<HotUpdate<B>, E>> + Send>>;

/// A source of finalized blocks.
pub trait DataSource {
    type Block;
    type Request;
    type Error: error_stack::Context;

    fn get_finalized_height(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send;

    fn get_block_hash(&self, height: u64) -> impl Future<Output = Result<Hash, Self::Error>> + Send;

    /// Streams batches of finalized blocks covering `requests`, in ascending height order.
    ///
    /// If `stop_on_head` is true the stream ends once it reaches the finalized head, otherwise
    /// it keeps following the chain until all requests are covered.
    fn get_finalized_blocks(
        &self,
        requests: Vec<RangeRequest<Self::Request>>,
        stop_on_head: bool,
    ) -> BatchStream<Self::Block, Self::Error>;
}

/// A source that can also follow the unfinalized part of the chain.
pub trait HotDataSource: DataSource {
    /// Streams updates to the unfinalized chain, starting from `state`.
    ///
    /// The stream ends once no request covers heights after the finalized head.
    fn get_hot_blocks(
        &self,
        requests: Vec<RangeRequest<Self::Request>>,
        state: HotState,
    ) -> HotUpdateStream<Self::Block, Self::Error>;
}
