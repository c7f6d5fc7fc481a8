//! Fork navigation over the node RPC.
use std::{future::Future, time::Duration};

use alloy_primitives::B256;
use error_stack::{Report, ResultExt};
use evm_source_common::{fork::ForkSource, BlockRef, FiniteRange, Hash, RequestsTracker};
use tracing::warn;

use crate::{
    error::{DataSourceError, DataSourceErrorExt, Result},
    model::RpcDataRequest,
};

use super::{models::Block, query::NodeClient};

/// Feeds the fork navigator with node blocks.
///
/// Full transactions are fetched only for heights whose request asks for them.
pub struct NodeForkSource<'a> {
    client: &'a NodeClient,
    requests: &'a RequestsTracker<RpcDataRequest>,
}

impl<'a> NodeForkSource<'a> {
    pub fn new(client: &'a NodeClient, requests: &'a RequestsTracker<RpcDataRequest>) -> Self {
        Self { client, requests }
    }

    fn with_transactions(&self, height: u64) -> bool {
        self.requests
            .get_request_at(height)
            .map(|request| request.request.transactions)
            .unwrap_or(false)
    }

    /// Splits `from..=to` into runs of heights that agree on fetching full transactions.
    fn transaction_runs(&self, from: u64, to: u64) -> Vec<(FiniteRange, bool)> {
        let mut runs: Vec<(FiniteRange, bool)> = Vec::new();
        for height in from..=to {
            let with_transactions = self.with_transactions(height);
            match runs.last_mut() {
                Some((range, run_flag)) if *run_flag == with_transactions => range.to = height,
                _ => runs.push((FiniteRange::new(height, height), with_transactions)),
            }
        }
        runs
    }
}

impl ForkSource for NodeForkSource<'_> {
    type Block = Block;
    type Error = DataSourceError;

    fn get_blocks(&self, from: u64, to: u64) -> impl Future<Output = Result<Vec<Block>>> + Send {
        async move {
            let mut blocks = Vec::with_capacity((to + 1).saturating_sub(from) as usize);
            for (range, with_transactions) in self.transaction_runs(from, to) {
                let stride = self.client.get_stride(&range, with_transactions).await?;
                for (height, block) in range.heights().zip(stride) {
                    // The node most likely moved to another branch and pruned the block.
                    let block = block.ok_or_else(|| DataSourceError::consistency(height))?;
                    blocks.push(block);
                }
            }
            Ok(blocks)
        }
    }

    fn get_block_by_hash(
        &self,
        height: u64,
        hash: Hash,
    ) -> impl Future<Output = Result<Block>> + Send {
        async move {
            let with_transactions = self.with_transactions(height);
            self.client
                .get_block_by_hash(to_b256(&hash)?, with_transactions)
                .await?
                .ok_or_else(|| DataSourceError::consistency(format!("{height}#{hash}")))
        }
    }

    fn block_ref(&self, block: &Block) -> BlockRef {
        BlockRef {
            height: block.height(),
            hash: to_hash(&block.hash),
            parent_hash: to_hash(&block.parent_hash),
        }
    }
}

pub fn to_hash(hash: &B256) -> Hash {
    Hash(hash.to_vec())
}

pub fn to_b256(hash: &Hash) -> Result<B256> {
    B256::try_from(hash.as_slice())
        .change_context(DataSourceError::Protocol)
        .attach_printable_lazy(|| format!("invalid block hash: {hash}"))
}

/// Runs `f` again after a pause if it fails with a consistency error.
///
/// `f` is called at most `retries + 1` times. Other errors are returned immediately, running
/// out of retries is fatal.
pub async fn retry_on_inconsistency<T, F, Fut>(
    retries: usize,
    pause: Duration,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let err = match f().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_consistency_error() {
            return Err(err);
        }

        if attempt >= retries {
            return Err(exhausted(err, retries));
        }

        attempt += 1;
        warn!(
            attempt,
            retries,
            ?pause,
            error = ?err,
            "chain changed while fetching blocks, retrying"
        );
        tokio::time::sleep(pause).await;
    }
}

fn exhausted(err: Report<DataSourceError>, retries: usize) -> Report<DataSourceError> {
    err.change_context(DataSourceError::Fatal)
        .attach_printable(format!("chain is still inconsistent after {retries} retries"))
}
