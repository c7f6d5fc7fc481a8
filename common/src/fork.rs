//! Reorg-aware navigation of the unfinalized part of the chain.
//!
//! The navigator keeps the finalized head followed by the unfinalized blocks it has seen so
//! far. Moving towards a new target is split in two steps: [ForkNavigator::plan_move] fetches
//! blocks and computes the new chain without touching the navigator, and
//! [ForkNavigator::apply] commits the result. Callers can do more work between the two steps
//! and simply drop the plan if that work fails.
use std::future::Future;

use error_stack::{Result, ResultExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{BlockRef, ChainPointer, Hash};

#[derive(Debug)]
pub enum NavigationError {
    /// The block source failed.
    Fetch,
    /// The new chain forks below the finalized head.
    BelowFinalized,
    /// A block doesn't link to its parent.
    Linkage,
}

/// Fetches blocks for the navigator.
pub trait ForkSource {
    type Block: Send;
    type Error: error_stack::Context;

    /// Returns the canonical blocks between `from` and `to` (inclusive), in ascending order.
    fn get_blocks(
        &self,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Result<Vec<Self::Block>, Self::Error>> + Send;

    fn get_block_by_hash(
        &self,
        height: u64,
        hash: Hash,
    ) -> impl Future<Output = Result<Self::Block, Self::Error>> + Send;

    fn block_ref(&self, block: &Self::Block) -> BlockRef;
}

/// Persisted position of the navigator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotState {
    pub finalized: ChainPointer,
    /// Unfinalized blocks after the finalized head, in ascending order.
    pub unfinalized: Vec<ChainPointer>,
}

/// Where the navigator should move to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationTarget {
    pub best: u64,
    pub finalized: u64,
}

/// New or replaced blocks, together with the updated chain position.
#[derive(Debug, Clone, PartialEq)]
pub struct HotUpdate<B> {
    pub blocks: Vec<B>,
    pub base_head: ChainPointer,
    pub finalized_head: ChainPointer,
}

/// The chain computed by [ForkNavigator::plan_move], not yet committed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChain {
    chain: Vec<ChainPointer>,
}

#[derive(Debug)]
pub struct NavigatorMove<B> {
    /// New blocks, in ascending height order.
    pub blocks: Vec<B>,
    pub chain: PendingChain,
}

#[derive(Debug, Clone)]
pub struct ForkNavigator {
    /// The first element is the finalized head.
    chain: Vec<ChainPointer>,
}

impl ForkNavigator {
    pub fn new(state: HotState) -> Result<Self, NavigationError> {
        let mut chain = Vec::with_capacity(state.unfinalized.len() + 1);
        chain.push(state.finalized);
        chain.extend(state.unfinalized);

        for pair in chain.windows(2) {
            if pair[1].height != pair[0].height + 1 {
                return Err(NavigationError::Linkage)
                    .attach_printable("unfinalized blocks are not contiguous")
                    .attach_printable_lazy(|| format!("block: {}", pair[0]))
                    .attach_printable_lazy(|| format!("next: {}", pair[1]));
            }
        }

        Ok(Self { chain })
    }

    pub fn current_height(&self) -> u64 {
        self.base_head().height
    }

    pub fn base_head(&self) -> &ChainPointer {
        // The chain always contains the finalized head.
        &self.chain[self.chain.len() - 1]
    }

    pub fn finalized_head(&self) -> &ChainPointer {
        &self.chain[0]
    }

    /// Computes the chain obtained by moving towards `target`.
    ///
    /// Blocks after the current head, up to the best block, are fetched by height in one go.
    /// From there the new chain is walked back through parent hashes until it meets the
    /// current chain. The navigator is not modified.
    pub async fn plan_move<S: ForkSource>(
        &self,
        target: NavigationTarget,
        source: &S,
    ) -> Result<NavigatorMove<S::Block>, NavigationError> {
        let mut chain = self.chain.clone();
        let first_height = chain[0].height;

        if target.best < first_height {
            debug!(
                best = target.best,
                finalized = first_height,
                "target is below finalized head"
            );
            return Ok(NavigatorMove {
                blocks: Vec::new(),
                chain: PendingChain { chain },
            });
        }

        let head_height = chain[chain.len() - 1].height;
        let window_start = target.best.min(head_height + 1);

        let mut window = source
            .get_blocks(window_start, target.best)
            .await
            .change_context(NavigationError::Fetch)
            .attach_printable_lazy(|| format!("heights: {window_start}..={}", target.best))?;

        let expected = target.best - window_start + 1;
        if window.len() as u64 != expected {
            return Err(NavigationError::Linkage)
                .attach_printable("received blocks don't cover the requested heights")
                .attach_printable_lazy(|| format!("requested: {window_start}..={}", target.best))
                .attach_printable_lazy(|| format!("received: {}", window.len()));
        }

        let mut new_blocks = Vec::new();
        let Some(mut block) = window.pop() else {
            return Err(NavigationError::Fetch).attach_printable("no block received");
        };
        let mut block_ref = source.block_ref(&block);

        if block_ref.height != target.best {
            return Err(NavigationError::Linkage)
                .attach_printable("block height doesn't match requested height")
                .attach_printable_lazy(|| format!("requested: {}", target.best))
                .attach_printable_lazy(|| format!("received: {}", block_ref.height));
        }

        let fork_index = loop {
            let index = (block_ref.height - first_height) as usize;

            if let Some(known) = chain.get(index) {
                if known.matches(block_ref.height, &block_ref.hash) {
                    if known.hash.is_empty() {
                        chain[index].hash = block_ref.hash.clone();
                    }
                    break index;
                }

                if index == 0 {
                    return Err(NavigationError::BelowFinalized)
                        .attach_printable("new chain conflicts with the finalized head")
                        .attach_printable_lazy(|| format!("finalized: {}", chain[0]))
                        .attach_printable_lazy(|| format!("block: {}", block_ref.pointer()));
                }
            }

            let parent_height = block_ref.height - 1;
            let parent_hash = block_ref.parent_hash.clone();
            new_blocks.push(block);

            let parent_index = (parent_height - first_height) as usize;
            if let Some(known) = chain.get(parent_index) {
                if known.matches(parent_height, &parent_hash) {
                    if known.hash.is_empty() {
                        chain[parent_index].hash = parent_hash;
                    }
                    break parent_index;
                }
            }

            if parent_index == 0 {
                return Err(NavigationError::BelowFinalized)
                    .attach_printable("new chain forks below the finalized head")
                    .attach_printable_lazy(|| format!("finalized: {}", chain[0]))
                    .attach_printable_lazy(|| format!("parent hash: {parent_hash}"));
            }

            block = match window.pop() {
                Some(block) => block,
                None => source
                    .get_block_by_hash(parent_height, parent_hash.clone())
                    .await
                    .change_context(NavigationError::Fetch)
                    .attach_printable_lazy(|| format!("height: {parent_height}"))
                    .attach_printable_lazy(|| format!("hash: {parent_hash}"))?,
            };
            block_ref = source.block_ref(&block);

            if block_ref.height != parent_height || block_ref.hash != parent_hash {
                return Err(NavigationError::Linkage)
                    .attach_printable("parent block doesn't match its reference")
                    .attach_printable_lazy(|| format!("expected: {parent_height}/{parent_hash}"))
                    .attach_printable_lazy(|| format!("received: {}", block_ref.pointer()));
            }
        };

        new_blocks.reverse();

        // A best block behind the head on the same branch keeps the current chain.
        if !new_blocks.is_empty() {
            chain.truncate(fork_index + 1);
            for block in new_blocks.iter() {
                chain.push(source.block_ref(block).pointer());
            }
        }

        let head_height = chain[chain.len() - 1].height;
        let finalized_height = target.finalized.min(head_height);
        if finalized_height > first_height {
            let finalized_index = (finalized_height - first_height) as usize;
            chain.drain(..finalized_index);
        }

        Ok(NavigatorMove {
            blocks: new_blocks,
            chain: PendingChain { chain },
        })
    }

    /// Commits a chain computed by [ForkNavigator::plan_move].
    pub fn apply<B>(&mut self, pending: PendingChain, blocks: Vec<B>) -> HotUpdate<B> {
        self.chain = pending.chain;
        HotUpdate {
            blocks,
            base_head: self.base_head().clone(),
            finalized_head: self.finalized_head().clone(),
        }
    }
}

impl error_stack::Context for NavigationError {}

impl std::fmt::Display for NavigationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NavigationError::Fetch => write!(f, "navigation error: failed to fetch block"),
            NavigationError::BelowFinalized => {
                write!(f, "navigation error: fork below finalized head")
            }
            NavigationError::Linkage => write!(f, "navigation error: broken block linkage"),
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use error_stack::{Report, Result};

    use crate::core::{testing::new_test_hash, BlockRef, Hash};

    use super::ForkSource;

    /// A request received by [TestChain].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum TestRequest {
        Heights { from: u64, to: u64 },
        Hash(Hash),
    }

    #[derive(Debug)]
    pub struct TestSourceError;

    impl error_stack::Context for TestSourceError {}

    impl std::fmt::Display for TestSourceError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("test source error")
        }
    }

    /// An in-memory chain with forks.
    ///
    /// Blocks are identified by `(height, fork)`. The canonical chain is a list of fork ids
    /// indexed by height.
    #[derive(Clone, Default)]
    pub struct TestChain {
        inner: Arc<Mutex<TestChainInner>>,
    }

    #[derive(Default)]
    struct TestChainInner {
        blocks: HashMap<Hash, BlockRef>,
        canonical: Vec<Hash>,
        requests: Vec<TestRequest>,
    }

    impl TestChain {
        /// Creates a chain with blocks `0..=head` on fork 0.
        pub fn new(head: u64) -> Self {
            let chain = Self::default();
            for height in 0..=head {
                chain.push(height, 0, 0);
            }
            chain
        }

        /// Appends a block at `height` on `fork`, whose parent is on `parent_fork`.
        ///
        /// The canonical chain is truncated to `height`.
        pub fn push(&self, height: u64, fork: u8, parent_fork: u8) {
            let block = crate::core::testing::new_test_block_ref(height, fork, parent_fork);
            let mut inner = self.inner.lock().unwrap();
            inner.canonical.truncate(height as usize);
            inner.canonical.push(block.hash.clone());
            inner.blocks.insert(block.hash.clone(), block);
        }

        pub fn hash_at(&self, height: u64) -> Hash {
            self.inner.lock().unwrap().canonical[height as usize].clone()
        }

        pub fn requests(&self) -> Vec<TestRequest> {
            self.inner.lock().unwrap().requests.clone()
        }

        pub fn test_hash(height: u64, fork: u8) -> Hash {
            new_test_hash(height, fork)
        }
    }

    impl ForkSource for TestChain {
        type Block = BlockRef;
        type Error = TestSourceError;

        async fn get_blocks(&self, from: u64, to: u64) -> Result<Vec<BlockRef>, TestSourceError> {
            let mut inner = self.inner.lock().unwrap();
            inner.requests.push(TestRequest::Heights { from, to });
            (from..=to)
                .map(|height| {
                    inner
                        .canonical
                        .get(height as usize)
                        .and_then(|hash| inner.blocks.get(hash))
                        .cloned()
                        .ok_or_else(|| Report::new(TestSourceError))
                })
                .collect()
        }

        async fn get_block_by_hash(
            &self,
            _height: u64,
            hash: Hash,
        ) -> Result<BlockRef, TestSourceError> {
            let mut inner = self.inner.lock().unwrap();
            inner.requests.push(TestRequest::Hash(hash.clone()));
            inner
                .blocks
                .get(&hash)
                .cloned()
                .ok_or_else(|| Report::new(TestSourceError))
        }

        fn block_ref(&self, block: &BlockRef) -> BlockRef {
            block.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::core::{
        testing::{new_test_hash, new_test_pointer},
        ChainPointer,
    };

    use super::{
        testing::{TestChain, TestRequest},
        ForkNavigator, HotState, NavigationError, NavigationTarget,
    };

    fn navigator_at(finalized: u64, head: u64) -> ForkNavigator {
        ForkNavigator::new(HotState {
            finalized: new_test_pointer(finalized, 0),
            unfinalized: (finalized + 1..=head)
                .map(|h| new_test_pointer(h, 0))
                .collect(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_move_forward() {
        let chain = TestChain::new(15);
        let mut navigator = navigator_at(5, 10);

        let target = NavigationTarget {
            best: 15,
            finalized: 8,
        };
        let plan = navigator.plan_move(target, &chain).await.unwrap();
        let heights = plan.blocks.iter().map(|b| b.height).collect::<Vec<_>>();
        assert_eq!(heights, vec![11, 12, 13, 14, 15]);

        // Nothing changes until the move is applied.
        assert_eq!(navigator.current_height(), 10);

        let update = navigator.apply(plan.chain, plan.blocks);
        assert_eq!(update.base_head, new_test_pointer(15, 0));
        assert_eq!(update.finalized_head, new_test_pointer(8, 0));
        assert_eq!(navigator.chain[1..].len(), 7);
    }

    #[tokio::test]
    async fn test_move_replaces_orphaned_blocks() {
        let chain = TestChain::new(10);
        let mut navigator = navigator_at(5, 10);

        // Blocks 9 and 10 on fork 0 are replaced by blocks 9..=11 on fork 1.
        chain.push(9, 1, 0);
        chain.push(10, 1, 1);
        chain.push(11, 1, 1);

        let target = NavigationTarget {
            best: 11,
            finalized: 5,
        };
        let plan = navigator.plan_move(target, &chain).await.unwrap();
        let update = navigator.apply(plan.chain, plan.blocks);

        let blocks = update
            .blocks
            .iter()
            .map(|b| b.pointer())
            .collect::<Vec<_>>();
        assert_eq!(
            blocks,
            vec![
                new_test_pointer(9, 1),
                new_test_pointer(10, 1),
                new_test_pointer(11, 1)
            ]
        );
        assert_eq!(update.base_head, new_test_pointer(11, 1));
        assert_eq!(navigator.chain[3], new_test_pointer(8, 0));
    }

    #[tokio::test]
    async fn test_move_to_shorter_fork() {
        let chain = TestChain::new(10);
        let mut navigator = navigator_at(5, 10);

        chain.push(8, 1, 0);

        let target = NavigationTarget {
            best: 8,
            finalized: 5,
        };
        let plan = navigator.plan_move(target, &chain).await.unwrap();
        let update = navigator.apply(plan.chain, plan.blocks);

        assert_eq!(update.blocks.len(), 1);
        assert_eq!(update.base_head, new_test_pointer(8, 1));
        assert_eq!(navigator.current_height(), 8);
    }

    #[tokio::test]
    async fn test_best_behind_head_keeps_chain() {
        let chain = TestChain::new(10);
        let mut navigator = navigator_at(5, 10);

        let target = NavigationTarget {
            best: 9,
            finalized: 5,
        };
        let plan = navigator.plan_move(target, &chain).await.unwrap();
        let update = navigator.apply(plan.chain, plan.blocks);

        assert!(update.blocks.is_empty());
        assert_eq!(update.base_head, new_test_pointer(10, 0));
    }

    #[tokio::test]
    async fn test_learns_unknown_finalized_hash() {
        let chain = TestChain::new(8);
        let mut navigator = ForkNavigator::new(HotState {
            finalized: ChainPointer::new_finalized(5),
            unfinalized: Vec::new(),
        })
        .unwrap();

        let target = NavigationTarget {
            best: 8,
            finalized: 5,
        };
        let plan = navigator.plan_move(target, &chain).await.unwrap();
        let update = navigator.apply(plan.chain, plan.blocks);

        assert_eq!(update.blocks.len(), 3);
        assert_eq!(update.finalized_head.hash, new_test_hash(5, 0));
    }

    #[tokio::test]
    async fn test_parent_shortcut_avoids_refetching() {
        let chain = TestChain::new(11);
        let navigator = navigator_at(5, 10);

        let target = NavigationTarget {
            best: 11,
            finalized: 5,
        };
        navigator.plan_move(target, &chain).await.unwrap();

        assert_eq!(
            chain.requests(),
            vec![TestRequest::Heights { from: 11, to: 11 }]
        );
    }

    #[tokio::test]
    async fn test_blocks_after_head_are_fetched_by_height() {
        let chain = TestChain::new(210);
        let mut navigator = navigator_at(5, 10);

        let target = NavigationTarget {
            best: 210,
            finalized: 5,
        };
        let plan = navigator.plan_move(target, &chain).await.unwrap();
        assert_eq!(
            chain.requests(),
            vec![TestRequest::Heights { from: 11, to: 210 }]
        );

        let update = navigator.apply(plan.chain, plan.blocks);
        let heights = update.blocks.iter().map(|b| b.height).collect::<Vec<_>>();
        assert_eq!(heights, (11..=210).collect::<Vec<_>>());
        assert_eq!(update.base_head, new_test_pointer(210, 0));
    }

    #[tokio::test]
    async fn test_reorg_below_head_walks_back_by_hash() {
        let chain = TestChain::new(10);
        let navigator = navigator_at(5, 10);

        chain.push(8, 1, 0);
        chain.push(9, 1, 1);
        chain.push(10, 1, 1);
        chain.push(11, 1, 1);
        chain.push(12, 1, 1);

        let target = NavigationTarget {
            best: 12,
            finalized: 5,
        };
        let plan = navigator.plan_move(target, &chain).await.unwrap();

        let pointers = plan.blocks.iter().map(|b| b.pointer()).collect::<Vec<_>>();
        assert_eq!(
            pointers,
            (8..=12).map(|h| new_test_pointer(h, 1)).collect::<Vec<_>>()
        );
        assert_eq!(
            chain.requests(),
            vec![
                TestRequest::Heights { from: 11, to: 12 },
                TestRequest::Hash(new_test_hash(10, 1)),
                TestRequest::Hash(new_test_hash(9, 1)),
                TestRequest::Hash(new_test_hash(8, 1)),
            ]
        );
    }

    #[tokio::test]
    async fn test_fork_below_finalized_is_an_error() {
        let chain = TestChain::new(10);
        let navigator = navigator_at(5, 10);

        chain.push(5, 1, 0);
        for height in 6..=10 {
            chain.push(height, 1, 1);
        }

        let target = NavigationTarget {
            best: 10,
            finalized: 5,
        };
        let err = navigator.plan_move(target, &chain).await.unwrap_err();
        assert_matches!(err.current_context(), NavigationError::BelowFinalized);
    }

    #[test]
    fn test_new_rejects_gaps() {
        let result = ForkNavigator::new(HotState {
            finalized: new_test_pointer(5, 0),
            unfinalized: vec![new_test_pointer(7, 0)],
        });
        assert!(result.is_err());
    }
}
