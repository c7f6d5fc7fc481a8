use error_stack::{Result, ResultExt};
use serde::{Deserialize, Serialize};

/// A range of block heights. An open `to` follows the chain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: Option<u64>,
}

/// A range of block heights with both ends included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiniteRange {
    pub from: u64,
    pub to: u64,
}

/// A request applied to all blocks in `range`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeRequest<R> {
    pub range: BlockRange,
    pub request: R,
}

/// A finite piece of a [RangeRequest], fetched as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSplit<R> {
    pub range: FiniteRange,
    pub request: R,
}

/// Blocks produced by one fetch, in ascending height order.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<B> {
    pub blocks: Vec<B>,
    /// True if the last block in the batch is the chain head at the time of the fetch.
    pub is_head: bool,
}

#[derive(Debug)]
pub struct InvalidRangeError;

impl BlockRange {
    pub fn new(from: u64, to: impl Into<Option<u64>>) -> Self {
        Self {
            from,
            to: to.into(),
        }
    }

    /// The last height in the range, `u64::MAX` if the range is open.
    pub fn end(&self) -> u64 {
        self.to.unwrap_or(u64::MAX)
    }

    pub fn contains(&self, height: u64) -> bool {
        self.from <= height && height <= self.end()
    }

    pub fn validate(&self) -> Result<(), InvalidRangeError> {
        if self.from > self.end() {
            return Err(InvalidRangeError)
                .attach_printable("range start is after range end")
                .attach_printable_lazy(|| format!("range: {self}"));
        }
        Ok(())
    }

    /// Returns the part of the range between `from` and `to`, if any.
    pub fn intersect(&self, from: u64, to: u64) -> Option<FiniteRange> {
        let from = from.max(self.from);
        let to = to.min(self.end());
        if from > to {
            None
        } else {
            Some(FiniteRange { from, to })
        }
    }
}

impl FiniteRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    pub fn len(&self) -> u64 {
        self.to.saturating_sub(self.from) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }

    pub fn heights(&self) -> std::ops::RangeInclusive<u64> {
        self.from..=self.to
    }
}

impl<R> RangeRequest<R> {
    pub fn new(range: BlockRange, request: R) -> Self {
        Self { range, request }
    }
}

impl<B> Batch<B> {
    pub fn new(blocks: Vec<B>, is_head: bool) -> Self {
        Self { blocks, is_head }
    }
}

impl From<FiniteRange> for BlockRange {
    fn from(value: FiniteRange) -> Self {
        BlockRange {
            from: value.from,
            to: Some(value.to),
        }
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to {
            Some(to) => write!(f, "[{}, {}]", self.from, to),
            None => write!(f, "[{}, ...)", self.from),
        }
    }
}

impl std::fmt::Display for FiniteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

impl error_stack::Context for InvalidRangeError {}

impl std::fmt::Display for InvalidRangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("invalid block range")
    }
}
