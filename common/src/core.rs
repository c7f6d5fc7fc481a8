use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Opaque block hash.
///
/// An empty hash means the hash is not known yet, for example for a finalized
/// pointer restored from a height only.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub Vec<u8>);

/// Pointer to a block on a specific branch of the chain.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainPointer {
    pub height: u64,
    pub hash: Hash,
}

/// The information needed to link a block to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub height: u64,
    pub hash: Hash,
    pub parent_hash: Hash,
}

/// Implemented by blocks that know their own height.
pub trait HasHeight {
    fn height(&self) -> u64;
}

impl Hash {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_hex(&self) -> String {
        if self.0.is_empty() {
            return "0x".to_string();
        }
        format!("0x{}", hex::encode(&self.0))
    }

    pub fn from_hex(value: &str) -> Result<Self, hex::FromHexError> {
        let value = value.strip_prefix("0x").unwrap_or(value);
        hex::decode(value).map(Self)
    }
}

impl ChainPointer {
    pub fn new(height: u64, hash: impl Into<Hash>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }

    /// A pointer to a block whose hash is not known.
    pub fn new_finalized(height: u64) -> Self {
        Self {
            height,
            hash: Hash::default(),
        }
    }

    /// Returns true if `other` points to the same block, treating an unknown hash as a
    /// wildcard.
    pub fn matches(&self, height: u64, hash: &Hash) -> bool {
        self.height == height && (self.hash.is_empty() || &self.hash == hash)
    }
}

impl BlockRef {
    pub fn pointer(&self) -> ChainPointer {
        ChainPointer {
            height: self.height,
            hash: self.hash.clone(),
        }
    }
}

impl From<Vec<u8>> for Hash {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for Hash {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash({})", self.as_hex())
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_hex())
    }
}

impl std::fmt::Debug for ChainPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChainPointer(h={} #={})", self.height, self.hash.as_hex())
    }
}

impl std::fmt::Display for ChainPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.height, self.hash.as_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Hash::from_hex(&value).map_err(de::Error::custom)
    }
}

pub mod testing {
    use super::{BlockRef, ChainPointer, Hash};

    /// Returns a hash that depends on the block height and the chain (fork) id.
    pub fn new_test_hash(height: u64, chain: u8) -> Hash {
        let mut hash = height.to_be_bytes().to_vec();
        hash.push(chain);
        Hash(hash)
    }

    /// Returns a new test pointer where the hash depends on the height and chain.
    pub fn new_test_pointer(height: u64, chain: u8) -> ChainPointer {
        ChainPointer {
            height,
            hash: new_test_hash(height, chain),
        }
    }

    /// Returns a block ref on `chain` whose parent lives on `parent_chain`.
    pub fn new_test_block_ref(height: u64, chain: u8, parent_chain: u8) -> BlockRef {
        BlockRef {
            height,
            hash: new_test_hash(height, chain),
            parent_hash: new_test_hash(height.saturating_sub(1), parent_chain),
        }
    }
}
