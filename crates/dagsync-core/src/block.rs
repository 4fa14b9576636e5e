//! Immutable content-addressed blocks.

use bytes::Bytes;

use crate::error::CoreError;
use crate::types::BlockId;

/// A raw block: immutable bytes plus the identifier they hash to.
///
/// A `Block` can only be built by hashing or by verifying, so holding one
/// means `id == BlockId::of(&data)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    id: BlockId,
    data: Bytes,
}

impl Block {
    /// Create a block from its bytes, computing the identifier.
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            id: BlockId::of(&data),
            data,
        }
    }

    /// Accept bytes presented under a claimed identifier.
    ///
    /// This is the content-address check applied to every block that
    /// crosses the wire.
    pub fn verified(id: BlockId, data: impl Into<Bytes>) -> Result<Self, CoreError> {
        let data = data.into();
        let actual = BlockId::of(&data);
        if actual != id {
            return Err(CoreError::HashMismatch {
                expected: id,
                actual,
            });
        }
        Ok(Self { id, data })
    }

    pub fn id(&self) -> &BlockId {
        &self.id
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn into_parts(self) -> (BlockId, Bytes) {
        (self.id, self.data)
    }
}
