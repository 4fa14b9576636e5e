//! DAG node encoding.
//!
//! The sync engine treats blocks as opaque bytes. To build a [`DagInfo`]
//! from a local store it only needs to know which children a block links to,
//! which is what a [`LinkCodec`] answers.
//!
//! [`DagNode`] is the built-in node format: a CBOR map with integer keys,
//! encoded deterministically so equal nodes always hash to equal IDs.
//!
//! ```text
//! { 0: [ link bytes, ... ], 1: data bytes }
//! ```
//!
//! [`DagInfo`]: crate::dag::DagInfo

use bytes::Bytes;
use ciborium::value::Value;

use crate::block::Block;
use crate::error::CoreError;
use crate::types::BlockId;

/// Node field keys. Keys 0-23 encode as single bytes in CBOR.
mod keys {
    pub const LINKS: u64 = 0;
    pub const DATA: u64 = 1;
}

/// Extracts child links from a block's bytes.
pub trait LinkCodec: Send + Sync {
    /// List the children of the block holding `data`, in link order.
    fn links(&self, data: &[u8]) -> Result<Vec<BlockId>, CoreError>;
}

/// A structural DAG node: ordered links plus an opaque payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DagNode {
    pub links: Vec<BlockId>,
    pub data: Bytes,
}

impl DagNode {
    pub fn new(links: Vec<BlockId>, data: impl Into<Bytes>) -> Self {
        Self {
            links,
            data: data.into(),
        }
    }

    /// A node with no children.
    pub fn leaf(data: impl Into<Bytes>) -> Self {
        Self::new(Vec::new(), data)
    }

    /// Encode to canonical CBOR bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        let links = self
            .links
            .iter()
            .map(|l| Value::Bytes(l.0.to_vec()))
            .collect();

        // Keys already in ascending order.
        let value = Value::Map(vec![
            (Value::Integer(keys::LINKS.into()), Value::Array(links)),
            (
                Value::Integer(keys::DATA.into()),
                Value::Bytes(self.data.to_vec()),
            ),
        ]);

        let mut buf = Vec::new();
        ciborium::into_writer(&value, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Encode and wrap as a block.
    pub fn to_block(&self) -> Result<Block, CoreError> {
        Ok(Block::new(self.encode()?))
    }

    /// Decode from CBOR bytes. Trailing bytes are rejected.
    pub fn decode(data: &[u8]) -> Result<Self, CoreError> {
        let mut reader = data;
        let value: Value = ciborium::from_reader(&mut reader)
            .map_err(|e| CoreError::DecodingError(e.to_string()))?;
        if !reader.is_empty() {
            return Err(CoreError::DecodingError(format!(
                "{} trailing bytes after node",
                reader.len()
            )));
        }

        let Value::Map(fields) = value else {
            return Err(CoreError::DecodingError("node is not a map".into()));
        };

        let mut links = None;
        let mut payload = None;
        for (key, val) in fields {
            let key = match key {
                Value::Integer(i) => i128::from(i),
                _ => return Err(CoreError::DecodingError("non-integer node key".into())),
            };
            match (key, val) {
                (k, Value::Array(items)) if k == keys::LINKS as i128 => {
                    links = Some(decode_links(items)?);
                }
                (k, Value::Bytes(bytes)) if k == keys::DATA as i128 => {
                    payload = Some(Bytes::from(bytes));
                }
                (k, _) => {
                    return Err(CoreError::DecodingError(format!(
                        "unexpected node field {k}"
                    )))
                }
            }
        }

        Ok(Self {
            links: links.ok_or_else(|| CoreError::DecodingError("missing links".into()))?,
            data: payload.ok_or_else(|| CoreError::DecodingError("missing data".into()))?,
        })
    }
}

fn decode_links(items: Vec<Value>) -> Result<Vec<BlockId>, CoreError> {
    items
        .into_iter()
        .map(|item| match item {
            Value::Bytes(bytes) => BlockId::try_from(bytes.as_slice())
                .map_err(|_| CoreError::DecodingError("link is not 32 bytes".into())),
            _ => Err(CoreError::DecodingError("link is not a byte string".into())),
        })
        .collect()
}

/// Every block must be a [`DagNode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeCodec;

impl LinkCodec for NodeCodec {
    fn links(&self, data: &[u8]) -> Result<Vec<BlockId>, CoreError> {
        Ok(DagNode::decode(data)?.links)
    }
}

/// Blocks that decode as a [`DagNode`] contribute links; anything else is
/// treated as a raw leaf.
#[derive(Debug, Clone, Copy, Default)]
pub struct LenientCodec;

impl LinkCodec for LenientCodec {
    fn links(&self, data: &[u8]) -> Result<Vec<BlockId>, CoreError> {
        Ok(DagNode::decode(data).map(|n| n.links).unwrap_or_default())
    }
}
