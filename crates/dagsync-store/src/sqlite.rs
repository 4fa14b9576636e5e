//! SQLite implementation of the BlockStore trait.
//!
//! The durable storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use dagsync_core::BlockId;

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{BlockStore, PutResult};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(format!("mutex poisoned: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

fn row_to_block_id(bytes: Vec<u8>) -> Result<BlockId> {
    BlockId::try_from(bytes.as_slice())
        .map_err(|_| StoreError::InvalidData(format!("block id of {} bytes", bytes.len())))
}

#[async_trait]
impl BlockStore for SqliteStore {
    async fn has(&self, id: &BlockId) -> Result<bool> {
        let id = *id;
        self.with_conn(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM blocks WHERE block_id = ?1)",
                params![id.0.as_slice()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    async fn get(&self, id: &BlockId) -> Result<Option<Bytes>> {
        let id = *id;
        self.with_conn(move |conn| {
            let data: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT data FROM blocks WHERE block_id = ?1",
                    params![id.0.as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(data.map(Bytes::from))
        })
        .await
    }

    async fn put(&self, id: &BlockId, data: Bytes) -> Result<PutResult> {
        let id = *id;
        self.with_conn(move |conn| {
            // INSERT OR IGNORE: same ID means same bytes.
            let changed = conn.execute(
                "INSERT OR IGNORE INTO blocks (block_id, data, size, stored_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.0.as_slice(),
                    data.as_ref(),
                    data.len() as i64,
                    now_millis()
                ],
            )?;

            Ok(if changed == 0 {
                PutResult::AlreadyExists
            } else {
                PutResult::Inserted
            })
        })
        .await
    }

    async fn pin(&self, root: &BlockId) -> Result<()> {
        let root = *root;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO pins (root, pinned_at) VALUES (?1, ?2)",
                params![root.0.as_slice(), now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn unpin(&self, root: &BlockId) -> Result<bool> {
        let root = *root;
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM pins WHERE root = ?1",
                params![root.0.as_slice()],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn is_pinned(&self, root: &BlockId) -> Result<bool> {
        let root = *root;
        self.with_conn(move |conn| {
            let pinned: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM pins WHERE root = ?1)",
                params![root.0.as_slice()],
                |row| row.get(0),
            )?;
            Ok(pinned)
        })
        .await
    }

    async fn pins(&self) -> Result<Vec<BlockId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT root FROM pins ORDER BY root")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(row_to_block_id).collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;
    use dagsync_core::{Block, DagNode, NodeCodec};

    #[tokio::test]
    async fn test_put_and_get_block() {
        let store = SqliteStore::open_memory().unwrap();
        let block = Block::new(&b"sqlite block"[..]);

        let result = store.put_block(&block).await.unwrap();
        assert_eq!(result, PutResult::Inserted);

        let data = store.get(block.id()).await.unwrap().unwrap();
        assert_eq!(data, *block.data());
        assert!(store.has(block.id()).await.unwrap());
        assert!(!store.has(&BlockId::of(b"other")).await.unwrap());
    }

    #[tokio::test]
    async fn test_idempotent_put() {
        let store = SqliteStore::open_memory().unwrap();
        let block = Block::new(&b"again"[..]);

        assert_eq!(store.put_block(&block).await.unwrap(), PutResult::Inserted);
        assert_eq!(
            store.put_block(&block).await.unwrap(),
            PutResult::AlreadyExists
        );
    }

    #[tokio::test]
    async fn test_pin_lifecycle() {
        let store = SqliteStore::open_memory().unwrap();
        let a = BlockId::from_bytes([0x0a; 32]);
        let b = BlockId::from_bytes([0x0b; 32]);

        store.pin(&b).await.unwrap();
        store.pin(&a).await.unwrap();
        store.pin(&a).await.unwrap();
        assert_eq!(store.pins().await.unwrap(), vec![a, b]);

        assert!(store.unpin(&a).await.unwrap());
        assert!(!store.is_pinned(&a).await.unwrap());
        assert!(store.is_pinned(&b).await.unwrap());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.db");

        let leaf = DagNode::leaf(&b"durable"[..]).to_block().unwrap();
        let root = DagNode::new(vec![*leaf.id()], &b"r"[..]).to_block().unwrap();
        {
            let store = SqliteStore::open(&path).unwrap();
            store.put_block(&root).await.unwrap();
            store.put_block(&leaf).await.unwrap();
            store.pin(root.id()).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert!(store.is_pinned(root.id()).await.unwrap());
        let info = store.dag_info(&NodeCodec, root.id()).await.unwrap();
        assert_eq!(info.len(), 2);
    }
}
