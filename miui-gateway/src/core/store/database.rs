use miui_search_sdk::Message;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::thread::JoinHandle;
use tracing::{info, warn};

use super::{StoreError, StoreResult, schema, write_queue::WriteQueue};

/// Durable copy of a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredConversation {
    pub internal_id: String,
    pub history: Vec<Message>,
}

/// SQLite handle: one writer thread behind a [`WriteQueue`] plus a pool of
/// read connections used from the blocking thread pool.
pub struct Database {
    path: PathBuf,
    readers: Vec<Arc<Mutex<Connection>>>,
    next_reader: AtomicUsize,
    queue: WriteQueue,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Database {
    pub fn open(
        path: impl AsRef<Path>,
        read_connections: usize,
        queue_capacity: usize,
    ) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        let writer = Connection::open(&path)?;
        schema::configure(&writer)?;
        schema::migrate(&writer)?;

        let readers = (0..read_connections.max(1))
            .map(|_| -> StoreResult<Arc<Mutex<Connection>>> {
                let conn = Connection::open(&path)?;
                schema::configure(&conn)?;
                conn.pragma_update(None, "query_only", true)?;
                Ok(Arc::new(Mutex::new(conn)))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let (queue, handle) = WriteQueue::spawn(writer, queue_capacity)?;

        info!(
            "Opened database {} ({} read connections)",
            path.display(),
            readers.len()
        );

        Ok(Self {
            path,
            readers,
            next_reader: AtomicUsize::new(0),
            queue,
            writer: Mutex::new(Some(handle)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn queue(&self) -> &WriteQueue {
        &self.queue
    }

    /// Run `f` on a read connection without blocking the async runtime.
    pub async fn read<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[index].clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
        .map_err(StoreError::from)
    }

    /// Returns `(oaid, mi_id)` for `user_key` if the user exists.
    pub async fn load_user(&self, user_key: &str) -> StoreResult<Option<(String, String)>> {
        let user_key = user_key.to_string();
        self.read(move |conn| {
            conn.query_row(schema::SELECT_USER, [&user_key], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()
        })
        .await
    }

    pub async fn load_conversation(
        &self,
        user_key: &str,
        session_id: &str,
    ) -> StoreResult<Option<StoredConversation>> {
        let (user_key, session_id) = (user_key.to_string(), session_id.to_string());
        let row: Option<(String, String)> = self
            .read(move |conn| {
                conn.query_row(
                    schema::SELECT_CONVERSATION,
                    [&user_key, &session_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
            })
            .await?;

        Ok(row.map(|(internal_id, history_json)| {
            let history = serde_json::from_str(&history_json).unwrap_or_else(|e| {
                warn!(
                    "Discarding unreadable history of conversation {}: {}",
                    internal_id, e
                );
                Vec::new()
            });
            StoredConversation {
                internal_id,
                history,
            }
        }))
    }

    /// Drain the write queue and stop the writer thread.
    pub async fn close(&self) {
        self.queue.shutdown().await;
        let handle = self.writer.lock().take();
        if let Some(handle) = handle {
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("Writer thread did not exit cleanly");
            }
        }
        info!("Database {} closed", self.path.display());
    }
}

/// Insert a user unless one already exists for the key.
pub fn insert_user(
    user_key: String,
    oaid: String,
    mi_id: String,
    created_at: i64,
) -> impl FnOnce(&Connection) -> StoreResult<()> + Send + 'static {
    move |conn| {
        conn.execute(schema::INSERT_USER, (&user_key, &oaid, &mi_id, created_at))?;
        Ok(())
    }
}

/// Write the full history of a conversation, replacing any previous copy.
pub fn upsert_conversation(
    user_key: String,
    session_id: String,
    internal_id: String,
    history_json: String,
    updated_at: i64,
) -> impl FnOnce(&Connection) -> StoreResult<()> + Send + 'static {
    move |conn| {
        conn.execute(
            schema::UPSERT_CONVERSATION,
            (&user_key, &session_id, &internal_id, &history_json, updated_at),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_persisted_history_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("roundtrip.db"), 2, 16).unwrap();

        let history = vec![
            Message::user("q1"),
            Message::assistant("a1"),
            Message::user("q2"),
            Message::assistant("a2"),
        ];
        let json = serde_json::to_string(&history).unwrap();
        db.queue()
            .submit_and_wait(upsert_conversation(
                "u".into(),
                "default".into(),
                "oaid1700000000000".into(),
                json,
                1_700_000_000,
            ))
            .await
            .unwrap();

        let stored = db.load_conversation("u", "default").await.unwrap().unwrap();
        assert_eq!(stored.internal_id, "oaid1700000000000");
        assert_eq!(stored.history, history);
        assert!(db.load_conversation("u", "other").await.unwrap().is_none());

        db.close().await;
    }

    #[tokio::test]
    async fn test_insert_user_keeps_first_row() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("users.db"), 1, 16).unwrap();

        for (oaid, mi_id) in [("aaaa", "1000000001"), ("bbbb", "1000000002")] {
            db.queue()
                .submit_and_wait(insert_user("k".into(), oaid.into(), mi_id.into(), 1))
                .await
                .unwrap();
        }

        let user = db.load_user("k").await.unwrap();
        assert_eq!(user, Some(("aaaa".to_string(), "1000000001".to_string())));
        assert_eq!(db.load_user("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreadable_history_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("broken.db"), 1, 16).unwrap();

        db.queue()
            .submit_and_wait(upsert_conversation(
                "u".into(),
                "s".into(),
                "id".into(),
                "not json".into(),
                1,
            ))
            .await
            .unwrap();

        let stored = db.load_conversation("u", "s").await.unwrap().unwrap();
        assert_eq!(stored.internal_id, "id");
        assert!(stored.history.is_empty());
    }
}
