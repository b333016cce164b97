//! Single-writer queue
//!
//! Every mutation of the database is a closure executed inside its own
//! transaction on one dedicated OS thread, the only holder of a writable
//! connection. Items are applied strictly in submission order.
//!
//! The channel is bounded. A full queue makes `submit` wait for capacity, so
//! nothing is dropped by the queue itself.

use rusqlite::Connection;
use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{StoreError, StoreResult};

type WriteOp = Box<dyn FnOnce(&Connection) -> StoreResult<()> + Send>;

enum Command {
    Write {
        op: WriteOp,
        done: Option<oneshot::Sender<StoreResult<()>>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

#[derive(Debug, Default)]
struct Counters {
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct QueueStats {
    pub capacity: usize,
    pub pending: usize,
    pub committed: u64,
    pub rolled_back: u64,
}

#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::Sender<Command>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl WriteQueue {
    /// Start the writer thread. `conn` must already be configured and migrated.
    pub fn spawn(conn: Connection, capacity: usize) -> StoreResult<(Self, JoinHandle<()>)> {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let counters = Arc::new(Counters::default());

        let worker_counters = counters.clone();
        let handle = std::thread::Builder::new()
            .name("sqlite-writer".to_string())
            .spawn(move || run_writer(conn, rx, worker_counters))?;

        info!("Write queue started (capacity: {})", capacity);

        Ok((
            Self {
                tx,
                capacity,
                counters,
            },
            handle,
        ))
    }

    /// Enqueue `op` without waiting for its outcome. Failures are logged by
    /// the writer.
    pub async fn submit<F>(&self, op: F) -> StoreResult<()>
    where
        F: FnOnce(&Connection) -> StoreResult<()> + Send + 'static,
    {
        self.tx
            .send(Command::Write {
                op: Box::new(op),
                done: None,
            })
            .await
            .map_err(|_| StoreError::QueueClosed)
    }

    /// Enqueue `op` and wait until its transaction committed or rolled back.
    pub async fn submit_and_wait<F>(&self, op: F) -> StoreResult<()>
    where
        F: FnOnce(&Connection) -> StoreResult<()> + Send + 'static,
    {
        let (done, result) = oneshot::channel();
        self.tx
            .send(Command::Write {
                op: Box::new(op),
                done: Some(done),
            })
            .await
            .map_err(|_| StoreError::QueueClosed)?;

        result.await.map_err(|_| StoreError::WriterGone)?
    }

    /// Stop accepting writes, apply everything already queued, then return.
    ///
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        let (ack, acked) = oneshot::channel();
        if self.tx.send(Command::Shutdown { ack }).await.is_err() {
            debug!("Write queue already closed");
            return;
        }
        let _ = acked.await;
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            capacity: self.capacity,
            pending: self.capacity - self.tx.capacity(),
            committed: self.counters.committed.load(Ordering::Relaxed),
            rolled_back: self.counters.rolled_back.load(Ordering::Relaxed),
        }
    }
}

fn run_writer(mut conn: Connection, mut rx: mpsc::Receiver<Command>, counters: Arc<Counters>) {
    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Write { op, done } => execute(&mut conn, op, done, &counters),
            Command::Shutdown { ack } => {
                rx.close();
                let mut acks = vec![ack];
                let mut drained = 0usize;
                while let Some(command) = rx.blocking_recv() {
                    match command {
                        Command::Write { op, done } => {
                            execute(&mut conn, op, done, &counters);
                            drained += 1;
                        },
                        Command::Shutdown { ack } => acks.push(ack),
                    }
                }
                info!("Write queue drained {} pending writes and stopped", drained);
                for ack in acks {
                    let _ = ack.send(());
                }
                return;
            },
        }
    }
    debug!("All write queue handles dropped, writer exiting");
}

fn execute(
    conn: &mut Connection,
    op: WriteOp,
    done: Option<oneshot::Sender<StoreResult<()>>>,
    counters: &Counters,
) {
    let result = apply(conn, op);
    match &result {
        Ok(()) => {
            counters.committed.fetch_add(1, Ordering::Relaxed);
        },
        Err(e) => {
            counters.rolled_back.fetch_add(1, Ordering::Relaxed);
            if done.is_none() {
                warn!("Background write failed: {}", e);
            }
        },
    }
    if let Some(done) = done {
        let _ = done.send(result);
    }
}

fn apply(conn: &mut Connection, op: WriteOp) -> StoreResult<()> {
    let tx = conn.transaction()?;
    match op(&tx) {
        Ok(()) => {
            tx.commit()?;
            Ok(())
        },
        Err(e) => {
            tx.rollback()?;
            Err(e)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::schema;
    use std::path::Path;
    use std::time::Duration;

    fn open(path: &Path) -> Connection {
        let conn = Connection::open(path).unwrap();
        schema::configure(&conn).unwrap();
        conn.execute_batch("CREATE TABLE IF NOT EXISTS log (seq INTEGER NOT NULL)")
            .unwrap();
        conn
    }

    fn rows(path: &Path) -> Vec<i64> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn.prepare("SELECT seq FROM log ORDER BY rowid").unwrap();
        let seqs = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<i64>, _>>()
            .unwrap();
        seqs
    }

    #[tokio::test]
    async fn test_writes_apply_in_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("order.db");
        let (queue, _handle) = WriteQueue::spawn(open(&path), 8).unwrap();

        for seq in 0..20i64 {
            queue
                .submit(move |conn| {
                    conn.execute("INSERT INTO log (seq) VALUES (?1)", [seq])?;
                    Ok(())
                })
                .await
                .unwrap();
        }
        queue.submit_and_wait(|_| Ok(())).await.unwrap();

        assert_eq!(rows(&path), (0..20).collect::<Vec<_>>());
        assert_eq!(queue.stats().committed, 21);
    }

    #[tokio::test]
    async fn test_failed_closure_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollback.db");
        let (queue, _handle) = WriteQueue::spawn(open(&path), 4).unwrap();

        let result = queue
            .submit_and_wait(|conn| {
                conn.execute("INSERT INTO log (seq) VALUES (1)", [])?;
                Err(StoreError::MissingUser("forced".to_string()))
            })
            .await;

        assert!(matches!(result, Err(StoreError::MissingUser(_))));
        assert!(rows(&path).is_empty());
        assert_eq!(queue.stats().rolled_back, 1);
    }

    #[tokio::test]
    async fn test_full_queue_blocks_submitter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backpressure.db");
        let (queue, _handle) = WriteQueue::spawn(open(&path), 1).unwrap();

        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel();
        queue
            .submit(move |_| {
                let _ = started_tx.send(());
                let _ = gate_rx.recv();
                Ok(())
            })
            .await
            .unwrap();
        started_rx.await.unwrap();

        // writer is busy; this one takes the only buffer slot
        queue.submit(|_| Ok(())).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(100), queue.submit(|_| Ok(()))).await;
        assert!(blocked.is_err(), "submit should wait while the queue is full");

        let waiting = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.submit(|_| Ok(())).await })
        };
        gate_tx.send(()).unwrap();
        waiting.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shutdown.db");
        let (queue, handle) = WriteQueue::spawn(open(&path), 16).unwrap();

        for seq in 0..5i64 {
            queue
                .submit(move |conn| {
                    conn.execute("INSERT INTO log (seq) VALUES (?1)", [seq])?;
                    Ok(())
                })
                .await
                .unwrap();
        }
        queue.shutdown().await;
        handle.join().unwrap();

        assert_eq!(rows(&path).len(), 5);
        let rejected = queue.submit(|_| Ok(())).await;
        assert!(matches!(rejected, Err(StoreError::QueueClosed)));

        // second shutdown is a no-op
        queue.shutdown().await;
    }
}
