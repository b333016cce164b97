//! Write-behind and eviction
//!
//! Every tick looks at each cached conversation that nobody is using:
//!
//! * dirty and not written for `persist_after` → queued for persistence
//! * idle for `evict_after` → flushed, awaited, then dropped from memory
//!
//! A conversation that is in use or whose lock is held is left alone for
//! this tick. Removal re-checks everything under the table write lock so a
//! request that arrived during the flush keeps its conversation.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{
    StoreResult,
    conversation::{Conversation, ConversationCache, ConversationKey, ConversationState},
    database,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Dirty conversations queued for persistence
    pub persisted: usize,
    /// Conversations flushed ahead of eviction
    pub flushed: usize,
    pub evicted: usize,
    /// Skipped because a request holds them
    pub in_use: usize,
    /// Skipped because their lock was held
    pub busy: usize,
    pub failed: usize,
}

impl MaintenanceReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Serialize the current history into a persistence closure and mark the
/// state clean.
fn take_snapshot(
    conversation: &Conversation,
    state: &mut ConversationState,
    now: Instant,
) -> StoreResult<impl FnOnce(&rusqlite::Connection) -> StoreResult<()> + Send + 'static> {
    let history_json = serde_json::to_string(&state.history)?;
    state.dirty = false;
    state.last_persist = now;

    let key = conversation.key();
    Ok(database::upsert_conversation(
        key.user_key.clone(),
        key.session_id.clone(),
        conversation.internal_id().to_string(),
        history_json,
        Utc::now().timestamp(),
    ))
}

impl ConversationCache {
    /// One maintenance pass evaluated at `now`.
    pub async fn run_maintenance(&self, now: Instant) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let mut candidates = Vec::new();

        for (key, conversation) in self.snapshot() {
            if conversation.in_use() > 0 {
                report.in_use += 1;
                continue;
            }
            let Ok(mut state) = conversation.try_lock() else {
                report.busy += 1;
                continue;
            };
            if conversation.in_use() > 0 {
                report.in_use += 1;
                continue;
            }

            let persist = if state.dirty
                && now.saturating_duration_since(state.last_persist) >= self.config.persist_after
            {
                match take_snapshot(&conversation, &mut state, now) {
                    Ok(op) => Some(op),
                    Err(e) => {
                        warn!("Could not serialize history of {}: {}", key, e);
                        report.failed += 1;
                        None
                    },
                }
            } else {
                None
            };
            let idle = now.saturating_duration_since(state.last_active) >= self.config.evict_after;
            // released before submit, which waits while the queue is full
            drop(state);

            if let Some(op) = persist {
                match self.db.queue().submit(op).await {
                    Ok(()) => report.persisted += 1,
                    Err(e) => {
                        warn!("Could not queue persistence of {}: {}", key, e);
                        conversation.lock().await.dirty = true;
                        report.failed += 1;
                    },
                }
            }

            if idle {
                candidates.push((key, conversation));
            }
        }

        let mut flushed = Vec::with_capacity(candidates.len());
        for (key, conversation) in candidates {
            if self.flush_for_eviction(&key, &conversation, now).await {
                report.flushed += 1;
                flushed.push((key, conversation));
            } else {
                report.failed += 1;
            }
        }

        report.evicted = self.remove_idle(flushed, now);
        if report.evicted > 0 {
            debug!(
                "Evicted {} conversations, {} remain cached",
                report.evicted,
                self.len()
            );
        }
        report
    }

    /// Persist a conversation about to be evicted and wait for the commit.
    async fn flush_for_eviction(
        &self,
        key: &ConversationKey,
        conversation: &Conversation,
        now: Instant,
    ) -> bool {
        let op = {
            let Ok(mut state) = conversation.try_lock() else {
                return false;
            };
            match take_snapshot(conversation, &mut state, now) {
                Ok(op) => op,
                Err(e) => {
                    warn!("Could not serialize history of {}: {}", key, e);
                    return false;
                },
            }
        };

        match self.db.queue().submit_and_wait(op).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Final flush of {} failed, keeping it cached: {}", key, e);
                conversation.lock().await.dirty = true;
                false
            },
        }
    }

    fn remove_idle(&self, flushed: Vec<(ConversationKey, Arc<Conversation>)>, now: Instant) -> usize {
        let mut table = self.table.write();
        let mut evicted = 0;

        for (key, conversation) in flushed {
            match table.get(&key) {
                Some(current) if Arc::ptr_eq(current, &conversation) => {},
                _ => continue,
            }
            let Ok(mut state) = conversation.try_lock() else {
                continue;
            };
            if conversation.in_use() > 0
                || state.dirty
                || now.saturating_duration_since(state.last_active) < self.config.evict_after
            {
                continue;
            }

            state.evicted = true;
            table.remove(&key);
            evicted += 1;
        }

        evicted
    }

    /// Persist every dirty conversation and wait for the writes. Used on
    /// shutdown; waits for in-flight requests to release their conversations.
    pub async fn flush_all(&self) -> usize {
        let mut written = 0;
        let now = Instant::now();

        for (key, conversation) in self.snapshot() {
            let op = {
                let mut state = conversation.lock().await;
                if !state.dirty {
                    continue;
                }
                match take_snapshot(&conversation, &mut state, now) {
                    Ok(op) => op,
                    Err(e) => {
                        warn!("Could not serialize history of {}: {}", key, e);
                        continue;
                    },
                }
            };
            match self.db.queue().submit_and_wait(op).await {
                Ok(()) => written += 1,
                Err(e) => warn!("Flush of {} failed: {}", key, e),
            }
        }

        info!("Flushed {} dirty conversations", written);
        written
    }
}

/// Run maintenance every `period` until `shutdown` flips to `true`.
pub fn spawn_maintenance(
    cache: Arc<ConversationCache>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        info!("Maintenance loop started (period: {:?})", period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = cache.run_maintenance(Instant::now()).await;
                    if !report.is_idle() {
                        debug!("Maintenance: {:?}", report);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Maintenance loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::{Database, StoreConfig};
    use miui_search_sdk::Message;

    const IDLE: Duration = Duration::from_secs(61);

    fn open(dir: &tempfile::TempDir) -> Arc<ConversationCache> {
        let db = Arc::new(Database::open(dir.path().join("evict.db"), 2, 64).unwrap());
        Arc::new(ConversationCache::new(db, StoreConfig::default()))
    }

    async fn say(conversation: &Conversation, query: &str, answer: &str) {
        conversation
            .lock()
            .await
            .record_turn(query, answer, Instant::now());
    }

    #[tokio::test]
    async fn test_fresh_conversation_survives_tick() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        cache.resolve("u", "s").await.unwrap();

        let report = cache.run_maintenance(Instant::now()).await;

        assert_eq!(report.evicted, 0);
        assert!(cache.contains("u", "s"));
    }

    #[tokio::test]
    async fn test_idle_conversation_is_persisted_and_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let conversation = cache.resolve("u", "s").await.unwrap();
        say(&conversation, "q1", "a1").await;

        let report = cache.run_maintenance(Instant::now() + IDLE).await;

        assert_eq!(report.evicted, 1);
        assert!(!cache.contains("u", "s"));
        assert!(conversation.lock().await.evicted);

        let stored = cache
            .database()
            .load_conversation("u", "s")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.internal_id, conversation.internal_id());
        assert_eq!(stored.history, vec![Message::user("q1"), Message::assistant("a1")]);
    }

    #[tokio::test]
    async fn test_persist_on_full_queue_leaves_conversation_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(dir.path().join("full.db"), 1, 1).unwrap());
        let cache = Arc::new(ConversationCache::new(db, StoreConfig::default()));
        let conversation = cache.resolve("u", "s").await.unwrap();
        say(&conversation, "q", "a").await;

        let queue = cache.database().queue().clone();
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        queue
            .submit(move |_| {
                let _ = started_tx.send(());
                let _ = gate_rx.recv();
                Ok(())
            })
            .await
            .unwrap();
        started_rx.await.unwrap();
        queue.submit(|_| Ok(())).await.unwrap();

        let maintenance = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .run_maintenance(Instant::now() + Duration::from_secs(31))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!maintenance.is_finished(), "persist should wait for queue capacity");

        let state = tokio::time::timeout(Duration::from_millis(200), conversation.lock())
            .await
            .expect("conversation lock is free while persistence waits");
        assert!(!state.dirty);
        drop(state);

        gate_tx.send(()).unwrap();
        let report = maintenance.await.unwrap();
        assert_eq!(report.persisted, 1);
        assert_eq!(report.evicted, 0);
    }

    #[tokio::test]
    async fn test_in_use_conversation_is_never_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let conversation = cache.resolve("u", "s").await.unwrap();
        say(&conversation, "q", "a").await;

        let guard = conversation.acquire();
        for secs in [0u64, 31, 61, 600, 86_400] {
            let report = cache
                .run_maintenance(Instant::now() + Duration::from_secs(secs))
                .await;
            assert_eq!(report.evicted, 0);
            assert_eq!(report.persisted, 0);
            assert!(cache.contains("u", "s"));
        }
        // still dirty: in-use conversations are not force-persisted either
        assert!(conversation.lock().await.dirty);

        drop(guard);
        let report = cache.run_maintenance(Instant::now() + IDLE).await;
        assert_eq!(report.evicted, 1);
    }

    #[tokio::test]
    async fn test_locked_conversation_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let conversation = cache.resolve("u", "s").await.unwrap();

        let state = conversation.lock().await;
        let report = cache.run_maintenance(Instant::now() + IDLE).await;
        drop(state);

        assert_eq!(report.busy, 1);
        assert!(cache.contains("u", "s"));
    }

    #[tokio::test]
    async fn test_dirty_conversation_persists_before_eviction_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let conversation = cache.resolve("u", "s").await.unwrap();
        say(&conversation, "q", "a").await;

        let report = cache
            .run_maintenance(Instant::now() + Duration::from_secs(31))
            .await;
        assert_eq!(report.persisted, 1);
        assert_eq!(report.evicted, 0);
        assert!(!conversation.lock().await.dirty);

        // make sure the fire-and-forget write landed
        cache.database().queue().submit_and_wait(|_| Ok(())).await.unwrap();
        let stored = cache
            .database()
            .load_conversation("u", "s")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.history.len(), 2);
    }

    #[tokio::test]
    async fn test_evicted_conversation_rehydrates() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let before = cache.resolve("u", "s").await.unwrap();
        say(&before, "q1", "a1").await;
        cache.run_maintenance(Instant::now() + IDLE).await;
        assert!(!cache.contains("u", "s"));

        let after = cache.resolve("u", "s").await.unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.internal_id(), before.internal_id());
        assert_eq!(after.oaid(), before.oaid());
        let state = after.lock().await;
        assert_eq!(state.history, vec![Message::user("q1"), Message::assistant("a1")]);
        assert!(!state.dirty);
        assert!(!state.evicted);
    }

    #[tokio::test]
    async fn test_flush_all_writes_dirty_conversations() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        for session in ["a", "b", "c"] {
            let conversation = cache.resolve("u", session).await.unwrap();
            if session != "c" {
                say(&conversation, "q", "a").await;
            }
        }

        assert_eq!(cache.flush_all().await, 2);
        assert_eq!(cache.stats().dirty, 0);
        assert!(cache.database().load_conversation("u", "c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let (tx, rx) = watch::channel(false);

        let handle = spawn_maintenance(cache, Duration::from_millis(10), rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
