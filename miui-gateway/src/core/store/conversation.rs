use dashmap::DashMap;
use miui_search_sdk::Message;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, TryLockError};
use tokio::time::Instant;
use tracing::{debug, info};

use super::{
    DEFAULT_SESSION_ID, StoreResult,
    database::Database,
    users::{User, UserDirectory},
    write_queue::QueueStats,
};
use crate::core::ids;

/// Timing of the write-behind cache.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// A dirty conversation is persisted once it has not been written for this long
    pub persist_after: Duration,
    /// An unused conversation is dropped from memory after this much inactivity
    pub evict_after: Duration,
    /// How often maintenance runs
    pub cleanup_period: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persist_after: Duration::from_secs(30),
            evict_after: Duration::from_secs(60),
            cleanup_period: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub user_key: String,
    pub session_id: String,
}

impl ConversationKey {
    /// An empty session id maps to the default session.
    pub fn new(user_key: &str, session_id: &str) -> Self {
        let session_id = if session_id.is_empty() {
            DEFAULT_SESSION_ID
        } else {
            session_id
        };
        Self {
            user_key: user_key.to_string(),
            session_id: session_id.to_string(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.user_key, self.session_id)
    }
}

/// Mutable part of a conversation, guarded by the conversation's own lock.
#[derive(Debug)]
pub struct ConversationState {
    pub history: Vec<Message>,
    pub last_active: Instant,
    pub last_persist: Instant,
    pub dirty: bool,
    /// Set when the cache dropped this object. Holders must resolve again.
    pub evicted: bool,
}

impl ConversationState {
    /// Append one exchange.
    pub fn record_turn(&mut self, query: &str, answer: &str, now: Instant) {
        self.history.push(Message::user(query));
        self.history.push(Message::assistant(answer));
        self.dirty = true;
        self.last_active = now;
    }
}

pub struct Conversation {
    key: ConversationKey,
    oaid: String,
    mi_id: String,
    internal_id: String,
    in_use: AtomicUsize,
    state: Mutex<ConversationState>,
}

impl Conversation {
    fn new(
        key: ConversationKey,
        user: User,
        internal_id: String,
        history: Vec<Message>,
        now: Instant,
    ) -> Self {
        Self {
            key,
            oaid: user.oaid,
            mi_id: user.mi_id,
            internal_id,
            in_use: AtomicUsize::new(0),
            state: Mutex::new(ConversationState {
                history,
                last_active: now,
                last_persist: now,
                dirty: false,
                evicted: false,
            }),
        }
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn oaid(&self) -> &str {
        &self.oaid
    }

    pub fn mi_id(&self) -> &str {
        &self.mi_id
    }

    pub fn internal_id(&self) -> &str {
        &self.internal_id
    }

    /// Mark the conversation busy until the guard is dropped.
    pub fn acquire(self: &Arc<Self>) -> InUseGuard {
        self.in_use.fetch_add(1, Ordering::SeqCst);
        InUseGuard {
            conversation: self.clone(),
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    pub async fn lock(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().await
    }

    pub fn try_lock(&self) -> Result<MutexGuard<'_, ConversationState>, TryLockError> {
        self.state.try_lock()
    }
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("key", &self.key)
            .field("internal_id", &self.internal_id)
            .field("in_use", &self.in_use())
            .finish_non_exhaustive()
    }
}

/// Keeps a conversation out of maintenance while held.
#[must_use]
pub struct InUseGuard {
    conversation: Arc<Conversation>,
}

impl Drop for InUseGuard {
    fn drop(&mut self) {
        self.conversation.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub conversations: usize,
    pub users: usize,
    pub dirty: usize,
    pub in_use: usize,
    /// Conversations whose lock was held while counting
    pub busy: usize,
    pub write_queue: QueueStats,
}

/// In-memory table of active conversations backed by the database.
pub struct ConversationCache {
    pub(super) db: Arc<Database>,
    pub(super) config: StoreConfig,
    users: UserDirectory,
    pub(super) table: RwLock<HashMap<ConversationKey, Arc<Conversation>>>,
    loading: DashMap<ConversationKey, Arc<Mutex<()>>>,
}

impl ConversationCache {
    pub fn new(db: Arc<Database>, config: StoreConfig) -> Self {
        Self {
            users: UserDirectory::new(db.clone()),
            db,
            config,
            table: RwLock::new(HashMap::new()),
            loading: DashMap::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    /// Return the live conversation for `(user_key, session_id)`, loading or
    /// creating it on first access.
    ///
    /// Concurrent first accesses to one key construct a single object: the
    /// first caller loads while the others wait on the key's marker and then
    /// find the loaded entry.
    pub async fn resolve(&self, user_key: &str, session_id: &str) -> StoreResult<Arc<Conversation>> {
        let key = ConversationKey::new(user_key, session_id);
        if let Some(conversation) = self.lookup(&key) {
            return Ok(conversation);
        }

        let marker = {
            let entry = self.loading.entry(key.clone()).or_default();
            Arc::clone(entry.value())
        };
        let _loading = marker.lock().await;

        if let Some(conversation) = self.lookup(&key) {
            return Ok(conversation);
        }

        let loaded = self.load(&key).await;
        let conversation = loaded.map(|conversation| self.insert(key.clone(), conversation));
        self.loading.remove(&key);
        conversation
    }

    /// Stamp activity on a conversation without waiting for its lock.
    ///
    /// Returns `false` when the lock is held; the holder is an exchange in
    /// progress, which stamps activity itself when it finishes.
    pub fn touch(&self, conversation: &Conversation) -> bool {
        match conversation.try_lock() {
            Ok(mut state) => {
                state.last_active = Instant::now();
                true
            },
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub fn contains(&self, user_key: &str, session_id: &str) -> bool {
        self.table
            .read()
            .contains_key(&ConversationKey::new(user_key, session_id))
    }

    pub fn stats(&self) -> CacheStats {
        let snapshot = self.snapshot();
        let mut stats = CacheStats {
            conversations: snapshot.len(),
            users: self.users.len(),
            dirty: 0,
            in_use: 0,
            busy: 0,
            write_queue: self.db.queue().stats(),
        };
        for (_, conversation) in &snapshot {
            if conversation.in_use() > 0 {
                stats.in_use += 1;
            }
            match conversation.try_lock() {
                Ok(state) if state.dirty => stats.dirty += 1,
                Ok(_) => {},
                Err(_) => stats.busy += 1,
            }
        }
        stats
    }

    pub(super) fn snapshot(&self) -> Vec<(ConversationKey, Arc<Conversation>)> {
        self.table
            .read()
            .iter()
            .map(|(key, conversation)| (key.clone(), conversation.clone()))
            .collect()
    }

    fn lookup(&self, key: &ConversationKey) -> Option<Arc<Conversation>> {
        self.table.read().get(key).cloned()
    }

    fn insert(&self, key: ConversationKey, conversation: Conversation) -> Arc<Conversation> {
        self.table
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(conversation))
            .clone()
    }

    async fn load(&self, key: &ConversationKey) -> StoreResult<Conversation> {
        let user = self.users.get_or_create(&key.user_key).await?;
        let stored = self
            .db
            .load_conversation(&key.user_key, &key.session_id)
            .await?;

        let (internal_id, history) = match stored {
            Some(stored) => {
                debug!(
                    "Rehydrated conversation {} ({} turns)",
                    key,
                    stored.history.len()
                );
                (stored.internal_id, stored.history)
            },
            None => {
                let internal_id = ids::internal_conversation_id(&user.oaid);
                info!("New conversation {} -> {}", key, internal_id);
                (internal_id, Vec::new())
            },
        };

        Ok(Conversation::new(
            key.clone(),
            user,
            internal_id,
            history,
            Instant::now(),
        ))
    }
}
