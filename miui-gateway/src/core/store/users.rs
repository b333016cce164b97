use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{StoreError, StoreResult, database::{self, Database}};
use crate::core::ids;

/// Upstream identity assigned to a caller. Never changes once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_key: String,
    pub oaid: String,
    pub mi_id: String,
}

pub struct UserDirectory {
    db: Arc<Database>,
    users: RwLock<HashMap<String, User>>,
}

impl UserDirectory {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Look `user_key` up in memory, then in the database, and create it if
    /// neither has it.
    ///
    /// Creation is insert-if-absent followed by a read-back, so concurrent
    /// first requests for one key all end up with the row that won.
    pub async fn get_or_create(&self, user_key: &str) -> StoreResult<User> {
        let cached = self.users.read().get(user_key).cloned();
        if let Some(user) = cached {
            return Ok(user);
        }

        if let Some(user) = self.load(user_key).await? {
            return Ok(self.remember(user));
        }

        let (oaid, mi_id) = (ids::new_oaid(), ids::new_mi_id());
        self.db
            .queue()
            .submit_and_wait(database::insert_user(
                user_key.to_string(),
                oaid,
                mi_id,
                Utc::now().timestamp(),
            ))
            .await?;

        let user = self
            .load(user_key)
            .await?
            .ok_or_else(|| StoreError::MissingUser(user_key.to_string()))?;
        info!("Created upstream identity for user {}", user_key);

        Ok(self.remember(user))
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    async fn load(&self, user_key: &str) -> StoreResult<Option<User>> {
        Ok(self
            .db
            .load_user(user_key)
            .await?
            .map(|(oaid, mi_id)| User {
                user_key: user_key.to_string(),
                oaid,
                mi_id,
            }))
    }

    fn remember(&self, user: User) -> User {
        debug!("Caching user {}", user.user_key);
        self.users
            .write()
            .entry(user.user_key.clone())
            .or_insert(user)
            .clone()
    }
}
