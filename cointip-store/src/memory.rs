//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! Thread-safe using RwLock for concurrent access.

use crate::error::StoreError;
use crate::repository::{
    check_write, ActionQuery, ActionRepository, Store, UserRepository, ValueRepository,
};
use async_trait::async_trait;
use chrono::Utc;
use cointip_domain::{Action, ActionType, CoinUnit, User, Username};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

type ActionKey = (ActionType, String);

/// In-memory store for testing
pub struct MemoryStore {
    actions: RwLock<HashMap<ActionKey, Action>>,
    users: RwLock<BTreeMap<Username, User>>,
    values: RwLock<HashMap<String, String>>,
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Database("memory store lock poisoned".to_string())
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            actions: RwLock::new(HashMap::new()),
            users: RwLock::new(BTreeMap::new()),
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Get the number of action records
    pub fn action_count(&self) -> usize {
        self.actions.read().map(|a| a.len()).unwrap_or(0)
    }

    /// Get the number of users
    pub fn user_count(&self) -> usize {
        self.users.read().map(|u| u.len()).unwrap_or(0)
    }

    /// Clear all data (useful for test setup)
    pub fn clear(&self) -> Result<(), StoreError> {
        self.actions.write().map_err(poisoned)?.clear();
        self.users.write().map_err(poisoned)?.clear();
        self.values.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ActionRepository
// =============================================================================

#[async_trait]
impl ActionRepository for MemoryStore {
    async fn save(&self, action: &Action) -> Result<(), StoreError> {
        let mut actions = self.actions.write().map_err(poisoned)?;
        let key = (action.action_type, action.message_id().to_string());
        check_write(actions.get(&key), action)?;

        let mut record = action.for_persistence();
        // first write wins the record id
        if let Some(existing) = actions.get(&key) {
            record.id = existing.id;
        }
        actions.insert(key, record);
        Ok(())
    }

    async fn find(&self, query: &ActionQuery) -> Result<Vec<Action>, StoreError> {
        let actions = self.actions.read().map_err(poisoned)?;
        let mut found: Vec<Action> = actions.values().filter(|a| query.matches(a)).cloned().collect();
        found.sort_by(|a, b| a.source.created_at.cmp(&b.source.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn history(&self, user: &Username, limit: usize) -> Result<Vec<Action>, StoreError> {
        let actions = self.actions.read().map_err(poisoned)?;
        let mut found: Vec<Action> = actions
            .values()
            .filter(|a| &a.from_user == user || a.to_user() == Some(user))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.source.created_at.cmp(&a.source.created_at).then(b.id.cmp(&a.id)));
        found.truncate(limit);
        Ok(found)
    }
}

// =============================================================================
// UserRepository
// =============================================================================

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, name: &Username) -> Result<(), StoreError> {
        let mut users = self.users.write().map_err(poisoned)?;
        if users.contains_key(name) {
            return Err(StoreError::UserExists(name.clone()));
        }
        users.insert(
            name.clone(),
            User {
                name: name.clone(),
                addresses: Vec::new(),
                joined_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn find(&self, name: &Username) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().map_err(poisoned)?.get(name).cloned())
    }

    async fn add_address(
        &self,
        name: &Username,
        coin: &CoinUnit,
        address: &str,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().map_err(poisoned)?;
        let user = users
            .get_mut(name)
            .ok_or_else(|| StoreError::UserNotFound(name.clone()))?;
        if user.address(coin).is_some() {
            return Err(StoreError::AddressExists {
                user: name.clone(),
                coin: coin.clone(),
            });
        }
        user.addresses.push((coin.clone(), address.to_string()));
        Ok(())
    }

    async fn delete(&self, name: &Username) -> Result<(), StoreError> {
        self.users.write().map_err(poisoned)?.remove(name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.users.read().map_err(poisoned)?.values().cloned().collect())
    }
}

// =============================================================================
// ValueRepository
// =============================================================================

#[async_trait]
impl ValueRepository for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().map_err(poisoned)?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

impl Store for MemoryStore {
    fn actions(&self) -> &dyn ActionRepository {
        self
    }

    fn users(&self) -> &dyn UserRepository {
        self
    }

    fn values(&self) -> &dyn ValueRepository {
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
