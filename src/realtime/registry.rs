//! Subscriber Registry
//!
//! The set of currently connected subscribers. A single `RwLock` is the only
//! synchronization point: fan-out holds the read side for the whole
//! broadcast, every membership change takes the write side.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use uuid::Uuid;

use super::hub::HubError;
use super::subscriber::{Subscriber, SubscriberId};

pub(crate) type SubscriberMap = HashMap<SubscriberId, Arc<dyn Subscriber>>;

pub(crate) struct Registry {
    subscribers: RwLock<SubscriberMap>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Add a subscriber under a fresh id
    pub async fn insert(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = Uuid::new_v4().to_string();
        self.subscribers.write().await.insert(id.clone(), subscriber);
        id
    }

    /// Add a subscriber unless `limit` members are already present
    ///
    /// A limit of zero means unlimited.
    pub async fn try_insert(
        &self,
        subscriber: Arc<dyn Subscriber>,
        limit: usize,
    ) -> Result<SubscriberId, HubError> {
        let mut subscribers = self.subscribers.write().await;
        if limit > 0 && subscribers.len() >= limit {
            return Err(HubError::TooManyConnections(limit));
        }

        let id = Uuid::new_v4().to_string();
        subscribers.insert(id.clone(), subscriber);
        Ok(id)
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<dyn Subscriber>> {
        self.subscribers.write().await.remove(id)
    }

    /// Remove several subscribers under a single write lock
    ///
    /// Ids that are not registered are skipped.
    pub async fn remove_many(&self, ids: &[&str]) -> Vec<(SubscriberId, Arc<dyn Subscriber>)> {
        let mut subscribers = self.subscribers.write().await;
        ids.iter()
            .filter_map(|id| subscribers.remove_entry(*id))
            .collect()
    }

    /// Consistent view of the registry for one fan-out
    pub async fn snapshot(&self) -> RwLockReadGuard<'_, SubscriberMap> {
        self.subscribers.read().await
    }

    /// Remove every subscriber, returning them for closing
    pub async fn drain(&self) -> Vec<(SubscriberId, Arc<dyn Subscriber>)> {
        self.subscribers.write().await.drain().collect()
    }

    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.subscribers.read().await.contains_key(id)
    }
}
