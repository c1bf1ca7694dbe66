//! Store metadata cache
//!
//! Populated lazily and never invalidated within a client lifetime.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use br_core::{Store, StoreId};

use crate::error::Result;
use crate::pd_client::PdClient;

#[derive(Debug, Default)]
pub struct StoreCache {
    stores: Mutex<HashMap<StoreId, Store>>,
}

impl StoreCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, store_id: StoreId) -> Option<Store> {
        self.stores.lock().get(&store_id).cloned()
    }

    pub fn insert(&self, store: Store) {
        self.stores.lock().insert(store.id, store);
    }

    pub fn len(&self) -> usize {
        self.stores.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.lock().is_empty()
    }

    /// Resolve a store, fetching it from the metadata service on miss
    ///
    /// The lock is not held across the fetch. Concurrent misses on the same
    /// store may fetch twice; the last insert wins.
    pub async fn get_or_fetch(&self, store_id: StoreId, pd: &dyn PdClient) -> Result<Store> {
        if let Some(store) = self.get(store_id) {
            return Ok(store);
        }

        let store = pd.get_store(store_id).await?;
        debug!("Cached store {} at {}", store.id, store.address);
        self.insert(store.clone());
        Ok(store)
    }
}
