use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{Arc, Mutex, OnceLock, PoisonError, RwLock},
};

use alloy::primitives::Address;
use tokio::sync::OnceCell;
use tracing::debug;

type PoolCell<T> = Arc<OnceCell<Arc<T>>>;

/// Process-wide directory of pools, keyed by chain id and pool address.
///
/// Building a pool goes through [`PoolRegistry::get_or_try_init`], so concurrent requests for
/// the same address share a single construction. The registry also owns the state shared by all
/// managers of one factory, see [`PoolRegistry::factory`].
pub struct PoolRegistry<T, S = ()> {
    pools: Mutex<HashMap<(u64, Address), PoolCell<T>>>,
    factories: Mutex<HashMap<(u64, Address), Arc<FactoryPools<T, S>>>>,
}

impl<T, S> Default for PoolRegistry<T, S> {
    fn default() -> Self {
        PoolRegistry {
            pools: Mutex::new(HashMap::new()),
            factories: Mutex::new(HashMap::new()),
        }
    }
}

impl<T, S> std::fmt::Debug for PoolRegistry<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.len())
            .finish()
    }
}

impl<T, S> PoolRegistry<T, S> {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, chain_id: u64, address: Address) -> PoolCell<T> {
        self.pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((chain_id, address))
            .or_default()
            .clone()
    }

    pub fn get(&self, chain_id: u64, address: Address) -> Option<Arc<T>> {
        self.pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(chain_id, address))
            .and_then(|cell| cell.get().cloned())
    }

    /// Returns the registered pool, building it with `init` if there is none. Concurrent callers
    /// for the same address wait for the first build. A failed build leaves the slot empty so a
    /// later call may try again.
    pub async fn get_or_try_init<F, Fut, E>(
        &self,
        chain_id: u64,
        address: Address,
        init: F,
    ) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cell = self.cell(chain_id, address);
        cell.get_or_try_init(|| async { init().await.map(Arc::new) })
            .await
            .cloned()
    }

    /// Registers an already built pool. Returns `false` if the address is taken.
    pub fn insert(&self, chain_id: u64, address: Address, pool: Arc<T>) -> bool {
        self.cell(chain_id, address).set(pool).is_ok()
    }

    pub fn remove(&self, chain_id: u64, address: Address) -> Option<Arc<T>> {
        let cell = self
            .pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(chain_id, address))?;
        debug!(chain_id, ?address, "removed pool from registry");
        cell.get().cloned()
    }

    /// Number of built pools.
    pub fn len(&self) -> usize {
        self.pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// State shared by every manager of `factory` on `chain_id`.
    pub fn factory(&self, chain_id: u64, factory: Address) -> Arc<FactoryPools<T, S>> {
        self.factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((chain_id, factory))
            .or_insert_with(|| Arc::new(FactoryPools::default()))
            .clone()
    }
}

/// Pools a factory's managers have resolved so far.
///
/// `tracked` pools belong to the factory, `untracked` addresses were found not to, or failed to
/// build, and are not tried again. The extension slot holds manager specific state that is set
/// once by whichever manager gets there first.
pub struct FactoryPools<T, S = ()> {
    tracked: RwLock<HashMap<Address, Arc<T>>>,
    untracked: RwLock<HashSet<Address>>,
    extension: OnceLock<S>,
}

impl<T, S> Default for FactoryPools<T, S> {
    fn default() -> Self {
        FactoryPools {
            tracked: RwLock::new(HashMap::new()),
            untracked: RwLock::new(HashSet::new()),
            extension: OnceLock::new(),
        }
    }
}

impl<T, S> FactoryPools<T, S> {
    pub fn tracked(&self, address: Address) -> Option<Arc<T>> {
        self.tracked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .cloned()
    }

    pub fn track(&self, address: Address, pool: Arc<T>) {
        self.tracked
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, pool);
    }

    pub fn tracked_len(&self) -> usize {
        self.tracked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_untracked(&self, address: Address) -> bool {
        self.untracked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&address)
    }

    pub fn untrack(&self, address: Address) {
        self.untracked
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address);
    }

    /// Forgets everything known about `address`.
    pub fn forget(&self, address: Address) -> Option<Arc<T>> {
        self.untracked
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&address);
        self.tracked
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&address)
    }

    pub fn extension_or_init(&self, init: impl FnOnce() -> S) -> &S {
        self.extension.get_or_init(init)
    }
}
