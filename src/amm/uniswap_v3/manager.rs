use std::{fmt, sync::Arc};

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    address::generate_v3_pool_address,
    snapshot::{LiquiditySnapshot, SNAPSHOT_LOG_SPAN},
    UniswapV3Pool, UniswapV3PoolConfig,
};
use crate::{
    amm::{
        consts::UNISWAP_V3_MAINNET_POOL_INIT_HASH,
        provider::ChainStateProvider,
        registry::{FactoryPools, PoolRegistry},
    },
    errors::AMMError,
};

/// Liquidity snapshot shared by every manager of one factory.
pub type SharedLiquiditySnapshot = Mutex<Option<LiquiditySnapshot>>;

pub type UniswapV3PoolRegistry<P> = PoolRegistry<UniswapV3Pool<P>, SharedLiquiditySnapshot>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniswapV3PoolManagerConfig {
    pub factory: Address,
    /// Defaults to the factory.
    pub deployer: Option<Address>,
    /// Defaults to the mainnet Uniswap V3 pool init code hash.
    pub init_hash: Option<B256>,
    /// Read from the provider when unset.
    pub chain_id: Option<u64>,
}

impl UniswapV3PoolManagerConfig {
    pub fn new(factory: Address) -> Self {
        UniswapV3PoolManagerConfig {
            factory,
            ..Default::default()
        }
    }
}

/// Finds or builds the pools deployed by one factory.
///
/// Pools live in the shared [`PoolRegistry`], so a pool is built once per chain no matter how many
/// managers ask for it. Managers of the same factory share which pools are tracked, which are
/// known not to belong to the factory, and the liquidity snapshot.
pub struct UniswapV3PoolManager<P: ?Sized> {
    factory: Address,
    deployer: Address,
    init_hash: B256,
    chain_id: u64,
    provider: Arc<P>,
    registry: Arc<UniswapV3PoolRegistry<P>>,
    pools: Arc<FactoryPools<UniswapV3Pool<P>, SharedLiquiditySnapshot>>,
}

impl<P: ?Sized> fmt::Debug for UniswapV3PoolManager<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniswapV3PoolManager")
            .field("factory", &self.factory)
            .field("chain_id", &self.chain_id)
            .field("tracked_pools", &self.pools.tracked_len())
            .finish()
    }
}

impl<P> UniswapV3PoolManager<P>
where
    P: ChainStateProvider + ?Sized,
{
    /// Creates a manager for `config.factory`. The first manager created for a factory decides
    /// its liquidity snapshot, later snapshots are ignored.
    pub async fn new(
        config: UniswapV3PoolManagerConfig,
        snapshot: Option<LiquiditySnapshot>,
        provider: Arc<P>,
        registry: Arc<UniswapV3PoolRegistry<P>>,
    ) -> Result<Self, AMMError> {
        let chain_id = match config.chain_id {
            Some(chain_id) => chain_id,
            None => provider.chain_id().await?,
        };

        let pools = registry.factory(chain_id, config.factory);

        let mut snapshot = Some(snapshot);
        pools.extension_or_init(|| Mutex::new(snapshot.take().flatten()));
        if let Some(Some(ignored)) = snapshot {
            warn!(
                factory = ?config.factory,
                block = ignored.newest_block(),
                "factory already has manager state, ignoring liquidity snapshot"
            );
        }

        Ok(UniswapV3PoolManager {
            factory: config.factory,
            deployer: config.deployer.unwrap_or(config.factory),
            init_hash: config.init_hash.unwrap_or(UNISWAP_V3_MAINNET_POOL_INIT_HASH),
            chain_id,
            provider,
            registry,
            pools,
        })
    }

    pub fn factory(&self) -> Address {
        self.factory
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn snapshot(&self) -> &SharedLiquiditySnapshot {
        self.pools.extension_or_init(|| Mutex::new(None))
    }

    /// Returns the pool at `address`, building it at `state_block` (the chain head when `None`)
    /// if no one has yet.
    ///
    /// Pools of another factory, and pools that failed to build, are rejected with
    /// [`AMMError::PoolNotAssociated`] from then on.
    pub async fn get_pool(
        &self,
        address: Address,
        state_block: Option<u64>,
    ) -> Result<Arc<UniswapV3Pool<P>>, AMMError> {
        if self.pools.is_untracked(address) {
            return Err(self.not_associated(address));
        }

        if let Some(pool) = self.pools.tracked(address) {
            return Ok(pool);
        }

        let pool = self
            .registry
            .get_or_try_init(self.chain_id, address, || {
                self.build_pool(address, state_block)
            })
            .await
            .map_err(|e| {
                self.pools.untrack(address);
                warn!(pool = ?address, factory = ?self.factory, error = %e, "could not build pool");
                AMMError::PoolBuildError {
                    pool: address,
                    reason: e.to_string(),
                }
            })?;

        if pool.factory != self.factory {
            self.pools.untrack(address);
            return Err(self.not_associated(address));
        }

        self.pools.track(address, pool.clone());
        Ok(pool)
    }

    /// Returns the pool for a token pair and fee tier. The tokens may be given in either order.
    pub async fn get_pool_from_tokens_and_fee(
        &self,
        token_a: Address,
        token_b: Address,
        fee: u32,
        state_block: Option<u64>,
    ) -> Result<Arc<UniswapV3Pool<P>>, AMMError> {
        let address =
            generate_v3_pool_address(token_a, token_b, fee, self.deployer, self.init_hash);
        self.get_pool(address, state_block).await
    }

    /// Forgets `address` so the next lookup resolves it again. A pool of this factory is also
    /// dropped from the registry.
    pub fn remove_pool(&self, address: Address) -> Option<Arc<UniswapV3Pool<P>>> {
        let pool = self.pools.forget(address)?;
        self.registry.remove(self.chain_id, address);
        debug!(pool = ?address, factory = ?self.factory, "removed pool");
        Some(pool)
    }

    /// Catches the liquidity snapshot up to `last_block`. Does nothing without a snapshot.
    pub async fn update_snapshot(&self, last_block: u64) -> Result<(), AMMError> {
        let mut snapshot = self.snapshot().lock().await;
        match snapshot.as_mut() {
            Some(snapshot) => {
                snapshot
                    .update_to(last_block, SNAPSHOT_LOG_SPAN, &*self.provider)
                    .await
            }
            None => Ok(()),
        }
    }

    fn not_associated(&self, pool: Address) -> AMMError {
        AMMError::PoolNotAssociated {
            pool,
            factory: self.factory,
        }
    }

    async fn build_pool(
        &self,
        address: Address,
        state_block: Option<u64>,
    ) -> Result<UniswapV3Pool<P>, AMMError> {
        let mut config = UniswapV3PoolConfig {
            factory: Some(self.factory),
            deployer: Some(self.deployer),
            init_hash: Some(self.init_hash),
            state_block,
            ..UniswapV3PoolConfig::new(address)
        };

        let updates = match self.snapshot().lock().await.as_mut() {
            Some(snapshot) => match (snapshot.tick_bitmap(address), snapshot.tick_data(address)) {
                (Some(tick_bitmap), Some(tick_data)) => {
                    config.tick_bitmap = Some(tick_bitmap);
                    config.tick_data = Some(tick_data);
                    snapshot.pending_updates(address)
                }
                _ => {
                    // a sparse pool reads its words from the chain, which already reflects
                    // these events
                    let dropped = snapshot.pending_updates(address).len();
                    if dropped > 0 {
                        debug!(pool = ?address, dropped, "pool missing from snapshot");
                    }
                    vec![]
                }
            },
            None => {
                info!(
                    pool = ?address,
                    factory = ?self.factory,
                    "building pool without liquidity snapshot"
                );
                vec![]
            }
        };

        let pool = UniswapV3Pool::new(config, self.provider.clone()).await?;
        pool.replay_liquidity_updates(updates).await?;

        Ok(pool)
    }
}

#[cfg(test)]
mod test {
    use std::{collections::BTreeMap, sync::atomic::Ordering};

    use alloy::{
        primitives::{address, aliases::I24, U256},
        rpc::types::eth::Log,
        sol_types::SolEvent,
    };

    use super::*;
    use crate::amm::{
        consts::Q96,
        provider::mock::{MockChainState, MockPool, MockPoolState},
        uniswap_v3::{
            snapshot::{LiquidityEvent, PoolLiquidityMap},
            state::{BitmapWord, LiquidityAtTick, LiquidityChange, UniswapV3PoolExternalUpdate},
            tick_bitmap::word_range,
            IUniswapV3Pool,
        },
        Erc20Token,
    };

    const FACTORY: Address = address!("1F98431c8aD98523631AE4a59f267346ea31F984");
    const OTHER_FACTORY: Address = address!("0BFbCF9fa4f9C56B0F40a671Ad40E0805A091865");
    const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
    const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    // USDC/WETH 0.3%
    const POOL: Address = address!("8ad599c3A0ff1De082011EFDDc58f1908eb6e6D8");

    fn mock_chain() -> Arc<MockChainState> {
        let chain = MockChainState::new(1, 100);
        chain.add_token(Erc20Token::new(USDC, "USDC", 6));
        chain.add_token(Erc20Token::new(WETH, "WETH", 18));
        chain.add_pool(
            POOL,
            MockPool {
                token0: USDC,
                token1: WETH,
                fee: 3000,
                tick_spacing: 60,
                factory: FACTORY,
                states: BTreeMap::new(),
            },
        );

        let mut state = MockPoolState {
            sqrt_price_x96: Q96,
            tick: 0,
            liquidity: 1_000_000,
            ..Default::default()
        };
        state
            .tick_bitmap
            .insert(-1, (U256::from(1) << 254) | (U256::from(1) << 255));
        state.tick_bitmap.insert(0, U256::from(1) << 1);
        state.ticks.insert(-120, (500_000, 500_000));
        state.ticks.insert(-60, (1_500_000, 500_000));
        state.ticks.insert(60, (1_000_000, -1_000_000));
        chain.set_state(POOL, 100, state);

        Arc::new(chain)
    }

    async fn manager(
        factory: Address,
        snapshot: Option<LiquiditySnapshot>,
        chain: &Arc<MockChainState>,
        registry: &Arc<UniswapV3PoolRegistry<MockChainState>>,
    ) -> UniswapV3PoolManager<MockChainState> {
        UniswapV3PoolManager::new(
            UniswapV3PoolManagerConfig::new(factory),
            snapshot,
            chain.clone(),
            registry.clone(),
        )
        .await
        .unwrap()
    }

    /// Liquidity map at block 90, before the [-60, 60) position was minted.
    fn snapshot_at_block_90() -> LiquiditySnapshot {
        let mut tick_bitmap = BTreeMap::new();
        tick_bitmap.insert(
            -1,
            BitmapWord::new((U256::from(1) << 254) | (U256::from(1) << 255), Some(90)),
        );
        let mut tick_data = BTreeMap::new();
        tick_data.insert(-120, LiquidityAtTick::new(500_000, 500_000, Some(90)));
        tick_data.insert(-60, LiquidityAtTick::new(-500_000, 500_000, Some(90)));

        let mut snapshot = LiquiditySnapshot::new(90);
        snapshot.insert_pool(
            POOL,
            PoolLiquidityMap {
                tick_bitmap,
                tick_data,
            },
        );
        snapshot
    }

    fn mint_log(block_number: u64, amount: u128, tick_lower: i32, tick_upper: i32) -> Log {
        let data = IUniswapV3Pool::Mint {
            sender: Address::ZERO,
            owner: Address::ZERO,
            tickLower: I24::try_from(tick_lower).unwrap(),
            tickUpper: I24::try_from(tick_upper).unwrap(),
            amount,
            amount0: U256::ZERO,
            amount1: U256::ZERO,
        }
        .encode_log_data();
        Log {
            inner: alloy::primitives::Log {
                address: POOL,
                data,
            },
            block_number: Some(block_number),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_managers_share_pools() {
        let chain = mock_chain();
        let registry = Arc::new(UniswapV3PoolRegistry::new());

        let first = manager(FACTORY, None, &chain, &registry).await;
        let second = manager(FACTORY, None, &chain, &registry).await;
        assert_eq!(first.chain_id(), 1);

        let pool = first.get_pool(POOL, None).await.unwrap();
        let slot0_calls = chain.slot0_calls.load(Ordering::SeqCst);

        let same = second.get_pool(POOL, None).await.unwrap();
        assert!(Arc::ptr_eq(&pool, &same));
        assert!(Arc::ptr_eq(&pool, &registry.get(1, POOL).unwrap()));
        assert_eq!(chain.slot0_calls.load(Ordering::SeqCst), slot0_calls);
        assert_eq!(registry.len(), 1);

        assert!(pool.sparse_liquidity_map);
        assert_eq!(pool.update_block(), 100);
    }

    #[tokio::test]
    async fn test_get_pool_from_tokens_and_fee() {
        let chain = mock_chain();
        let registry = Arc::new(UniswapV3PoolRegistry::new());
        let manager = manager(FACTORY, None, &chain, &registry).await;

        let pool = manager
            .get_pool_from_tokens_and_fee(WETH, USDC, 3000, Some(100))
            .await
            .unwrap();
        assert_eq!(pool.address, POOL);
        assert_eq!(pool.to_string(), "USDC-WETH (V3, 0.30%)");
    }

    #[tokio::test]
    async fn test_pool_of_another_factory_is_rejected() {
        let chain = mock_chain();
        let registry = Arc::new(UniswapV3PoolRegistry::new());

        let uniswap = manager(FACTORY, None, &chain, &registry).await;
        let other = manager(OTHER_FACTORY, None, &chain, &registry).await;

        uniswap.get_pool(POOL, None).await.unwrap();

        for _ in 0..2 {
            assert!(matches!(
                other.get_pool(POOL, None).await,
                Err(AMMError::PoolNotAssociated { pool, factory })
                    if pool == POOL && factory == OTHER_FACTORY
            ));
        }
        assert!(uniswap.get_pool(POOL, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_build_is_remembered() {
        let chain = mock_chain();
        let registry = Arc::new(UniswapV3PoolRegistry::new());
        let manager = manager(FACTORY, None, &chain, &registry).await;
        let unknown = address!("0000000000000000000000000000000000000bad");

        assert!(matches!(
            manager.get_pool(unknown, None).await,
            Err(AMMError::PoolBuildError { pool, .. }) if pool == unknown
        ));
        assert!(matches!(
            manager.get_pool(unknown, None).await,
            Err(AMMError::PoolNotAssociated { .. })
        ));
        assert!(registry.is_empty());

        // forgetting the address allows another attempt
        assert!(manager.remove_pool(unknown).is_none());
        assert!(matches!(
            manager.get_pool(unknown, None).await,
            Err(AMMError::PoolBuildError { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_pool() {
        let chain = mock_chain();
        let registry = Arc::new(UniswapV3PoolRegistry::new());
        let manager = manager(FACTORY, None, &chain, &registry).await;

        let pool = manager.get_pool(POOL, None).await.unwrap();
        let removed = manager.remove_pool(POOL).unwrap();
        assert!(Arc::ptr_eq(&pool, &removed));
        assert!(registry.get(1, POOL).is_none());

        let rebuilt = manager.get_pool(POOL, None).await.unwrap();
        assert!(!Arc::ptr_eq(&pool, &rebuilt));
    }

    #[tokio::test]
    async fn test_snapshot_pool_replays_liquidity_events() {
        let chain = mock_chain();
        chain.add_log(mint_log(95, 1_000_000, -60, 60));
        let registry = Arc::new(UniswapV3PoolRegistry::new());

        let manager = manager(FACTORY, Some(snapshot_at_block_90()), &chain, &registry).await;
        manager.update_snapshot(100).await.unwrap();

        let pool = manager.get_pool(POOL, None).await.unwrap();
        let state = pool.state();

        assert!(!pool.sparse_liquidity_map);
        assert_eq!(
            state.tick_data[&-60],
            LiquidityAtTick::new(500_000, 1_500_000, None)
        );
        assert_eq!(
            state.tick_data[&60],
            LiquidityAtTick::new(-1_000_000, 1_000_000, None)
        );
        assert_eq!(state.tick_bitmap[&0].bitmap, U256::from(1) << 1);
        assert_eq!(state.tick_bitmap.len(), word_range(60).count());

        // price, tick and liquidity come from the build block again
        assert_eq!(state.liquidity, 1_000_000);
        assert_eq!(state.tick, 0);
        assert_eq!(pool.update_block(), 100);

        let snapshot = manager.snapshot().lock().await;
        let snapshot = snapshot.as_ref().unwrap();
        assert_eq!(snapshot.newest_block(), 100);
        assert!(!snapshot.has_events(POOL));
    }

    #[tokio::test]
    async fn test_restore_after_replay_keeps_replayed_ticks() {
        let chain = mock_chain();
        // above the current tick, so price and active liquidity stay the same
        chain.add_log(mint_log(96, 2_000_000, 120, 180));
        let registry = Arc::new(UniswapV3PoolRegistry::new());

        let manager = manager(FACTORY, Some(snapshot_at_block_90()), &chain, &registry).await;
        manager.update_snapshot(100).await.unwrap();
        let pool = manager.get_pool(POOL, Some(100)).await.unwrap();

        assert_eq!(pool.archived_blocks().await, vec![100]);
        assert!(pool.state().tick_data.contains_key(&120));

        let update = UniswapV3PoolExternalUpdate {
            block_number: 101,
            liquidity_change: Some(LiquidityChange::new(500_000, -180, -120)),
            ..Default::default()
        };
        assert!(pool.external_update(&update).await.unwrap());
        assert_eq!(pool.archived_blocks().await, vec![100, 101]);

        assert!(pool.restore_before(101).await.unwrap());
        let state = pool.state();
        assert_eq!(pool.update_block(), 100);
        assert_eq!(
            state.tick_data[&120],
            LiquidityAtTick::new(2_000_000, 2_000_000, None)
        );
        assert_eq!(
            state.tick_data[&180],
            LiquidityAtTick::new(-2_000_000, 2_000_000, None)
        );
        assert!(!state.tick_data.contains_key(&-180));
        assert_eq!(state.liquidity, 1_000_000);
    }

    #[tokio::test]
    async fn test_pool_missing_from_snapshot_is_sparse() {
        let chain = mock_chain();
        let registry = Arc::new(UniswapV3PoolRegistry::new());

        let mut snapshot = LiquiditySnapshot::new(90);
        snapshot.add_event(
            POOL,
            LiquidityEvent {
                block_number: 95,
                tx_index: 0,
                log_index: 0,
                tx: None,
                liquidity: 1_000_000,
                tick_lower: -60,
                tick_upper: 60,
            },
        );

        let manager = manager(FACTORY, Some(snapshot), &chain, &registry).await;
        let pool = manager.get_pool(POOL, None).await.unwrap();

        assert!(pool.sparse_liquidity_map);
        assert_eq!(pool.state().liquidity, 1_000_000);
        assert!(!manager
            .snapshot()
            .lock()
            .await
            .as_ref()
            .unwrap()
            .has_events(POOL));
    }

    #[tokio::test]
    async fn test_first_snapshot_wins() {
        let chain = mock_chain();
        let registry = Arc::new(UniswapV3PoolRegistry::new());

        let first = manager(FACTORY, Some(LiquiditySnapshot::new(90)), &chain, &registry).await;
        let second = manager(FACTORY, Some(LiquiditySnapshot::new(50)), &chain, &registry).await;

        assert!(std::ptr::eq(first.snapshot(), second.snapshot()));
        assert_eq!(
            second
                .snapshot()
                .lock()
                .await
                .as_ref()
                .map(LiquiditySnapshot::newest_block),
            Some(90)
        );

        // no snapshot for another factory
        let other = manager(OTHER_FACTORY, None, &chain, &registry).await;
        assert!(other.snapshot().lock().await.is_none());
        other.update_snapshot(200).await.unwrap();
        assert_eq!(chain.log_calls.load(Ordering::SeqCst), 0);
    }
}
