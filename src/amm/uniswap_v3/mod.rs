pub mod address;
pub mod archive;
pub mod bit_math;
pub mod external_update;
pub mod full_math;
pub mod liquidity_math;
pub mod manager;
pub mod snapshot;
pub mod sqrt_price_math;
pub mod state;
pub mod swap;
pub mod swap_math;
pub mod tick;
pub mod tick_bitmap;
pub mod tick_math;
pub mod util;

use std::{
    fmt::{Debug, Display, Formatter},
    sync::{Arc, PoisonError, RwLock},
};

use alloy::{
    primitives::{Address, B256, I256, U256},
    rpc::types::eth::Log,
    sol,
};
use async_trait::async_trait;
use num_bigfloat::BigFloat;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use self::{
    address::generate_v3_pool_address,
    archive::PoolStateArchive,
    external_update::apply_external_update,
    state::{
        PoolState, TickBitmap, TickData, UniswapV3PoolExternalUpdate,
        UniswapV3PoolSimulationResult, UniswapV3PoolStateUpdated,
    },
    swap::{default_sqrt_price_limit, swap, SwapContext, SwapOutcome},
    tick_bitmap::{
        tick_word_and_bit_position, word_range, ChainWordSource, WordSnapshot, WordSource,
    },
};
use crate::{
    amm::{
        consts::{FEE_DENOMINATOR, UNISWAP_V3_MAINNET_POOL_INIT_HASH},
        provider::ChainStateProvider,
        subscriber::{Subscriber, Subscribers},
        AutomatedMarketMaker, Erc20Token,
    },
    errors::{AMMError, ArithmeticError, SwapSimulationError},
};

sol! {
    /// Interface of the IUniswapV3Pool
    #[derive(Debug, PartialEq, Eq)]
    #[sol(rpc)]
    contract IUniswapV3Pool {
        event Initialize(uint160 sqrtPriceX96, int24 tick);
        event Swap(address indexed sender, address indexed recipient, int256 amount0, int256 amount1, uint160 sqrtPriceX96, uint128 liquidity, int24 tick);
        event Burn(address indexed owner, int24 indexed tickLower, int24 indexed tickUpper, uint128 amount, uint256 amount0, uint256 amount1);
        event Mint(address sender, address indexed owner, int24 indexed tickLower, int24 indexed tickUpper, uint128 amount, uint256 amount0, uint256 amount1);
        function token0() external view returns (address);
        function token1() external view returns (address);
        function factory() external view returns (address);
        function liquidity() external view returns (uint128);
        function slot0() external view returns (uint160, int24, uint16, uint16, uint16, uint8, bool);
        function fee() external view returns (uint24);
        function tickSpacing() external view returns (int24);
        function ticks(int24 tick) external view returns (uint128, int128, uint256, uint256, int56, uint160, uint32, bool);
        function tickBitmap(int16 wordPosition) external view returns (uint256);
    }
}

/// Construction parameters of a [`UniswapV3Pool`]. Anything left unset is read from the chain at
/// the resolved state block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniswapV3PoolConfig {
    pub address: Address,
    pub fee: Option<u32>,
    pub tick_spacing: Option<i32>,
    pub tokens: Option<(Erc20Token, Erc20Token)>,
    pub factory: Option<Address>,
    /// Defaults to the factory.
    pub deployer: Option<Address>,
    pub init_hash: Option<B256>,
    /// A complete liquidity map. Must be given together with `tick_data`; without both the pool
    /// keeps a sparse map that is filled in on demand.
    pub tick_bitmap: Option<TickBitmap>,
    pub tick_data: Option<TickData>,
    /// Defaults to the chain head.
    pub state_block: Option<u64>,
    pub archive_states: bool,
    pub max_archived_states: Option<usize>,
    pub verify_address: bool,
}

impl Default for UniswapV3PoolConfig {
    fn default() -> Self {
        UniswapV3PoolConfig {
            address: Address::ZERO,
            fee: None,
            tick_spacing: None,
            tokens: None,
            factory: None,
            deployer: None,
            init_hash: None,
            tick_bitmap: None,
            tick_data: None,
            state_block: None,
            archive_states: true,
            max_archived_states: None,
            verify_address: true,
        }
    }
}

impl UniswapV3PoolConfig {
    pub fn new(address: Address) -> Self {
        UniswapV3PoolConfig {
            address,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
struct LiveState {
    state: Arc<PoolState>,
    update_block: u64,
}

/// Mirror of a single Uniswap V3 pool.
///
/// The live [`PoolState`] is replaced wholesale on every change. Mutations (refresh, external
/// updates and rollback) are serialized by the pool's state lock, which is held for the whole
/// operation including chain reads. Simulations never take that lock and run against whichever
/// state was live when they started, or against an explicit override.
pub struct UniswapV3Pool<P: ?Sized> {
    pub address: Address,
    pub token0: Erc20Token,
    pub token1: Erc20Token,
    pub fee: u32,
    pub tick_spacing: i32,
    pub factory: Address,
    pub deployer: Address,
    pub init_hash: B256,
    pub sparse_liquidity_map: bool,
    provider: Arc<P>,
    state_lock: Mutex<Option<PoolStateArchive>>,
    live: RwLock<LiveState>,
    subscribers: Subscribers<UniswapV3PoolStateUpdated>,
}

impl<P: ?Sized> Debug for UniswapV3Pool<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let live = self.live();
        f.debug_struct("UniswapV3Pool")
            .field("address", &self.address)
            .field("token0", &self.token0)
            .field("token1", &self.token1)
            .field("fee", &self.fee)
            .field("tick_spacing", &self.tick_spacing)
            .field("factory", &self.factory)
            .field("sparse_liquidity_map", &self.sparse_liquidity_map)
            .field("update_block", &live.update_block)
            .field("liquidity", &live.state.liquidity)
            .field("sqrt_price_x96", &live.state.sqrt_price_x96)
            .field("tick", &live.state.tick)
            .finish()
    }
}

impl<P: ?Sized> Display for UniswapV3Pool<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{} (V3, {:.2}%)",
            self.token0,
            self.token1,
            self.fee as f64 / 10000.0
        )
    }
}

impl<P: ?Sized> UniswapV3Pool<P> {
    /// The live state. It may be replaced by a concurrent mutation right after it is read.
    pub fn state(&self) -> Arc<PoolState> {
        self.live().state
    }

    /// The block of the most recently applied update.
    pub fn update_block(&self) -> u64 {
        self.live().update_block
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<UniswapV3PoolStateUpdated>>) {
        self.subscribers.subscribe(subscriber);
    }

    pub fn unsubscribe(&self, subscriber: &Arc<dyn Subscriber<UniswapV3PoolStateUpdated>>) {
        self.subscribers.unsubscribe(subscriber);
    }

    fn live(&self) -> LiveState {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn commit(&self, state: Arc<PoolState>, update_block: u64) {
        *self.live.write().unwrap_or_else(PoisonError::into_inner) = LiveState {
            state,
            update_block,
        };
    }

    fn publish(&self, state: Arc<PoolState>) {
        self.subscribers
            .notify(self.address, &UniswapV3PoolStateUpdated { state });
    }

    fn token(&self, token: Address) -> Result<&Erc20Token, AMMError> {
        if token == self.token0.address {
            Ok(&self.token0)
        } else if token == self.token1.address {
            Ok(&self.token1)
        } else {
            Err(AMMError::UnknownToken {
                token,
                pool: self.address,
            })
        }
    }

    /// Exchange rate of `token` in units of the other token, ignoring decimals.
    pub fn get_absolute_rate(
        &self,
        token: Address,
        override_state: Option<&PoolState>,
    ) -> Result<BigFloat, AMMError> {
        let live = self.state();
        let state = override_state.unwrap_or(&live);
        let rate = exchange_rate(state.sqrt_price_x96)?;

        if self.token(token)?.address == self.token0.address {
            Ok(BigFloat::from_u8(1).div(&rate))
        } else {
            Ok(rate)
        }
    }

    /// Price of `token` in units of the other token, ignoring decimals.
    pub fn get_absolute_price(
        &self,
        token: Address,
        override_state: Option<&PoolState>,
    ) -> Result<BigFloat, AMMError> {
        Ok(BigFloat::from_u8(1).div(&self.get_absolute_rate(token, override_state)?))
    }

    /// Exchange rate of `token` in units of the other token, corrected for decimals.
    pub fn get_nominal_rate(
        &self,
        token: Address,
        override_state: Option<&PoolState>,
    ) -> Result<BigFloat, AMMError> {
        let rate = self.get_absolute_rate(token, override_state)?;
        let (token0, token1) = (pow10(self.token0.decimals), pow10(self.token1.decimals));

        if self.token(token)?.address == self.token0.address {
            Ok(rate.mul(&token1).div(&token0))
        } else {
            Ok(rate.mul(&token0).div(&token1))
        }
    }

    /// Price of `token` in units of the other token, corrected for decimals.
    pub fn get_nominal_price(
        &self,
        token: Address,
        override_state: Option<&PoolState>,
    ) -> Result<BigFloat, AMMError> {
        Ok(BigFloat::from_u8(1).div(&self.get_nominal_rate(token, override_state)?))
    }
}

impl<P> UniswapV3Pool<P>
where
    P: ChainStateProvider + ?Sized,
{
    /// Builds the pool from `config`, reading every value it does not carry from `provider` at
    /// a single block.
    pub async fn new(config: UniswapV3PoolConfig, provider: Arc<P>) -> Result<Self, AMMError> {
        let complete_liquidity_map = match (config.tick_bitmap, config.tick_data) {
            (Some(tick_bitmap), Some(tick_data)) => Some((tick_bitmap, tick_data)),
            (None, None) => None,
            _ => return Err(AMMError::IncompleteLiquidityMap),
        };

        let address = config.address;
        let state_block = match config.state_block {
            Some(block) => block,
            None => provider.block_number().await?,
        };

        let factory = match config.factory {
            Some(factory) => factory,
            None => provider.factory(address, state_block).await?,
        };
        let deployer = config.deployer.unwrap_or(factory);
        let init_hash = config.init_hash.unwrap_or(UNISWAP_V3_MAINNET_POOL_INIT_HASH);

        let (token0, token1) = match config.tokens {
            Some((token_a, token_b)) if token_a.address > token_b.address => (token_b, token_a),
            Some(tokens) => tokens,
            None => {
                let (token0, token1) = futures::try_join!(
                    provider.token0(address, state_block),
                    provider.token1(address, state_block)
                )?;
                futures::try_join!(
                    provider.erc20(token0, state_block),
                    provider.erc20(token1, state_block)
                )?
            }
        };

        let fee = match config.fee {
            Some(fee) => fee,
            None => provider.fee(address, state_block).await?,
        };
        if fee >= FEE_DENOMINATOR {
            return Err(AMMError::PoolBuildError {
                pool: address,
                reason: format!("invalid fee {fee}"),
            });
        }
        let tick_spacing = match config.tick_spacing {
            Some(tick_spacing) => tick_spacing,
            None => provider.tick_spacing(address, state_block).await?,
        };
        if tick_spacing <= 0 {
            return Err(AMMError::PoolBuildError {
                pool: address,
                reason: format!("invalid tick spacing {tick_spacing}"),
            });
        }

        if config.verify_address {
            let computed =
                generate_v3_pool_address(token0.address, token1.address, fee, deployer, init_hash);
            if computed != address {
                return Err(AMMError::AddressVerification {
                    expected: address,
                    computed,
                });
            }
        }

        let ((sqrt_price_x96, tick), liquidity) = futures::try_join!(
            provider.slot0(address, state_block),
            provider.liquidity(address, state_block)
        )?;

        let sparse_liquidity_map = complete_liquidity_map.is_none();
        let mut state = PoolState::new(address, liquidity, sqrt_price_x96, tick);

        match complete_liquidity_map {
            Some((mut tick_bitmap, tick_data)) => {
                for word_position in word_range(tick_spacing) {
                    tick_bitmap.entry(word_position).or_default();
                }
                state = state.with_liquidity_map(tick_bitmap, tick_data);
            }
            None => {
                let (word_position, _) = tick_word_and_bit_position(tick, tick_spacing);
                let source = ChainWordSource {
                    provider: &*provider,
                    pool: address,
                    tick_spacing,
                };
                source
                    .fetch_word(word_position, state_block)
                    .await?
                    .merge_into(&mut state);
            }
        }

        let state = Arc::new(state);
        let archive = config.archive_states.then(|| {
            let mut archive = PoolStateArchive::new(config.max_archived_states);
            archive.insert(state_block, state.clone());
            archive
        });

        let pool = UniswapV3Pool {
            address,
            token0,
            token1,
            fee,
            tick_spacing,
            factory,
            deployer,
            init_hash,
            sparse_liquidity_map,
            provider,
            state_lock: Mutex::new(archive),
            live: RwLock::new(LiveState {
                state,
                update_block: state_block,
            }),
            subscribers: Subscribers::default(),
        };

        info!(
            pool = %pool,
            address = ?pool.address,
            token0 = ?pool.token0.address,
            token1 = ?pool.token1.address,
            fee = pool.fee,
            liquidity,
            ?sqrt_price_x96,
            tick,
            sparse = sparse_liquidity_map,
            block = state_block,
            "initialized pool"
        );

        Ok(pool)
    }

    fn word_source(&self) -> ChainWordSource<'_, P> {
        ChainWordSource {
            provider: &*self.provider,
            pool: self.address,
            tick_spacing: self.tick_spacing,
        }
    }

    /// Re-reads price, tick and liquidity at `block` (the chain head when `None`) and commits
    /// any difference. Returns whether the state changed.
    #[instrument(skip(self), fields(pool = ?self.address), level = "debug")]
    pub async fn refresh_from_source(&self, block: Option<u64>) -> Result<bool, AMMError> {
        let mut archive = self.state_lock.lock().await;

        let block = match block {
            Some(block) => block,
            None => self.provider.block_number().await?,
        };

        let ((sqrt_price_x96, tick), liquidity) = futures::try_join!(
            self.provider.slot0(self.address, block),
            self.provider.liquidity(self.address, block)
        )?;

        let live = self.live();
        let mut updated = (*live.state).clone();
        let mut changed = false;

        if updated.sqrt_price_x96 != sqrt_price_x96 {
            changed = true;
            updated.sqrt_price_x96 = sqrt_price_x96;
        }
        if updated.tick != tick {
            changed = true;
            updated.tick = tick;
        }
        if updated.liquidity != liquidity {
            changed = true;
            updated.liquidity = liquidity;
        }

        if !changed {
            self.commit(live.state, block);
            return Ok(false);
        }

        debug!(block, liquidity, ?sqrt_price_x96, tick, "refreshed pool state");

        let state = Arc::new(updated);
        self.commit(state.clone(), block);
        if let Some(archive) = archive.as_mut() {
            archive.insert(block, state.clone());
        }
        drop(archive);

        self.publish(state);
        Ok(true)
    }

    /// Applies an externally observed update. Returns whether the state changed.
    #[instrument(skip(self), fields(pool = ?self.address), level = "debug")]
    pub async fn external_update(
        &self,
        update: &UniswapV3PoolExternalUpdate,
    ) -> Result<bool, AMMError> {
        let mut archive = self.state_lock.lock().await;
        let live = self.live();

        let Some(updated) = apply_external_update(
            &live.state,
            live.update_block,
            self.tick_spacing,
            self.sparse_liquidity_map,
            update,
            &self.word_source(),
        )
        .await?
        else {
            return Ok(false);
        };

        let state = Arc::new(updated);
        self.commit(state.clone(), update.block_number);
        if let Some(archive) = archive.as_mut() {
            archive.insert(update.block_number, state.clone());
        }
        drop(archive);

        self.publish(state);
        Ok(true)
    }

    /// Replays buffered liquidity events on a freshly built pool, then restores price, tick and
    /// liquidity as of the block the pool was built at. The archive is left with the replayed
    /// state at the build block in place of the intermediate replay states.
    pub async fn replay_liquidity_updates(
        &self,
        updates: Vec<UniswapV3PoolExternalUpdate>,
    ) -> Result<(), AMMError> {
        let Some(first) = updates.first() else {
            return Ok(());
        };

        let starting_block = {
            let _guard = self.state_lock.lock().await;
            let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
            let starting_block = live.update_block;
            live.update_block = first.block_number;
            starting_block
        };

        debug!(
            pool = ?self.address,
            updates = updates.len(),
            from_block = first.block_number,
            starting_block,
            "replaying liquidity updates"
        );

        for update in &updates {
            self.external_update(update).await?;
        }

        self.refresh_from_source(Some(starting_block)).await?;

        // restores must land on the replayed map, never on a replay block before the build
        let mut archive = self.state_lock.lock().await;
        if let Some(archive) = archive.as_mut() {
            let live = self.live();
            let discarded = archive.discard_from(first.block_number.min(starting_block));
            archive.insert(live.update_block, live.state);
            debug!(discarded, block = live.update_block, "archived replayed pool state");
        }
        Ok(())
    }

    /// Discards archived states that no restore at or after `block` can need. Returns the number
    /// of discarded states.
    pub async fn prune_before(&self, block: u64) -> Result<usize, AMMError> {
        let mut archive = self.state_lock.lock().await;
        archive
            .as_mut()
            .ok_or(AMMError::ArchiveDisabled)?
            .prune_before(block)
    }

    /// Rolls the pool back to the last state recorded before `block`, e.g. after a chain
    /// reorganization. Returns `false` when no state at or after `block` was recorded.
    #[instrument(skip(self), fields(pool = ?self.address), level = "debug")]
    pub async fn restore_before(&self, block: u64) -> Result<bool, AMMError> {
        let mut archive = self.state_lock.lock().await;

        let Some((restored_block, state)) = archive
            .as_mut()
            .ok_or(AMMError::ArchiveDisabled)?
            .restore_before(block)?
        else {
            return Ok(false);
        };

        self.commit(state.clone(), restored_block);
        drop(archive);

        debug!(restored_block, "restored pool state");
        self.publish(state);
        Ok(true)
    }

    /// Blocks with an archived state, oldest first. Empty when archiving is disabled.
    pub async fn archived_blocks(&self) -> Vec<u64> {
        self.state_lock
            .lock()
            .await
            .as_ref()
            .map(|archive| archive.blocks().collect())
            .unwrap_or_default()
    }

    async fn simulate(
        &self,
        zero_for_one: bool,
        amount_specified: I256,
        sqrt_price_limit_x96: Option<U256>,
        override_state: Option<Arc<PoolState>>,
    ) -> Result<(Arc<PoolState>, SwapOutcome), AMMError> {
        let live = self.live();
        let simulating_live_state = override_state.is_none();
        let state = override_state.unwrap_or(live.state);

        let context = SwapContext {
            tick_spacing: self.tick_spacing,
            fee: self.fee,
            sparse: self.sparse_liquidity_map,
            block: live.update_block,
        };

        let outcome = swap(
            &state,
            &context,
            zero_for_one,
            amount_specified,
            sqrt_price_limit_x96.unwrap_or_else(|| default_sqrt_price_limit(zero_for_one)),
            &self.word_source(),
        )
        .await?;

        if simulating_live_state && !outcome.fetched_words.is_empty() {
            self.merge_fetched_words(&state, &outcome.fetched_words);
        }

        Ok((state, outcome))
    }

    /// Keeps words loaded by a simulation, provided no mutation is running and the live state is
    /// still the one that was simulated.
    fn merge_fetched_words(&self, observed: &Arc<PoolState>, words: &[WordSnapshot]) {
        let Ok(_guard) = self.state_lock.try_lock() else {
            return;
        };

        let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
        if !Arc::ptr_eq(&live.state, observed) {
            return;
        }

        let mut merged = (**observed).clone();
        for word in words {
            word.merge_into(&mut merged);
        }
        live.state = Arc::new(merged);

        debug!(
            pool = ?self.address,
            words = ?words.iter().map(|word| word.word_position).collect::<Vec<_>>(),
            "cached fetched tick bitmap words"
        );
    }

    fn simulation_result(
        &self,
        initial_state: Arc<PoolState>,
        outcome: SwapOutcome,
    ) -> UniswapV3PoolSimulationResult {
        let final_state = PoolState {
            pool: self.address,
            liquidity: outcome.liquidity,
            sqrt_price_x96: outcome.sqrt_price_x96,
            tick: outcome.tick,
            tick_bitmap: initial_state.tick_bitmap.clone(),
            tick_data: initial_state.tick_data.clone(),
        };

        UniswapV3PoolSimulationResult {
            amount0_delta: outcome.amount0,
            amount1_delta: outcome.amount1,
            initial_state,
            final_state: Arc::new(final_state),
        }
    }

    /// Simulates selling exactly `amount_in` of `token_in`.
    pub async fn simulate_exact_input_swap(
        &self,
        token_in: Address,
        amount_in: U256,
        sqrt_price_limit_x96: Option<U256>,
        override_state: Option<Arc<PoolState>>,
    ) -> Result<UniswapV3PoolSimulationResult, AMMError> {
        let zero_for_one = self.token(token_in)?.address == self.token0.address;
        let amount_specified =
            I256::try_from(amount_in).map_err(|_| SwapSimulationError::AmountOverflow)?;

        let (state, outcome) = self
            .simulate(
                zero_for_one,
                amount_specified,
                sqrt_price_limit_x96,
                override_state,
            )
            .await?;

        Ok(self.simulation_result(state, outcome))
    }

    /// Simulates buying exactly `amount_out` of `token_out`.
    ///
    /// Without a price limit, a pool that cannot provide the full amount is an error. With one,
    /// the swap stops at the limit and the partial result is returned.
    pub async fn simulate_exact_output_swap(
        &self,
        token_out: Address,
        amount_out: U256,
        sqrt_price_limit_x96: Option<U256>,
        override_state: Option<Arc<PoolState>>,
    ) -> Result<UniswapV3PoolSimulationResult, AMMError> {
        let zero_for_one = self.token(token_out)?.address == self.token1.address;
        let amount_specified = I256::try_from(amount_out)
            .ok()
            .and_then(|amount| amount.checked_neg())
            .ok_or(SwapSimulationError::AmountOverflow)?;

        let (state, outcome) = self
            .simulate(
                zero_for_one,
                amount_specified,
                sqrt_price_limit_x96,
                override_state,
            )
            .await?;

        if sqrt_price_limit_x96.is_none() {
            let provided = if zero_for_one {
                outcome.amount1
            } else {
                outcome.amount0
            };
            let available = provided.unsigned_abs();
            if available < amount_out {
                return Err(SwapSimulationError::InsufficientAmountOut {
                    requested: amount_out,
                    available,
                }
                .into());
            }
        }

        Ok(self.simulation_result(state, outcome))
    }

    /// Amount of the other token received for selling `amount_in` of `token_in`.
    pub async fn calculate_tokens_out_from_tokens_in(
        &self,
        token_in: Address,
        amount_in: U256,
        override_state: Option<Arc<PoolState>>,
    ) -> Result<U256, AMMError> {
        let result = self
            .simulate_exact_input_swap(token_in, amount_in, None, override_state)
            .await?;

        Ok(if token_in == self.token0.address {
            result.amount1_delta.unsigned_abs()
        } else {
            result.amount0_delta.unsigned_abs()
        })
    }

    /// Amount of the other token that must be sold to receive `amount_out` of `token_out`.
    pub async fn calculate_tokens_in_from_tokens_out(
        &self,
        token_out: Address,
        amount_out: U256,
        override_state: Option<Arc<PoolState>>,
    ) -> Result<U256, AMMError> {
        let result = self
            .simulate_exact_output_swap(token_out, amount_out, None, override_state)
            .await?;

        Ok(if token_out == self.token1.address {
            result.amount0_delta.unsigned_abs()
        } else {
            result.amount1_delta.unsigned_abs()
        })
    }
}

#[async_trait]
impl<P> AutomatedMarketMaker for UniswapV3Pool<P>
where
    P: ChainStateProvider + ?Sized,
{
    fn address(&self) -> Address {
        self.address
    }

    fn sync_on_event_signatures(&self) -> Vec<B256> {
        UniswapV3PoolExternalUpdate::event_signatures()
    }

    #[instrument(skip(self), level = "debug")]
    async fn sync_from_log(&self, log: Log) -> Result<bool, AMMError> {
        self.external_update(&UniswapV3PoolExternalUpdate::from_log(&log)?)
            .await
    }

    fn tokens(&self) -> Vec<Address> {
        vec![self.token0.address, self.token1.address]
    }

    fn calculate_price(&self, base_token: Address) -> Result<f64, AMMError> {
        let price = self.get_nominal_price(base_token, None)?.to_f64();
        if price.is_finite() {
            Ok(price)
        } else {
            Err(ArithmeticError::F64ConversionError.into())
        }
    }

    async fn simulate_swap(&self, token_in: Address, amount_in: U256) -> Result<U256, AMMError> {
        self.calculate_tokens_out_from_tokens_in(token_in, amount_in, None)
            .await
    }

    fn get_token_out(&self, token_in: Address) -> Address {
        if self.token0.address == token_in {
            self.token1.address
        } else {
            self.token0.address
        }
    }
}

/// `(sqrt_price_x96 / 2^96)^2`, the amount of token1 one unit of token0 is worth.
fn exchange_rate(sqrt_price_x96: U256) -> Result<BigFloat, ArithmeticError> {
    if sqrt_price_x96.is_zero() {
        return Err(ArithmeticError::SqrtPriceIsZero);
    }
    let price = u256_to_big_float(sqrt_price_x96).div(&BigFloat::from_u128(1 << 96));
    Ok(price.mul(&price))
}

fn u256_to_big_float(value: U256) -> BigFloat {
    let limb_base = BigFloat::from_u128(1 << 64);
    value
        .as_limbs()
        .iter()
        .rev()
        .fold(BigFloat::from_u8(0), |acc, limb| {
            acc.mul(&limb_base).add(&BigFloat::from_u64(*limb))
        })
}

fn pow10(exponent: u8) -> BigFloat {
    let ten = BigFloat::from_u8(10);
    (0..exponent).fold(BigFloat::from_u8(1), |acc, _| acc.mul(&ten))
}
