use std::{collections::BTreeMap, sync::Arc};

use alloy::primitives::{Address, TxHash, I256, U256};
use serde::{Deserialize, Serialize};

/// One 256-tick slice of the tick bitmap. The as-of block is bookkeeping only and is ignored
/// when comparing words.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BitmapWord {
    pub bitmap: U256,
    #[serde(default)]
    pub block: Option<u64>,
}

impl BitmapWord {
    pub fn new(bitmap: U256, block: Option<u64>) -> Self {
        BitmapWord { bitmap, block }
    }
}

impl PartialEq for BitmapWord {
    fn eq(&self, other: &Self) -> bool {
        self.bitmap == other.bitmap
    }
}

impl Eq for BitmapWord {}

/// Liquidity referencing a single initialized tick.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LiquidityAtTick {
    #[serde(alias = "liquidityNet")]
    pub liquidity_net: i128,
    #[serde(alias = "liquidityGross")]
    pub liquidity_gross: u128,
    #[serde(default)]
    pub block: Option<u64>,
}

impl LiquidityAtTick {
    pub fn new(liquidity_net: i128, liquidity_gross: u128, block: Option<u64>) -> Self {
        LiquidityAtTick {
            liquidity_net,
            liquidity_gross,
            block,
        }
    }
}

impl PartialEq for LiquidityAtTick {
    fn eq(&self, other: &Self) -> bool {
        self.liquidity_net == other.liquidity_net && self.liquidity_gross == other.liquidity_gross
    }
}

impl Eq for LiquidityAtTick {}

pub type TickBitmap = BTreeMap<i16, BitmapWord>;
pub type TickData = BTreeMap<i32, LiquidityAtTick>;

/// Snapshot of a pool. Values are never edited once published; mutation paths clone the
/// snapshot, edit the copy and swap the pool's reference. The liquidity maps are shared between
/// snapshots until one of them writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    pub pool: Address,
    pub liquidity: u128,
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub tick_bitmap: Arc<TickBitmap>,
    pub tick_data: Arc<TickData>,
}

impl PoolState {
    pub fn new(pool: Address, liquidity: u128, sqrt_price_x96: U256, tick: i32) -> Self {
        PoolState {
            pool,
            liquidity,
            sqrt_price_x96,
            tick,
            tick_bitmap: Arc::default(),
            tick_data: Arc::default(),
        }
    }

    pub fn with_liquidity_map(mut self, tick_bitmap: TickBitmap, tick_data: TickData) -> Self {
        self.tick_bitmap = Arc::new(tick_bitmap);
        self.tick_data = Arc::new(tick_data);
        self
    }

    pub fn tick_bitmap_mut(&mut self) -> &mut TickBitmap {
        Arc::make_mut(&mut self.tick_bitmap)
    }

    pub fn tick_data_mut(&mut self) -> &mut TickData {
        Arc::make_mut(&mut self.tick_data)
    }
}

/// An externally observed change to a pool, usually decoded from a `Mint`, `Burn` or `Swap`
/// log. Each populated field is applied independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniswapV3PoolExternalUpdate {
    pub block_number: u64,
    pub tick: Option<i32>,
    pub liquidity: Option<u128>,
    pub sqrt_price_x96: Option<U256>,
    pub liquidity_change: Option<LiquidityChange>,
    pub tx: Option<TxHash>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityChange {
    /// Positive when liquidity is added, negative when removed.
    pub liquidity: i128,
    pub tick_lower: i32,
    pub tick_upper: i32,
}

impl LiquidityChange {
    pub fn new(liquidity: i128, tick_lower: i32, tick_upper: i32) -> Self {
        LiquidityChange {
            liquidity,
            tick_lower,
            tick_upper,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniswapV3PoolSimulationResult {
    pub amount0_delta: I256,
    pub amount1_delta: I256,
    pub initial_state: Arc<PoolState>,
    pub final_state: Arc<PoolState>,
}

/// Published to subscribers after every committed state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniswapV3PoolStateUpdated {
    pub state: Arc<PoolState>,
}
