use alloy::primitives::{I256, U256};
use tracing::{debug, trace};

use super::{
    state::{BitmapWord, PoolState, TickBitmap, TickData},
    swap_math::compute_swap_step,
    tick::cross_tick,
    tick_bitmap::{next_initialized_tick_within_one_word, BitmapView, WordSnapshot, WordSource},
    tick_math::{
        get_sqrt_ratio_at_tick, get_tick_at_sqrt_ratio, MAX_SQRT_RATIO, MAX_TICK, MIN_SQRT_RATIO,
        MIN_TICK,
    },
    util::require,
};
use crate::{
    amm::consts::U256_1,
    errors::{AMMError, SwapSimulationError, TickBitmapError},
};

/// Pool parameters the swap loop needs besides the state itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapContext {
    pub tick_spacing: i32,
    pub fee: u32,
    /// Whether missing bitmap words must be fetched instead of treated as empty.
    pub sparse: bool,
    /// Block at which missing words are fetched.
    pub block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutcome {
    pub amount0: I256,
    pub amount1: I256,
    pub sqrt_price_x96: U256,
    pub liquidity: u128,
    pub tick: i32,
    /// Words fetched from the chain during the simulation.
    pub fetched_words: Vec<WordSnapshot>,
}

pub struct SwapCache {
    pub liquidity_start: u128,
}

pub struct SwapState {
    pub amount_specified_remaining: I256,
    pub amount_calculated: I256,
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub liquidity: u128,
}

#[derive(Default)]
pub struct StepComputations {
    pub sqrt_price_start_x96: U256,
    pub tick_next: i32,
    pub initialized: bool,
    pub sqrt_price_next_x96: U256,
    pub amount_in: U256,
    pub amount_out: U256,
    pub fee_amount: U256,
}

/// The pool's liquidity map as seen by a single simulation. Words loaded while simulating shadow
/// the state's maps without touching them.
struct WorkingLiquidityMap<'a> {
    state: &'a PoolState,
    words: TickBitmap,
    ticks: TickData,
    fetched: Vec<WordSnapshot>,
}

impl<'a> WorkingLiquidityMap<'a> {
    fn new(state: &'a PoolState) -> Self {
        WorkingLiquidityMap {
            state,
            words: TickBitmap::new(),
            ticks: TickData::new(),
            fetched: vec![],
        }
    }

    fn liquidity_net(&self, tick: i32) -> Option<i128> {
        self.ticks
            .get(&tick)
            .or_else(|| self.state.tick_data.get(&tick))
            .map(|info| info.liquidity_net)
    }

    async fn load_word<S: WordSource + ?Sized>(
        &mut self,
        word_position: i16,
        context: &SwapContext,
        source: &S,
    ) -> Result<(), AMMError> {
        if context.sparse {
            let snapshot = source.fetch_word(word_position, context.block).await?;
            self.words.insert(word_position, snapshot.word);
            self.ticks.extend(snapshot.ticks.iter().copied());
            self.fetched.push(snapshot);
        } else {
            // the map is complete, so a missing word is known to be empty
            self.words.insert(word_position, BitmapWord::default());
        }
        Ok(())
    }
}

impl BitmapView for WorkingLiquidityMap<'_> {
    fn word(&self, word_position: i16) -> Option<U256> {
        self.words
            .get(&word_position)
            .or_else(|| self.state.tick_bitmap.get(&word_position))
            .map(|word| word.bitmap)
    }
}

/// The widest price limit allowed in the trade direction.
pub fn default_sqrt_price_limit(zero_for_one: bool) -> U256 {
    if zero_for_one {
        MIN_SQRT_RATIO + U256_1
    } else {
        MAX_SQRT_RATIO - U256_1
    }
}

fn to_i256(value: U256) -> Result<I256, SwapSimulationError> {
    I256::try_from(value).map_err(|_| SwapSimulationError::AmountOverflow)
}

/// Simulates a swap against `pool_state` following the on-chain traversal step by step.
///
/// A positive `amount_specified` is an exact input, a negative one an exact output. Returned
/// amounts are positive when paid into the pool and negative when paid out. The state itself is
/// never modified; words loaded from `source` are returned in the outcome.
pub async fn swap<S: WordSource + ?Sized>(
    pool_state: &PoolState,
    context: &SwapContext,
    zero_for_one: bool,
    amount_specified: I256,
    sqrt_price_limit_x96: U256,
    source: &S,
) -> Result<SwapOutcome, AMMError> {
    require(amount_specified != I256::ZERO, "AS")?;

    require(
        if zero_for_one {
            sqrt_price_limit_x96 < pool_state.sqrt_price_x96 && sqrt_price_limit_x96 > MIN_SQRT_RATIO
        } else {
            sqrt_price_limit_x96 > pool_state.sqrt_price_x96 && sqrt_price_limit_x96 < MAX_SQRT_RATIO
        },
        "SPL",
    )?;

    let cache = SwapCache {
        liquidity_start: pool_state.liquidity,
    };

    let exact_input = amount_specified > I256::ZERO;

    let mut state = SwapState {
        amount_specified_remaining: amount_specified,
        amount_calculated: I256::ZERO,
        sqrt_price_x96: pool_state.sqrt_price_x96,
        tick: pool_state.tick,
        liquidity: cache.liquidity_start,
    };

    let mut liquidity_map = WorkingLiquidityMap::new(pool_state);

    // continue swapping as long as we haven't used the entire input/output and haven't reached the price limit
    while state.amount_specified_remaining != I256::ZERO
        && state.sqrt_price_x96 != sqrt_price_limit_x96
    {
        let mut step = StepComputations {
            sqrt_price_start_x96: state.sqrt_price_x96,
            ..Default::default()
        };

        (step.tick_next, step.initialized) = match next_initialized_tick_within_one_word(
            &liquidity_map,
            state.tick,
            context.tick_spacing,
            zero_for_one,
        ) {
            Ok(next) => next,
            Err(AMMError::TickBitmapError(TickBitmapError::WordUnavailable(word_position))) => {
                debug!(
                    pool = ?pool_state.pool,
                    word_position,
                    sparse = context.sparse,
                    "tick bitmap word unavailable, loading"
                );
                // nothing has been consumed yet in this iteration, so it is simply repeated
                liquidity_map
                    .load_word(word_position, context, source)
                    .await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        // ensure that we do not overshoot the min/max tick, as the tick bitmap is not aware of these bounds
        step.tick_next = step.tick_next.clamp(MIN_TICK, MAX_TICK);

        step.sqrt_price_next_x96 =
            get_sqrt_ratio_at_tick(step.tick_next).map_err(SwapSimulationError::from)?;

        let sqrt_price_target_x96 = if zero_for_one {
            step.sqrt_price_next_x96.max(sqrt_price_limit_x96)
        } else {
            step.sqrt_price_next_x96.min(sqrt_price_limit_x96)
        };

        // compute values to swap to the target tick, price limit, or point where input/output amount is exhausted
        (
            state.sqrt_price_x96,
            step.amount_in,
            step.amount_out,
            step.fee_amount,
        ) = compute_swap_step(
            state.sqrt_price_x96,
            sqrt_price_target_x96,
            state.liquidity,
            state.amount_specified_remaining,
            context.fee,
        )
        .map_err(SwapSimulationError::from)?;

        let amount_in_with_fee = step
            .amount_in
            .checked_add(step.fee_amount)
            .ok_or(SwapSimulationError::AmountOverflow)?;

        if exact_input {
            state.amount_specified_remaining = state
                .amount_specified_remaining
                .checked_sub(to_i256(amount_in_with_fee)?)
                .ok_or(SwapSimulationError::AmountOverflow)?;
            state.amount_calculated = state
                .amount_calculated
                .checked_sub(to_i256(step.amount_out)?)
                .ok_or(SwapSimulationError::AmountOverflow)?;
        } else {
            state.amount_specified_remaining = state
                .amount_specified_remaining
                .checked_add(to_i256(step.amount_out)?)
                .ok_or(SwapSimulationError::AmountOverflow)?;
            state.amount_calculated = state
                .amount_calculated
                .checked_add(to_i256(amount_in_with_fee)?)
                .ok_or(SwapSimulationError::AmountOverflow)?;
        }

        trace!(
            tick_next = step.tick_next,
            initialized = step.initialized,
            sqrt_price = ?state.sqrt_price_x96,
            amount_in = ?step.amount_in,
            amount_out = ?step.amount_out,
            fee_amount = ?step.fee_amount,
            liquidity = state.liquidity,
            "swap step"
        );

        // shift tick if we reached the next price
        if state.sqrt_price_x96 == step.sqrt_price_next_x96 {
            // if the tick is initialized, run the tick transition
            if step.initialized {
                let liquidity_net = liquidity_map
                    .liquidity_net(step.tick_next)
                    .ok_or(AMMError::MissingTickData(step.tick_next))?;
                state.liquidity = cross_tick(state.liquidity, liquidity_net, zero_for_one)?;
            }

            state.tick = if zero_for_one {
                step.tick_next - 1
            } else {
                step.tick_next
            };
        } else if state.sqrt_price_x96 != step.sqrt_price_start_x96 {
            // recompute unless we're on a lower tick boundary (i.e. already transitioned ticks), and haven't moved
            state.tick = get_tick_at_sqrt_ratio(state.sqrt_price_x96)
                .map_err(SwapSimulationError::from)?;
        }
    }

    let specified_used = amount_specified
        .checked_sub(state.amount_specified_remaining)
        .ok_or(SwapSimulationError::AmountOverflow)?;

    let (amount0, amount1) = if zero_for_one == exact_input {
        (specified_used, state.amount_calculated)
    } else {
        (state.amount_calculated, specified_used)
    };

    Ok(SwapOutcome {
        amount0,
        amount1,
        sqrt_price_x96: state.sqrt_price_x96,
        liquidity: state.liquidity,
        tick: state.tick,
        fetched_words: liquidity_map.fetched,
    })
}
