use std::sync::Arc;

use alloy::{
    primitives::{B256, U256},
    rpc::types::eth::Log,
    sol_types::SolEvent,
};
use tracing::debug;

use super::{
    liquidity_math,
    state::{BitmapWord, LiquidityChange, PoolState, UniswapV3PoolExternalUpdate},
    tick::update_tick,
    tick_bitmap::{tick_word_and_bit_position, WordSource},
    IUniswapV3Pool,
};
use crate::errors::{AMMError, ArithmeticError, EventLogError};

impl UniswapV3PoolExternalUpdate {
    /// Decodes a `Mint`, `Burn` or `Swap` log. Other pool events do not touch the mirrored state
    /// and are rejected.
    pub fn from_log(log: &Log) -> Result<Self, AMMError> {
        let event_signature = log
            .topics()
            .first()
            .copied()
            .ok_or(EventLogError::MissingTopics)?;
        let block_number = log
            .block_number
            .ok_or(EventLogError::LogBlockNumberNotFound)?;

        let mut update = UniswapV3PoolExternalUpdate {
            block_number,
            tx: log.transaction_hash,
            ..Default::default()
        };

        if event_signature == IUniswapV3Pool::Mint::SIGNATURE_HASH {
            let event = IUniswapV3Pool::Mint::decode_log(log.as_ref())?;
            update.liquidity_change = Some(LiquidityChange::new(
                i128::try_from(event.amount).map_err(|_| ArithmeticError::Overflow)?,
                event.tickLower.as_i32(),
                event.tickUpper.as_i32(),
            ));
        } else if event_signature == IUniswapV3Pool::Burn::SIGNATURE_HASH {
            let event = IUniswapV3Pool::Burn::decode_log(log.as_ref())?;
            let amount =
                i128::try_from(event.amount).map_err(|_| ArithmeticError::Overflow)?;
            update.liquidity_change = Some(LiquidityChange::new(
                -amount,
                event.tickLower.as_i32(),
                event.tickUpper.as_i32(),
            ));
        } else if event_signature == IUniswapV3Pool::Swap::SIGNATURE_HASH {
            let event = IUniswapV3Pool::Swap::decode_log(log.as_ref())?;
            update.liquidity = Some(event.liquidity);
            update.sqrt_price_x96 = Some(U256::from(event.sqrtPriceX96));
            update.tick = Some(event.tick.as_i32());
        } else {
            return Err(EventLogError::InvalidEventSignature.into());
        }

        Ok(update)
    }

    /// Event topics that [`UniswapV3PoolExternalUpdate::from_log`] understands.
    pub fn event_signatures() -> Vec<B256> {
        vec![
            IUniswapV3Pool::Mint::SIGNATURE_HASH,
            IUniswapV3Pool::Burn::SIGNATURE_HASH,
            IUniswapV3Pool::Swap::SIGNATURE_HASH,
        ]
    }
}

/// Computes the state that results from applying `update` to `state`.
///
/// Returns `None` when nothing changed. Updates older than `update_block` are rejected before
/// anything is read. Missing bitmap words at a position boundary are fetched from `source` at the
/// block preceding the update when `sparse`, otherwise they are known to be empty.
pub async fn apply_external_update<S: WordSource + ?Sized>(
    state: &PoolState,
    update_block: u64,
    tick_spacing: i32,
    sparse: bool,
    update: &UniswapV3PoolExternalUpdate,
    source: &S,
) -> Result<Option<PoolState>, AMMError> {
    if update.block_number < update_block {
        return Err(AMMError::StaleUpdate {
            block_number: update.block_number,
            update_block,
        });
    }

    let mut updated = state.clone();
    let mut changed = false;

    if let Some(tick) = update.tick {
        if tick != updated.tick {
            changed = true;
            updated.tick = tick;
            debug!(pool = ?state.pool, tick, "tick updated");
        }
    }

    if let Some(liquidity) = update.liquidity {
        if liquidity != updated.liquidity {
            changed = true;
            updated.liquidity = liquidity;
            debug!(pool = ?state.pool, liquidity, "liquidity updated");
        }
    }

    if let Some(sqrt_price_x96) = update.sqrt_price_x96 {
        if sqrt_price_x96 != updated.sqrt_price_x96 {
            changed = true;
            updated.sqrt_price_x96 = sqrt_price_x96;
            debug!(pool = ?state.pool, ?sqrt_price_x96, "sqrt price updated");
        }
    }

    if let Some(change) = update.liquidity_change.filter(|change| change.liquidity != 0) {
        changed = true;
        apply_liquidity_change(
            &mut updated,
            tick_spacing,
            sparse,
            change,
            update,
            source,
        )
        .await?;
    }

    Ok(changed.then_some(updated))
}

async fn apply_liquidity_change<S: WordSource + ?Sized>(
    state: &mut PoolState,
    tick_spacing: i32,
    sparse: bool,
    change: LiquidityChange,
    update: &UniswapV3PoolExternalUpdate,
    source: &S,
) -> Result<(), AMMError> {
    let LiquidityChange {
        liquidity: liquidity_delta,
        tick_lower,
        tick_upper,
    } = change;

    if tick_lower <= state.tick && state.tick < tick_upper {
        let liquidity_before = state.liquidity;
        state.liquidity = liquidity_math::add_delta(state.liquidity, liquidity_delta)?;
        debug!(
            pool = ?state.pool,
            tx = ?update.tx,
            tick_lower,
            tick_upper,
            tick = state.tick,
            liquidity_before,
            liquidity_delta,
            liquidity = state.liquidity,
            "adjusted in-range liquidity"
        );
    }

    for (tick, upper) in [(tick_lower, false), (tick_upper, true)] {
        let (word_position, _) = tick_word_and_bit_position(tick, tick_spacing);

        if !state.tick_bitmap.contains_key(&word_position) {
            if sparse {
                // the previous block is the last state known to be consistent with this update
                source
                    .fetch_word(word_position, update.block_number.saturating_sub(1))
                    .await?
                    .merge_into(state);
            } else {
                state
                    .tick_bitmap_mut()
                    .insert(word_position, BitmapWord::default());
            }
        }

        let (tick_bitmap, tick_data) = (
            Arc::make_mut(&mut state.tick_bitmap),
            Arc::make_mut(&mut state.tick_data),
        );
        update_tick(
            tick_bitmap,
            tick_data,
            tick,
            tick_spacing,
            liquidity_delta,
            upper,
            update.block_number,
        )?;
    }

    debug!(
        pool = ?state.pool,
        liquidity_delta,
        tick_lower,
        tick_upper,
        "applied liquidity event"
    );

    Ok(())
}
