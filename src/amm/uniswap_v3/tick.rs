use tracing::debug;

use super::{
    liquidity_math,
    state::{LiquidityAtTick, TickBitmap, TickData},
    tick_bitmap::flip_tick,
};
use crate::errors::{AMMError, ArithmeticError, SwapSimulationError};

/// Applies a liquidity delta to a position boundary. Mints and burns share the same arithmetic,
/// burns carry a negative `liquidity_delta`.
///
/// The word owning `tick` must already be present in `tick_bitmap`. A tick seen for the first
/// time is initialized with zero liquidity and its bit is set. A tick left without gross
/// liquidity is removed and its bit cleared.
///
/// Returns the updated entry, or `None` when the tick was removed.
pub fn update_tick(
    tick_bitmap: &mut TickBitmap,
    tick_data: &mut TickData,
    tick: i32,
    tick_spacing: i32,
    liquidity_delta: i128,
    upper: bool,
    block: u64,
) -> Result<Option<LiquidityAtTick>, AMMError> {
    let info = match tick_data.get(&tick) {
        Some(info) => *info,
        None => {
            flip_tick(tick_bitmap, tick, tick_spacing, Some(block))?;
            LiquidityAtTick::default()
        }
    };

    let liquidity_net = if upper {
        info.liquidity_net.checked_sub(liquidity_delta)
    } else {
        info.liquidity_net.checked_add(liquidity_delta)
    }
    .ok_or(ArithmeticError::Overflow)?;
    let liquidity_gross = liquidity_math::add_delta(info.liquidity_gross, liquidity_delta)?;

    debug!(
        tick,
        old_liquidity_net = info.liquidity_net,
        old_liquidity_gross = info.liquidity_gross,
        liquidity_net,
        liquidity_gross,
        "updated tick liquidity"
    );

    if liquidity_gross == 0 {
        tick_data.remove(&tick);
        flip_tick(tick_bitmap, tick, tick_spacing, Some(block))?;
        Ok(None)
    } else {
        let updated = LiquidityAtTick::new(liquidity_net, liquidity_gross, Some(block));
        tick_data.insert(tick, updated);
        Ok(Some(updated))
    }
}

/// Active liquidity after crossing a tick with the given net liquidity. Moving down through a
/// tick removes what moving up adds.
pub fn cross_tick(
    liquidity: u128,
    liquidity_net: i128,
    zero_for_one: bool,
) -> Result<u128, SwapSimulationError> {
    let liquidity_net = if zero_for_one {
        liquidity_net
            .checked_neg()
            .ok_or(ArithmeticError::Overflow)?
    } else {
        liquidity_net
    };
    liquidity_math::add_delta(liquidity, liquidity_net)
}
