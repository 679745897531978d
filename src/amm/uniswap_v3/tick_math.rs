use alloy::primitives::{uint, I256, U256};

use crate::errors::ArithmeticError;

pub const MIN_TICK: i32 = -887272;
pub const MAX_TICK: i32 = -MIN_TICK;

pub const MIN_SQRT_RATIO: U256 = uint!(4295128739_U256);
pub const MAX_SQRT_RATIO: U256 =
    uint!(1461446703485210103287273052203988822378723970342_U256);

const SQRT_10001: u128 = 255738958999603826347141;
const TICK_LOW: u128 = 3402992956809132418596140100660247210;
const TICK_HIGH: u128 = 291339464771989622907027621153398088495;

const RATIO_MULTIPLIERS: [u128; 19] = [
    0xfff97272373d413259a46990580e213a,
    0xfff2e50f5f656932ef12357cf3c7fdcc,
    0xffe5caca7e10e4e61c3624eaa0941cd0,
    0xffcb9843d60f6159c9db58835c926644,
    0xff973b41fa98c081472e6896dfb254c0,
    0xff2ea16466c96a3843ec78b326b52861,
    0xfe5dee046a99a2a811c461f1969c3053,
    0xfcbe86c7900a88aedcffc83b479aa3a4,
    0xf987a7253ac413176f2b074cf7815e54,
    0xf3392b0822b70005940c7a398e4b70f3,
    0xe7159475a2c29b7443b29c7fa6e889d9,
    0xd097f3bdfd2022b8845ad8f792aa5825,
    0xa9f746462d870fdf8a65dc1f90e061e5,
    0x70d869a156d2a1b890bb3df62baf32f7,
    0x31be135f97d08fd981231505542fcfa6,
    0x9aa508b5b7a84e1c677de54f3e99bc9,
    0x5d6af8dedb81196699c329225ee604,
    0x2216e584f5fa1ea926041bedfe98,
    0x48a170391f7dc42444e8fa2,
];

/// Calculates `sqrt(1.0001^tick) * 2^96`.
pub fn get_sqrt_ratio_at_tick(tick: i32) -> Result<U256, ArithmeticError> {
    let abs_tick = tick.unsigned_abs();
    if abs_tick > MAX_TICK as u32 {
        return Err(ArithmeticError::TickOutOfBounds(tick));
    }

    let mut ratio = if abs_tick & 0x1 != 0 {
        U256::from(0xfffcb933bd6fad37aa2d162d1a594001_u128)
    } else {
        U256::from(1) << 128
    };

    for (i, multiplier) in RATIO_MULTIPLIERS.iter().enumerate() {
        if abs_tick & (0x2 << i) != 0 {
            ratio = (ratio * U256::from(*multiplier)) >> 128;
        }
    }

    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    // Q128.128 to Q128.96, rounding up so that get_tick_at_sqrt_ratio of the output is consistent
    let remainder = ratio & U256::from(u32::MAX);
    Ok((ratio >> 32) + if remainder.is_zero() { U256::ZERO } else { U256::from(1) })
}

/// Calculates the greatest tick value such that `get_sqrt_ratio_at_tick(tick) <= sqrt_price_x96`.
pub fn get_tick_at_sqrt_ratio(sqrt_price_x96: U256) -> Result<i32, ArithmeticError> {
    if sqrt_price_x96 < MIN_SQRT_RATIO || sqrt_price_x96 >= MAX_SQRT_RATIO {
        return Err(ArithmeticError::SqrtPriceOutOfBounds(sqrt_price_x96));
    }

    let ratio: U256 = sqrt_price_x96 << 32;
    let msb = ratio.bit_len() - 1;

    // normalize into [2^127, 2^128)
    let mut r = if msb >= 128 {
        ratio >> (msb - 127)
    } else {
        ratio << (127 - msb)
    };

    let mut fraction = 0_u64;
    for i in (50..64).rev() {
        r = (r * r) >> 127;
        let f: U256 = r >> 128;
        if !f.is_zero() {
            fraction |= 1 << i;
            r >>= 1;
        }
    }

    let log_2 = I256::unchecked_from(((msb as i128 - 128) << 64) | fraction as i128);

    let log_sqrt10001 = log_2
        .checked_mul(I256::from_raw(U256::from(SQRT_10001)))
        .ok_or(ArithmeticError::Overflow)?;

    let tick_low = log_sqrt10001
        .checked_sub(I256::from_raw(U256::from(TICK_LOW)))
        .ok_or(ArithmeticError::Underflow)?
        .asr(128);
    let tick_high = log_sqrt10001
        .checked_add(I256::from_raw(U256::from(TICK_HIGH)))
        .ok_or(ArithmeticError::Overflow)?
        .asr(128);

    let tick_low = i32::try_from(tick_low).map_err(|_| ArithmeticError::Overflow)?;
    let tick_high = i32::try_from(tick_high).map_err(|_| ArithmeticError::Overflow)?;

    if tick_low == tick_high {
        Ok(tick_low)
    } else if get_sqrt_ratio_at_tick(tick_high)? <= sqrt_price_x96 {
        Ok(tick_high)
    } else {
        Ok(tick_low)
    }
}
