use alloy::primitives::U256;

use super::full_math::{div_rounding_up, mul_div, mul_div_rounding_up};
use crate::{
    amm::consts::{MAX_U160, Q96, RESOLUTION},
    errors::ArithmeticError,
};

/// Gets the next sqrt price given a delta of token0, always rounding up so the price moves far
/// enough when adding and not too far when removing.
pub fn get_next_sqrt_price_from_amount_0_rounding_up(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount: U256,
    add: bool,
) -> Result<U256, ArithmeticError> {
    if amount.is_zero() {
        return Ok(sqrt_price_x96);
    }

    let numerator_1 = U256::from(liquidity) << RESOLUTION;

    if add {
        let product = amount.wrapping_mul(sqrt_price_x96);
        if product / amount == sqrt_price_x96 {
            let denominator = numerator_1.wrapping_add(product);
            if denominator >= numerator_1 {
                return mul_div_rounding_up(numerator_1, sqrt_price_x96, denominator);
            }
        }

        let denominator = (numerator_1 / sqrt_price_x96)
            .checked_add(amount)
            .ok_or(ArithmeticError::Overflow)?;
        div_rounding_up(numerator_1, denominator)
    } else {
        let product = amount.wrapping_mul(sqrt_price_x96);
        if product / amount != sqrt_price_x96 {
            return Err(ArithmeticError::ProductDivAmount);
        }
        if numerator_1 <= product {
            return Err(ArithmeticError::DenominatorLessThanOrEqualToProduct);
        }

        let denominator = numerator_1 - product;
        let next = mul_div_rounding_up(numerator_1, sqrt_price_x96, denominator)?;
        if next > MAX_U160 {
            return Err(ArithmeticError::SafeCastToU160Overflow);
        }
        Ok(next)
    }
}

/// Gets the next sqrt price given a delta of token1, always rounding down.
pub fn get_next_sqrt_price_from_amount_1_rounding_down(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount: U256,
    add: bool,
) -> Result<U256, ArithmeticError> {
    let liquidity = U256::from(liquidity);

    if add {
        let quotient = if amount <= MAX_U160 {
            (amount << RESOLUTION) / liquidity
        } else {
            mul_div(amount, Q96, liquidity)?
        };

        let next = sqrt_price_x96
            .checked_add(quotient)
            .ok_or(ArithmeticError::Overflow)?;
        if next > MAX_U160 {
            return Err(ArithmeticError::SafeCastToU160Overflow);
        }
        Ok(next)
    } else {
        let quotient = if amount <= MAX_U160 {
            div_rounding_up(amount << RESOLUTION, liquidity)?
        } else {
            mul_div_rounding_up(amount, Q96, liquidity)?
        };

        if sqrt_price_x96 <= quotient {
            return Err(ArithmeticError::SqrtPriceIsLessThanQuotient);
        }
        Ok(sqrt_price_x96 - quotient)
    }
}

/// Gets the next sqrt price after adding `amount_in` of token0 (`zero_for_one`) or token1.
pub fn get_next_sqrt_price_from_input(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount_in: U256,
    zero_for_one: bool,
) -> Result<U256, ArithmeticError> {
    if sqrt_price_x96.is_zero() {
        return Err(ArithmeticError::SqrtPriceIsZero);
    }
    if liquidity == 0 {
        return Err(ArithmeticError::LiquidityIsZero);
    }

    if zero_for_one {
        get_next_sqrt_price_from_amount_0_rounding_up(sqrt_price_x96, liquidity, amount_in, true)
    } else {
        get_next_sqrt_price_from_amount_1_rounding_down(sqrt_price_x96, liquidity, amount_in, true)
    }
}

/// Gets the next sqrt price after removing `amount_out` of token1 (`zero_for_one`) or token0.
pub fn get_next_sqrt_price_from_output(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount_out: U256,
    zero_for_one: bool,
) -> Result<U256, ArithmeticError> {
    if sqrt_price_x96.is_zero() {
        return Err(ArithmeticError::SqrtPriceIsZero);
    }
    if liquidity == 0 {
        return Err(ArithmeticError::LiquidityIsZero);
    }

    if zero_for_one {
        get_next_sqrt_price_from_amount_1_rounding_down(sqrt_price_x96, liquidity, amount_out, false)
    } else {
        get_next_sqrt_price_from_amount_0_rounding_up(sqrt_price_x96, liquidity, amount_out, false)
    }
}

/// Amount of token0 between two prices, `liquidity / sqrt(lower) - liquidity / sqrt(upper)`.
pub fn get_amount_0_delta(
    mut sqrt_ratio_a_x96: U256,
    mut sqrt_ratio_b_x96: U256,
    liquidity: u128,
    round_up: bool,
) -> Result<U256, ArithmeticError> {
    if sqrt_ratio_a_x96 > sqrt_ratio_b_x96 {
        (sqrt_ratio_a_x96, sqrt_ratio_b_x96) = (sqrt_ratio_b_x96, sqrt_ratio_a_x96);
    }
    if sqrt_ratio_a_x96.is_zero() {
        return Err(ArithmeticError::SqrtPriceIsZero);
    }

    let numerator_1 = U256::from(liquidity) << RESOLUTION;
    let numerator_2 = sqrt_ratio_b_x96 - sqrt_ratio_a_x96;

    if round_up {
        div_rounding_up(
            mul_div_rounding_up(numerator_1, numerator_2, sqrt_ratio_b_x96)?,
            sqrt_ratio_a_x96,
        )
    } else {
        Ok(mul_div(numerator_1, numerator_2, sqrt_ratio_b_x96)? / sqrt_ratio_a_x96)
    }
}

/// Amount of token1 between two prices, `liquidity * (sqrt(upper) - sqrt(lower))`.
pub fn get_amount_1_delta(
    mut sqrt_ratio_a_x96: U256,
    mut sqrt_ratio_b_x96: U256,
    liquidity: u128,
    round_up: bool,
) -> Result<U256, ArithmeticError> {
    if sqrt_ratio_a_x96 > sqrt_ratio_b_x96 {
        (sqrt_ratio_a_x96, sqrt_ratio_b_x96) = (sqrt_ratio_b_x96, sqrt_ratio_a_x96);
    }

    let difference = sqrt_ratio_b_x96 - sqrt_ratio_a_x96;
    if round_up {
        mul_div_rounding_up(U256::from(liquidity), difference, Q96)
    } else {
        mul_div(U256::from(liquidity), difference, Q96)
    }
}

#[cfg(test)]
mod test {
    use alloy::primitives::uint;

    use super::*;

    const ONE_ETHER: u128 = 1_000_000_000_000_000_000;
    const TENTH_ETHER: U256 = uint!(100000000000000000_U256);

    #[test]
    fn test_get_next_sqrt_price_from_input() {
        assert_eq!(
            get_next_sqrt_price_from_input(U256::ZERO, 1, TENTH_ETHER, false),
            Err(ArithmeticError::SqrtPriceIsZero)
        );
        assert_eq!(
            get_next_sqrt_price_from_input(Q96, 0, TENTH_ETHER, true),
            Err(ArithmeticError::LiquidityIsZero)
        );
        assert_eq!(
            get_next_sqrt_price_from_input(MAX_U160, 1024, U256::from(1024), false),
            Err(ArithmeticError::SafeCastToU160Overflow)
        );
        // any input amount cannot underflow the price
        assert_eq!(
            get_next_sqrt_price_from_input(U256::from(1), 1, U256::from(1) << 255, true).unwrap(),
            U256::from(1)
        );
        assert_eq!(
            get_next_sqrt_price_from_input(Q96, ONE_ETHER, U256::ZERO, true).unwrap(),
            Q96
        );
        assert_eq!(
            get_next_sqrt_price_from_input(Q96, ONE_ETHER, TENTH_ETHER, false).unwrap(),
            U256::from(87150978765690771352898345369_u128)
        );
        assert_eq!(
            get_next_sqrt_price_from_input(Q96, ONE_ETHER, TENTH_ETHER, true).unwrap(),
            U256::from(72025602285694852357767227579_u128)
        );
    }

    #[test]
    fn test_get_next_sqrt_price_from_output() {
        assert_eq!(
            get_next_sqrt_price_from_output(
                U256::from(20282409603651670423947251286016_u128),
                1024,
                U256::from(4),
                false
            ),
            Err(ArithmeticError::DenominatorLessThanOrEqualToProduct)
        );
        assert_eq!(
            get_next_sqrt_price_from_output(
                U256::from(20282409603651670423947251286016_u128),
                1024,
                U256::from(262144),
                true
            ),
            Err(ArithmeticError::SqrtPriceIsLessThanQuotient)
        );
        assert_eq!(
            get_next_sqrt_price_from_output(
                U256::from(20282409603651670423947251286016_u128),
                1024,
                U256::from(262143),
                true
            )
            .unwrap(),
            U256::from(77371252455336267181195264_u128)
        );
        assert_eq!(
            get_next_sqrt_price_from_output(Q96, ONE_ETHER, TENTH_ETHER, false).unwrap(),
            U256::from(88031291682515930659493278152_u128)
        );
        assert_eq!(
            get_next_sqrt_price_from_output(Q96, ONE_ETHER, TENTH_ETHER, true).unwrap(),
            U256::from(71305346262837903834189555302_u128)
        );
    }

    #[test]
    fn test_get_amount_deltas() {
        let upper = U256::from(87150978765690771352898345369_u128);

        assert_eq!(get_amount_0_delta(Q96, Q96, 0, true).unwrap(), U256::ZERO);
        assert_eq!(
            get_amount_0_delta(Q96, upper, ONE_ETHER, true).unwrap(),
            U256::from(90909090909090910_u128)
        );
        assert_eq!(
            get_amount_0_delta(upper, Q96, ONE_ETHER, false).unwrap(),
            U256::from(90909090909090909_u128)
        );
        assert_eq!(
            get_amount_1_delta(Q96, upper, ONE_ETHER, true).unwrap(),
            TENTH_ETHER
        );
        assert_eq!(
            get_amount_1_delta(Q96, upper, ONE_ETHER, false).unwrap(),
            TENTH_ETHER - U256::from(1)
        );
    }
}
