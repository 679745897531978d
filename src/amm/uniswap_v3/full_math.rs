use alloy::primitives::{ruint::UintTryFrom, U256, U512};

use crate::{amm::consts::U256_1, errors::ArithmeticError};

/// Calculates `floor(a * b / denominator)` with full precision. Errors if the result overflows
/// 256 bits or the denominator is zero.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Result<U256, ArithmeticError> {
    if denominator.is_zero() {
        return Err(ArithmeticError::DivisionByZero);
    }
    let product = U512::from(a) * U512::from(b);
    U256::uint_try_from(product / U512::from(denominator))
        .map_err(|_| ArithmeticError::MulDivOverflow)
}

/// Calculates `ceil(a * b / denominator)` with full precision.
pub fn mul_div_rounding_up(a: U256, b: U256, denominator: U256) -> Result<U256, ArithmeticError> {
    let result = mul_div(a, b, denominator)?;
    if a.mul_mod(b, denominator).is_zero() {
        Ok(result)
    } else if result == U256::MAX {
        Err(ArithmeticError::MulDivOverflow)
    } else {
        Ok(result + U256_1)
    }
}

/// Returns `ceil(x / y)`. Division by zero is an error rather than returning zero.
pub fn div_rounding_up(x: U256, y: U256) -> Result<U256, ArithmeticError> {
    if y.is_zero() {
        return Err(ArithmeticError::DivisionByZero);
    }
    let quotient = x / y;
    if (x % y).is_zero() {
        Ok(quotient)
    } else {
        Ok(quotient + U256_1)
    }
}
