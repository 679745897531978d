use alloy::primitives::U256;

use crate::errors::ArithmeticError;

/// Index of the most significant set bit, `x >= 2**msb && x < 2**(msb + 1)`.
pub fn most_significant_bit(x: U256) -> Result<u8, ArithmeticError> {
    if x.is_zero() {
        return Err(ArithmeticError::ZeroValue);
    }
    Ok((255 - x.leading_zeros()) as u8)
}

/// Index of the least significant set bit, `(x & 2**lsb) != 0 && (x & (2**lsb - 1)) == 0`.
pub fn least_significant_bit(x: U256) -> Result<u8, ArithmeticError> {
    if x.is_zero() {
        return Err(ArithmeticError::ZeroValue);
    }
    Ok(x.trailing_zeros() as u8)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_most_significant_bit() {
        assert_eq!(most_significant_bit(U256::ZERO), Err(ArithmeticError::ZeroValue));
        assert_eq!(most_significant_bit(U256::from(1)).unwrap(), 0);
        assert_eq!(most_significant_bit(U256::from(2)).unwrap(), 1);
        for i in 0..=255 {
            assert_eq!(most_significant_bit(U256::from(1) << i).unwrap(), i as u8);
        }
        assert_eq!(most_significant_bit(U256::MAX).unwrap(), 255);
    }

    #[test]
    fn test_least_significant_bit() {
        assert_eq!(least_significant_bit(U256::ZERO), Err(ArithmeticError::ZeroValue));
        assert_eq!(least_significant_bit(U256::from(1)).unwrap(), 0);
        assert_eq!(least_significant_bit(U256::from(2)).unwrap(), 1);
        for i in 0..=255 {
            assert_eq!(least_significant_bit(U256::from(1) << i).unwrap(), i as u8);
        }
        assert_eq!(least_significant_bit(U256::MAX).unwrap(), 0);
    }
}
