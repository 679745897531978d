use crate::errors::SwapSimulationError;

/// Adds a signed liquidity delta to `x`, reverting with `LS` on underflow and `LA` on overflow.
pub fn add_delta(x: u128, y: i128) -> Result<u128, SwapSimulationError> {
    if y < 0 {
        x.checked_sub(y.unsigned_abs())
            .ok_or(SwapSimulationError::Revert("LS"))
    } else {
        x.checked_add(y as u128)
            .ok_or(SwapSimulationError::Revert("LA"))
    }
}
