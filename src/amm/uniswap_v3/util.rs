use crate::errors::SwapSimulationError;

/// Mirrors a Solidity `require`, surfacing the revert reason on failure.
pub(crate) fn require(assertion: bool, reason: &'static str) -> Result<(), SwapSimulationError> {
    if assertion {
        Ok(())
    } else {
        Err(SwapSimulationError::Revert(reason))
    }
}
