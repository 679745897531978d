use alloy::{
    primitives::{keccak256, Address, B256, U256},
    sol_types::SolValue,
};

/// Orders a token pair the way the factory does.
pub fn sort_tokens(token_a: Address, token_b: Address) -> (Address, Address) {
    if token_a < token_b {
        (token_a, token_b)
    } else {
        (token_b, token_a)
    }
}

/// Computes the CREATE2 address of the pool for a token pair and fee tier. The tokens may be
/// given in either order.
pub fn generate_v3_pool_address(
    token_a: Address,
    token_b: Address,
    fee: u32,
    deployer: Address,
    init_hash: B256,
) -> Address {
    let (token0, token1) = sort_tokens(token_a, token_b);
    let salt = keccak256((token0, token1, U256::from(fee)).abi_encode());
    deployer.create2(salt, init_hash)
}
