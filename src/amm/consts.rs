use alloy::primitives::{b256, uint, B256, U256};

pub const U256_1: U256 = uint!(1_U256);
pub const U256_2: U256 = uint!(2_U256);

// Q64.96
pub const Q96: U256 = uint!(0x1000000000000000000000000_U256);
pub const RESOLUTION: u8 = 96;

pub const MAX_U160: U256 = uint!(0xffffffffffffffffffffffffffffffffffffffff_U256);

/// Fees are expressed in hundredths of a basis point.
pub const FEE_DENOMINATOR: u32 = 1_000_000;

pub const UNISWAP_V3_MAINNET_POOL_INIT_HASH: B256 =
    b256!("e34f199b19b2b4f47f68442619d555527d244f78a3297ea89325f843f87b8b54");
