pub mod consts;
pub mod provider;
pub mod registry;
pub mod subscriber;
pub mod uniswap_v3;

use alloy::{
    primitives::{Address, B256, U256},
    rpc::types::eth::Log,
    sol,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AMMError;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    #[sol(rpc)]
    contract IErc20 {
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }
}

#[async_trait]
pub trait AutomatedMarketMaker {
    /// Returns the address of the AMM.
    fn address(&self) -> Address;

    /// Returns the event signatures that are relevant to the AMM state.
    fn sync_on_event_signatures(&self) -> Vec<B256>;

    /// Applies a pool log to the mirrored state, returning whether anything changed.
    async fn sync_from_log(&self, log: Log) -> Result<bool, AMMError>;

    /// Returns a vector of tokens in the AMM.
    fn tokens(&self) -> Vec<Address>;

    /// Calculates the price of `base_token` in terms of the other token, corrected for decimals.
    fn calculate_price(&self, base_token: Address) -> Result<f64, AMMError>;

    /// Locally simulates a swap and returns the amount of tokens received.
    async fn simulate_swap(&self, token_in: Address, amount_in: U256) -> Result<U256, AMMError>;

    /// Returns the token out of the AMM for a given `token_in`.
    fn get_token_out(&self, token_in: Address) -> Address;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Erc20Token {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

impl Erc20Token {
    pub fn new(address: Address, symbol: impl Into<String>, decimals: u8) -> Self {
        Erc20Token {
            address,
            symbol: symbol.into(),
            decimals,
        }
    }
}

impl std::fmt::Display for Erc20Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.symbol.is_empty() {
            write!(f, "{}", self.address)
        } else {
            f.write_str(&self.symbol)
        }
    }
}
