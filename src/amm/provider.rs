use std::{marker::PhantomData, sync::Arc};

use alloy::{
    network::{Ethereum, Network},
    primitives::{aliases::I24, Address, B256, U256},
    providers::Provider,
    rpc::types::eth::{BlockId, Filter, Log},
};
use async_trait::async_trait;
use futures::{stream::FuturesOrdered, StreamExt};
use tracing::instrument;

use super::{uniswap_v3::IUniswapV3Pool, Erc20Token, IErc20};
use crate::errors::{AMMError, ArithmeticError};

/// Pool and token reads the mirror needs from the chain. Every read names an explicit block so a
/// multi-call operation sees a single consistent chain state.
#[async_trait]
pub trait ChainStateProvider: Send + Sync {
    async fn block_number(&self) -> Result<u64, AMMError>;

    async fn chain_id(&self) -> Result<u64, AMMError>;

    /// Returns `(sqrt_price_x96, tick)`.
    async fn slot0(&self, pool: Address, block: u64) -> Result<(U256, i32), AMMError>;

    async fn liquidity(&self, pool: Address, block: u64) -> Result<u128, AMMError>;

    async fn tick_bitmap(
        &self,
        pool: Address,
        word_position: i16,
        block: u64,
    ) -> Result<U256, AMMError>;

    /// Returns `(liquidity_gross, liquidity_net)`.
    async fn ticks(&self, pool: Address, tick: i32, block: u64) -> Result<(u128, i128), AMMError>;

    async fn token0(&self, pool: Address, block: u64) -> Result<Address, AMMError>;

    async fn token1(&self, pool: Address, block: u64) -> Result<Address, AMMError>;

    async fn fee(&self, pool: Address, block: u64) -> Result<u32, AMMError>;

    async fn tick_spacing(&self, pool: Address, block: u64) -> Result<i32, AMMError>;

    async fn factory(&self, pool: Address, block: u64) -> Result<Address, AMMError>;

    async fn erc20(&self, token: Address, block: u64) -> Result<Erc20Token, AMMError>;

    /// Logs of any contract whose first topic is one of `event_signatures`, emitted within
    /// `from_block..=to_block`.
    async fn logs(
        &self,
        event_signatures: Vec<B256>,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, AMMError>;

    /// Reads one bitmap word and the liquidity of every tick it flags as initialized.
    ///
    /// Returns the raw word and `(tick, liquidity_gross, liquidity_net)` for each populated tick.
    async fn populated_ticks_in_word(
        &self,
        pool: Address,
        word_position: i16,
        tick_spacing: i32,
        block: u64,
    ) -> Result<(U256, Vec<(i32, u128, i128)>), AMMError> {
        let bitmap = self.tick_bitmap(pool, word_position, block).await?;

        let mut futures = FuturesOrdered::new();
        for bit_position in 0..256_usize {
            if bitmap.bit(bit_position) {
                let tick = (i32::from(word_position) * 256 + bit_position as i32) * tick_spacing;
                futures.push_back(async move {
                    self.ticks(pool, tick, block)
                        .await
                        .map(|(liquidity_gross, liquidity_net)| {
                            (tick, liquidity_gross, liquidity_net)
                        })
                });
            }
        }

        let mut ticks = Vec::with_capacity(futures.len());
        while let Some(result) = futures.next().await {
            ticks.push(result?);
        }

        Ok((bitmap, ticks))
    }
}

/// [`ChainStateProvider`] backed by an alloy provider.
#[derive(Debug)]
pub struct AlloyChainState<P, N = Ethereum> {
    provider: Arc<P>,
    _network: PhantomData<fn() -> N>,
}

impl<P, N> AlloyChainState<P, N> {
    pub fn new(provider: Arc<P>) -> Self {
        AlloyChainState {
            provider,
            _network: PhantomData,
        }
    }

    pub fn provider(&self) -> Arc<P> {
        self.provider.clone()
    }
}

impl<P, N> Clone for AlloyChainState<P, N> {
    fn clone(&self) -> Self {
        AlloyChainState::new(self.provider.clone())
    }
}

#[async_trait]
impl<P, N> ChainStateProvider for AlloyChainState<P, N>
where
    N: Network,
    P: Provider<N> + Send + Sync + 'static,
{
    async fn block_number(&self) -> Result<u64, AMMError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn chain_id(&self) -> Result<u64, AMMError> {
        Ok(self.provider.get_chain_id().await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn slot0(&self, pool: Address, block: u64) -> Result<(U256, i32), AMMError> {
        let v3_pool = IUniswapV3Pool::new(pool, self.provider.clone());
        let slot0 = v3_pool.slot0().call().block(BlockId::number(block)).await?;
        Ok((U256::from(slot0._0), slot0._1.as_i32()))
    }

    #[instrument(skip(self), level = "debug")]
    async fn liquidity(&self, pool: Address, block: u64) -> Result<u128, AMMError> {
        let v3_pool = IUniswapV3Pool::new(pool, self.provider.clone());
        Ok(v3_pool.liquidity().call().block(BlockId::number(block)).await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn tick_bitmap(
        &self,
        pool: Address,
        word_position: i16,
        block: u64,
    ) -> Result<U256, AMMError> {
        let v3_pool = IUniswapV3Pool::new(pool, self.provider.clone());
        Ok(v3_pool
            .tickBitmap(word_position)
            .call()
            .block(BlockId::number(block))
            .await?)
    }

    async fn ticks(&self, pool: Address, tick: i32, block: u64) -> Result<(u128, i128), AMMError> {
        let v3_pool = IUniswapV3Pool::new(pool, self.provider.clone());
        let tick = I24::try_from(tick).map_err(|_| ArithmeticError::TickOutOfBounds(tick))?;
        let info = v3_pool.ticks(tick).call().block(BlockId::number(block)).await?;
        Ok((info._0, info._1))
    }

    async fn token0(&self, pool: Address, block: u64) -> Result<Address, AMMError> {
        let v3_pool = IUniswapV3Pool::new(pool, self.provider.clone());
        Ok(v3_pool.token0().call().block(BlockId::number(block)).await?)
    }

    async fn token1(&self, pool: Address, block: u64) -> Result<Address, AMMError> {
        let v3_pool = IUniswapV3Pool::new(pool, self.provider.clone());
        Ok(v3_pool.token1().call().block(BlockId::number(block)).await?)
    }

    async fn fee(&self, pool: Address, block: u64) -> Result<u32, AMMError> {
        let v3_pool = IUniswapV3Pool::new(pool, self.provider.clone());
        let fee = v3_pool.fee().call().block(BlockId::number(block)).await?;
        Ok(fee.to::<u32>())
    }

    async fn tick_spacing(&self, pool: Address, block: u64) -> Result<i32, AMMError> {
        let v3_pool = IUniswapV3Pool::new(pool, self.provider.clone());
        let tick_spacing = v3_pool
            .tickSpacing()
            .call()
            .block(BlockId::number(block))
            .await?;
        Ok(tick_spacing.as_i32())
    }

    async fn factory(&self, pool: Address, block: u64) -> Result<Address, AMMError> {
        let v3_pool = IUniswapV3Pool::new(pool, self.provider.clone());
        Ok(v3_pool.factory().call().block(BlockId::number(block)).await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn erc20(&self, token: Address, block: u64) -> Result<Erc20Token, AMMError> {
        let erc20 = IErc20::new(token, self.provider.clone());
        let decimals = erc20.decimals().call().block(BlockId::number(block)).await?;
        // tokens predating the metadata extension may not expose a symbol
        let symbol = erc20
            .symbol()
            .call()
            .block(BlockId::number(block))
            .await
            .unwrap_or_default();
        Ok(Erc20Token::new(token, symbol, decimals))
    }

    #[instrument(skip(self), level = "debug")]
    async fn logs(
        &self,
        event_signatures: Vec<B256>,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, AMMError> {
        let filter = Filter::new()
            .event_signature(event_signatures)
            .from_block(from_block)
            .to_block(to_block);
        Ok(self.provider.get_logs(&filter).await?)
    }
}
