use std::{collections::HashMap, fmt, io::Read};

use alloy::{
    primitives::{Address, TxHash},
    rpc::types::eth::Log,
    sol_types::SolEvent,
};
use futures::{stream::FuturesOrdered, StreamExt};
use serde::{
    de::{Error as _, MapAccess, Visitor},
    Deserialize, Deserializer, Serialize,
};
use tracing::{debug, info};

use super::{
    state::{LiquidityChange, TickBitmap, TickData, UniswapV3PoolExternalUpdate},
    IUniswapV3Pool,
};
use crate::{amm::provider::ChainStateProvider, errors::AMMError};

/// Blocks covered by one `eth_getLogs` request when catching a snapshot up.
pub const SNAPSHOT_LOG_SPAN: u64 = 1000;

const SNAPSHOT_BLOCK_KEY: &str = "snapshot_block";

/// Complete liquidity map of one pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLiquidityMap {
    #[serde(default)]
    pub tick_bitmap: TickBitmap,
    #[serde(default)]
    pub tick_data: TickData,
}

/// A `Mint` or `Burn` seen after the snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidityEvent {
    pub block_number: u64,
    pub tx_index: u64,
    pub log_index: u64,
    pub tx: Option<TxHash>,
    pub liquidity: i128,
    pub tick_lower: i32,
    pub tick_upper: i32,
}

impl LiquidityEvent {
    fn into_update(self) -> UniswapV3PoolExternalUpdate {
        UniswapV3PoolExternalUpdate {
            block_number: self.block_number,
            liquidity_change: Some(LiquidityChange::new(
                self.liquidity,
                self.tick_lower,
                self.tick_upper,
            )),
            tx: self.tx,
            ..Default::default()
        }
    }
}

/// Liquidity maps of many pools as of `newest_block`, plus the liquidity events observed since
/// then that have not been handed to a pool yet.
///
/// The JSON form is an object with a `snapshot_block` number and one entry per pool address:
///
/// ```json
/// {
///   "snapshot_block": 17000000,
///   "0x8ad599c3A0ff1De082011EFDDc58f1908eb6e6D8": {
///     "tick_bitmap": { "-1": { "bitmap": "0x1", "block": 16999990 } },
///     "tick_data": { "-15360": { "liquidityNet": 10, "liquidityGross": 10 } }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LiquiditySnapshot {
    newest_block: u64,
    pools: HashMap<Address, PoolLiquidityMap>,
    events: HashMap<Address, Vec<LiquidityEvent>>,
}

impl LiquiditySnapshot {
    pub fn new(newest_block: u64) -> Self {
        LiquiditySnapshot {
            newest_block,
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, AMMError> {
        let snapshot: LiquiditySnapshot = serde_json::from_str(json)?;
        snapshot.log_loaded();
        Ok(snapshot)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, AMMError> {
        let snapshot: LiquiditySnapshot = serde_json::from_reader(reader)?;
        snapshot.log_loaded();
        Ok(snapshot)
    }

    fn log_loaded(&self) {
        info!(
            pools = self.pools.len(),
            block = self.newest_block,
            "loaded liquidity snapshot"
        );
    }

    /// The last block whose liquidity events are reflected by the snapshot.
    pub fn newest_block(&self) -> u64 {
        self.newest_block
    }

    pub fn insert_pool(&mut self, pool: Address, liquidity_map: PoolLiquidityMap) {
        self.pools.insert(pool, liquidity_map);
    }

    pub fn tick_bitmap(&self, pool: Address) -> Option<TickBitmap> {
        self.pools.get(&pool).map(|map| map.tick_bitmap.clone())
    }

    pub fn tick_data(&self, pool: Address) -> Option<TickData> {
        self.pools.get(&pool).map(|map| map.tick_data.clone())
    }

    pub fn add_event(&mut self, pool: Address, event: LiquidityEvent) {
        self.events.entry(pool).or_default().push(event);
    }

    pub fn has_events(&self, pool: Address) -> bool {
        self.events.get(&pool).is_some_and(|events| !events.is_empty())
    }

    /// Removes the buffered events of `pool` and returns them as updates in chain order.
    pub fn pending_updates(&mut self, pool: Address) -> Vec<UniswapV3PoolExternalUpdate> {
        let mut events = self.events.remove(&pool).unwrap_or_default();
        events.sort_by_key(|event| (event.block_number, event.tx_index, event.log_index));
        events.into_iter().map(LiquidityEvent::into_update).collect()
    }

    /// Buffers the `Mint` and `Burn` logs among `logs`. Other logs and events that do not move
    /// liquidity are skipped. Returns the number of buffered events.
    pub fn ingest_logs(&mut self, logs: &[Log]) -> Result<usize, AMMError> {
        let mut ingested = 0;

        for log in logs {
            let is_liquidity_event = log.topics().first().is_some_and(|topic| {
                *topic == IUniswapV3Pool::Mint::SIGNATURE_HASH
                    || *topic == IUniswapV3Pool::Burn::SIGNATURE_HASH
            });
            if !is_liquidity_event {
                continue;
            }

            let update = UniswapV3PoolExternalUpdate::from_log(log)?;
            let Some(change) = update.liquidity_change.filter(|change| change.liquidity != 0)
            else {
                continue;
            };

            self.add_event(
                log.address(),
                LiquidityEvent {
                    block_number: update.block_number,
                    tx_index: log.transaction_index.unwrap_or_default(),
                    log_index: log.log_index.unwrap_or_default(),
                    tx: update.tx,
                    liquidity: change.liquidity,
                    tick_lower: change.tick_lower,
                    tick_upper: change.tick_upper,
                },
            );
            ingested += 1;
        }

        Ok(ingested)
    }

    /// Fetches the liquidity events of every pool up to and including `last_block`, `span`
    /// blocks per request.
    pub async fn update_to<P: ChainStateProvider + ?Sized>(
        &mut self,
        last_block: u64,
        span: u64,
        provider: &P,
    ) -> Result<(), AMMError> {
        if last_block <= self.newest_block {
            return Ok(());
        }

        info!(
            from_block = self.newest_block + 1,
            to_block = last_block,
            "updating liquidity snapshot"
        );

        let span = span.max(1);
        let mut futures = FuturesOrdered::new();
        let mut from_block = self.newest_block + 1;
        while from_block <= last_block {
            let to_block = from_block.saturating_add(span - 1).min(last_block);
            futures.push_back(async move {
                provider
                    .logs(
                        vec![
                            IUniswapV3Pool::Mint::SIGNATURE_HASH,
                            IUniswapV3Pool::Burn::SIGNATURE_HASH,
                        ],
                        from_block,
                        to_block,
                    )
                    .await
                    .map(|logs| (from_block, to_block, logs))
            });
            from_block = to_block + 1;
        }

        let mut ingested = 0;
        while let Some(result) = futures.next().await {
            let (from_block, to_block, logs) = result?;
            ingested += self.ingest_logs(&logs)?;
            debug!(from_block, to_block, logs = logs.len(), "fetched liquidity events");
        }

        self.newest_block = last_block;
        info!(block = last_block, events = ingested, "updated liquidity snapshot");

        Ok(())
    }
}

impl<'de> Deserialize<'de> for LiquiditySnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SnapshotVisitor;

        impl<'de> Visitor<'de> for SnapshotVisitor {
            type Value = LiquiditySnapshot;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a liquidity snapshot keyed by pool address")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut newest_block = None;
                let mut pools = HashMap::new();

                while let Some(key) = map.next_key::<String>()? {
                    if key == SNAPSHOT_BLOCK_KEY {
                        newest_block = Some(map.next_value::<u64>()?);
                    } else {
                        let pool = key.parse::<Address>().map_err(|e| {
                            A::Error::custom(format!("invalid pool address {key}: {e}"))
                        })?;
                        pools.insert(pool, map.next_value::<PoolLiquidityMap>()?);
                    }
                }

                Ok(LiquiditySnapshot {
                    newest_block: newest_block
                        .ok_or_else(|| A::Error::missing_field(SNAPSHOT_BLOCK_KEY))?,
                    pools,
                    events: HashMap::new(),
                })
            }
        }

        deserializer.deserialize_map(SnapshotVisitor)
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering;

    use alloy::primitives::{address, aliases::I24, LogData, U256};

    use super::*;
    use crate::amm::{
        provider::mock::MockChainState,
        uniswap_v3::state::{BitmapWord, LiquidityAtTick},
    };

    const POOL: Address = address!("8ad599c3A0ff1De082011EFDDc58f1908eb6e6D8");
    const OTHER_POOL: Address = address!("88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640");

    const SNAPSHOT: &str = r#"{
        "snapshot_block": 100,
        "0x8ad599c3A0ff1De082011EFDDc58f1908eb6e6D8": {
            "tick_bitmap": {
                "-1": { "bitmap": "0x8000000000000000000000000000000000000000000000000000000000000000", "block": 90 },
                "0": { "bitmap": "0x2" }
            },
            "tick_data": {
                "-60": { "liquidityNet": 500000, "liquidityGross": 500000, "block": 90 },
                "60": { "liquidityNet": -500000, "liquidityGross": 500000 }
            }
        }
    }"#;

    fn liquidity_log(
        pool: Address,
        block_number: u64,
        tx_index: u64,
        log_index: u64,
        data: LogData,
    ) -> Log {
        Log {
            inner: alloy::primitives::Log { address: pool, data },
            block_number: Some(block_number),
            transaction_index: Some(tx_index),
            log_index: Some(log_index),
            ..Default::default()
        }
    }

    fn mint(amount: u128) -> LogData {
        IUniswapV3Pool::Mint {
            sender: Address::ZERO,
            owner: Address::ZERO,
            tickLower: I24::try_from(-60).unwrap(),
            tickUpper: I24::try_from(60).unwrap(),
            amount,
            amount0: U256::ZERO,
            amount1: U256::ZERO,
        }
        .encode_log_data()
    }

    fn burn(amount: u128) -> LogData {
        IUniswapV3Pool::Burn {
            owner: Address::ZERO,
            tickLower: I24::try_from(-60).unwrap(),
            tickUpper: I24::try_from(60).unwrap(),
            amount,
            amount0: U256::ZERO,
            amount1: U256::ZERO,
        }
        .encode_log_data()
    }

    fn event(block_number: u64, tx_index: u64, log_index: u64, liquidity: i128) -> LiquidityEvent {
        LiquidityEvent {
            block_number,
            tx_index,
            log_index,
            tx: None,
            liquidity,
            tick_lower: -60,
            tick_upper: 60,
        }
    }

    #[test]
    fn test_load_snapshot() {
        let snapshot = LiquiditySnapshot::from_json(SNAPSHOT).unwrap();

        assert_eq!(snapshot.newest_block(), 100);

        let tick_bitmap = snapshot.tick_bitmap(POOL).unwrap();
        assert_eq!(tick_bitmap[&-1], BitmapWord::new(U256::from(1) << 255, None));
        assert_eq!(tick_bitmap[&-1].block, Some(90));
        assert_eq!(tick_bitmap[&0].bitmap, U256::from(2));

        let tick_data = snapshot.tick_data(POOL).unwrap();
        assert_eq!(tick_data[&-60], LiquidityAtTick::new(500_000, 500_000, None));
        assert_eq!(tick_data[&60].liquidity_net, -500_000);

        assert!(snapshot.tick_bitmap(OTHER_POOL).is_none());
        assert!(snapshot.tick_data(OTHER_POOL).is_none());

        let from_reader = LiquiditySnapshot::from_reader(SNAPSHOT.as_bytes()).unwrap();
        assert_eq!(from_reader.tick_data(POOL), snapshot.tick_data(POOL));
    }

    #[test]
    fn test_load_rejects_malformed_snapshots() {
        assert!(matches!(
            LiquiditySnapshot::from_json(r#"{"0x8ad599c3A0ff1De082011EFDDc58f1908eb6e6D8": {}}"#),
            Err(AMMError::SerdeJsonError(_))
        ));
        assert!(matches!(
            LiquiditySnapshot::from_json(r#"{"snapshot_block": 1, "not-a-pool": {}}"#),
            Err(AMMError::SerdeJsonError(_))
        ));

        let empty = LiquiditySnapshot::from_json(r#"{"snapshot_block": 7}"#).unwrap();
        assert_eq!(empty.newest_block(), 7);
        assert!(empty.tick_bitmap(POOL).is_none());
    }

    #[test]
    fn test_pending_updates_are_ordered_and_drained() {
        let mut snapshot = LiquiditySnapshot::new(100);
        snapshot.add_event(POOL, event(102, 0, 3, -5));
        snapshot.add_event(POOL, event(101, 4, 9, 7));
        snapshot.add_event(POOL, event(102, 0, 1, 11));
        snapshot.add_event(OTHER_POOL, event(101, 0, 0, 1));

        assert!(snapshot.has_events(POOL));
        let updates = snapshot.pending_updates(POOL);

        let changes: Vec<_> = updates
            .iter()
            .map(|update| {
                (
                    update.block_number,
                    update.liquidity_change.map(|change| change.liquidity),
                )
            })
            .collect();
        assert_eq!(
            changes,
            vec![(101, Some(7)), (102, Some(11)), (102, Some(-5))]
        );
        assert!(updates.iter().all(|update| update.tick.is_none()));

        assert!(!snapshot.has_events(POOL));
        assert!(snapshot.pending_updates(POOL).is_empty());
        assert!(snapshot.has_events(OTHER_POOL));
    }

    #[test]
    fn test_ingest_logs() {
        let mut snapshot = LiquiditySnapshot::new(100);

        let initialize = IUniswapV3Pool::Initialize {
            sqrtPriceX96: alloy::primitives::U160::from(1_u64),
            tick: I24::try_from(0).unwrap(),
        }
        .encode_log_data();

        let logs = vec![
            liquidity_log(POOL, 101, 0, 0, mint(1_000)),
            liquidity_log(POOL, 101, 0, 1, burn(0)),
            liquidity_log(POOL, 102, 1, 0, initialize),
            liquidity_log(OTHER_POOL, 103, 0, 0, burn(400)),
        ];

        assert_eq!(snapshot.ingest_logs(&logs).unwrap(), 2);

        assert_eq!(
            snapshot.pending_updates(POOL),
            vec![event(101, 0, 0, 1_000).into_update()]
        );
        assert_eq!(
            snapshot.pending_updates(OTHER_POOL)[0].liquidity_change,
            Some(LiquidityChange::new(-400, -60, 60))
        );
    }

    #[tokio::test]
    async fn test_update_to() {
        let chain = MockChainState::new(1, 300);
        chain.add_log(liquidity_log(POOL, 100, 0, 0, mint(1)));
        chain.add_log(liquidity_log(POOL, 150, 2, 0, burn(20)));
        chain.add_log(liquidity_log(POOL, 101, 0, 0, mint(30)));
        chain.add_log(liquidity_log(POOL, 250, 0, 0, mint(40)));

        let mut snapshot = LiquiditySnapshot::new(100);
        snapshot.update_to(200, 30, &chain).await.unwrap();

        // 101..=130, 131..=160, 161..=190, 191..=200
        assert_eq!(chain.log_calls.load(Ordering::SeqCst), 4);
        assert_eq!(snapshot.newest_block(), 200);

        let changes: Vec<_> = snapshot
            .pending_updates(POOL)
            .iter()
            .filter_map(|update| update.liquidity_change.map(|change| change.liquidity))
            .collect();
        assert_eq!(changes, vec![30, -20]);

        // already caught up
        snapshot.update_to(150, 30, &chain).await.unwrap();
        assert_eq!(chain.log_calls.load(Ordering::SeqCst), 4);
        assert_eq!(snapshot.newest_block(), 200);
    }
}
