use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use tracing::debug;

use super::{
    bit_math,
    state::{BitmapWord, LiquidityAtTick, PoolState, TickBitmap},
    tick_math::{MAX_TICK, MIN_TICK},
};
use crate::{
    amm::{consts::U256_1, provider::ChainStateProvider},
    errors::{AMMError, TickBitmapError},
};

/// Read access to bitmap words. `None` means the word is not known, which is distinct from a
/// known word with no bits set.
pub trait BitmapView {
    fn word(&self, word_position: i16) -> Option<U256>;
}

impl BitmapView for TickBitmap {
    fn word(&self, word_position: i16) -> Option<U256> {
        self.get(&word_position).map(|word| word.bitmap)
    }
}

/// A bitmap word together with the populated ticks inside it, as read at a single block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordSnapshot {
    pub word_position: i16,
    pub word: BitmapWord,
    pub ticks: Vec<(i32, LiquidityAtTick)>,
}

impl WordSnapshot {
    /// Adds the word and its ticks to `state`, keeping anything `state` already knows.
    pub fn merge_into(&self, state: &mut PoolState) {
        state
            .tick_bitmap_mut()
            .entry(self.word_position)
            .or_insert(self.word);
        let tick_data = state.tick_data_mut();
        for (tick, info) in &self.ticks {
            tick_data.entry(*tick).or_insert(*info);
        }
    }
}

/// Source of bitmap words for sparse liquidity maps.
#[async_trait]
pub trait WordSource: Send + Sync {
    async fn fetch_word(&self, word_position: i16, block: u64) -> Result<WordSnapshot, AMMError>;
}

/// Fetches words for a single pool through a [`ChainStateProvider`].
pub struct ChainWordSource<'a, P: ?Sized> {
    pub provider: &'a P,
    pub pool: Address,
    pub tick_spacing: i32,
}

#[async_trait]
impl<P> WordSource for ChainWordSource<'_, P>
where
    P: ChainStateProvider + ?Sized,
{
    async fn fetch_word(&self, word_position: i16, block: u64) -> Result<WordSnapshot, AMMError> {
        let (bitmap, ticks) = self
            .provider
            .populated_ticks_in_word(self.pool, word_position, self.tick_spacing, block)
            .await?;

        debug!(
            pool = ?self.pool,
            word_position,
            block,
            populated_ticks = ticks.len(),
            "fetched tick bitmap word"
        );

        Ok(WordSnapshot {
            word_position,
            word: BitmapWord::new(bitmap, Some(block)),
            ticks: ticks
                .into_iter()
                .map(|(tick, liquidity_gross, liquidity_net)| {
                    (
                        tick,
                        LiquidityAtTick::new(liquidity_net, liquidity_gross, Some(block)),
                    )
                })
                .collect(),
        })
    }
}

/// Computes the position in the mapping where the initialized bit for a compressed tick lives.
pub fn position(compressed: i32) -> (i16, u8) {
    ((compressed >> 8) as i16, (compressed & 0xff) as u8)
}

/// Tick divided by spacing, rounded towards negative infinity.
pub fn compress(tick: i32, tick_spacing: i32) -> i32 {
    tick.div_euclid(tick_spacing)
}

/// Word and bit position of a tick in the bitmap of a pool with the given spacing.
pub fn tick_word_and_bit_position(tick: i32, tick_spacing: i32) -> (i16, u8) {
    position(compress(tick, tick_spacing))
}

/// Range of word positions a pool with the given spacing can ever populate.
pub fn word_range(tick_spacing: i32) -> std::ops::RangeInclusive<i16> {
    let (min_word, _) = tick_word_and_bit_position(MIN_TICK, tick_spacing);
    let (max_word, _) = tick_word_and_bit_position(MAX_TICK, tick_spacing);
    min_word..=max_word
}

/// Flips the initialized state of `tick` and stamps the owning word with `block`.
pub fn flip_tick(
    tick_bitmap: &mut TickBitmap,
    tick: i32,
    tick_spacing: i32,
    block: Option<u64>,
) -> Result<(), TickBitmapError> {
    if tick % tick_spacing != 0 {
        return Err(TickBitmapError::TickMisaligned { tick, tick_spacing });
    }

    let (word_position, bit_position) = position(tick / tick_spacing);
    let word = tick_bitmap
        .get_mut(&word_position)
        .ok_or(TickBitmapError::WordUnavailable(word_position))?;

    word.bitmap ^= U256_1 << bit_position;
    word.block = block;

    debug!(tick, word_position, bit_position, ?block, "flipped tick");
    Ok(())
}

/// Returns the next initialized tick contained in the same word as `tick`, either to the left
/// (less than or equal to) or right (greater than) of it. When no initialized tick is found, the
/// word boundary is returned with `false`.
pub fn next_initialized_tick_within_one_word<B: BitmapView + ?Sized>(
    tick_bitmap: &B,
    tick: i32,
    tick_spacing: i32,
    lte: bool,
) -> Result<(i32, bool), AMMError> {
    let compressed = compress(tick, tick_spacing);

    if lte {
        let (word_position, bit_position) = position(compressed);
        let bitmap = tick_bitmap
            .word(word_position)
            .ok_or(TickBitmapError::WordUnavailable(word_position))?;

        // all the 1s at or to the right of the current bit_position
        let mask = (U256_1 << bit_position) - U256_1 + (U256_1 << bit_position);
        let masked = bitmap & mask;

        let initialized = !masked.is_zero();
        let next = if initialized {
            (compressed
                - (bit_position - bit_math::most_significant_bit(masked)?) as i32)
                * tick_spacing
        } else {
            (compressed - bit_position as i32) * tick_spacing
        };

        Ok((next, initialized))
    } else {
        // start from the word of the next tick, since the current tick state doesn't matter
        let (word_position, bit_position) = position(compressed + 1);
        let bitmap = tick_bitmap
            .word(word_position)
            .ok_or(TickBitmapError::WordUnavailable(word_position))?;

        // all the 1s at or to the left of the bit_position
        let mask = !((U256_1 << bit_position) - U256_1);
        let masked = bitmap & mask;

        let initialized = !masked.is_zero();
        let next = if initialized {
            (compressed
                + 1
                + (bit_math::least_significant_bit(masked)? - bit_position) as i32)
                * tick_spacing
        } else {
            (compressed + 1 + (u8::MAX - bit_position) as i32) * tick_spacing
        };

        Ok((next, initialized))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn bitmap_with_ticks(ticks: &[i32], tick_spacing: i32) -> TickBitmap {
        let mut tick_bitmap = TickBitmap::new();
        for tick in ticks {
            let (word_position, _) = tick_word_and_bit_position(*tick, tick_spacing);
            tick_bitmap.entry(word_position).or_default();
            flip_tick(&mut tick_bitmap, *tick, tick_spacing, Some(1)).unwrap();
        }
        tick_bitmap
    }

    fn is_initialized(tick_bitmap: &TickBitmap, tick: i32) -> bool {
        let (next, initialized) =
            next_initialized_tick_within_one_word(tick_bitmap, tick, 1, true).unwrap();
        next == tick && initialized
    }

    #[test]
    fn test_position() {
        assert_eq!(position(0), (0, 0));
        assert_eq!(position(255), (0, 255));
        assert_eq!(position(256), (1, 0));
        assert_eq!(position(-1), (-1, 255));
        assert_eq!(position(-256), (-1, 0));
        assert_eq!(position(-257), (-2, 255));
        assert_eq!(tick_word_and_bit_position(-60, 60), (-1, 255));
        assert_eq!(tick_word_and_bit_position(-61, 60), (-1, 254));
        assert_eq!(tick_word_and_bit_position(15360, 60), (1, 0));
    }

    #[test]
    fn test_flip_tick() {
        let mut tick_bitmap = bitmap_with_ticks(&[-230], 1);
        assert!(is_initialized(&tick_bitmap, -230));
        assert!(!is_initialized(&tick_bitmap, -231));
        assert!(!is_initialized(&tick_bitmap, -229));

        flip_tick(&mut tick_bitmap, -230, 1, Some(2)).unwrap();
        assert!(!is_initialized(&tick_bitmap, -230));
        assert_eq!(tick_bitmap[&-1].block, Some(2));
    }

    #[test]
    fn test_flip_tick_errors() {
        let mut tick_bitmap = TickBitmap::new();
        assert_eq!(
            flip_tick(&mut tick_bitmap, 61, 60, None),
            Err(TickBitmapError::TickMisaligned {
                tick: 61,
                tick_spacing: 60
            })
        );
        assert_eq!(
            flip_tick(&mut tick_bitmap, 60, 60, None),
            Err(TickBitmapError::WordUnavailable(0))
        );
    }

    #[test]
    fn test_missing_word_is_distinguishable() {
        let tick_bitmap = TickBitmap::new();
        let result = next_initialized_tick_within_one_word(&tick_bitmap, 0, 60, true);
        assert!(matches!(
            result,
            Err(AMMError::TickBitmapError(TickBitmapError::WordUnavailable(0)))
        ));
    }

    #[test]
    fn test_next_initialized_tick_within_one_word_gt() {
        let ticks = [-200, -55, -4, 70, 78, 84, 139, 240, 535];
        let mut tick_bitmap = bitmap_with_ticks(&ticks, 1);
        for word_position in -2..=3 {
            tick_bitmap.entry(word_position).or_default();
        }

        let next = |tick| next_initialized_tick_within_one_word(&tick_bitmap, tick, 1, false).unwrap();
        assert_eq!(next(78), (84, true));
        assert_eq!(next(-55), (-4, true));
        assert_eq!(next(77), (78, true));
        assert_eq!(next(-56), (-55, true));
        assert_eq!(next(255), (511, false));
        assert_eq!(next(-257), (-200, true));
        assert_eq!(next(508), (511, false));
        assert_eq!(next(511), (535, true));
        assert_eq!(next(329), (511, false));
    }

    #[test]
    fn test_next_initialized_tick_within_one_word_lte() {
        let ticks = [-200, -55, -4, 70, 78, 84, 139, 240, 535];
        let mut tick_bitmap = bitmap_with_ticks(&ticks, 1);
        for word_position in -2..=3 {
            tick_bitmap.entry(word_position).or_default();
        }

        let next = |tick| next_initialized_tick_within_one_word(&tick_bitmap, tick, 1, true).unwrap();
        assert_eq!(next(78), (78, true));
        assert_eq!(next(79), (78, true));
        assert_eq!(next(258), (256, false));
        assert_eq!(next(256), (256, false));
        assert_eq!(next(72), (70, true));
        assert_eq!(next(-257), (-512, false));
        assert_eq!(next(1023), (768, false));
        assert_eq!(next(900), (768, false));
    }

    #[test]
    fn test_next_initialized_tick_with_spacing() {
        let tick_bitmap = bitmap_with_ticks(&[-60, 60], 60);
        assert_eq!(
            next_initialized_tick_within_one_word(&tick_bitmap, 0, 60, true).unwrap(),
            (0, false)
        );
        assert_eq!(
            next_initialized_tick_within_one_word(&tick_bitmap, 0, 60, false).unwrap(),
            (60, true)
        );
        // a tick between spacings rounds towards negative infinity
        assert_eq!(
            next_initialized_tick_within_one_word(&tick_bitmap, -1, 60, true).unwrap(),
            (-60, true)
        );
    }

    #[test]
    fn test_word_range() {
        assert_eq!(word_range(1), -3466..=3465);
        assert_eq!(word_range(60), -58..=57);
    }
}
