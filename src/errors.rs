use alloy::{
    primitives::{Address, U256},
    transports::{RpcError, TransportErrorKind},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AMMError {
    #[error(transparent)]
    TransportError(#[from] RpcError<TransportErrorKind>),
    #[error(transparent)]
    ContractError(#[from] alloy::contract::Error),
    #[error(transparent)]
    EthABIError(#[from] alloy::sol_types::Error),
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
    #[error(transparent)]
    ArithmeticError(#[from] ArithmeticError),
    #[error(transparent)]
    SwapSimulationError(#[from] SwapSimulationError),
    #[error(transparent)]
    EventLogError(#[from] EventLogError),
    #[error(transparent)]
    TickBitmapError(#[from] TickBitmapError),
    #[error("Rejected update for block {block_number}, current update block is {update_block}")]
    StaleUpdate { block_number: u64, update_block: u64 },
    #[error("No pool state known prior to block {0}")]
    NoPoolStateAvailable(u64),
    #[error("State archiving is disabled for this pool")]
    ArchiveDisabled,
    #[error("Pool address verification failed, expected {expected} but computed {computed}")]
    AddressVerification { expected: Address, computed: Address },
    #[error("Token {token} is not held by pool {pool}")]
    UnknownToken { token: Address, pool: Address },
    #[error("Tick bitmap and tick data must be provided together")]
    IncompleteLiquidityMap,
    #[error("Tick {0} is marked initialized but has no liquidity data")]
    MissingTickData(i32),
    #[error("Pool {pool} is not associated with factory {factory}")]
    PoolNotAssociated { pool: Address, factory: Address },
    #[error("Could not build pool {pool}: {reason}")]
    PoolBuildError { pool: Address, reason: String },
    #[error("Chain state unavailable: {0}")]
    ChainStateUnavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwapSimulationError {
    #[error("Simulated execution reverted: {0}")]
    Revert(&'static str),
    #[error("Insufficient liquidity to swap for the requested amount, requested {requested} but pool provides {available}")]
    InsufficientAmountOut { requested: U256, available: U256 },
    #[error("Signed 256 bit amount overflow")]
    AmountOverflow,
    #[error(transparent)]
    ArithmeticError(#[from] ArithmeticError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArithmeticError {
    #[error("Overflow")]
    Overflow,
    #[error("Underflow")]
    Underflow,
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Multiply-divide result exceeds 256 bits")]
    MulDivOverflow,
    #[error("Tick {0} is outside of the valid tick range")]
    TickOutOfBounds(i32),
    #[error("Sqrt price {0} is outside of the valid price range")]
    SqrtPriceOutOfBounds(U256),
    #[error("Sqrt price is zero")]
    SqrtPriceIsZero,
    #[error("Liquidity is zero")]
    LiquidityIsZero,
    #[error("Value does not fit in 160 bits")]
    SafeCastToU160Overflow,
    #[error("Product of amount and price overflows")]
    ProductDivAmount,
    #[error("Denominator is less than or equal to the product")]
    DenominatorLessThanOrEqualToProduct,
    #[error("Sqrt price is less than or equal to the quotient")]
    SqrtPriceIsLessThanQuotient,
    #[error("Fee {0} exceeds the fee denominator")]
    FeeOutOfRange(u32),
    #[error("Bit scan on a zero value")]
    ZeroValue,
    #[error("Could not convert value to f64")]
    F64ConversionError,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TickBitmapError {
    #[error("Bitmap word {0} is not available")]
    WordUnavailable(i16),
    #[error("Tick {tick} is not a multiple of tick spacing {tick_spacing}")]
    TickMisaligned { tick: i32, tick_spacing: i32 },
}

#[derive(Error, Debug)]
pub enum EventLogError {
    #[error("Invalid event signature")]
    InvalidEventSignature,
    #[error("Log block number not found")]
    LogBlockNumberNotFound,
    #[error("Event log is missing topics")]
    MissingTopics,
    #[error(transparent)]
    ABIError(#[from] alloy::sol_types::Error),
}
