pub mod amm;
pub mod errors;
