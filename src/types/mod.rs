//! Shared data types
//!
//! Swap records, trading pairs, the unified status enum with its transition
//! tables, and amount normalisation helpers.

pub mod pair;
pub mod status;
pub mod swap;
pub mod units;

pub use pair::Pair;
pub use status::{SwapKind, SwapStatus};
pub use swap::{ChainSwap, ChannelCreation, ChannelCreationStatus, ReverseSwap, Swap};
