//! Data types returned by the backend client.
//!
//! `League` mirrors a row of the leagues table. `PriceSnapshot` is the
//! flattened view of the latest-snapshot edge function response.

pub mod league;
pub mod snapshot;

pub use league::League;
pub use snapshot::{CardPrice, CardPrices, MarketPrices, PriceSnapshot};
