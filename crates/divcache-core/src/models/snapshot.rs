use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CardPrice {
    pub chaos_value: f64,
    pub divine_value: f64,
}

/// Card name to price, ordered by name.
pub type CardPrices = BTreeMap<String, CardPrice>;

/// Prices observed on one market (currency exchange or stash listings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct MarketPrices {
    pub chaos_to_divine_ratio: f64,
    pub card_prices: CardPrices,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct PriceSnapshot {
    /// When the prices were fetched upstream (RFC 3339).
    pub timestamp: String,
    pub stacked_deck_chaos_cost: f64,
    pub exchange: MarketPrices,
    pub stash: MarketPrices,
}
