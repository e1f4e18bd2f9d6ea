use serde::{Deserialize, Serialize};

/// One row of `poe_leagues`. Timestamps are kept as the server sent them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct League {
    pub id: String,
    pub game: String,
    #[serde(default)]
    pub league_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub start_at: Option<String>,
    #[serde(default)]
    pub end_at: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}
