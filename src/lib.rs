pub mod alert;
pub mod api;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod exclusion;
pub mod filters;
pub mod housekeeping;
pub mod liquidity;
pub mod processor;
pub mod reporter;
pub mod scoring;
pub mod state;
pub mod stream;
pub mod types;

/// Polymarket data API base URL (public, no auth required)
pub const DATA_API_BASE: &str = "https://data-api.polymarket.com";

/// Gamma API base URL (profiles, market metadata, tags)
pub const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";

/// RTDS WebSocket URL (real-time data service)
pub const RTDS_WS_URL: &str = "wss://ws-live-data.polymarket.com";
