//! Depth Ladder - live top-of-book library
//!
//! This crate connects to a Binance partial depth stream, reconciles each
//! frame into a bounded, sorted ladder and exposes it through a reactive
//! store: a snapshot readable at any time plus change listeners.
//!
//! ```no_run
//! use depth_ladder::{OrderbookStore, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = OrderbookStore::new(StoreConfig::default());
//!     let reader = store.clone();
//!     let _subscription = store.subscribe(move || {
//!         let snapshot = reader.get_snapshot();
//!         println!("{:?} {} bids", snapshot.status, snapshot.bids.len());
//!     });
//!     store.connect("BTCUSDT");
//!     tokio::signal::ctrl_c().await.ok();
//!     store.disconnect();
//! }
//! ```

pub mod config;
pub mod error;
pub mod orderbook;
pub mod parser;
pub mod store;
pub mod websocket;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{MarketDataError, Result};
pub use orderbook::{BookMetrics, Level, Snapshot, Status};
pub use parser::{DepthFrame, RawLevel};
pub use store::{OrderbookStore, StoreConfig, Subscription};
pub use websocket::{ClientFactory, DepthClient, StreamClient, StreamEndpoint};
