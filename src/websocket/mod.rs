//! WebSocket module for Binance depth streams

mod client;

pub use client::{
    ClientFactory, ClientHandlers, CloseEvent, DepthClient, StreamClient, StreamClientFactory,
    StreamEndpoint,
};
