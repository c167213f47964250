//! Error types for the depth stream

use thiserror::Error;

/// Depth stream errors
///
/// None of these reach the consumer directly: the store folds them into the
/// `status`/`error` fields of its snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketDataError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Invalid depth payload: {0}")]
    InvalidFrame(String),

    #[error("No async runtime available: {0}")]
    RuntimeUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl MarketDataError {
    /// Whether the error came from the socket itself rather than its payload
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MarketDataError::WebSocketConnection(_)
                | MarketDataError::WebSocketMessage(_)
                | MarketDataError::RuntimeUnavailable(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MarketDataError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MarketDataError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for MarketDataError {
    fn from(err: serde_json::Error) -> Self {
        MarketDataError::ParseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MarketDataError>;
