//! WebSocket client for Binance partial depth streams
//!
//! Owns one socket. Inbound payloads are validated here and surfaced through
//! [`ClientHandlers`]; the client itself never retries.

use std::fmt;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message},
};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_WS_ENDPOINT;
use crate::error::MarketDataError;
use crate::parser::DepthFrame;

/// Where and what to subscribe to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    pub base_url: String,
    pub levels: usize,
    pub interval_ms: u64,
}

impl Default for StreamEndpoint {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WS_ENDPOINT.to_string(),
            levels: 10,
            interval_ms: 100,
        }
    }
}

impl StreamEndpoint {
    /// Stream name, e.g. `btcusdt@depth10@100ms`
    pub fn stream_name(&self, symbol: &str) -> String {
        format!(
            "{}@depth{}@{}ms",
            symbol.to_lowercase(),
            self.levels,
            self.interval_ms
        )
    }

    /// Full socket URL for `symbol`
    pub fn url(&self, symbol: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.stream_name(symbol)
        )
    }
}

/// Close notification from the remote end
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseEvent {
    /// Close code, absent when the stream ended without a close frame
    pub code: Option<u16>,
    pub reason: String,
}

impl From<Option<CloseFrame<'_>>> for CloseEvent {
    fn from(frame: Option<CloseFrame<'_>>) -> Self {
        match frame {
            Some(frame) => Self {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.into_owned(),
            },
            None => Self {
                code: None,
                reason: String::new(),
            },
        }
    }
}

pub type MessageHandler = Box<dyn Fn(DepthFrame) + Send + Sync>;
pub type ErrorHandler = Box<dyn Fn(MarketDataError) + Send + Sync>;
pub type CloseHandler = Box<dyn Fn(CloseEvent) + Send + Sync>;

/// Callbacks a client reports through
pub struct ClientHandlers {
    pub on_message: MessageHandler,
    pub on_error: ErrorHandler,
    pub on_close: CloseHandler,
}

impl ClientHandlers {
    pub fn new(
        on_message: impl Fn(DepthFrame) + Send + Sync + 'static,
        on_error: impl Fn(MarketDataError) + Send + Sync + 'static,
        on_close: impl Fn(CloseEvent) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_message: Box::new(on_message),
            on_error: Box::new(on_error),
            on_close: Box::new(on_close),
        }
    }

    /// Route one inbound payload to exactly one of `on_message` / `on_error`
    pub fn dispatch(&self, raw: &str) {
        match DepthFrame::parse(raw) {
            Ok(frame) => (self.on_message)(frame),
            Err(e) => {
                debug!(error = %e, len = raw.len(), "Rejected depth payload");
                (self.on_error)(e)
            }
        }
    }
}

impl fmt::Debug for ClientHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandlers").finish_non_exhaustive()
    }
}

/// A connection the store can start and stop
pub trait DepthClient: Send + Sync {
    /// Open the socket; no-op when already open
    fn connect(&self);

    /// Release the socket; no-op after the first call
    fn close(&self);
}

/// Builds one client per connection attempt
pub trait ClientFactory: Send + Sync {
    fn create(&self, symbol: &str, handlers: ClientHandlers) -> Box<dyn DepthClient>;
}

impl<F> ClientFactory for F
where
    F: Fn(&str, ClientHandlers) -> Box<dyn DepthClient> + Send + Sync,
{
    fn create(&self, symbol: &str, handlers: ClientHandlers) -> Box<dyn DepthClient> {
        self(symbol, handlers)
    }
}

/// Default factory producing [`StreamClient`]s
#[derive(Debug, Clone, Default)]
pub struct StreamClientFactory {
    endpoint: StreamEndpoint,
}

impl StreamClientFactory {
    pub fn new(endpoint: StreamEndpoint) -> Self {
        Self { endpoint }
    }
}

impl ClientFactory for StreamClientFactory {
    fn create(&self, symbol: &str, handlers: ClientHandlers) -> Box<dyn DepthClient> {
        Box::new(StreamClient::new(self.endpoint.url(symbol), handlers))
    }
}

enum SocketState {
    Idle,
    Running(oneshot::Sender<()>),
    Closed,
}

/// WebSocket client for a single depth stream
pub struct StreamClient {
    url: String,
    handlers: Arc<ClientHandlers>,
    state: Mutex<SocketState>,
}

impl StreamClient {
    /// Create a new WebSocket client
    pub fn new(url: impl Into<String>, handlers: ClientHandlers) -> Self {
        Self {
            url: url.into(),
            handlers: Arc::new(handlers),
            state: Mutex::new(SocketState::Idle),
        }
    }

    /// Check if a socket task has been started and not closed
    pub fn is_connected(&self) -> bool {
        matches!(*self.state.lock(), SocketState::Running(_))
    }
}

impl DepthClient for StreamClient {
    fn connect(&self) {
        let runtime = {
            let mut state = self.state.lock();
            if !matches!(*state, SocketState::Idle) {
                return;
            }

            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let (tx, rx) = oneshot::channel();
                    *state = SocketState::Running(tx);
                    Some((runtime, rx))
                }
                Err(e) => {
                    *state = SocketState::Closed;
                    drop(state);
                    (self.handlers.on_error)(MarketDataError::RuntimeUnavailable(e.to_string()));
                    None
                }
            }
        };

        if let Some((runtime, shutdown)) = runtime {
            runtime.spawn(run_socket(self.url.clone(), self.handlers.clone(), shutdown));
        }
    }

    fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), SocketState::Closed);
        if let SocketState::Running(shutdown) = previous {
            debug!(url = %self.url, "Closing depth stream");
            // The task may already have finished on its own
            let _ = shutdown.send(());
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Socket task: connect, then pump messages until closed from either side
async fn run_socket(url: String, handlers: Arc<ClientHandlers>, mut shutdown: oneshot::Receiver<()>) {
    info!(url = %url, "Connecting to Binance WebSocket");

    let connected = tokio::select! {
        _ = &mut shutdown => {
            debug!(url = %url, "Closed before handshake completed");
            return;
        }
        result = connect_async(url.as_str()) => result,
    };

    let mut stream = match connected {
        Ok((stream, response)) => {
            info!(status = ?response.status(), "WebSocket connected");
            stream
        }
        Err(e) => {
            warn!(url = %url, error = %e, "WebSocket connection failed");
            (handlers.on_error)(MarketDataError::WebSocketConnection(format!(
                "Failed to connect: {}",
                e
            )));
            return;
        }
    };

    loop {
        let next = tokio::select! {
            _ = &mut shutdown => {
                let _ = stream
                    .close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client closed".into(),
                    }))
                    .await;
                debug!(url = %url, "WebSocket closed by client");
                return;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => handlers.dispatch(&text),
            Some(Ok(Message::Binary(data))) => handlers.dispatch(&String::from_utf8_lossy(&data)),
            Some(Ok(Message::Ping(data))) => {
                if let Err(e) = stream.send(Message::Pong(data)).await {
                    warn!(error = %e, "Failed to answer ping");
                }
            }
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                let event = CloseEvent::from(frame);
                warn!(code = ?event.code, reason = %event.reason, "Received close frame");
                (handlers.on_close)(event);
                return;
            }
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket error");
                (handlers.on_error)(MarketDataError::WebSocketMessage(e.to_string()));
                return;
            }
            None => {
                warn!("WebSocket stream ended");
                (handlers.on_close)(CloseEvent {
                    code: None,
                    reason: "Stream ended".to_string(),
                });
                return;
            }
        }
    }
}
