//! Reactive order book store
//!
//! Owns one depth stream at a time and exposes its ladder as a snapshot that
//! can be read synchronously and observed through change listeners.
//!
//! Every mutation (socket callbacks, flush ticks, retry timers) goes through
//! one internal lock, so the store moves along a single timeline. Callbacks
//! carry the connection generation they were created under and are dropped
//! once a newer `connect`/`disconnect` has retired it. Client calls and
//! listener notifications always run after the lock is released.

mod coalescer;
mod fence;
mod listeners;
mod retry;

pub use coalescer::{
    FrameCoalescer, IntervalTicker, TickHandle, TickScheduler, TickTask, DEFAULT_FLUSH_INTERVAL,
};
pub use fence::ConnectionFence;
pub use listeners::{Listener, Listeners, Subscription};
pub use retry::{RetryOutcome, RetryPolicy, RetryScheduler};

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::MarketDataError;
use crate::orderbook::{Snapshot, Status, DEFAULT_DEPTH};
use crate::parser::DepthFrame;
use crate::websocket::{
    ClientFactory, ClientHandlers, CloseEvent, DepthClient, StreamClientFactory, StreamEndpoint,
};

/// Reason recorded when the remote end closes the stream
const CONNECTION_CLOSED: &str = "Connection closed";

static SHARED: OnceLock<OrderbookStore> = OnceLock::new();

/// Store settings
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub endpoint: StreamEndpoint,
    /// Levels kept per side
    pub depth: usize,
    pub retry: RetryPolicy,
    /// Delay of the default flush ticker
    pub flush_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: StreamEndpoint::default(),
            depth: DEFAULT_DEPTH,
            retry: RetryPolicy::default(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

enum ConnectMode {
    /// Consumer-initiated; resets retry state
    Fresh,
    /// Retry continuation for the attempt that failed under `generation`
    Retry { generation: u64 },
}

struct ActiveClient {
    symbol: String,
    generation: u64,
    client: Arc<dyn DepthClient>,
}

struct PendingRetry {
    symbol: String,
    reason: String,
    generation: u64,
}

struct StoreState {
    snapshot: Arc<Snapshot>,
    client: Option<ActiveClient>,
    fence: ConnectionFence,
    coalescer: FrameCoalescer,
    retry: RetryScheduler,
    pending_retry: Option<PendingRetry>,
}

impl StoreState {
    fn is_live_on(&self, symbol: &str) -> bool {
        self.client.is_some() && self.snapshot.symbol.as_deref() == Some(symbol)
    }

    fn replace_snapshot(&mut self, snapshot: Snapshot) {
        self.snapshot = Arc::new(snapshot);
    }

    fn set_status(&mut self, status: Status, error: Option<String>) {
        let mut next = (*self.snapshot).clone();
        next.status = status;
        next.error = error;
        self.replace_snapshot(next);
    }

    fn clear_retry(&mut self) {
        self.retry.clear();
        self.pending_retry = None;
    }

    /// Terminal failure: retire the connection and hold `Error` until the next `connect`
    fn fail(&mut self, reason: String, effects: &mut Effects) {
        self.teardown(effects);
        self.fence.next();
        self.pending_retry = None;
        self.set_status(Status::Error, Some(reason));
    }

    /// Detach the active client and drop any frame waiting for a flush
    fn teardown(&mut self, effects: &mut Effects) {
        if let Some(active) = self.client.take() {
            debug!(
                symbol = %active.symbol,
                generation = active.generation,
                "Tearing down depth stream"
            );
            effects.close.push(active.client);
        }
        self.coalescer.cancel();
    }
}

/// Work deferred until the state lock is released
#[derive(Default)]
struct Effects {
    close: Vec<Arc<dyn DepthClient>>,
    notify: bool,
    connect: Option<Arc<dyn DepthClient>>,
}

impl Effects {
    fn apply(self, listeners: &Listeners) {
        for client in self.close {
            client.close();
        }
        if self.notify {
            listeners.emit();
        }
        if let Some(client) = self.connect {
            client.connect();
        }
    }
}

struct Shared {
    state: Mutex<StoreState>,
    listeners: Arc<Listeners>,
    factory: Arc<dyn ClientFactory>,
}

/// Handle to an order book store; clones share the same store
#[derive(Clone)]
pub struct OrderbookStore {
    shared: Arc<Shared>,
}

impl Default for OrderbookStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl OrderbookStore {
    /// Create an isolated store backed by real WebSocket clients
    pub fn new(config: StoreConfig) -> Self {
        let factory = Arc::new(StreamClientFactory::new(config.endpoint.clone()));
        let ticker = Arc::new(IntervalTicker::new(config.flush_interval));
        Self::with_parts(config, factory, ticker)
    }

    /// Create a store with injected client factory and tick scheduler
    ///
    /// The factory must not invoke the handlers it receives before returning.
    pub fn with_parts(
        config: StoreConfig,
        factory: Arc<dyn ClientFactory>,
        ticker: Arc<dyn TickScheduler>,
    ) -> Self {
        let state = StoreState {
            snapshot: Arc::new(Snapshot::default()),
            client: None,
            fence: ConnectionFence::new(),
            coalescer: FrameCoalescer::new(ticker, config.depth),
            retry: RetryScheduler::new(config.retry),
            pending_retry: None,
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                listeners: Listeners::new(),
                factory,
            }),
        }
    }

    /// Process-wide store with default settings, built on first use
    pub fn shared() -> Self {
        SHARED.get_or_init(Self::default).clone()
    }

    /// Follow `symbol`, replacing any current stream
    ///
    /// No-op when already streaming `symbol`.
    pub fn connect(&self, symbol: &str) {
        self.open(symbol, ConnectMode::Fresh);
    }

    /// Stop streaming and return to the pristine snapshot
    pub fn disconnect(&self) {
        let mut effects = Effects::default();
        {
            let mut state = self.shared.state.lock();
            if let Some(active) = &state.client {
                info!(symbol = %active.symbol, "Disconnecting depth stream");
            }
            state.teardown(&mut effects);
            state.fence.next();
            state.clear_retry();
            if !state.snapshot.is_pristine() {
                state.replace_snapshot(Snapshot::default());
                effects.notify = true;
            }
        }
        effects.apply(&self.shared.listeners);
    }

    /// Current snapshot; cheap and side-effect free
    pub fn get_snapshot(&self) -> Arc<Snapshot> {
        self.shared.state.lock().snapshot.clone()
    }

    /// Register a change listener
    ///
    /// Listeners run outside the store lock and may call back into the store.
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.shared.listeners.subscribe(listener)
    }

    fn open(&self, symbol: &str, mode: ConnectMode) {
        let mut effects = Effects::default();
        {
            let mut state = self.shared.state.lock();
            match mode {
                ConnectMode::Fresh => {
                    if state.is_live_on(symbol) {
                        debug!(symbol, "Already streaming symbol");
                        return;
                    }
                    state.clear_retry();
                }
                ConnectMode::Retry { generation } => {
                    if !state.fence.is_active(generation) {
                        trace!(symbol, generation, "Discarding retry of retired connection");
                        return;
                    }
                    state.pending_retry = None;
                }
            }

            state.teardown(&mut effects);
            state.replace_snapshot(Snapshot::connecting(symbol));
            effects.notify = true;

            let generation = state.fence.next();
            let handlers = self.fenced_handlers(symbol, generation);
            let client: Arc<dyn DepthClient> = Arc::from(self.shared.factory.create(symbol, handlers));

            info!(
                symbol,
                generation,
                attempt = state.retry.attempts(),
                "Opening depth stream"
            );
            state.client = Some(ActiveClient {
                symbol: symbol.to_string(),
                generation,
                client: client.clone(),
            });
            effects.connect = Some(client);
        }
        effects.apply(&self.shared.listeners);
    }

    /// Handlers that only reach the store while `generation` is current
    fn fenced_handlers(&self, symbol: &str, generation: u64) -> ClientHandlers {
        let weak = Arc::downgrade(&self.shared);
        let on_message = {
            let weak = weak.clone();
            move |frame: DepthFrame| {
                if let Some(store) = upgrade(&weak) {
                    store.on_frame(generation, frame);
                }
            }
        };
        let on_error = {
            let weak = weak.clone();
            let symbol = symbol.to_string();
            move |err: MarketDataError| {
                if let Some(store) = upgrade(&weak) {
                    store.on_error(generation, &symbol, err);
                }
            }
        };
        let on_close = {
            let symbol = symbol.to_string();
            move |event: CloseEvent| {
                if let Some(store) = upgrade(&weak) {
                    store.on_close(generation, &symbol, event);
                }
            }
        };
        ClientHandlers::new(on_message, on_error, on_close)
    }

    fn on_frame(&self, generation: u64, frame: DepthFrame) {
        let mut state = self.shared.state.lock();
        if !state.fence.is_active(generation) {
            trace!(generation, "Discarding frame from retired connection");
            return;
        }

        // Live traffic proves the connection healthy
        state.clear_retry();

        let weak = Arc::downgrade(&self.shared);
        state.coalescer.schedule(frame, move || {
            if let Some(store) = upgrade(&weak) {
                store.on_tick(generation);
            }
        });
    }

    fn on_tick(&self, generation: u64) {
        {
            let mut state = self.shared.state.lock();
            if !state.fence.is_active(generation) {
                trace!(generation, "Discarding flush of retired connection");
                return;
            }
            let Some(book) = state.coalescer.flush() else {
                return;
            };

            debug!(
                sequence_id = book.sequence_id,
                bids = book.bids.len(),
                asks = book.asks.len(),
                "Flushing depth frame"
            );
            let symbol = state.snapshot.symbol.clone();
            state.replace_snapshot(Snapshot {
                symbol,
                status: Status::Connected,
                bids: book.bids,
                asks: book.asks,
                error: None,
                sequence_id: Some(book.sequence_id),
            });
        }
        self.shared.listeners.emit();
    }

    fn on_error(&self, generation: u64, symbol: &str, err: MarketDataError) {
        let mut effects = Effects::default();
        {
            let mut state = self.shared.state.lock();
            if !state.fence.is_active(generation) {
                trace!(generation, error = %err, "Discarding error from retired connection");
                return;
            }
            if err.is_transport() {
                warn!(symbol, error = %err, "Depth stream transport error");
            } else {
                debug!(symbol, error = %err, "Depth stream protocol error");
            }
            self.enter_retry(&mut state, generation, symbol, err.to_string(), &mut effects);
        }
        effects.apply(&self.shared.listeners);
    }

    fn on_close(&self, generation: u64, symbol: &str, event: CloseEvent) {
        let mut effects = Effects::default();
        {
            let mut state = self.shared.state.lock();
            if !state.fence.is_active(generation) {
                trace!(generation, "Discarding close from retired connection");
                return;
            }
            if state.snapshot.symbol.as_deref() != Some(symbol) {
                return;
            }
            warn!(symbol, code = ?event.code, reason = %event.reason, "Depth stream closed");
            self.enter_retry(
                &mut state,
                generation,
                symbol,
                CONNECTION_CLOSED.to_string(),
                &mut effects,
            );
        }
        effects.apply(&self.shared.listeners);
    }

    /// Schedule a reconnect for the connection under `generation`, or give up
    ///
    /// The retry budget counts failed connections, not failure events.
    fn enter_retry(
        &self,
        state: &mut StoreState,
        generation: u64,
        symbol: &str,
        reason: String,
        effects: &mut Effects,
    ) {
        // One retry per failed connection, however many failure events it raises
        if let Some(pending) = state
            .pending_retry
            .as_mut()
            .filter(|pending| pending.generation == generation)
        {
            pending.reason = reason;
            return;
        }

        let weak = Arc::downgrade(&self.shared);
        let retry_symbol = symbol.to_string();
        let outcome = state.retry.schedule(move |attempt| {
            if let Some(store) = upgrade(&weak) {
                debug!(symbol = %retry_symbol, attempt, "Retry timer fired");
                store.open(&retry_symbol, ConnectMode::Retry { generation });
            }
        });

        match outcome {
            RetryOutcome::Scheduled { attempt, delay } => {
                info!(
                    symbol,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "Reconnecting after failure"
                );
                state.pending_retry = Some(PendingRetry {
                    symbol: symbol.to_string(),
                    reason,
                    generation,
                });
                state.set_status(Status::Connecting, None);
            }
            RetryOutcome::Exhausted { attempts } => {
                warn!(symbol, attempts, reason = %reason, "Retry budget exhausted");
                state.fail(reason, effects);
            }
            RetryOutcome::NoRuntime => {
                warn!(symbol, reason = %reason, "No Tokio runtime to schedule a reconnect");
                state.fail(reason, effects);
            }
        }
        effects.notify = true;
    }

    /// Symbol and reason of the reconnect currently waiting, if any
    pub fn pending_retry(&self) -> Option<(String, String)> {
        self.shared
            .state
            .lock()
            .pending_retry
            .as_ref()
            .map(|pending| (pending.symbol.clone(), pending.reason.clone()))
    }
}

fn upgrade(weak: &Weak<Shared>) -> Option<OrderbookStore> {
    weak.upgrade().map(|shared| OrderbookStore { shared })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{frame, FakeClientFactory, ManualTicker};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    struct Harness {
        store: OrderbookStore,
        clients: Arc<FakeClientFactory>,
        ticker: Arc<ManualTicker>,
    }

    fn harness() -> Harness {
        let clients = Arc::new(FakeClientFactory::default());
        let ticker = Arc::new(ManualTicker::default());
        let store = OrderbookStore::with_parts(StoreConfig::default(), clients.clone(), ticker.clone());
        Harness {
            store,
            clients,
            ticker,
        }
    }

    fn notifications(store: &OrderbookStore) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let _sub = store.subscribe(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    fn attempts(store: &OrderbookStore) -> u32 {
        store.shared.state.lock().retry.attempts()
    }

    #[test]
    fn test_initial_snapshot_is_pristine() {
        let h = harness();
        let snapshot = h.store.get_snapshot();
        assert!(snapshot.is_pristine());
        assert_eq!(snapshot.status, Status::Idle);
        assert_eq!(snapshot.symbol, None);
    }

    #[test]
    fn test_connect_resets_snapshot_and_starts_client() {
        let h = harness();
        let notified = notifications(&h.store);

        h.store.connect("BTCUSDT");

        let snapshot = h.store.get_snapshot();
        assert_eq!(*snapshot, Snapshot::connecting("BTCUSDT"));
        assert_eq!(h.clients.created(), 1);
        assert_eq!(h.clients.client(0).symbol, "BTCUSDT");
        assert_eq!(h.clients.client(0).connects(), 1);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stores_normalized_levels() {
        let h = harness();
        h.store.connect("BTCUSDT");

        h.clients
            .client(0)
            .emit_frame(frame(1, &[("100", "1"), ("101", "2")], &[("102", "1"), ("103", "2")]));
        assert_eq!(h.ticker.flush(), 1);

        let snapshot = h.store.get_snapshot();
        assert_eq!(snapshot.status, Status::Connected);
        assert_eq!(snapshot.bids.len(), 2);
        assert_eq!(snapshot.asks.len(), 2);
        assert_eq!(snapshot.bids[0].price, 101.0);
        assert_eq!(snapshot.asks[0].price, 102.0);
        assert_eq!(snapshot.sequence_id, Some(1));
        assert_eq!(snapshot.error, None);
    }

    #[test]
    fn test_snapshot_replaced_not_mutated() {
        let h = harness();
        h.store.connect("BTCUSDT");
        let before = h.store.get_snapshot();

        h.clients.client(0).emit_frame(frame(1, &[("100", "1")], &[]));
        h.ticker.flush();

        assert_eq!(before.status, Status::Connecting);
        assert!(before.bids.is_empty());
        assert!(!Arc::ptr_eq(&before, &h.store.get_snapshot()));
    }

    #[test]
    fn test_connect_same_symbol_is_idempotent() {
        let h = harness();
        h.store.connect("BTCUSDT");
        h.store.connect("BTCUSDT");

        assert_eq!(h.clients.created(), 1);
        assert_eq!(h.clients.client(0).connects(), 1);
        assert_eq!(h.clients.client(0).closes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_symbol_switch_replaces_client_and_resets_retry() {
        let h = harness();
        h.store.connect("BTCUSDT");
        h.clients.client(0).fail("boom");
        assert_eq!(attempts(&h.store), 1);

        h.store.connect("ETHUSDT");

        assert_eq!(h.clients.created(), 2);
        assert_eq!(h.clients.client(0).closes(), 1);
        assert_eq!(h.clients.client(1).connects(), 1);
        assert_eq!(h.clients.client(1).symbol, "ETHUSDT");
        assert_eq!(attempts(&h.store), 0);
        assert!(h.store.pending_retry().is_none());

        // The cancelled retry for BTCUSDT never fires
        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.clients.created(), 2);
        assert_eq!(h.store.get_snapshot().symbol.as_deref(), Some("ETHUSDT"));
    }

    #[test]
    fn test_burst_coalesces_to_latest_frame() {
        let h = harness();
        h.store.connect("BTCUSDT");
        let notified = notifications(&h.store);

        let client = h.clients.client(0);
        client.emit_frame(frame(1, &[("100", "1")], &[("101", "1")]));
        client.emit_frame(frame(2, &[("200", "2")], &[("201", "2")]));
        assert_eq!(h.ticker.pending(), 1);
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        h.ticker.flush();

        assert_eq!(notified.load(Ordering::SeqCst), 1);
        let snapshot = h.store.get_snapshot();
        assert_eq!(snapshot.bids[0].price, 200.0);
        assert_eq!(snapshot.asks[0].price, 201.0);
        assert_eq!(snapshot.sequence_id, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_exhaustion() {
        let h = harness();
        h.store.connect("BTCUSDT");

        for attempt in 0..3 {
            h.clients.client(attempt).fail(&format!("boom {attempt}"));
            let snapshot = h.store.get_snapshot();
            assert_eq!(snapshot.status, Status::Connecting);
            assert_eq!(snapshot.error, None);

            sleep(Duration::from_secs(2)).await;
            assert_eq!(h.clients.created(), attempt + 2);
        }

        h.clients.client(3).fail("final");

        let snapshot = h.store.get_snapshot();
        assert_eq!(snapshot.status, Status::Error);
        assert_eq!(
            snapshot.error.as_deref(),
            Some("WebSocket connection error: final")
        );
        assert_eq!(h.clients.client(3).closes(), 1);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(h.clients.created(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_follows_delay_schedule() {
        let h = harness();
        h.store.connect("BTCUSDT");

        h.clients.client(0).fail("boom");
        sleep(Duration::from_millis(200)).await;
        assert_eq!(h.clients.created(), 1);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(h.clients.created(), 2);

        h.clients.client(1).fail("boom");
        sleep(Duration::from_millis(400)).await;
        assert_eq!(h.clients.created(), 2);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(h.clients.created(), 3);
        assert_eq!(h.clients.client(1).closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_is_terminal_until_connect() {
        let h = harness();
        h.store.connect("BTCUSDT");
        for attempt in 0..4 {
            h.clients.client(attempt).fail("down");
            sleep(Duration::from_secs(2)).await;
        }
        assert_eq!(h.store.get_snapshot().status, Status::Error);

        // Late traffic from the abandoned connection is ignored
        h.clients.client(3).emit_frame(frame(9, &[("1", "1")], &[]));
        assert_eq!(h.ticker.flush(), 0);
        assert_eq!(h.store.get_snapshot().status, Status::Error);

        h.store.connect("BTCUSDT");
        assert_eq!(h.clients.created(), 5);
        assert_eq!(h.store.get_snapshot().status, Status::Connecting);
        assert_eq!(attempts(&h.store), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_enters_retry_flow() {
        let h = harness();
        h.store.connect("BTCUSDT");

        for attempt in 0..3 {
            h.clients.client(attempt).close_remote();
            sleep(Duration::from_secs(2)).await;
        }
        h.clients.client(3).close_remote();

        let snapshot = h.store.get_snapshot();
        assert_eq!(snapshot.status, Status::Error);
        assert_eq!(snapshot.error.as_deref(), Some("Connection closed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_then_close_schedules_one_retry() {
        let h = harness();
        h.store.connect("BTCUSDT");

        let client = h.clients.client(0);
        client.fail("reset");
        client.close_remote();

        assert_eq!(attempts(&h.store), 1);
        assert_eq!(
            h.store.pending_retry(),
            Some(("BTCUSDT".to_string(), "Connection closed".to_string()))
        );

        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.clients.created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_callbacks_are_fenced() {
        let h = harness();
        h.store.connect("BTCUSDT");
        h.store.connect("ETHUSDT");
        let notified = notifications(&h.store);

        let stale = h.clients.client(0);
        stale.emit_frame(frame(1, &[("100", "1")], &[("101", "1")]));
        stale.fail("late error");
        stale.close_remote();

        assert_eq!(h.ticker.flush(), 0);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert_eq!(*h.store.get_snapshot(), Snapshot::connecting("ETHUSDT"));
        assert_eq!(attempts(&h.store), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.clients.created(), 2);
    }

    #[test]
    fn test_same_symbol_reconnect_fences_old_client() {
        let h = harness();
        h.store.connect("BTCUSDT");
        h.store.disconnect();
        h.store.connect("BTCUSDT");

        h.clients.client(0).emit_frame(frame(1, &[("100", "1")], &[]));
        assert_eq!(h.ticker.flush(), 0);
        assert!(h.store.get_snapshot().bids.is_empty());

        h.clients.client(1).emit_frame(frame(2, &[("200", "1")], &[]));
        h.ticker.flush();
        assert_eq!(h.store.get_snapshot().bids[0].price, 200.0);
    }

    #[test]
    fn test_pending_flush_dropped_on_reconnect() {
        let h = harness();
        h.store.connect("BTCUSDT");
        h.clients.client(0).emit_frame(frame(1, &[("100", "1")], &[]));

        h.store.connect("ETHUSDT");

        assert_eq!(h.ticker.flush(), 0);
        assert_eq!(*h.store.get_snapshot(), Snapshot::connecting("ETHUSDT"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_pending_retry() {
        let h = harness();
        h.store.connect("BTCUSDT");
        let client = h.clients.client(0);

        client.fail("blip");
        assert_eq!(attempts(&h.store), 1);

        client.emit_frame(frame(1, &[("100", "1")], &[("101", "1")]));
        assert_eq!(attempts(&h.store), 0);
        assert!(h.store.pending_retry().is_none());

        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.clients.created(), 1);

        h.ticker.flush();
        assert_eq!(h.store.get_snapshot().status, Status::Connected);

        // Counting restarts at the first delay
        client.fail("blip again");
        assert_eq!(attempts(&h.store), 1);
        sleep(Duration::from_millis(300)).await;
        assert_eq!(h.clients.created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_error_enters_retry_flow() {
        let h = harness();
        h.store.connect("BTCUSDT");

        h.clients.client(0).emit_raw(r#"{"lastUpdateId": 1, "bids": []}"#);

        let snapshot = h.store.get_snapshot();
        assert_eq!(snapshot.status, Status::Connecting);
        let (_, reason) = h.store.pending_retry().unwrap();
        assert!(reason.starts_with("Invalid depth payload"));

        // A bad payload alone leaves the socket open
        assert_eq!(h.clients.client(0).closes(), 0);

        // A good frame before the timer fires cancels the retry
        h.clients.client(0).emit_frame(frame(2, &[("100", "1")], &[("101", "1")]));
        assert!(h.store.pending_retry().is_none());

        sleep(Duration::from_millis(300)).await;
        assert_eq!(h.clients.created(), 1);

        assert_eq!(h.ticker.flush(), 1);
        let snapshot = h.store.get_snapshot();
        assert_eq!(snapshot.status, Status::Connected);
        assert_eq!(snapshot.sequence_id, Some(2));
        assert_eq!(snapshot.error, None);
    }

    #[test]
    fn test_connect_without_runtime_reports_error() {
        let store = OrderbookStore::new(StoreConfig::default());
        store.connect("BTCUSDT");

        let snapshot = store.get_snapshot();
        assert_eq!(snapshot.status, Status::Error);
        assert_eq!(snapshot.symbol.as_deref(), Some("BTCUSDT"));
        assert!(snapshot
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("No async runtime available")));
        assert!(store.pending_retry().is_none());

        // A later connect tries again instead of sticking
        store.connect("BTCUSDT");
        assert_eq!(store.get_snapshot().status, Status::Error);
        store.disconnect();
        assert!(store.get_snapshot().is_pristine());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent_and_silences_client() {
        let h = harness();
        h.store.connect("BTCUSDT");
        h.clients.client(0).emit_frame(frame(1, &[("100", "1")], &[]));
        h.ticker.flush();
        let notified = notifications(&h.store);

        h.store.disconnect();
        h.store.disconnect();

        assert_eq!(h.clients.client(0).closes(), 1);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert!(h.store.get_snapshot().is_pristine());

        h.clients.client(0).close_remote();
        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.clients.created(), 1);
        assert!(h.store.get_snapshot().is_pristine());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_retry() {
        let h = harness();
        h.store.connect("BTCUSDT");
        h.clients.client(0).fail("boom");

        h.store.disconnect();
        assert_eq!(attempts(&h.store), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.clients.created(), 1);
    }

    #[test]
    fn test_listeners_can_read_snapshot() {
        let h = harness();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (store, sink) = (h.store.clone(), seen.clone());
        let sub = h.store.subscribe(move || sink.lock().push(store.get_snapshot().status));

        h.store.connect("BTCUSDT");
        h.clients.client(0).emit_frame(frame(1, &[("1", "1")], &[]));
        h.ticker.flush();
        sub.unsubscribe();
        h.store.disconnect();

        assert_eq!(*seen.lock(), vec![Status::Connecting, Status::Connected]);
    }

    #[test]
    fn test_shared_instance_is_reused() {
        let a = OrderbookStore::shared();
        let b = OrderbookStore::shared();
        assert!(Arc::ptr_eq(&a.shared, &b.shared));

        let isolated = OrderbookStore::default();
        assert!(!Arc::ptr_eq(&a.shared, &isolated.shared));
    }
}
