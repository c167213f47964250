//! Test doubles for the store's injection points

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::MarketDataError;
use crate::parser::{DepthFrame, RawLevel};
use crate::store::{TickHandle, TickScheduler, TickTask};
use crate::websocket::{ClientFactory, ClientHandlers, CloseEvent, DepthClient};

/// Build a frame from `(price, quantity)` text pairs
pub fn frame(sequence_id: u64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> DepthFrame {
    let side = |levels: &[(&str, &str)]| {
        levels
            .iter()
            .map(|(p, q)| RawLevel::new(*p, *q))
            .collect::<Vec<_>>()
    };
    DepthFrame {
        sequence_id,
        bids: side(bids),
        asks: side(asks),
    }
}

/// One client handed out by [`FakeClientFactory`]; the test plays the socket
pub struct FakeConnection {
    pub symbol: String,
    handlers: ClientHandlers,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl FakeConnection {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn emit_frame(&self, frame: DepthFrame) {
        (self.handlers.on_message)(frame)
    }

    pub fn emit_raw(&self, raw: &str) {
        self.handlers.dispatch(raw)
    }

    /// Transport failure with the given reason
    pub fn fail(&self, reason: &str) {
        (self.handlers.on_error)(MarketDataError::WebSocketConnection(reason.to_string()))
    }

    /// Remote end hung up
    pub fn close_remote(&self) {
        (self.handlers.on_close)(CloseEvent {
            code: Some(1006),
            reason: String::new(),
        })
    }
}

struct FakeClient(Arc<FakeConnection>);

impl DepthClient for FakeClient {
    fn connect(&self) {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records every client the store asks for
#[derive(Default)]
pub struct FakeClientFactory {
    created: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeClientFactory {
    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn client(&self, index: usize) -> Arc<FakeConnection> {
        self.created.lock()[index].clone()
    }
}

impl ClientFactory for FakeClientFactory {
    fn create(&self, symbol: &str, handlers: ClientHandlers) -> Box<dyn DepthClient> {
        let connection = Arc::new(FakeConnection {
            symbol: symbol.to_string(),
            handlers,
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        });
        self.created.lock().push(connection.clone());
        Box::new(FakeClient(connection))
    }
}

/// Tick scheduler driven by hand, like a frame clock the test controls
#[derive(Default)]
pub struct ManualTicker {
    queue: Mutex<Vec<(Arc<AtomicBool>, TickTask)>>,
}

impl ManualTicker {
    /// Ticks scheduled and not cancelled
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .iter()
            .filter(|(cancelled, _)| !cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Run every queued tick; returns how many ran
    pub fn flush(&self) -> usize {
        let queued = std::mem::take(&mut *self.queue.lock());
        let mut ran = 0;
        for (cancelled, task) in queued {
            if !cancelled.load(Ordering::SeqCst) {
                task();
                ran += 1;
            }
        }
        ran
    }
}

struct ManualTickHandle(Arc<AtomicBool>);

impl TickHandle for ManualTickHandle {
    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl TickScheduler for ManualTicker {
    fn schedule(&self, task: TickTask) -> Box<dyn TickHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.queue.lock().push((cancelled.clone(), task));
        Box::new(ManualTickHandle(cancelled))
    }
}
