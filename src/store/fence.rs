//! Connection generations
//!
//! Each connection attempt takes a fresh generation; callbacks carry the one
//! they were created under and are ignored once it is no longer current.

/// Monotonic generation counter
#[derive(Debug, Default)]
pub struct ConnectionFence {
    current: u64,
}

impl ConnectionFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retire every earlier generation and return the new one
    pub fn next(&mut self) -> u64 {
        self.current += 1;
        self.current
    }

    pub fn is_active(&self, generation: u64) -> bool {
        generation == self.current
    }
}
