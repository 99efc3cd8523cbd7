//! Capability traits the core driver consumes, but never implements itself.
//!
//! The driver only ever talks through [`BusTransport`] and, optionally,
//! [`CompletionSignal`]. Real, hardware-backed implementations live under
//! [`crate::hw`]; a scriptable in-memory pair lives in [`crate::fake`] for
//! tests, in the same spirit as this driver's teacher selecting between a
//! socket-backed and a direct-USB implementation of one device trait behind
//! a single factory function.

use std::time::Duration;

/// One segment of a logical SPI transaction.
#[derive(Debug, Clone)]
pub enum Segment {
    /// Transmit-only: bytes go out, nothing is captured.
    Tx(Vec<u8>),
    /// Receive-only: `len` bytes are clocked in; MOSI content is unspecified.
    Rx { len: usize },
    /// Full-duplex: `tx` is clocked out while an equal number of bytes are
    /// captured.
    Duplex { tx: Vec<u8> },
}

impl Segment {
    pub fn len(&self) -> usize {
        match self {
            Segment::Tx(bytes) => bytes.len(),
            Segment::Rx { len } => *len,
            Segment::Duplex { tx } => tx.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One logical SPI transaction: an ordered list of segments, with an
/// optional clock-rate override applying to every segment in the list (used
/// only by `exi_id`, which probes at a reduced clock before the card's
/// native rate is known).
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    pub segments: Vec<Segment>,
    pub speed_hz: Option<u32>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn speed(mut self, speed_hz: u32) -> Self {
        self.speed_hz = Some(speed_hz);
        self
    }

    pub fn tx(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.segments.push(Segment::Tx(bytes.into()));
        self
    }

    pub fn rx(mut self, len: usize) -> Self {
        self.segments.push(Segment::Rx { len });
        self
    }

    pub fn duplex(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.segments.push(Segment::Duplex { tx: bytes.into() });
        self
    }

    /// Total number of bytes clocked in across all `Rx`/`Duplex` segments.
    pub fn expected_rx_len(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Rx { len } => *len,
                Segment::Duplex { tx } => tx.len(),
                Segment::Tx(_) => 0,
            })
            .sum()
    }
}

/// The full-duplex byte channel the memory card is attached to.
///
/// Implementors submit the transaction as one logical operation (a single
/// chip-select assertion spanning every segment) and return the bytes
/// captured by every `Rx`/`Duplex` segment, concatenated in segment order.
pub trait BusTransport {
    /// Executes `txn`, returning the concatenated receive-side bytes.
    fn submit(&mut self, txn: &Transaction) -> std::io::Result<Vec<u8>>;
}

/// The card's optional edge-triggered completion signal (its INT line).
pub trait CompletionSignal {
    /// Blocks until a falling edge is observed or `timeout` elapses.
    ///
    /// Returns `Ok(true)` if an edge was observed (and consumed, so a
    /// subsequent call does not immediately return `true` again), `Ok(false)`
    /// on timeout.
    fn wait_for_edge(&mut self, timeout: Duration) -> std::io::Result<bool>;
}
