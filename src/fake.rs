//! In-memory `BusTransport`/`CompletionSignal` pair for tests.
//!
//! Scriptable the same way the real card would behave: callers push expected
//! responses (or let the queue run dry, in which case a transaction returns
//! zeroes), and can inspect exactly which transactions were submitted
//! afterwards. This plays the role the corpus's hardware-backed trait impls
//! play for production use (`hw::spi::SpidevBus`, `hw::gpio::GpioSignal`),
//! but deterministic and requiring no real device.

use std::collections::VecDeque;
use std::time::Duration;

use crate::transport::{BusTransport, CompletionSignal, Transaction};

/// A `BusTransport` that replays a queue of canned responses and records
/// every transaction it was asked to submit.
#[derive(Default)]
pub struct FakeBus {
    responses: VecDeque<Vec<u8>>,
    pub submitted: Vec<Transaction>,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the bytes to return for the next `submit` call whose
    /// transaction expects a non-zero number of receive bytes.
    pub fn push_response(&mut self, bytes: impl Into<Vec<u8>>) {
        self.responses.push_back(bytes.into());
    }
}

impl BusTransport for FakeBus {
    fn submit(&mut self, txn: &Transaction) -> std::io::Result<Vec<u8>> {
        self.submitted.push(txn.clone());
        let expected = txn.expected_rx_len();
        if expected == 0 {
            return Ok(Vec::new());
        }
        match self.responses.pop_front() {
            Some(bytes) => {
                if bytes.len() != expected {
                    return Ok(resize(bytes, expected));
                }
                Ok(bytes)
            }
            None => Ok(vec![0u8; expected]),
        }
    }
}

fn resize(mut bytes: Vec<u8>, len: usize) -> Vec<u8> {
    bytes.resize(len, 0);
    bytes
}

/// A `CompletionSignal` that fires (or times out) according to a scripted
/// queue of booleans.
#[derive(Default)]
pub struct FakeSignal {
    edges: VecDeque<bool>,
}

impl FakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next `wait_for_edge` outcome: `true` for an observed edge,
    /// `false` for a timeout.
    pub fn push_edge(&mut self, fired: bool) {
        self.edges.push_back(fired);
    }
}

impl CompletionSignal for FakeSignal {
    fn wait_for_edge(&mut self, _timeout: Duration) -> std::io::Result<bool> {
        Ok(self.edges.pop_front().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_bus_replays_queued_response() {
        let mut bus = FakeBus::new();
        bus.push_response(vec![1, 2, 3, 4]);
        let txn = Transaction::new().tx([0x00, 0x00]).rx(4);
        let resp = bus.submit(&txn).unwrap();
        assert_eq!(resp, vec![1, 2, 3, 4]);
        assert_eq!(bus.submitted.len(), 1);
    }

    #[test]
    fn fake_bus_defaults_to_zeroes_when_queue_empty() {
        let mut bus = FakeBus::new();
        let resp = bus.submit(&Transaction::new().tx([0x83, 0x00]).rx(1)).unwrap();
        assert_eq!(resp, vec![0]);
    }

    #[test]
    fn fake_signal_replays_scripted_edges() {
        let mut sig = FakeSignal::new();
        sig.push_edge(true);
        sig.push_edge(false);
        assert!(sig.wait_for_edge(Duration::from_millis(1)).unwrap());
        assert!(!sig.wait_for_edge(Duration::from_millis(1)).unwrap());
        assert!(!sig.wait_for_edge(Duration::from_millis(1)).unwrap());
    }
}
