//! `spidev`-backed [`BusTransport`]: the card attaches to a Linux SPI
//! character device (`/dev/spidevB.C`).

use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use crate::transport::{BusTransport, Segment, Transaction};

pub struct SpidevBus {
    dev: Spidev,
}

impl SpidevBus {
    /// Opens the SPI device at `path` (e.g. `/dev/spidev0.0`), configured
    /// for the card's native clock rate and mode 0, MSB first.
    pub fn open(path: &str, speed_hz: u32) -> std::io::Result<Self> {
        let mut dev = Spidev::open(path)?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(speed_hz)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        dev.configure(&options)?;
        log::info!("spidev bus opened: {path} at {speed_hz} Hz");
        Ok(SpidevBus { dev })
    }
}

impl BusTransport for SpidevBus {
    /// Every segment is clocked full-duplex over the wire regardless of its
    /// logical direction - the bus does not support a transmit-only or
    /// receive-only phase - so `Tx` segments clock in a scratch buffer and
    /// `Rx` segments clock out zero-filled dummy bytes.
    fn submit(&mut self, txn: &Transaction) -> std::io::Result<Vec<u8>> {
        if let Some(hz) = txn.speed_hz {
            self.dev
                .configure(&SpidevOptions::new().max_speed_hz(hz).build())?;
        }

        let mut tx_bufs: Vec<Vec<u8>> = Vec::with_capacity(txn.segments.len());
        let mut rx_bufs: Vec<Vec<u8>> = Vec::with_capacity(txn.segments.len());
        for segment in &txn.segments {
            match segment {
                Segment::Tx(bytes) => {
                    tx_bufs.push(bytes.clone());
                    rx_bufs.push(vec![0u8; bytes.len()]);
                }
                Segment::Rx { len } => {
                    tx_bufs.push(vec![0u8; *len]);
                    rx_bufs.push(vec![0u8; *len]);
                }
                Segment::Duplex { tx } => {
                    rx_bufs.push(vec![0u8; tx.len()]);
                    tx_bufs.push(tx.clone());
                }
            }
        }

        let mut transfers: Vec<SpidevTransfer> = tx_bufs
            .iter()
            .zip(rx_bufs.iter_mut())
            .map(|(tx, rx)| SpidevTransfer::read_write(tx, rx))
            .collect();
        self.dev.transfer_multiple(&mut transfers)?;

        let mut out = Vec::with_capacity(txn.expected_rx_len());
        for (segment, rx) in txn.segments.iter().zip(rx_bufs.into_iter()) {
            if !matches!(segment, Segment::Tx(_)) {
                out.extend(rx);
            }
        }
        Ok(out)
    }
}
