//! `gpio-cdev`-backed [`CompletionSignal`]: the card's INT line wired to a
//! Linux GPIO character device line.

use std::time::{Duration, Instant};

use gpio_cdev::{Chip, LineHandle, LineRequestFlags};

use crate::transport::CompletionSignal;

pub struct GpioSignal {
    line: LineHandle,
    last_value: u8,
}

impl GpioSignal {
    /// Requests `line_offset` on `chip_path` (e.g. `/dev/gpiochip0`) as an
    /// input, consumed by this process under the name `gcm-card`.
    pub fn open(chip_path: &str, line_offset: u32) -> std::io::Result<Self> {
        let mut chip = Chip::new(chip_path).map_err(to_io_error)?;
        let line = chip
            .get_line(line_offset)
            .map_err(to_io_error)?
            .request(LineRequestFlags::INPUT, 0, "gcm-card")
            .map_err(to_io_error)?;
        let last_value = line.get_value().map_err(to_io_error)? as u8;
        log::info!("gpio signal opened: {chip_path} line {line_offset}");
        Ok(GpioSignal { line, last_value })
    }
}

impl CompletionSignal for GpioSignal {
    /// Polls the line's value until a 1 -> 0 transition is observed or
    /// `timeout` elapses. `gpio-cdev` exposes an evented API
    /// (`LineHandle::events`); a tight poll loop is used here instead to
    /// avoid pulling in a separate async/epoll dependency for a single
    /// signal line.
    fn wait_for_edge(&mut self, timeout: Duration) -> std::io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let value = self.line.get_value().map_err(to_io_error)? as u8;
            if self.last_value == 1 && value == 0 {
                self.last_value = value;
                return Ok(true);
            }
            self.last_value = value;
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }
}

fn to_io_error(e: gpio_cdev::errors::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}
