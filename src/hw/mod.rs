//! Real hardware backends for [`crate::transport::BusTransport`] and
//! [`crate::transport::CompletionSignal`], selected by the CLI based on
//! which device paths it was given (SPEC_FULL.md §6).

pub mod gpio;
pub mod spi;

pub use gpio::GpioSignal;
pub use spi::SpidevBus;
