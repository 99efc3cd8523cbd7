//! Error types threaded through every fallible driver operation.

use thiserror::Error;

/// Everything that can go wrong while talking to a memory card.
#[derive(Debug, Error)]
pub enum DriverError {
    /// `exi_id` returned all-zero bytes: nothing is plugged into the bus.
    #[error("nothing attached (exi_id read all zeroes)")]
    NothingAttached,

    /// `exi_id` returned a value whose reserved bits are set.
    #[error("not a memory card (id=0x{0:08x})")]
    NotAMemoryCard(u32),

    /// The unlock handshake completed but the card still reports UNLOCKED=0.
    #[error("unlock failed, power-cycle the card before trying again")]
    UnlockFailed,

    /// A wait-idle operation exceeded its configured timeout.
    #[error("timed out waiting for the card to become idle")]
    Timeout,

    /// `erase_sector`/`erase_card` completed with the ERASE_ERROR status bit set.
    #[error("erase failed (status=0x{0:02x})")]
    EraseFailed(u8),

    /// `write_page` completed with the PROGRAM_ERROR status bit set.
    #[error("program failed (status=0x{0:02x})")]
    ProgramFailed(u8),

    /// A caller-supplied argument violates an alignment or size constraint.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An image passed to the differential writer does not match the card size.
    #[error("size mismatch: expected {expected} bytes, got {actual} bytes")]
    SizeMismatch { expected: usize, actual: usize },

    /// A real transport or signal-line implementation hit an I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;
