//! The command layer: one function per card opcode, each building the exact
//! byte sequence SPEC_FULL.md §4.4 documents and invoking the bus transport.
//!
//! Named opcode constants mirror this codebase's convention for small,
//! fixed-size device protocols (see DESIGN.md's grounding entry for this
//! module): one `const u8` per command, grouped together instead of spread
//! as magic numbers through the call sites.

use crate::address;
use crate::transport::{BusTransport, Transaction};

pub mod opcode {
    pub const EXI_ID: u8 = 0x00;
    pub const READ_PAGE: u8 = 0x52;
    pub const SET_INTERRUPT: u8 = 0x81;
    pub const WRITE_BUFFER: u8 = 0x82;
    pub const GET_STATUS: u8 = 0x83;
    pub const GET_ID: u8 = 0x85;
    pub const WAKE: u8 = 0x87;
    pub const SLEEP: u8 = 0x88;
    pub const CLEAR_STATUS: u8 = 0x89;
    pub const ERASE_SECTOR: u8 = 0xf1;
    pub const WRITE_PAGE: u8 = 0xf2;
    pub const ERASE_CARD: u8 = 0xf4;
}

/// Maximum bytes returned by one `read_page` call.
pub const READ_SZ: usize = 0x200;
/// Maximum bytes accepted by one `write_page` call.
pub const WRITE_SZ: usize = 0x80;

/// Reads the 4-byte `exi_id` word, optionally at a reduced clock rate
/// (used at session construction, before the card's native geometry - and
/// thus its safe operating clock - is known).
pub fn exi_id(bus: &mut dyn BusTransport, speed_hz: Option<u32>) -> std::io::Result<[u8; 4]> {
    log::trace!("exi_id speed_hz={speed_hz:?}");
    let mut txn = Transaction::new().tx([opcode::EXI_ID, 0x00]).rx(4);
    if let Some(hz) = speed_hz {
        txn = txn.speed(hz);
    }
    let resp = bus.submit(&txn)?;
    let mut out = [0u8; 4];
    out.copy_from_slice(&resp[..4]);
    Ok(out)
}

/// Reads the card's 2-byte maker/model identifier.
pub fn get_id(bus: &mut dyn BusTransport) -> std::io::Result<[u8; 2]> {
    log::trace!("get_id");
    let txn = Transaction::new().tx([opcode::GET_ID, 0x00]).rx(2);
    let resp = bus.submit(&txn)?;
    let mut out = [0u8; 2];
    out.copy_from_slice(&resp[..2]);
    Ok(out)
}

/// Reads the one-byte card status.
pub fn get_status(bus: &mut dyn BusTransport) -> std::io::Result<u8> {
    log::trace!("get_status");
    let txn = Transaction::new().tx([opcode::GET_STATUS, 0x00]).rx(1);
    let resp = bus.submit(&txn)?;
    Ok(resp[0])
}

/// Clears PROGRAM_ERROR and ERASE_ERROR.
pub fn clear_status(bus: &mut dyn BusTransport) -> std::io::Result<()> {
    log::trace!("clear_status");
    bus.submit(&Transaction::new().tx([opcode::CLEAR_STATUS]))?;
    Ok(())
}

/// Enables or disables the card's INT signal generation.
pub fn set_interrupt(bus: &mut dyn BusTransport, enable: bool) -> std::io::Result<()> {
    log::trace!("set_interrupt enable={enable}");
    let cmd = [
        opcode::SET_INTERRUPT,
        if enable { 0x01 } else { 0x00 },
        0x00,
        0x00,
    ];
    bus.submit(&Transaction::new().tx(cmd))?;
    Ok(())
}

/// Wakes a sleeping card.
pub fn wake(bus: &mut dyn BusTransport) -> std::io::Result<()> {
    log::trace!("wake");
    bus.submit(&Transaction::new().tx([opcode::WAKE]))?;
    Ok(())
}

/// Puts the card to sleep.
pub fn sleep(bus: &mut dyn BusTransport) -> std::io::Result<()> {
    log::trace!("sleep");
    bus.submit(&Transaction::new().tx([opcode::SLEEP]))?;
    Ok(())
}

/// Flushes the card's internal write buffer. Callers must wait-idle
/// themselves afterwards (SPEC_FULL.md §4.4); this function only issues the
/// command bytes.
pub fn write_buffer(bus: &mut dyn BusTransport) -> std::io::Result<()> {
    log::trace!("write_buffer");
    bus.submit(&Transaction::new().tx([opcode::WRITE_BUFFER]))?;
    Ok(())
}

/// Issues a raw read at an arbitrary address-byte sequence, with an optional
/// trailing discarded suffix. Used directly by the unlock handshake, which
/// needs to read at addresses that are not aligned to the 0x200-byte read
/// page.
pub fn raw_read_page(
    bus: &mut dyn BusTransport,
    address_bytes: [u8; 4],
    length: usize,
    turnaround_bytes: u32,
) -> std::io::Result<Vec<u8>> {
    let mut cmd = Vec::with_capacity(5);
    cmd.push(opcode::READ_PAGE);
    cmd.extend_from_slice(&address_bytes);
    log::trace!("raw_read_page address_bytes={address_bytes:02x?} length={length}");
    let txn = Transaction::new()
        .tx(cmd)
        .tx(vec![0u8; turnaround_bytes as usize])
        .rx(length);
    bus.submit(&txn)
}

/// Reads up to [`READ_SZ`] bytes starting at `address`, which must be a
/// multiple of [`READ_SZ`].
pub fn read_page(
    bus: &mut dyn BusTransport,
    address: u32,
    length: usize,
    turnaround_bytes: u32,
) -> crate::error::Result<Vec<u8>> {
    if address as usize % READ_SZ != 0 {
        return Err(crate::error::DriverError::InvalidArgument(format!(
            "read address 0x{address:x} is not a multiple of 0x{READ_SZ:x}"
        )));
    }
    if length > READ_SZ {
        return Err(crate::error::DriverError::InvalidArgument(format!(
            "read length {length} exceeds max 0x{READ_SZ:x}"
        )));
    }
    let data = raw_read_page(bus, address::encode(address), length, turnaround_bytes)?;
    log::debug!("read_page address=0x{address:x} length={length}");
    Ok(data)
}

/// Issues the bytes for a `write_page` command. Callers are responsible for
/// `clear_status` beforehand, wait-idle afterwards, and the PROGRAM_ERROR
/// status check (SPEC_FULL.md §4.4); this function validates alignment and
/// size and writes the bytes.
pub fn write_page(
    bus: &mut dyn BusTransport,
    address: u32,
    data: &[u8],
) -> crate::error::Result<()> {
    if data.len() > WRITE_SZ {
        return Err(crate::error::DriverError::InvalidArgument(format!(
            "write data length {} exceeds max 0x{WRITE_SZ:x}",
            data.len()
        )));
    }
    if address as usize % WRITE_SZ != 0 {
        return Err(crate::error::DriverError::InvalidArgument(format!(
            "write address 0x{address:x} is not a multiple of 0x{WRITE_SZ:x}"
        )));
    }
    let mut cmd = Vec::with_capacity(5 + data.len());
    cmd.push(opcode::WRITE_PAGE);
    cmd.extend_from_slice(&address::encode(address));
    cmd.extend_from_slice(data);
    log::trace!("write_page address=0x{address:x} length={}", data.len());
    bus.submit(&Transaction::new().tx(cmd))?;
    Ok(())
}

/// Issues the bytes for an `erase_sector` command. See `write_page` for the
/// division of responsibility between this function and its caller.
pub fn erase_sector(
    bus: &mut dyn BusTransport,
    address: u32,
    sector_size: u32,
) -> crate::error::Result<()> {
    if address % sector_size != 0 {
        return Err(crate::error::DriverError::InvalidArgument(format!(
            "erase address 0x{address:x} is not a multiple of the sector size 0x{sector_size:x}"
        )));
    }
    let addr_bytes = address::encode(address);
    log::trace!("erase_sector address=0x{address:x}");
    bus.submit(&Transaction::new().tx([opcode::ERASE_SECTOR, addr_bytes[0], addr_bytes[1]]))?;
    Ok(())
}

/// Issues the bytes for an `erase_card` command.
pub fn erase_card(bus: &mut dyn BusTransport) -> std::io::Result<()> {
    log::trace!("erase_card");
    bus.submit(&Transaction::new().tx([opcode::ERASE_CARD, 0x00, 0x00]))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeBus;

    #[test]
    fn read_page_rejects_misaligned_address() {
        let mut bus = FakeBus::new();
        let err = read_page(&mut bus, 1, 0x200, 4).unwrap_err();
        assert!(matches!(err, crate::error::DriverError::InvalidArgument(_)));
    }

    #[test]
    fn read_page_rejects_oversize_length() {
        let mut bus = FakeBus::new();
        let err = read_page(&mut bus, 0, 0x201, 4).unwrap_err();
        assert!(matches!(err, crate::error::DriverError::InvalidArgument(_)));
    }

    #[test]
    fn write_page_rejects_oversize_data() {
        let mut bus = FakeBus::new();
        let err = write_page(&mut bus, 0, &[0u8; 0x81]).unwrap_err();
        assert!(matches!(err, crate::error::DriverError::InvalidArgument(_)));
    }

    #[test]
    fn write_page_rejects_misaligned_address() {
        let mut bus = FakeBus::new();
        let err = write_page(&mut bus, 1, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, crate::error::DriverError::InvalidArgument(_)));
    }

    #[test]
    fn erase_sector_rejects_misaligned_address() {
        let mut bus = FakeBus::new();
        let err = erase_sector(&mut bus, 1, 0x2000).unwrap_err();
        assert!(matches!(err, crate::error::DriverError::InvalidArgument(_)));
    }
}
