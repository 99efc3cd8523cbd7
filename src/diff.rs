//! Differential writer: compares two full card images sector by sector and
//! only erases/writes the sectors that actually changed (SPEC_FULL.md §4.8).

use crate::error::{DriverError, Result};
use crate::progress::ProgressSink;
use crate::session::{validate_image_sizes, Session, WRITE_PAGE_SIZE};

/// Writes `new` onto the card, using `old` (typically the card's current
/// contents, as read back before this call) to skip sectors that are
/// already correct. Returns the number of sectors actually erased and
/// rewritten.
pub fn write_diff(
    session: &mut Session,
    old: &[u8],
    new: &[u8],
    progress: &mut dyn ProgressSink,
) -> Result<usize> {
    let card_size = session.card_size() as usize;
    validate_image_sizes(old, new, card_size)?;

    let sector_size = session.sector_size() as usize;
    if sector_size == 0 || card_size % sector_size != 0 {
        return Err(DriverError::InvalidArgument(format!(
            "card size {card_size} is not a multiple of its sector size {sector_size}"
        )));
    }
    let sector_count = card_size / sector_size;

    let dirty: Vec<usize> = (0..sector_count)
        .filter(|&i| {
            let start = i * sector_size;
            let end = start + sector_size;
            old[start..end] != new[start..end]
        })
        .collect();

    log::info!(
        "differential write: {} of {} sectors changed",
        dirty.len(),
        sector_count
    );
    progress.on_start(dirty.len() as u64);

    for sector_index in dirty.iter().copied() {
        let start = sector_index * sector_size;
        let address = start as u32;
        session.erase_sector(address)?;
        for offset in (0..sector_size).step_by(WRITE_PAGE_SIZE) {
            let page_addr = address + offset as u32;
            let page = &new[start + offset..start + offset + WRITE_PAGE_SIZE];
            session.write_page(page_addr, page)?;
        }
        progress.on_step();
    }

    progress.on_finish();
    Ok(dirty.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeBus;
    use crate::progress::NullProgress;
    use crate::session::SessionOptions;

    fn id_for(size_field: u32, latency_idx: u32, sector_idx: u32) -> [u8; 4] {
        let id = (size_field << 2) | (latency_idx << 8) | (sector_idx << 11);
        id.to_be_bytes()
    }

    #[test]
    fn rejects_size_mismatch_before_touching_the_bus() {
        let mut bus = FakeBus::new();
        bus.push_response(id_for(1, 0, 0).to_vec()); // 512 KiB, sector 0x2000
        bus.push_response(vec![0x41]); // READY | UNLOCKED
        let mut session = Session::open(&mut bus, None, SessionOptions::default()).unwrap();
        let card_size = session.card_size() as usize;
        let old = vec![0u8; card_size];
        let new = vec![0u8; card_size - 1];
        let mut progress = NullProgress;
        let err = write_diff(&mut session, &old, &new, &mut progress).unwrap_err();
        assert!(matches!(err, DriverError::SizeMismatch { .. }));
    }

    #[test]
    fn identical_images_write_nothing() {
        let mut bus = FakeBus::new();
        bus.push_response(id_for(1, 0, 0).to_vec());
        bus.push_response(vec![0x41]);
        let mut session = Session::open(&mut bus, None, SessionOptions::default()).unwrap();
        let card_size = session.card_size() as usize;
        let image = vec![0xabu8; card_size];
        let mut progress = NullProgress;
        let written = write_diff(&mut session, &image, &image, &mut progress).unwrap();
        assert_eq!(written, 0);
    }
}
