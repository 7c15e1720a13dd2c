use std::time::Instant;

use crate::flashing::error::FlashError;
use crate::flashing::progress::FlashProgress;
use crate::flashing::region::FlashRegion;
use crate::memory::MemoryInterface;

/// Erases all banks of all given flash regions.
///
/// Regions are erased in order. All banks of a region are attempted even if one of them
/// fails, but once a region has a failed bank the remaining regions are skipped.
///
/// Returns `Ok(false)` if a bank erase command failed. `Err` is reserved for debug link
/// failures, which abort immediately.
pub fn erase_all(
    memory: &mut (impl MemoryInterface + ?Sized),
    regions: &[FlashRegion],
    progress: &FlashProgress,
) -> Result<bool, FlashError> {
    tracing::debug!("Erasing all {} flash regions", regions.len());
    progress.started_mass_erase();

    for region in regions {
        if !erase_region(memory, region, progress)? {
            progress.failed_mass_erase();
            return Ok(false);
        }
    }

    progress.finished_mass_erase();
    Ok(true)
}

fn erase_region(
    memory: &mut (impl MemoryInterface + ?Sized),
    region: &FlashRegion,
    progress: &FlashProgress,
) -> Result<bool, FlashError> {
    let bank_size = region.bank_size();
    let mut passed = true;

    for bank in 0..region.banks() {
        let address = region.base() + u64::from(bank * bank_size);
        progress.bank_started(address, bank_size);

        let start = Instant::now();
        let bank_passed = match region
            .controller()
            .mass_erase_bank(memory, address, bank_size, progress)
        {
            Ok(()) => true,
            Err(error) if error.is_command_failure() => false,
            Err(error) => return Err(error),
        };
        progress.bank_finished(address, bank_size, bank_passed, start.elapsed());

        passed &= bank_passed;
    }

    Ok(passed)
}
