// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::safe::{clear_and_reenable, safe_define_space};
use crate::space_io::write_space;
use crate::Result;
use log::{debug, info};
use tpm_lite::Tlcl;
use tpm_spaces::{FirmwareSpace, KernelSpace, RollbackSpace, Space};

/// First-boot provisioning of a TPM that has never had rollback spaces.
///
/// This only ever runs once per physical TPM, normally in the factory, so it
/// doesn't try to be fast. Any failure is returned as-is and the caller is
/// expected to stop rather than carry on with a half-provisioned part.
pub fn one_time_initialize<T: Tlcl + ?Sized>(tpm: &mut T) -> Result<(FirmwareSpace, KernelSpace)> {
    info!("TPM: one-time initialization");

    // The steps below set lifetime flags that can't be undone
    tpm.self_test_full()?;

    let pflags = tpm.get_permanent_flags()?;

    // Parts may ship without physical presence finalized.
    debug!(
        "TPM: physicalPresenceLifetimeLock={}",
        pflags.physical_presence_lifetime_lock
    );
    if !pflags.physical_presence_lifetime_lock {
        debug!("TPM: finalizing physical presence");
        tpm.finalize_physical_presence()?;
    }

    // NV permissions aren't enforced until nvLocked is set, which makes every
    // check below meaningless until it is.
    debug!("TPM: nvLocked={}", pflags.nv_locked);
    if !pflags.nv_locked {
        debug!("TPM: enabling NV locking");
        tpm.set_nv_locked()?;
    }

    // In case the part arrived with an owner
    debug!("TPM: clearing owner");
    clear_and_reenable(tpm)?;

    let mut rsf = FirmwareSpace::initial();
    let mut rsk = KernelSpace::initial();

    safe_define_space(tpm, Space::Kernel)?;
    write_space(tpm, &mut rsk)?;
    safe_define_space(tpm, Space::Firmware)?;
    write_space(tpm, &mut rsf)?;

    Ok((rsf, rsk))
}
