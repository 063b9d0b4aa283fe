// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! NV writes that survive the TPM's write budget.
//!
//! An unowned TPM only allows a limited number of NV writes before it starts
//! answering `TPM_MAXNVWRITES`, and only a clear resets the count. That's the
//! one failure worth handling here; everything else goes back to the caller.

use crate::retry::retry_after;
use log::{debug, warn};
use tpm_lite::{KnownError, Tlcl, TpmError};
use tpm_spaces::Space;

/// Clears ownership and puts the TPM back into the enabled, activated state
/// that a clear takes it out of.
pub fn clear_and_reenable<T: Tlcl + ?Sized>(tpm: &mut T) -> Result<(), TpmError> {
    debug!("TPM: clear and re-enable");
    tpm.force_clear()?;
    tpm.set_enable()?;
    tpm.set_deactivated(false)?;
    Ok(())
}

fn recover_nv_writes<T: Tlcl + ?Sized>(tpm: &mut T) -> Result<(), TpmError> {
    warn!("TPM: out of NV writes; clearing to reset the count");
    clear_and_reenable(tpm)
}

pub fn safe_write<T: Tlcl + ?Sized>(
    tpm: &mut T,
    space: Space,
    data: &[u8],
) -> Result<(), TpmError> {
    retry_after(
        tpm,
        KnownError::MaxNvWrites,
        |tpm| tpm.write(space.nv_index(), data),
        recover_nv_writes,
    )
}

/// Defines `space` with its fixed permissions and size.
pub fn safe_define_space<T: Tlcl + ?Sized>(tpm: &mut T, space: Space) -> Result<(), TpmError> {
    retry_after(
        tpm,
        KnownError::MaxNvWrites,
        |tpm| tpm.define_space(space.nv_index(), space.permissions(), space.size() as u32),
        recover_nv_writes,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpm_lite::sim::SimulatedTpm;
    use tpm_lite::Command;

    fn ready() -> SimulatedTpm {
        let mut tpm = SimulatedTpm::new();
        tpm.lib_init().unwrap();
        tpm.startup().unwrap();
        tpm.physical_presence_cmd_enable().unwrap();
        tpm.assert_physical_presence().unwrap();
        tpm
    }

    #[test]
    fn define_then_write() {
        let mut tpm = ready();
        safe_define_space(&mut tpm, Space::Kernel).unwrap();
        safe_write(&mut tpm, Space::Kernel, &[7; 13]).unwrap();

        let space = tpm.space(Space::Kernel.nv_index()).unwrap();
        assert_eq!(space.perm, Space::Kernel.permissions());
        assert_eq!(space.data, vec![7; 13]);
        assert_eq!(tpm.count(Command::ForceClear), 0);
    }

    #[test]
    fn write_recovers_from_max_nv_writes() {
        let mut tpm = ready();
        safe_define_space(&mut tpm, Space::Firmware).unwrap();
        tpm.clear_log();
        tpm.fail_next(Command::Write, KnownError::MaxNvWrites);

        safe_write(&mut tpm, Space::Firmware, &[1; 10]).unwrap();

        assert_eq!(
            tpm.log(),
            &[
                Command::Write,
                Command::ForceClear,
                Command::SetEnable,
                Command::SetDeactivated,
                Command::Write,
            ]
        );
        assert_eq!(tpm.space(Space::Firmware.nv_index()).unwrap().data, vec![1; 10]);
        assert!(!tpm.permanent.disable);
        assert!(!tpm.permanent.deactivated);
    }

    #[test]
    fn define_recovers_from_max_nv_writes() {
        let mut tpm = ready();
        tpm.clear_log();
        tpm.fail_next(Command::DefineSpace, KnownError::MaxNvWrites);

        safe_define_space(&mut tpm, Space::Kernel).unwrap();
        assert_eq!(tpm.count(Command::ForceClear), 1);
        assert_eq!(tpm.count(Command::DefineSpace), 2);
        assert!(tpm.space(Space::Kernel.nv_index()).is_some());
    }

    #[test]
    fn define_gives_up_when_a_clear_does_not_help() {
        let mut tpm = ready();
        tpm.nv_write_limit = Some(0);
        assert_eq!(
            safe_define_space(&mut tpm, Space::Kernel),
            Err(TpmError::Known(KnownError::MaxNvWrites))
        );
        assert_eq!(tpm.count(Command::ForceClear), 1);
        assert!(tpm.space(Space::Kernel.nv_index()).is_none());
    }

    #[test]
    fn only_one_retry() {
        let mut tpm = ready();
        safe_define_space(&mut tpm, Space::Kernel).unwrap();
        tpm.fail_times(Command::Write, KnownError::MaxNvWrites, 2);

        assert_eq!(
            safe_write(&mut tpm, Space::Kernel, &[0; 13]),
            Err(TpmError::Known(KnownError::MaxNvWrites))
        );
        assert_eq!(tpm.count(Command::ForceClear), 1);
    }

    #[test]
    fn other_errors_pass_through() {
        let mut tpm = ready();
        assert_eq!(
            safe_write(&mut tpm, Space::Kernel, &[0; 13]),
            Err(TpmError::Known(KnownError::BadIndex))
        );
        assert_eq!(tpm.count(Command::ForceClear), 0);
    }
}
