// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::setup::{setup_tpm, SetupConfig};
use crate::space_io::{read_space, write_space};
use crate::{Error, Result};
use log::debug;
use tpm_lite::{KnownError, Tlcl};
use tpm_spaces::{FirmwareSpace, KernelSpace, Space, ROLLBACK_SPACE_KERNEL_UID};

/// What verified boot asks of the rollback counters.
///
/// `firmware_setup` is called once per boot before anything else; the
/// firmware space is then locked with `firmware_lock` before the RW firmware
/// runs, and the kernel space with `kernel_lock` before the kernel runs.
pub trait RollbackIndex {
    /// Re-establishes the TPM after suspend to RAM
    fn s3_resume(&mut self) -> Result<()>;

    /// Starts the TPM and returns the stored firmware version.
    ///
    /// `dev_mode` carries the hardware developer switch in. On boards without
    /// one (`hw_dev_sw == false`) it comes back set if the virtual switch is
    /// on; it is never cleared.
    fn firmware_setup(
        &mut self,
        recovery_mode: bool,
        hw_dev_sw: bool,
        dev_mode: &mut bool,
    ) -> Result<u32>;

    fn firmware_read(&mut self) -> Result<u32>;
    fn firmware_write(&mut self, version: u32) -> Result<()>;

    /// Blocks writes to the firmware space until the next reset
    fn firmware_lock(&mut self) -> Result<()>;

    fn kernel_read(&mut self) -> Result<u32>;
    fn kernel_write(&mut self, version: u32) -> Result<()>;

    /// Drops physical presence so nothing later in this boot can write the
    /// kernel space. Recovery mode leaves it asserted so the recovery image
    /// can repair the spaces.
    fn kernel_lock(&mut self, recovery_mode: bool) -> Result<()>;

    /// Turns the virtual developer switch on or off. Takes effect at the
    /// next `firmware_setup`.
    fn set_virtual_dev_mode(&mut self, enabled: bool) -> Result<()>;
}

/// Rollback counters backed by a TPM
pub struct Rollback<T: Tlcl> {
    tpm: T,
    config: SetupConfig,
}

impl<T: Tlcl> Rollback<T> {
    pub fn new(tpm: T) -> Self {
        Self::with_config(tpm, SetupConfig::default())
    }

    pub fn with_config(tpm: T, config: SetupConfig) -> Self {
        Rollback { tpm, config }
    }

    pub fn tpm(&self) -> &T {
        &self.tpm
    }

    pub fn tpm_mut(&mut self) -> &mut T {
        &mut self.tpm
    }

    pub fn into_inner(self) -> T {
        self.tpm
    }

    /// The owner can delete and redefine a PP-protected space at any time,
    /// even without physical presence, though it can't then write it. A
    /// space with the wrong permissions or without our uid was not made by
    /// us.
    fn read_kernel_checked(&mut self) -> Result<KernelSpace> {
        let rsk: KernelSpace = read_space(&mut self.tpm)?;
        let perms = self.tpm.get_permissions(Space::Kernel.nv_index())?;
        if perms != Space::Kernel.permissions() || rsk.uid != ROLLBACK_SPACE_KERNEL_UID {
            debug!(
                "TPM: kernel space not ours (perms {perms:#x}, uid {:#x})",
                rsk.uid
            );
            return Err(Error::CorruptedState);
        }
        Ok(rsk)
    }
}

impl<T: Tlcl> RollbackIndex for Rollback<T> {
    fn s3_resume(&mut self) -> Result<()> {
        self.tpm.lib_init()?;
        match self.tpm.resume() {
            // The TPM kept power through S3 and is already started
            Err(e) if e.is(KnownError::InvalidPostinit) => Ok(()),
            r => Ok(r?),
        }
    }

    fn firmware_setup(
        &mut self,
        recovery_mode: bool,
        hw_dev_sw: bool,
        dev_mode: &mut bool,
    ) -> Result<u32> {
        let rsf = setup_tpm(&mut self.tpm, &self.config, recovery_mode, *dev_mode)?;
        if !hw_dev_sw && rsf.flags().virtual_dev_mode_on() {
            *dev_mode = true;
        }
        debug!("TPM: firmware setup {:x}", rsf.fw_versions);
        Ok(rsf.fw_versions)
    }

    fn firmware_read(&mut self) -> Result<u32> {
        let rsf: FirmwareSpace = read_space(&mut self.tpm)?;
        Ok(rsf.fw_versions)
    }

    fn firmware_write(&mut self, version: u32) -> Result<()> {
        let mut rsf: FirmwareSpace = read_space(&mut self.tpm)?;
        debug!("TPM: firmware write {:x} --> {:x}", rsf.fw_versions, version);
        rsf.fw_versions = version;
        write_space(&mut self.tpm, &mut rsf)
    }

    fn firmware_lock(&mut self) -> Result<()> {
        Ok(self.tpm.set_global_lock()?)
    }

    fn kernel_read(&mut self) -> Result<u32> {
        let rsk = self.read_kernel_checked()?;
        debug!("TPM: kernel read {:x}", rsk.kernel_versions);
        Ok(rsk.kernel_versions)
    }

    fn kernel_write(&mut self, version: u32) -> Result<()> {
        let mut rsk = self.read_kernel_checked()?;
        debug!(
            "TPM: kernel write {:x} --> {:x}",
            rsk.kernel_versions, version
        );
        rsk.kernel_versions = version;
        write_space(&mut self.tpm, &mut rsk)
    }

    fn kernel_lock(&mut self, recovery_mode: bool) -> Result<()> {
        if recovery_mode {
            return Ok(());
        }
        Ok(self.tpm.lock_physical_presence()?)
    }

    fn set_virtual_dev_mode(&mut self, enabled: bool) -> Result<()> {
        let mut rsf: FirmwareSpace = read_space(&mut self.tpm)?;
        let mut flags = rsf.flags();
        if flags.virtual_dev_mode_on() == enabled {
            return Ok(());
        }
        debug!("TPM: virtual developer switch -> {enabled}");
        flags.set_virtual_dev_mode_on(enabled);
        rsf.set_flags(flags);
        write_space(&mut self.tpm, &mut rsf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpm_lite::sim::SimulatedTpm;
    use tpm_lite::{nv_perm, Command};
    use tpm_spaces::RollbackSpace;

    fn booted() -> Rollback<SimulatedTpm> {
        let mut rb = Rollback::new(SimulatedTpm::new());
        let mut dev = false;
        rb.firmware_setup(false, true, &mut dev).unwrap();
        rb.tpm_mut().clear_log();
        rb
    }

    #[test]
    fn counters_start_at_zero() {
        let mut rb = booted();
        assert_eq!(rb.firmware_read().unwrap(), 0);
        assert_eq!(rb.kernel_read().unwrap(), 0);
    }

    #[test]
    fn versions_persist() {
        let mut rb = booted();
        rb.firmware_write(0x0001_0002).unwrap();
        rb.kernel_write(0x0003_0004).unwrap();
        assert_eq!(rb.firmware_read().unwrap(), 0x0001_0002);
        assert_eq!(rb.kernel_read().unwrap(), 0x0003_0004);
    }

    #[test]
    fn kernel_read_checks_permissions() {
        let mut rb = booted();
        let mut rsk = KernelSpace::initial();
        rsk.seal().unwrap();
        let bytes = rsk.to_bytes().unwrap();
        // Redefined by the owner with an extra permission bit
        rb.tpm_mut()
            .plant_space(Space::Kernel.nv_index(), nv_perm::PPWRITE | 0x4, &bytes);
        assert!(matches!(rb.kernel_read(), Err(Error::CorruptedState)));
        assert!(matches!(rb.kernel_write(1), Err(Error::CorruptedState)));
        assert_eq!(rb.tpm().count(Command::Write), 0);
    }

    #[test]
    fn kernel_read_checks_uid() {
        let mut rb = booted();
        let mut rsk = KernelSpace::initial();
        rsk.uid = 0x1234_5678;
        rsk.seal().unwrap();
        let bytes = rsk.to_bytes().unwrap();
        rb.tpm_mut()
            .plant_space(Space::Kernel.nv_index(), nv_perm::PPWRITE, &bytes);
        assert!(matches!(rb.kernel_read(), Err(Error::CorruptedState)));
    }

    #[test]
    fn kernel_lock_outside_recovery() {
        let mut rb = booted();
        rb.kernel_lock(false).unwrap();
        assert_eq!(rb.tpm().log(), &[Command::LockPhysicalPresence]);
        assert!(rb.tpm().is_physical_presence_locked());
        assert!(rb.kernel_write(1).unwrap_err().is_tpm(KnownError::BadPresence));
    }

    #[test]
    fn kernel_lock_in_recovery_is_a_no_op() {
        let mut rb = booted();
        rb.kernel_lock(true).unwrap();
        assert!(rb.tpm().log().is_empty());
        rb.kernel_write(7).unwrap();
    }

    #[test]
    fn firmware_lock() {
        let mut rb = booted();
        rb.firmware_lock().unwrap();
        assert!(rb.tpm().is_global_locked());
        assert!(rb.firmware_write(1).unwrap_err().is_tpm(KnownError::AreaLocked));
        // The kernel space isn't covered by the global lock
        rb.kernel_write(1).unwrap();
    }

    #[test]
    fn resume_after_power_loss() {
        let mut rb = booted();
        rb.tpm_mut().suspend(false);
        rb.s3_resume().unwrap();
        assert!(rb.tpm().is_started());
    }

    #[test]
    fn resume_with_power_kept_is_fine() {
        let mut rb = booted();
        rb.tpm_mut().suspend(true);
        rb.s3_resume().unwrap();
    }

    #[test]
    fn resume_failure_propagates() {
        let mut rb = booted();
        rb.tpm_mut().suspend(false);
        rb.tpm_mut().fail_next(Command::Resume, KnownError::Fail);
        assert!(rb.s3_resume().unwrap_err().is_tpm(KnownError::Fail));
    }

    #[test]
    fn virtual_dev_mode_round_trip() {
        let mut rb = booted();
        rb.set_virtual_dev_mode(true).unwrap();
        assert_eq!(rb.tpm().count(Command::Write), 1);
        rb.set_virtual_dev_mode(true).unwrap();
        assert_eq!(rb.tpm().count(Command::Write), 1);

        rb.tpm_mut().power_cycle();
        let mut dev = false;
        rb.firmware_setup(false, false, &mut dev).unwrap();
        assert!(dev);

        rb.set_virtual_dev_mode(false).unwrap();
        rb.tpm_mut().power_cycle();
        let mut dev = true;
        rb.firmware_setup(false, false, &mut dev).unwrap();
        assert!(dev);
    }

    #[test]
    fn hardware_switch_ignores_virtual_flag() {
        let mut rb = booted();
        rb.set_virtual_dev_mode(true).unwrap();
        rb.tpm_mut().power_cycle();
        let mut dev = false;
        rb.firmware_setup(false, true, &mut dev).unwrap();
        assert!(!dev);
    }

    #[test]
    fn setup_failure_reported() {
        let mut rb = booted();
        rb.tpm_mut().power_cycle();
        rb.tpm_mut().permanent.disable = true;
        let mut dev = false;
        assert!(matches!(
            rb.firmware_setup(false, true, &mut dev),
            Err(Error::MustReboot)
        ));
    }

    #[test]
    fn setup_config_is_honoured() {
        let config = SetupConfig {
            manual_self_test: true,
        };
        let mut rb = Rollback::with_config(SimulatedTpm::new(), config);
        let mut dev = false;
        rb.firmware_setup(false, true, &mut dev).unwrap();
        assert_eq!(rb.into_inner().count(Command::ContinueSelfTest), 1);
    }
}
