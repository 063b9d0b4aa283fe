// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rollback "protection" for platforms that don't have any.
//!
//! Every operation succeeds, every version reads as 0, and the TPM is never
//! touched.

use crate::rollback::RollbackIndex;
use crate::setup::SetupConfig;
use crate::Result;

pub struct DisabledRollback<T> {
    tpm: T,
}

impl<T> DisabledRollback<T> {
    pub fn new(tpm: T) -> Self {
        DisabledRollback { tpm }
    }

    /// Takes a config only so it can be swapped in for `Rollback`; it is
    /// ignored.
    pub fn with_config(tpm: T, _config: SetupConfig) -> Self {
        Self::new(tpm)
    }

    pub fn into_inner(self) -> T {
        self.tpm
    }
}

impl<T> RollbackIndex for DisabledRollback<T> {
    fn s3_resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn firmware_setup(&mut self, _: bool, _: bool, _: &mut bool) -> Result<u32> {
        Ok(0)
    }

    fn firmware_read(&mut self) -> Result<u32> {
        Ok(0)
    }

    fn firmware_write(&mut self, _version: u32) -> Result<()> {
        Ok(())
    }

    fn firmware_lock(&mut self) -> Result<()> {
        Ok(())
    }

    fn kernel_read(&mut self) -> Result<u32> {
        Ok(0)
    }

    fn kernel_write(&mut self, _version: u32) -> Result<()> {
        Ok(())
    }

    fn kernel_lock(&mut self, _recovery_mode: bool) -> Result<()> {
        Ok(())
    }

    fn set_virtual_dev_mode(&mut self, _enabled: bool) -> Result<()> {
        Ok(())
    }
}
