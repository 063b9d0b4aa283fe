// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bringing the TPM up at boot and establishing the rollback root of trust.
//!
//! Setup can fail because of a bug, a hardware fault, or a TPM left in an
//! unexpected state by an attacker, and there's no telling these apart from
//! here. Every failure is handed back to the caller, which is expected to
//! reboot into recovery; recovery runs the same sequence again.

use crate::bootstrap::one_time_initialize;
use crate::safe::clear_and_reenable;
use crate::space_io::{read_space, write_space};
use crate::{Error, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use tpm_lite::{KnownError, Tlcl};
use tpm_spaces::{FirmwareFlags, FirmwareSpace};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    /// Issue `TPM_ContinueSelfTest` after startup. Parts that start their
    /// self test at power on don't need it, and on some parts it blocks.
    pub manual_self_test: bool,
}

impl Default for SetupConfig {
    fn default() -> Self {
        SetupConfig {
            manual_self_test: cfg!(feature = "tpm-manual-selftest"),
        }
    }
}

/// Starts the TPM and returns the firmware space, creating both spaces if
/// this is the first boot.
///
/// `developer_mode` is the hardware developer switch; a virtual switch
/// recorded in the firmware space also counts.
pub fn setup_tpm<T: Tlcl + ?Sized>(
    tpm: &mut T,
    config: &SetupConfig,
    recovery_mode: bool,
    developer_mode: bool,
) -> Result<FirmwareSpace> {
    debug!("TPM: setup (recovery={recovery_mode}, developer={developer_mode})");

    tpm.lib_init()?;

    match tpm.startup() {
        Ok(()) => (),
        // Some boards don't reset the TPM along with the CPU
        Err(e) if e.is(KnownError::InvalidPostinit) => {
            debug!("TPM: soft reset detected");
            return Err(Error::MustReboot);
        }
        Err(e) => {
            debug!("TPM: startup returned {e}");
            return Err(e.into());
        }
    }

    if config.manual_self_test {
        tpm.continue_self_test()?;
    }

    if tpm.assert_physical_presence().is_err() {
        // The part may have shipped with the PP command path disabled
        tpm.physical_presence_cmd_enable()?;
        tpm.assert_physical_presence()?;
    }

    let flags = tpm.get_flags()?;
    if flags.disabled || flags.deactivated {
        debug!(
            "TPM: disabled ({}) or deactivated ({}), fixing",
            flags.disabled, flags.deactivated
        );
        tpm.set_enable()?;
        tpm.set_deactivated(false)?;
        debug!("TPM: must reboot to re-enable");
        return Err(Error::MustReboot);
    }

    let mut rsf = match read_space::<FirmwareSpace>(tpm) {
        Ok(rsf) => rsf,
        Err(e) if e.is_tpm(KnownError::BadIndex) => {
            debug!("TPM: not initialized yet");
            one_time_initialize(tpm)?.0
        }
        Err(e) => {
            debug!("TPM: firmware space in a bad state ({e}), giving up");
            return Err(Error::CorruptedState);
        }
    };
    debug!(
        "TPM: firmware space sv{} f{:x} v{:x}",
        rsf.struct_version, rsf.flags, rsf.fw_versions
    );

    let old = rsf.flags();

    // The virtual switch can only be turned on by the keyboard dance, so it
    // adds to the hardware switch rather than replacing it.
    let developer_mode = developer_mode || old.virtual_dev_mode_on();

    if developer_mode != old.last_boot_developer() {
        debug!("TPM: developer flag changed, clearing owner");
        clear_and_reenable(tpm)?;
    }

    let mut new = FirmwareFlags(0);
    new.set_last_boot_developer(developer_mode);
    new.set_virtual_dev_mode_on(old.virtual_dev_mode_on());

    if new != old {
        rsf.set_flags(new);
        debug!("TPM: updating firmware space");
        write_space(tpm, &mut rsf)?;
    }

    debug!("TPM: setup succeeded");
    Ok(rsf)
}
