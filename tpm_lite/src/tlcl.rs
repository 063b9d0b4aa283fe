// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::TpmError;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Permission bits for NV spaces (`TPM_NV_PER_*`)
pub mod nv_perm {
    /// Writing requires physical presence
    pub const PPWRITE: u32 = 0x0000_0001;
    /// Writes are refused once `TPM_SetGlobalLock` has been issued this boot
    pub const GLOBALLOCK: u32 = 0x0000_8000;
}

/// The subset of `TPM_PERMANENT_FLAGS` we care about
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermanentFlags {
    pub disable: bool,
    pub ownership: bool,
    pub deactivated: bool,
    pub physical_presence_lifetime_lock: bool,
    pub physical_presence_hw_enable: bool,
    pub physical_presence_cmd_enable: bool,
    pub nv_locked: bool,
}

/// What `get_flags` reports: whether the part is usable at all
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TpmFlags {
    pub disabled: bool,
    pub deactivated: bool,
}

/// Names for each TPM operation, used for tracing and fault injection
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Command {
    LibInit,
    Startup,
    Resume,
    SelfTestFull,
    ContinueSelfTest,
    DefineSpace,
    Write,
    Read,
    GetPermissions,
    AssertPhysicalPresence,
    PhysicalPresenceCmdEnable,
    FinalizePhysicalPresence,
    LockPhysicalPresence,
    SetNvLocked,
    ForceClear,
    SetEnable,
    SetDeactivated,
    GetPermanentFlags,
    SetGlobalLock,
}

/// TPM lite command library.
///
/// Every method maps to one TPM command (or a short fixed sequence of them)
/// and blocks until the part answers. Implementations talk to real hardware;
/// `crate::sim::SimulatedTpm` answers from memory.
pub trait Tlcl {
    /// Prepares the transport. Must be called before anything else.
    fn lib_init(&mut self) -> Result<(), TpmError>;

    /// `TPM_Startup(ST_CLEAR)`
    fn startup(&mut self) -> Result<(), TpmError>;

    /// `TPM_Startup(ST_STATE)`, issued when coming back from suspend
    fn resume(&mut self) -> Result<(), TpmError>;

    fn self_test_full(&mut self) -> Result<(), TpmError>;

    fn continue_self_test(&mut self) -> Result<(), TpmError>;

    fn define_space(&mut self, index: u32, perm: u32, size: u32) -> Result<(), TpmError>;

    fn write(&mut self, index: u32, data: &[u8]) -> Result<(), TpmError>;

    /// Fills all of `data` from the start of the space
    fn read(&mut self, index: u32, data: &mut [u8]) -> Result<(), TpmError>;

    fn get_permissions(&mut self, index: u32) -> Result<u32, TpmError>;

    fn assert_physical_presence(&mut self) -> Result<(), TpmError>;

    /// Turns on the software physical presence command path
    fn physical_presence_cmd_enable(&mut self) -> Result<(), TpmError>;

    /// Enables the command path, disables the hardware path, and sets the
    /// lifetime lock so neither can change again
    fn finalize_physical_presence(&mut self) -> Result<(), TpmError>;

    /// Deasserts physical presence and blocks reasserting it until reboot
    fn lock_physical_presence(&mut self) -> Result<(), TpmError>;

    /// Makes the TPM start enforcing NV permissions. Permanent.
    fn set_nv_locked(&mut self) -> Result<(), TpmError>;

    fn force_clear(&mut self) -> Result<(), TpmError>;

    fn set_enable(&mut self) -> Result<(), TpmError>;

    fn set_deactivated(&mut self, deactivated: bool) -> Result<(), TpmError>;

    fn get_permanent_flags(&mut self) -> Result<PermanentFlags, TpmError>;

    fn get_flags(&mut self) -> Result<TpmFlags, TpmError> {
        let pflags = self.get_permanent_flags()?;
        Ok(TpmFlags {
            disabled: pflags.disable,
            deactivated: pflags.deactivated,
        })
    }

    fn set_global_lock(&mut self) -> Result<(), TpmError>;
}
