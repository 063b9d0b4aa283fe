// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Anti-rollback counters for verified boot, kept in TPM NV space.
//!
//! The firmware space holds the RW firmware version plus a couple of boot
//! mode flags; the kernel space holds the kernel version. Both are created
//! the first time the device boots (normally in the factory) and checked on
//! every boot after that. Anything that doesn't look exactly like what we
//! wrote is treated as corrupt rather than trusted.

pub mod bootstrap;
pub mod retry;
pub mod rollback;
pub mod safe;
pub mod setup;
pub mod space_io;
pub mod stub;

pub use rollback::{Rollback, RollbackIndex};
pub use setup::SetupConfig;
pub use stub::DisabledRollback;

use tpm_lite::{KnownError, TpmError};

/// The rollback implementation selected for this build.
#[cfg(not(feature = "disable-rollback-tpm"))]
pub type PlatformRollback<T> = Rollback<T>;
#[cfg(feature = "disable-rollback-tpm")]
pub type PlatformRollback<T> = DisabledRollback<T>;

/// Result code for `Error::MustReboot`, matching what firmware reports
pub const TPM_E_MUST_REBOOT: u32 = 0x5002;
/// Result code for `Error::CorruptedState`
pub const TPM_E_CORRUPTED_STATE: u32 = 0x5003;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A space failed its CRC, identity or permission check and retrying
    /// didn't help. Needs the recovery path to fix.
    #[error("rollback space is in a corrupted state")]
    CorruptedState,

    /// The TPM was put right, but the fix only takes effect after a reset.
    #[error("TPM must be rebooted")]
    MustReboot,

    /// Any other TPM failure, passed through untouched
    #[error("TPM error: {0}")]
    Tpm(#[from] TpmError),

    #[error("struct packing error: {0}")]
    PackingError(#[from] packed_struct::PackingError),
}

impl Error {
    /// Numeric result code for callers that keep TPM status as an integer
    pub fn code(&self) -> u32 {
        match self {
            Error::CorruptedState | Error::PackingError(_) => TPM_E_CORRUPTED_STATE,
            Error::MustReboot => TPM_E_MUST_REBOOT,
            Error::Tpm(e) => e.code(),
        }
    }

    pub fn is_tpm(&self, known: KnownError) -> bool {
        matches!(self, Error::Tpm(e) if e.is(known))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
