// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use thiserror::Error;

pub const TPM_SUCCESS: u32 = 0;

/// Describes a non-success status returned by a TPM command.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum TpmError {
    /// In cases where we can sucessfully turn the numeric status into a
    /// `KnownError`, we'll do so and use this variant.
    #[error(transparent)]
    Known(#[from] KnownError),

    /// Everything else. The rollback code never needs to tell these apart,
    /// it just hands them back to the caller.
    #[error("TPM returned error {0:#x}")]
    GenericErrorCode(u32),
}

impl TpmError {
    /// Turns a raw TPM result code into an error. `TPM_SUCCESS` is not an
    /// error, so it yields `None`.
    pub fn from_code(code: u32) -> Option<TpmError> {
        if code == TPM_SUCCESS {
            None
        } else if let Some(e) = KnownError::from_u32(code) {
            Some(TpmError::Known(e))
        } else {
            Some(TpmError::GenericErrorCode(code))
        }
    }

    /// The raw result code, as the TPM would have reported it.
    pub fn code(&self) -> u32 {
        match self {
            TpmError::Known(e) => e.to_u32().unwrap_or_default(),
            TpmError::GenericErrorCode(c) => *c,
        }
    }

    pub fn is(&self, known: KnownError) -> bool {
        *self == TpmError::Known(known)
    }
}

/// Converts a raw result code into a `Result`.
pub fn check(code: u32) -> Result<(), TpmError> {
    match TpmError::from_code(code) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Result codes that we hit often enough to give them names.
///
/// Values below 0x800 come from the TPM 1.2 main specification, part 2,
/// section 16. The 0x5000 range is reserved for errors raised by the host
/// side of the command library rather than by the part itself.
#[derive(Debug, FromPrimitive, Copy, Clone, Eq, PartialEq, ToPrimitive, Error)]
pub enum KnownError {
    #[error("Authentication failed (err 0x1)")]
    AuthFail = 0x1,
    #[error("NV index is not defined (err 0x2)")]
    BadIndex = 0x2,
    #[error("Bad parameter (err 0x3)")]
    BadParameter = 0x3,
    #[error("TPM is deactivated (err 0x6)")]
    Deactivated = 0x6,
    #[error("TPM is disabled (err 0x7)")]
    Disabled = 0x7,
    #[error("Operation failed (err 0x9)")]
    Fail = 0x9,
    #[error("No room in the NV area (err 0x11)")]
    NoSpace = 0x11,
    #[error("TPM already has an owner (err 0x14)")]
    OwnerSet = 0x14,
    #[error("I/O error (err 0x1f)")]
    IoError = 0x1f,
    #[error("Command issued before or after TPM_Startup (err 0x26)")]
    InvalidPostinit = 0x26,
    #[error("Physical presence is not asserted (err 0x2d)")]
    BadPresence = 0x2d,
    #[error("NV area is locked (err 0x3c)")]
    AreaLocked = 0x3c,
    #[error("NV write budget exhausted; clear the TPM (err 0x48)")]
    MaxNvWrites = 0x48,
    #[error("Could not talk to the TPM (err 0x5004)")]
    CommunicationError = 0x5004,
    #[error("No TPM device (err 0x5006)")]
    NoDevice = 0x5006,
}
