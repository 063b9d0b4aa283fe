// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The small slice of the TPM 1.2 command set that verified boot needs in
//! order to keep its rollback counters, and an in-memory model of a TPM that
//! answers those commands for tests and host tooling.

pub mod error;
pub mod sim;
pub mod tlcl;

pub use error::{KnownError, TpmError};
pub use tlcl::{nv_perm, Command, PermanentFlags, Tlcl, TpmFlags};
