// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reading and writing rollback spaces.
//!
//! A bad CRC on read is retried a couple of times before we call the space
//! corrupt: the bus between us and the TPM is not always clean. Writes are
//! read back to make sure what landed in NV is what we meant to put there.

use crate::retry::{bounded, Attempt};
use crate::safe::safe_write;
use crate::{Error, Result};
use log::warn;
use tpm_lite::Tlcl;
use tpm_spaces::{RollbackSpace, CRC_STRUCT_VERSION};

const ATTEMPTS: usize = 3;

pub fn read_space<S: RollbackSpace>(tpm: &mut (impl Tlcl + ?Sized)) -> Result<S> {
    let mut buf = vec![0; S::SIZE];

    let space = bounded(ATTEMPTS, || -> Result<Attempt<S>> {
        tpm.read(S::SPACE.nv_index(), &mut buf)?;
        let mut rs = S::from_bytes(&buf)?;

        // No CRC in this version, so there's nothing to check; one gets added
        // when we next write it. Upgrades go to the first CRC version, not
        // the current one.
        if rs.is_legacy() {
            rs.set_struct_version(CRC_STRUCT_VERSION);
            return Ok(Attempt::Done(rs));
        }

        if rs.has_valid_crc()? {
            return Ok(Attempt::Done(rs));
        }

        warn!("TPM: {} space has a bad CRC", S::SPACE);
        Ok(Attempt::Retry)
    })?;

    space.ok_or_else(|| {
        warn!("TPM: too many bad CRCs on {} space, giving up", S::SPACE);
        Error::CorruptedState
    })
}

/// Seals `rs` (see `RollbackSpace::seal`) and writes it, reading it back to
/// check. A TPM that refuses the write is not asked again; a read-back that
/// doesn't match is retried.
pub fn write_space<S: RollbackSpace>(tpm: &mut (impl Tlcl + ?Sized), rs: &mut S) -> Result<()> {
    rs.seal()?;
    let bytes = rs.to_bytes()?;

    let written = bounded(ATTEMPTS, || -> Result<Attempt<()>> {
        safe_write(tpm, S::SPACE, &bytes)?;

        match read_space::<S>(tpm) {
            Ok(readback) if readback.to_bytes()? == bytes => Ok(Attempt::Done(())),
            Ok(_) => {
                warn!("TPM: {} space read back different contents", S::SPACE);
                Ok(Attempt::Retry)
            }
            Err(Error::CorruptedState) => {
                warn!("TPM: {} space failed to read back", S::SPACE);
                Ok(Attempt::Retry)
            }
            Err(e) => Err(e),
        }
    })?;

    written.ok_or_else(|| {
        warn!("TPM: could not write {} space cleanly, giving up", S::SPACE);
        Error::CorruptedState
    })
}
