// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-memory TPM.
//!
//! This models just enough of TPM 1.2 behavior for the rollback code to be
//! exercised off-target: NV spaces with PPWRITE / GLOBALLOCK enforcement once
//! `nvLocked` is set, physical presence (and its per-boot lock), the
//! permanent enable/activate flags, startup ordering, and the NV write budget
//! that an unowned part enforces until it is cleared.
//!
//! On top of that it can be told to misbehave: fail a given command with a
//! given code, or flip bits in data returned from a read. Every command it
//! receives is recorded so tests can check what was (or wasn't) sent.
//!
//! The whole thing is serde-friendly so host tools can keep a simulated
//! device in a file between invocations.

use crate::tlcl::{nv_perm, Command, PermanentFlags, Tlcl};
use crate::error::check;
use crate::{KnownError, TpmError};
use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn one() -> u32 {
    1
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvSpace {
    pub perm: u32,
    pub data: Vec<u8>,
}

/// Fail the next `count` issues of `command` with result `code`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub command: Command,
    pub code: u32,
    #[serde(default = "one")]
    pub count: u32,
}

/// Flip `bit` in the data returned by the next `count` reads of `index`.
/// Stored contents are left alone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCorruption {
    pub index: u32,
    pub bit: usize,
    #[serde(default = "one")]
    pub count: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedTpm {
    pub permanent: PermanentFlags,
    pub spaces: BTreeMap<u32, NvSpace>,
    /// NV writes allowed between clears; `None` means unlimited
    pub nv_write_limit: Option<u32>,
    pub faults: Vec<Fault>,
    pub read_corruptions: Vec<ReadCorruption>,

    nv_writes: u32,

    // ST_CLEAR state, lost on power cycle
    started: bool,
    physical_presence: bool,
    physical_presence_locked: bool,
    global_lock: bool,

    #[serde(skip)]
    log: Vec<Command>,
}

fn flip_bit(data: &mut [u8], bit: usize) {
    if let Some(b) = data.get_mut(bit / 8) {
        *b ^= 1 << (bit % 8);
    }
}

impl SimulatedTpm {
    /// A part straight from the factory: enabled, active, unowned, no
    /// spaces, NV permissions not yet enforced, and the physical presence
    /// command path neither enabled nor locked down.
    pub fn new() -> SimulatedTpm {
        SimulatedTpm::default()
    }

    /// Drops all per-boot state, as a platform reset does.
    pub fn power_cycle(&mut self) {
        self.started = false;
        self.physical_presence = false;
        self.physical_presence_locked = false;
        self.global_lock = false;
    }

    /// Suspend to RAM. A part that keeps power remains started, so a
    /// subsequent `resume` will be refused with `InvalidPostinit`.
    pub fn suspend(&mut self, keep_power: bool) {
        if !keep_power {
            self.started = false;
        }
    }

    pub fn fail_next(&mut self, command: Command, err: impl Into<TpmError>) {
        self.fail_times(command, err, 1);
    }

    pub fn fail_times(&mut self, command: Command, err: impl Into<TpmError>, count: u32) {
        self.faults.push(Fault {
            command,
            code: err.into().code(),
            count,
        });
    }

    pub fn corrupt_reads(&mut self, index: u32, bit: usize, count: u32) {
        self.read_corruptions.push(ReadCorruption { index, bit, count });
    }

    /// Flips a bit in the stored contents of a space, as if the NV cell
    /// itself went bad.
    pub fn flip_stored_bit(&mut self, index: u32, bit: usize) {
        if let Some(space) = self.spaces.get_mut(&index) {
            flip_bit(&mut space.data, bit);
        }
    }

    /// Creates (or replaces) a space without going through the command
    /// interface. This is how a test stands in for whoever defined a space
    /// behind our back.
    pub fn plant_space(&mut self, index: u32, perm: u32, data: &[u8]) {
        self.spaces.insert(
            index,
            NvSpace {
                perm,
                data: data.to_vec(),
            },
        );
    }

    pub fn space(&self, index: u32) -> Option<&NvSpace> {
        self.spaces.get(&index)
    }

    pub fn is_owned(&self) -> bool {
        self.permanent.ownership
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_physical_presence_asserted(&self) -> bool {
        self.physical_presence
    }

    pub fn is_physical_presence_locked(&self) -> bool {
        self.physical_presence_locked
    }

    pub fn is_global_locked(&self) -> bool {
        self.global_lock
    }

    pub fn nv_writes(&self) -> u32 {
        self.nv_writes
    }

    /// Every command received since the last `clear_log`
    pub fn log(&self) -> &[Command] {
        &self.log
    }

    pub fn count(&self, command: Command) -> usize {
        self.log.iter().filter(|&&c| c == command).count()
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    fn enter(&mut self, command: Command) -> Result<(), TpmError> {
        trace!("sim tpm: {command}");
        self.log.push(command);

        if let Some(pos) = self.faults.iter().position(|f| f.command == command) {
            let fault = &mut self.faults[pos];
            let code = fault.code;
            fault.count = fault.count.saturating_sub(1);
            if fault.count == 0 {
                self.faults.remove(pos);
            }
            check(code).map_err(|e| {
                trace!("sim tpm: injecting {e} into {command}");
                e
            })?;
        }

        Ok(())
    }

    fn require_started(&self) -> Result<(), TpmError> {
        if self.started {
            Ok(())
        } else {
            Err(KnownError::InvalidPostinit.into())
        }
    }

    fn require_presence(&self) -> Result<(), TpmError> {
        if self.physical_presence {
            Ok(())
        } else {
            Err(KnownError::BadPresence.into())
        }
    }

    fn spend_nv_write(&mut self) -> Result<(), TpmError> {
        if let Some(limit) = self.nv_write_limit {
            if self.nv_writes >= limit {
                return Err(KnownError::MaxNvWrites.into());
            }
        }
        self.nv_writes += 1;
        Ok(())
    }

    fn apply_read_corruptions(&mut self, index: u32, data: &mut [u8]) {
        for c in self.read_corruptions.iter_mut() {
            if c.index == index && c.count > 0 {
                flip_bit(data, c.bit);
                c.count -= 1;
            }
        }
        self.read_corruptions.retain(|c| c.count > 0);
    }
}

impl Tlcl for SimulatedTpm {
    fn lib_init(&mut self) -> Result<(), TpmError> {
        self.enter(Command::LibInit)
    }

    fn startup(&mut self) -> Result<(), TpmError> {
        self.enter(Command::Startup)?;
        if self.started {
            return Err(KnownError::InvalidPostinit.into());
        }
        self.started = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), TpmError> {
        self.enter(Command::Resume)?;
        if self.started {
            return Err(KnownError::InvalidPostinit.into());
        }
        self.started = true;
        Ok(())
    }

    fn self_test_full(&mut self) -> Result<(), TpmError> {
        self.enter(Command::SelfTestFull)?;
        self.require_started()
    }

    fn continue_self_test(&mut self) -> Result<(), TpmError> {
        self.enter(Command::ContinueSelfTest)?;
        self.require_started()
    }

    fn define_space(&mut self, index: u32, perm: u32, size: u32) -> Result<(), TpmError> {
        self.enter(Command::DefineSpace)?;
        self.require_started()?;
        if self.permanent.nv_locked {
            self.require_presence()?;
        }
        self.spend_nv_write()?;
        self.spaces.insert(
            index,
            NvSpace {
                perm,
                data: vec![0; size as usize],
            },
        );
        Ok(())
    }

    fn write(&mut self, index: u32, data: &[u8]) -> Result<(), TpmError> {
        self.enter(Command::Write)?;
        self.require_started()?;
        let (perm, size) = match self.spaces.get(&index) {
            Some(s) => (s.perm, s.data.len()),
            None => return Err(KnownError::BadIndex.into()),
        };
        if self.permanent.nv_locked {
            if perm & nv_perm::PPWRITE != 0 {
                self.require_presence()?;
            }
            if perm & nv_perm::GLOBALLOCK != 0 && self.global_lock {
                return Err(KnownError::AreaLocked.into());
            }
        }
        if data.len() > size {
            return Err(KnownError::NoSpace.into());
        }
        self.spend_nv_write()?;
        if let Some(s) = self.spaces.get_mut(&index) {
            s.data[..data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn read(&mut self, index: u32, data: &mut [u8]) -> Result<(), TpmError> {
        self.enter(Command::Read)?;
        self.require_started()?;
        let space = self
            .spaces
            .get(&index)
            .ok_or(TpmError::Known(KnownError::BadIndex))?;
        if data.len() > space.data.len() {
            return Err(KnownError::NoSpace.into());
        }
        data.copy_from_slice(&space.data[..data.len()]);
        self.apply_read_corruptions(index, data);
        Ok(())
    }

    fn get_permissions(&mut self, index: u32) -> Result<u32, TpmError> {
        self.enter(Command::GetPermissions)?;
        self.require_started()?;
        self.spaces
            .get(&index)
            .map(|s| s.perm)
            .ok_or(TpmError::Known(KnownError::BadIndex))
    }

    fn assert_physical_presence(&mut self) -> Result<(), TpmError> {
        self.enter(Command::AssertPhysicalPresence)?;
        self.require_started()?;
        if self.physical_presence_locked || !self.permanent.physical_presence_cmd_enable {
            return Err(KnownError::BadParameter.into());
        }
        self.physical_presence = true;
        Ok(())
    }

    fn physical_presence_cmd_enable(&mut self) -> Result<(), TpmError> {
        self.enter(Command::PhysicalPresenceCmdEnable)?;
        self.require_started()?;
        if self.permanent.physical_presence_lifetime_lock
            && !self.permanent.physical_presence_cmd_enable
        {
            return Err(KnownError::BadParameter.into());
        }
        self.permanent.physical_presence_cmd_enable = true;
        Ok(())
    }

    fn finalize_physical_presence(&mut self) -> Result<(), TpmError> {
        self.enter(Command::FinalizePhysicalPresence)?;
        self.require_started()?;
        if self.permanent.physical_presence_lifetime_lock {
            return Err(KnownError::BadParameter.into());
        }
        self.permanent.physical_presence_cmd_enable = true;
        self.permanent.physical_presence_hw_enable = false;
        self.permanent.physical_presence_lifetime_lock = true;
        Ok(())
    }

    fn lock_physical_presence(&mut self) -> Result<(), TpmError> {
        self.enter(Command::LockPhysicalPresence)?;
        self.require_started()?;
        self.physical_presence = false;
        self.physical_presence_locked = true;
        Ok(())
    }

    fn set_nv_locked(&mut self) -> Result<(), TpmError> {
        self.enter(Command::SetNvLocked)?;
        self.require_started()?;
        self.permanent.nv_locked = true;
        Ok(())
    }

    fn force_clear(&mut self) -> Result<(), TpmError> {
        self.enter(Command::ForceClear)?;
        self.require_started()?;
        self.require_presence()?;
        // A clear leaves the part disabled and deactivated, and starts a new
        // NV write epoch. PP-protected spaces survive.
        self.permanent.ownership = false;
        self.permanent.disable = true;
        self.permanent.deactivated = true;
        self.nv_writes = 0;
        Ok(())
    }

    fn set_enable(&mut self) -> Result<(), TpmError> {
        self.enter(Command::SetEnable)?;
        self.require_started()?;
        self.require_presence()?;
        self.permanent.disable = false;
        Ok(())
    }

    fn set_deactivated(&mut self, deactivated: bool) -> Result<(), TpmError> {
        self.enter(Command::SetDeactivated)?;
        self.require_started()?;
        self.require_presence()?;
        self.permanent.deactivated = deactivated;
        Ok(())
    }

    fn get_permanent_flags(&mut self) -> Result<PermanentFlags, TpmError> {
        self.enter(Command::GetPermanentFlags)?;
        self.require_started()?;
        Ok(self.permanent)
    }

    fn set_global_lock(&mut self) -> Result<(), TpmError> {
        self.enter(Command::SetGlobalLock)?;
        self.require_started()?;
        self.global_lock = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: u32 = 0x1007;

    fn started() -> SimulatedTpm {
        let mut tpm = SimulatedTpm::new();
        tpm.lib_init().unwrap();
        tpm.startup().unwrap();
        tpm.physical_presence_cmd_enable().unwrap();
        tpm.assert_physical_presence().unwrap();
        tpm
    }

    #[test]
    fn commands_before_startup_are_refused() {
        let mut tpm = SimulatedTpm::new();
        let mut buf = [0; 4];
        assert_eq!(
            tpm.read(INDEX, &mut buf),
            Err(TpmError::Known(KnownError::InvalidPostinit))
        );
    }

    #[test]
    fn second_startup_is_refused() {
        let mut tpm = started();
        assert_eq!(
            tpm.startup(),
            Err(TpmError::Known(KnownError::InvalidPostinit))
        );
        tpm.power_cycle();
        assert!(tpm.startup().is_ok());
    }

    #[test]
    fn resume_after_keeping_power_is_refused() {
        let mut tpm = started();
        tpm.suspend(true);
        assert_eq!(
            tpm.resume(),
            Err(TpmError::Known(KnownError::InvalidPostinit))
        );

        tpm.suspend(false);
        assert!(tpm.resume().is_ok());
    }

    #[test]
    fn undefined_space() {
        let mut tpm = started();
        let mut buf = [0; 4];
        assert_eq!(
            tpm.read(INDEX, &mut buf),
            Err(TpmError::Known(KnownError::BadIndex))
        );
        assert_eq!(
            tpm.write(INDEX, &buf),
            Err(TpmError::Known(KnownError::BadIndex))
        );
    }

    #[test]
    fn write_then_read() {
        let mut tpm = started();
        tpm.define_space(INDEX, nv_perm::PPWRITE, 4).unwrap();
        tpm.write(INDEX, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0; 4];
        tpm.read(INDEX, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn ppwrite_enforced_once_nv_locked() {
        let mut tpm = started();
        tpm.set_nv_locked().unwrap();
        tpm.define_space(INDEX, nv_perm::PPWRITE, 4).unwrap();
        tpm.lock_physical_presence().unwrap();
        assert_eq!(
            tpm.write(INDEX, &[0; 4]),
            Err(TpmError::Known(KnownError::BadPresence))
        );
        assert_eq!(
            tpm.assert_physical_presence(),
            Err(TpmError::Known(KnownError::BadParameter))
        );
    }

    #[test]
    fn global_lock_enforced_until_power_cycle() {
        let mut tpm = started();
        tpm.set_nv_locked().unwrap();
        tpm.define_space(INDEX, nv_perm::GLOBALLOCK | nv_perm::PPWRITE, 4)
            .unwrap();
        tpm.set_global_lock().unwrap();
        assert_eq!(
            tpm.write(INDEX, &[0; 4]),
            Err(TpmError::Known(KnownError::AreaLocked))
        );

        tpm.power_cycle();
        tpm.startup().unwrap();
        tpm.assert_physical_presence().unwrap();
        assert!(tpm.write(INDEX, &[0; 4]).is_ok());
    }

    #[test]
    fn write_budget_resets_on_clear() {
        let mut tpm = started();
        tpm.nv_write_limit = Some(2);
        tpm.define_space(INDEX, nv_perm::PPWRITE, 4).unwrap();
        tpm.write(INDEX, &[0; 4]).unwrap();
        assert_eq!(
            tpm.write(INDEX, &[0; 4]),
            Err(TpmError::Known(KnownError::MaxNvWrites))
        );

        tpm.force_clear().unwrap();
        assert!(tpm.permanent.disable);
        assert!(tpm.permanent.deactivated);
        assert!(tpm.write(INDEX, &[0; 4]).is_ok());
    }

    #[test]
    fn injected_faults_are_consumed() {
        let mut tpm = started();
        tpm.fail_times(Command::SetGlobalLock, KnownError::IoError, 2);
        assert!(tpm.set_global_lock().is_err());
        assert!(tpm.set_global_lock().is_err());
        assert!(tpm.set_global_lock().is_ok());
        assert_eq!(tpm.count(Command::SetGlobalLock), 3);
        assert!(tpm.faults.is_empty());
    }

    #[test]
    fn injected_codes_keep_their_meaning() {
        let mut tpm = started();
        tpm.faults.push(Fault {
            command: Command::SetGlobalLock,
            code: 0,
            count: 1,
        });
        tpm.faults.push(Fault {
            command: Command::ForceClear,
            code: 0x123,
            count: 1,
        });

        // A scripted TPM_SUCCESS is no fault at all
        assert!(tpm.set_global_lock().is_ok());
        assert!(tpm.is_global_locked());

        assert_eq!(tpm.force_clear(), Err(TpmError::GenericErrorCode(0x123)));
        assert!(!tpm.permanent.disable);
    }

    #[test]
    fn read_corruption_is_transient() {
        let mut tpm = started();
        tpm.define_space(INDEX, 0, 2).unwrap();
        tpm.write(INDEX, &[0, 0]).unwrap();
        tpm.corrupt_reads(INDEX, 9, 1);

        let mut buf = [0; 2];
        tpm.read(INDEX, &mut buf).unwrap();
        assert_eq!(buf, [0, 2]);
        tpm.read(INDEX, &mut buf).unwrap();
        assert_eq!(buf, [0, 0]);
        assert_eq!(tpm.space(INDEX).unwrap().data, vec![0, 0]);
    }

    #[test]
    fn finalize_locks_presence_configuration() {
        let mut tpm = started();
        tpm.finalize_physical_presence().unwrap();
        assert!(tpm.permanent.physical_presence_lifetime_lock);
        assert!(tpm.permanent.physical_presence_cmd_enable);
        assert!(!tpm.permanent.physical_presence_hw_enable);
        assert_eq!(
            tpm.finalize_physical_presence(),
            Err(TpmError::Known(KnownError::BadParameter))
        );
    }
}
