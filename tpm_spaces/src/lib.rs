// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Layouts of the two TPM NV spaces that hold the rollback counters.
//!
//! Both layouts are packed, multi-byte integers are little endian, and the
//! final byte is a CRC-8 over everything before it. Spaces written before
//! the CRC was introduced carry a `struct_version` below 2 and no valid
//! checksum.

use bitfield::bitfield;
use packed_struct::prelude::*;
use strum_macros::{Display, EnumString};
use tpm_lite::nv_perm;

pub mod crc;

pub use crc::crc8;

pub const FIRMWARE_NV_INDEX: u32 = 0x1007;
pub const KERNEL_NV_INDEX: u32 = 0x1008;

/// The first `struct_version` that carries a `crc8`
pub const CRC_STRUCT_VERSION: u8 = 2;

pub const ROLLBACK_SPACE_FIRMWARE_VERSION: u8 = 2;
pub const ROLLBACK_SPACE_KERNEL_VERSION: u8 = 2;

/// 'GRWL'. Only we put this in the kernel space; anyone redefining the space
/// from scratch would have to know to put it back.
pub const ROLLBACK_SPACE_KERNEL_UID: u32 = 0x4752_574C;

/// The two NV spaces this crate knows about
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Space {
    Firmware,
    Kernel,
}

impl Space {
    pub fn nv_index(self) -> u32 {
        match self {
            Space::Firmware => FIRMWARE_NV_INDEX,
            Space::Kernel => KERNEL_NV_INDEX,
        }
    }

    /// Permissions the space is defined with. The firmware space can be
    /// locked for the rest of the boot by a global lock; the kernel space
    /// stays writable by whoever holds physical presence.
    pub fn permissions(self) -> u32 {
        match self {
            Space::Firmware => nv_perm::GLOBALLOCK | nv_perm::PPWRITE,
            Space::Kernel => nv_perm::PPWRITE,
        }
    }

    pub fn size(self) -> usize {
        match self {
            Space::Firmware => FirmwareSpace::SIZE,
            Space::Kernel => KernelSpace::SIZE,
        }
    }
}

bitfield! {
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct FirmwareFlags(u8);
    impl Debug;

    /// The previous boot was in developer mode
    pub last_boot_developer, set_last_boot_developer: 0;
    /// The virtual developer switch has been turned on
    pub virtual_dev_mode_on, set_virtual_dev_mode_on: 1;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, PackedStruct)]
#[packed_struct(size_bytes = "10", bit_numbering = "msb0")]
pub struct FirmwareSpace {
    pub struct_version: u8,

    /// See `FirmwareFlags`
    pub flags: u8,

    // Rollback counter for the RW firmware
    #[packed_field(endian = "lsb")]
    pub fw_versions: u32,

    pub reserved: [u8; 3],

    pub crc8: u8,
}

impl FirmwareSpace {
    pub const SIZE: usize = 10;

    pub fn flags(&self) -> FirmwareFlags {
        FirmwareFlags(self.flags)
    }

    pub fn set_flags(&mut self, flags: FirmwareFlags) {
        self.flags = flags.0;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, PackedStruct)]
#[packed_struct(size_bytes = "13", bit_numbering = "msb0")]
pub struct KernelSpace {
    pub struct_version: u8,

    /// Must be `ROLLBACK_SPACE_KERNEL_UID`
    #[packed_field(endian = "lsb")]
    pub uid: u32,

    // Rollback counter for the kernel
    #[packed_field(endian = "lsb")]
    pub kernel_versions: u32,

    pub reserved: [u8; 3],

    pub crc8: u8,
}

impl KernelSpace {
    pub const SIZE: usize = 13;
}

/// What the rollback code needs to know about a space in order to read,
/// check and write it without caring which one it is.
pub trait RollbackSpace: PackedStruct + Clone + std::fmt::Debug {
    const SPACE: Space;
    const SIZE: usize;

    /// Contents written the first time the space is created
    fn initial() -> Self;

    fn struct_version(&self) -> u8;
    fn set_struct_version(&mut self, version: u8);
    fn crc8(&self) -> u8;
    fn set_crc8(&mut self, crc: u8);

    fn to_bytes(&self) -> Result<Vec<u8>, PackingError> {
        let mut bytes = vec![0; Self::SIZE];
        self.pack_to_slice(&mut bytes)?;
        Ok(bytes)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, PackingError> {
        Self::unpack_from_slice(bytes)
    }

    /// crc8 over every byte before the crc field
    fn compute_crc8(&self) -> Result<u8, PackingError> {
        let bytes = self.to_bytes()?;
        Ok(crc8(&bytes[..Self::SIZE - 1]))
    }

    /// Written before the CRC existed, so there is nothing to check
    fn is_legacy(&self) -> bool {
        self.struct_version() < CRC_STRUCT_VERSION
    }

    fn has_valid_crc(&self) -> Result<bool, PackingError> {
        Ok(self.compute_crc8()? == self.crc8())
    }

    /// Brings `struct_version` up to at least `CRC_STRUCT_VERSION` and
    /// recomputes `crc8`. Everything that goes to the TPM is sealed first.
    fn seal(&mut self) -> Result<(), PackingError> {
        if self.is_legacy() {
            self.set_struct_version(CRC_STRUCT_VERSION);
        }
        let crc = self.compute_crc8()?;
        self.set_crc8(crc);
        Ok(())
    }
}

impl RollbackSpace for FirmwareSpace {
    const SPACE: Space = Space::Firmware;
    const SIZE: usize = FirmwareSpace::SIZE;

    fn initial() -> Self {
        FirmwareSpace {
            struct_version: ROLLBACK_SPACE_FIRMWARE_VERSION,
            ..Default::default()
        }
    }

    fn struct_version(&self) -> u8 {
        self.struct_version
    }

    fn set_struct_version(&mut self, version: u8) {
        self.struct_version = version;
    }

    fn crc8(&self) -> u8 {
        self.crc8
    }

    fn set_crc8(&mut self, crc: u8) {
        self.crc8 = crc;
    }
}

impl RollbackSpace for KernelSpace {
    const SPACE: Space = Space::Kernel;
    const SIZE: usize = KernelSpace::SIZE;

    fn initial() -> Self {
        KernelSpace {
            struct_version: ROLLBACK_SPACE_KERNEL_VERSION,
            uid: ROLLBACK_SPACE_KERNEL_UID,
            ..Default::default()
        }
    }

    fn struct_version(&self) -> u8 {
        self.struct_version
    }

    fn set_struct_version(&mut self, version: u8) {
        self.struct_version = version;
    }

    fn crc8(&self) -> u8 {
        self.crc8
    }

    fn set_crc8(&mut self, crc: u8) {
        self.crc8 = crc;
    }
}
