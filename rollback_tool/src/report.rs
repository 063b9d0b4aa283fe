// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::Result;
use colored::{ColoredString, Colorize};
use tpm_lite::sim::SimulatedTpm;
use tpm_spaces::{FirmwareSpace, KernelSpace, RollbackSpace, Space, ROLLBACK_SPACE_KERNEL_UID};

fn yes_no(b: bool) -> ColoredString {
    if b {
        "yes".green()
    } else {
        "no".normal()
    }
}

fn crc_status<S: RollbackSpace>(rs: &S) -> Result<ColoredString> {
    Ok(if rs.is_legacy() {
        "none (legacy)".yellow()
    } else if rs.has_valid_crc()? {
        "ok".green()
    } else {
        "BAD".red()
    })
}

/// Prints a raw space image and what it decodes to
pub fn print_space(space: Space, perm: Option<u32>, data: &[u8]) -> Result<()> {
    println!(
        "{} space @ {:#06x}",
        space.to_string().bold(),
        space.nv_index()
    );
    if let Some(perm) = perm {
        let perm_status = if perm == space.permissions() {
            "ok".green()
        } else {
            "UNEXPECTED".red()
        };
        println!("  perm:            {perm:#010x} ({perm_status})");
    }
    println!("  raw:             {}", hex::encode(data));

    if data.len() != space.size() {
        println!(
            "  {}: expected {} bytes, got {}",
            "BAD SIZE".red(),
            space.size(),
            data.len()
        );
        return Ok(());
    }

    match space {
        Space::Firmware => {
            let rsf = FirmwareSpace::from_bytes(data)?;
            let flags = rsf.flags();
            println!("  struct_version:  {}", rsf.struct_version);
            println!("  flags:           {:#04x}", rsf.flags);
            println!(
                "    last boot developer: {}",
                yes_no(flags.last_boot_developer())
            );
            println!(
                "    virtual dev switch:  {}",
                yes_no(flags.virtual_dev_mode_on())
            );
            println!("  fw_versions:     {:#010x}", rsf.fw_versions);
            println!("  crc8:            {:#04x} ({})", rsf.crc8, crc_status(&rsf)?);
        }
        Space::Kernel => {
            let rsk = KernelSpace::from_bytes(data)?;
            let uid_status = if rsk.uid == ROLLBACK_SPACE_KERNEL_UID {
                "ok".green()
            } else {
                "UNEXPECTED".red()
            };
            println!("  struct_version:  {}", rsk.struct_version);
            println!("  uid:             {:#010x} ({uid_status})", rsk.uid);
            println!("  kernel_versions: {:#010x}", rsk.kernel_versions);
            println!("  crc8:            {:#04x} ({})", rsk.crc8, crc_status(&rsk)?);
        }
    }

    Ok(())
}

pub fn dump(tpm: &SimulatedTpm) -> Result<()> {
    let p = &tpm.permanent;
    println!("{}", "TPM".bold());
    println!("  enabled:         {}", yes_no(!p.disable));
    println!("  activated:       {}", yes_no(!p.deactivated));
    println!("  owned:           {}", yes_no(p.ownership));
    println!("  nv locked:       {}", yes_no(p.nv_locked));
    println!(
        "  pp lifetime lock: {}",
        yes_no(p.physical_presence_lifetime_lock)
    );
    println!("  pp cmd enable:   {}", yes_no(p.physical_presence_cmd_enable));
    println!("  started:         {}", yes_no(tpm.is_started()));
    println!(
        "  pp asserted:     {}",
        yes_no(tpm.is_physical_presence_asserted())
    );
    println!(
        "  pp locked:       {}",
        yes_no(tpm.is_physical_presence_locked())
    );
    println!("  global lock:     {}", yes_no(tpm.is_global_locked()));
    match tpm.nv_write_limit {
        Some(limit) => println!("  nv writes:       {} of {limit}", tpm.nv_writes()),
        None => println!("  nv writes:       {}", tpm.nv_writes()),
    }

    for space in [Space::Firmware, Space::Kernel] {
        match tpm.space(space.nv_index()) {
            Some(s) => print_space(space, Some(s.perm), &s.data)?,
            None => println!("{} space: {}", space.to_string().bold(), "not defined".yellow()),
        }
    }

    Ok(())
}
