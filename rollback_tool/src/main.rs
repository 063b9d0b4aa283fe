// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use log::info;
use rollback_index::{PlatformRollback, RollbackIndex, SetupConfig};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tpm_lite::sim::SimulatedTpm;
use tpm_spaces::Space;

mod report;

/// Contents of the `--config` file
#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
struct ToolConfig {
    setup: SetupConfig,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Debug, Parser)]
enum Command {
    /// Create a new simulated TPM, straight from the factory
    Init {
        /// TOML file describing the part (flags, NV write budget, faults)
        #[clap(long)]
        profile: Option<PathBuf>,

        /// Replace an existing state file
        #[clap(short, long)]
        force: bool,
    },
    /// Reset the platform, dropping all per-boot TPM state
    PowerCycle,
    /// Suspend to RAM
    Suspend {
        /// The TPM stays powered (and started) while suspended
        #[clap(long)]
        keep_power: bool,
    },
    /// Print the TPM state and both rollback spaces
    Dump,
    /// Decode and check a raw space image
    Decode {
        /// `firmware` or `kernel`
        space: Space,
        file: PathBuf,
    },
    /// Print the effective configuration as TOML
    Config,
    #[clap(flatten)]
    Rollback(RollbackCommand),
}

#[derive(Debug, Parser)]
enum RollbackCommand {
    /// Boot-time TPM setup; prints the firmware version
    Setup {
        #[clap(long)]
        recovery: bool,

        /// The board has a hardware developer switch
        #[clap(long)]
        hw_dev_switch: bool,

        /// Developer switch position
        #[clap(long)]
        dev: bool,
    },
    /// Resume from suspend to RAM
    Resume,
    FirmwareRead,
    FirmwareWrite {
        #[arg(value_parser = parse_int::parse::<u32>)]
        version: u32,
    },
    /// Block firmware space writes until the next power cycle
    FirmwareLock,
    KernelRead,
    KernelWrite {
        #[arg(value_parser = parse_int::parse::<u32>)]
        version: u32,
    },
    /// Give up physical presence for the rest of this boot
    KernelLock {
        #[clap(long)]
        recovery: bool,
    },
    /// Turn the virtual developer switch on or off
    SetVirtualDev { switch: Switch },
}

#[derive(Debug, Parser)]
#[clap(name = "rollback-tool", max_term_width = 80)]
struct Opts {
    /// Simulated TPM state, kept between runs
    #[clap(short, long, default_value = "tpm.json")]
    state: PathBuf,

    /// TOML file with a `[setup]` table
    #[clap(short, long)]
    config: Option<PathBuf>,

    #[clap(short, long)]
    verbose: bool,

    #[clap(subcommand)]
    cmd: Command,
}

/// Which layer a log line came from: the simulated part, the rollback
/// library, or this tool
fn source_tag(target: &str) -> &'static str {
    match target.split("::").next() {
        Some("tpm_lite") => "tpm",
        Some("rollback_index") => "rollback",
        _ => "tool",
    }
}

/// The rollback library's step trace is shown by default; `--verbose` adds
/// every command the simulated part receives.
fn init_logger(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.format(|buf, record| {
        let mut style = buf.style();
        match record.level() {
            log::Level::Error => style.set_color(env_logger::fmt::Color::Red).set_bold(true),
            log::Level::Warn => style.set_color(env_logger::fmt::Color::Yellow),
            log::Level::Trace => style.set_color(env_logger::fmt::Color::Blue),
            log::Level::Info | log::Level::Debug => &mut style,
        };

        let tag = source_tag(record.target());
        writeln!(
            buf,
            "{:>8} | {}",
            style.value(tag),
            record.args().to_string().replace('\n', "\n         | ")
        )
    });

    if verbose {
        builder.filter(None, log::LevelFilter::Trace);
    } else {
        builder
            .filter(None, log::LevelFilter::Info)
            .filter(Some("rollback_index"), log::LevelFilter::Debug);
    }
    builder.init();
}

fn load_config(path: Option<&Path>) -> Result<ToolConfig> {
    let Some(path) = path else {
        return Ok(ToolConfig::default());
    };
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("could not read {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("could not parse {path:?}"))
}

fn load_state(path: &Path) -> Result<SimulatedTpm> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("could not read {path:?}; run `init` first?"))?;
    serde_json::from_str(&contents).with_context(|| format!("could not parse {path:?}"))
}

fn save_state(path: &Path, tpm: &SimulatedTpm) -> Result<()> {
    let json = serde_json::to_string_pretty(tpm)?;
    std::fs::write(path, json).with_context(|| format!("could not write {path:?}"))
}

/// Rollback errors carry a numeric result code that firmware would report
fn rollback_error(e: rollback_index::Error) -> anyhow::Error {
    anyhow!("{e} (result {:#x})", e.code())
}

fn run(rb: &mut impl RollbackIndex, cmd: RollbackCommand) -> Result<()> {
    match cmd {
        RollbackCommand::Setup {
            recovery,
            hw_dev_switch,
            dev,
        } => {
            let mut dev_mode = dev;
            let version = rb
                .firmware_setup(recovery, hw_dev_switch, &mut dev_mode)
                .map_err(rollback_error)?;
            println!("firmware version: {version:#010x}");
            println!("developer mode:   {dev_mode}");
        }
        RollbackCommand::Resume => rb.s3_resume().map_err(rollback_error)?,
        RollbackCommand::FirmwareRead => {
            println!("{:#010x}", rb.firmware_read().map_err(rollback_error)?);
        }
        RollbackCommand::FirmwareWrite { version } => {
            rb.firmware_write(version).map_err(rollback_error)?;
            info!("firmware version set to {version:#010x}");
        }
        RollbackCommand::FirmwareLock => rb.firmware_lock().map_err(rollback_error)?,
        RollbackCommand::KernelRead => {
            println!("{:#010x}", rb.kernel_read().map_err(rollback_error)?);
        }
        RollbackCommand::KernelWrite { version } => {
            rb.kernel_write(version).map_err(rollback_error)?;
            info!("kernel version set to {version:#010x}");
        }
        RollbackCommand::KernelLock { recovery } => {
            rb.kernel_lock(recovery).map_err(rollback_error)?
        }
        RollbackCommand::SetVirtualDev { switch } => {
            rb.set_virtual_dev_mode(switch == Switch::On)
                .map_err(rollback_error)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    init_logger(opts.verbose);

    let config = load_config(opts.config.as_deref())?;

    match opts.cmd {
        Command::Init { profile, force } => {
            if opts.state.exists() && !force {
                bail!(
                    "{:?} already exists; use --force to replace it",
                    opts.state
                );
            }
            let tpm = match profile {
                Some(p) => {
                    let contents = std::fs::read_to_string(&p)
                        .with_context(|| format!("could not read {p:?}"))?;
                    toml::from_str(&contents).with_context(|| format!("could not parse {p:?}"))?
                }
                None => SimulatedTpm::new(),
            };
            save_state(&opts.state, &tpm)?;
            info!("new TPM written to {}", opts.state.display());
        }
        Command::Decode { space, file } => {
            let data = std::fs::read(&file).with_context(|| format!("could not read {file:?}"))?;
            report::print_space(space, None, &data)?;
        }
        Command::Config => {
            print!("{}", toml::to_string(&config)?);
        }
        Command::Dump => {
            report::dump(&load_state(&opts.state)?)?;
        }
        Command::PowerCycle => {
            let mut tpm = load_state(&opts.state)?;
            tpm.power_cycle();
            save_state(&opts.state, &tpm)?;
        }
        Command::Suspend { keep_power } => {
            let mut tpm = load_state(&opts.state)?;
            tpm.suspend(keep_power);
            save_state(&opts.state, &tpm)?;
        }
        Command::Rollback(cmd) => {
            let tpm = load_state(&opts.state)?;
            let mut rb = PlatformRollback::with_config(tpm, config.setup);
            let r = run(&mut rb, cmd);

            // Whatever the outcome, the TPM may have changed
            save_state(&opts.state, &rb.into_inner())?;

            if let Err(e) = &r {
                println!("{}: {e}", "FAILED".red());
            }
            r?;
        }
    }

    Ok(())
}
