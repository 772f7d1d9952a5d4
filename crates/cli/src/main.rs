// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

mod commands;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kmdlink_config::{ArchitectureDescriptor, DriverConfig};
use kmdlink_core::sim::SimBoard;
use kmdlink_core::transport::{ProcessTransport, SerialTransport};
use kmdlink_core::{DisplayFormat, Radix, Transport};
use kmdlink_session::System;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial device the board is attached to
    #[arg(short, long, conflicts_with_all = ["emulator", "sim"])]
    port: Option<String>,

    /// Baud rate (overrides the config file)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Emulator command line; the protocol runs over its stdin/stdout
    #[arg(long, conflicts_with = "sim")]
    emulator: Option<String>,

    /// Talk to a built-in simulated STUMP board
    #[arg(long)]
    sim: bool,

    /// Driver configuration (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Architecture descriptor (YAML) to use instead of the built-in one
    #[arg(long)]
    arch: Option<PathBuf>,

    /// Number base for values shown and parsed
    #[arg(long, value_enum, default_value = "hex")]
    radix: RadixArg,

    /// Enable protocol-level tracing
    #[arg(short, long)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RadixArg {
    Hex,
    Dec,
    Oct,
    Bin,
}

impl RadixArg {
    fn display_format(self) -> DisplayFormat {
        let radix = match self {
            RadixArg::Hex => Radix::Hex,
            RadixArg::Dec => return DisplayFormat::decimal(),
            RadixArg::Oct => Radix::Oct,
            RadixArg::Bin => Radix::Bin,
        };
        DisplayFormat {
            radix,
            ..DisplayFormat::default()
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum TrapOpArg {
    Nop,
    Delete,
    Deactivate,
    Activate,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check the board answers and show its monitor version
    Ping,
    /// Describe the connected board
    Info {
        #[arg(long)]
        json: bool,
    },
    /// Show execution status
    Status,
    /// Reset the board
    Reset,
    /// Show every register
    Regs,
    /// Read one register
    ReadReg { name: String },
    /// Write one register
    WriteReg { name: String, value: String },
    /// Read memory words
    ReadMem {
        addr: String,
        count: usize,
        /// Words per element
        #[arg(long, default_value = "1")]
        width: u32,
    },
    /// Write memory words from ADDR onwards
    WriteMem {
        addr: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Load a memory image (.lst, .kmd, .elf or raw binary)
    Load { image: PathBuf },
    /// Stream a file to a peripheral
    Download { periph: u8, file: PathBuf },
    /// Start execution
    Run {
        /// Steps to run, 0 for no limit
        #[arg(long, default_value = "0")]
        steps: u32,
        /// Do not stop before the first instruction
        #[arg(long)]
        no_first_break: bool,
        #[arg(long)]
        no_breakpoints: bool,
        #[arg(long)]
        no_watchpoints: bool,
        #[arg(long)]
        halt_on_mem_fault: bool,
        #[arg(long)]
        step_over_swi: bool,
        #[arg(long)]
        step_over_bl: bool,
    },
    /// Stop execution
    Stop,
    /// Show the state of every implemented trap slot
    Traps,
    /// Apply an operation to one trap slot
    TrapSet {
        slot: usize,
        #[arg(value_enum)]
        op: TrapOpArg,
    },
    /// List the symbols of an image file
    Symbols { image: PathBuf },
    /// Show memory as instructions
    Disasm { addr: String, count: usize },
}

fn open_transport(args: &Args, config: &DriverConfig) -> Result<Box<dyn Transport>> {
    if args.sim {
        info!("Using simulated board");
        return Ok(Box::new(SimBoard::stump()));
    }

    if let Some(cmdline) = &args.emulator {
        let mut parts = cmdline.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("--emulator needs a command"))?;
        let rest: Vec<&str> = parts.collect();
        info!("Starting emulator: {}", cmdline);
        let transport = ProcessTransport::spawn(program, &rest)
            .with_context(|| format!("Failed to start emulator '{}'", program))?;
        return Ok(Box::new(transport));
    }

    let port = args
        .port
        .clone()
        .or_else(|| config.serial.port.clone())
        .ok_or_else(|| anyhow!("No board given: use --port, --emulator or --sim"))?;
    let mut serial = config.serial.clone();
    if let Some(baud) = args.baud {
        serial.baud = baud;
    }
    info!("Opening {} at {} baud", port, serial.baud);
    let transport = SerialTransport::open(&port, &serial)
        .with_context(|| format!("Failed to open serial port {}", port))?;
    Ok(Box::new(transport))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.trace {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => {
            info!("Loading driver config: {:?}", path);
            DriverConfig::from_file(path)?
        }
        None => DriverConfig::default(),
    };

    // Image inspection needs no board.
    if let Command::Symbols { image } = &args.command {
        let arch = match &args.arch {
            Some(path) => ArchitectureDescriptor::from_file(path)?,
            None => kmdlink_config::builtin::builtin(kmdlink_config::builtin::CPU_TYPE_STUMP, 0)?
                .ok_or_else(|| anyhow!("No built-in STUMP description"))?,
        };
        return commands::symbols(&arch, image, args.radix.display_format());
    }

    let arch = match &args.arch {
        Some(path) => {
            info!("Loading architecture descriptor: {:?}", path);
            Some(ArchitectureDescriptor::from_file(path)?)
        }
        None => None,
    };

    let transport = open_transport(&args, &config)?;
    let system = System::with_architecture(transport, &config, "kmdlink", arch)?;
    system.set_display_format(args.radix.display_format());

    let result = commands::run(&system, args.command);
    system.shutdown();
    result
}
