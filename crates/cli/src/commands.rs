// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Command, TrapOpArg};
use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressStyle};
use kmdlink_config::{ArchitectureDescriptor, RegisterDescriptor};
use kmdlink_core::protocol::{RunFlags, TrapOp, TrapState};
use kmdlink_core::DisplayFormat;
use kmdlink_session::System;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

pub fn run(system: &System, command: Command) -> Result<()> {
    match command {
        Command::Ping => {
            let version = system.device().ping()?;
            println!("OK (monitor version {})", version);
        }
        Command::Info { json } => info(system, json)?,
        Command::Status => status(system)?,
        Command::Reset => {
            system.device().reset()?;
            println!("Reset");
        }
        Command::Regs => regs(system),
        Command::ReadReg { name } => {
            let reg = register(system, &name)?;
            let value = system.read_register(&name)?;
            println!("{}", describe_register(system, reg, value));
        }
        Command::WriteReg { name, value } => {
            let reg = register(system, &name)?;
            system.write_register(&name, &value)?;
            let readback = system.read_register(&name)?;
            println!("{}", describe_register(system, reg, readback));
        }
        Command::ReadMem { addr, count, width } => {
            let addr = parse_addr(system, &addr)?;
            read_mem(system, addr, count, width)?;
        }
        Command::WriteMem { addr, values } => {
            let addr = parse_addr(system, &addr)?;
            let format = system.display_format();
            let values = values
                .iter()
                .map(|v| format.parse_value(v))
                .collect::<Result<Vec<_>, _>>()?;
            let memory = system.default_memory()?;
            system.device().write_memory(memory, 1, addr, &values)?;
            read_mem(system, addr, values.len(), 1)?;
        }
        Command::Load { image } => load(system, &image)?,
        Command::Download { periph, file } => download(system, periph, &file)?,
        Command::Run {
            steps,
            no_first_break,
            no_breakpoints,
            no_watchpoints,
            halt_on_mem_fault,
            step_over_swi,
            step_over_bl,
        } => {
            let mut flags = RunFlags::default();
            flags.set(RunFlags::BREAK_ON_FIRST_INSTRUCTION, !no_first_break);
            flags.set(RunFlags::HALT_ON_BREAKPOINT, !no_breakpoints);
            flags.set(RunFlags::HALT_ON_WATCHPOINT, !no_watchpoints);
            flags.set(RunFlags::HALT_ON_MEM_FAULT, halt_on_mem_fault);
            flags.set(RunFlags::STEP_OVER_SWI, step_over_swi);
            flags.set(RunFlags::STEP_OVER_BL, step_over_bl);
            info!("Running {} steps with flags {:?}", steps, flags);
            system.device().run(steps, flags)?;
            status(system)?;
        }
        Command::Stop => {
            system.device().stop_execution()?;
            status(system)?;
        }
        Command::Traps => {
            let states = system.device().trap_read_status()?;
            for (slot, state) in states.iter().enumerate() {
                if *state != TrapState::NotImplemented {
                    println!("{:>2}  {:?}", slot, state);
                }
            }
        }
        Command::TrapSet { slot, op } => {
            let op = match op {
                TrapOpArg::Nop => TrapOp::Nop,
                TrapOpArg::Delete => TrapOp::Delete,
                TrapOpArg::Deactivate => TrapOp::Deactivate,
                TrapOpArg::Activate => TrapOp::Activate,
            };
            system.device().trap_set_status(&[(slot, op)])?;
            let states = system.device().trap_read_status()?;
            let state = states
                .get(slot)
                .ok_or_else(|| anyhow!("No trap slot {}", slot))?;
            println!("{:>2}  {:?}", slot, state);
        }
        Command::Symbols { image } => {
            symbols(system.architecture(), &image, system.display_format())?;
        }
        Command::Disasm { addr, count } => {
            let addr = parse_addr(system, &addr)?;
            for instr in system.disassemble(addr, count)? {
                println!(
                    "{}: {}  {}",
                    system.format_value(u64::from(instr.addr), address_bits(system)),
                    system.format_value(instr.bits, instr.width_bits),
                    instr.text
                );
            }
        }
    }
    Ok(())
}

fn register<'a>(system: &'a System, name: &str) -> Result<&'a RegisterDescriptor> {
    system
        .register(name)
        .ok_or_else(|| anyhow!("Unknown register '{}'", name))
}

fn parse_addr(system: &System, text: &str) -> Result<u32> {
    let value = system.display_format().parse_value(text)?;
    u32::try_from(value).map_err(|_| anyhow!("Address {} is out of range", text))
}

fn address_bits(system: &System) -> u32 {
    system
        .default_memory()
        .map(|m| m.addr_width_bits)
        .unwrap_or(32)
}

fn describe_register(system: &System, reg: &RegisterDescriptor, value: u64) -> String {
    let mut line = format!(
        "{:<8} {}",
        reg.name(),
        system.format_value(value, reg.width_bits)
    );
    let fields = system.register_fields(reg, value);
    if !fields.is_empty() {
        let fields: Vec<String> = fields
            .iter()
            .map(|(name, v)| format!("{}={}", name, v))
            .collect();
        line.push_str(&format!("  [{}]", fields.join(" ")));
    }
    line
}

fn regs(system: &System) {
    for bank in &system.architecture().register_banks {
        println!("{}:", bank.name());
        for reg in &bank.registers {
            match system.device().read_register(reg) {
                Ok(value) => println!("  {}", describe_register(system, reg, value)),
                Err(e) => println!("  {:<8} <{}>", reg.name(), e),
            }
        }
    }
}

fn read_mem(system: &System, addr: u32, count: usize, width: u32) -> Result<()> {
    let memory = system.default_memory()?;
    let values = system.device().read_memory(memory, width, addr, count)?;
    for (i, value) in values.iter().enumerate() {
        let at = addr.wrapping_add((i as u32).wrapping_mul(width.max(1)));
        let mut line = format!(
            "{}: {}",
            system.format_value(u64::from(at), memory.addr_width_bits),
            system.format_value(*value, memory.word_width_bits.saturating_mul(width.max(1)))
        );
        if let Some(source) = system.source_lines(at) {
            line.push_str(&format!("  ; {}", source.lines.join(" | ")));
        }
        println!("{}", line);
    }
    Ok(())
}

fn status(system: &System) -> Result<()> {
    let status = system.device().get_status()?;
    println!(
        "{:?} (steps remaining {}, since reset {})",
        status.status, status.steps_remaining, status.steps_since_reset
    );
    Ok(())
}

fn info(system: &System, as_json: bool) -> Result<()> {
    let version = system.device().ping()?;
    let board = system.board_definition();
    let arch = system.architecture();

    if as_json {
        let value = json!({
            "name": system.name(),
            "monitor_version": version,
            "architecture": arch.name,
            "board": board,
            "memories": arch.memories.iter().map(|m| json!({
                "name": m.name(),
                "addr_width_bits": m.addr_width_bits,
                "word_width_bits": m.word_width_bits,
            })).collect::<Vec<_>>(),
            "registers": arch.registers().map(|r| r.name()).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Architecture: {}", arch.name);
    println!(
        "CPU type:     {} (subtype {:#06x})",
        board.cpu_type, board.cpu_subtype
    );
    println!("Monitor:      version {}", version);
    for (id, sub_id) in &board.peripherals {
        println!("Peripheral:   {:#04x}/{:#06x}", id, sub_id);
    }
    for (addr, len) in &board.segments {
        println!("Segment:      {:#010x} + {:#x}", addr, len);
    }
    Ok(())
}

fn progress_bar(total: u64, unit: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {} ({{eta}})",
                unit
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn load(system: &System, image: &Path) -> Result<()> {
    let data = std::fs::read(image)?;
    println!("SHA-256: {:x}", Sha256::digest(&data));

    let load = system.load_image(image)?;
    let pb = progress_bar(load.total(), "writes")?;
    for progress in load {
        match progress {
            Ok(p) => pb.set_position(p.completed),
            Err(e) => {
                pb.abandon();
                return Err(e.into());
            }
        }
    }
    pb.finish_with_message("Load complete");

    println!(
        "Loaded {:?}: {} symbols",
        image,
        system.symbols().len()
    );
    Ok(())
}

fn download(system: &System, periph: u8, file: &Path) -> Result<()> {
    let data = std::fs::read(file)?;
    let download = system.device().periph_download(periph, data)?;
    let pb = progress_bar(download.total(), "bytes")?;
    for progress in download {
        match progress {
            Ok(p) => pb.set_position(p.completed),
            Err(e) => {
                pb.abandon();
                return Err(e.into());
            }
        }
    }
    pb.finish_with_message("Download complete");
    println!("Downloaded {} bytes to peripheral {}", pb.position(), periph);
    Ok(())
}

pub fn symbols(arch: &ArchitectureDescriptor, image: &Path, format: DisplayFormat) -> Result<()> {
    let memory = arch
        .default_memory()
        .ok_or_else(|| anyhow!("Architecture '{}' has no memory", arch.name))?;
    let image = kmdlink_loader::read_image(image, memory)?;
    for (name, symbol) in &image.symbols {
        println!(
            "{}  {:<16} {}",
            format.format_value(symbol.value, memory.addr_width_bits, false),
            name,
            symbol.kind
        );
    }
    Ok(())
}
