// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Descriptors for the CPUs hosted by the board's own debug monitor.
//!
//! The CPU subtype reported by these boards carries two extra pieces of
//! information: the low byte is `0x00` when registers are reachable and
//! `0x01` for memory-only builds, and the high byte counts the 16-bit user
//! registers wired onto the scan path.

use crate::{ArchitectureDescriptor, RegisterBank, RegisterDescriptor};
use anyhow::{Context, Result};

pub const CPU_TYPE_STUMP: u8 = 3;
pub const CPU_TYPE_MU0: u8 = 4;

const SUBTYPE_REG_AND_MEM: u16 = 0x00;

/// First register address used for user registers.
const USER_REGISTER_BASE: u32 = 9;

const STUMP_YAML: &str = include_str!("../descriptors/stump.yaml");
const MU0_YAML: &str = include_str!("../descriptors/mu0.yaml");

/// Resolve the built-in descriptor for a board, or `None` for an unknown CPU.
pub fn builtin(cpu_type: u8, cpu_subtype: u16) -> Result<Option<ArchitectureDescriptor>> {
    let source = match cpu_type {
        CPU_TYPE_STUMP => STUMP_YAML,
        CPU_TYPE_MU0 => MU0_YAML,
        _ => return Ok(None),
    };

    let mut arch: ArchitectureDescriptor = serde_yaml::from_str(source)
        .with_context(|| format!("Built-in descriptor for CPU type {} is invalid", cpu_type))?;

    if cpu_subtype & 0xFF != SUBTYPE_REG_AND_MEM {
        arch.register_banks.clear();
    }

    let user_registers = u32::from((cpu_subtype >> 8) & 0xFF);
    if user_registers > 0 {
        let registers = (0..user_registers)
            .map(|n| {
                let names = [
                    format!("User{}", n),
                    format!("U{}", n),
                    format!("user{}", n),
                    format!("u{}", n),
                ];
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                RegisterDescriptor::new(&names, 16, USER_REGISTER_BASE + n)
            })
            .collect();
        arch.register_banks.push(RegisterBank {
            names: vec!["Signals".into(), "signals".into()],
            registers,
        });
    }

    arch.validate()?;
    Ok(Some(arch))
}
