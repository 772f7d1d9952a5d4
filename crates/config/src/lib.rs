// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bitfield;
pub mod builtin;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub use bitfield::{FieldDescriptor, FieldValue};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("{0} has no names")]
    Unnamed(&'static str),
    #[error("{what} '{name}' has unsupported width of {bits} bits")]
    BadWidth {
        what: &'static str,
        name: String,
        bits: u32,
    },
    #[error("register name '{0}' is used more than once")]
    DuplicateRegister(String),
    #[error("architecture defines no memories")]
    NoMemories,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MemoryDescriptor {
    pub index: u8,
    pub names: Vec<String>,
    pub addr_width_bits: u32,
    pub word_width_bits: u32,
    /// Size in words, e.g. "4K". Defaults to the whole address space.
    #[serde(default)]
    pub size: Option<String>,
}

impl MemoryDescriptor {
    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or("")
    }

    pub fn word_bytes(&self) -> u32 {
        (self.word_width_bits + 7) / 8
    }

    /// Number of hex nibbles needed to spell one memory word.
    pub fn word_nibbles(&self) -> u32 {
        (self.word_width_bits + 3) / 4
    }

    pub fn size_words(&self) -> Result<u64> {
        match &self.size {
            Some(s) => parse_size(s),
            None => Ok(1u64 << self.addr_width_bits.min(63)),
        }
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PointerDescriptor {
    /// Indices of the memories this register may point into.
    pub memories: Vec<u8>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RegisterDescriptor {
    pub names: Vec<String>,
    pub width_bits: u32,
    /// Address in the device's register address space.
    pub addr: u32,
    #[serde(default)]
    pub pointer: Option<PointerDescriptor>,
    #[serde(default)]
    pub bit_field: Option<Vec<FieldDescriptor>>,
}

impl RegisterDescriptor {
    pub fn new(names: &[&str], width_bits: u32, addr: u32) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            width_bits,
            addr,
            pointer: None,
            bit_field: None,
        }
    }

    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or("")
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Mask covering every bit of the register.
    pub fn mask(&self) -> u64 {
        if self.width_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width_bits) - 1
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RegisterBank {
    pub names: Vec<String>,
    pub registers: Vec<RegisterDescriptor>,
}

impl RegisterBank {
    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AssemblerConfig {
    pub name: String,
    /// Program to run. `{input}` and `{output}` in `args` are substituted.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub output_extension: String,
    /// Append each source line to the matching listing line as a `;` comment.
    #[serde(default)]
    pub merge_source: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ArchitectureDescriptor {
    pub name: String,
    pub cpu_type: u8,
    pub word_width_bits: u32,
    pub memories: Vec<MemoryDescriptor>,
    #[serde(default)]
    pub register_banks: Vec<RegisterBank>,
    #[serde(default)]
    pub assembler: Option<AssemblerConfig>,
}

impl ArchitectureDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path).with_context(|| {
            format!("Failed to open architecture descriptor at {:?}", path.as_ref())
        })?;
        let arch: Self =
            serde_yaml::from_reader(f).context("Failed to parse Architecture Descriptor")?;
        arch.validate()?;
        Ok(arch)
    }

    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.name.trim().is_empty() {
            return Err(DescriptorError::Unnamed("architecture"));
        }
        if self.memories.is_empty() {
            return Err(DescriptorError::NoMemories);
        }

        for memory in &self.memories {
            if memory.names.is_empty() {
                return Err(DescriptorError::Unnamed("memory"));
            }
            if memory.word_width_bits == 0 || memory.word_width_bits > 64 {
                return Err(DescriptorError::BadWidth {
                    what: "memory",
                    name: memory.name().to_string(),
                    bits: memory.word_width_bits,
                });
            }
        }

        let mut seen = HashSet::new();
        for bank in &self.register_banks {
            if bank.names.is_empty() {
                return Err(DescriptorError::Unnamed("register bank"));
            }
            for register in &bank.registers {
                if register.names.is_empty() {
                    return Err(DescriptorError::Unnamed("register"));
                }
                if register.width_bits == 0 || register.width_bits > 64 {
                    return Err(DescriptorError::BadWidth {
                        what: "register",
                        name: register.name().to_string(),
                        bits: register.width_bits,
                    });
                }
                // Banked registers share short names ("R0" in every ARM mode), so
                // duplicates are only rejected within a bank.
                for name in &register.names {
                    if !seen.insert((bank.name().to_string(), name.clone())) {
                        return Err(DescriptorError::DuplicateRegister(name.clone()));
                    }
                }
            }
        }

        Ok(())
    }

    /// The memory images are loaded into unless told otherwise.
    pub fn default_memory(&self) -> Option<&MemoryDescriptor> {
        self.memories.first()
    }

    pub fn memory(&self, name: &str) -> Option<&MemoryDescriptor> {
        self.memories.iter().find(|m| m.has_name(name))
    }

    /// Find a register by any of its names. `bank.reg` selects a specific bank,
    /// a bare name searches banks in order.
    pub fn register(&self, name: &str) -> Option<&RegisterDescriptor> {
        if let Some((bank_name, reg_name)) = name.split_once('.') {
            return self
                .register_banks
                .iter()
                .filter(|b| b.names.iter().any(|n| n == bank_name))
                .flat_map(|b| b.registers.iter())
                .find(|r| r.has_name(reg_name));
        }
        self.registers().find(|r| r.has_name(name))
    }

    pub fn registers(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.register_banks.iter().flat_map(|b| b.registers.iter())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SerialConfig {
    pub port: Option<String>,
    pub baud: u32,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115_200,
            read_timeout_ms: 1_000,
            write_timeout_ms: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// NOPs written to flush a confused command channel during resync.
    pub resync_nops: usize,
    /// Upper bound on stale bytes discarded during resync.
    pub drain_limit: usize,
    /// Largest peripheral download packet.
    pub packet_length: usize,
    pub serial: SerialConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            resync_nops: 100,
            drain_limit: 10_000,
            packet_length: 256,
            serial: SerialConfig::default(),
        }
    }
}

impl DriverConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open driver config at {:?}", path.as_ref()))?;
        let config: Self =
            serde_yaml::from_reader(f).context("Failed to parse Driver Config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.packet_length == 0 || self.packet_length > 256 {
            anyhow::bail!(
                "Config 'packet_length' must be between 1 and 256, got {}",
                self.packet_length
            );
        }

        if self.resync_nops == 0 {
            anyhow::bail!("Config 'resync_nops' must be greater than zero");
        }

        if self.serial.baud == 0 {
            anyhow::bail!("Config 'serial.baud' must be greater than zero");
        }

        Ok(())
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    if let Ok(n) = size_str.trim().parse::<u64>() {
        return Ok(n);
    }
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARCH: &str = r#"
name: "Toy"
cpu_type: 9
word_width_bits: 16
memories:
  - index: 0
    names: ["Memory", "mem"]
    addr_width_bits: 12
    word_width_bits: 16
register_banks:
  - names: ["Registers"]
    registers:
      - names: ["ACC", "acc"]
        width_bits: 16
        addr: 0
      - names: ["Flags"]
        width_bits: 2
        addr: 2
        bit_field:
          - kind: bit
            name: Z
            bit: 0
          - kind: bit
            name: N
            bit: 1
"#;

    #[test]
    fn test_valid_descriptor() {
        let arch: ArchitectureDescriptor = serde_yaml::from_str(ARCH).unwrap();
        assert!(arch.validate().is_ok());
        assert_eq!(arch.default_memory().unwrap().name(), "Memory");
        assert_eq!(arch.default_memory().unwrap().size_words().unwrap(), 4096);
        assert_eq!(arch.register("acc").unwrap().addr, 0);
        assert_eq!(arch.register("Registers.Flags").unwrap().width_bits, 2);
        assert!(arch.register("PC").is_none());
        assert_eq!(arch.register("Flags").unwrap().mask(), 0b11);
    }

    #[test]
    fn test_register_width_rejected() {
        let mut arch: ArchitectureDescriptor = serde_yaml::from_str(ARCH).unwrap();
        arch.register_banks[0].registers[0].width_bits = 65;
        let err = arch.validate().unwrap_err();
        assert!(err.to_string().contains("65 bits"));
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let mut arch: ArchitectureDescriptor = serde_yaml::from_str(ARCH).unwrap();
        let dup = arch.register_banks[0].registers[0].clone();
        arch.register_banks[0].registers.push(dup);
        assert_eq!(
            arch.validate(),
            Err(DescriptorError::DuplicateRegister("ACC".to_string()))
        );
    }

    #[test]
    fn test_driver_defaults() {
        let config: DriverConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, DriverConfig::default());
        assert_eq!(config.resync_nops, 100);
        assert_eq!(config.drain_limit, 10_000);
        assert_eq!(config.packet_length, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_driver_overrides() {
        let yaml = r#"
resync_nops: 8
serial:
  port: "/dev/ttyUSB0"
  baud: 9600
"#;
        let config: DriverConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.resync_nops, 8);
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.serial.baud, 9600);
        assert_eq!(config.serial.read_timeout_ms, 1_000);
    }

    #[test]
    fn test_invalid_packet_length() {
        let config: DriverConfig = serde_yaml::from_str("packet_length: 300").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("packet_length"));
    }

    #[test]
    fn test_unknown_driver_field() {
        assert!(serde_yaml::from_str::<DriverConfig>("retries: 3").is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("4 KiB").unwrap(), 4096);
        assert!(parse_size("lots").is_err());
    }
}
