// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Boundary to per-architecture assemblers and disassemblers.

use anyhow::{bail, Context, Result};
use kmdlink_config::AssemblerConfig;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

pub trait Assembler: Send + Sync {
    fn name(&self) -> &str;

    /// Assemble `source` and return the path of the image it produced.
    fn assemble(&self, source: &Path) -> Result<PathBuf>;
}

/// Runs an external assembler program described by an [`AssemblerConfig`].
#[derive(Debug, Clone)]
pub struct ExternalAssembler {
    config: AssemblerConfig,
}

impl ExternalAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    pub fn output_path(&self, source: &Path) -> PathBuf {
        source.with_extension(&self.config.output_extension)
    }

    fn args(&self, source: &Path, output: &Path) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|a| {
                a.replace("{input}", &source.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy())
            })
            .collect()
    }
}

impl Assembler for ExternalAssembler {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn assemble(&self, source: &Path) -> Result<PathBuf> {
        let output = self.output_path(source);
        let args = self.args(source, &output);
        debug!("Running {} {:?}", self.config.command, args);

        let result = Command::new(&self.config.command)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => anyhow::anyhow!(
                    "{} assembler '{}' is not available in PATH",
                    self.config.name,
                    self.config.command
                ),
                _ => anyhow::Error::new(err)
                    .context(format!("Failed to run {}", self.config.command)),
            })?;

        if !result.status.success() {
            bail!(
                "Assembly failed:\n{}",
                String::from_utf8_lossy(&result.stderr).trim_end()
            );
        }

        if self.config.merge_source {
            merge_source(source, &output)?;
        }

        info!("Assembled {:?} into {:?}", source, output);
        Ok(output)
    }
}

/// Append each source line to the listing line it produced as a `;`
/// comment. The listing must correspond line for line with the source.
pub fn merge_source(source: &Path, listing: &Path) -> Result<()> {
    let src = std::fs::read_to_string(source)
        .with_context(|| format!("Failed to read source {:?}", source))?;
    let lst = std::fs::read_to_string(listing)
        .with_context(|| format!("Failed to read listing {:?}", listing))?;

    let mut merged = String::new();
    for (src_line, lst_line) in src.lines().zip(lst.lines()) {
        if !lst_line.trim().is_empty() {
            merged.push_str(lst_line);
            merged.push(';');
            merged.push_str(src_line);
            merged.push('\n');
        }
    }

    std::fs::write(listing, merged).with_context(|| format!("Failed to write {:?}", listing))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub addr: u32,
    pub width_bits: u32,
    pub bits: u64,
    pub text: String,
}

pub trait Disassembler: Send + Sync {
    /// Disassemble `count` instructions from `addr`. `read(addr, words)`
    /// fetches memory words.
    fn disassemble(
        &self,
        read: &mut dyn FnMut(u32, usize) -> Result<Vec<u64>>,
        addr: u32,
        count: usize,
    ) -> Result<Vec<Instruction>>;
}

/// Shows every memory word as a `.word` directive.
#[derive(Debug, Clone, Copy)]
pub struct RawWordDisassembler {
    pub word_width_bits: u32,
}

impl Disassembler for RawWordDisassembler {
    fn disassemble(
        &self,
        read: &mut dyn FnMut(u32, usize) -> Result<Vec<u64>>,
        addr: u32,
        count: usize,
    ) -> Result<Vec<Instruction>> {
        let words = read(addr, count)?;
        let digits = ((self.word_width_bits + 3) / 4) as usize;
        Ok(words
            .into_iter()
            .enumerate()
            .map(|(i, bits)| Instruction {
                addr: addr.wrapping_add(i as u32),
                width_bits: self.word_width_bits,
                bits,
                text: format!(".word 0x{:0width$X}", bits, width = digits),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("kmdlink-asm-{}-{}", nonce, name))
    }

    fn config(command: &str, args: &[&str], merge_source: bool) -> AssemblerConfig {
        AssemblerConfig {
            name: "test".into(),
            command: command.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            output_extension: "lst".into(),
            merge_source,
        }
    }

    #[test]
    fn test_placeholders() {
        let asm = ExternalAssembler::new(config("asm", &["-o", "{output}", "{input}"], false));
        let args = asm.args(Path::new("/tmp/prog.s"), Path::new("/tmp/prog.lst"));
        assert_eq!(args, vec!["-o", "/tmp/prog.lst", "/tmp/prog.s"]);
        assert_eq!(asm.output_path(Path::new("a/b.s")), PathBuf::from("a/b.lst"));
    }

    #[test]
    fn test_merge_source() {
        let src = temp_path("prog.s");
        let lst = temp_path("prog.lst");
        std::fs::write(&src, "start: mov r0, #1\n\n       b start\n").unwrap();
        std::fs::write(&lst, "0000: 1001\n\n0001: 8FFF\n").unwrap();

        merge_source(&src, &lst).unwrap();
        let merged = std::fs::read_to_string(&lst).unwrap();
        assert_eq!(merged, "0000: 1001;start: mov r0, #1\n0001: 8FFF;       b start\n");

        std::fs::remove_file(src).ok();
        std::fs::remove_file(lst).ok();
    }

    #[test]
    fn test_missing_program() {
        let asm = ExternalAssembler::new(config("kmdlink-no-such-assembler", &["{input}"], false));
        let err = asm.assemble(Path::new("x.s")).unwrap_err();
        assert!(err.to_string().contains("not available"));
    }

    #[test]
    fn test_raw_words() {
        let dis = RawWordDisassembler { word_width_bits: 16 };
        let mut read = |addr: u32, n: usize| -> Result<Vec<u64>> {
            Ok((0..n as u64).map(|i| u64::from(addr) + i).collect())
        };
        let out = dis.disassemble(&mut read, 0x10, 2).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].addr, 0x11);
        assert_eq!(out[0].text, ".word 0x0010");
    }
}
