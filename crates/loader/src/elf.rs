// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! ELF images. Every allocated `PROGBITS` section is written one byte per
//! memory word from its load address.

use crate::error::{LoadError, LoadResult};
use crate::image::{Image, Symbol};
use goblin::elf::section_header::{SHF_ALLOC, SHT_PROGBITS};
use goblin::elf::sym;
use goblin::elf::Elf;
use tracing::{debug, info, warn};

pub fn parse(data: &[u8]) -> LoadResult<Image> {
    let elf = Elf::parse(data)?;
    info!("ELF Entry Point: {:#x}", elf.entry);

    let mut image = Image::default();

    for sh in &elf.section_headers {
        if sh.sh_type != SHT_PROGBITS || sh.sh_flags & u64::from(SHF_ALLOC) == 0 {
            continue;
        }
        let name = elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("?");
        let offset = sh.sh_offset as usize;
        let size = sh.sh_size as usize;
        if size == 0 {
            continue;
        }
        let bytes = offset
            .checked_add(size)
            .and_then(|end| data.get(offset..end))
            .ok_or_else(|| {
                LoadError::Elf(goblin::error::Error::Malformed(format!(
                    "section {} is out of bounds",
                    name
                )))
            })?;

        debug!(
            "Found Loadable Section {}: Addr={:#x}, Size={} bytes",
            name, sh.sh_addr, size
        );

        let base = sh.sh_addr as u32;
        for (i, byte) in bytes.iter().enumerate() {
            image
                .memory
                .push(base.wrapping_add(i as u32), vec![u64::from(*byte)]);
        }
    }

    if image.memory.is_empty() {
        warn!("No loadable sections found in ELF file");
    }

    for s in elf.syms.iter() {
        if s.st_name == 0 || s.st_type() == sym::STT_SECTION || s.st_type() == sym::STT_FILE {
            continue;
        }
        if let Some(name) = elf.strtab.get_at(s.st_name) {
            image.symbols.insert(
                name.to_string(),
                Symbol {
                    value: s.st_value,
                    kind: sym::type_to_str(s.st_type()).to_string(),
                },
            );
        }
    }

    Ok(image)
}
