// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::assembler::{Assembler, Disassembler, ExternalAssembler, Instruction, RawWordDisassembler};
use anyhow::{anyhow, Context, Result};
use kmdlink_config::bitfield::decode_fields;
use kmdlink_config::{
    builtin, ArchitectureDescriptor, DriverConfig, FieldValue, MemoryDescriptor,
    RegisterDescriptor,
};
use kmdlink_core::protocol::BoardDefinition;
use kmdlink_core::{Device, DisplayFormat, EventLog, MemoryLoad, Progress, Transport};
use kmdlink_loader::{
    read_image, CancelToken, ImageLoad, LoadError, SourceEntry, SourceMap, Symbol, SymbolTable,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

const LOAD_SOURCE: &str = "Load Memory Image";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct LoadedImage {
    path: Option<PathBuf>,
    source: SourceMap,
    symbols: SymbolTable,
}

/// One debugging session: the device, what it is, and what was loaded
/// into it.
pub struct System {
    name: String,
    device: Arc<Device>,
    board: BoardDefinition,
    architecture: ArchitectureDescriptor,
    format: Mutex<DisplayFormat>,
    image: Mutex<LoadedImage>,
    assembler: Option<Box<dyn Assembler>>,
    disassembler: Box<dyn Disassembler>,
}

impl System {
    /// Connect using the built-in description of whatever CPU the board
    /// reports.
    pub fn new(transport: Box<dyn Transport>, config: &DriverConfig, name: &str) -> Result<Self> {
        Self::with_architecture(transport, config, name, None)
    }

    pub fn with_architecture(
        transport: Box<dyn Transport>,
        config: &DriverConfig,
        name: &str,
        architecture: Option<ArchitectureDescriptor>,
    ) -> Result<Self> {
        let log = Arc::new(EventLog::new());
        let device = Arc::new(Device::new(transport, config, log));

        let board = device
            .get_board_definition()
            .context("Board did not answer")?;
        // Establish the baseline for hot-swap detection.
        device.board_definition_changed()?;

        let architecture = match architecture {
            Some(arch) => arch,
            None => builtin::builtin(board.cpu_type, board.cpu_subtype)?.ok_or_else(|| {
                anyhow!(
                    "No built-in description for CPU type {} (subtype {:#06x})",
                    board.cpu_type,
                    board.cpu_subtype
                )
            })?,
        };
        architecture
            .validate()
            .with_context(|| format!("Invalid architecture '{}'", architecture.name))?;

        info!(
            "Connected to {} ({} registers, {} memories)",
            architecture.name,
            architecture.registers().count(),
            architecture.memories.len()
        );

        let assembler = architecture
            .assembler
            .clone()
            .map(|c| Box::new(ExternalAssembler::new(c)) as Box<dyn Assembler>);
        let disassembler = Box::new(RawWordDisassembler {
            word_width_bits: architecture.word_width_bits,
        });

        Ok(Self {
            name: name.to_string(),
            device,
            board,
            architecture,
            format: Mutex::new(DisplayFormat::default()),
            image: Mutex::new(LoadedImage::default()),
            assembler,
            disassembler,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn log(&self) -> &Arc<EventLog> {
        self.device.log()
    }

    pub fn board_definition(&self) -> &BoardDefinition {
        &self.board
    }

    pub fn architecture(&self) -> &ArchitectureDescriptor {
        &self.architecture
    }

    pub fn display_format(&self) -> DisplayFormat {
        *lock(&self.format)
    }

    pub fn set_display_format(&self, format: DisplayFormat) {
        *lock(&self.format) = format;
    }

    pub fn register(&self, name: &str) -> Option<&RegisterDescriptor> {
        self.architecture.register(name)
    }

    pub fn memory(&self, name: &str) -> Option<&MemoryDescriptor> {
        self.architecture.memory(name)
    }

    pub fn default_memory(&self) -> Result<&MemoryDescriptor> {
        self.architecture
            .default_memory()
            .ok_or_else(|| anyhow!("Architecture '{}' has no memory", self.architecture.name))
    }

    fn lookup_register(&self, name: &str) -> Result<&RegisterDescriptor> {
        self.register(name)
            .ok_or_else(|| anyhow!("Unknown register '{}'", name))
    }

    pub fn read_register(&self, name: &str) -> Result<u64> {
        let reg = self.lookup_register(name)?;
        Ok(self.device.read_register(reg)?)
    }

    /// `value` is parsed with the current display format.
    pub fn write_register(&self, name: &str, value: &str) -> Result<u64> {
        let reg = self.lookup_register(name)?;
        let value = self.display_format().parse_value(value)? & reg.mask();
        self.device.write_register(reg, value)?;
        Ok(value)
    }

    pub fn format_value(&self, value: u64, width_bits: u32) -> String {
        self.display_format().format_value(value, width_bits, false)
    }

    /// Named fields of a flag register, empty when it has none.
    pub fn register_fields(&self, reg: &RegisterDescriptor, value: u64) -> Vec<(String, FieldValue)> {
        reg.bit_field
            .as_deref()
            .map(|fields| decode_fields(fields, value))
            .unwrap_or_default()
    }

    pub fn symbol(&self, name: &str) -> Option<Symbol> {
        lock(&self.image).symbols.get(name).cloned()
    }

    pub fn symbols(&self) -> SymbolTable {
        lock(&self.image).symbols.clone()
    }

    pub fn source_lines(&self, addr: u32) -> Option<SourceEntry> {
        lock(&self.image).source.get(&addr).cloned()
    }

    pub fn image_path(&self) -> Option<PathBuf> {
        lock(&self.image).path.clone()
    }

    /// Parse `path` into the default memory. The previous source listing and
    /// symbols are dropped first, so a failed load leaves none. Writes happen
    /// as the returned iterator is advanced; other device calls wait until it
    /// is exhausted or dropped.
    pub fn load_image(&self, path: &Path) -> Result<SystemLoad<'_>, LoadError> {
        let memory = self
            .architecture
            .default_memory()
            .cloned()
            .ok_or_else(|| LoadError::Parse {
                format: "image",
                line: 0,
                message: "architecture has no memory".into(),
            })?;

        *lock(&self.image) = LoadedImage::default();

        let image = read_image(path, &memory).map_err(|e| {
            self.log().log_error(&e, true, Some(LOAD_SOURCE));
            e
        })?;
        // The device stays locked until the load ends or is dropped.
        let writer = self.device.begin_load().map_err(|e| {
            let e = LoadError::Device(e);
            self.log().log_error(&e, true, Some(LOAD_SOURCE));
            e
        })?;

        {
            let mut loaded = lock(&self.image);
            loaded.path = Some(path.to_path_buf());
            loaded.source = image.source;
            loaded.symbols = image.symbols;
        }

        Ok(SystemLoad {
            inner: ImageLoad::new(image.memory, memory, writer, CancelToken::new()),
            log: self.device.log().as_ref(),
        })
    }

    pub fn assembler(&self) -> Option<&dyn Assembler> {
        self.assembler.as_deref()
    }

    /// Assemble `source`, logging any failure as urgent.
    pub fn assemble(&self, source: &Path) -> Result<PathBuf> {
        let assembler = self
            .assembler
            .as_deref()
            .ok_or_else(|| anyhow!("No assembler for {}", self.architecture.name))?;
        assembler.assemble(source).map_err(|e| {
            self.log().log_error(&*e, true, Some("Assemble File"));
            e
        })
    }

    pub fn disassemble(&self, addr: u32, count: usize) -> Result<Vec<Instruction>> {
        let memory = self.default_memory()?.clone();
        let device = &self.device;
        let mut read = |addr: u32, words: usize| -> Result<Vec<u64>> {
            Ok(device.read_memory(&memory, 1, addr, words)?)
        };
        self.disassembler.disassemble(&mut read, addr, count)
    }

    /// Cut the device off and close the transport. Calls still in flight on
    /// other threads fail with a kill error.
    pub fn shutdown(&self) {
        if let Err(e) = self.device.close() {
            self.log().log_error(&e, false, Some("Shutdown"));
        }
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("name", &self.name)
            .field("architecture", &self.architecture.name)
            .field("device", &self.device)
            .finish()
    }
}

/// Image load in progress. Failures are recorded in the event log as
/// urgent before being handed back.
pub struct SystemLoad<'a> {
    inner: ImageLoad<MemoryLoad<'a>>,
    log: &'a EventLog,
}

impl SystemLoad<'_> {
    pub fn total(&self) -> u64 {
        self.inner.total()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.inner.cancel_token().clone()
    }
}

impl Iterator for SystemLoad<'_> {
    type Item = Result<Progress, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        if let Err(e) = &item {
            self.log.log_error(e, true, Some(LOAD_SOURCE));
        }
        Some(item)
    }
}

impl std::iter::FusedIterator for SystemLoad<'_> {}
