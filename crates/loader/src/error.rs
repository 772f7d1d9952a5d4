// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use kmdlink_core::DeviceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{format} line {line}: {message}")]
    Parse {
        format: &'static str,
        line: usize,
        message: String,
    },
    #[error("line {line}: address {address:#x} is already defined")]
    Redefinition { line: usize, address: u32 },
    #[error("KMD file magic number missing")]
    MissingMagic,
    #[error("Failed to parse ELF image: {0}")]
    Elf(#[from] goblin::error::Error),
    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device not available for loading")]
    Device(#[source] DeviceError),
    #[error("Memory write at {address:#x} failed")]
    Write {
        address: u32,
        #[source]
        source: DeviceError,
    },
}

impl LoadError {
    pub(crate) fn parse(format: &'static str, line: usize, message: impl Into<String>) -> Self {
        LoadError::Parse {
            format,
            line,
            message: message.into(),
        }
    }
}

pub type LoadResult<T> = Result<T, LoadError>;
