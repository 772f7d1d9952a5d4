// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::io;

/// Failures raised by the protocol codec. The codec never contains these.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Got {got} bytes, expected {expected}")]
    ShortRead { expected: usize, got: usize },
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Malformed ping response {0:02X?}")]
    MalformedPing(Vec<u8>),
    #[error("Peripheral message too long: expected length <= {max}, got {got}")]
    PeriphMessageOverflow { max: usize, got: usize },
    #[error("Peripheral download rejected: {0}")]
    PeripheralDownload(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Transport I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures surfaced by the device access layer.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device communications have been killed")]
    Killed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl DeviceError {
    pub fn is_killed(&self) -> bool {
        matches!(self, DeviceError::Killed)
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
pub type DeviceResult<T> = Result<T, DeviceError>;
