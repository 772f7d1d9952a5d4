// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod device;
pub mod error;
pub mod events;
pub mod format;
pub mod protocol;
pub mod sim;
pub mod transport;

pub use device::{Device, MemoryLoad, MemoryWrite, PeriphDownload, SessionState};
pub use error::{DeviceError, DeviceResult, ProtocolError, ProtocolResult};
pub use events::{EventLog, LogEntry};
pub use format::{DisplayFormat, Radix};
pub use protocol::{BoardDefinition, Codec, ExecutionStatus, RunFlags, Status};
pub use transport::Transport;

/// Cumulative progress of a long operation. `total` is fixed when the
/// operation starts; `completed` never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub completed: u64,
    pub total: u64,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}
