// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Byte transports the codec talks through.

pub mod process;
pub mod serial;

#[cfg(test)]
pub(crate) mod scripted;

use std::io;

pub use process::ProcessTransport;
pub use serial::SerialTransport;

/// A raw byte pipe to a device.
pub trait Transport: Send {
    /// Read up to `buf.len()` bytes. Returns `Ok(0)` when nothing arrived
    /// before the transport's own timeout.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Push buffered output to the device. Called after every complete command.
    fn flush(&mut self) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}
