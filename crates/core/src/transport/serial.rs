// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::Transport;
use kmdlink_config::SerialConfig;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::info;

/// A board attached over a serial line (8N1, no flow control).
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    write_timeout: Duration,
}

impl SerialTransport {
    pub fn open(device: &str, config: &SerialConfig) -> Result<Self, serialport::Error> {
        let port = serialport::new(device, config.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .open()?;

        info!("Opened serial port {} at {} baud", device, config.baud);

        Ok(Self {
            port,
            write_timeout: Duration::from_millis(config.write_timeout_ms),
        })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        // Writes use their own, shorter timeout.
        let read_timeout = self.port.timeout();
        self.port.set_timeout(self.write_timeout)?;
        let result = self.port.write_all(data);
        self.port.set_timeout(read_timeout)?;
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}
