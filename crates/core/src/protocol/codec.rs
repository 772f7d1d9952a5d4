// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::*;
use crate::transport::Transport;
use tracing::{debug, trace};

/// Encodes commands onto a [`Transport`] and decodes the responses.
///
/// The codec keeps no state of its own and contains no failures: every
/// error is returned to the caller.
pub struct Codec<T> {
    transport: T,
}

impl<T: Transport> Codec<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub fn close(&mut self) -> ProtocolResult<()> {
        self.transport.close()?;
        Ok(())
    }

    fn send(&mut self, command: &[u8]) -> ProtocolResult<()> {
        trace!("tx {:02X?}", command);
        self.transport.write(command)?;
        self.transport.flush()?;
        Ok(())
    }

    /// Read exactly `n` bytes, failing with `ShortRead` if the transport
    /// runs dry first.
    pub fn read_exact(&mut self, n: usize) -> ProtocolResult<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut got = 0;
        while got < n {
            let count = self.transport.read(&mut buf[got..])?;
            if count == 0 {
                return Err(ProtocolError::ShortRead { expected: n, got });
            }
            got += count;
        }
        trace!("rx {:02X?}", buf);
        Ok(buf)
    }

    fn read_u8(&mut self) -> ProtocolResult<u8> {
        Ok(self.read_exact(1)?[0])
    }

    fn read_u16(&mut self) -> ProtocolResult<u16> {
        let b = self.read_exact(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> ProtocolResult<u32> {
        let b = self.read_exact(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Discard up to `limit` bytes of pending input. Returns how many were dropped.
    pub fn drain(&mut self, limit: usize) -> ProtocolResult<usize> {
        let mut buf = [0u8; 256];
        let mut dropped = 0;
        while dropped < limit {
            let want = buf.len().min(limit - dropped);
            let n = self.transport.read(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            dropped += n;
        }
        if dropped > 0 {
            debug!("Discarded {} stale bytes", dropped);
        }
        Ok(dropped)
    }

    pub fn nop(&mut self) -> ProtocolResult<()> {
        self.send(&[CMD_NOP])
    }

    /// Returns the monitor's software version.
    pub fn ping(&mut self) -> ProtocolResult<u32> {
        self.send(&[CMD_PING])?;
        let response = self.read_exact(4)?;
        if &response[..2] != b"OK" {
            return Err(ProtocolError::MalformedPing(response));
        }
        let version = std::str::from_utf8(&response[2..])
            .ok()
            .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse::<u32>().ok());
        version.ok_or(ProtocolError::MalformedPing(response))
    }

    pub fn get_board_definition(&mut self) -> ProtocolResult<BoardDefinition> {
        self.send(&[CMD_GET_BOARD_DEFINITION])?;

        let declared = usize::from(self.read_u16()?);
        let mut actual = 0;

        let cpu_type = self.read_u8()?;
        let cpu_subtype = self.read_u16()?;
        actual += 3;

        let peripheral_count = self.read_u8()?;
        actual += 1;
        let mut peripherals = Vec::with_capacity(usize::from(peripheral_count));
        for _ in 0..peripheral_count {
            let id = self.read_u8()?;
            let sub_id = self.read_u16()?;
            actual += 3;
            peripherals.push((id, sub_id));
        }

        let segment_count = self.read_u8()?;
        actual += 1;
        let mut segments = Vec::with_capacity(usize::from(segment_count));
        for _ in 0..segment_count {
            let addr = self.read_u32()?;
            let len = self.read_u32()?;
            actual += 8;
            segments.push((addr, len));
        }

        if declared != actual {
            return Err(ProtocolError::MalformedResponse(format!(
                "board definition of length {}, expected {}",
                actual, declared
            )));
        }

        Ok(BoardDefinition {
            cpu_type,
            cpu_subtype,
            peripherals,
            segments,
        })
    }

    pub fn reset(&mut self) -> ProtocolResult<()> {
        self.send(&[CMD_RESET])
    }

    pub fn periph_get_status(&mut self, num: u8) -> ProtocolResult<u32> {
        self.send(&[CMD_PERIPH_GET_STATUS, num])?;
        self.read_u32()
    }

    pub fn periph_set_status(&mut self, num: u8, status: u32) -> ProtocolResult<()> {
        let mut cmd = vec![CMD_PERIPH_SET_STATUS, num];
        cmd.extend_from_slice(&status.to_le_bytes());
        self.send(&cmd)
    }

    /// Returns the number of bytes the peripheral accepted.
    pub fn periph_send_message(&mut self, num: u8, message: &[u8]) -> ProtocolResult<u8> {
        if message.len() > MAX_MESSAGE_LENGTH {
            return Err(ProtocolError::InvalidArgument(format!(
                "message of {} bytes exceeds {}",
                message.len(),
                MAX_MESSAGE_LENGTH
            )));
        }
        let mut cmd = vec![CMD_PERIPH_SEND_MESSAGE, num, message.len() as u8];
        cmd.extend_from_slice(message);
        self.send(&cmd)?;
        self.read_u8()
    }

    pub fn periph_get_message(&mut self, num: u8, max_length: u8) -> ProtocolResult<Vec<u8>> {
        self.send(&[CMD_PERIPH_GET_MESSAGE, num, max_length])?;
        let length = usize::from(self.read_u8()?);
        // Consume the message even when it is too long so the stream stays aligned.
        let message = self.read_exact(length)?;
        if length > usize::from(max_length) {
            return Err(ProtocolError::PeriphMessageOverflow {
                max: usize::from(max_length),
                got: length,
            });
        }
        Ok(message)
    }

    fn read_ack(&mut self, what: impl FnOnce() -> String) -> ProtocolResult<()> {
        match self.read_u8()? {
            ACK => Ok(()),
            NACK => Err(ProtocolError::PeripheralDownload(what())),
            other => Err(ProtocolError::MalformedResponse(format!(
                "expected 'A' or 'N', got {:#04x}",
                other
            ))),
        }
    }

    pub fn periph_download_header(&mut self, num: u8, length: u32) -> ProtocolResult<()> {
        let mut cmd = vec![CMD_PERIPH_DOWNLOAD_HEADER, num];
        cmd.extend_from_slice(&length.to_le_bytes());
        self.send(&cmd)?;
        self.read_ack(|| format!("header requesting length {} rejected", length))
    }

    /// Send one packet of 1 to 256 bytes. A full packet carries a length byte of 0.
    pub fn periph_download_packet(&mut self, num: u8, data: &[u8]) -> ProtocolResult<()> {
        if data.is_empty() || data.len() > MAX_PACKET_LENGTH {
            return Err(ProtocolError::InvalidArgument(format!(
                "packet of {} bytes, must be 1..={}",
                data.len(),
                MAX_PACKET_LENGTH
            )));
        }
        let mut cmd = vec![CMD_PERIPH_DOWNLOAD_PACKET, num, data.len() as u8];
        cmd.extend_from_slice(data);
        self.send(&cmd)?;
        self.read_ack(|| format!("packet of length {} rejected", data.len()))
    }

    /// Stream `data` into a peripheral. Nothing is sent until the returned
    /// iterator is advanced; it yields cumulative progress after every packet.
    pub fn periph_download(
        &mut self,
        num: u8,
        data: Vec<u8>,
        packet_length: usize,
    ) -> PeripheralDownload<'_, T> {
        PeripheralDownload::new(self, DownloadState::new(num, data, packet_length))
    }

    pub fn get_status(&mut self) -> ProtocolResult<ExecutionStatus> {
        self.send(&[CMD_GET_STATUS])?;
        let status = Status::from_code(self.read_u8()?);
        let steps_remaining = self.read_u32()?;
        let steps_since_reset = self.read_u32()?;
        Ok(ExecutionStatus {
            status,
            steps_remaining,
            steps_since_reset,
        })
    }

    pub fn stop_execution(&mut self) -> ProtocolResult<()> {
        self.send(&[CMD_STOP_EXECUTION])
    }

    /// Pause without clearing the steps-remaining counter.
    pub fn pause_execution(&mut self) -> ProtocolResult<()> {
        self.send(&[CMD_PAUSE_EXECUTION])
    }

    pub fn continue_execution(&mut self) -> ProtocolResult<()> {
        self.send(&[CMD_CONTINUE_EXECUTION])
    }

    fn check_slot(slot: usize) -> ProtocolResult<u8> {
        if slot < NUM_TRAPS {
            Ok(slot as u8)
        } else {
            Err(ProtocolError::InvalidArgument(format!(
                "trap slot {} out of range",
                slot
            )))
        }
    }

    pub fn trap_define(
        &mut self,
        kind: TrapKind,
        slot: usize,
        def: &TrapDefinition,
    ) -> ProtocolResult<()> {
        let num = Self::check_slot(slot)?;
        let mut cmd = vec![CMD_TRAP_DEFINE | kind.bits(), num];
        cmd.extend_from_slice(&def.encode());
        self.send(&cmd)
    }

    pub fn trap_read(&mut self, kind: TrapKind, slot: usize) -> ProtocolResult<TrapDefinition> {
        let num = Self::check_slot(slot)?;
        self.send(&[CMD_TRAP_READ | kind.bits(), num])?;
        let conditions = self.read_u8()?;
        let sizes = self.read_u8()?;
        let addr_a = self.read_u32()?;
        let addr_b = self.read_u32()?;
        let data_a = self.read_u32()?;
        let data_b = self.read_u32()?;
        Ok(TrapDefinition {
            sizes,
            addr_a,
            addr_b,
            data_a,
            data_b,
            ..TrapDefinition::from_conditions_byte(conditions)
        })
    }

    /// Apply operations to any number of slots in one exchange. Slots not
    /// listed receive a no-op.
    pub fn trap_set_status(&mut self, changes: &[(usize, TrapOp)]) -> ProtocolResult<()> {
        let (first, second) = trap_masks(changes)?;
        let mut cmd = vec![CMD_TRAP_SET_STATUS];
        cmd.extend_from_slice(&second.to_le_bytes());
        cmd.extend_from_slice(&first.to_le_bytes());
        self.send(&cmd)
    }

    pub fn trap_read_status(&mut self) -> ProtocolResult<[TrapState; NUM_TRAPS]> {
        self.send(&[CMD_TRAP_READ_STATUS])?;
        let second = self.read_u32()?;
        let first = self.read_u32()?;
        Ok(trap_pairs(first, second).map(TrapState::from_bits))
    }

    fn memory_header(
        opcode: u8,
        space: Space,
        width_bits: u32,
        addr: u32,
        count: usize,
    ) -> ProtocolResult<(Vec<u8>, usize)> {
        let bytes = element_bytes(width_bits)?;
        if count > MAX_MEMORY_ELEMENTS {
            return Err(ProtocolError::InvalidArgument(format!(
                "{} elements exceeds the per-command limit of {}",
                count, MAX_MEMORY_ELEMENTS
            )));
        }
        let mut cmd = vec![opcode | space.bits() | size_code(bytes)?];
        cmd.extend_from_slice(&addr.to_le_bytes());
        cmd.extend_from_slice(&(count as u16).to_le_bytes());
        Ok((cmd, bytes))
    }

    /// Write `values` as elements of `width_bits` (rounded up to a supported
    /// size) starting at `addr`.
    pub fn memory_write(
        &mut self,
        space: Space,
        width_bits: u32,
        addr: u32,
        values: &[u64],
    ) -> ProtocolResult<()> {
        let (mut cmd, bytes) =
            Self::memory_header(CMD_MEMORY_WRITE, space, width_bits, addr, values.len())?;
        for value in values {
            cmd.extend_from_slice(&encode_le(*value, bytes));
        }
        self.send(&cmd)
    }

    pub fn memory_read(
        &mut self,
        space: Space,
        width_bits: u32,
        addr: u32,
        count: usize,
    ) -> ProtocolResult<Vec<u64>> {
        let (cmd, bytes) = Self::memory_header(CMD_MEMORY_READ, space, width_bits, addr, count)?;
        self.send(&cmd)?;
        let data = self.read_exact(count * bytes)?;
        Ok(data.chunks(bytes).map(decode_le).collect())
    }

    pub fn run(&mut self, max_steps: u32, flags: RunFlags) -> ProtocolResult<()> {
        let mut cmd = vec![CMD_RUN | flags.bits()];
        cmd.extend_from_slice(&max_steps.to_le_bytes());
        self.send(&cmd)
    }
}
