// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! An in-process board that speaks the device side of the comms protocol.
//!
//! Commands are parsed incrementally: a partially written command waits for
//! the rest of its bytes, exactly as a real monitor would, so a host that
//! loses alignment stays misaligned until it resyncs.

pub mod memory;

use crate::protocol::*;
use crate::transport::Transport;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

pub use memory::LinearMemory;

pub const NUM_SIM_REGISTERS: usize = 256;

/// Board state, visible to tests through [`SimBoard::state`].
#[derive(Debug)]
pub struct BoardState {
    pub definition: BoardDefinition,
    pub version: u32,
    pub memory: LinearMemory,
    pub registers: [u64; NUM_SIM_REGISTERS],
    pub trap_states: [TrapState; NUM_TRAPS],
    pub trap_definitions: HashMap<(TrapKind, u8), TrapDefinition>,
    pub status: Status,
    pub steps_remaining: u32,
    pub steps_since_reset: u32,
    pub last_run_flags: Option<RunFlags>,
    pub periph_status: HashMap<u8, u32>,
    /// Messages sent to each peripheral.
    pub periph_inbox: HashMap<u8, Vec<Vec<u8>>>,
    /// Messages each peripheral will hand back, oldest first.
    pub periph_outbox: HashMap<u8, VecDeque<Vec<u8>>>,
    /// Data received by each peripheral's most recent download.
    pub downloads: HashMap<u8, Vec<u8>>,
    pub nack_header: bool,
    /// Zero-based index of the download packet to reject.
    pub nack_packet: Option<usize>,
    packets_seen: usize,
    /// When set the board swallows commands and never answers.
    pub silent: bool,
    /// Opcodes of every complete command processed, in order.
    pub commands: Vec<u8>,
    input: Vec<u8>,
    output: VecDeque<u8>,
}

impl BoardState {
    fn new(definition: BoardDefinition, memory_words: usize, word_bytes: usize) -> Self {
        Self {
            definition,
            version: 1,
            memory: LinearMemory::new(memory_words, word_bytes),
            registers: [0; NUM_SIM_REGISTERS],
            // Every slot is implemented but empty.
            trap_states: [TrapState::NotDefined; NUM_TRAPS],
            trap_definitions: HashMap::new(),
            status: Status::Reset,
            steps_remaining: 0,
            steps_since_reset: 0,
            last_run_flags: None,
            periph_status: HashMap::new(),
            periph_inbox: HashMap::new(),
            periph_outbox: HashMap::new(),
            downloads: HashMap::new(),
            nack_header: false,
            nack_packet: None,
            packets_seen: 0,
            silent: false,
            commands: Vec::new(),
            input: Vec::new(),
            output: VecDeque::new(),
        }
    }

    fn respond(&mut self, bytes: &[u8]) {
        self.output.extend(bytes.iter().copied());
    }

    /// Bytes needed for the command at the head of the input, if known yet.
    fn command_length(&self) -> Option<usize> {
        let input = &self.input;
        let op = *input.first()?;
        let len = match op {
            CMD_NOP | CMD_PING | CMD_GET_BOARD_DEFINITION | CMD_RESET => 1,
            CMD_PERIPH_GET_STATUS => 2,
            CMD_PERIPH_SET_STATUS => 6,
            CMD_PERIPH_SEND_MESSAGE => 3 + usize::from(*input.get(2)?),
            CMD_PERIPH_GET_MESSAGE => 3,
            CMD_PERIPH_DOWNLOAD_HEADER => 6,
            CMD_PERIPH_DOWNLOAD_PACKET => match *input.get(2)? {
                0 => 3 + MAX_PACKET_LENGTH,
                n => 3 + usize::from(n),
            },
            CMD_GET_STATUS
            | CMD_STOP_EXECUTION
            | CMD_PAUSE_EXECUTION
            | CMD_CONTINUE_EXECUTION
            | CMD_TRAP_READ_STATUS => 1,
            CMD_TRAP_SET_STATUS => 9,
            op if op & 0xF3 == CMD_TRAP_DEFINE => 2 + TrapDefinition::ENCODED_LEN,
            op if op & 0xF3 == CMD_TRAP_READ => 2,
            op if op & 0xE0 == 0x40 => {
                if op & 0x08 != 0 {
                    7
                } else {
                    let size = size_from_code(op).unwrap_or(1);
                    let count = usize::from(u16::from_le_bytes([*input.get(5)?, *input.get(6)?]));
                    7 + count * size
                }
            }
            op if op & 0xC0 == CMD_RUN => 5,
            // Unknown opcodes are skipped one byte at a time.
            _ => 1,
        };
        Some(len)
    }

    fn process_input(&mut self) {
        while let Some(len) = self.command_length() {
            if self.input.len() < len {
                break;
            }
            let command: Vec<u8> = self.input.drain(..len).collect();
            if self.silent {
                continue;
            }
            trace!("sim rx {:02X?}", command);
            self.commands.push(command[0]);
            self.execute(&command);
        }
    }

    fn execute(&mut self, cmd: &[u8]) {
        let u32_at = |i: usize| u32::from_le_bytes([cmd[i], cmd[i + 1], cmd[i + 2], cmd[i + 3]]);
        match cmd[0] {
            CMD_NOP => {}
            CMD_PING => {
                let reply = format!("OK{:02}", self.version % 100);
                self.respond(reply.as_bytes());
            }
            CMD_GET_BOARD_DEFINITION => {
                let encoded = self.definition.encode();
                self.respond(&encoded);
            }
            CMD_RESET => {
                self.registers = [0; NUM_SIM_REGISTERS];
                self.status = Status::Reset;
                self.steps_remaining = 0;
                self.steps_since_reset = 0;
            }
            CMD_PERIPH_GET_STATUS => {
                let status = self.periph_status.get(&cmd[1]).copied().unwrap_or(0);
                self.respond(&status.to_le_bytes());
            }
            CMD_PERIPH_SET_STATUS => {
                self.periph_status.insert(cmd[1], u32_at(2));
            }
            CMD_PERIPH_SEND_MESSAGE => {
                let message = cmd[3..].to_vec();
                let accepted = message.len() as u8;
                self.periph_inbox.entry(cmd[1]).or_default().push(message);
                self.respond(&[accepted]);
            }
            CMD_PERIPH_GET_MESSAGE => {
                let message = self
                    .periph_outbox
                    .get_mut(&cmd[1])
                    .and_then(VecDeque::pop_front)
                    .unwrap_or_default();
                self.respond(&[message.len() as u8]);
                self.respond(&message);
            }
            CMD_PERIPH_DOWNLOAD_HEADER => {
                if self.nack_header {
                    self.respond(&[NACK]);
                } else {
                    self.packets_seen = 0;
                    self.downloads.insert(cmd[1], Vec::with_capacity(u32_at(2) as usize));
                    self.respond(&[ACK]);
                }
            }
            CMD_PERIPH_DOWNLOAD_PACKET => {
                let index = self.packets_seen;
                self.packets_seen += 1;
                if self.nack_packet == Some(index) {
                    self.respond(&[NACK]);
                } else {
                    self.downloads.entry(cmd[1]).or_default().extend_from_slice(&cmd[3..]);
                    self.respond(&[ACK]);
                }
            }
            CMD_GET_STATUS => {
                let mut reply = vec![self.status.code()];
                reply.extend_from_slice(&self.steps_remaining.to_le_bytes());
                reply.extend_from_slice(&self.steps_since_reset.to_le_bytes());
                self.respond(&reply);
            }
            CMD_STOP_EXECUTION => {
                self.status = Status::Stopped;
                self.steps_remaining = 0;
            }
            CMD_PAUSE_EXECUTION => self.status = Status::Stopped,
            CMD_CONTINUE_EXECUTION => self.run_for(self.steps_remaining),
            CMD_TRAP_SET_STATUS => {
                let second = u32_at(1);
                let first = u32_at(5);
                for (slot, bits) in trap_pairs(first, second).iter().enumerate() {
                    self.trap_states[slot] = self.trap_states[slot].apply(TrapOp::from_bits(*bits));
                }
            }
            CMD_TRAP_READ_STATUS => {
                let (mut first, mut second) = (0u32, 0u32);
                for (slot, state) in self.trap_states.iter().enumerate() {
                    let (b0, b1) = state.bits();
                    first |= u32::from(b0) << slot;
                    second |= u32::from(b1) << slot;
                }
                let mut reply = second.to_le_bytes().to_vec();
                reply.extend_from_slice(&first.to_le_bytes());
                self.respond(&reply);
            }
            op if op & 0xF3 == CMD_TRAP_DEFINE => {
                let Some(kind) = TrapKind::from_bits(op) else { return };
                let def = TrapDefinition {
                    sizes: cmd[3],
                    addr_a: u32_at(4),
                    addr_b: u32_at(8),
                    data_a: u32_at(12),
                    data_b: u32_at(16),
                    ..TrapDefinition::from_conditions_byte(cmd[2])
                };
                self.trap_definitions.insert((kind, cmd[1]), def);
                // Defining a deleted slot leaves it inactive.
                let slot = usize::from(cmd[1]) % NUM_TRAPS;
                if self.trap_states[slot] == TrapState::NotDefined {
                    self.trap_states[slot] = TrapState::Inactive;
                }
            }
            op if op & 0xF3 == CMD_TRAP_READ => {
                let def = TrapKind::from_bits(op)
                    .and_then(|kind| self.trap_definitions.get(&(kind, cmd[1])).copied())
                    .unwrap_or(TrapDefinition {
                        access: TrapAccess::empty(),
                        addr_condition: TrapCondition::Raw(0),
                        data_condition: TrapCondition::Raw(0),
                        ..TrapDefinition::default()
                    });
                self.respond(&def.encode());
            }
            op if op & 0xE0 == 0x40 => self.memory_command(cmd),
            op if op & 0xC0 == CMD_RUN => {
                self.last_run_flags = Some(RunFlags::from_bits_truncate(op));
                self.run_for(u32_at(1));
            }
            _ => {}
        }
    }

    fn memory_command(&mut self, cmd: &[u8]) {
        let op = cmd[0];
        let size = size_from_code(op).unwrap_or(1);
        let addr = u32::from_le_bytes([cmd[1], cmd[2], cmd[3], cmd[4]]);
        let count = usize::from(u16::from_le_bytes([cmd[5], cmd[6]]));
        let register = op & MEMORY_SPACE_REGISTER != 0;
        let mask = if size >= 8 { u64::MAX } else { (1u64 << (size * 8)) - 1 };

        if op & 0x08 != 0 {
            let mut reply = Vec::with_capacity(count * size);
            for i in 0..count {
                let value = if register {
                    self.registers
                        .get((addr as usize).saturating_add(i))
                        .map(|v| v & mask)
                        .unwrap_or(0)
                } else {
                    let step = (size / self.memory.word_bytes()).max(1) as u32;
                    let at = addr.wrapping_add((i as u32).wrapping_mul(step));
                    self.memory.read_element(at, size)
                };
                reply.extend_from_slice(&encode_le(value, size));
            }
            self.respond(&reply);
        } else {
            for (i, chunk) in cmd[7..].chunks(size).enumerate() {
                let value = decode_le(chunk);
                if register {
                    if let Some(slot) = self.registers.get_mut((addr as usize).saturating_add(i)) {
                        *slot = value;
                    }
                } else {
                    let step = (size / self.memory.word_bytes()).max(1) as u32;
                    let at = addr.wrapping_add((i as u32).wrapping_mul(step));
                    self.memory.write_element(at, size, value);
                }
            }
        }
    }

    /// Execution is instantaneous: the board counts the steps and stops.
    fn run_for(&mut self, steps: u32) {
        self.steps_since_reset = self.steps_since_reset.wrapping_add(steps);
        self.steps_remaining = 0;
        self.status = Status::Stopped;
    }
}

/// Handle to a simulated board. Clones share one board.
#[derive(Debug, Clone)]
pub struct SimBoard {
    state: Arc<Mutex<BoardState>>,
}

impl SimBoard {
    pub fn new(definition: BoardDefinition, memory_words: usize, word_bytes: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BoardState::new(
                definition,
                memory_words,
                word_bytes,
            ))),
        }
    }

    /// A STUMP board with a full 64K-word memory.
    pub fn stump() -> Self {
        Self::new(
            BoardDefinition {
                cpu_type: 3,
                cpu_subtype: 0x0000,
                peripherals: Vec::new(),
                segments: vec![(0, 0x1_0000)],
            },
            0x1_0000,
            2,
        )
    }

    pub fn state(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue unsolicited bytes, as a confused board might emit.
    pub fn inject_output(&self, bytes: &[u8]) {
        self.state().respond(bytes);
    }

    /// Queue a message for the host to collect from peripheral `num`.
    pub fn queue_message(&self, num: u8, message: &[u8]) {
        self.state()
            .periph_outbox
            .entry(num)
            .or_default()
            .push_back(message.to_vec());
    }
}

impl Transport for SimBoard {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        let n = buf.len().min(state.output.len());
        for (slot, byte) in buf.iter_mut().zip(state.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        state.input.extend_from_slice(data);
        state.process_input();
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_command_waits() {
        let mut board = SimBoard::stump();
        board.write(&[CMD_MEMORY_WRITE | 0b001, 0x10, 0, 0]).unwrap();
        assert!(board.state().commands.is_empty());
        board.write(&[0, 1, 0, 0xFF, 0x00]).unwrap();
        assert_eq!(board.state().commands, vec![0x41]);
        assert_eq!(board.state().memory.read_element(0x10, 2), 0x00FF);
    }

    #[test]
    fn test_ping_reply() {
        let mut board = SimBoard::stump();
        board.write(&[CMD_PING]).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(board.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"OK01");
        assert_eq!(board.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_codec_against_board() {
        let board = SimBoard::stump();
        let mut codec = Codec::new(board.clone());
        assert_eq!(codec.ping().unwrap(), 1);
        assert_eq!(codec.get_board_definition().unwrap().cpu_type, 3);

        codec.memory_write(Space::Memory, 16, 0x20, &[1, 2, 3]).unwrap();
        assert_eq!(codec.memory_read(Space::Memory, 16, 0x20, 3).unwrap(), vec![1, 2, 3]);
        // 32-bit elements cover two 16-bit words each.
        assert_eq!(codec.memory_read(Space::Memory, 32, 0x20, 1).unwrap(), vec![0x0002_0001]);

        codec.memory_write(Space::Register, 16, 7, &[0x1234]).unwrap();
        assert_eq!(board.state().registers[7], 0x1234);
    }

    #[test]
    fn test_memory_access_wraps_at_top_of_address_space() {
        let board = SimBoard::stump();
        let mut codec = Codec::new(board.clone());
        codec.memory_write(Space::Memory, 16, 0, &[0x55]).unwrap();

        // Word 0xFFFFFFFF is outside the store and the next one wraps to 0.
        assert_eq!(
            codec.memory_read(Space::Memory, 16, 0xFFFF_FFFF, 2).unwrap(),
            vec![0, 0x55]
        );
        codec
            .memory_write(Space::Memory, 16, 0xFFFF_FFFF, &[0x1111, 0x2222])
            .unwrap();
        assert_eq!(board.state().memory.read_element(0, 2), 0x2222);
    }

    #[test]
    fn test_trap_status_round_trip() {
        let board = SimBoard::stump();
        let mut codec = Codec::new(board);
        let before = codec.trap_read_status().unwrap();
        codec.trap_set_status(&[(5, TrapOp::Activate)]).unwrap();
        let after = codec.trap_read_status().unwrap();
        assert_eq!(after[5], TrapState::Active);
        for slot in (0..NUM_TRAPS).filter(|&s| s != 5) {
            assert_eq!(after[slot], before[slot]);
        }
    }

    #[test]
    fn test_run_counts_steps() {
        let board = SimBoard::stump();
        let mut codec = Codec::new(board.clone());
        codec.run(25, RunFlags::default()).unwrap();
        let status = codec.get_status().unwrap();
        assert_eq!(status.status, Status::Stopped);
        assert_eq!(status.steps_since_reset, 25);
        assert_eq!(board.state().last_run_flags, Some(RunFlags::default()));
        codec.reset().unwrap();
        assert_eq!(codec.get_status().unwrap().status, Status::Reset);
    }

    #[test]
    fn test_download_collects_data() {
        let board = SimBoard::stump();
        let mut codec = Codec::new(board.clone());
        let data: Vec<u8> = (0..=255u8).cycle().take(300).collect();
        let count = codec
            .periph_download(2, data.clone(), 256)
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
            .len();
        assert_eq!(count, 2);
        assert_eq!(board.state().downloads.get(&2), Some(&data));
    }

    #[test]
    fn test_peripheral_messages() {
        let board = SimBoard::stump();
        board.queue_message(1, b"hello");
        let mut codec = Codec::new(board.clone());
        assert_eq!(codec.periph_get_message(1, 255).unwrap(), b"hello".to_vec());
        assert_eq!(codec.periph_send_message(1, b"hi").unwrap(), 2);
        codec.periph_set_status(1, 0xABCD).unwrap();
        assert_eq!(codec.periph_get_status(1).unwrap(), 0xABCD);
        assert_eq!(board.state().periph_inbox[&1], vec![b"hi".to_vec()]);
    }
}
