// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Comms protocol constants and message types.
//!
//! Every multi-byte field on the wire is a little-endian integer.

pub mod codec;
pub mod download;

use crate::error::{ProtocolError, ProtocolResult};
use bitflags::bitflags;
use serde::Serialize;

pub use codec::Codec;
pub use download::{DownloadState, PeripheralDownload};

// Command opcodes
pub const CMD_NOP: u8 = 0x00;
pub const CMD_PING: u8 = 0x01;
pub const CMD_GET_BOARD_DEFINITION: u8 = 0x02;
pub const CMD_RESET: u8 = 0x04;

pub const CMD_PERIPH_GET_STATUS: u8 = 0x10;
pub const CMD_PERIPH_SET_STATUS: u8 = 0x11;
pub const CMD_PERIPH_SEND_MESSAGE: u8 = 0x12;
pub const CMD_PERIPH_GET_MESSAGE: u8 = 0x13;
pub const CMD_PERIPH_DOWNLOAD_HEADER: u8 = 0x14;
pub const CMD_PERIPH_DOWNLOAD_PACKET: u8 = 0x15;

pub const CMD_GET_STATUS: u8 = 0x20;
pub const CMD_STOP_EXECUTION: u8 = 0x21;
pub const CMD_PAUSE_EXECUTION: u8 = 0x22;
pub const CMD_CONTINUE_EXECUTION: u8 = 0x23;

pub const CMD_TRAP_DEFINE: u8 = 0x30;
pub const CMD_TRAP_READ: u8 = 0x31;
pub const CMD_TRAP_SET_STATUS: u8 = 0x32;
pub const CMD_TRAP_READ_STATUS: u8 = 0x33;

pub const CMD_MEMORY_WRITE: u8 = 0x40;
pub const CMD_MEMORY_READ: u8 = 0x48;

/// Low six bits carry [`RunFlags`].
pub const CMD_RUN: u8 = 0x80;

/// Selects the register address space in a memory command.
pub const MEMORY_SPACE_REGISTER: u8 = 0x10;
pub const MEMORY_SIZE_MASK: u8 = 0b111;

pub const ACK: u8 = b'A';
pub const NACK: u8 = b'N';

pub const NUM_TRAPS: usize = 32;

/// Largest element count a single memory command can carry.
pub const MAX_MEMORY_ELEMENTS: usize = 0xFFFF;

/// Largest payload of one peripheral download packet.
pub const MAX_PACKET_LENGTH: usize = 256;

/// Largest peripheral message in either direction.
pub const MAX_MESSAGE_LENGTH: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Space {
    Memory,
    Register,
}

impl Space {
    pub fn bits(self) -> u8 {
        match self {
            Space::Memory => 0x00,
            Space::Register => MEMORY_SPACE_REGISTER,
        }
    }
}

/// Round an element width up to one the device supports, in bytes.
pub fn element_bytes(width_bits: u32) -> ProtocolResult<usize> {
    match width_bits {
        1..=8 => Ok(1),
        9..=16 => Ok(2),
        17..=32 => Ok(4),
        33..=64 => Ok(8),
        _ => Err(ProtocolError::InvalidArgument(format!(
            "element width of {} bits is not supported",
            width_bits
        ))),
    }
}

/// Size code carried in the low bits of a memory command.
pub fn size_code(bytes: usize) -> ProtocolResult<u8> {
    match bytes {
        1 => Ok(0b000),
        2 => Ok(0b001),
        4 => Ok(0b010),
        8 => Ok(0b011),
        _ => Err(ProtocolError::InvalidArgument(format!(
            "element size of {} bytes is not supported",
            bytes
        ))),
    }
}

/// Inverse of [`size_code`].
pub fn size_from_code(code: u8) -> Option<usize> {
    match code & MEMORY_SIZE_MASK {
        0b000 => Some(1),
        0b001 => Some(2),
        0b010 => Some(4),
        0b011 => Some(8),
        _ => None,
    }
}

/// Little-endian bytes of `value`, truncated to `bytes`.
pub fn encode_le(value: u64, bytes: usize) -> Vec<u8> {
    value.to_le_bytes()[..bytes.min(8)].to_vec()
}

pub fn decode_le(data: &[u8]) -> u64 {
    data.iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardDefinition {
    pub cpu_type: u8,
    pub cpu_subtype: u16,
    /// `(id, sub_id)` of each peripheral, in device order.
    pub peripherals: Vec<(u8, u16)>,
    /// `(address, length)` of each memory segment.
    pub segments: Vec<(u32, u32)>,
}

impl BoardDefinition {
    /// Body length as announced in the response header.
    pub fn message_length(&self) -> usize {
        3 + 1 + 3 * self.peripherals.len() + 1 + 8 * self.segments.len()
    }

    /// Full response, including the length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.message_length());
        out.extend_from_slice(&(self.message_length() as u16).to_le_bytes());
        out.push(self.cpu_type);
        out.extend_from_slice(&self.cpu_subtype.to_le_bytes());
        out.push(self.peripherals.len() as u8);
        for (id, sub_id) in &self.peripherals {
            out.push(*id);
            out.extend_from_slice(&sub_id.to_le_bytes());
        }
        out.push(self.segments.len() as u8);
        for (addr, len) in &self.segments {
            out.extend_from_slice(&addr.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Reset,
    Busy,
    Stopped,
    StoppedBreakpoint,
    StoppedWatchpoint,
    StoppedMemFault,
    StoppedProgReq,
    Running,
    RunningSwi,
    Unknown(u8),
}

impl Status {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Status::Reset,
            0x01 => Status::Busy,
            0x40 => Status::Stopped,
            0x41 => Status::StoppedBreakpoint,
            0x42 => Status::StoppedWatchpoint,
            0x43 => Status::StoppedMemFault,
            0x44 => Status::StoppedProgReq,
            0x80 => Status::Running,
            0x81 => Status::RunningSwi,
            other => Status::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Status::Reset => 0x00,
            Status::Busy => 0x01,
            Status::Stopped => 0x40,
            Status::StoppedBreakpoint => 0x41,
            Status::StoppedWatchpoint => 0x42,
            Status::StoppedMemFault => 0x43,
            Status::StoppedProgReq => 0x44,
            Status::Running => 0x80,
            Status::RunningSwi => 0x81,
            Status::Unknown(code) => code,
        }
    }

    pub fn is_running(self) -> bool {
        self.code() & 0x80 != 0
    }

    pub fn is_stopped(self) -> bool {
        self.code() & 0xC0 == 0x40
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionStatus {
    pub status: Status,
    pub steps_remaining: u32,
    pub steps_since_reset: u32,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RunFlags: u8 {
        const HALT_ON_WATCHPOINT = 1 << 5;
        const HALT_ON_BREAKPOINT = 1 << 4;
        const HALT_ON_MEM_FAULT = 1 << 3;
        const STEP_OVER_SWI = 1 << 2;
        const STEP_OVER_BL = 1 << 1;
        const BREAK_ON_FIRST_INSTRUCTION = 1 << 0;
    }
}

impl Default for RunFlags {
    fn default() -> Self {
        RunFlags::HALT_ON_WATCHPOINT
            | RunFlags::HALT_ON_BREAKPOINT
            | RunFlags::BREAK_ON_FIRST_INSTRUCTION
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrapKind {
    Breakpoint,
    Watchpoint,
    Register,
}

impl TrapKind {
    pub fn bits(self) -> u8 {
        match self {
            TrapKind::Breakpoint => 0x00,
            TrapKind::Watchpoint => 0x04,
            TrapKind::Register => 0x08,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x0C {
            0x00 => Some(TrapKind::Breakpoint),
            0x04 => Some(TrapKind::Watchpoint),
            0x08 => Some(TrapKind::Register),
            _ => None,
        }
    }
}

/// Operation requested of a trap slot by `TRAP_SET_STATUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOp {
    Nop,
    Delete,
    Deactivate,
    Activate,
}

impl TrapOp {
    /// The `(first, second)` bit pair sent for this operation.
    pub fn bits(self) -> (bool, bool) {
        match self {
            TrapOp::Nop => (false, false),
            TrapOp::Delete => (true, false),
            TrapOp::Deactivate => (false, true),
            TrapOp::Activate => (true, true),
        }
    }

    pub fn from_bits(bits: (bool, bool)) -> Self {
        match bits {
            (false, false) => TrapOp::Nop,
            (true, false) => TrapOp::Delete,
            (false, true) => TrapOp::Deactivate,
            (true, true) => TrapOp::Activate,
        }
    }
}

/// State of a trap slot as reported by `TRAP_READ_STATUS`.
///
/// Shares its bit patterns with [`TrapOp`]; `(0,0)` reads as
/// `NotImplemented`, never as a pending no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrapState {
    NotImplemented,
    NotDefined,
    Inactive,
    Active,
}

impl TrapState {
    pub fn bits(self) -> (bool, bool) {
        match self {
            TrapState::NotImplemented => (false, false),
            TrapState::NotDefined => (true, false),
            TrapState::Inactive => (false, true),
            TrapState::Active => (true, true),
        }
    }

    pub fn from_bits(bits: (bool, bool)) -> Self {
        match bits {
            (false, false) => TrapState::NotImplemented,
            (true, false) => TrapState::NotDefined,
            (false, true) => TrapState::Inactive,
            (true, true) => TrapState::Active,
        }
    }

    /// State reached after applying `op`. Unimplemented slots never change.
    pub fn apply(self, op: TrapOp) -> Self {
        match (self, op) {
            (TrapState::NotImplemented, _) | (_, TrapOp::Nop) => self,
            (_, TrapOp::Delete) => TrapState::NotDefined,
            (_, TrapOp::Deactivate) => TrapState::Inactive,
            (_, TrapOp::Activate) => TrapState::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCondition {
    InRange,
    InMask,
    Raw(u8),
}

impl TrapCondition {
    pub fn bits(self) -> u8 {
        match self {
            TrapCondition::InRange => 0b10,
            TrapCondition::InMask => 0b11,
            TrapCondition::Raw(bits) => bits & 0b11,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b10 => TrapCondition::InRange,
            0b11 => TrapCondition::InMask,
            other => TrapCondition::Raw(other),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TrapAccess: u8 {
        const IN_USER = 1 << 7;
        const IN_PRIVILEGED = 1 << 6;
        const ON_READ = 1 << 5;
        const ON_WRITE = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapDefinition {
    pub access: TrapAccess,
    pub addr_condition: TrapCondition,
    pub data_condition: TrapCondition,
    pub sizes: u8,
    pub addr_a: u32,
    pub addr_b: u32,
    pub data_a: u32,
    pub data_b: u32,
}

impl Default for TrapDefinition {
    fn default() -> Self {
        Self {
            access: TrapAccess::IN_USER | TrapAccess::ON_READ | TrapAccess::ON_WRITE,
            addr_condition: TrapCondition::InRange,
            data_condition: TrapCondition::InRange,
            sizes: 0,
            addr_a: 0,
            addr_b: 0,
            data_a: 0,
            data_b: 0,
        }
    }
}

impl TrapDefinition {
    pub fn conditions_byte(&self) -> u8 {
        self.access.bits() | (self.addr_condition.bits() << 2) | self.data_condition.bits()
    }

    pub fn from_conditions_byte(conditions: u8) -> Self {
        Self {
            access: TrapAccess::from_bits_truncate(conditions),
            addr_condition: TrapCondition::from_bits(conditions >> 2),
            data_condition: TrapCondition::from_bits(conditions),
            ..Self::default()
        }
    }

    /// Body shared by `TRAP_DEFINE` requests and `TRAP_READ` responses.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.conditions_byte(), self.sizes];
        for field in [self.addr_a, self.addr_b, self.data_a, self.data_b] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out
    }

    pub const ENCODED_LEN: usize = 18;
}

/// Split slot operations into the two status bitmasks, `(first, second)`.
pub fn trap_masks(changes: &[(usize, TrapOp)]) -> ProtocolResult<(u32, u32)> {
    let mut first = 0u32;
    let mut second = 0u32;
    for &(slot, op) in changes {
        if slot >= NUM_TRAPS {
            return Err(ProtocolError::InvalidArgument(format!(
                "trap slot {} out of range",
                slot
            )));
        }
        let (b0, b1) = op.bits();
        first |= u32::from(b0) << slot;
        second |= u32::from(b1) << slot;
    }
    Ok((first, second))
}

/// Per-slot bit pairs from the two status bitmasks.
pub fn trap_pairs(first: u32, second: u32) -> [(bool, bool); NUM_TRAPS] {
    let mut out = [(false, false); NUM_TRAPS];
    for (slot, pair) in out.iter_mut().enumerate() {
        *pair = (first >> slot & 1 != 0, second >> slot & 1 != 0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_rounding() {
        for bits in 1..=64u32 {
            let bytes = element_bytes(bits).unwrap();
            let rounded = bytes as u32 * 8;
            assert!(rounded >= bits);
            // nothing smaller in {8, 16, 32, 64} would fit
            assert!(rounded == 8 || rounded / 2 < bits);
        }
        assert!(element_bytes(0).is_err());
        assert!(element_bytes(65).is_err());
    }

    #[test]
    fn test_size_codes() {
        assert_eq!(size_code(1).unwrap(), 0b000);
        assert_eq!(size_code(8).unwrap(), 0b011);
        assert!(size_code(3).is_err());
        assert_eq!(size_from_code(CMD_MEMORY_READ | 0b010), Some(4));
        assert_eq!(size_from_code(0b111), None);
    }

    #[test]
    fn test_board_definition_length() {
        let def = BoardDefinition {
            cpu_type: 3,
            cpu_subtype: 0x0200,
            peripherals: vec![(1, 2)],
            segments: vec![(0, 0x1_0000), (0x1_0000, 0x100)],
        };
        let bytes = def.encode();
        assert_eq!(def.message_length(), 3 + 1 + 3 + 1 + 16);
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]) as usize, def.message_length());
        assert_eq!(bytes.len(), 2 + def.message_length());
    }

    #[test]
    fn test_trap_op_state_share_bits() {
        for op in [TrapOp::Nop, TrapOp::Delete, TrapOp::Deactivate, TrapOp::Activate] {
            assert_eq!(TrapOp::from_bits(op.bits()), op);
        }
        assert_eq!(TrapState::from_bits(TrapOp::Activate.bits()), TrapState::Active);
        assert_eq!(TrapState::from_bits(TrapOp::Delete.bits()), TrapState::NotDefined);
        assert_eq!(TrapState::from_bits((false, false)), TrapState::NotImplemented);
    }

    #[test]
    fn test_trap_state_transitions() {
        assert_eq!(TrapState::NotDefined.apply(TrapOp::Activate), TrapState::Active);
        assert_eq!(TrapState::Active.apply(TrapOp::Nop), TrapState::Active);
        assert_eq!(TrapState::Active.apply(TrapOp::Delete), TrapState::NotDefined);
        assert_eq!(
            TrapState::NotImplemented.apply(TrapOp::Activate),
            TrapState::NotImplemented
        );
    }

    #[test]
    fn test_trap_masks() {
        let (first, second) =
            trap_masks(&[(5, TrapOp::Activate), (7, TrapOp::Deactivate), (0, TrapOp::Delete)])
                .unwrap();
        assert_eq!(first, (1 << 5) | 1);
        assert_eq!(second, (1 << 5) | (1 << 7));
        let pairs = trap_pairs(first, second);
        assert_eq!(pairs[5], (true, true));
        assert_eq!(pairs[7], (false, true));
        assert_eq!(pairs[1], (false, false));
        assert!(trap_masks(&[(32, TrapOp::Activate)]).is_err());
    }

    #[test]
    fn test_trap_conditions_byte() {
        let def = TrapDefinition {
            access: TrapAccess::IN_PRIVILEGED | TrapAccess::ON_WRITE,
            addr_condition: TrapCondition::InMask,
            data_condition: TrapCondition::InRange,
            ..TrapDefinition::default()
        };
        assert_eq!(def.conditions_byte(), 0b0101_1110);
        let back = TrapDefinition::from_conditions_byte(def.conditions_byte());
        assert_eq!(back.access, def.access);
        assert_eq!(back.addr_condition, TrapCondition::InMask);
        assert_eq!(def.encode().len(), TrapDefinition::ENCODED_LEN);
    }

    #[test]
    fn test_default_run_flags() {
        assert_eq!(RunFlags::default().bits(), 0b11_0001);
        assert_eq!(CMD_RUN | RunFlags::default().bits(), 0xB1);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::from_code(0x42), Status::StoppedWatchpoint);
        assert_eq!(Status::from_code(0x99), Status::Unknown(0x99));
        assert!(Status::RunningSwi.is_running());
        assert!(Status::StoppedMemFault.is_stopped());
        assert!(!Status::Reset.is_stopped());
    }

    #[test]
    fn test_le_helpers() {
        assert_eq!(encode_le(0x1234_5678, 2), vec![0x78, 0x56]);
        assert_eq!(decode_le(&[0x78, 0x56, 0x34, 0x12]), 0x1234_5678);
    }
}
