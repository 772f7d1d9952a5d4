// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Thread-safe, cached access to a device.
//!
//! Every accessor checks the kill-switch, takes the device lock, resyncs and
//! then issues its request. Read-style accessors record failures in the
//! [`EventLog`] before returning them; write-style accessors and peripheral
//! downloads just return them.
//!
//! Lock order is kill flag, then device, then cache. The kill flag and the
//! cache are never held across a protocol exchange. Register cache entries
//! are filled and evicted while the device lock is held.

use crate::error::{DeviceError, DeviceResult, ProtocolError};
use crate::events::EventLog;
use crate::protocol::*;
use crate::transport::Transport;
use crate::Progress;
use kmdlink_config::{DriverConfig, MemoryDescriptor, RegisterDescriptor};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

type DeviceCodec = Codec<Box<dyn Transport>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unknown,
    Syncing,
    Synced,
    Killed,
}

/// Cache key: the register's address and width. Aliases of one register
/// share an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterKey {
    pub addr: u32,
    pub width_bits: u32,
}

impl From<&RegisterDescriptor> for RegisterKey {
    fn from(reg: &RegisterDescriptor) -> Self {
        Self {
            addr: reg.addr,
            width_bits: reg.width_bits,
        }
    }
}

/// Memory write primitive used by image loaders.
pub trait MemoryWrite {
    /// Write `values`, each `elem_size_words` memory words wide, starting at
    /// word address `addr`.
    fn write_memory(
        &mut self,
        memory: &MemoryDescriptor,
        elem_size_words: u32,
        addr: u32,
        values: &[u64],
    ) -> DeviceResult<()>;
}

fn element_width_bits(memory: &MemoryDescriptor, elem_size_words: u32) -> DeviceResult<u32> {
    memory
        .word_width_bits
        .checked_mul(elem_size_words.max(1))
        .ok_or_else(|| {
            DeviceError::InvalidArgument(format!(
                "element of {} words is too wide",
                elem_size_words
            ))
        })
}

fn write_memory_chunks(
    codec: &mut DeviceCodec,
    width_bits: u32,
    elem_size_words: u32,
    addr: u32,
    values: &[u64],
) -> Result<(), ProtocolError> {
    let mut cursor = addr;
    for chunk in values.chunks(MAX_MEMORY_ELEMENTS) {
        codec.memory_write(Space::Memory, width_bits, cursor, chunk)?;
        cursor = cursor.wrapping_add((chunk.len() as u32).wrapping_mul(elem_size_words.max(1)));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct ResyncSettings {
    nops: usize,
    drain_limit: usize,
    packet_length: usize,
}

pub struct Device {
    codec: Mutex<DeviceCodec>,
    cache: Mutex<HashMap<RegisterKey, u64>>,
    killed: Mutex<bool>,
    baseline: Mutex<Option<BoardDefinition>>,
    state: Mutex<SessionState>,
    settings: ResyncSettings,
    log: Arc<EventLog>,
}

impl Device {
    pub fn new(transport: Box<dyn Transport>, config: &DriverConfig, log: Arc<EventLog>) -> Self {
        Self {
            codec: Mutex::new(Codec::new(transport)),
            cache: Mutex::new(HashMap::new()),
            killed: Mutex::new(false),
            baseline: Mutex::new(None),
            state: Mutex::new(SessionState::Unknown),
            settings: ResyncSettings {
                nops: config.resync_nops,
                drain_limit: config.drain_limit,
                packet_length: config.packet_length,
            },
            log,
        }
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state != SessionState::Killed {
            *state = next;
        }
    }

    /// Cut off all further communication. Calls already past their kill
    /// check finish normally.
    pub fn kill(&self) {
        *lock(&self.killed) = true;
        *lock(&self.state) = SessionState::Killed;
        info!("Device comms killed");
    }

    pub fn is_killed(&self) -> bool {
        *lock(&self.killed)
    }

    pub fn assert_not_killed(&self) -> DeviceResult<()> {
        if self.is_killed() {
            Err(DeviceError::Killed)
        } else {
            Ok(())
        }
    }

    /// Close the underlying transport. The device is killed first.
    pub fn close(&self) -> DeviceResult<()> {
        self.kill();
        lock(&self.codec).close()?;
        Ok(())
    }

    pub fn clear_cache(&self) {
        lock(&self.cache).clear();
    }

    pub fn cached_register(&self, reg: &RegisterDescriptor) -> Option<u64> {
        lock(&self.cache).get(&RegisterKey::from(reg)).copied()
    }

    /// Re-establish command alignment: ping, and if that fails flush the
    /// command channel with NOPs, drop stale input and ping once more.
    fn resync(&self, codec: &mut DeviceCodec) -> Result<(), ProtocolError> {
        self.set_state(SessionState::Syncing);
        if let Err(e) = codec.ping() {
            debug!("Ping failed ({}), resynchronising", e);
            // Whatever the board did while we were out of step is unknown.
            self.clear_cache();
            if let Err(e) = self.recover(codec) {
                self.set_state(SessionState::Unknown);
                return Err(e);
            }
            debug!("Resynchronised");
        }
        self.set_state(SessionState::Synced);
        Ok(())
    }

    fn recover(&self, codec: &mut DeviceCodec) -> Result<(), ProtocolError> {
        for _ in 0..self.settings.nops {
            codec.nop()?;
        }
        codec.drain(self.settings.drain_limit)?;
        codec.ping()?;
        Ok(())
    }

    /// Kill check, device lock, resync, then `f`.
    fn exchange<R>(
        &self,
        f: impl FnOnce(&mut DeviceCodec) -> Result<R, ProtocolError>,
    ) -> DeviceResult<R> {
        self.assert_not_killed()?;
        let mut codec = lock(&self.codec);
        self.resync(&mut codec)?;
        Ok(f(&mut *codec)?)
    }

    /// Like [`exchange`](Self::exchange), but failures are also logged.
    fn read_exchange<R>(
        &self,
        what: &str,
        f: impl FnOnce(&mut DeviceCodec) -> Result<R, ProtocolError>,
    ) -> DeviceResult<R> {
        self.exchange(f).map_err(|e| self.contain(what, e))
    }

    fn contain(&self, what: &str, err: DeviceError) -> DeviceError {
        if !err.is_killed() {
            self.log.log_error(&err, false, Some(what));
        }
        err
    }

    /// Ping the device, resyncing first if needed. Returns the monitor version.
    pub fn ping(&self) -> DeviceResult<u32> {
        self.read_exchange("ping", |c| c.ping())
    }

    pub fn get_board_definition(&self) -> DeviceResult<BoardDefinition> {
        self.read_exchange("get_board_definition", |c| c.get_board_definition())
    }

    /// Compare the board against the one first seen. Reports a change once,
    /// then forgets the old board so the next call re-baselines.
    pub fn board_definition_changed(&self) -> DeviceResult<bool> {
        let current = self.get_board_definition()?;
        let mut baseline = lock(&self.baseline);
        match baseline.take() {
            None => {
                *baseline = Some(current);
                Ok(false)
            }
            Some(known) if known == current => {
                *baseline = Some(known);
                Ok(false)
            }
            Some(_) => {
                info!("Board definition changed");
                Ok(true)
            }
        }
    }

    pub fn read_register(&self, reg: &RegisterDescriptor) -> DeviceResult<u64> {
        self.assert_not_killed()?;
        let key = RegisterKey::from(reg);
        if let Some(value) = lock(&self.cache).get(&key).copied() {
            return Ok(value);
        }

        // Filled under the device lock.
        self.read_exchange("read_register", |c| {
            let values = c.memory_read(Space::Register, reg.width_bits, reg.addr, 1)?;
            let value = values
                .first()
                .copied()
                .ok_or_else(|| ProtocolError::MalformedResponse("empty register read".into()))?
                & reg.mask();
            lock(&self.cache).insert(key, value);
            Ok(value)
        })
    }

    /// Write a register. The value is masked to the register's width. The
    /// cache entry is dropped before the write is sent and again once it
    /// has gone out.
    pub fn write_register(&self, reg: &RegisterDescriptor, value: u64) -> DeviceResult<()> {
        self.assert_not_killed()?;
        let key = RegisterKey::from(reg);
        lock(&self.cache).remove(&key);
        let value = value & reg.mask();
        self.exchange(|c| {
            let result = c.memory_write(Space::Register, reg.width_bits, reg.addr, &[value]);
            lock(&self.cache).remove(&key);
            result
        })
    }

    /// Read `count` elements of `elem_size_words` words each. Requests over
    /// the per-command element limit are split, under one device lock.
    pub fn read_memory(
        &self,
        memory: &MemoryDescriptor,
        elem_size_words: u32,
        addr: u32,
        count: usize,
    ) -> DeviceResult<Vec<u64>> {
        let width_bits = element_width_bits(memory, elem_size_words)?;
        self.read_exchange("read_memory", |c| {
            let mut out = Vec::with_capacity(count);
            let mut cursor = addr;
            while out.len() < count {
                let chunk = (count - out.len()).min(MAX_MEMORY_ELEMENTS);
                out.extend(c.memory_read(Space::Memory, width_bits, cursor, chunk)?);
                cursor = cursor.wrapping_add((chunk as u32).wrapping_mul(elem_size_words.max(1)));
            }
            Ok(out)
        })
    }

    pub fn write_memory(
        &self,
        memory: &MemoryDescriptor,
        elem_size_words: u32,
        addr: u32,
        values: &[u64],
    ) -> DeviceResult<()> {
        let width_bits = element_width_bits(memory, elem_size_words)?;
        self.exchange(|c| write_memory_chunks(c, width_bits, elem_size_words, addr, values))
    }

    pub fn reset(&self) -> DeviceResult<()> {
        let result = self.exchange(|c| c.reset());
        self.clear_cache();
        result
    }

    pub fn get_status(&self) -> DeviceResult<ExecutionStatus> {
        self.read_exchange("get_status", |c| c.get_status())
    }

    pub fn run(&self, max_steps: u32, flags: RunFlags) -> DeviceResult<()> {
        let result = self.exchange(|c| c.run(max_steps, flags));
        self.clear_cache();
        result
    }

    pub fn stop_execution(&self) -> DeviceResult<()> {
        self.exchange(|c| c.stop_execution())
    }

    pub fn pause_execution(&self) -> DeviceResult<()> {
        self.exchange(|c| c.pause_execution())
    }

    pub fn continue_execution(&self) -> DeviceResult<()> {
        let result = self.exchange(|c| c.continue_execution());
        self.clear_cache();
        result
    }

    pub fn trap_define(
        &self,
        kind: TrapKind,
        slot: usize,
        def: &TrapDefinition,
    ) -> DeviceResult<()> {
        self.exchange(|c| c.trap_define(kind, slot, def))
    }

    pub fn trap_read(&self, kind: TrapKind, slot: usize) -> DeviceResult<TrapDefinition> {
        self.read_exchange("trap_read", |c| c.trap_read(kind, slot))
    }

    pub fn trap_set_status(&self, changes: &[(usize, TrapOp)]) -> DeviceResult<()> {
        self.exchange(|c| c.trap_set_status(changes))
    }

    pub fn trap_read_status(&self) -> DeviceResult<[TrapState; NUM_TRAPS]> {
        self.read_exchange("trap_read_status", |c| c.trap_read_status())
    }

    pub fn periph_get_status(&self, num: u8) -> DeviceResult<u32> {
        self.read_exchange("periph_get_status", |c| c.periph_get_status(num))
    }

    pub fn periph_set_status(&self, num: u8, status: u32) -> DeviceResult<()> {
        self.exchange(|c| c.periph_set_status(num, status))
    }

    pub fn periph_send_message(&self, num: u8, message: &[u8]) -> DeviceResult<u8> {
        self.exchange(|c| c.periph_send_message(num, message))
    }

    pub fn periph_get_message(&self, num: u8, max_length: u8) -> DeviceResult<Vec<u8>> {
        self.read_exchange("periph_get_message", |c| c.periph_get_message(num, max_length))
    }

    /// Start a peripheral download. The device lock is held until the
    /// returned iterator is dropped; failures are returned, not logged.
    pub fn periph_download(&self, num: u8, data: Vec<u8>) -> DeviceResult<PeriphDownload<'_>> {
        self.assert_not_killed()?;
        let mut codec = lock(&self.codec);
        self.resync(&mut codec)?;
        Ok(PeriphDownload {
            device: self,
            codec,
            state: DownloadState::new(num, data, self.settings.packet_length),
        })
    }

    /// Take the device for a run of memory writes, such as an image load.
    /// Other callers wait until the returned session is dropped.
    pub fn begin_load(&self) -> DeviceResult<MemoryLoad<'_>> {
        self.assert_not_killed()?;
        let mut codec = lock(&self.codec);
        self.resync(&mut codec)?;
        Ok(MemoryLoad {
            device: self,
            codec,
        })
    }
}

/// Exclusive write access to a [`Device`]'s memory. Holds the device lock.
pub struct MemoryLoad<'a> {
    device: &'a Device,
    codec: MutexGuard<'a, DeviceCodec>,
}

impl MemoryWrite for MemoryLoad<'_> {
    fn write_memory(
        &mut self,
        memory: &MemoryDescriptor,
        elem_size_words: u32,
        addr: u32,
        values: &[u64],
    ) -> DeviceResult<()> {
        self.device.assert_not_killed()?;
        let width_bits = element_width_bits(memory, elem_size_words)?;
        write_memory_chunks(&mut self.codec, width_bits, elem_size_words, addr, values)?;
        Ok(())
    }
}

impl std::fmt::Debug for MemoryLoad<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLoad").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("state", &self.state())
            .field("cached_registers", &lock(&self.cache).len())
            .finish()
    }
}

/// A peripheral download in progress on a [`Device`].
pub struct PeriphDownload<'a> {
    device: &'a Device,
    codec: MutexGuard<'a, DeviceCodec>,
    state: DownloadState,
}

impl PeriphDownload<'_> {
    pub fn total(&self) -> u64 {
        self.state.total()
    }
}

impl Iterator for PeriphDownload<'_> {
    type Item = DeviceResult<Progress>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state.is_finished() {
            return None;
        }
        // A kill between packets abandons the rest of the transfer.
        if self.device.is_killed() {
            self.state.abandon();
            return Some(Err(DeviceError::Killed));
        }
        self.state
            .step(&mut *self.codec)
            .map(|r| r.map_err(DeviceError::from))
    }
}
