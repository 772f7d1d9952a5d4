// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::Transport;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct Script {
    pub responses: VecDeque<u8>,
    pub written: Vec<u8>,
    pub touched: bool,
    pub flushes: usize,
}

/// In-memory transport serving canned responses and recording writes.
/// Clones share the same script so a test can inspect it after handing the
/// transport to a codec.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    pub script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new(responses: &[u8]) -> Self {
        let t = Self::default();
        t.push(responses);
        t
    }

    pub fn push(&self, bytes: &[u8]) {
        self.script.lock().unwrap().responses.extend(bytes.iter().copied());
    }

    pub fn written(&self) -> Vec<u8> {
        self.script.lock().unwrap().written.clone()
    }

    pub fn touched(&self) -> bool {
        self.script.lock().unwrap().touched
    }

    pub fn pending(&self) -> usize {
        self.script.lock().unwrap().responses.len()
    }
}

impl Transport for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut script = self.script.lock().unwrap();
        script.touched = true;
        let n = buf.len().min(script.responses.len());
        for slot in buf.iter_mut().take(n) {
            *slot = script.responses.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut script = self.script.lock().unwrap();
        script.touched = true;
        script.written.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut script = self.script.lock().unwrap();
        script.touched = true;
        script.flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}
