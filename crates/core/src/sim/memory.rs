// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

/// Flat byte store addressed in memory words. Word `n` starts at byte
/// `n * word_bytes`; elements are little-endian.
#[derive(Debug, Clone)]
pub struct LinearMemory {
    data: Vec<u8>,
    word_bytes: usize,
}

impl LinearMemory {
    pub fn new(words: usize, word_bytes: usize) -> Self {
        let word_bytes = word_bytes.max(1);
        Self {
            data: vec![0; words * word_bytes],
            word_bytes,
        }
    }

    pub fn word_bytes(&self) -> usize {
        self.word_bytes
    }

    pub fn len_words(&self) -> usize {
        self.data.len() / self.word_bytes
    }

    pub fn read_u8(&self, offset: usize) -> Option<u8> {
        self.data.get(offset).copied()
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) -> bool {
        match self.data.get_mut(offset) {
            Some(byte) => {
                *byte = value;
                true
            }
            None => false,
        }
    }

    /// Read `size` bytes at word address `addr`. Bytes past the end read as 0.
    pub fn read_element(&self, addr: u32, size: usize) -> u64 {
        let base = self.offset(addr);
        (0..size.min(8)).rev().fold(0u64, |acc, i| {
            let byte = base.and_then(|b| b.checked_add(i)).and_then(|o| self.read_u8(o));
            (acc << 8) | u64::from(byte.unwrap_or(0))
        })
    }

    /// Returns false if any byte fell outside the store.
    pub fn write_element(&mut self, addr: u32, size: usize, value: u64) -> bool {
        let Some(base) = self.offset(addr) else {
            return false;
        };
        let mut in_range = true;
        for (i, byte) in value.to_le_bytes().iter().take(size).enumerate() {
            in_range &= base
                .checked_add(i)
                .map_or(false, |o| self.write_u8(o, *byte));
        }
        in_range
    }

    fn offset(&self, addr: u32) -> Option<usize> {
        (addr as usize).checked_mul(self.word_bytes)
    }

    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_addressing() {
        let mut mem = LinearMemory::new(16, 2);
        assert!(mem.write_element(3, 2, 0xBEEF));
        assert_eq!(mem.read_u8(6), Some(0xEF));
        assert_eq!(mem.read_u8(7), Some(0xBE));
        assert_eq!(mem.read_element(3, 2), 0xBEEF);
        // A 4-byte element spans two 16-bit words.
        assert!(mem.write_element(4, 4, 0x1122_3344));
        assert_eq!(mem.read_element(4, 2), 0x3344);
        assert_eq!(mem.read_element(5, 2), 0x1122);
    }

    #[test]
    fn test_out_of_range() {
        let mut mem = LinearMemory::new(4, 2);
        assert!(!mem.write_element(4, 2, 0xFFFF));
        assert_eq!(mem.read_element(4, 2), 0);
        assert_eq!(mem.len_words(), 4);
    }
}
