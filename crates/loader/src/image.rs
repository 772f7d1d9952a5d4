// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::collections::BTreeMap;

/// One contiguous run of memory words, written in a single exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub addr: u32,
    pub words: Vec<u64>,
}

/// Parsed memory contents in load order. Each chunk is one unit of load
/// progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryImage {
    chunks: Vec<Chunk>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, addr: u32, words: Vec<u64>) {
        self.chunks.push(Chunk { addr, words });
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Sparse view: word address to `(width_words, value)`. Later chunks win.
    pub fn to_map(&self) -> BTreeMap<u32, (u32, u64)> {
        let mut map = BTreeMap::new();
        for chunk in &self.chunks {
            for (i, word) in chunk.words.iter().enumerate() {
                map.insert(chunk.addr.wrapping_add(i as u32), (1, *word));
            }
        }
        map
    }
}

/// Listing annotation for one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub width_words: u32,
    pub value: u64,
    pub lines: Vec<String>,
}

pub type SourceMap = BTreeMap<u32, SourceEntry>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub value: u64,
    pub kind: String,
}

pub type SymbolTable = BTreeMap<String, Symbol>;

/// Everything one image file produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    pub memory: MemoryImage,
    pub source: SourceMap,
    pub symbols: SymbolTable,
}
