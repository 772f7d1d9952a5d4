// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Raw binary images: little-endian words from address 0.

use crate::image::Image;
use kmdlink_config::MemoryDescriptor;

pub fn parse(data: &[u8], memory: &MemoryDescriptor) -> Image {
    let word_bytes = memory.word_bytes().max(1) as usize;
    let mut image = Image::default();

    for (addr, word) in data.chunks(word_bytes).enumerate() {
        let value = word
            .iter()
            .rev()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        image.memory.push(addr as u32, vec![value]);
    }

    image
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(word_width_bits: u32) -> MemoryDescriptor {
        MemoryDescriptor {
            index: 0,
            names: vec!["Memory".into()],
            addr_width_bits: 16,
            word_width_bits,
            size: None,
        }
    }

    #[test]
    fn test_little_endian_words() {
        let image = parse(&[0x34, 0x12, 0x78, 0x56], &memory(16));
        let map = image.memory.to_map();
        assert_eq!(map[&0], (1, 0x1234));
        assert_eq!(map[&1], (1, 0x5678));
        assert_eq!(image.memory.len(), 2);
        assert!(image.source.is_empty());
    }

    #[test]
    fn test_trailing_partial_word() {
        let image = parse(&[0x01, 0x02, 0x03], &memory(16));
        assert_eq!(image.memory.to_map()[&1], (1, 0x03));
    }
}
