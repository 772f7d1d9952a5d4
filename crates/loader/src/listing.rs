// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Annotated listings: `addr: data... ; source` per line.
//!
//! The address is optional and defaults to the word after the previous
//! line's data. Each hex token covers as many memory words as its digit
//! count needs, least significant word at the lowest address.

use crate::error::{LoadError, LoadResult};
use crate::image::{Image, MemoryImage, SourceEntry, SourceMap};
use kmdlink_config::MemoryDescriptor;
use std::collections::HashSet;

const FORMAT: &str = "listing";

pub fn parse(data: &[u8], memory: &MemoryDescriptor) -> LoadResult<Image> {
    let text = String::from_utf8_lossy(data);
    let mut body = ListingBody::new(FORMAT, memory);
    for (i, line) in text.lines().enumerate() {
        body.feed(i + 1, line)?;
    }
    Ok(body.finish())
}

/// Incremental listing parser shared by the `.lst` and `.kmd` readers.
pub(crate) struct ListingBody<'a> {
    format: &'static str,
    memory: &'a MemoryDescriptor,
    cursor: u32,
    defined: HashSet<u32>,
    image: MemoryImage,
    source: SourceMap,
}

impl<'a> ListingBody<'a> {
    pub(crate) fn new(format: &'static str, memory: &'a MemoryDescriptor) -> Self {
        Self {
            format,
            memory,
            cursor: 0,
            defined: HashSet::new(),
            image: MemoryImage::new(),
            source: SourceMap::new(),
        }
    }

    pub(crate) fn feed(&mut self, line_no: usize, line: &str) -> LoadResult<()> {
        let (code, comment) = match line.split_once(';') {
            Some((code, comment)) => (code.trim(), Some(comment.trim())),
            None => (line.trim(), None),
        };
        if code.is_empty() && comment.is_none() {
            return Ok(());
        }

        let (addr_text, data_text) = match code.split_once(':') {
            Some((addr, data)) => (addr.trim(), data),
            None => ("", code),
        };
        let start = if addr_text.is_empty() {
            self.cursor
        } else {
            u32::from_str_radix(addr_text, 16).map_err(|_| {
                LoadError::parse(
                    self.format,
                    line_no,
                    format!("invalid address '{}'", addr_text),
                )
            })?
        };

        let tokens: Vec<&str> = data_text.split_whitespace().collect();
        let mut words = Vec::new();
        for token in &tokens {
            self.split_token(line_no, token, &mut words)?;
        }

        for offset in 0..words.len() as u32 {
            let address = start.wrapping_add(offset);
            if !self.defined.insert(address) {
                return Err(LoadError::Redefinition {
                    line: line_no,
                    address,
                });
            }
        }

        if let Some(comment) = comment {
            let value = concat_value(&tokens);
            let width = words.len() as u32;
            self.source
                .entry(start)
                .and_modify(|e| {
                    e.width_words += width;
                    if !tokens.is_empty() {
                        e.value = value;
                    }
                    e.lines.push(comment.to_string());
                })
                .or_insert_with(|| SourceEntry {
                    width_words: width,
                    value,
                    lines: vec![comment.to_string()],
                });
        }

        self.cursor = start.wrapping_add(words.len() as u32);
        if !words.is_empty() {
            self.image.push(start, words);
        }
        Ok(())
    }

    fn split_token(&self, line_no: usize, token: &str, words: &mut Vec<u64>) -> LoadResult<()> {
        if !token.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(LoadError::parse(
                self.format,
                line_no,
                format!("invalid data '{}'", token),
            ));
        }

        let nibbles = self.memory.word_nibbles().max(1) as usize;
        let pad = (nibbles - token.len() % nibbles) % nibbles;
        let padded = format!("{}{}", "0".repeat(pad), token);
        let mask = if self.memory.word_width_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.memory.word_width_bits) - 1
        };

        // Rightmost digits form the lowest word.
        let digits = padded.as_bytes();
        for chunk in digits.rchunks(nibbles) {
            let text = std::str::from_utf8(chunk).unwrap_or("0");
            let value = u64::from_str_radix(text, 16).map_err(|e| {
                LoadError::parse(self.format, line_no, format!("invalid data '{}': {}", token, e))
            })?;
            words.push(value & mask);
        }
        Ok(())
    }

    pub(crate) fn finish(self) -> Image {
        Image {
            memory: self.image,
            source: self.source,
            symbols: Default::default(),
        }
    }
}

/// The line's data read as one number, keeping the low 64 bits.
fn concat_value(tokens: &[&str]) -> u64 {
    let digits: String = tokens.concat();
    let tail = &digits[digits.len().saturating_sub(16)..];
    if tail.is_empty() {
        0
    } else {
        u64::from_str_radix(tail, 16).unwrap_or(0)
    }
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
    fn test_single_annotated_line() {
        let image = parse(b"0010: 00FF ; MOV R0,#FF\n", &memory(16)).unwrap();

        assert_eq!(image.memory.chunks().len(), 1);
        assert_eq!(image.memory.chunks()[0].addr, 0x10);
        assert_eq!(image.memory.chunks()[0].words, vec![0x00FF]);
        assert_eq!(
            image.source[&0x10],
            SourceEntry {
                width_words: 1,
                value: 0x00FF,
                lines: vec!["MOV R0,#FF".into()],
            }
        );
    }

    #[test]
    fn test_redefinition_rejected() {
        let text = b"0010: 0001\n0011: 0002\n0010: 0003\n";
        match parse(text, &memory(16)) {
            Err(LoadError::Redefinition { line, address }) => {
                assert_eq!(line, 3);
                assert_eq!(address, 0x10);
            }
            other => panic!("expected redefinition, got {:?}", other),
        }
    }

    #[test]
    fn test_overlapping_wide_token_rejected() {
        let text = b"0010: 00010002\n0011: 0003\n";
        assert!(matches!(
            parse(text, &memory(16)),
            Err(LoadError::Redefinition { line: 2, address: 0x11 })
        ));
    }

    #[test]
    fn test_cursor_continues() {
        let text = "\
0000: 1111 2222 ; start:
            ; second source line
      3333     ; next
";
        let image = parse(text.as_bytes(), &memory(16)).unwrap();
        let map = image.memory.to_map();
        assert_eq!(map[&0], (1, 0x1111));
        assert_eq!(map[&1], (1, 0x2222));
        assert_eq!(map[&2], (1, 0x3333));

        assert_eq!(image.source[&0].lines, vec!["start:".to_string()]);
        assert_eq!(image.source[&0].value, 0x11112222);
        // The comment-only line lands at the next free address and the data
        // after it accumulates there.
        let entry = &image.source[&2];
        assert_eq!(entry.width_words, 1);
        assert_eq!(entry.value, 0x3333);
        assert_eq!(entry.lines, vec!["second source line", "next"]);
    }

    #[test]
    fn test_wide_token_spans_words() {
        let image = parse(b"0100: 12345678\n", &memory(16)).unwrap();
        let map = image.memory.to_map();
        assert_eq!(map[&0x100], (1, 0x5678));
        assert_eq!(map[&0x101], (1, 0x1234));
    }

    #[test]
    fn test_short_token_rounds_up() {
        let image = parse(b"0: F ; x\n", &memory(16)).unwrap();
        assert_eq!(image.memory.to_map()[&0], (1, 0xF));
        assert_eq!(image.source[&0].width_words, 1);
    }

    #[test]
    fn test_bad_line_reports_number() {
        match parse(b"0000: 0001\n\nzz: 0002\n", &memory(16)) {
            Err(LoadError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected parse error, got {:?}", other),
        }
        match parse(b"0000: 00G1\n", &memory(16)) {
            Err(LoadError::Parse { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_twelve_bit_words() {
        let image = parse(b"000: 123456\n", &memory(12)).unwrap();
        let map = image.memory.to_map();
        assert_eq!(map[&0], (1, 0x456));
        assert_eq!(map[&1], (1, 0x123));
    }
}
