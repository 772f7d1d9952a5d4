// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! KMD images: a magic line, a listing body, a blank line, then the symbol
//! table.

use crate::error::{LoadError, LoadResult};
use crate::image::{Image, Symbol};
use crate::listing::ListingBody;
use kmdlink_config::MemoryDescriptor;

pub const MAGIC: &[u8] = b"KMD\n";
const FORMAT: &str = "kmd";

pub fn parse(data: &[u8], memory: &MemoryDescriptor) -> LoadResult<Image> {
    let rest = data.strip_prefix(MAGIC).ok_or(LoadError::MissingMagic)?;
    let text = String::from_utf8_lossy(rest);

    // Line 1 is the magic.
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 2, l)).peekable();

    while lines.peek().is_some_and(|(_, l)| l.trim().is_empty()) {
        lines.next();
    }

    let mut body = ListingBody::new(FORMAT, memory);
    for (line_no, line) in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }
        body.feed(line_no, line)?;
    }
    let mut image = body.finish();

    let mut first_row = true;
    for (line_no, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let indexed = line
            .split_whitespace()
            .next()
            .is_some_and(|t| t.parse::<usize>().is_ok());
        if first_row && !indexed {
            first_row = false;
            continue;
        }
        first_row = false;

        let row = SymbolRow::split(line).ok_or_else(|| {
            LoadError::parse(
                FORMAT,
                line_no,
                "symbol rows need an index, a name and a value",
            )
        })?;
        let digits = row.value.trim_start_matches("0x");
        let value = u64::from_str_radix(digits, 16).map_err(|_| {
            LoadError::parse(FORMAT, line_no, format!("invalid symbol value '{}'", row.value))
        })?;

        image.symbols.insert(
            row.name.to_string(),
            Symbol {
                value,
                kind: row.kind.to_string(),
            },
        );
    }

    Ok(image)
}

/// `index name value  type`. The type is everything after the value's
/// double-space separator, spacing included.
struct SymbolRow<'a> {
    name: &'a str,
    value: &'a str,
    kind: &'a str,
}

impl<'a> SymbolRow<'a> {
    fn split(line: &'a str) -> Option<Self> {
        let (idx, rest) = next_token(line)?;
        idx.parse::<usize>().ok()?;
        let (name, rest) = next_token(rest)?;
        let (value, rest) = next_token(rest)?;
        let kind = rest
            .strip_prefix("  ")
            .unwrap_or_else(|| rest.trim_start())
            .trim_end();
        Some(Self { name, value, kind })
    }
}

fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    Some(s.split_once(char::is_whitespace).unwrap_or((s, "")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> MemoryDescriptor {
        MemoryDescriptor {
            index: 0,
            names: vec!["Memory".into()],
            addr_width_bits: 32,
            word_width_bits: 32,
            size: None,
        }
    }

    const SAMPLE: &str = "KMD
00000000: E3A00001 ; start   mov r0, #1
00000004:          ; loop
00000004: EAFFFFFE ;         b loop

Symbol Table: Labels
0 start 00000000  Local -- ARM
1 loop 00000004  Local -- ARM
";

    #[test]
    fn test_body_and_symbols() {
        let image = parse(SAMPLE.as_bytes(), &memory()).unwrap();

        let map = image.memory.to_map();
        assert_eq!(map[&0], (1, 0xE3A0_0001));
        assert_eq!(map[&4], (1, 0xEAFF_FFFE));

        let entry = &image.source[&4];
        assert_eq!(entry.width_words, 1);
        assert_eq!(entry.value, 0xEAFF_FFFE);
        assert_eq!(entry.lines, vec!["loop", "b loop"]);

        assert_eq!(image.symbols.len(), 2);
        assert_eq!(image.symbols["loop"].value, 4);
        assert_eq!(image.symbols["loop"].kind, "Local -- ARM");
    }

    #[test]
    fn test_symbol_type_keeps_spacing() {
        let text = "KMD\n0: 00000001\n\n0 start 00000000  Local  --   ARM\n1 end 0x10\n";
        let image = parse(text.as_bytes(), &memory()).unwrap();
        assert_eq!(image.symbols["start"].kind, "Local  --   ARM");
        assert_eq!(image.symbols["end"].value, 0x10);
        assert_eq!(image.symbols["end"].kind, "");
    }

    #[test]
    fn test_missing_magic() {
        assert!(matches!(
            parse(b"00000000: 00000001\n", &memory()),
            Err(LoadError::MissingMagic)
        ));
    }

    #[test]
    fn test_bad_symbol_row() {
        let text = "KMD\n0: 00000001\n\n0 start zz  Local\n";
        match parse(text.as_bytes(), &memory()) {
            Err(LoadError::Parse { line, format, .. }) => {
                assert_eq!(line, 4);
                assert_eq!(format, "kmd");
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_no_symbol_section() {
        let image = parse(b"KMD\n0: 00000001\n", &memory()).unwrap();
        assert_eq!(image.memory.len(), 1);
        assert!(image.symbols.is_empty());
    }
}
