// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Number formatting for register and memory displays.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Radix {
    Bin,
    Oct,
    Dec,
    Hex,
}

impl Radix {
    pub fn base(self) -> u32 {
        match self {
            Radix::Bin => 2,
            Radix::Oct => 8,
            Radix::Dec => 10,
            Radix::Hex => 16,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Radix::Bin => "0b",
            Radix::Oct => "0o",
            Radix::Dec => "",
            Radix::Hex => "0x",
        }
    }

    /// Digits needed to show every value of `width_bits`.
    pub fn digits(self, width_bits: u32) -> usize {
        let width = width_bits.clamp(1, 64);
        match self {
            Radix::Bin => width as usize,
            Radix::Oct => ((width + 2) / 3) as usize,
            Radix::Hex => ((width + 3) / 4) as usize,
            Radix::Dec => mask(width).to_string().len(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("'{text}' is not a valid number")]
pub struct ParseValueError {
    pub text: String,
}

/// How numbers are shown to the user. Passed explicitly to every formatting
/// call; there is no process-wide default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayFormat {
    pub radix: Radix,
    pub prefix: bool,
    pub zero_pad: bool,
}

impl Default for DisplayFormat {
    fn default() -> Self {
        Self {
            radix: Radix::Hex,
            prefix: true,
            zero_pad: true,
        }
    }
}

fn mask(width_bits: u32) -> u64 {
    if width_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << width_bits) - 1
    }
}

fn to_radix(mut value: u64, base: u32) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        let d = (value % u64::from(base)) as u32;
        digits.push(std::char::from_digit(d, base).unwrap_or('?').to_ascii_uppercase());
        value /= u64::from(base);
    }
    digits.iter().rev().collect()
}

impl DisplayFormat {
    pub fn hex() -> Self {
        Self::default()
    }

    pub fn decimal() -> Self {
        Self {
            radix: Radix::Dec,
            prefix: false,
            zero_pad: false,
        }
    }

    /// Render the low `width_bits` of `value`. With `signed`, the top bit is
    /// treated as a sign and negative values are shown as `-magnitude`.
    pub fn format_value(&self, value: u64, width_bits: u32, signed: bool) -> String {
        let width = width_bits.clamp(1, 64);
        let value = value & mask(width);

        let negative = signed && (value >> (width - 1)) & 1 == 1;
        let magnitude = if negative {
            value.wrapping_neg() & mask(width)
        } else {
            value
        };
        // The sign bit is never padded for.
        let digit_width = if signed { width - 1 } else { width };

        let mut digits = to_radix(magnitude, self.radix.base());
        if self.zero_pad {
            let pad = self.radix.digits(digit_width.max(1));
            if digits.len() < pad {
                digits = format!("{}{}", "0".repeat(pad - digits.len()), digits);
            }
        }

        let sign = if negative { "-" } else { "" };
        let prefix = if self.prefix { self.radix.prefix() } else { "" };
        format!("{}{}{}", sign, prefix, digits)
    }

    /// Parse user input. An explicit `0x`/`0o`/`0b` prefix overrides the
    /// radix; a leading `-` yields the two's complement of the magnitude.
    pub fn parse_value(&self, text: &str) -> Result<u64, ParseValueError> {
        let err = || ParseValueError {
            text: text.to_string(),
        };
        let trimmed = text.trim().replace('_', "");
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.as_str()),
        };

        let lower = body.to_ascii_lowercase();
        let (base, digits) = if let Some(d) = lower.strip_prefix("0x") {
            (16, d)
        } else if let Some(d) = lower.strip_prefix("0o") {
            (8, d)
        } else if let Some(d) = lower.strip_prefix("0b") {
            (2, d)
        } else {
            (self.radix.base(), lower.as_str())
        };

        if digits.is_empty() {
            return Err(err());
        }
        let magnitude = u64::from_str_radix(digits, base).map_err(|_| err())?;
        Ok(if negative {
            magnitude.wrapping_neg()
        } else {
            magnitude
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_default() {
        let f = DisplayFormat::default();
        assert_eq!(f.format_value(0xFF, 16, false), "0x00FF");
        assert_eq!(f.format_value(0x1FFFF, 16, false), "0xFFFF");
        assert_eq!(f.format_value(0xA, 12, false), "0x00A");
    }

    #[test]
    fn test_signed_hex() {
        let f = DisplayFormat::default();
        assert_eq!(f.format_value(0xFFFF, 16, true), "-0x0001");
        assert_eq!(f.format_value(0x8000, 16, true), "-0x8000");
        assert_eq!(f.format_value(0x7FFF, 16, true), "0x7FFF");
    }

    #[test]
    fn test_other_radixes() {
        let bin = DisplayFormat {
            radix: Radix::Bin,
            prefix: true,
            zero_pad: true,
        };
        assert_eq!(bin.format_value(0b101, 4, false), "0b0101");

        let dec = DisplayFormat::decimal();
        assert_eq!(dec.format_value(65535, 16, false), "65535");
        assert_eq!(dec.format_value(0xFFFE, 16, true), "-2");

        let oct = DisplayFormat {
            radix: Radix::Oct,
            prefix: false,
            zero_pad: true,
        };
        assert_eq!(oct.format_value(8, 6, false), "10");
        assert_eq!(oct.format_value(7, 9, false), "007");
    }

    #[test]
    fn test_full_width() {
        let f = DisplayFormat::default();
        assert_eq!(f.format_value(u64::MAX, 64, false), "0xFFFFFFFFFFFFFFFF");
        assert_eq!(f.format_value(u64::MAX, 64, true), "-0x0000000000000001");
    }

    #[test]
    fn test_parse() {
        let f = DisplayFormat::default();
        assert_eq!(f.parse_value("ff").unwrap(), 0xFF);
        assert_eq!(f.parse_value("0x10").unwrap(), 0x10);
        assert_eq!(f.parse_value("0b11").unwrap(), 3);
        assert_eq!(f.parse_value("-1").unwrap(), u64::MAX);

        let dec = DisplayFormat::decimal();
        assert_eq!(dec.parse_value("10").unwrap(), 10);
        assert_eq!(dec.parse_value("1_000").unwrap(), 1000);
        assert!(dec.parse_value("ff").is_err());
        assert!(dec.parse_value("0x").is_err());
    }
}
