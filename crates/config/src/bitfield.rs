// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Bit-field layouts for flag and status registers.
//!
//! Integer and enumerated fields may be split over several inclusive bit
//! ranges, written most-significant first, e.g. `[[6, 2], [1, 0]]`. The
//! ranges are concatenated with the left-most range supplying the most
//! significant bits of the field.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldDescriptor {
    Bit {
        name: String,
        bit: u32,
    },
    Int {
        name: String,
        ranges: Vec<(u32, u32)>,
        #[serde(default)]
        signed: bool,
    },
    Enum {
        name: String,
        ranges: Vec<(u32, u32)>,
        values: BTreeMap<u64, String>,
        #[serde(default)]
        fallback: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Bit(bool),
    Int(i64),
    Uint(u64),
    /// `None` when the value has no label and no fallback is defined.
    Enum(Option<String>),
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Bit(b) => write!(f, "{}", u8::from(*b)),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Uint(v) => write!(f, "{}", v),
            FieldValue::Enum(Some(label)) => f.write_str(label),
            FieldValue::Enum(None) => f.write_str("?"),
        }
    }
}

impl FieldDescriptor {
    pub fn name(&self) -> &str {
        match self {
            FieldDescriptor::Bit { name, .. }
            | FieldDescriptor::Int { name, .. }
            | FieldDescriptor::Enum { name, .. } => name,
        }
    }

    pub fn decode(&self, value: u64) -> FieldValue {
        match self {
            FieldDescriptor::Bit { bit, .. } => FieldValue::Bit(value >> bit & 1 != 0),
            FieldDescriptor::Int { ranges, signed, .. } => {
                let (length, raw) = gather(ranges, value);
                if *signed {
                    FieldValue::Int(sign_extend(raw, length))
                } else {
                    FieldValue::Uint(raw)
                }
            }
            FieldDescriptor::Enum {
                ranges,
                values,
                fallback,
                ..
            } => {
                let (_, raw) = gather(ranges, value);
                FieldValue::Enum(values.get(&raw).or(fallback.as_ref()).cloned())
            }
        }
    }

    /// Bits this field contributes to the register value.
    pub fn encode(&self, field: &FieldValue) -> u64 {
        match (self, field) {
            (FieldDescriptor::Bit { bit, .. }, FieldValue::Bit(set)) => (*set as u64) << bit,
            (FieldDescriptor::Int { ranges, .. }, FieldValue::Int(v)) => scatter(ranges, *v as u64),
            (FieldDescriptor::Int { ranges, .. }, FieldValue::Uint(v)) => scatter(ranges, *v),
            (FieldDescriptor::Enum { ranges, values, .. }, FieldValue::Enum(label)) => {
                let key = label
                    .as_ref()
                    .and_then(|l| values.iter().find(|(_, v)| *v == l).map(|(k, _)| *k))
                    .unwrap_or(0);
                scatter(ranges, key)
            }
            _ => 0,
        }
    }
}

pub fn decode_fields(fields: &[FieldDescriptor], value: u64) -> Vec<(String, FieldValue)> {
    fields
        .iter()
        .map(|f| (f.name().to_string(), f.decode(value)))
        .collect()
}

pub fn encode_fields(fields: &[FieldDescriptor], values: &[FieldValue]) -> u64 {
    fields
        .iter()
        .zip(values)
        .fold(0, |acc, (f, v)| acc | f.encode(v))
}

fn gather(ranges: &[(u32, u32)], value: u64) -> (u32, u64) {
    let mut out = 0u64;
    let mut length = 0;
    for &(first, last) in ranges {
        for bit in (last..=first).rev() {
            out = (out << 1) | (value >> bit & 1);
            length += 1;
        }
    }
    (length, out)
}

fn scatter(ranges: &[(u32, u32)], mut value: u64) -> u64 {
    let mut out = 0u64;
    for &(first, last) in ranges.iter().rev() {
        let size = first - last + 1;
        let mask = if size >= 64 { u64::MAX } else { (1 << size) - 1 };
        out |= (value & mask) << last;
        value = value.checked_shr(size).unwrap_or(0);
    }
    out
}

fn sign_extend(value: u64, length: u32) -> i64 {
    if length == 0 || length >= 64 {
        return value as i64;
    }
    let shift = 64 - length;
    ((value << shift) as i64) >> shift
}
