// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod assembler;
pub mod system;
pub mod worker;

pub use assembler::{Assembler, Disassembler, ExternalAssembler, Instruction, RawWordDisassembler};
pub use system::{System, SystemLoad};
pub use worker::{JobHandle, WorkerPool};
