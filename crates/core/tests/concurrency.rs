// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use kmdlink_config::{DriverConfig, MemoryDescriptor, RegisterDescriptor};
use kmdlink_core::sim::SimBoard;
use kmdlink_core::{Device, DeviceError, EventLog};
use std::sync::Arc;
use std::thread;

fn memory() -> MemoryDescriptor {
    MemoryDescriptor {
        index: 0,
        names: vec!["Memory".into()],
        addr_width_bits: 16,
        word_width_bits: 16,
        size: None,
    }
}

#[test]
fn test_parallel_accessors_stay_aligned() {
    let board = SimBoard::stump();
    let device = Arc::new(Device::new(
        Box::new(board.clone()),
        &DriverConfig::default(),
        Arc::new(EventLog::new()),
    ));

    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let device = Arc::clone(&device);
            thread::spawn(move || {
                let mem = memory();
                let reg = RegisterDescriptor::new(&["R"], 16, t + 1);
                for i in 0..50u32 {
                    let addr = t * 0x100 + i;
                    let value = u64::from(t * 1000 + i);
                    device.write_memory(&mem, 1, addr, &[value]).unwrap();
                    assert_eq!(device.read_memory(&mem, 1, addr, 1).unwrap(), vec![value]);
                    device.write_register(&reg, value).unwrap();
                    assert_eq!(device.read_register(&reg).unwrap(), value);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert!(device.log().is_empty());
}

#[test]
fn test_kill_from_another_thread() {
    let board = SimBoard::stump();
    let device = Arc::new(Device::new(
        Box::new(board),
        &DriverConfig::default(),
        Arc::new(EventLog::new()),
    ));

    let worker = {
        let device = Arc::clone(&device);
        thread::spawn(move || loop {
            match device.get_status() {
                Ok(_) => continue,
                Err(DeviceError::Killed) => break,
                Err(e) => panic!("unexpected {}", e),
            }
        })
    };

    device.kill();
    worker.join().unwrap();
    assert!(device.ping().unwrap_err().is_killed());
}
