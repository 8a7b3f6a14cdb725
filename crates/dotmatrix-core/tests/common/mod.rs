#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use dotmatrix_core::host::{DisplaySink, Frame, SaveStorage};

/// 32 KiB image with `program` at the 0x0100 entry point and the given
/// cartridge-type and RAM-size header bytes.
pub fn rom_with(program: &[u8], cart_type: u8, ram_size: u8) -> Vec<u8> {
    let mut rom = vec![0u8; 0x8000];
    rom[0x0100..0x0100 + program.len()].copy_from_slice(program);
    rom[0x0134..0x0138].copy_from_slice(b"TEST");
    rom[0x0147] = cart_type;
    rom[0x0149] = ram_size;
    rom
}

/// Display sink that remembers frame numbers and the last screen.
#[derive(Clone, Default)]
pub struct FrameLog(pub Arc<Mutex<Vec<(u64, Vec<u8>)>>>);

impl DisplaySink for FrameLog {
    fn present(&mut self, frame: &Frame<'_>) {
        self.0
            .lock()
            .unwrap()
            .push((frame.number, frame.screen.to_vec()));
    }
}

/// Save storage whose contents outlive the machine that wrote them.
#[derive(Clone, Default)]
pub struct SharedStorage(pub Arc<Mutex<HashMap<String, Vec<u8>>>>);

impl SaveStorage for SharedStorage {
    fn load(&mut self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.0.lock().unwrap().get(key).cloned())
    }

    fn store(&mut self, key: &str, data: &[u8]) -> io::Result<()> {
        self.0.lock().unwrap().insert(key.to_string(), data.to_vec());
        Ok(())
    }
}
