//! Handles through which the core talks to whatever is hosting it.
//!
//! Every collaborator is passed in at construction and owned by the unit
//! that uses it, so two emulator instances never share host state.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::apu::AudioEvent;

/// One completed video frame.
pub struct Frame<'a> {
    /// 160×144 visible screen, RGBA.
    pub screen: &'a [u8],
    /// Full 256×256 background plane, RGBA.
    pub background: &'a [u8],
    /// Frames completed since power on, starting at 1.
    pub number: u64,
}

pub trait DisplaySink: Send {
    fn present(&mut self, frame: &Frame<'_>);
}

pub trait AudioSink: Send {
    fn on_event(&mut self, event: AudioEvent);
}

/// Key-value store for battery-backed cartridge RAM.
pub trait SaveStorage: Send {
    fn load(&mut self, key: &str) -> io::Result<Option<Vec<u8>>>;
    fn store(&mut self, key: &str, data: &[u8]) -> io::Result<()>;
}

/// Time source for cartridge real-time clocks.
pub trait WallClock: Send {
    /// Time elapsed since the Unix epoch.
    fn now(&self) -> Duration;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn present(&mut self, _frame: &Frame<'_>) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudio;

impl AudioSink for NullAudio {
    fn on_event(&mut self, _event: AudioEvent) {}
}

/// Save storage that lives only as long as the session.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }
}

impl SaveStorage for MemoryStorage {
    fn load(&mut self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn store(&mut self, key: &str, data: &[u8]) -> io::Result<()> {
        self.entries.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Default, Clone)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new(secs: u64) -> Self {
        Self(Arc::new(AtomicU64::new(secs)))
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::Relaxed);
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_secs(self.0.load(Ordering::Relaxed))
    }
}
