//! Headless host for the `dotmatrix-core` emulator.

pub mod config;
pub mod screenshot;
pub mod session;
pub mod sinks;
pub mod storage;
