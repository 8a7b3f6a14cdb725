//! Cycle-driven Game Boy (DMG) emulation core.
//!
//! This crate holds the platform-agnostic emulator logic. Hosts hand in
//! display, audio, save-storage and clock collaborators through [`host`] and
//! drive the machine via the [`gameboy`] facade.

/// Audio Processing Unit (APU) emulation.
pub mod apu;

/// Cartridge header parsing and ROM/RAM ownership.
pub mod cartridge;

/// SM83 CPU core.
pub mod cpu;

/// Error type shared by the whole core.
pub mod error;

/// High-level facade that wires the CPU and MMU into a single machine.
pub mod gameboy;

/// Collaborator traits implemented by the host.
pub mod host;

/// Joypad input register.
pub mod input;

/// Opcode descriptor tables, decoding and disassembly.
pub mod instructions;

/// Interrupt flag bits and priority.
pub mod interrupts;

/// Memory bank controllers and the cartridge real-time clock.
pub mod mbc;

/// Memory map and hardware plumbing.
pub mod mmu;

/// Pixel Processing Unit (PPU) emulation.
pub mod ppu;

/// CPU register file.
pub mod registers;

/// Divider/timer unit.
pub mod timer;

pub use error::{CoreError, Result};
pub use gameboy::{Config, GameBoy};
