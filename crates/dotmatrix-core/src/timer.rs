use crate::error::{CoreError, Result};
use crate::interrupts::INT_TIMER;
use crate::mmu::IoDevice;

pub const DIV: u16 = 0xFF04;
pub const TIMA: u16 = 0xFF05;
pub const TMA: u16 = 0xFF06;
pub const TAC: u16 = 0xFF07;

/// Cascade level selected by each TAC clock-select value.
const SELECT_LEVEL: [Level; 4] = [Level::Div1024, Level::Div16, Level::Div64, Level::Div256];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Div16,
    Div64,
    Div256,
    Div1024,
}

/// Divider/counter pair clocked by a chain of /16, /64, /256 and /1024
/// prescalers. Every level fires exactly when the level below it has fired
/// four times.
#[derive(Debug, Default)]
pub struct Timer {
    /// Raw clock cycles not yet folded into the /16 stage.
    clock: u32,
    /// Monotonic tick counts for each prescaler stage.
    ticks16: u64,
    ticks64: u64,
    ticks256: u64,
    ticks1024: u64,
    /// Free-running divider, 16384 Hz.
    pub div: u8,
    pub tima: u8,
    pub tma: u8,
    pub enabled: bool,
    /// TAC bits 0-1, always below 4.
    clock_select: u8,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tac(&self) -> u8 {
        0xF8 | (u8::from(self.enabled) << 2) | self.clock_select
    }

    pub fn ticks(&self) -> [u64; 4] {
        [self.ticks16, self.ticks64, self.ticks256, self.ticks1024]
    }

    pub fn reset_div(&mut self) {
        self.div = 0;
    }

    /// Advance the prescaler chain by `cycles` clock cycles, raising the
    /// timer interrupt in `if_reg` whenever TIMA overflows.
    pub fn step(&mut self, cycles: u32, if_reg: &mut u8) {
        self.clock += cycles;
        while self.clock >= 16 {
            self.clock -= 16;
            self.ticks16 += 1;
            self.fire(Level::Div16, if_reg);
            if self.ticks16 % 4 != 0 {
                continue;
            }
            self.ticks64 += 1;
            self.fire(Level::Div64, if_reg);
            if self.ticks64 % 4 != 0 {
                continue;
            }
            self.ticks256 += 1;
            self.div = self.div.wrapping_add(1);
            self.fire(Level::Div256, if_reg);
            if self.ticks256 % 4 != 0 {
                continue;
            }
            self.ticks1024 += 1;
            self.fire(Level::Div1024, if_reg);
        }
    }

    fn fire(&mut self, level: Level, if_reg: &mut u8) {
        if !self.enabled || SELECT_LEVEL[self.clock_select as usize] != level {
            return;
        }
        let (next, overflow) = self.tima.overflowing_add(1);
        if overflow {
            self.tima = self.tma;
            if *if_reg & INT_TIMER == 0 {
                *if_reg |= INT_TIMER;
            }
        } else {
            self.tima = next;
        }
    }
}

impl IoDevice for Timer {
    fn name(&self) -> &'static str {
        "timer"
    }

    fn read_reg(&self, addr: u16) -> Result<u8> {
        match addr {
            DIV => Ok(self.div),
            TIMA => Ok(self.tima),
            TMA => Ok(self.tma),
            TAC => Ok(self.tac()),
            _ => Err(CoreError::UnmappedRegister {
                address: addr,
                device: self.name(),
            }),
        }
    }

    fn write_reg(&mut self, addr: u16, val: u8, _if_reg: &mut u8) -> Result<()> {
        match addr {
            DIV => self.reset_div(),
            TIMA => self.tima = val,
            TMA => self.tma = val,
            TAC => {
                self.enabled = val & 0x04 != 0;
                self.clock_select = val & 0x03;
            }
            _ => {
                return Err(CoreError::UnmappedRegister {
                    address: addr,
                    device: self.name(),
                });
            }
        }
        Ok(())
    }

    fn advance(&mut self, cycles: u32, if_reg: &mut u8) {
        self.step(cycles, if_reg);
    }
}
