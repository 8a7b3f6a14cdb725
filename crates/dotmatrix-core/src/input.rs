use crate::interrupts::INT_JOYPAD;

pub const JOYP: u16 = 0xFF00;

/// Selecting bit 4 low exposes the direction keys, bit 5 low the action keys.
const SELECT_DIRECTIONS: u8 = 0x10;
const SELECT_ACTIONS: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

impl Button {
    /// Bit in the combined state byte: directions in the low nibble, actions
    /// in the high nibble.
    pub fn mask(self) -> u8 {
        1 << self as u8
    }
}

/// Joypad register. Line state is active low, as on hardware.
#[derive(Debug)]
pub struct Input {
    select: u8,
    state: u8,
}

impl Default for Input {
    fn default() -> Self {
        Self::new()
    }
}

impl Input {
    pub fn new() -> Self {
        Self {
            select: SELECT_DIRECTIONS | SELECT_ACTIONS,
            state: 0xFF,
        }
    }

    pub fn read(&self) -> u8 {
        let mut nibble = 0x0F;
        if self.select & SELECT_DIRECTIONS == 0 {
            nibble &= self.state & 0x0F;
        }
        if self.select & SELECT_ACTIONS == 0 {
            nibble &= self.state >> 4;
        }
        0xC0 | self.select | nibble
    }

    pub fn write(&mut self, val: u8) {
        self.select = val & (SELECT_DIRECTIONS | SELECT_ACTIONS);
    }

    pub fn pressed(&self, button: Button) -> bool {
        self.state & button.mask() == 0
    }

    /// Replace the whole active-low state byte. Any line going low raises the
    /// joypad interrupt.
    pub fn update_state(&mut self, state: u8, if_reg: &mut u8) {
        let falling = self.state & !state;
        self.state = state;
        if falling != 0 {
            *if_reg |= INT_JOYPAD;
        }
    }

    pub fn set_button(&mut self, button: Button, pressed: bool, if_reg: &mut u8) {
        let state = if pressed {
            self.state & !button.mask()
        } else {
            self.state | button.mask()
        };
        self.update_state(state, if_reg);
    }
}
