// Interrupt sources in priority order (gbdev.io/pandocs/Interrupts.html)
pub const INT_VBLANK: u8 = 0x01;
pub const INT_STAT: u8 = 0x02;
pub const INT_TIMER: u8 = 0x04;
pub const INT_SERIAL: u8 = 0x08;
pub const INT_JOYPAD: u8 = 0x10;

/// Only the low five bits of IF/IE name interrupt sources.
pub const INT_MASK: u8 = 0x1F;

/// Highest-priority pending interrupt as `(flag bit, handler vector)`.
pub fn highest_pending(pending: u8) -> Option<(u8, u16)> {
    let pending = pending & INT_MASK;
    if pending == 0 {
        return None;
    }
    let index = pending.trailing_zeros() as u16;
    Some((1 << index, 0x40 + index * 8))
}
