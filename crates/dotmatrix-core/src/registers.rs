// CPU flag bits as documented in gbdev.io/pandocs/The_CPU_Flags.html
pub const FLAG_Z: u8 = 0x80; // Zero
pub const FLAG_N: u8 = 0x40; // Subtract
pub const FLAG_H: u8 = 0x20; // Half Carry
pub const FLAG_C: u8 = 0x10; // Carry

// Post-boot CPU state from gbdev.io/pandocs/Power_Up_State.html
const BOOT_A: u8 = 0x01;
const BOOT_F: u8 = 0xB0;
const BOOT_B: u8 = 0x00;
const BOOT_C: u8 = 0x13;
const BOOT_D: u8 = 0x00;
const BOOT_E: u8 = 0xD8;
const BOOT_H: u8 = 0x01;
const BOOT_L: u8 = 0x4D;
pub const BOOT_PC: u16 = 0x0100;
pub const BOOT_SP: u16 = 0xFFFE;

/// 8-bit register names, in the order the opcode encoding uses them
/// (index 6 is the `(HL)` slot and has no register behind it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg8 {
    A,
    F,
    B,
    C,
    D,
    E,
    H,
    L,
}

/// Register pairs formed by concatenating two 8-bit registers high:low.
/// `SP` is a true 16-bit register and is listed here so operands can name it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg16 {
    AF,
    BC,
    DE,
    HL,
    SP,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Zero,
    Subtract,
    HalfCarry,
    Carry,
}

impl Flag {
    #[inline]
    pub const fn mask(self) -> u8 {
        match self {
            Flag::Zero => FLAG_Z,
            Flag::Subtract => FLAG_N,
            Flag::HalfCarry => FLAG_H,
            Flag::Carry => FLAG_C,
        }
    }
}

/// Returns `byte` with the bits in `mask` set or cleared.
#[inline]
pub const fn with_bits(byte: u8, mask: u8, set: bool) -> u8 {
    if set { byte | mask } else { byte & !mask }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
}

impl Registers {
    /// Register contents left behind by the DMG boot ROM.
    pub fn post_boot() -> Self {
        Self {
            a: BOOT_A,
            f: BOOT_F,
            b: BOOT_B,
            c: BOOT_C,
            d: BOOT_D,
            e: BOOT_E,
            h: BOOT_H,
            l: BOOT_L,
            sp: BOOT_SP,
            pc: BOOT_PC,
        }
    }

    pub fn get8(&self, reg: Reg8) -> u8 {
        match reg {
            Reg8::A => self.a,
            Reg8::F => self.f,
            Reg8::B => self.b,
            Reg8::C => self.c,
            Reg8::D => self.d,
            Reg8::E => self.e,
            Reg8::H => self.h,
            Reg8::L => self.l,
        }
    }

    pub fn set8(&mut self, reg: Reg8, val: u8) {
        match reg {
            Reg8::A => self.a = val,
            // The low nibble of F is hard-wired to zero.
            Reg8::F => self.f = val & 0xF0,
            Reg8::B => self.b = val,
            Reg8::C => self.c = val,
            Reg8::D => self.d = val,
            Reg8::E => self.e = val,
            Reg8::H => self.h = val,
            Reg8::L => self.l = val,
        }
    }

    pub fn get16(&self, reg: Reg16) -> u16 {
        match reg {
            Reg16::AF => u16::from_be_bytes([self.a, self.f]),
            Reg16::BC => u16::from_be_bytes([self.b, self.c]),
            Reg16::DE => u16::from_be_bytes([self.d, self.e]),
            Reg16::HL => u16::from_be_bytes([self.h, self.l]),
            Reg16::SP => self.sp,
        }
    }

    pub fn set16(&mut self, reg: Reg16, val: u16) {
        let [hi, lo] = val.to_be_bytes();
        match reg {
            Reg16::AF => {
                self.a = hi;
                self.f = lo & 0xF0;
            }
            Reg16::BC => {
                self.b = hi;
                self.c = lo;
            }
            Reg16::DE => {
                self.d = hi;
                self.e = lo;
            }
            Reg16::HL => {
                self.h = hi;
                self.l = lo;
            }
            Reg16::SP => self.sp = val,
        }
    }

    #[inline]
    pub fn bc(&self) -> u16 {
        self.get16(Reg16::BC)
    }

    #[inline]
    pub fn de(&self) -> u16 {
        self.get16(Reg16::DE)
    }

    #[inline]
    pub fn hl(&self) -> u16 {
        self.get16(Reg16::HL)
    }

    #[inline]
    pub fn set_hl(&mut self, val: u16) {
        self.set16(Reg16::HL, val);
    }

    #[inline]
    pub fn flag(&self, flag: Flag) -> bool {
        self.f & flag.mask() != 0
    }

    #[inline]
    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        self.f = with_bits(self.f, flag.mask(), value);
    }

    /// Replace all four flags at once.
    #[inline]
    pub fn set_flags(&mut self, z: bool, n: bool, h: bool, c: bool) {
        self.f = with_bits(0, FLAG_Z, z)
            | with_bits(0, FLAG_N, n)
            | with_bits(0, FLAG_H, h)
            | with_bits(0, FLAG_C, c);
    }

    /// Formatted register dump for logs and error reports.
    pub fn debug_state(&self) -> String {
        format!(
            "AF:{:04X} BC:{:04X} DE:{:04X} HL:{:04X} SP:{:04X} PC:{:04X}",
            self.get16(Reg16::AF),
            self.bc(),
            self.de(),
            self.hl(),
            self.sp,
            self.pc
        )
    }
}
