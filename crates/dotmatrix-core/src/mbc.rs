use std::fmt;

use log::debug;

use crate::host::WallClock;

pub const ROM_BANK_SIZE: usize = 0x4000;
pub const RAM_BANK_SIZE: usize = 0x2000;
/// MBC2 carries 512 half-bytes of RAM on the controller itself.
pub const MBC2_RAM_SIZE: usize = 0x200;

const SECONDS_PER_DAY: u64 = 86_400;
const RTC_DAY_LIMIT: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankingMode {
    Rom,
    Ram,
}

/// Bank selection state shared by every banked controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Banks {
    pub rom: u16,
    pub ram: u8,
    pub ram_enabled: bool,
}

impl Default for Banks {
    fn default() -> Self {
        Self {
            rom: 1,
            ram: 0,
            ram_enabled: false,
        }
    }
}

impl Banks {
    fn read_rom(&self, rom: &[u8], addr: u16) -> u8 {
        match addr {
            0x0000..=0x3FFF => rom_byte(rom, 0, addr),
            _ => rom_byte(rom, self.rom as usize, addr),
        }
    }

    fn read_ram(&self, ram: &[u8], addr: u16) -> u8 {
        if !self.ram_enabled || ram.is_empty() {
            return 0xFF;
        }
        ram[ram_index(ram.len(), self.ram as usize, addr)]
    }

    fn write_ram(&self, ram: &mut [u8], addr: u16, val: u8) {
        if !self.ram_enabled || ram.is_empty() {
            return;
        }
        let index = ram_index(ram.len(), self.ram as usize, addr);
        ram[index] = val;
    }
}

#[inline]
fn ram_enable(val: u8) -> bool {
    val & 0x0F == 0x0A
}

#[inline]
fn nonzero_bank(bank: u16) -> u16 {
    if bank == 0 { 1 } else { bank }
}

fn rom_byte(rom: &[u8], bank: usize, addr: u16) -> u8 {
    if rom.is_empty() {
        return 0xFF;
    }
    let offset = bank * ROM_BANK_SIZE + (addr as usize & (ROM_BANK_SIZE - 1));
    rom[offset % rom.len()]
}

fn ram_index(len: usize, bank: usize, addr: u16) -> usize {
    (bank * RAM_BANK_SIZE + (addr as usize & (RAM_BANK_SIZE - 1))) % len
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtcRegisters {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub days: u16,
    pub halt: bool,
    pub carry: bool,
}

impl RtcRegisters {
    fn from_total(total: u64, halt: bool, carry: bool) -> Self {
        Self {
            seconds: (total % 60) as u8,
            minutes: (total / 60 % 60) as u8,
            hours: (total / 3600 % 24) as u8,
            days: (total / SECONDS_PER_DAY % RTC_DAY_LIMIT) as u16,
            halt,
            carry,
        }
    }

    fn total(&self) -> u64 {
        self.days as u64 * SECONDS_PER_DAY
            + self.hours as u64 * 3600
            + self.minutes as u64 * 60
            + self.seconds as u64
    }

    fn control_byte(&self) -> u8 {
        let mut out = ((self.days >> 8) as u8) & 0x01;
        if self.halt {
            out |= 0x40;
        }
        if self.carry {
            out |= 0x80;
        }
        out
    }

    fn read(&self, reg: u8) -> u8 {
        match reg {
            0x08 => self.seconds,
            0x09 => self.minutes,
            0x0A => self.hours,
            0x0B => self.days as u8,
            0x0C => self.control_byte(),
            _ => 0xFF,
        }
    }
}

/// MBC3 clock derived from the host wall clock. Only the latched copy is
/// visible to the game; the live time is recomputed on every latch.
pub struct Rtc {
    clock: Box<dyn WallClock>,
    /// Seconds added to the host clock to get the cartridge time.
    offset: i64,
    /// Cartridge time frozen by the halt bit.
    halted_at: Option<u64>,
    carry: bool,
    latched: RtcRegisters,
}

impl fmt::Debug for Rtc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rtc")
            .field("offset", &self.offset)
            .field("halted_at", &self.halted_at)
            .field("latched", &self.latched)
            .finish_non_exhaustive()
    }
}

impl Rtc {
    /// A clock reading zero at the moment it is created.
    pub fn new(clock: Box<dyn WallClock>) -> Self {
        let offset = -(clock.now().as_secs() as i64);
        Self {
            clock,
            offset,
            halted_at: None,
            carry: false,
            latched: RtcRegisters::default(),
        }
    }

    fn host_secs(&self) -> i64 {
        self.clock.now().as_secs() as i64
    }

    fn live_total(&self) -> u64 {
        match self.halted_at {
            Some(total) => total,
            None => (self.host_secs() + self.offset).max(0) as u64,
        }
    }

    fn rebase(&mut self, total: u64) {
        match self.halted_at {
            Some(_) => self.halted_at = Some(total),
            None => self.offset = total as i64 - self.host_secs(),
        }
    }

    fn live(&mut self) -> RtcRegisters {
        let total = self.live_total();
        let days = total / SECONDS_PER_DAY;
        if days >= RTC_DAY_LIMIT {
            self.carry = true;
            self.rebase(total - days / RTC_DAY_LIMIT * RTC_DAY_LIMIT * SECONDS_PER_DAY);
        }
        RtcRegisters::from_total(self.live_total(), self.halted_at.is_some(), self.carry)
    }

    pub fn latch(&mut self) {
        self.latched = self.live();
        debug!("RTC latched {:?}", self.latched);
    }

    pub fn latched(&self) -> RtcRegisters {
        self.latched
    }

    fn write(&mut self, reg: u8, val: u8) {
        let mut regs = self.live();
        match reg {
            0x08 => regs.seconds = val % 60,
            0x09 => regs.minutes = val % 60,
            0x0A => regs.hours = val % 24,
            0x0B => regs.days = (regs.days & 0x0100) | val as u16,
            0x0C => {
                regs.days = (regs.days & 0x00FF) | (((val & 0x01) as u16) << 8);
                regs.halt = val & 0x40 != 0;
                regs.carry = val & 0x80 != 0;
            }
            _ => return,
        }
        let total = regs.total();
        match (self.halted_at.is_some(), regs.halt) {
            (false, true) => self.halted_at = Some(total),
            (true, false) => {
                self.halted_at = None;
                self.offset = total as i64 - self.host_secs();
            }
            _ => self.rebase(total),
        }
        self.carry = regs.carry;
        self.latched = regs;
    }
}

/// Cartridge addressing logic. Each variant holds only the state its
/// hardware has; shared bank bookkeeping lives in [`Banks`].
#[derive(Debug)]
pub enum BankController {
    None,
    Type1 {
        banks: Banks,
        mode: BankingMode,
    },
    Type2 {
        banks: Banks,
    },
    Type3 {
        banks: Banks,
        rtc: Option<Rtc>,
        /// RTC register mapped at 0xA000 instead of RAM, 0x08..=0x0C.
        rtc_select: Option<u8>,
        latch_armed: bool,
    },
    Type5 {
        banks: Banks,
        /// Motor state for rumble carts, `None` otherwise.
        rumble: Option<bool>,
    },
}

impl BankController {
    pub fn type1() -> Self {
        BankController::Type1 {
            banks: Banks::default(),
            mode: BankingMode::Rom,
        }
    }

    pub fn type2() -> Self {
        BankController::Type2 {
            banks: Banks::default(),
        }
    }

    pub fn type3(clock: Option<Box<dyn WallClock>>) -> Self {
        BankController::Type3 {
            banks: Banks::default(),
            rtc: clock.map(Rtc::new),
            rtc_select: None,
            latch_armed: false,
        }
    }

    pub fn type5(rumble: bool) -> Self {
        BankController::Type5 {
            banks: Banks::default(),
            rumble: rumble.then_some(false),
        }
    }

    pub fn banks(&self) -> Option<&Banks> {
        match self {
            BankController::None => None,
            BankController::Type1 { banks, .. }
            | BankController::Type2 { banks }
            | BankController::Type3 { banks, .. }
            | BankController::Type5 { banks, .. } => Some(banks),
        }
    }

    /// ROM bank currently mapped at 0x4000-0x7FFF.
    pub fn rom_bank(&self) -> u16 {
        self.banks().map_or(1, |b| b.rom)
    }

    pub fn ram_enabled(&self) -> bool {
        self.banks().is_none_or(|b| b.ram_enabled)
    }

    pub fn rumble_active(&self) -> bool {
        matches!(self, BankController::Type5 { rumble: Some(true), .. })
    }

    pub fn rtc(&self) -> Option<&Rtc> {
        match self {
            BankController::Type3 { rtc, .. } => rtc.as_ref(),
            _ => None,
        }
    }

    /// Resolve a read in 0x0000-0x7FFF or 0xA000-0xBFFF.
    pub fn read(&self, rom: &[u8], ram: &[u8], addr: u16) -> u8 {
        match self {
            BankController::None => match addr {
                0x0000..=0x7FFF => rom.get(addr as usize).copied().unwrap_or(0xFF),
                _ => ram
                    .get((addr - 0xA000) as usize)
                    .copied()
                    .unwrap_or(0xFF),
            },
            BankController::Type1 { banks, .. } | BankController::Type5 { banks, .. } => {
                match addr {
                    0x0000..=0x7FFF => banks.read_rom(rom, addr),
                    _ => banks.read_ram(ram, addr),
                }
            }
            BankController::Type2 { banks } => match addr {
                0x0000..=0x7FFF => banks.read_rom(rom, addr),
                _ if !banks.ram_enabled || ram.is_empty() => 0xFF,
                _ => ram[(addr as usize & (MBC2_RAM_SIZE - 1)) % ram.len()] | 0xF0,
            },
            BankController::Type3 {
                banks,
                rtc,
                rtc_select,
                ..
            } => match (addr, rtc_select, rtc) {
                (0x0000..=0x7FFF, _, _) => banks.read_rom(rom, addr),
                (_, Some(reg), Some(rtc)) if banks.ram_enabled => rtc.latched.read(*reg),
                (_, Some(_), _) => 0xFF,
                _ => banks.read_ram(ram, addr),
            },
        }
    }

    /// Resolve a write in 0x0000-0x7FFF (control registers) or 0xA000-0xBFFF.
    pub fn write(&mut self, ram: &mut [u8], addr: u16, val: u8) {
        match self {
            BankController::None => {
                if let 0xA000..=0xBFFF = addr
                    && let Some(slot) = ram.get_mut((addr - 0xA000) as usize)
                {
                    *slot = val;
                }
            }
            BankController::Type1 { banks, mode } => match addr {
                0x0000..=0x1FFF => banks.ram_enabled = ram_enable(val),
                0x2000..=0x3FFF => {
                    banks.rom = (banks.rom & 0x60) | nonzero_bank((val & 0x1F) as u16);
                    debug!("MBC1 ROM bank {:02X}", banks.rom);
                }
                0x4000..=0x5FFF => match mode {
                    BankingMode::Rom => banks.rom = (banks.rom & 0x1F) | (((val & 0x03) as u16) << 5),
                    BankingMode::Ram => banks.ram = val & 0x03,
                },
                0x6000..=0x7FFF => {
                    *mode = if val & 0x01 == 0 {
                        BankingMode::Rom
                    } else {
                        BankingMode::Ram
                    };
                }
                _ => banks.write_ram(ram, addr, val),
            },
            BankController::Type2 { banks } => match addr {
                0x0000..=0x3FFF if addr & 0x0100 == 0 => banks.ram_enabled = ram_enable(val),
                0x0000..=0x3FFF => {
                    banks.rom = nonzero_bank((val & 0x0F) as u16);
                    debug!("MBC2 ROM bank {:02X}", banks.rom);
                }
                0x4000..=0x7FFF => {}
                _ => {
                    if banks.ram_enabled && !ram.is_empty() {
                        let index = (addr as usize & (MBC2_RAM_SIZE - 1)) % ram.len();
                        ram[index] = val & 0x0F;
                    }
                }
            },
            BankController::Type3 {
                banks,
                rtc,
                rtc_select,
                latch_armed,
            } => match addr {
                0x0000..=0x1FFF => banks.ram_enabled = ram_enable(val),
                0x2000..=0x3FFF => {
                    banks.rom = nonzero_bank((val & 0x7F) as u16);
                    debug!("MBC3 ROM bank {:02X}", banks.rom);
                }
                0x4000..=0x5FFF => {
                    if val & 0x08 != 0 {
                        *rtc_select = Some(val);
                    } else {
                        *rtc_select = None;
                        banks.ram = val & 0x03;
                    }
                }
                0x6000..=0x7FFF => {
                    if *latch_armed
                        && val == 0x01
                        && let Some(rtc) = rtc
                    {
                        rtc.latch();
                    }
                    *latch_armed = val == 0x00;
                }
                _ => match (rtc_select, rtc) {
                    (Some(reg), Some(rtc)) if banks.ram_enabled => rtc.write(*reg, val),
                    (Some(_), _) => {}
                    (None, _) => banks.write_ram(ram, addr, val),
                },
            },
            BankController::Type5 { banks, rumble } => match addr {
                0x0000..=0x1FFF => banks.ram_enabled = ram_enable(val),
                0x2000..=0x2FFF => {
                    banks.rom = (banks.rom & 0x100) | val as u16;
                    debug!("MBC5 ROM bank {:03X}", banks.rom);
                }
                0x3000..=0x3FFF => banks.rom = (banks.rom & 0x0FF) | (((val & 0x01) as u16) << 8),
                0x4000..=0x5FFF => match rumble {
                    Some(motor) => {
                        *motor = val & 0x08 != 0;
                        banks.ram = val & 0x07;
                    }
                    None => banks.ram = val & 0x0F,
                },
                0x6000..=0x7FFF => {}
                _ => banks.write_ram(ram, addr, val),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ManualClock;

    fn banked_rom(banks: usize) -> Vec<u8> {
        let mut rom = vec![0u8; banks * ROM_BANK_SIZE];
        for (bank, chunk) in rom.chunks_mut(ROM_BANK_SIZE).enumerate() {
            chunk[0] = bank as u8;
            chunk[1] = (bank >> 8) as u8;
        }
        rom
    }

    #[test]
    fn type1_bank_zero_selects_bank_one() {
        let rom = banked_rom(8);
        let mut mbc = BankController::type1();
        mbc.write(&mut [], 0x2000, 0x00);
        assert_eq!(mbc.rom_bank(), 1);
        assert_eq!(mbc.read(&rom, &[], 0x4000), 1);
        mbc.write(&mut [], 0x2000, 0x05);
        assert_eq!(mbc.read(&rom, &[], 0x4000), 5);
        assert_eq!(mbc.read(&rom, &[], 0x0000), 0);
    }

    #[test]
    fn type1_ram_enable_gates_writes() {
        let rom = banked_rom(4);
        let mut ram = vec![0u8; RAM_BANK_SIZE];
        let mut mbc = BankController::type1();
        mbc.write(&mut ram, 0xA000, 0x42);
        assert_eq!(mbc.read(&rom, &ram, 0xA000), 0xFF);
        mbc.write(&mut ram, 0x0000, 0x1A);
        mbc.write(&mut ram, 0xA000, 0x42);
        assert_eq!(mbc.read(&rom, &ram, 0xA000), 0x42);
        mbc.write(&mut ram, 0x1FFF, 0x00);
        assert_eq!(mbc.read(&rom, &ram, 0xA000), 0xFF);
    }

    #[test]
    fn type1_mode_latch_routes_upper_bits() {
        let rom = banked_rom(64);
        let mut ram = vec![0u8; RAM_BANK_SIZE * 4];
        let mut mbc = BankController::type1();
        mbc.write(&mut ram, 0x2000, 0x02);
        mbc.write(&mut ram, 0x4000, 0x01);
        assert_eq!(mbc.read(&rom, &ram, 0x4000), 0x22);

        mbc.write(&mut ram, 0x6000, 0x01);
        mbc.write(&mut ram, 0x0000, 0x0A);
        mbc.write(&mut ram, 0x4000, 0x02);
        mbc.write(&mut ram, 0xA000, 0x77);
        assert_eq!(ram[2 * RAM_BANK_SIZE], 0x77);
    }

    #[test]
    fn type2_address_bit_8_selects_register() {
        let rom = banked_rom(16);
        let mut ram = vec![0u8; MBC2_RAM_SIZE];
        let mut mbc = BankController::type2();
        mbc.write(&mut ram, 0x2100, 0x13);
        assert_eq!(mbc.read(&rom, &ram, 0x4000), 3);
        mbc.write(&mut ram, 0x0100, 0x0A);
        assert!(!mbc.ram_enabled());
        mbc.write(&mut ram, 0x0000, 0x0A);
        assert!(mbc.ram_enabled());
        mbc.write(&mut ram, 0xA005, 0xAB);
        assert_eq!(mbc.read(&rom, &ram, 0xA005), 0xFB);
        assert_eq!(mbc.read(&rom, &ram, 0xA205), 0xFB);
    }

    #[test]
    fn type3_rtc_latch_snapshots_clock() {
        let clock = ManualClock::new(1_000_000);
        let mut mbc = BankController::type3(Some(Box::new(clock.clone())));
        let mut ram = vec![0u8; RAM_BANK_SIZE];
        mbc.write(&mut ram, 0x0000, 0x0A);
        clock.advance(SECONDS_PER_DAY + 3600 * 2 + 60 * 3 + 4);
        mbc.write(&mut ram, 0x6000, 0x00);
        mbc.write(&mut ram, 0x6000, 0x01);

        let read = |mbc: &mut BankController, reg: u8| {
            mbc.write(&mut [], 0x4000, reg);
            mbc.read(&[], &[], 0xA000)
        };
        assert_eq!(read(&mut mbc, 0x08), 4);
        assert_eq!(read(&mut mbc, 0x09), 3);
        assert_eq!(read(&mut mbc, 0x0A), 2);
        assert_eq!(read(&mut mbc, 0x0B), 1);
        assert_eq!(read(&mut mbc, 0x0C), 0);

        // Without a fresh latch the registers hold still.
        clock.advance(10);
        assert_eq!(read(&mut mbc, 0x08), 4);
    }

    #[test]
    fn type3_rtc_halt_freezes_and_days_carry() {
        let clock = ManualClock::new(0);
        let mut mbc = BankController::type3(Some(Box::new(clock.clone())));
        mbc.write(&mut [], 0x0000, 0x0A);
        mbc.write(&mut [], 0x4000, 0x0C);
        mbc.write(&mut [], 0xA000, 0x40);
        clock.advance(500);
        mbc.write(&mut [], 0x6000, 0x00);
        mbc.write(&mut [], 0x6000, 0x01);
        assert_eq!(mbc.rtc().map(|r| r.latched().seconds), Some(0));

        mbc.write(&mut [], 0xA000, 0x00);
        clock.advance(RTC_DAY_LIMIT * SECONDS_PER_DAY + 5);
        mbc.write(&mut [], 0x6000, 0x00);
        mbc.write(&mut [], 0x6000, 0x01);
        let latched = mbc.rtc().map(Rtc::latched).unwrap();
        assert!(latched.carry);
        assert_eq!(latched.days, 0);
        assert_eq!(latched.seconds, 5);
    }

    #[test]
    fn type3_uses_seven_bank_bits() {
        let rom = banked_rom(128);
        let mut mbc = BankController::type3(None);
        mbc.write(&mut [], 0x2000, 0x7F);
        assert_eq!(mbc.read(&rom, &[], 0x4000), 0x7F);
        mbc.write(&mut [], 0x2000, 0x80);
        assert_eq!(mbc.rom_bank(), 1);
    }

    #[test]
    fn type5_nine_bit_rom_bank_and_rumble_mask() {
        let rom = banked_rom(512);
        let mut mbc = BankController::type5(false);
        mbc.write(&mut [], 0x2000, 0x00);
        assert_eq!(mbc.read(&rom, &[], 0x4000), 0);
        mbc.write(&mut [], 0x2000, 0x23);
        mbc.write(&mut [], 0x3000, 0x01);
        assert_eq!(mbc.rom_bank(), 0x123);
        assert_eq!(mbc.read(&rom, &[], 0x4001), 1);

        let mut ram = vec![0u8; RAM_BANK_SIZE * 16];
        mbc.write(&mut ram, 0x0000, 0x0A);
        mbc.write(&mut ram, 0x4000, 0x0F);
        mbc.write(&mut ram, 0xA000, 0x99);
        assert_eq!(ram[15 * RAM_BANK_SIZE], 0x99);

        let mut rumble = BankController::type5(true);
        rumble.write(&mut ram, 0x4000, 0x0B);
        assert!(rumble.rumble_active());
        assert_eq!(rumble.banks().map(|b| b.ram), Some(3));
    }
}
