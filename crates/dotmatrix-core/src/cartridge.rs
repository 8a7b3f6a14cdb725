use log::{info, warn};

use crate::error::{CoreError, Result};
use crate::host::{SystemClock, WallClock};
use crate::mbc::{BankController, MBC2_RAM_SIZE, RAM_BANK_SIZE, ROM_BANK_SIZE};

const TITLE: std::ops::Range<usize> = 0x0134..0x0143;
const CGB_FLAG: usize = 0x0143;
const NEW_LICENSEE: std::ops::Range<usize> = 0x0144..0x0146;
const CART_TYPE: usize = 0x0147;
const ROM_SIZE: usize = 0x0148;
const RAM_SIZE: usize = 0x0149;
const DESTINATION: usize = 0x014A;
const OLD_LICENSEE: usize = 0x014B;
const HEADER_CHECKSUM: usize = 0x014D;
/// Smallest image that holds a complete header.
pub const HEADER_END: usize = 0x0150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcType {
    None,
    Type1,
    Type2,
    Type3,
    Type5,
}

/// Controller variant plus the extra hardware on the board, as encoded by
/// the cartridge-type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartridgeKind {
    pub mbc: MbcType,
    pub ram: bool,
    pub battery: bool,
    pub timer: bool,
    pub rumble: bool,
}

impl CartridgeKind {
    const fn new(mbc: MbcType) -> Self {
        Self {
            mbc,
            ram: false,
            battery: false,
            timer: false,
            rumble: false,
        }
    }

    const fn ram(mut self) -> Self {
        self.ram = true;
        self
    }

    const fn battery(mut self) -> Self {
        self.battery = true;
        self
    }

    const fn timer(mut self) -> Self {
        self.timer = true;
        self
    }

    const fn rumble(mut self) -> Self {
        self.rumble = true;
        self
    }

    /// Decode a cartridge-type byte (gbdev.io/pandocs/The_Cartridge_Header.html).
    pub fn from_code(code: u8) -> Result<Self> {
        use MbcType::*;
        let kind = match code {
            0x00 => Self::new(None),
            0x01 => Self::new(Type1),
            0x02 => Self::new(Type1).ram(),
            0x03 => Self::new(Type1).ram().battery(),
            // MBC2 RAM is built into the controller.
            0x05 => Self::new(Type2).ram(),
            0x06 => Self::new(Type2).ram().battery(),
            0x08 => Self::new(None).ram(),
            0x09 => Self::new(None).ram().battery(),
            0x0F => Self::new(Type3).timer().battery(),
            0x10 => Self::new(Type3).timer().ram().battery(),
            0x11 => Self::new(Type3),
            0x12 => Self::new(Type3).ram(),
            0x13 => Self::new(Type3).ram().battery(),
            0x19 => Self::new(Type5),
            0x1A => Self::new(Type5).ram(),
            0x1B => Self::new(Type5).ram().battery(),
            0x1C => Self::new(Type5).rumble(),
            0x1D => Self::new(Type5).rumble().ram(),
            0x1E => Self::new(Type5).rumble().ram().battery(),
            _ => return Err(CoreError::UnknownCartridgeType { code }),
        };
        Ok(kind)
    }

    /// Stand-in for cartridge-type bytes missing from the table.
    pub const fn fallback() -> Self {
        Self::new(MbcType::Type3).ram()
    }
}

/// ROM bank count for a header ROM-size byte.
pub fn rom_banks(code: u8) -> Option<usize> {
    match code {
        0x00..=0x08 => Some(2 << code),
        0x52 => Some(72),
        0x53 => Some(80),
        0x54 => Some(96),
        _ => None,
    }
}

/// Cartridge RAM size in bytes for a header RAM-size byte.
pub fn ram_bytes(code: u8) -> Option<usize> {
    match code {
        0x00 => Some(0),
        0x01 => Some(0x800),
        0x02..=0x04 => Some(RAM_BANK_SIZE << (2 * (code - 2))),
        0x05 => Some(RAM_BANK_SIZE * 8),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub title: String,
    pub cgb_flag: u8,
    pub licensee: String,
    pub cart_type: u8,
    pub kind: CartridgeKind,
    pub rom_banks: usize,
    pub ram_size: usize,
    pub destination: u8,
    pub checksum_ok: bool,
}

impl Header {
    /// Decode the header. Unknown type and size bytes are replaced with
    /// fallbacks and logged; only an image too short to hold a header fails.
    pub fn parse(rom: &[u8]) -> Result<Self> {
        if rom.len() < HEADER_END {
            return Err(CoreError::RomTooSmall { len: rom.len() });
        }

        let mut title = &rom[TITLE];
        if let Some(pos) = title.iter().position(|&b| b == 0) {
            title = &title[..pos];
        }
        let title = String::from_utf8_lossy(title).trim().to_string();

        let cart_type = rom[CART_TYPE];
        let kind = CartridgeKind::from_code(cart_type).unwrap_or_else(|err| {
            warn!("{err}; falling back to MBC3 with RAM");
            CartridgeKind::fallback()
        });

        let rom_banks = rom_banks(rom[ROM_SIZE]).unwrap_or_else(|| {
            let banks = rom.len().div_ceil(ROM_BANK_SIZE).max(2);
            warn!(
                "unknown ROM size byte {:#04X}; assuming {banks} banks from image size",
                rom[ROM_SIZE]
            );
            banks
        });

        let ram_size = if kind.mbc == MbcType::Type2 {
            MBC2_RAM_SIZE
        } else if !kind.ram {
            0
        } else {
            ram_bytes(rom[RAM_SIZE]).unwrap_or_else(|| {
                warn!(
                    "unknown RAM size byte {:#04X}; assuming one bank",
                    rom[RAM_SIZE]
                );
                RAM_BANK_SIZE
            })
        };

        let licensee = match rom[OLD_LICENSEE] {
            0x33 => String::from_utf8_lossy(&rom[NEW_LICENSEE]).into_owned(),
            old => format!("{old:02X}"),
        };

        let checksum = rom[TITLE.start..HEADER_CHECKSUM]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_sub(b).wrapping_sub(1));
        let checksum_ok = checksum == rom[HEADER_CHECKSUM];
        if !checksum_ok {
            warn!(
                "header checksum mismatch: computed {checksum:02X}, stored {:02X}",
                rom[HEADER_CHECKSUM]
            );
        }

        Ok(Self {
            title,
            cgb_flag: rom[CGB_FLAG],
            licensee,
            cart_type,
            kind,
            rom_banks,
            ram_size,
            destination: rom[DESTINATION],
            checksum_ok,
        })
    }

    pub fn cgb_supported(&self) -> bool {
        self.cgb_flag & 0x80 != 0
    }
}

#[derive(Debug)]
pub struct Cartridge {
    pub header: Header,
    rom: Vec<u8>,
    ram: Vec<u8>,
    mbc: BankController,
}

impl Cartridge {
    pub fn new(rom: Vec<u8>) -> Result<Self> {
        Self::with_clock(rom, Box::new(SystemClock))
    }

    /// Build a cartridge whose real-time clock, if it has one, reads `clock`.
    pub fn with_clock(rom: Vec<u8>, clock: Box<dyn WallClock>) -> Result<Self> {
        let header = Header::parse(&rom)?;
        let kind = header.kind;
        let mbc = match kind.mbc {
            MbcType::None => BankController::None,
            MbcType::Type1 => BankController::type1(),
            MbcType::Type2 => BankController::type2(),
            MbcType::Type3 => BankController::type3(kind.timer.then_some(clock)),
            MbcType::Type5 => BankController::type5(kind.rumble),
        };
        info!(
            "Loaded ROM: {} (type {:02X}, {:?}, {} banks, {} bytes RAM)",
            header.title, header.cart_type, kind.mbc, header.rom_banks, header.ram_size
        );
        Ok(Self {
            ram: vec![0; header.ram_size],
            header,
            rom,
            mbc,
        })
    }

    /// Cartridge with no controller and `ram_size` bytes of plain RAM.
    pub fn from_bytes_with_ram(mut rom: Vec<u8>, ram_size: usize) -> Result<Self> {
        if rom.len() < HEADER_END {
            rom.resize(HEADER_END, 0);
        }
        rom[CART_TYPE] = 0x00;
        let mut header = Header::parse(&rom)?;
        header.ram_size = ram_size;
        Ok(Self {
            header,
            rom,
            ram: vec![0; ram_size],
            mbc: BankController::None,
        })
    }

    pub fn read(&self, addr: u16) -> u8 {
        self.mbc.read(&self.rom, &self.ram, addr)
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        self.mbc.write(&mut self.ram, addr, val);
    }

    pub fn mbc(&self) -> &BankController {
        &self.mbc
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn has_battery(&self) -> bool {
        self.header.kind.battery && !self.ram.is_empty()
    }

    /// Key under which battery RAM is persisted.
    pub fn save_key(&self) -> String {
        if self.header.title.is_empty() {
            "untitled".to_string()
        } else {
            self.header.title.clone()
        }
    }

    /// Restore battery RAM from a save image. Short images fill a prefix.
    pub fn load_ram(&mut self, data: &[u8]) {
        if data.len() != self.ram.len() {
            warn!(
                "save data is {} bytes, cartridge RAM is {}",
                data.len(),
                self.ram.len()
            );
        }
        for (d, s) in self.ram.iter_mut().zip(data) {
            *d = *s;
        }
    }
}
