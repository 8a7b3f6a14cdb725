use log::{debug, error};

use crate::{
    apu::{self, Apu},
    cartridge::Cartridge,
    error::{CoreError, Result},
    host::{AudioSink, DisplaySink, NullAudio, NullDisplay},
    input::{Input, JOYP},
    interrupts::INT_MASK,
    ppu::{self, Palette, Ppu},
    timer::{self, Timer},
};

const WRAM_BANK_SIZE: usize = 0x1000;
const IO_SIZE: usize = 0x80;
const HRAM_SIZE: usize = 0x7F;
const OAM_DMA_LEN: u16 = 0xA0;

pub const IF: u16 = 0xFF0F;
pub const DMA: u16 = 0xFF46;
pub const BOOT_OFF: u16 = 0xFF50;
pub const IE: u16 = 0xFFFF;

/// Post-boot contents of the timer, sound and video registers.
pub const BOOT_IO_DEFAULTS: [(u16, u8); 30] = [
    (timer::TIMA, 0x00),
    (timer::TMA, 0x00),
    (timer::TAC, 0x00),
    (apu::NR10, 0x80),
    (apu::NR11, 0xBF),
    (apu::NR12, 0xF3),
    (apu::NR14, 0xBF),
    (apu::NR21, 0x3F),
    (apu::NR22, 0x00),
    (apu::NR24, 0xBF),
    (apu::NR30, 0x7F),
    (apu::NR31, 0xFF),
    (apu::NR32, 0x9F),
    (apu::NR34, 0xBF),
    (apu::NR41, 0xFF),
    (apu::NR42, 0x00),
    (apu::NR43, 0x00),
    (apu::NR44, 0xBF),
    (apu::NR50, 0x77),
    (apu::NR51, 0xF3),
    (apu::NR52, 0xF1),
    (ppu::LCDC, 0x91),
    (ppu::SCY, 0x00),
    (ppu::SCX, 0x00),
    (ppu::LYC, 0x00),
    (ppu::BGP, 0xFC),
    (ppu::OBP0, 0xFF),
    (ppu::OBP1, 0xFF),
    (ppu::WY, 0x00),
    (ppu::WX, 0x00),
];

const BOOT_DIV: u8 = 0xAB;
const BOOT_IF: u8 = 0x01;

/// A peripheral whose registers live in the I/O window.
///
/// The bus owns every device and hands each one the interrupt-flag register
/// for the duration of a call, so devices never hold a reference back to it.
pub trait IoDevice {
    fn name(&self) -> &'static str;
    fn read_reg(&self, addr: u16) -> Result<u8>;
    fn write_reg(&mut self, addr: u16, val: u8, if_reg: &mut u8) -> Result<()>;
    /// Run the device for `cycles` clock cycles.
    fn advance(&mut self, cycles: u32, if_reg: &mut u8);
}

pub struct Mmu {
    pub wram: [[u8; WRAM_BANK_SIZE]; 2],
    pub hram: [u8; HRAM_SIZE],
    io: [u8; IO_SIZE],
    pub cart: Option<Cartridge>,
    pub boot_rom: Option<Vec<u8>>,
    pub boot_mapped: bool,
    pub if_reg: u8,
    pub ie_reg: u8,
    pub timer: Timer,
    pub ppu: Ppu,
    pub apu: Apu,
    pub input: Input,
    dma_source: u8,
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

impl Mmu {
    /// A bus with no-op display and audio sinks.
    pub fn new() -> Self {
        Self::with_sinks(ppu::CLASSIC_GREEN, Box::new(NullDisplay), Box::new(NullAudio))
    }

    pub fn with_sinks(
        palette: Palette,
        display: Box<dyn DisplaySink>,
        audio: Box<dyn AudioSink>,
    ) -> Self {
        Self {
            wram: [[0; WRAM_BANK_SIZE]; 2],
            hram: [0; HRAM_SIZE],
            io: [0xFF; IO_SIZE],
            cart: None,
            boot_rom: None,
            boot_mapped: false,
            if_reg: 0,
            ie_reg: 0,
            timer: Timer::new(),
            ppu: Ppu::new(palette, display),
            apu: Apu::new(audio),
            input: Input::new(),
            dma_source: 0xFF,
        }
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.cart = Some(cart);
    }

    /// Overlay `data` on 0x0000-0x00FF until 0xFF50 is written.
    pub fn load_boot_rom(&mut self, data: Vec<u8>) {
        self.boot_rom = Some(data);
        self.boot_mapped = true;
    }

    /// Put the I/O registers in the state the boot ROM leaves them in.
    pub fn apply_boot_defaults(&mut self) {
        for &(addr, val) in BOOT_IO_DEFAULTS.iter() {
            if (apu::NR10..=apu::WAVE_RAM_END).contains(&addr) {
                self.apu.preload(addr, val);
            } else {
                self.write_byte(addr, val);
            }
        }
        self.timer.div = BOOT_DIV;
        self.if_reg = BOOT_IF;
    }

    fn device(&self, addr: u16) -> Option<&dyn IoDevice> {
        match addr {
            timer::DIV..=timer::TAC => Some(&self.timer),
            apu::NR10..=apu::WAVE_RAM_END => Some(&self.apu),
            ppu::LCDC..=ppu::LYC | ppu::BGP..=ppu::WX => Some(&self.ppu),
            _ => None,
        }
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x00FF if self.boot_mapped => self
                .boot_rom
                .as_ref()
                .and_then(|b| b.get(addr as usize).copied())
                .unwrap_or(0xFF),
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                self.cart.as_ref().map(|c| c.read(addr)).unwrap_or(0xFF)
            }
            0x8000..=0x9FFF => self.ppu.read_vram(addr),
            0xC000..=0xCFFF => self.wram[0][(addr - 0xC000) as usize],
            0xD000..=0xDFFF => self.wram[1][(addr - 0xD000) as usize],
            0xE000..=0xFDFF => self.read_byte(addr - 0x2000),
            0xFE00..=0xFE9F => self.ppu.read_oam(addr),
            0xFEA0..=0xFEFF => 0x00,
            JOYP => self.input.read(),
            IF => self.if_reg | !INT_MASK,
            DMA => self.dma_source,
            0xFF01..=0xFF7F => match self.device(addr) {
                Some(device) => device.read_reg(addr).unwrap_or_else(|e| {
                    error!("{e}");
                    0xFF
                }),
                None => self.io[(addr - 0xFF00) as usize],
            },
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            IE => self.ie_reg,
        }
    }

    pub fn write_byte(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.write(addr, val);
                }
            }
            0x8000..=0x9FFF => self.ppu.write_vram(addr, val),
            0xC000..=0xCFFF => self.wram[0][(addr - 0xC000) as usize] = val,
            0xD000..=0xDFFF => self.wram[1][(addr - 0xD000) as usize] = val,
            0xE000..=0xFDFF => self.write_byte(addr - 0x2000, val),
            0xFE00..=0xFE9F => self.ppu.write_oam(addr, val),
            0xFEA0..=0xFEFF => {}
            JOYP => self.input.write(val),
            IF => self.if_reg = val & INT_MASK,
            DMA => self.oam_dma(val),
            BOOT_OFF => {
                if self.boot_mapped && val != 0 {
                    debug!("boot ROM unmapped");
                    self.boot_mapped = false;
                }
                self.io[(addr - 0xFF00) as usize] = val;
            }
            0xFF01..=0xFF7F => self.write_io(addr, val),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            IE => self.ie_reg = val,
        }
    }

    fn write_io(&mut self, addr: u16, val: u8) {
        let if_reg = &mut self.if_reg;
        let device: &mut dyn IoDevice = match addr {
            timer::DIV..=timer::TAC => &mut self.timer,
            apu::NR10..=apu::WAVE_RAM_END => &mut self.apu,
            ppu::LCDC..=ppu::LYC | ppu::BGP..=ppu::WX => &mut self.ppu,
            _ => {
                self.io[(addr - 0xFF00) as usize] = val;
                return;
            }
        };
        if let Err(e) = device.write_reg(addr, val, if_reg) {
            error!("{e}");
        }
    }

    /// Copy 160 bytes from `source << 8` into object attribute memory.
    fn oam_dma(&mut self, source: u8) {
        self.dma_source = source;
        let base = (source as u16) << 8;
        for i in 0..OAM_DMA_LEN {
            let mut src = base + i;
            // Sources above working RAM read through the echo region.
            if src >= 0xE000 {
                src -= 0x2000;
            }
            let byte = self.read_byte(src);
            self.ppu.write_oam(0xFE00 + i, byte);
        }
    }

    /// Bus read for an address supplied from outside the 16-bit space.
    pub fn try_read(&self, addr: usize) -> Result<u8> {
        let addr = u16::try_from(addr).map_err(|_| CoreError::AddressRange { address: addr })?;
        Ok(self.read_byte(addr))
    }

    pub fn try_write(&mut self, addr: usize, val: u8) -> Result<()> {
        let addr = u16::try_from(addr).map_err(|_| CoreError::AddressRange { address: addr })?;
        self.write_byte(addr, val);
        Ok(())
    }

    pub fn read_word(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.read_byte(addr), self.read_byte(addr.wrapping_add(1))])
    }

    pub fn write_word(&mut self, addr: u16, val: u16) {
        let [lo, hi] = val.to_le_bytes();
        self.write_byte(addr, lo);
        self.write_byte(addr.wrapping_add(1), hi);
    }

    /// Broadcast elapsed cycles to the timer, the video unit and the audio
    /// unit, in that order.
    pub fn tick(&mut self, cycles: u32) {
        let if_reg = &mut self.if_reg;
        let devices: [&mut dyn IoDevice; 3] = [&mut self.timer, &mut self.ppu, &mut self.apu];
        for device in devices {
            device.advance(cycles, if_reg);
        }
    }

    /// Interrupts both requested and enabled.
    pub fn pending_interrupts(&self) -> u8 {
        self.if_reg & self.ie_reg & INT_MASK
    }
}
