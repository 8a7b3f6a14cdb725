use std::io;

use log::{info, warn};

use crate::{
    cartridge::Cartridge,
    cpu::Cpu,
    error::Result,
    host::{AudioSink, DisplaySink, MemoryStorage, NullAudio, NullDisplay, SaveStorage},
    input::Button,
    mmu::Mmu,
    ppu::{self, FRAME_CYCLES, Palette},
};

/// Machine-wide settings fixed at construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// Stop on illegal opcodes instead of logging and stepping past them.
    pub strict_opcodes: bool,
    /// RGBA shades for palette indices 0-3.
    pub palette: Palette,
    /// 256-byte boot image. Without one the machine starts in the post-boot
    /// state at 0x0100.
    pub boot_rom: Option<Vec<u8>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strict_opcodes: false,
            palette: ppu::CLASSIC_GREEN,
            boot_rom: None,
        }
    }
}

pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
    strict_opcodes: bool,
    storage: Box<dyn SaveStorage>,
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl GameBoy {
    /// A machine with no-op display and audio and in-memory save storage.
    pub fn new(config: Config) -> Self {
        Self::with_host(
            config,
            Box::new(NullDisplay),
            Box::new(NullAudio),
            Box::new(MemoryStorage::new()),
        )
    }

    pub fn with_host(
        config: Config,
        display: Box<dyn DisplaySink>,
        audio: Box<dyn AudioSink>,
        storage: Box<dyn SaveStorage>,
    ) -> Self {
        let mut mmu = Mmu::with_sinks(config.palette, display, audio);
        let cpu = match config.boot_rom {
            Some(boot) => {
                mmu.load_boot_rom(boot);
                Cpu::new_power_on()
            }
            None => {
                mmu.apply_boot_defaults();
                Cpu::new()
            }
        };
        Self {
            cpu,
            mmu,
            strict_opcodes: config.strict_opcodes,
            storage,
        }
    }

    /// Parse `rom` and insert it.
    pub fn load_rom(&mut self, rom: Vec<u8>) -> Result<()> {
        self.load_cart(Cartridge::new(rom)?);
        Ok(())
    }

    /// Insert a cartridge, restoring its battery RAM from storage if any was
    /// saved under its key.
    pub fn load_cart(&mut self, mut cart: Cartridge) {
        if cart.header.cgb_supported() {
            info!("{} has Game Boy Color features, running as DMG", cart.save_key());
        }
        if cart.has_battery() {
            let key = cart.save_key();
            match self.storage.load(&key) {
                Ok(Some(data)) => {
                    info!("Restored {} bytes of save RAM for {key}", data.len());
                    cart.load_ram(&data);
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to load save RAM for {key}: {e}"),
            }
        }
        self.mmu.load_cart(cart);
    }

    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.mmu.cart.as_ref()
    }

    /// Write battery RAM back to storage. Carts without a battery are skipped.
    pub fn save_ram(&mut self) -> io::Result<()> {
        let Some(cart) = self.mmu.cart.as_ref().filter(|c| c.has_battery()) else {
            return Ok(());
        };
        self.storage.store(&cart.save_key(), cart.ram())
    }

    /// Run one instruction and return the clock cycles it took.
    pub fn step(&mut self) -> Result<u32> {
        let before = self.cpu.cycles;
        match self.cpu.step(&mut self.mmu) {
            Err(e) if !self.strict_opcodes && e.is_recoverable() => {
                warn!("{e}, skipping");
                Ok((self.cpu.cycles - before) as u32)
            }
            other => other,
        }
    }

    /// Run until the video unit completes a frame, or for one frame's worth
    /// of cycles when the display is off.
    pub fn run_frame(&mut self) -> Result<()> {
        self.mmu.ppu.clear_frame_flag();
        let start = self.cpu.cycles;
        while !self.mmu.ppu.frame_ready() && self.cpu.cycles - start < FRAME_CYCLES as u64 {
            self.step()?;
        }
        Ok(())
    }

    pub fn press(&mut self, button: Button) {
        self.mmu.input.set_button(button, true, &mut self.mmu.if_reg);
    }

    pub fn release(&mut self, button: Button) {
        self.mmu.input.set_button(button, false, &mut self.mmu.if_reg);
    }

    /// Most recent 160×144 RGBA screen.
    pub fn screen(&self) -> &[u8] {
        self.mmu.ppu.screen()
    }

    /// Most recent 256×256 RGBA background plane.
    pub fn background(&self) -> &[u8] {
        self.mmu.ppu.background()
    }

    pub fn frame_count(&self) -> u64 {
        self.mmu.ppu.frames()
    }
}
