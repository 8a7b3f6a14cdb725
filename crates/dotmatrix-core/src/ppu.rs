use crate::error::{CoreError, Result};
use crate::host::{DisplaySink, Frame};
use crate::interrupts::{INT_STAT, INT_VBLANK};
use crate::mmu::IoDevice;

// Screen resolution used by the Game Boy PPU
pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;
/// The background plane is 32×32 tiles.
pub const BG_SIZE: usize = 256;

// Timing constants per LCD mode in clock cycles
const MODE0_CYCLES: u32 = 204; // HBlank
const MODE2_CYCLES: u32 = 80; // OAM scan
const MODE3_CYCLES: u32 = 172; // Pixel transfer
pub const LINE_CYCLES: u32 = MODE0_CYCLES + MODE2_CYCLES + MODE3_CYCLES;
const VBLANK_LINES: u32 = 10;
pub const VBLANK_CYCLES: u32 = LINE_CYCLES * VBLANK_LINES;
pub const FRAME_CYCLES: u32 = LINE_CYCLES * SCREEN_HEIGHT as u32 + VBLANK_CYCLES;
const LAST_LINE: u8 = 153;

// Sprite limits
const MAX_SPRITES_PER_LINE: usize = 10;
const TOTAL_SPRITES: usize = 40;

// Internal memory sizes
pub const VRAM_SIZE: usize = 0x2000;
pub const OAM_SIZE: usize = 0xA0;
/// Tiles 0-383 live in 0x8000-0x97FF; the tile maps start above them.
pub const TILE_COUNT: usize = 384;
const TILE_DATA_END: usize = 0x1800;

// VRAM layout constants
const BG_MAP_0_BASE: usize = 0x1800;
const BG_MAP_1_BASE: usize = 0x1C00;

// Window X position is clipped if greater than this value
const WINDOW_X_MAX: u8 = 166;

pub const LCDC: u16 = 0xFF40;
pub const STAT: u16 = 0xFF41;
pub const SCY: u16 = 0xFF42;
pub const SCX: u16 = 0xFF43;
pub const LY: u16 = 0xFF44;
pub const LYC: u16 = 0xFF45;
pub const BGP: u16 = 0xFF47;
pub const OBP0: u16 = 0xFF48;
pub const OBP1: u16 = 0xFF49;
pub const WY: u16 = 0xFF4A;
pub const WX: u16 = 0xFF4B;

/// Four shades for palette indices 0-3, RGBA.
pub type Palette = [[u8; 4]; 4];

/// Light-to-dark green shades of the DMG LCD.
pub const CLASSIC_GREEN: Palette = [
    [0x9B, 0xBC, 0x0F, 0xFF],
    [0x8B, 0xAC, 0x0F, 0xFF],
    [0x30, 0x62, 0x30, 0xFF],
    [0x0F, 0x38, 0x0F, 0xFF],
];

pub const GRAYSCALE: Palette = [
    [0xFF, 0xFF, 0xFF, 0xFF],
    [0xAA, 0xAA, 0xAA, 0xFF],
    [0x55, 0x55, 0x55, 0xFF],
    [0x00, 0x00, 0x00, 0xFF],
];

/// One decoded tile: 8 rows of 8 palette indices.
pub type Tile = [[u8; 8]; 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    HBlank = 0,
    VBlank = 1,
    OamScan = 2,
    Transfer = 3,
}

#[derive(Copy, Clone, Default)]
struct Sprite {
    x: i16,
    y: i16,
    tile: u8,
    flags: u8,
    oam_index: usize,
}

pub struct Ppu {
    vram: Box<[u8; VRAM_SIZE]>,
    oam: [u8; OAM_SIZE],
    tiles: Box<[Tile; TILE_COUNT]>,

    lcdc: u8,
    stat: u8,
    scy: u8,
    scx: u8,
    ly: u8,
    lyc: u8,
    coincidence: bool,
    bgp: u8,
    obp0: u8,
    obp1: u8,
    wy: u8,
    wx: u8,

    /// Internal window line counter
    win_line_counter: u8,

    mode_clock: u32,
    mode: Mode,
    stat_irq_line: bool,

    palette: Palette,
    /// Visible 160×144 image, RGBA.
    screen: Vec<u8>,
    /// Whole 256×256 background plane, RGBA, redrawn once per V-blank.
    background: Vec<u8>,
    line_color_zero: [bool; SCREEN_WIDTH],
    /// Latched sprites for the current scanline
    line_sprites: [Sprite; MAX_SPRITES_PER_LINE],
    sprite_count: usize,
    /// Indicates a completed frame is available
    frame_ready: bool,
    frame_counter: u64,
    display: Box<dyn DisplaySink>,
}

impl Ppu {
    pub fn new(palette: Palette, display: Box<dyn DisplaySink>) -> Self {
        Self {
            vram: Box::new([0; VRAM_SIZE]),
            oam: [0; OAM_SIZE],
            tiles: Box::new([[[0; 8]; 8]; TILE_COUNT]),
            lcdc: 0,
            stat: 0,
            scy: 0,
            scx: 0,
            ly: 0,
            lyc: 0,
            coincidence: false,
            bgp: 0,
            obp0: 0,
            obp1: 0,
            wy: 0,
            wx: 0,
            win_line_counter: 0,
            mode_clock: 0,
            mode: Mode::HBlank,
            stat_irq_line: false,
            palette,
            screen: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT * 4],
            background: vec![0; BG_SIZE * BG_SIZE * 4],
            line_color_zero: [false; SCREEN_WIDTH],
            line_sprites: [Sprite::default(); MAX_SPRITES_PER_LINE],
            sprite_count: 0,
            frame_ready: false,
            frame_counter: 0,
            display,
        }
    }

    pub fn ly(&self) -> u8 {
        self.ly
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn lcd_enabled(&self) -> bool {
        self.lcdc & 0x80 != 0
    }

    pub fn screen(&self) -> &[u8] {
        &self.screen
    }

    pub fn background(&self) -> &[u8] {
        &self.background
    }

    pub fn tile(&self, index: usize) -> Option<&Tile> {
        self.tiles.get(index)
    }

    pub fn frames(&self) -> u64 {
        self.frame_counter
    }

    pub fn frame_ready(&self) -> bool {
        self.frame_ready
    }

    pub fn clear_frame_flag(&mut self) {
        self.frame_ready = false;
    }

    pub fn read_vram(&self, addr: u16) -> u8 {
        self.vram[addr as usize & (VRAM_SIZE - 1)]
    }

    /// Store a VRAM byte and, inside tile data, re-decode the row it belongs to.
    pub fn write_vram(&mut self, addr: u16, val: u8) {
        let offset = addr as usize & (VRAM_SIZE - 1);
        self.vram[offset] = val;
        if offset < TILE_DATA_END {
            self.update_tile_row(offset);
        }
    }

    fn update_tile_row(&mut self, offset: usize) {
        let base = offset & !1;
        let lo = self.vram[base];
        let hi = self.vram[base + 1];
        let row = &mut self.tiles[base / 16][(base % 16) / 2];
        for (col, pixel) in row.iter_mut().enumerate() {
            let bit = 7 - col;
            *pixel = ((lo >> bit) & 1) | (((hi >> bit) & 1) << 1);
        }
    }

    pub fn read_oam(&self, addr: u16) -> u8 {
        self.oam
            .get((addr as usize).wrapping_sub(0xFE00))
            .copied()
            .unwrap_or(0xFF)
    }

    pub fn write_oam(&mut self, addr: u16, val: u8) {
        if let Some(slot) = self.oam.get_mut((addr as usize).wrapping_sub(0xFE00)) {
            *slot = val;
        }
    }

    /// Tile slot for a map entry under the current LCDC addressing mode.
    fn tile_slot(&self, index: u8) -> usize {
        if self.lcdc & 0x10 != 0 || index >= 128 {
            index as usize
        } else {
            index as usize + 256
        }
    }

    #[inline(always)]
    fn dmg_shade(palette: u8, color_id: u8) -> usize {
        ((palette >> (color_id * 2)) & 0x03) as usize
    }

    fn put_pixel(buf: &mut [u8], width: usize, x: usize, y: usize, rgba: [u8; 4]) {
        let idx = (y * width + x) * 4;
        buf[idx..idx + 4].copy_from_slice(&rgba);
    }

    fn update_lyc_compare(&mut self) {
        self.coincidence = self.ly == self.lyc;
    }

    /// Collect up to 10 sprites visible on the current scanline.
    fn oam_scan(&mut self) {
        let sprite_height: i16 = if self.lcdc & 0x04 != 0 { 16 } else { 8 };
        self.sprite_count = 0;
        for i in 0..TOTAL_SPRITES {
            if self.sprite_count >= MAX_SPRITES_PER_LINE {
                break;
            }
            let base = i * 4;
            let y = self.oam[base] as i16 - 16;
            if self.ly as i16 >= y && (self.ly as i16) < y + sprite_height {
                self.line_sprites[self.sprite_count] = Sprite {
                    x: self.oam[base + 1] as i16 - 8,
                    y,
                    tile: self.oam[base + 2],
                    flags: self.oam[base + 3],
                    oam_index: i,
                };
                self.sprite_count += 1;
            }
        }
        // Lower X wins, then lower OAM index.
        self.line_sprites[..self.sprite_count].sort_by_key(|s| (s.x, s.oam_index));
    }

    fn render_scanline(&mut self) {
        let ly = self.ly as usize;
        if ly >= SCREEN_HEIGHT {
            return;
        }
        let bg_enabled = self.lcdc & 0x01 != 0;

        let blank = self.palette[Self::dmg_shade(self.bgp, 0)];
        for x in 0..SCREEN_WIDTH {
            Self::put_pixel(&mut self.screen, SCREEN_WIDTH, x, ly, blank);
        }
        self.line_color_zero.fill(true);

        if bg_enabled {
            let map = if self.lcdc & 0x08 != 0 {
                BG_MAP_1_BASE
            } else {
                BG_MAP_0_BASE
            };
            let py = (ly + self.scy as usize) & 0xFF;
            for x in 0..SCREEN_WIDTH {
                let px = (x + self.scx as usize) & 0xFF;
                let index = self.vram[map + (py / 8) * 32 + px / 8];
                let color_id = self.tiles[self.tile_slot(index)][py % 8][px % 8];
                let rgba = self.palette[Self::dmg_shade(self.bgp, color_id)];
                Self::put_pixel(&mut self.screen, SCREEN_WIDTH, x, ly, rgba);
                self.line_color_zero[x] = color_id == 0;
            }

            if self.lcdc & 0x20 != 0 && self.ly >= self.wy && self.wx <= WINDOW_X_MAX {
                let map = if self.lcdc & 0x40 != 0 {
                    BG_MAP_1_BASE
                } else {
                    BG_MAP_0_BASE
                };
                let wy = self.win_line_counter as usize;
                let start = self.wx as i16 - 7;
                for x in start.max(0) as usize..SCREEN_WIDTH {
                    let wx = (x as i16 - start) as usize;
                    let index = self.vram[map + (wy / 8) * 32 + wx / 8];
                    let color_id = self.tiles[self.tile_slot(index)][wy % 8][wx % 8];
                    let rgba = self.palette[Self::dmg_shade(self.bgp, color_id)];
                    Self::put_pixel(&mut self.screen, SCREEN_WIDTH, x, ly, rgba);
                    self.line_color_zero[x] = color_id == 0;
                }
                self.win_line_counter = self.win_line_counter.wrapping_add(1);
            }
        }

        if self.lcdc & 0x02 != 0 {
            self.render_sprites(ly);
        }
    }

    fn render_sprites(&mut self, ly: usize) {
        let sprite_height: i16 = if self.lcdc & 0x04 != 0 { 16 } else { 8 };
        let mut drawn = [false; SCREEN_WIDTH];
        for s in &self.line_sprites[..self.sprite_count] {
            let mut line = ly as i16 - s.y;
            if s.flags & 0x40 != 0 {
                line = sprite_height - 1 - line;
            }
            let tile = if sprite_height == 16 {
                (s.tile & 0xFE) as usize + (line as usize >> 3)
            } else {
                s.tile as usize
            };
            let row = self.tiles[tile][line as usize & 7];
            let palette = if s.flags & 0x10 != 0 {
                self.obp1
            } else {
                self.obp0
            };
            for px in 0..8 {
                let col = if s.flags & 0x20 != 0 { 7 - px } else { px };
                let color_id = row[col];
                if color_id == 0 {
                    continue;
                }
                let sx = s.x + px as i16;
                if !(0i16..SCREEN_WIDTH as i16).contains(&sx) || drawn[sx as usize] {
                    continue;
                }
                let sx = sx as usize;
                drawn[sx] = true;
                // Behind-background sprites only show over color 0.
                if s.flags & 0x80 != 0 && !self.line_color_zero[sx] {
                    continue;
                }
                let rgba = self.palette[Self::dmg_shade(palette, color_id)];
                Self::put_pixel(&mut self.screen, SCREEN_WIDTH, sx, ly, rgba);
            }
        }
    }

    /// Redraw the full 32×32-tile background plane.
    fn render_background(&mut self) {
        let map = if self.lcdc & 0x08 != 0 {
            BG_MAP_1_BASE
        } else {
            BG_MAP_0_BASE
        };
        for ty in 0..32 {
            for tx in 0..32 {
                let tile = self.tiles[self.tile_slot(self.vram[map + ty * 32 + tx])];
                for (row, pixels) in tile.iter().enumerate() {
                    for (col, &color_id) in pixels.iter().enumerate() {
                        let rgba = self.palette[Self::dmg_shade(self.bgp, color_id)];
                        Self::put_pixel(
                            &mut self.background,
                            BG_SIZE,
                            tx * 8 + col,
                            ty * 8 + row,
                            rgba,
                        );
                    }
                }
            }
        }
    }

    fn enter_vblank(&mut self, if_reg: &mut u8) {
        self.mode = Mode::VBlank;
        *if_reg |= INT_VBLANK;
        self.render_background();
        self.frame_counter += 1;
        self.frame_ready = true;
        self.display.present(&Frame {
            screen: &self.screen,
            background: &self.background,
            number: self.frame_counter,
        });
    }

    /// Advance the mode state machine by `cycles` clock cycles.
    pub fn step(&mut self, cycles: u32, if_reg: &mut u8) {
        if !self.lcd_enabled() {
            return;
        }
        self.mode_clock += cycles;
        loop {
            let threshold = match self.mode {
                Mode::OamScan => MODE2_CYCLES,
                Mode::Transfer => MODE3_CYCLES,
                Mode::HBlank => MODE0_CYCLES,
                Mode::VBlank => LINE_CYCLES,
            };
            if self.mode_clock < threshold {
                break;
            }
            self.mode_clock -= threshold;
            match self.mode {
                Mode::OamScan => {
                    self.oam_scan();
                    self.mode = Mode::Transfer;
                }
                Mode::Transfer => {
                    self.render_scanline();
                    self.mode = Mode::HBlank;
                }
                Mode::HBlank => {
                    self.ly += 1;
                    if self.ly as usize == SCREEN_HEIGHT {
                        self.enter_vblank(if_reg);
                    } else {
                        self.mode = Mode::OamScan;
                    }
                }
                Mode::VBlank => {
                    if self.ly == LAST_LINE {
                        self.ly = 0;
                        self.win_line_counter = 0;
                        self.mode = Mode::OamScan;
                    } else {
                        self.ly += 1;
                    }
                }
            }
            self.update_lyc_compare();
            self.update_stat_irq(if_reg);
        }
    }

    fn update_stat_irq(&mut self, if_reg: &mut u8) {
        let coincidence = self.coincidence && self.stat & 0x40 != 0;
        let mode_signal = match self.mode {
            Mode::HBlank => self.stat & 0x08 != 0,
            Mode::VBlank => self.stat & 0x10 != 0,
            Mode::OamScan => self.stat & 0x20 != 0,
            Mode::Transfer => false,
        };
        let current = coincidence || mode_signal;
        if current && !self.stat_irq_line {
            *if_reg |= INT_STAT;
        }
        self.stat_irq_line = current;
    }
}

impl IoDevice for Ppu {
    fn name(&self) -> &'static str {
        "video unit"
    }

    fn read_reg(&self, addr: u16) -> Result<u8> {
        Ok(match addr {
            LCDC => self.lcdc,
            STAT => {
                0x80 | (self.stat & 0x78) | (u8::from(self.coincidence) << 2) | self.mode as u8
            }
            SCY => self.scy,
            SCX => self.scx,
            LY => self.ly,
            LYC => self.lyc,
            BGP => self.bgp,
            OBP0 => self.obp0,
            OBP1 => self.obp1,
            WY => self.wy,
            WX => self.wx,
            _ => {
                return Err(CoreError::UnmappedRegister {
                    address: addr,
                    device: self.name(),
                });
            }
        })
    }

    fn write_reg(&mut self, addr: u16, val: u8, if_reg: &mut u8) -> Result<()> {
        match addr {
            LCDC => {
                let was_on = self.lcd_enabled();
                self.lcdc = val;
                match (was_on, self.lcd_enabled()) {
                    (true, false) => {
                        self.mode = Mode::HBlank;
                        self.mode_clock = 0;
                        self.win_line_counter = 0;
                        self.ly = 0;
                    }
                    (false, true) => {
                        self.mode = Mode::OamScan;
                        self.mode_clock = 0;
                        self.update_lyc_compare();
                        self.update_stat_irq(if_reg);
                    }
                    _ => {}
                }
            }
            STAT => self.stat = (self.stat & 0x07) | (val & 0x78),
            SCY => self.scy = val,
            SCX => self.scx = val,
            LY => {}
            LYC => {
                self.lyc = val;
                if self.lcd_enabled() {
                    self.update_lyc_compare();
                    self.update_stat_irq(if_reg);
                }
            }
            BGP => self.bgp = val,
            OBP0 => self.obp0 = val,
            OBP1 => self.obp1 = val,
            WY => self.wy = val,
            WX => self.wx = val,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NullDisplay;

    fn lcd_on() -> Ppu {
        let mut ppu = Ppu::new(GRAYSCALE, Box::new(NullDisplay));
        let mut if_reg = 0;
        ppu.write_reg(BGP, 0xE4, &mut if_reg).unwrap();
        ppu.write_reg(LCDC, 0x91, &mut if_reg).unwrap();
        ppu
    }

    #[test]
    fn one_line_walks_all_three_modes() {
        let mut ppu = lcd_on();
        let mut if_reg = 0;
        assert_eq!(ppu.mode(), Mode::OamScan);
        ppu.step(80, &mut if_reg);
        assert_eq!(ppu.mode(), Mode::Transfer);
        ppu.step(172, &mut if_reg);
        assert_eq!(ppu.mode(), Mode::HBlank);
        assert_eq!(ppu.ly(), 0);
        ppu.step(204, &mut if_reg);
        assert_eq!(ppu.mode(), Mode::OamScan);
        assert_eq!(ppu.ly(), 1);

        ppu.step(LINE_CYCLES, &mut if_reg);
        assert_eq!(ppu.ly(), 2);
    }

    #[test]
    fn full_frame_returns_to_line_zero() {
        let mut ppu = lcd_on();
        let mut if_reg = 0;
        ppu.step(LINE_CYCLES * 144, &mut if_reg);
        assert_eq!(ppu.mode(), Mode::VBlank);
        assert_eq!(ppu.ly(), 144);
        assert_eq!(if_reg & INT_VBLANK, INT_VBLANK);
        assert!(ppu.frame_ready());
        assert_eq!(ppu.frames(), 1);

        ppu.step(VBLANK_CYCLES - 1, &mut if_reg);
        assert_eq!(ppu.ly(), 153);
        ppu.step(1, &mut if_reg);
        assert_eq!(ppu.ly(), 0);
        assert_eq!(ppu.mode(), Mode::OamScan);

        let mut ppu = lcd_on();
        ppu.step(FRAME_CYCLES, &mut if_reg);
        assert_eq!(ppu.ly(), 0);
        assert_eq!(FRAME_CYCLES, 70_224);
    }

    #[test]
    fn lyc_match_sets_coincidence_and_stat_interrupt() {
        let mut ppu = lcd_on();
        let mut if_reg = 0;
        ppu.write_reg(STAT, 0x40, &mut if_reg).unwrap();
        ppu.write_reg(LYC, 3, &mut if_reg).unwrap();
        ppu.step(LINE_CYCLES * 2, &mut if_reg);
        assert_eq!(ppu.read_reg(STAT).unwrap() & 0x04, 0);
        assert_eq!(if_reg & INT_STAT, 0);
        ppu.step(LINE_CYCLES, &mut if_reg);
        assert_eq!(ppu.read_reg(STAT).unwrap() & 0x04, 0x04);
        assert_eq!(if_reg & INT_STAT, INT_STAT);
    }

    #[test]
    fn vram_write_decodes_tile_row() {
        let mut ppu = lcd_on();
        // Row 1 of tile 2: low plane 0b1010_0000, high plane 0b1100_0000.
        ppu.write_vram(0x8000 + 2 * 16 + 2, 0xA0);
        ppu.write_vram(0x8000 + 2 * 16 + 3, 0xC0);
        let tile = ppu.tile(2).unwrap();
        assert_eq!(tile[1], [3, 2, 1, 0, 0, 0, 0, 0]);
        assert_eq!(tile[0], [0; 8]);

        // Tile map writes leave the cache alone.
        ppu.write_vram(0x9800, 0xFF);
        assert!(ppu.tile(383).unwrap().iter().all(|r| r == &[0; 8]));
    }

    #[test]
    fn signed_addressing_offsets_low_indices() {
        let mut ppu = lcd_on();
        let mut if_reg = 0;
        ppu.write_reg(LCDC, 0x81, &mut if_reg).unwrap();
        // Tile 256 row 0 fully color 3; map entry 0 points at it in signed mode.
        ppu.write_vram(0x9000, 0xFF);
        ppu.write_vram(0x9001, 0xFF);
        ppu.step(LINE_CYCLES * 144, &mut if_reg);
        assert_eq!(&ppu.background()[..4], &GRAYSCALE[3]);
        assert_eq!(&ppu.screen()[..4], &GRAYSCALE[3]);
        // Row 1 stays color 0.
        let row1 = BG_SIZE * 4;
        assert_eq!(&ppu.background()[row1..row1 + 4], &GRAYSCALE[0]);
    }

    #[test]
    fn lcd_off_parks_at_line_zero() {
        let mut ppu = lcd_on();
        let mut if_reg = 0;
        ppu.step(LINE_CYCLES * 5, &mut if_reg);
        ppu.write_reg(LCDC, 0x11, &mut if_reg).unwrap();
        assert_eq!(ppu.ly(), 0);
        assert_eq!(ppu.mode(), Mode::HBlank);
        ppu.step(LINE_CYCLES * 5, &mut if_reg);
        assert_eq!(ppu.ly(), 0);
    }

    #[test]
    fn sprites_draw_over_background() {
        let mut ppu = lcd_on();
        let mut if_reg = 0;
        ppu.write_reg(LCDC, 0x93, &mut if_reg).unwrap();
        ppu.write_reg(OBP0, 0xE4, &mut if_reg).unwrap();
        // Tile 1 row 0: leftmost pixel color 1.
        ppu.write_vram(0x8010, 0x80);
        ppu.write_oam(0xFE00, 16); // y = 0
        ppu.write_oam(0xFE01, 8 + 4); // x = 4
        ppu.write_oam(0xFE02, 1);
        ppu.write_oam(0xFE03, 0);
        ppu.step(LINE_CYCLES, &mut if_reg);
        let px = 4 * 4;
        assert_eq!(&ppu.screen()[px..px + 4], &GRAYSCALE[1]);
        assert_eq!(&ppu.screen()[px + 4..px + 8], &GRAYSCALE[0]);
    }
}
