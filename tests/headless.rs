use std::fs::File;
use std::io::BufReader;

use dotmatrix::config::{HostConfig, PalettePreset};
use dotmatrix::screenshot;
use dotmatrix::session;
use dotmatrix::sinks::{LogAudio, LogDisplay};
use dotmatrix::storage::FileStorage;
use dotmatrix_core::ppu::{self, SCREEN_HEIGHT, SCREEN_WIDTH};
use dotmatrix_core::{Config, GameBoy};

/// MBC1+RAM+battery image whose program stores 0x5A at 0xA000 and spins.
fn battery_rom() -> Vec<u8> {
    let program = [
        0x3E, 0x0A, // LD A,0x0A
        0xEA, 0x00, 0x00, // LD (0x0000),A
        0x3E, 0x5A, // LD A,0x5A
        0xEA, 0x00, 0xA0, // LD (0xA000),A
        0x18, 0xFE, // JR -2
    ];
    let mut rom = vec![0u8; 0x8000];
    rom[0x0100..0x0100 + program.len()].copy_from_slice(&program);
    rom[0x0134..0x0138].copy_from_slice(b"HOST");
    rom[0x0147] = 0x03;
    rom[0x0149] = 0x02;
    rom
}

fn machine(cfg: &HostConfig, storage: FileStorage) -> GameBoy {
    GameBoy::with_host(
        Config {
            strict_opcodes: cfg.strict_opcodes,
            palette: cfg.palette.palette(),
            boot_rom: None,
        },
        Box::new(LogDisplay),
        Box::new(LogAudio),
        Box::new(storage),
    )
}

#[test]
fn save_ram_lands_in_save_dir() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = HostConfig::default();

    let mut gb = machine(&cfg, FileStorage::new(dir.path()));
    gb.load_rom(battery_rom()).unwrap();
    assert_eq!(session::run_frames(&mut gb, 2).unwrap(), 2);
    gb.save_ram().unwrap();

    let saved = std::fs::read(dir.path().join("HOST.sav")).unwrap();
    assert_eq!(saved.len(), 0x2000);
    assert_eq!(saved[0], 0x5A);

    let mut restored = machine(&cfg, FileStorage::new(dir.path()));
    restored.load_rom(battery_rom()).unwrap();
    restored.mmu.write_byte(0x0000, 0x0A);
    assert_eq!(restored.mmu.read_byte(0xA000), 0x5A);
}

#[test]
fn screenshot_matches_screen() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = HostConfig {
        palette: PalettePreset::Grayscale,
        ..HostConfig::default()
    };

    let mut gb = machine(&cfg, FileStorage::new(dir.path()));
    gb.load_rom(battery_rom()).unwrap();
    session::run_frames(&mut gb, 3).unwrap();
    assert!(gb.frame_count() >= 2);

    let path = dir.path().join("screen.png");
    screenshot::write_png(
        &path,
        SCREEN_WIDTH as u32,
        SCREEN_HEIGHT as u32,
        gb.screen(),
    )
    .unwrap();

    let decoder = png::Decoder::new(BufReader::new(File::open(&path).unwrap()));
    let mut reader = decoder.read_info().unwrap();
    let mut buf = vec![0; SCREEN_WIDTH * SCREEN_HEIGHT * 4];
    reader.next_frame(&mut buf).unwrap();
    assert_eq!(buf, gb.screen());
    assert_eq!(&buf[0..4], &ppu::GRAYSCALE[0]);
}
