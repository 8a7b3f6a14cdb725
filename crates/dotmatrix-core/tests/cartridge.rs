use dotmatrix_core::CoreError;
use dotmatrix_core::cartridge::{Cartridge, CartridgeKind, Header, MbcType};
use dotmatrix_core::host::ManualClock;

fn header_rom(cart_type: u8, rom_size: u8, ram_size: u8) -> Vec<u8> {
    let mut rom = vec![0u8; 0x8000];
    rom[0x0147] = cart_type;
    rom[0x0148] = rom_size;
    rom[0x0149] = ram_size;
    rom
}

#[test]
fn mbc3_ram_battery_header() {
    let header = Header::parse(&header_rom(0x13, 0x02, 0x03)).unwrap();
    assert_eq!(header.kind.mbc, MbcType::Type3);
    assert!(header.kind.ram);
    assert!(header.kind.battery);
    assert!(!header.kind.timer);
    assert_eq!(header.rom_banks, 8);
    assert_eq!(header.ram_size, 0x8000);
}

#[test]
fn unknown_type_falls_back_to_mbc3_with_ram() {
    assert_eq!(
        CartridgeKind::from_code(0xFC),
        Err(CoreError::UnknownCartridgeType { code: 0xFC })
    );
    let header = Header::parse(&header_rom(0xFC, 0x00, 0x02)).unwrap();
    assert_eq!(header.kind, CartridgeKind::fallback());
    assert_eq!(header.kind.mbc, MbcType::Type3);
}

#[test]
fn rtc_cartridge_latches_manual_clock() {
    let clock = ManualClock::new(0);
    let mut cart = Cartridge::with_clock(header_rom(0x10, 0x00, 0x03), Box::new(clock.clone())).unwrap();
    clock.advance(3 * 3600 + 25 * 60 + 7);

    cart.write(0x0000, 0x0A);
    cart.write(0x6000, 0x00);
    cart.write(0x6000, 0x01);

    cart.write(0x4000, 0x08);
    assert_eq!(cart.read(0xA000), 7);
    cart.write(0x4000, 0x09);
    assert_eq!(cart.read(0xA000), 25);
    cart.write(0x4000, 0x0A);
    assert_eq!(cart.read(0xA000), 3);

    // Latched values hold until the next 0 -> 1 sequence.
    clock.advance(10);
    cart.write(0x4000, 0x08);
    assert_eq!(cart.read(0xA000), 7);
}

#[test]
fn mbc5_nine_bit_rom_bank() {
    let mut rom = header_rom(0x19, 0x08, 0x00);
    rom.resize(0x4000 * 512, 0);
    rom[0x4000 * 0x1FF] = 0xAB;
    rom[0x4000 * 0x100] = 0xCD;
    let mut cart = Cartridge::new(rom).unwrap();

    cart.write(0x2000, 0xFF);
    cart.write(0x3000, 0x01);
    assert_eq!(cart.read(0x4000), 0xAB);
    cart.write(0x2000, 0x00);
    assert_eq!(cart.read(0x4000), 0xCD);
}
