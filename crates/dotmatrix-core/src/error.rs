use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("address {address:#X} is outside the 16-bit bus")]
    AddressRange { address: usize },

    #[error("instruction decode needs 2 bytes, only {available} available")]
    Decode { available: usize },

    #[error("unimplemented instruction {} at {pc:04X}", opcode_label(.prefixed, .opcode))]
    UnimplementedInstruction { opcode: u8, prefixed: bool, pc: u16 },

    #[error("unknown cartridge type {code:#04X}")]
    UnknownCartridgeType { code: u8 },

    #[error("invalid audio channel index {index}")]
    InvalidChannelIndex { index: usize },

    #[error("register {address:04X} is not mapped to the {device}")]
    UnmappedRegister { address: u16, device: &'static str },

    #[error("ROM image is {len} bytes, too small to hold a cartridge header")]
    RomTooSmall { len: usize },
}

fn opcode_label(prefixed: &bool, opcode: &u8) -> String {
    if *prefixed {
        format!("CB {opcode:02X}")
    } else {
        format!("{opcode:02X}")
    }
}

impl CoreError {
    /// Errors the emulator can step past; everything else stops emulation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::UnimplementedInstruction { .. } | CoreError::UnknownCartridgeType { .. }
        )
    }
}
