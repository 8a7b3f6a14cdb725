//! Static decode tables for the SM83 instruction set.
//!
//! Two 256-entry tables exist: the primary table indexed directly by the
//! first opcode byte, and the secondary table reached through the `0xCB`
//! escape byte. Both follow the hardware's row ordering, so row numbers can
//! be computed arithmetically (`0x40 + bit * 8 + reg` is `BIT bit, reg`).

use std::fmt;
use std::sync::LazyLock;

use crate::error::{CoreError, Result};
use crate::registers::{Reg8, Reg16};

/// Escape byte selecting the secondary table.
pub const PREFIX: u8 = 0xCB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Nop,
    Stop,
    Halt,
    Ld,
    Ld16,
    Push,
    Pop,
    Inc,
    Dec,
    Inc16,
    Dec16,
    Add,
    Add16,
    AddSp,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,
    Daa,
    Cpl,
    Scf,
    Ccf,
    Rlca,
    Rrca,
    Rla,
    Rra,
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Swap,
    Srl,
    Bit,
    Res,
    Set,
    Jp,
    Jr,
    Call,
    Ret,
    Reti,
    Rst,
    Di,
    Ei,
    Prefix,
    Illegal,
}

impl Op {
    fn mnemonic(self) -> &'static str {
        match self {
            Op::Nop => "NOP",
            Op::Stop => "STOP",
            Op::Halt => "HALT",
            Op::Ld | Op::Ld16 => "LD",
            Op::Push => "PUSH",
            Op::Pop => "POP",
            Op::Inc | Op::Inc16 => "INC",
            Op::Dec | Op::Dec16 => "DEC",
            Op::Add | Op::Add16 | Op::AddSp => "ADD",
            Op::Adc => "ADC",
            Op::Sub => "SUB",
            Op::Sbc => "SBC",
            Op::And => "AND",
            Op::Xor => "XOR",
            Op::Or => "OR",
            Op::Cp => "CP",
            Op::Daa => "DAA",
            Op::Cpl => "CPL",
            Op::Scf => "SCF",
            Op::Ccf => "CCF",
            Op::Rlca => "RLCA",
            Op::Rrca => "RRCA",
            Op::Rla => "RLA",
            Op::Rra => "RRA",
            Op::Rlc => "RLC",
            Op::Rrc => "RRC",
            Op::Rl => "RL",
            Op::Rr => "RR",
            Op::Sla => "SLA",
            Op::Sra => "SRA",
            Op::Swap => "SWAP",
            Op::Srl => "SRL",
            Op::Bit => "BIT",
            Op::Res => "RES",
            Op::Set => "SET",
            Op::Jp => "JP",
            Op::Jr => "JR",
            Op::Call => "CALL",
            Op::Ret => "RET",
            Op::Reti => "RETI",
            Op::Rst => "RST",
            Op::Di => "DI",
            Op::Ei => "EI",
            Op::Prefix => "PREFIX",
            Op::Illegal => "ILLEGAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    NotZero,
    Zero,
    NotCarry,
    Carry,
}

/// The role an operand plays; the value itself is read at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg8),
    Pair(Reg16),
    Imm8,
    Imm16,
    /// Signed 8-bit displacement for relative jumps.
    Offset,
    /// Memory at the address held in a register pair.
    Indirect(Reg16),
    /// `(HL+)`: memory at HL, HL incremented afterwards.
    IndirectInc,
    /// `(HL-)`: memory at HL, HL decremented afterwards.
    IndirectDec,
    /// `(0xFF00 + C)`
    HighC,
    /// `(0xFF00 + a8)`
    HighImm,
    /// `(a16)`
    Absolute,
    /// `SP + e8`
    SpOffset,
    Cond(Condition),
    Bit(u8),
    Vector(u16),
}

impl Operand {
    /// Number of immediate bytes this operand consumes after the opcode.
    pub const fn immediate_len(self) -> u8 {
        match self {
            Operand::Imm8 | Operand::Offset | Operand::HighImm | Operand::SpOffset => 1,
            Operand::Imm16 | Operand::Absolute => 2,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: u8,
    pub prefixed: bool,
    pub op: Op,
    operands: [Option<Operand>; 2],
    /// Total encoded length including the prefix byte, 1 to 3.
    pub length: u8,
    /// Clock cycles when no branch is taken.
    pub cycles: u8,
    /// Additional clock cycles when a conditional branch is taken.
    pub branch_cycles: u8,
}

impl Instruction {
    const fn new(opcode: u8, op: Op, length: u8, cycles: u8) -> Self {
        Self {
            opcode,
            prefixed: false,
            op,
            operands: [None, None],
            length,
            cycles,
            branch_cycles: 0,
        }
    }

    const fn with(mut self, a: Operand) -> Self {
        self.operands = [Some(a), None];
        self
    }

    const fn with2(mut self, a: Operand, b: Operand) -> Self {
        self.operands = [Some(a), Some(b)];
        self
    }

    const fn taken(mut self, extra: u8) -> Self {
        self.branch_cycles = extra;
        self
    }

    const fn prefixed(mut self) -> Self {
        self.prefixed = true;
        self
    }

    /// Operand roles in encoding order (destination first).
    pub fn operands(&self) -> impl Iterator<Item = Operand> + '_ {
        self.operands.iter().flatten().copied()
    }

    pub fn operand(&self, index: usize) -> Option<Operand> {
        self.operands.get(index).copied().flatten()
    }

    pub fn condition(&self) -> Option<Condition> {
        self.operands().find_map(|o| match o {
            Operand::Cond(c) => Some(c),
            _ => None,
        })
    }

    /// Canonical byte encoding of the opcode (immediates are not part of a
    /// descriptor and are not emitted).
    pub fn encode(&self) -> Vec<u8> {
        if self.prefixed {
            vec![PREFIX, self.opcode]
        } else {
            vec![self.opcode]
        }
    }

    /// Render the instruction with its immediate values taken from `bytes`,
    /// which must start at the opcode (prefix included).
    pub fn disassemble(&self, bytes: &[u8]) -> String {
        let imm_start = if self.prefixed { 2 } else { 1 };
        let imm8 = bytes.get(imm_start).copied().unwrap_or(0);
        let imm16 = u16::from_le_bytes([imm8, bytes.get(imm_start + 1).copied().unwrap_or(0)]);
        let mut out = self.op.mnemonic().to_string();
        for (i, operand) in self.operands().enumerate() {
            out.push_str(if i == 0 { " " } else { "," });
            out.push_str(&match operand {
                Operand::Imm8 => format!("${imm8:02X}"),
                Operand::Imm16 => format!("${imm16:04X}"),
                Operand::Offset => format!("{:+}", imm8 as i8),
                Operand::HighImm => format!("($FF{imm8:02X})"),
                Operand::Absolute => format!("(${imm16:04X})"),
                Operand::SpOffset => format!("SP{:+}", imm8 as i8),
                other => operand_text(other),
            });
        }
        out
    }
}

fn reg8_name(reg: Reg8) -> &'static str {
    match reg {
        Reg8::A => "A",
        Reg8::F => "F",
        Reg8::B => "B",
        Reg8::C => "C",
        Reg8::D => "D",
        Reg8::E => "E",
        Reg8::H => "H",
        Reg8::L => "L",
    }
}

fn reg16_name(reg: Reg16) -> &'static str {
    match reg {
        Reg16::AF => "AF",
        Reg16::BC => "BC",
        Reg16::DE => "DE",
        Reg16::HL => "HL",
        Reg16::SP => "SP",
    }
}

fn operand_text(operand: Operand) -> String {
    match operand {
        Operand::Reg(r) => reg8_name(r).to_string(),
        Operand::Pair(p) => reg16_name(p).to_string(),
        Operand::Imm8 => "d8".to_string(),
        Operand::Imm16 => "d16".to_string(),
        Operand::Offset => "e8".to_string(),
        Operand::Indirect(p) => format!("({})", reg16_name(p)),
        Operand::IndirectInc => "(HL+)".to_string(),
        Operand::IndirectDec => "(HL-)".to_string(),
        Operand::HighC => "($FF00+C)".to_string(),
        Operand::HighImm => "($FF00+a8)".to_string(),
        Operand::Absolute => "(a16)".to_string(),
        Operand::SpOffset => "SP+e8".to_string(),
        Operand::Cond(Condition::NotZero) => "NZ".to_string(),
        Operand::Cond(Condition::Zero) => "Z".to_string(),
        Operand::Cond(Condition::NotCarry) => "NC".to_string(),
        Operand::Cond(Condition::Carry) => "C".to_string(),
        Operand::Bit(b) => b.to_string(),
        Operand::Vector(v) => format!("${v:02X}"),
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.op.mnemonic())?;
        for (i, operand) in self.operands().enumerate() {
            f.write_str(if i == 0 { " " } else { "," })?;
            f.write_str(&operand_text(operand))?;
        }
        Ok(())
    }
}

// Decoding aids, indexed by the 3-bit register fields of an opcode.
const R8: [Operand; 8] = [
    Operand::Reg(Reg8::B),
    Operand::Reg(Reg8::C),
    Operand::Reg(Reg8::D),
    Operand::Reg(Reg8::E),
    Operand::Reg(Reg8::H),
    Operand::Reg(Reg8::L),
    Operand::Indirect(Reg16::HL),
    Operand::Reg(Reg8::A),
];
const RP: [Reg16; 4] = [Reg16::BC, Reg16::DE, Reg16::HL, Reg16::SP];
const RP_STACK: [Reg16; 4] = [Reg16::BC, Reg16::DE, Reg16::HL, Reg16::AF];
const CONDITIONS: [Condition; 4] = [
    Condition::NotZero,
    Condition::Zero,
    Condition::NotCarry,
    Condition::Carry,
];
const ALU: [Op; 8] = [Op::Add, Op::Adc, Op::Sub, Op::Sbc, Op::And, Op::Xor, Op::Or, Op::Cp];
const ROTATES: [Op; 8] = [Op::Rlc, Op::Rrc, Op::Rl, Op::Rr, Op::Sla, Op::Sra, Op::Swap, Op::Srl];
const ACC_OPS: [Op; 8] = [
    Op::Rlca,
    Op::Rrca,
    Op::Rla,
    Op::Rra,
    Op::Daa,
    Op::Cpl,
    Op::Scf,
    Op::Ccf,
];

const A: Operand = Operand::Reg(Reg8::A);
const HL: Operand = Operand::Pair(Reg16::HL);
const SP: Operand = Operand::Pair(Reg16::SP);

fn primary(opcode: u8) -> Instruction {
    let x = opcode >> 6;
    let y = ((opcode >> 3) & 0x07) as usize;
    let z = (opcode & 0x07) as usize;
    let p = y >> 1;
    let q = y & 1;
    let i = |op, len, cycles| Instruction::new(opcode, op, len, cycles);
    // (HL) operands cost an extra memory access.
    let mem = |slot: usize, extra: u8| if slot == 6 { extra } else { 0 };

    match (x, z) {
        (0, 0) => match y {
            0 => i(Op::Nop, 1, 4),
            1 => i(Op::Ld16, 3, 20).with2(Operand::Absolute, SP),
            2 => i(Op::Stop, 2, 4),
            3 => i(Op::Jr, 2, 12).with(Operand::Offset),
            _ => i(Op::Jr, 2, 8)
                .with2(Operand::Cond(CONDITIONS[y - 4]), Operand::Offset)
                .taken(4),
        },
        (0, 1) if q == 0 => i(Op::Ld16, 3, 12).with2(Operand::Pair(RP[p]), Operand::Imm16),
        (0, 1) => i(Op::Add16, 1, 8).with2(HL, Operand::Pair(RP[p])),
        (0, 2) => {
            let ptr = match p {
                0 => Operand::Indirect(Reg16::BC),
                1 => Operand::Indirect(Reg16::DE),
                2 => Operand::IndirectInc,
                _ => Operand::IndirectDec,
            };
            if q == 0 {
                i(Op::Ld, 1, 8).with2(ptr, A)
            } else {
                i(Op::Ld, 1, 8).with2(A, ptr)
            }
        }
        (0, 3) if q == 0 => i(Op::Inc16, 1, 8).with(Operand::Pair(RP[p])),
        (0, 3) => i(Op::Dec16, 1, 8).with(Operand::Pair(RP[p])),
        (0, 4) => i(Op::Inc, 1, 4 + mem(y, 8)).with(R8[y]),
        (0, 5) => i(Op::Dec, 1, 4 + mem(y, 8)).with(R8[y]),
        (0, 6) => i(Op::Ld, 2, 8 + mem(y, 4)).with2(R8[y], Operand::Imm8),
        (0, 7) => i(ACC_OPS[y], 1, 4),
        (1, _) if y == 6 && z == 6 => i(Op::Halt, 1, 4),
        (1, _) => i(Op::Ld, 1, 4 + mem(y, 4) + mem(z, 4)).with2(R8[y], R8[z]),
        (2, _) => i(ALU[y], 1, 4 + mem(z, 4)).with2(A, R8[z]),
        (3, 0) => match y {
            0..=3 => i(Op::Ret, 1, 8)
                .with(Operand::Cond(CONDITIONS[y]))
                .taken(12),
            4 => i(Op::Ld, 2, 12).with2(Operand::HighImm, A),
            5 => i(Op::AddSp, 2, 16).with2(SP, Operand::Imm8),
            6 => i(Op::Ld, 2, 12).with2(A, Operand::HighImm),
            _ => i(Op::Ld16, 2, 12).with2(HL, Operand::SpOffset),
        },
        (3, 1) if q == 0 => i(Op::Pop, 1, 12).with(Operand::Pair(RP_STACK[p])),
        (3, 1) => match p {
            0 => i(Op::Ret, 1, 16),
            1 => i(Op::Reti, 1, 16),
            2 => i(Op::Jp, 1, 4).with(HL),
            _ => i(Op::Ld16, 1, 8).with2(SP, HL),
        },
        (3, 2) => match y {
            0..=3 => i(Op::Jp, 3, 12)
                .with2(Operand::Cond(CONDITIONS[y]), Operand::Imm16)
                .taken(4),
            4 => i(Op::Ld, 1, 8).with2(Operand::HighC, A),
            5 => i(Op::Ld, 3, 16).with2(Operand::Absolute, A),
            6 => i(Op::Ld, 1, 8).with2(A, Operand::HighC),
            _ => i(Op::Ld, 3, 16).with2(A, Operand::Absolute),
        },
        (3, 3) => match y {
            0 => i(Op::Jp, 3, 16).with(Operand::Imm16),
            1 => i(Op::Prefix, 1, 0),
            6 => i(Op::Di, 1, 4),
            7 => i(Op::Ei, 1, 4),
            _ => i(Op::Illegal, 1, 4),
        },
        (3, 4) => match y {
            0..=3 => i(Op::Call, 3, 12)
                .with2(Operand::Cond(CONDITIONS[y]), Operand::Imm16)
                .taken(12),
            _ => i(Op::Illegal, 1, 4),
        },
        (3, 5) if q == 0 => i(Op::Push, 1, 16).with(Operand::Pair(RP_STACK[p])),
        (3, 5) => match p {
            0 => i(Op::Call, 3, 24).with(Operand::Imm16),
            _ => i(Op::Illegal, 1, 4),
        },
        (3, 6) => i(ALU[y], 2, 8).with2(A, Operand::Imm8),
        _ => i(Op::Rst, 1, 16).with(Operand::Vector((y as u16) * 8)),
    }
}

fn secondary(opcode: u8) -> Instruction {
    let x = opcode >> 6;
    let y = (opcode >> 3) & 0x07;
    let z = (opcode & 0x07) as usize;
    let target = R8[z];
    let hl = z == 6;
    let (op, cycles) = match x {
        0 => (ROTATES[y as usize], if hl { 16 } else { 8 }),
        1 => (Op::Bit, if hl { 12 } else { 8 }),
        2 => (Op::Res, if hl { 16 } else { 8 }),
        _ => (Op::Set, if hl { 16 } else { 8 }),
    };
    let instr = Instruction::new(opcode, op, 2, cycles).prefixed();
    if x == 0 {
        instr.with(target)
    } else {
        instr.with2(Operand::Bit(y), target)
    }
}

static PRIMARY: LazyLock<[Instruction; 256]> =
    LazyLock::new(|| std::array::from_fn(|i| primary(i as u8)));
static SECONDARY: LazyLock<[Instruction; 256]> =
    LazyLock::new(|| std::array::from_fn(|i| secondary(i as u8)));

/// Look up the descriptor for the instruction starting at `bytes[0]`.
///
/// Two bytes are always required so the escape byte can be resolved without
/// a second fetch.
pub fn decode(bytes: &[u8]) -> Result<&'static Instruction> {
    match bytes {
        [PREFIX, op, ..] => Ok(&SECONDARY[*op as usize]),
        [op, _, ..] => Ok(&PRIMARY[*op as usize]),
        _ => Err(CoreError::Decode {
            available: bytes.len(),
        }),
    }
}

/// Inverse of [`decode`]: the canonical opcode bytes of `instr`.
pub fn encode(instr: &Instruction) -> Vec<u8> {
    instr.encode()
}

/// Indexed by opcode. Row 0xCB is the escape placeholder and never comes out
/// of [`decode`].
pub fn primary_table() -> &'static [Instruction; 256] {
    &PRIMARY
}

pub fn secondary_table() -> &'static [Instruction; 256] {
    &SECONDARY
}

/// Every descriptor [`decode`] can return.
pub fn descriptors() -> impl Iterator<Item = &'static Instruction> {
    PRIMARY
        .iter()
        .filter(|instr| instr.op != Op::Prefix)
        .chain(SECONDARY.iter())
}
