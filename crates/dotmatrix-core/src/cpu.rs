use crate::error::{CoreError, Result};
use crate::instructions::{self, Condition, Instruction, Op, Operand};
use crate::interrupts;
use crate::mmu::Mmu;
use crate::registers::{Flag, Reg8, Registers};
use crate::timer;

#[cfg(feature = "cpu-trace")]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {
        log::trace!(target: "cpu", $($arg)*);
    };
}
#[cfg(not(feature = "cpu-trace"))]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {};
}

/// Cost of servicing an interrupt: two wait states, two stack writes, jump.
const INTERRUPT_CYCLES: u32 = 20;
/// A halted CPU still lets one machine cycle pass per step.
const HALT_CYCLES: u32 = 4;

/// Where an 8-bit operand lives once its address has been worked out.
#[derive(Debug, Clone, Copy)]
enum Place {
    Reg(Reg8),
    Mem(u16),
    Imm(u8),
}

pub struct Cpu {
    pub regs: Registers,
    /// Total clock cycles executed.
    pub cycles: u64,
    pub ime: bool,
    pub halted: bool,
    /// Steps left until a pending `EI` sets IME.
    ime_enable_delay: u8,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    /// CPU in the state the boot ROM hands over to the cartridge.
    pub fn new() -> Self {
        Self::with_registers(Registers::post_boot())
    }

    /// CPU at power on, about to run a boot ROM from 0x0000.
    pub fn new_power_on() -> Self {
        Self::with_registers(Registers::default())
    }

    fn with_registers(regs: Registers) -> Self {
        Self {
            regs,
            cycles: 0,
            ime: false,
            halted: false,
            ime_enable_delay: 0,
        }
    }

    pub fn debug_state(&self) -> String {
        format!(
            "{} IME:{} HALT:{}",
            self.regs.debug_state(),
            u8::from(self.ime),
            u8::from(self.halted)
        )
    }

    /// Execute one instruction (or service one interrupt, or idle one cycle
    /// while halted), run the peripherals for the elapsed time and return it.
    ///
    /// An illegal opcode still consumes its byte and its cycles before the
    /// error is returned, so the caller may carry on stepping.
    pub fn step(&mut self, mmu: &mut Mmu) -> Result<u32> {
        if let Some(cycles) = self.handle_interrupts(mmu) {
            return Ok(self.finish(mmu, cycles));
        }
        if self.halted {
            self.tick_ime_delay();
            return Ok(self.finish(mmu, HALT_CYCLES));
        }

        let pc = self.regs.pc;
        let bytes = [mmu.read_byte(pc), mmu.read_byte(pc.wrapping_add(1))];
        let instr = instructions::decode(&bytes)?;
        let imm = match instr.operands().map(Operand::immediate_len).sum::<u8>() {
            0 => 0,
            1 => bytes[1] as u16,
            _ => mmu.read_word(pc.wrapping_add(1)),
        };
        cpu_trace!(
            "{:04X}: {:<16} {}",
            pc,
            instr.disassemble(&[bytes[0], bytes[1], mmu.read_byte(pc.wrapping_add(2))]),
            self.debug_state()
        );

        self.regs.pc = pc.wrapping_add(instr.length as u16);
        let outcome = self.execute(instr, pc, imm, mmu);
        let mut cycles = instr.cycles as u32;
        if let Ok(true) = outcome {
            cycles += instr.branch_cycles as u32;
        }
        self.tick_ime_delay();
        self.finish(mmu, cycles);
        outcome.map(|_| cycles)
    }

    fn finish(&mut self, mmu: &mut Mmu, cycles: u32) -> u32 {
        self.cycles += cycles as u64;
        mmu.tick(cycles);
        cycles
    }

    fn tick_ime_delay(&mut self) {
        if self.ime_enable_delay > 0 {
            self.ime_enable_delay -= 1;
            if self.ime_enable_delay == 0 {
                self.ime = true;
            }
        }
    }

    /// Wake from HALT on any pending interrupt and, with IME set, jump to the
    /// highest-priority handler.
    fn handle_interrupts(&mut self, mmu: &mut Mmu) -> Option<u32> {
        let pending = mmu.pending_interrupts();
        if pending == 0 {
            return None;
        }
        self.halted = false;
        if !self.ime {
            return None;
        }
        let (bit, vector) = interrupts::highest_pending(pending)?;
        self.ime = false;
        mmu.if_reg &= !bit;
        self.push(mmu, self.regs.pc);
        self.regs.pc = vector;
        Some(INTERRUPT_CYCLES)
    }

    fn unimplemented(instr: &Instruction, pc: u16) -> CoreError {
        CoreError::UnimplementedInstruction {
            opcode: instr.opcode,
            prefixed: instr.prefixed,
            pc,
        }
    }

    fn push(&mut self, mmu: &mut Mmu, val: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(2);
        mmu.write_word(self.regs.sp, val);
    }

    fn pop(&mut self, mmu: &Mmu) -> u16 {
        let val = mmu.read_word(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(2);
        val
    }

    /// Resolve an 8-bit operand. `(HL+)` and `(HL-)` adjust HL here, so each
    /// operand is resolved exactly once per instruction.
    fn place(&mut self, operand: Operand, imm: u16) -> Option<Place> {
        Some(match operand {
            Operand::Reg(r) => Place::Reg(r),
            Operand::Imm8 => Place::Imm(imm as u8),
            Operand::Indirect(p) => Place::Mem(self.regs.get16(p)),
            Operand::IndirectInc => {
                let hl = self.regs.hl();
                self.regs.set_hl(hl.wrapping_add(1));
                Place::Mem(hl)
            }
            Operand::IndirectDec => {
                let hl = self.regs.hl();
                self.regs.set_hl(hl.wrapping_sub(1));
                Place::Mem(hl)
            }
            Operand::HighC => Place::Mem(0xFF00 | self.regs.c as u16),
            Operand::HighImm => Place::Mem(0xFF00 | (imm & 0xFF)),
            Operand::Absolute => Place::Mem(imm),
            _ => return None,
        })
    }

    fn load(&self, mmu: &Mmu, place: Place) -> u8 {
        match place {
            Place::Reg(r) => self.regs.get8(r),
            Place::Mem(addr) => mmu.read_byte(addr),
            Place::Imm(v) => v,
        }
    }

    fn store(&mut self, mmu: &mut Mmu, place: Place, val: u8) {
        match place {
            Place::Reg(r) => self.regs.set8(r, val),
            Place::Mem(addr) => mmu.write_byte(addr, val),
            Place::Imm(_) => {}
        }
    }

    fn condition_met(&self, cond: Condition) -> bool {
        match cond {
            Condition::NotZero => !self.regs.flag(Flag::Zero),
            Condition::Zero => self.regs.flag(Flag::Zero),
            Condition::NotCarry => !self.regs.flag(Flag::Carry),
            Condition::Carry => self.regs.flag(Flag::Carry),
        }
    }

    /// Run `instr` with PC already past it. Returns whether a conditional
    /// branch was taken.
    fn execute(&mut self, instr: &Instruction, pc: u16, imm: u16, mmu: &mut Mmu) -> Result<bool> {
        let err = || Self::unimplemented(instr, pc);
        let first = instr.operand(0);
        let second = instr.operand(1);

        match instr.op {
            Op::Nop => {}
            Op::Stop => mmu.write_byte(timer::DIV, 0),
            Op::Halt => self.halted = true,
            Op::Di => {
                self.ime = false;
                self.ime_enable_delay = 0;
            }
            // IME goes up once the instruction after EI has run.
            Op::Ei => self.ime_enable_delay = 2,

            Op::Ld => {
                let src = self.place(second.ok_or_else(err)?, imm).ok_or_else(err)?;
                let val = self.load(mmu, src);
                let dst = self.place(first.ok_or_else(err)?, imm).ok_or_else(err)?;
                self.store(mmu, dst, val);
            }
            Op::Ld16 => match (first, second) {
                (Some(Operand::Pair(r)), Some(Operand::Imm16)) => self.regs.set16(r, imm),
                (Some(Operand::Absolute), Some(Operand::Pair(r))) => {
                    mmu.write_word(imm, self.regs.get16(r))
                }
                (Some(Operand::Pair(r)), Some(Operand::SpOffset)) => {
                    let val = self.add_sp_offset(imm as u8);
                    self.regs.set16(r, val);
                }
                (Some(Operand::Pair(dst)), Some(Operand::Pair(src))) => {
                    self.regs.set16(dst, self.regs.get16(src))
                }
                _ => return Err(err()),
            },
            Op::Push => match first {
                Some(Operand::Pair(r)) => self.push(mmu, self.regs.get16(r)),
                _ => return Err(err()),
            },
            Op::Pop => match first {
                Some(Operand::Pair(r)) => {
                    let val = self.pop(mmu);
                    self.regs.set16(r, val);
                }
                _ => return Err(err()),
            },

            Op::Inc | Op::Dec => {
                let target = self.place(first.ok_or_else(err)?, imm).ok_or_else(err)?;
                let val = self.load(mmu, target);
                let res = if instr.op == Op::Inc {
                    val.wrapping_add(1)
                } else {
                    val.wrapping_sub(1)
                };
                let half = if instr.op == Op::Inc {
                    val & 0x0F == 0x0F
                } else {
                    val & 0x0F == 0
                };
                self.store(mmu, target, res);
                let carry = self.regs.flag(Flag::Carry);
                self.regs.set_flags(res == 0, instr.op == Op::Dec, half, carry);
            }
            Op::Inc16 | Op::Dec16 => match first {
                Some(Operand::Pair(r)) => {
                    let val = self.regs.get16(r);
                    let res = if instr.op == Op::Inc16 {
                        val.wrapping_add(1)
                    } else {
                        val.wrapping_sub(1)
                    };
                    self.regs.set16(r, res);
                }
                _ => return Err(err()),
            },
            Op::Add16 => match (first, second) {
                (Some(Operand::Pair(dst)), Some(Operand::Pair(src))) => {
                    let a = self.regs.get16(dst);
                    let b = self.regs.get16(src);
                    let (res, carry) = a.overflowing_add(b);
                    let half = (a & 0x0FFF) + (b & 0x0FFF) > 0x0FFF;
                    let zero = self.regs.flag(Flag::Zero);
                    self.regs.set_flags(zero, false, half, carry);
                    self.regs.set16(dst, res);
                }
                _ => return Err(err()),
            },
            Op::AddSp => self.regs.sp = self.add_sp_offset(imm as u8),

            Op::Add | Op::Adc | Op::Sub | Op::Sbc | Op::And | Op::Xor | Op::Or | Op::Cp => {
                let src = self.place(second.ok_or_else(err)?, imm).ok_or_else(err)?;
                let val = self.load(mmu, src);
                self.alu(instr.op, val);
            }
            Op::Daa => self.daa(),
            Op::Cpl => {
                self.regs.a = !self.regs.a;
                self.regs.set_flag(Flag::Subtract, true);
                self.regs.set_flag(Flag::HalfCarry, true);
            }
            Op::Scf | Op::Ccf => {
                let carry = instr.op == Op::Scf || !self.regs.flag(Flag::Carry);
                let zero = self.regs.flag(Flag::Zero);
                self.regs.set_flags(zero, false, false, carry);
            }
            Op::Rlca | Op::Rrca | Op::Rla | Op::Rra => {
                self.regs.a = self.shift(instr.op, self.regs.a);
                self.regs.set_flag(Flag::Zero, false);
            }

            Op::Rlc | Op::Rrc | Op::Rl | Op::Rr | Op::Sla | Op::Sra | Op::Swap | Op::Srl => {
                let target = self.place(first.ok_or_else(err)?, imm).ok_or_else(err)?;
                let val = self.load(mmu, target);
                let res = self.shift(instr.op, val);
                self.store(mmu, target, res);
            }
            Op::Bit | Op::Res | Op::Set => {
                let Some(Operand::Bit(bit)) = first else {
                    return Err(err());
                };
                let target = self.place(second.ok_or_else(err)?, imm).ok_or_else(err)?;
                let val = self.load(mmu, target);
                match instr.op {
                    Op::Bit => {
                        let carry = self.regs.flag(Flag::Carry);
                        self.regs.set_flags(val & (1 << bit) == 0, false, true, carry);
                    }
                    Op::Res => self.store(mmu, target, val & !(1 << bit)),
                    _ => self.store(mmu, target, val | (1 << bit)),
                }
            }

            Op::Jp => match (first, second) {
                (Some(Operand::Imm16), None) => self.regs.pc = imm,
                (Some(Operand::Pair(r)), None) => self.regs.pc = self.regs.get16(r),
                (Some(Operand::Cond(c)), Some(Operand::Imm16)) => {
                    if self.condition_met(c) {
                        self.regs.pc = imm;
                        return Ok(true);
                    }
                }
                _ => return Err(err()),
            },
            Op::Jr => {
                let taken = match instr.condition() {
                    Some(c) => self.condition_met(c),
                    None => true,
                };
                if taken {
                    let offset = imm as u8 as i8;
                    self.regs.pc = self.regs.pc.wrapping_add_signed(offset as i16);
                    return Ok(instr.condition().is_some());
                }
            }
            Op::Call => {
                if instr.condition().is_none_or(|c| self.condition_met(c)) {
                    self.push(mmu, self.regs.pc);
                    self.regs.pc = imm;
                    return Ok(instr.condition().is_some());
                }
            }
            Op::Ret | Op::Reti => {
                if instr.condition().is_none_or(|c| self.condition_met(c)) {
                    self.regs.pc = self.pop(mmu);
                    if instr.op == Op::Reti {
                        self.ime = true;
                    }
                    return Ok(instr.condition().is_some());
                }
            }
            Op::Rst => match first {
                Some(Operand::Vector(v)) => {
                    self.push(mmu, self.regs.pc);
                    self.regs.pc = v;
                }
                _ => return Err(err()),
            },

            Op::Prefix | Op::Illegal => return Err(err()),
        }
        Ok(false)
    }

    fn alu(&mut self, op: Op, val: u8) {
        let a = self.regs.a;
        let carry_in = u8::from(self.regs.flag(Flag::Carry));
        match op {
            Op::Add | Op::Adc => {
                let c = if op == Op::Adc { carry_in } else { 0 };
                let res = a as u16 + val as u16 + c as u16;
                let half = (a & 0x0F) + (val & 0x0F) + c > 0x0F;
                self.regs.a = res as u8;
                self.regs.set_flags(res as u8 == 0, false, half, res > 0xFF);
            }
            Op::Sub | Op::Sbc | Op::Cp => {
                let c = if op == Op::Sbc { carry_in } else { 0 };
                let res = a as i16 - val as i16 - c as i16;
                let half = ((a & 0x0F) as i16) - ((val & 0x0F) as i16) - (c as i16) < 0;
                if op != Op::Cp {
                    self.regs.a = res as u8;
                }
                self.regs.set_flags(res as u8 == 0, true, half, res < 0);
            }
            Op::And => {
                self.regs.a = a & val;
                self.regs.set_flags(self.regs.a == 0, false, true, false);
            }
            Op::Xor => {
                self.regs.a = a ^ val;
                self.regs.set_flags(self.regs.a == 0, false, false, false);
            }
            Op::Or => {
                self.regs.a = a | val;
                self.regs.set_flags(self.regs.a == 0, false, false, false);
            }
            _ => {}
        }
    }

    /// Rotates and shifts shared by the accumulator and prefixed forms.
    fn shift(&mut self, op: Op, val: u8) -> u8 {
        let carry_in = u8::from(self.regs.flag(Flag::Carry));
        let (res, carry) = match op {
            Op::Rlc | Op::Rlca => (val.rotate_left(1), val & 0x80 != 0),
            Op::Rrc | Op::Rrca => (val.rotate_right(1), val & 0x01 != 0),
            Op::Rl | Op::Rla => ((val << 1) | carry_in, val & 0x80 != 0),
            Op::Rr | Op::Rra => ((val >> 1) | (carry_in << 7), val & 0x01 != 0),
            Op::Sla => (val << 1, val & 0x80 != 0),
            Op::Sra => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
            Op::Swap => (val.rotate_left(4), false),
            Op::Srl => (val >> 1, val & 0x01 != 0),
            _ => (val, carry_in != 0),
        };
        self.regs.set_flags(res == 0, false, false, carry);
        res
    }

    fn daa(&mut self) {
        let mut a = self.regs.a;
        let mut carry = self.regs.flag(Flag::Carry);
        let subtract = self.regs.flag(Flag::Subtract);
        let half = self.regs.flag(Flag::HalfCarry);
        let mut adjust = 0;
        if half || (!subtract && a & 0x0F > 0x09) {
            adjust |= 0x06;
        }
        if carry || (!subtract && a > 0x99) {
            adjust |= 0x60;
            carry = true;
        }
        a = if subtract {
            a.wrapping_sub(adjust)
        } else {
            a.wrapping_add(adjust)
        };
        self.regs.a = a;
        self.regs.set_flags(a == 0, subtract, false, carry);
    }

    /// SP plus a signed byte; flags come from the unsigned low-byte addition.
    fn add_sp_offset(&mut self, offset: u8) -> u16 {
        let sp = self.regs.sp;
        let half = (sp & 0x0F) + (offset as u16 & 0x0F) > 0x0F;
        let carry = (sp & 0xFF) + offset as u16 > 0xFF;
        self.regs.set_flags(false, false, half, carry);
        sp.wrapping_add_signed(offset as i8 as i16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::{INT_TIMER, INT_VBLANK};
    use crate::registers::{FLAG_C, FLAG_H, FLAG_N, FLAG_Z};

    /// CPU at 0xC000 with `program` in work RAM.
    fn run(program: &[u8]) -> (Cpu, Mmu) {
        let mut mmu = Mmu::new();
        for (i, b) in program.iter().enumerate() {
            mmu.write_byte(0xC000 + i as u16, *b);
        }
        let mut cpu = Cpu::new();
        cpu.regs.pc = 0xC000;
        (cpu, mmu)
    }

    fn steps(cpu: &mut Cpu, mmu: &mut Mmu, n: usize) -> u32 {
        (0..n).map(|_| cpu.step(mmu).unwrap()).sum()
    }

    #[test]
    fn nop_costs_four_cycles() {
        let (mut cpu, mut mmu) = run(&[0x00]);
        assert_eq!(cpu.step(&mut mmu).unwrap(), 4);
        assert_eq!(cpu.regs.pc, 0xC001);
        assert_eq!(cpu.cycles, 4);
    }

    #[test]
    fn ld_sp_then_xor_a() {
        let (mut cpu, mut mmu) = run(&[0x31, 0xFE, 0xFF, 0xAF]);
        cpu.regs.a = 0x42;
        steps(&mut cpu, &mut mmu, 2);
        assert_eq!(cpu.regs.sp, 0xFFFE);
        assert_eq!(cpu.regs.a, 0);
        assert!(cpu.regs.flag(Flag::Zero));
    }

    #[test]
    fn add_sets_half_and_carry() {
        // LD A,$8F; ADD A,$81
        let (mut cpu, mut mmu) = run(&[0x3E, 0x8F, 0xC6, 0x81]);
        steps(&mut cpu, &mut mmu, 2);
        assert_eq!(cpu.regs.a, 0x10);
        assert_eq!(cpu.regs.f, FLAG_H | FLAG_C);
    }

    #[test]
    fn sub_and_cp_borrow() {
        // LD A,$10; CP $20; SUB $01
        let (mut cpu, mut mmu) = run(&[0x3E, 0x10, 0xFE, 0x20, 0xD6, 0x01]);
        steps(&mut cpu, &mut mmu, 2);
        assert_eq!(cpu.regs.a, 0x10);
        assert_eq!(cpu.regs.f, FLAG_N | FLAG_C);
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.regs.a, 0x0F);
        assert_eq!(cpu.regs.f, FLAG_N | FLAG_H);
    }

    #[test]
    fn adc_and_sbc_use_carry() {
        // SCF; LD A,$0F; ADC A,$00; SCF; SBC A,$00
        let (mut cpu, mut mmu) = run(&[0x37, 0x3E, 0x0F, 0xCE, 0x00, 0x37, 0xDE, 0x00]);
        steps(&mut cpu, &mut mmu, 3);
        assert_eq!(cpu.regs.a, 0x10);
        assert_eq!(cpu.regs.f, FLAG_H);
        steps(&mut cpu, &mut mmu, 2);
        assert_eq!(cpu.regs.a, 0x0F);
        assert_eq!(cpu.regs.f, FLAG_N | FLAG_H);
    }

    #[test]
    fn inc_dec_keep_carry() {
        // SCF; LD B,$FF; INC B; DEC B
        let (mut cpu, mut mmu) = run(&[0x37, 0x06, 0xFF, 0x04, 0x05]);
        steps(&mut cpu, &mut mmu, 3);
        assert_eq!(cpu.regs.b, 0);
        assert_eq!(cpu.regs.f, FLAG_Z | FLAG_H | FLAG_C);
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.regs.b, 0xFF);
        assert_eq!(cpu.regs.f, FLAG_N | FLAG_H | FLAG_C);
    }

    #[test]
    fn add_hl_sets_half_from_bit_11() {
        // LD HL,$0FFF; LD BC,$0001; ADD HL,BC
        let (mut cpu, mut mmu) = run(&[0x21, 0xFF, 0x0F, 0x01, 0x01, 0x00, 0x09]);
        cpu.regs.f = FLAG_Z;
        let cycles = steps(&mut cpu, &mut mmu, 3);
        assert_eq!(cycles, 12 + 12 + 8);
        assert_eq!(cpu.regs.hl(), 0x1000);
        assert_eq!(cpu.regs.f, FLAG_Z | FLAG_H);
    }

    #[test]
    fn hl_increment_and_decrement_forms() {
        // LD HL,$C100; LD A,$11; LD (HL+),A; LD (HL-),A; LD A,(HL-)
        let (mut cpu, mut mmu) = run(&[0x21, 0x00, 0xC1, 0x3E, 0x11, 0x22, 0x32, 0x3A]);
        steps(&mut cpu, &mut mmu, 4);
        assert_eq!(mmu.read_byte(0xC100), 0x11);
        assert_eq!(mmu.read_byte(0xC101), 0x11);
        assert_eq!(cpu.regs.hl(), 0xC100);
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.regs.a, 0x11);
        assert_eq!(cpu.regs.hl(), 0xC0FF);
    }

    #[test]
    fn high_page_loads() {
        // LD A,$5A; LDH ($80),A; LD C,$81; LD ($FF00+C),A; LD A,$00; LDH A,($80)
        let (mut cpu, mut mmu) = run(&[0x3E, 0x5A, 0xE0, 0x80, 0x0E, 0x81, 0xE2, 0x3E, 0x00, 0xF0, 0x80]);
        steps(&mut cpu, &mut mmu, 6);
        assert_eq!(mmu.read_byte(0xFF80), 0x5A);
        assert_eq!(mmu.read_byte(0xFF81), 0x5A);
        assert_eq!(cpu.regs.a, 0x5A);
    }

    #[test]
    fn jr_lands_relative_to_next_instruction() {
        // JR +2 skips two NOPs.
        let (mut cpu, mut mmu) = run(&[0x18, 0x02, 0x00, 0x00, 0x00]);
        assert_eq!(cpu.step(&mut mmu).unwrap(), 12);
        assert_eq!(cpu.regs.pc, 0xC004);
    }

    #[test]
    fn conditional_branches_add_cycles_when_taken() {
        // XOR A; JR NZ,+5; JR Z,-2
        let (mut cpu, mut mmu) = run(&[0xAF, 0x20, 0x05, 0x28, 0xFE]);
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.step(&mut mmu).unwrap(), 8);
        assert_eq!(cpu.regs.pc, 0xC003);
        assert_eq!(cpu.step(&mut mmu).unwrap(), 12);
        assert_eq!(cpu.regs.pc, 0xC003);
    }

    #[test]
    fn call_and_ret_use_the_stack() {
        // CALL $C010 ... at $C010: RET
        let mut program = vec![0xCD, 0x10, 0xC0];
        program.resize(0x10, 0x00);
        program.push(0xC9);
        let (mut cpu, mut mmu) = run(&program);
        cpu.regs.sp = 0xD000;
        assert_eq!(cpu.step(&mut mmu).unwrap(), 24);
        assert_eq!(cpu.regs.pc, 0xC010);
        assert_eq!(cpu.regs.sp, 0xCFFE);
        assert_eq!(mmu.read_word(0xCFFE), 0xC003);
        assert_eq!(cpu.step(&mut mmu).unwrap(), 16);
        assert_eq!(cpu.regs.pc, 0xC003);
        assert_eq!(cpu.regs.sp, 0xD000);
    }

    #[test]
    fn push_pop_af_masks_flags() {
        // LD BC,$12FF; PUSH BC; POP AF
        let (mut cpu, mut mmu) = run(&[0x01, 0xFF, 0x12, 0xC5, 0xF1]);
        cpu.regs.sp = 0xD000;
        steps(&mut cpu, &mut mmu, 3);
        assert_eq!(cpu.regs.a, 0x12);
        assert_eq!(cpu.regs.f, 0xF0);
    }

    #[test]
    fn daa_adjusts_bcd_addition() {
        // LD A,$19; ADD A,$28; DAA
        let (mut cpu, mut mmu) = run(&[0x3E, 0x19, 0xC6, 0x28, 0x27]);
        steps(&mut cpu, &mut mmu, 3);
        assert_eq!(cpu.regs.a, 0x47);
        assert!(!cpu.regs.flag(Flag::Carry));

        // LD A,$10; SUB $01; DAA
        let (mut cpu, mut mmu) = run(&[0x3E, 0x10, 0xD6, 0x01, 0x27]);
        steps(&mut cpu, &mut mmu, 3);
        assert_eq!(cpu.regs.a, 0x09);
    }

    #[test]
    fn add_sp_and_ld_hl_sp_offset() {
        // ADD SP,-1; LD HL,SP+2
        let (mut cpu, mut mmu) = run(&[0xE8, 0xFF, 0xF8, 0x02]);
        cpu.regs.sp = 0xD000;
        assert_eq!(cpu.step(&mut mmu).unwrap(), 16);
        assert_eq!(cpu.regs.sp, 0xCFFF);
        assert_eq!(cpu.regs.f, 0);
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.regs.hl(), 0xD001);
        assert_eq!(cpu.regs.f, FLAG_H | FLAG_C);
    }

    #[test]
    fn accumulator_rotates_clear_zero() {
        // XOR A; RLA with carry clear leaves A zero but Z clear.
        let (mut cpu, mut mmu) = run(&[0xAF, 0x17]);
        steps(&mut cpu, &mut mmu, 2);
        assert_eq!(cpu.regs.a, 0);
        assert_eq!(cpu.regs.f, 0);
    }

    #[test]
    fn prefixed_ops_on_registers_and_memory() {
        // LD HL,$C100; LD (HL),$81; RLC (HL); SWAP (HL); BIT 7,(HL); SET 0,B; RES 0,B
        let (mut cpu, mut mmu) = run(&[
            0x21, 0x00, 0xC1, 0x36, 0x81, 0xCB, 0x06, 0xCB, 0x36, 0xCB, 0x7E, 0xCB, 0xC0, 0xCB,
            0x80,
        ]);
        steps(&mut cpu, &mut mmu, 2);
        assert_eq!(cpu.step(&mut mmu).unwrap(), 16);
        assert_eq!(mmu.read_byte(0xC100), 0x03);
        assert_eq!(cpu.regs.f, FLAG_C);
        cpu.step(&mut mmu).unwrap();
        assert_eq!(mmu.read_byte(0xC100), 0x30);
        assert_eq!(cpu.step(&mut mmu).unwrap(), 12);
        assert_eq!(cpu.regs.f, FLAG_Z | FLAG_H);
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.regs.b, 0x01);
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.regs.b, 0x00);
    }

    #[test]
    fn illegal_opcode_reports_and_advances() {
        let (mut cpu, mut mmu) = run(&[0xD3, 0x00]);
        assert_eq!(
            cpu.step(&mut mmu),
            Err(CoreError::UnimplementedInstruction {
                opcode: 0xD3,
                prefixed: false,
                pc: 0xC000
            })
        );
        assert_eq!(cpu.regs.pc, 0xC001);
        assert_eq!(cpu.cycles, 4);
        assert_eq!(cpu.step(&mut mmu).unwrap(), 4);
    }

    #[test]
    fn ei_takes_effect_after_next_instruction() {
        // EI; NOP; NOP
        let (mut cpu, mut mmu) = run(&[0xFB, 0x00, 0x00]);
        cpu.regs.sp = 0xD000;
        mmu.ie_reg = INT_VBLANK;
        mmu.if_reg = INT_VBLANK;
        cpu.step(&mut mmu).unwrap();
        assert!(!cpu.ime);
        cpu.step(&mut mmu).unwrap();
        assert!(cpu.ime);
        assert_eq!(cpu.regs.pc, 0xC002);

        assert_eq!(cpu.step(&mut mmu).unwrap(), INTERRUPT_CYCLES);
        assert_eq!(cpu.regs.pc, 0x0040);
        assert!(!cpu.ime);
        assert_eq!(mmu.if_reg & INT_VBLANK, 0);
        assert_eq!(mmu.read_word(cpu.regs.sp), 0xC002);
    }

    #[test]
    fn di_cancels_pending_ei() {
        let (mut cpu, mut mmu) = run(&[0xFB, 0xF3, 0x00]);
        steps(&mut cpu, &mut mmu, 3);
        assert!(!cpu.ime);
    }

    #[test]
    fn halt_wakes_without_ime() {
        // HALT; NOP
        let (mut cpu, mut mmu) = run(&[0x76, 0x00]);
        cpu.step(&mut mmu).unwrap();
        assert!(cpu.halted);
        assert_eq!(cpu.step(&mut mmu).unwrap(), HALT_CYCLES);
        assert_eq!(cpu.regs.pc, 0xC001);

        mmu.ie_reg = INT_TIMER;
        mmu.if_reg = INT_TIMER;
        cpu.step(&mut mmu).unwrap();
        assert!(!cpu.halted);
        assert_eq!(cpu.regs.pc, 0xC002);
        // Without IME the request stays pending.
        assert_eq!(mmu.if_reg & INT_TIMER, INT_TIMER);
    }

    #[test]
    fn reti_restores_ime() {
        let (mut cpu, mut mmu) = run(&[0xD9]);
        cpu.regs.sp = 0xCFFE;
        mmu.write_word(0xCFFE, 0x1234);
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.regs.pc, 0x1234);
        assert!(cpu.ime);
    }

    #[test]
    fn stop_resets_divider() {
        let (mut cpu, mut mmu) = run(&[0x10, 0x00, 0x00]);
        mmu.timer.div = 0x40;
        assert_eq!(cpu.step(&mut mmu).unwrap(), 4);
        assert_eq!(cpu.regs.pc, 0xC002);
        assert_eq!(mmu.read_byte(timer::DIV), 0);
    }

    #[test]
    fn rst_pushes_and_jumps() {
        let (mut cpu, mut mmu) = run(&[0xEF]);
        cpu.regs.sp = 0xD000;
        assert_eq!(cpu.step(&mut mmu).unwrap(), 16);
        assert_eq!(cpu.regs.pc, 0x0028);
        assert_eq!(mmu.read_word(0xCFFE), 0xC001);
    }
}
