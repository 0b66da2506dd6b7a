//! Loads and stores. Guest memory is big-endian; addresses are 32-bit.

use super::{Step, Translation, Translator};
use crate::ir::{cr, ExtKind, FloatUnOp, Reg, UnOp, Value, Width};
use crate::Instruction;

/// Data cache block size cleared by `dcbz`.
const CACHE_LINE: u64 = 32;

/// How the effective address is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Addressing {
    /// `d(rA)`: operands `[rD, d, rA]`
    Displacement,
    /// `rA, rB`: operands `[rD, rA, rB]`
    Indexed,
}

impl Addressing {
    fn base_operand(self) -> usize {
        match self {
            Addressing::Displacement => 2,
            Addressing::Indexed => 1,
        }
    }
}

impl Translator<'_> {
    /// Effective address of `insn`. Update forms use `rA` even when it is r0
    /// and write the address back through [`Translator::write_back`].
    fn effective_address(&mut self, insn: &Instruction, addressing: Addressing, update: bool) -> Value {
        let base_reg = insn.op(addressing.base_operand());
        let base = if update { self.gpr(base_reg) } else { self.gpr_or_zero(base_reg) };
        let offset = match addressing {
            Addressing::Displacement => Value::Const(insn.simm(1) as i64 as u64),
            Addressing::Indexed => self.gpr(insn.op(2)),
        };
        match (base, offset) {
            (Value::Const(0), offset) => offset,
            (base, Value::Const(0)) => base,
            (base, offset) => self.b.add(base, offset),
        }
    }

    fn write_back(&mut self, insn: &Instruction, addressing: Addressing, address: Value) {
        self.set_gpr(insn.op(addressing.base_operand()), address);
    }

    pub(super) fn load(
        &mut self,
        insn: &Instruction,
        width: Width,
        signed: bool,
        addressing: Addressing,
        update: bool,
    ) -> Translation {
        let address = self.effective_address(insn, addressing, update);
        let mut value = self.b.load(width, address);
        if signed {
            value = self.b.extend(ExtKind::Sign, width, value);
        }
        self.set_gpr(insn.op(0), value);
        if update {
            self.write_back(insn, addressing, address);
        }
        Ok(Step::Continue)
    }

    pub(super) fn store(&mut self, insn: &Instruction, width: Width, addressing: Addressing, update: bool) -> Translation {
        let value = self.gpr(insn.op(0));
        let address = self.effective_address(insn, addressing, update);
        self.b.store(width, address, value);
        if update {
            self.write_back(insn, addressing, address);
        }
        Ok(Step::Continue)
    }

    /// `lhbrx`, `lwbrx`
    pub(super) fn load_reversed(&mut self, insn: &Instruction, width: Width) -> Translation {
        let address = self.effective_address(insn, Addressing::Indexed, false);
        let value = self.b.load(width, address);
        let value = self.b.unary(UnOp::ByteSwap, width, value);
        self.set_gpr(insn.op(0), value);
        Ok(Step::Continue)
    }

    /// `sthbrx`, `stwbrx`
    pub(super) fn store_reversed(&mut self, insn: &Instruction, width: Width) -> Translation {
        let value = self.gpr(insn.op(0));
        let value = self.b.unary(UnOp::ByteSwap, width, value);
        let address = self.effective_address(insn, Addressing::Indexed, false);
        self.b.store(width, address, value);
        Ok(Step::Continue)
    }

    /// `lmw`: loads `rD..=r31` from consecutive words.
    pub(super) fn load_multiple(&mut self, insn: &Instruction) -> Translation {
        let address = self.effective_address(insn, Addressing::Displacement, false);
        for (i, reg) in (insn.op(0)..32).enumerate() {
            let slot = self.b.add(address, Value::Const(4 * i as u64));
            let value = self.b.load(Width::W32, slot);
            self.set_gpr(reg, value);
        }
        Ok(Step::Continue)
    }

    /// `stmw`: stores `rS..=r31` to consecutive words.
    pub(super) fn store_multiple(&mut self, insn: &Instruction) -> Translation {
        let address = self.effective_address(insn, Addressing::Displacement, false);
        for (i, reg) in (insn.op(0)..32).enumerate() {
            let value = self.gpr(reg);
            let slot = self.b.add(address, Value::Const(4 * i as u64));
            self.b.store(Width::W32, slot, value);
        }
        Ok(Step::Continue)
    }

    /// `lfs*` widen the loaded single to double; `lfd*` load the bits as is.
    pub(super) fn load_float(
        &mut self,
        insn: &Instruction,
        single: bool,
        addressing: Addressing,
        update: bool,
    ) -> Translation {
        let address = self.effective_address(insn, addressing, update);
        let value = if single {
            let bits = self.b.load(Width::W32, address);
            self.b.float_unary(FloatUnOp::FromSingleBits, bits)
        } else {
            self.b.load(Width::W64, address)
        };
        self.set_fpr(insn.op(0), value);
        if update {
            self.write_back(insn, addressing, address);
        }
        Ok(Step::Continue)
    }

    pub(super) fn store_float(
        &mut self,
        insn: &Instruction,
        single: bool,
        addressing: Addressing,
        update: bool,
    ) -> Translation {
        let value = self.fpr(insn.op(0));
        let address = self.effective_address(insn, addressing, update);
        if single {
            let bits = self.b.float_unary(FloatUnOp::ToSingleBits, value);
            self.b.store(Width::W32, address, bits);
        } else {
            self.b.store(Width::W64, address, value);
        }
        if update {
            self.write_back(insn, addressing, address);
        }
        Ok(Step::Continue)
    }

    /// `stfiwx`: the low word of the register bits, unconverted.
    pub(super) fn store_float_word(&mut self, insn: &Instruction) -> Translation {
        let value = self.fpr(insn.op(0));
        let address = self.effective_address(insn, Addressing::Indexed, false);
        self.b.store(Width::W32, address, value);
        Ok(Step::Continue)
    }

    /// `stwcx.`, `stdcx.`: single-threaded, so the reservation always holds.
    pub(super) fn store_conditional(&mut self, insn: &Instruction, width: Width) -> Translation {
        self.store(insn, width, Addressing::Indexed, false)?;
        self.b.set(Reg::Cr(0), Value::Const(cr::EQ));
        Ok(Step::Continue)
    }

    /// `dcbz`: zero the aligned cache line holding `(rA|0) + rB`.
    pub(super) fn data_cache_zero(&mut self, insn: &Instruction) -> Translation {
        let base = self.gpr_or_zero(insn.op(0));
        let index = self.gpr(insn.op(1));
        let address = self.b.add(base, index);
        let line = self.b.and(address, Value::Const(!(CACHE_LINE - 1)));
        for offset in (0..CACHE_LINE).step_by(8) {
            let slot = self.b.add(line, Value::Const(offset));
            self.b.store(Width::W64, slot, Value::Const(0));
        }
        Ok(Step::Continue)
    }
}

#[cfg(test)]
mod tests {
    use crate::decoder::Opcode;
    use crate::emit::tests::{recompile, run_function};
    use crate::ir::eval::{Evaluator, GuestMemory};
    use crate::ir::Width;
    use crate::testing::{asm, blr, BASE};

    const DATA: u64 = 0x8300_0000;

    #[test]
    fn test_stwu_updates_the_base_register() {
        let words = [asm(Opcode::Stwu, &[1, (-16i32) as u32, 1]), blr()];
        let output = recompile(&words);
        let mut eval = Evaluator::new(&output.module).with_memory(GuestMemory::new());
        eval.state.gpr[1] = DATA + 0x100;
        eval.call(BASE).unwrap();
        assert_eq!(eval.state.gpr[1], DATA + 0xF0);
        assert_eq!(eval.memory.load(0x8300_00F0, Width::W32), DATA + 0x100);
    }

    #[test]
    fn test_lha_sign_extends() {
        let words = [asm(Opcode::Lha, &[3, 2, 4]), blr()];
        let output = recompile(&words);
        let mut memory = GuestMemory::new();
        memory.write_bytes(0x8300_0002, &[0x80, 0x01]);
        let mut eval = Evaluator::new(&output.module).with_memory(memory);
        eval.state.gpr[4] = DATA;
        eval.call(BASE).unwrap();
        assert_eq!(eval.state.gpr[3], 0xFFFF_FFFF_FFFF_8001);
    }

    #[test]
    fn test_lwbrx_swaps_bytes() {
        let words = [asm(Opcode::Lwbrx, &[3, 0, 4]), blr()];
        let output = recompile(&words);
        let mut memory = GuestMemory::new();
        memory.write_bytes(0x8300_0000, &[0x12, 0x34, 0x56, 0x78]);
        let mut eval = Evaluator::new(&output.module).with_memory(memory);
        eval.state.gpr[4] = DATA;
        eval.call(BASE).unwrap();
        assert_eq!(eval.state.gpr[3], 0x7856_3412);
    }

    #[test]
    fn test_stmw_then_lmw_round_trips_the_high_registers() {
        let words = [
            asm(Opcode::Stmw, &[29, 0, 4]),
            asm(Opcode::Lmw, &[26, 0, 4]),
            blr(),
        ];
        let state = run_function(&words, |eval| {
            eval.state.gpr[4] = DATA;
            eval.state.gpr[29] = 0x29;
            eval.state.gpr[30] = 0x30;
            eval.state.gpr[31] = 0x31;
        });
        assert_eq!(state.gpr[26..29], [0x29, 0x30, 0x31]);
    }

    #[test]
    fn test_lfs_widens_to_double() {
        let words = [asm(Opcode::Lfs, &[1, 0, 4]), blr()];
        let output = recompile(&words);
        let mut memory = GuestMemory::new();
        memory.write_bytes(0x8300_0000, &1.5f32.to_be_bytes());
        let mut eval = Evaluator::new(&output.module).with_memory(memory);
        eval.state.gpr[4] = DATA;
        eval.call(BASE).unwrap();
        assert_eq!(eval.state.fpr_f64(1), 1.5);
    }

    #[test]
    fn test_stwcx_reports_success() {
        let words = [asm(Opcode::StwcxDot, &[3, 0, 4]), blr()];
        let state = run_function(&words, |eval| eval.state.gpr[4] = DATA);
        assert_eq!(state.cr[0], crate::ir::cr::EQ);
    }

    #[test]
    fn test_dcbz_clears_the_aligned_line() {
        let words = [asm(Opcode::Dcbz, &[0, 4]), blr()];
        let output = recompile(&words);
        let mut memory = GuestMemory::new();
        memory.write_bytes(0x8300_0000, &[0xAA; 64]);
        let mut eval = Evaluator::new(&output.module).with_memory(memory);
        eval.state.gpr[4] = DATA + 0x24;
        eval.call(BASE).unwrap();
        assert_eq!(eval.memory.load(0x8300_0020, Width::W64), 0);
        assert_eq!(eval.memory.load(0x8300_0038, Width::W64), 0);
        assert_eq!(eval.memory.load(0x8300_0018, Width::W64), 0xAAAA_AAAA_AAAA_AAAA);
    }
}
