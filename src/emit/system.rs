//! Special-purpose registers, the condition register and system instructions.

use super::{Step, Translation, Translator};
use crate::ir::{BinOp, Op, Reg, Value, Width};
use crate::Instruction;

const SPR_XER: u32 = 1;
const SPR_LR: u32 = 8;
const SPR_CTR: u32 = 9;

/// Position of CA in XER.
const XER_CA_SHIFT: u32 = 29;

/// Shift of CR field `field` within the 32-bit condition register.
fn field_shift(field: u32) -> u32 {
    4 * (7 - field)
}

impl Translator<'_> {
    pub(super) fn move_from_spr(&mut self, insn: &Instruction) -> Translation {
        let value = match insn.op(1) {
            SPR_LR => self.b.get(Reg::Lr),
            SPR_CTR => self.b.get(Reg::Ctr),
            SPR_XER => {
                let ca = self.b.get(Reg::Ca);
                self.b.shl(ca, XER_CA_SHIFT)
            }
            _ => return Self::unsupported(insn),
        };
        self.set_gpr(insn.op(0), value);
        Ok(Step::Continue)
    }

    pub(super) fn move_to_spr(&mut self, insn: &Instruction) -> Translation {
        let value = self.gpr(insn.op(1));
        match insn.op(0) {
            SPR_LR => self.b.set(Reg::Lr, value),
            SPR_CTR => self.b.set(Reg::Ctr, value),
            SPR_XER => {
                let ca = self.b.shr(value, XER_CA_SHIFT);
                let ca = self.b.and(ca, Value::Const(1));
                self.b.set(Reg::Ca, ca);
            }
            _ => return Self::unsupported(insn),
        }
        Ok(Step::Continue)
    }

    pub(super) fn move_from_cr(&mut self, insn: &Instruction) -> Translation {
        let mut word = Value::Const(0);
        for field in 0..8 {
            let nibble = self.b.get(Reg::Cr(field as u8));
            let placed = self.b.shl(nibble, field_shift(field));
            word = match word {
                Value::Const(0) => placed,
                _ => self.b.or(word, placed),
            };
        }
        self.set_gpr(insn.op(0), word);
        Ok(Step::Continue)
    }

    /// `mtcrf`: CRM bit `0x80 >> n` selects field `n`.
    pub(super) fn move_to_cr_fields(&mut self, insn: &Instruction) -> Translation {
        let mask = insn.op(0);
        let value = self.gpr(insn.op(1));
        for field in (0..8).filter(|field| mask & (0x80 >> field) != 0) {
            let nibble = self.b.shr(value, field_shift(field));
            let nibble = self.b.and(nibble, Value::Const(0xF));
            self.b.set(Reg::Cr(field as u8), nibble);
        }
        Ok(Step::Continue)
    }

    pub(super) fn move_from_msr(&mut self, insn: &Instruction) -> Translation {
        let msr = self.b.get(Reg::Msr);
        self.set_gpr(insn.op(0), msr);
        Ok(Step::Continue)
    }

    pub(super) fn move_to_msr(&mut self, insn: &Instruction) -> Translation {
        let value = self.gpr(insn.op(0));
        self.b.set(Reg::Msr, value);
        Ok(Step::Continue)
    }

    /// `mcrf`
    pub(super) fn move_cr_field(&mut self, insn: &Instruction) -> Translation {
        let source = self.b.get(Reg::Cr(insn.op(1) as u8));
        self.b.set(Reg::Cr(insn.op(0) as u8), source);
        Ok(Step::Continue)
    }

    /// `crand` family on single condition bits.
    pub(super) fn cr_logical(
        &mut self,
        insn: &Instruction,
        op: BinOp,
        invert_rhs: bool,
        invert_result: bool,
    ) -> Translation {
        let a = self.cr_bit(insn.op(1));
        let mut b = self.cr_bit(insn.op(2));
        if invert_rhs {
            b = self.b.binary(BinOp::Xor, Width::W64, b, Value::Const(1));
        }
        let mut result = self.b.binary(op, Width::W64, a, b);
        if invert_result {
            result = self.b.binary(BinOp::Xor, Width::W64, result, Value::Const(1));
        }
        self.set_cr_bit(insn.op(0), result);
        Ok(Step::Continue)
    }

    /// `sc`: the runtime reads the call number from r0.
    pub(super) fn system_call(&mut self) -> Translation {
        self.b.push(Op::Syscall);
        Ok(Step::Continue)
    }
}

#[cfg(test)]
mod tests {
    use crate::decoder::Opcode;
    use crate::emit::tests::{recompile, run_function};
    use crate::ir::cr;
    use crate::testing::{asm, blr, BASE};

    #[test]
    fn test_mfcr_packs_fields_high_first() {
        let words = [asm(Opcode::Mfcr, &[3]), blr()];
        let state = run_function(&words, |eval| {
            eval.state.cr[0] = cr::LT;
            eval.state.cr[7] = cr::EQ;
        });
        assert_eq!(state.gpr[3], 0x8000_0002);
    }

    #[test]
    fn test_mtcrf_writes_selected_fields() {
        // mtcrf 0x81,r3
        let words = [asm(Opcode::Mtcrf, &[0x81, 3]), blr()];
        let state = run_function(&words, |eval| {
            eval.state.gpr[3] = 0x4000_0008;
            eval.state.cr[1] = cr::GT;
        });
        assert_eq!(state.cr[0], cr::GT);
        assert_eq!(state.cr[1], cr::GT);
        assert_eq!(state.cr[7], cr::LT);
    }

    #[test]
    fn test_xer_carry_round_trips() {
        let words = [asm(Opcode::Mtspr, &[1, 3]), asm(Opcode::Mfspr, &[4, 1]), blr()];
        let state = run_function(&words, |eval| eval.state.gpr[3] = 1 << 29);
        assert_eq!(state.ca, 1);
        assert_eq!(state.gpr[4], 1 << 29);
    }

    #[test]
    fn test_cror_combines_bits_across_fields() {
        // cror 4*cr6+eq, 4*cr0+lt, 4*cr1+gt
        let words = [asm(Opcode::Cror, &[26, 0, 5]), blr()];
        let state = run_function(&words, |eval| {
            eval.state.cr[1] = cr::GT;
            eval.state.cr[6] = cr::LT;
        });
        assert_eq!(state.cr[6], cr::LT | cr::EQ);
    }

    #[test]
    fn test_crxor_clears_a_bit() {
        let words = [asm(Opcode::Crxor, &[6, 6, 6]), blr()];
        let state = run_function(&words, |eval| eval.state.cr[1] = 0xF);
        assert_eq!(state.cr[1], 0xF & !cr::EQ);
    }

    #[test]
    fn test_unknown_spr_is_unsupported() {
        // mfspr r3,SPRG0
        let words = [asm(Opcode::Mfspr, &[3, 272]), blr()];
        let output = recompile(&words);
        assert_eq!(output.report.summary().unsupported, 1);
        assert!(output.module.get(BASE).is_some());
    }
}
