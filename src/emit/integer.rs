//! Integer arithmetic, logical, compare, shift, rotate and trap rules.

use super::{mask64, Step, Translation, Translator};
use crate::ir::{BinOp, CmpOp, ExtKind, Op, Reg, UnOp, Value, Width};
use crate::Instruction;

/// Operand shapes of the carrying add/subtract family.
///
/// Each computes `x + y + carry_in`, where subtracting forms use `!rA` for `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CarryForm {
    /// `subfic`: `!rA + SIMM + 1`
    SubtractFromImmediate,
    /// `subfc`: `!rA + rB + 1`
    SubtractFrom,
    /// `adde`: `rA + rB + CA`
    Add,
    /// `subfe`: `!rA + rB + CA`
    Subtract,
    /// `addze`
    AddZero,
    /// `subfze`
    SubtractZero,
    /// `addme`
    AddMinusOne,
    /// `subfme`
    SubtractMinusOne,
}

impl CarryForm {
    fn subtracts(self) -> bool {
        matches!(
            self,
            Self::SubtractFromImmediate
                | Self::SubtractFrom
                | Self::Subtract
                | Self::SubtractZero
                | Self::SubtractMinusOne
        )
    }
}

/// Mask applied after a doubleword rotate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RotateMask {
    /// `rldicl`/`rldcl`: bits `mb..=63`
    ClearLeft,
    /// `rldicr`/`rldcr`: bits `0..=me`
    ClearRight,
    /// `rldic`/`rldimi`: bits `mb..=63-sh`
    Clear,
}

fn sign_extended(value: u32) -> Value {
    Value::Const(value as i32 as i64 as u64)
}

impl Translator<'_> {
    /// Bit 32 of `zext32(x) + zext32(y) + carry_in`.
    fn carry_out(&mut self, x: Value, y: Value, carry_in: Value) -> Value {
        let x = self.b.extend(ExtKind::Zero, Width::W32, x);
        let y = self.b.extend(ExtKind::Zero, Width::W32, y);
        let sum = self.b.add(x, y);
        let sum = self.b.add(sum, carry_in);
        let carry = self.b.shr(sum, 32);
        self.b.and(carry, Value::Const(1))
    }

    /// Carry of `a + b`: set when `b >u !a` on the low words.
    fn add_carry(&mut self, a: Value, b: Value) -> Value {
        let inverted = self.b.not(Width::W32, a);
        self.b.compare(CmpOp::GtU, Width::W32, b, inverted)
    }

    pub(super) fn add_immediate(&mut self, insn: &Instruction, shifted: bool) -> Translation {
        let imm = if shifted { sign_extended(insn.op(2) << 16) } else { sign_extended(insn.op(2)) };
        let result = match self.gpr_or_zero(insn.op(1)) {
            Value::Const(0) => imm,
            base => self.b.add(base, imm),
        };
        self.set_gpr(insn.op(0), result);
        Ok(Step::Continue)
    }

    /// `addic` and `addic.`
    pub(super) fn add_carrying_immediate(&mut self, insn: &Instruction) -> Translation {
        let a = self.gpr(insn.op(1));
        let imm = sign_extended(insn.op(2));
        let sum = self.b.add(a, imm);
        let carry = self.add_carry(a, imm);
        self.b.set(Reg::Ca, carry);
        self.set_gpr(insn.op(0), sum);
        self.record(insn, sum, Width::W32);
        Ok(Step::Continue)
    }

    pub(super) fn multiply_immediate(&mut self, insn: &Instruction) -> Translation {
        let a = self.gpr(insn.op(1));
        let product = self.b.binary(BinOp::Mul, Width::W64, a, sign_extended(insn.op(2)));
        self.set_gpr(insn.op(0), product);
        Ok(Step::Continue)
    }

    /// `cmpi` and `cmpli`; `L` selects a doubleword compare.
    pub(super) fn compare_immediate(&mut self, insn: &Instruction, signed: bool) -> Translation {
        let width = if insn.op(1) == 1 { Width::W64 } else { Width::W32 };
        let lhs = self.gpr(insn.op(2));
        let rhs = if signed { sign_extended(insn.op(3)) } else { Value::Const(u64::from(insn.op(3))) };
        self.compare_into_cr(insn.op(0), lhs, rhs, width, signed);
        Ok(Step::Continue)
    }

    pub(super) fn compare_registers(&mut self, insn: &Instruction, signed: bool) -> Translation {
        let width = if insn.op(1) == 1 { Width::W64 } else { Width::W32 };
        let lhs = self.gpr(insn.op(2));
        let rhs = self.gpr(insn.op(3));
        self.compare_into_cr(insn.op(0), lhs, rhs, width, signed);
        Ok(Step::Continue)
    }

    /// `ori`, `oris`, `xori`, `xoris`, `andi.`, `andis.`
    pub(super) fn logical_immediate(&mut self, insn: &Instruction, op: BinOp, shifted: bool) -> Translation {
        let imm = if shifted { insn.op(2) << 16 } else { insn.op(2) };
        let s = self.gpr(insn.op(1));
        let result = self.b.binary(op, Width::W64, s, Value::Const(u64::from(imm)));
        self.set_gpr(insn.op(0), result);
        self.record(insn, result, Width::W32);
        Ok(Step::Continue)
    }

    /// Three-register arithmetic; `reversed` computes `rB op rA`.
    pub(super) fn arithmetic(&mut self, insn: &Instruction, op: BinOp, width: Width, reversed: bool) -> Translation {
        let a = self.gpr(insn.op(1));
        let b = self.gpr(insn.op(2));
        let (lhs, rhs) = if reversed { (b, a) } else { (a, b) };
        let result = self.b.binary(op, width, lhs, rhs);
        self.set_gpr(insn.op(0), result);
        let record_width = match op {
            BinOp::Add | BinOp::Sub => Width::W32,
            _ => width,
        };
        self.record(insn, result, record_width);
        Ok(Step::Continue)
    }

    /// `mullw`: the full 64-bit product of the sign-extended low words.
    pub(super) fn multiply_word(&mut self, insn: &Instruction) -> Translation {
        let a = self.gpr(insn.op(1));
        let b = self.gpr(insn.op(2));
        let a = self.b.extend(ExtKind::Sign, Width::W32, a);
        let b = self.b.extend(ExtKind::Sign, Width::W32, b);
        let product = self.b.binary(BinOp::Mul, Width::W64, a, b);
        self.set_gpr(insn.op(0), product);
        self.record(insn, product, Width::W32);
        Ok(Step::Continue)
    }

    pub(super) fn negate(&mut self, insn: &Instruction) -> Translation {
        let a = self.gpr(insn.op(1));
        let result = self.b.unary(UnOp::Neg, Width::W64, a);
        self.set_gpr(insn.op(0), result);
        self.record(insn, result, Width::W32);
        Ok(Step::Continue)
    }

    /// `addc`
    pub(super) fn add_carrying(&mut self, insn: &Instruction) -> Translation {
        let a = self.gpr(insn.op(1));
        let b = self.gpr(insn.op(2));
        let sum = self.b.add(a, b);
        let carry = self.add_carry(a, b);
        self.b.set(Reg::Ca, carry);
        self.set_gpr(insn.op(0), sum);
        self.record(insn, sum, Width::W32);
        Ok(Step::Continue)
    }

    pub(super) fn extended_add(&mut self, insn: &Instruction, form: CarryForm) -> Translation {
        let a = self.gpr(insn.op(1));
        let x = if form.subtracts() { self.b.not(Width::W64, a) } else { a };
        let y = match form {
            CarryForm::SubtractFromImmediate => sign_extended(insn.op(2)),
            CarryForm::SubtractFrom | CarryForm::Add | CarryForm::Subtract => self.gpr(insn.op(2)),
            CarryForm::AddZero | CarryForm::SubtractZero => Value::Const(0),
            CarryForm::AddMinusOne | CarryForm::SubtractMinusOne => Value::Const(u64::MAX),
        };
        let carry_in = match form {
            CarryForm::SubtractFromImmediate | CarryForm::SubtractFrom => Value::Const(1),
            _ => self.b.get(Reg::Ca),
        };
        let sum = self.b.add(x, y);
        let sum = self.b.add(sum, carry_in);
        let carry = self.carry_out(x, y, carry_in);
        self.b.set(Reg::Ca, carry);
        self.set_gpr(insn.op(0), sum);
        self.record(insn, sum, Width::W32);
        Ok(Step::Continue)
    }

    /// Register logical ops, optionally complementing `rB` and the result.
    pub(super) fn logical(
        &mut self,
        insn: &Instruction,
        op: BinOp,
        invert_rhs: bool,
        invert_result: bool,
    ) -> Translation {
        let s = self.gpr(insn.op(1));
        let mut rhs = self.gpr(insn.op(2));
        if invert_rhs {
            rhs = self.b.not(Width::W64, rhs);
        }
        let mut result = self.b.binary(op, Width::W64, s, rhs);
        if invert_result {
            result = self.b.not(Width::W64, result);
        }
        self.set_gpr(insn.op(0), result);
        self.record(insn, result, Width::W32);
        Ok(Step::Continue)
    }

    pub(super) fn extend_sign(&mut self, insn: &Instruction, from: Width) -> Translation {
        let s = self.gpr(insn.op(1));
        let result = self.b.extend(ExtKind::Sign, from, s);
        self.set_gpr(insn.op(0), result);
        let record_width = if from == Width::W32 { Width::W64 } else { Width::W32 };
        self.record(insn, result, record_width);
        Ok(Step::Continue)
    }

    pub(super) fn count_leading_zeros(&mut self, insn: &Instruction, width: Width) -> Translation {
        let s = self.gpr(insn.op(1));
        let result = self.b.unary(UnOp::Clz, width, s);
        self.set_gpr(insn.op(0), result);
        self.record(insn, result, Width::W32);
        Ok(Step::Continue)
    }

    /// `slw`, `srw`, `sld`, `srd`: amounts of a full width or more give 0.
    pub(super) fn shift(&mut self, insn: &Instruction, op: BinOp, width: Width) -> Translation {
        let s = self.gpr(insn.op(1));
        let b = self.gpr(insn.op(2));
        let amount = self.b.and(b, Value::Const(u64::from(width.bits() * 2 - 1)));
        let result = self.b.binary(op, width, s, amount);
        self.set_gpr(insn.op(0), result);
        self.record(insn, result, width);
        Ok(Step::Continue)
    }

    /// `sraw`, `srad`, `srawi`, `sradi`.
    ///
    /// CA is set when the source is negative and any 1 bit is shifted out.
    pub(super) fn shift_algebraic(&mut self, insn: &Instruction, width: Width, immediate: bool) -> Translation {
        let s = self.gpr(insn.op(1));
        let amount = if immediate {
            Value::Const(u64::from(insn.op(2)))
        } else {
            let b = self.gpr(insn.op(2));
            self.b.and(b, Value::Const(u64::from(width.bits() * 2 - 1)))
        };
        let mut result = self.b.binary(BinOp::ShrS, width, s, amount);
        if width != Width::W64 {
            result = self.b.extend(ExtKind::Sign, width, result);
        }

        let restored = self.b.binary(BinOp::Shl, width, result, amount);
        let lost = self.b.compare(CmpOp::Ne, width, restored, s);
        let negative = self.b.compare(CmpOp::LtS, width, s, Value::Const(0));
        let carry = self.b.and(lost, negative);
        self.b.set(Reg::Ca, carry);

        self.set_gpr(insn.op(0), result);
        self.record(insn, result, width);
        Ok(Step::Continue)
    }

    /// `rlwinm`, `rlwnm`, `rlwimi`.
    ///
    /// The rotated word is replicated into both halves before masking.
    pub(super) fn rotate_word(&mut self, insn: &Instruction, register_amount: bool, insert: bool) -> Translation {
        let s = self.gpr(insn.op(1));
        let amount = if register_amount {
            let b = self.gpr(insn.op(2));
            self.b.and(b, Value::Const(0x1F))
        } else {
            Value::Const(u64::from(insn.op(2)))
        };
        let rotated = self.b.binary(BinOp::RotL, Width::W32, s, amount);
        let mask = mask64(insn.op(3) + 32, insn.op(4) + 32);
        let result = self.merge_rotated(insn, rotated, mask, insert);
        self.set_gpr(insn.op(0), result);
        self.record(insn, result, Width::W32);
        Ok(Step::Continue)
    }

    /// `rldicl`, `rldicr`, `rldic`, `rldimi`, `rldcl`, `rldcr`.
    pub(super) fn rotate_double(
        &mut self,
        insn: &Instruction,
        mask: RotateMask,
        register_amount: bool,
        insert: bool,
    ) -> Translation {
        let s = self.gpr(insn.op(1));
        let amount = if register_amount {
            let b = self.gpr(insn.op(2));
            self.b.and(b, Value::Const(0x3F))
        } else {
            Value::Const(u64::from(insn.op(2)))
        };
        let bound = insn.op(3);
        let mask = match mask {
            RotateMask::ClearLeft => mask64(bound, 63),
            RotateMask::ClearRight => mask64(0, bound),
            RotateMask::Clear => mask64(bound, 63 - insn.op(2)),
        };
        let rotated = self.b.binary(BinOp::RotL, Width::W64, s, amount);
        let result = self.merge_rotated(insn, rotated, mask, insert);
        self.set_gpr(insn.op(0), result);
        self.record(insn, result, Width::W64);
        Ok(Step::Continue)
    }

    /// `rotated & mask`, or for inserting forms `(rotated & mask) | (rA & !mask)`.
    fn merge_rotated(&mut self, insn: &Instruction, rotated: Value, mask: u64, insert: bool) -> Value {
        let kept = self.b.and(rotated, Value::Const(mask));
        if !insert {
            return kept;
        }
        let a = self.gpr(insn.op(0));
        let preserved = self.b.and(a, Value::Const(!mask));
        self.b.or(kept, preserved)
    }

    /// `tw`, `twi`, `td`, `tdi`. TO bits select LT, GT, EQ, LTU and GTU.
    pub(super) fn trap(&mut self, insn: &Instruction, width: Width, immediate: bool) -> Translation {
        let to = insn.op(0);
        if to == 0 {
            return Ok(Step::Continue);
        }
        if to == 0x1F {
            self.b.push(Op::TrapIf { cond: Value::Const(1) });
            return Ok(Step::Continue);
        }
        let a = self.gpr(insn.op(1));
        let b = if immediate { sign_extended(insn.op(2)) } else { self.gpr(insn.op(2)) };
        let conditions = [
            (0x10, CmpOp::LtS),
            (0x08, CmpOp::GtS),
            (0x04, CmpOp::Eq),
            (0x02, CmpOp::LtU),
            (0x01, CmpOp::GtU),
        ];
        let mut cond = Value::Const(0);
        for (bit, op) in conditions {
            if to & bit != 0 {
                let hit = self.b.compare(op, width, a, b);
                cond = match cond {
                    Value::Const(0) => hit,
                    _ => self.b.or(cond, hit),
                };
            }
        }
        self.b.push(Op::TrapIf { cond });
        Ok(Step::Continue)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::decoder::Opcode;
    use crate::emit::tests::run_function;
    use crate::ir::cr;
    use crate::testing::{asm, blr, li};

    #[test]
    fn test_addic_minus_one_from_zero_has_no_carry() {
        let words = [asm(Opcode::Addic, &[3, 4, (-1i32) as u32]), blr()];
        let state = run_function(&words, |eval| {
            eval.state.gpr[4] = 0;
            eval.state.ca = 1;
        });
        assert_eq!(state.gpr[3], u64::MAX);
        assert_eq!(state.ca, 0);
    }

    #[test]
    fn test_addic_carries_out_of_the_low_word() {
        let words = [asm(Opcode::Addic, &[3, 4, 1]), blr()];
        let state = run_function(&words, |eval| eval.state.gpr[4] = 0xFFFF_FFFF);
        assert_eq!(state.gpr[3], 0x1_0000_0000);
        assert_eq!(state.ca, 1);
    }

    #[test]
    fn test_cmpwi_negative_sets_lt() {
        let words = [asm(Opcode::Cmpi, &[0, 0, 5, 0]), blr()];
        let state = run_function(&words, |eval| eval.state.gpr[5] = u64::MAX);
        assert_eq!(state.cr[0], 0b1000);
    }

    #[rstest]
    #[case::equal(7, 7, cr::EQ)]
    #[case::less(1, 7, cr::LT)]
    #[case::greater(0xFFFF_FFFF, 7, cr::GT)]
    fn test_cmplw(#[case] a: u64, #[case] b: u64, #[case] expected: u64) {
        let words = [asm(Opcode::Cmpl, &[6, 0, 3, 4]), blr()];
        let state = run_function(&words, |eval| {
            eval.state.gpr[3] = a;
            eval.state.gpr[4] = b;
        });
        assert_eq!(state.cr[6], expected);
    }

    #[test]
    fn test_lis_ori_builds_a_constant() {
        let words = [asm(Opcode::Addis, &[3, 0, 0x8202]), asm(Opcode::Ori, &[3, 3, 0x1234]), blr()];
        let state = run_function(&words, |_| {});
        assert_eq!(state.gpr[3], 0xFFFF_FFFF_8202_1234);
    }

    #[test]
    fn test_subfc_and_subfe_chain_a_borrow() {
        // 64-bit subtraction split into words: (1:0) - (0:1)
        let words = [
            asm(Opcode::Subfc, &[3, 5, 4]),
            asm(Opcode::Subfe, &[6, 7, 8]),
            blr(),
        ];
        let state = run_function(&words, |eval| {
            eval.state.gpr[4] = 0;
            eval.state.gpr[5] = 1;
            eval.state.gpr[8] = 1;
            eval.state.gpr[7] = 0;
        });
        assert_eq!(state.gpr[3] & 0xFFFF_FFFF, 0xFFFF_FFFF);
        assert_eq!(state.gpr[6] & 0xFFFF_FFFF, 0);
        assert_eq!(state.ca, 1);
    }

    #[test]
    fn test_rlwinm_extracts_a_field() {
        // extrwi r3,r4,8,16
        let words = [asm(Opcode::Rlwinm, &[3, 4, 24, 24, 31]), blr()];
        let state = run_function(&words, |eval| eval.state.gpr[4] = 0x1234_5678);
        assert_eq!(state.gpr[3], 0x56);
    }

    #[test]
    fn test_rlwimi_inserts_into_the_destination() {
        // insrwi r3,r4,8,0
        let words = [asm(Opcode::Rlwimi, &[3, 4, 24, 0, 7]), blr()];
        let state = run_function(&words, |eval| {
            eval.state.gpr[3] = 0x0011_2233;
            eval.state.gpr[4] = 0xAB;
        });
        assert_eq!(state.gpr[3], 0xAB11_2233);
    }

    #[test]
    fn test_rldicr_clears_low_bits() {
        let words = [asm(Opcode::Rldicr, &[3, 4, 4, 55]), blr()];
        let state = run_function(&words, |eval| eval.state.gpr[4] = 0x0123_4567_89AB_CDEF);
        assert_eq!(state.gpr[3], 0x1234_5678_9ABC_DE00);
    }

    #[rstest]
    #[case::positive(0x10, 2, 0x4, 0)]
    #[case::negative_exact(0xFFFF_FFF0, 2, 0xFFFF_FFFF_FFFF_FFFC, 0)]
    #[case::negative_inexact(0xFFFF_FFF1, 2, 0xFFFF_FFFF_FFFF_FFFC, 1)]
    fn test_srawi_sets_carry_for_inexact_negatives(
        #[case] value: u64,
        #[case] shift: u32,
        #[case] expected: u64,
        #[case] carry: u64,
    ) {
        let words = [asm(Opcode::Srawi, &[3, 4, shift]), blr()];
        let state = run_function(&words, |eval| eval.state.gpr[4] = value);
        assert_eq!(state.gpr[3], expected);
        assert_eq!(state.ca, carry);
    }

    #[test]
    fn test_slw_by_32_or_more_is_zero() {
        let words = [asm(Opcode::Slw, &[3, 4, 5]), blr()];
        let state = run_function(&words, |eval| {
            eval.state.gpr[4] = 0xFFFF_FFFF;
            eval.state.gpr[5] = 32;
        });
        assert_eq!(state.gpr[3], 0);
    }

    #[test]
    fn test_record_form_updates_cr0() {
        let words = [li(4, 0), asm(Opcode::AndDot, &[3, 4, 4]), blr()];
        let state = run_function(&words, |_| {});
        assert_eq!(state.cr[0], cr::EQ);
    }

    #[test]
    fn test_mullw_sign_extends_operands() {
        let words = [asm(Opcode::Mullw, &[3, 4, 5]), blr()];
        let state = run_function(&words, |eval| {
            eval.state.gpr[4] = 0xFFFF_FFFF;
            eval.state.gpr[5] = 3;
        });
        assert_eq!(state.gpr[3], (-3i64) as u64);
    }

    #[test]
    fn test_divw_by_zero_is_zero() {
        let words = [asm(Opcode::Divw, &[3, 4, 5]), blr()];
        let state = run_function(&words, |eval| {
            eval.state.gpr[3] = 99;
            eval.state.gpr[4] = 10;
            eval.state.gpr[5] = 0;
        });
        assert_eq!(state.gpr[3], 0);
    }

    #[test]
    fn test_trap_word_equal_traps() {
        let words = [asm(Opcode::Twi, &[4, 3, 0]), blr()];
        let output = crate::emit::tests::recompile(&words);
        let mut eval = crate::ir::eval::Evaluator::new(&output.module);
        eval.state.gpr[3] = 0;
        assert!(eval.call(crate::testing::BASE).is_err());
    }
}
