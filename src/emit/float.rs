//! Floating-point rules. FPRs hold doubles; single-precision results are
//! rounded through `f32` and kept widened.

use super::{Step, Translation, Translator};
use crate::ir::{cr, CmpOp, FloatOp, FloatUnOp, FusedOp, Value, Width};
use crate::Instruction;

impl Translator<'_> {
    fn round_if_single(&mut self, value: Value, single: bool) -> Value {
        if single {
            self.b.float_unary(FloatUnOp::RoundSingle, value)
        } else {
            value
        }
    }

    pub(super) fn float_arithmetic(&mut self, insn: &Instruction, op: FloatOp, single: bool) -> Translation {
        let a = self.fpr(insn.op(1));
        let b = self.fpr(insn.op(2));
        let result = self.b.float(op, a, b);
        let result = self.round_if_single(result, single);
        self.set_fpr(insn.op(0), result);
        Ok(Step::Continue)
    }

    /// `fmadd` family: operands `[frD, frA, frC, frB]`, computing `frA * frC ± frB`.
    pub(super) fn float_fused(&mut self, insn: &Instruction, op: FusedOp, single: bool) -> Translation {
        let a = self.fpr(insn.op(1));
        let c = self.fpr(insn.op(2));
        let b = self.fpr(insn.op(3));
        let result = self.b.float_fused(op, a, c, b);
        let result = self.round_if_single(result, single);
        self.set_fpr(insn.op(0), result);
        Ok(Step::Continue)
    }

    pub(super) fn float_unary(&mut self, insn: &Instruction, op: FloatUnOp, single: bool) -> Translation {
        let b = self.fpr(insn.op(1));
        let result = self.b.float_unary(op, b);
        let result = self.round_if_single(result, single);
        self.set_fpr(insn.op(0), result);
        Ok(Step::Continue)
    }

    pub(super) fn float_move(&mut self, insn: &Instruction) -> Translation {
        let b = self.fpr(insn.op(1));
        self.set_fpr(insn.op(0), b);
        Ok(Step::Continue)
    }

    /// `fsel`: `frA >= 0.0 ? frC : frB`; NaN selects `frB`.
    pub(super) fn float_select(&mut self, insn: &Instruction) -> Translation {
        let a = self.fpr(insn.op(1));
        let c = self.fpr(insn.op(2));
        let b = self.fpr(insn.op(3));
        let order = self.b.float_compare(a, Value::Const(0f64.to_bits()));
        let at_least_zero = self.b.and(order, Value::Const(cr::GT | cr::EQ));
        let cond = self.b.compare(CmpOp::Ne, Width::W64, at_least_zero, Value::Const(0));
        let result = self.b.select(cond, c, b);
        self.set_fpr(insn.op(0), result);
        Ok(Step::Continue)
    }

    /// `fcmpu`, `fcmpo`: unordered operands set the SO bit of the field.
    pub(super) fn float_compare(&mut self, insn: &Instruction) -> Translation {
        let a = self.fpr(insn.op(1));
        let b = self.fpr(insn.op(2));
        let order = self.b.float_compare(a, b);
        self.b.set(crate::ir::Reg::Cr(insn.op(0) as u8), order);
        Ok(Step::Continue)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::decoder::Opcode;
    use crate::emit::tests::run_function;
    use crate::ir::cr;
    use crate::testing::{asm, blr};

    #[test]
    fn test_fmadd_multiplies_a_by_c() {
        let words = [asm(Opcode::Fmadd, &[1, 2, 3, 4]), blr()];
        let state = run_function(&words, |eval| {
            eval.state.set_fpr_f64(2, 3.0);
            eval.state.set_fpr_f64(3, 4.0);
            eval.state.set_fpr_f64(4, 0.5);
        });
        assert_eq!(state.fpr_f64(1), 12.5);
    }

    #[test]
    fn test_single_precision_results_are_rounded() {
        let words = [asm(Opcode::Fdivs, &[1, 2, 3]), blr()];
        let state = run_function(&words, |eval| {
            eval.state.set_fpr_f64(2, 1.0);
            eval.state.set_fpr_f64(3, 3.0);
        });
        assert_eq!(state.fpr_f64(1), f64::from(1.0f32 / 3.0f32));
    }

    #[rstest]
    #[case::positive(2.0, 10.0)]
    #[case::zero(0.0, 10.0)]
    #[case::negative(-1.0, 20.0)]
    #[case::nan(f64::NAN, 20.0)]
    fn test_fsel(#[case] a: f64, #[case] expected: f64) {
        let words = [asm(Opcode::Fsel, &[1, 2, 3, 4]), blr()];
        let state = run_function(&words, |eval| {
            eval.state.set_fpr_f64(2, a);
            eval.state.set_fpr_f64(3, 10.0);
            eval.state.set_fpr_f64(4, 20.0);
        });
        assert_eq!(state.fpr_f64(1), expected);
    }

    #[rstest]
    #[case::less(1.0, 2.0, cr::LT)]
    #[case::equal(2.0, 2.0, cr::EQ)]
    #[case::unordered(f64::NAN, 2.0, cr::SO)]
    fn test_fcmpu(#[case] a: f64, #[case] b: f64, #[case] expected: u64) {
        let words = [asm(Opcode::Fcmpu, &[7, 1, 2]), blr()];
        let state = run_function(&words, |eval| {
            eval.state.set_fpr_f64(1, a);
            eval.state.set_fpr_f64(2, b);
        });
        assert_eq!(state.cr[7], expected);
    }

    #[test]
    fn test_fctiwz_truncates() {
        let words = [asm(Opcode::Fctiwz, &[1, 2]), blr()];
        let state = run_function(&words, |eval| eval.state.set_fpr_f64(2, -2.75));
        assert_eq!(state.fpr[1] as u32, (-2i32) as u32);
    }
}
