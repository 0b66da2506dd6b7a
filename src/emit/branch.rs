//! Control transfers: direct and conditional branches, calls, returns and
//! count-register dispatch.

use std::collections::BTreeSet;

use super::{Step, Translation, Translator};
use crate::ir::{BinOp, CmpOp, ExtKind, Op, Reg, SwitchCase, Terminator, Value, Width};
use crate::{bo_always, Instruction};

/// BO bits, most significant first.
const BO_IGNORE_CONDITION: u32 = 0x10;
const BO_CONDITION_TRUE: u32 = 0x08;
const BO_KEEP_CTR: u32 = 0x04;
const BO_CTR_ZERO: u32 = 0x02;

impl Translator<'_> {
    /// The BO/BI predicate, or `None` when the branch is always taken.
    ///
    /// Decrementing forms write the new CTR before it is tested.
    fn branch_condition(&mut self, bo: u32, bi: u32) -> Option<Value> {
        let mut cond = None;
        if bo & BO_KEEP_CTR == 0 {
            let ctr = self.b.get(Reg::Ctr);
            let ctr = self.b.binary(BinOp::Sub, Width::W64, ctr, Value::Const(1));
            self.b.set(Reg::Ctr, ctr);
            let op = if bo & BO_CTR_ZERO != 0 { CmpOp::Eq } else { CmpOp::Ne };
            cond = Some(self.b.compare(op, Width::W64, ctr, Value::Const(0)));
        }
        if bo & BO_IGNORE_CONDITION == 0 {
            let bit = self.cr_bit(bi);
            let expected = u64::from(bo & BO_CONDITION_TRUE != 0);
            let hit = self.b.compare(CmpOp::Eq, Width::W64, bit, Value::Const(expected));
            cond = Some(match cond {
                Some(ctr_ok) => self.b.and(ctr_ok, hit),
                None => hit,
            });
        }
        cond
    }

    /// Two-way exit: `taken` when `cond` holds, otherwise the next instruction.
    fn conditional_exit(&mut self, insn: &Instruction, cond: Option<Value>, taken: Terminator) -> Translation {
        let Some(cond) = cond else {
            return Ok(Step::Exit(taken));
        };
        let not_taken = self.fall_through(insn.next());
        Ok(Step::Exit(Terminator::If { cond, then_: Box::new(taken), else_: Box::new(not_taken) }))
    }

    fn direct_target(insn: &Instruction) -> Result<u32, super::UnsupportedFormError> {
        insn.branch_target().ok_or_else(|| super::UnsupportedFormError::new(insn))
    }

    fn call(&mut self, insn: &Instruction, target: u32) {
        self.b.set(Reg::Lr, Value::Const(u64::from(insn.next())));
        let symbol = self.symbol(target);
        self.b.push(Op::Call { target, symbol });
    }

    /// `b`, `ba`
    pub(super) fn branch(&mut self, insn: &Instruction) -> Translation {
        let target = Self::direct_target(insn)?;
        Ok(Step::Exit(self.goto(target)))
    }

    /// `bl`, `bla`. Execution resumes after the call; a call that ends the
    /// function continues through [`Translator::fall_through`].
    pub(super) fn branch_and_link(&mut self, insn: &Instruction) -> Translation {
        let target = Self::direct_target(insn)?;
        self.call(insn, target);
        Ok(Step::Continue)
    }

    /// `bc`, `bca`
    pub(super) fn branch_conditional(&mut self, insn: &Instruction) -> Translation {
        let target = Self::direct_target(insn)?;
        let cond = self.branch_condition(insn.op(0), insn.op(1));
        let taken = self.goto(target);
        self.conditional_exit(insn, cond, taken)
    }

    /// `bcl`, `bcla`. `bcl 20,31,$+4` only reads the PC into LR.
    pub(super) fn branch_conditional_and_link(&mut self, insn: &Instruction) -> Translation {
        let target = Self::direct_target(insn)?;
        if target == insn.next() {
            self.b.set(Reg::Lr, Value::Const(u64::from(insn.next())));
            return Ok(Step::Continue);
        }
        if !bo_always(insn.op(0)) {
            return Self::unsupported(insn);
        }
        self.call(insn, target);
        Ok(Step::Continue)
    }

    /// `blr` and its conditional forms.
    pub(super) fn branch_to_link_register(&mut self, insn: &Instruction) -> Translation {
        let cond = self.branch_condition(insn.op(0), insn.op(1));
        self.conditional_exit(insn, cond, Terminator::Return)
    }

    /// `blrl`
    pub(super) fn branch_to_link_register_and_link(&mut self, insn: &Instruction) -> Translation {
        if !bo_always(insn.op(0)) {
            return Self::unsupported(insn);
        }
        let target = self.b.get(Reg::Lr);
        self.b.set(Reg::Lr, Value::Const(u64::from(insn.next())));
        self.b.push(Op::CallIndirect { target });
        Ok(Step::Continue)
    }

    /// `bctr`: a switch over the resolved jump table, otherwise an indirect
    /// tail call through the runtime's dispatch hook.
    pub(super) fn branch_to_count_register(&mut self, insn: &Instruction) -> Translation {
        let ctr = self.b.get(Reg::Ctr);
        let dispatch = Terminator::IndirectTailCall { target: ctr };
        if !bo_always(insn.op(0)) {
            let cond = self.branch_condition(insn.op(0) | BO_KEEP_CTR, insn.op(1));
            return self.conditional_exit(insn, cond, dispatch);
        }
        let Some(table) = self.function.jump_table_at(insn.address) else {
            return Ok(Step::Exit(dispatch));
        };

        let targets: BTreeSet<u32> =
            table.cases().iter().copied().filter(|target| self.blocks.contains_key(target)).collect();
        let cases = targets.into_iter().map(|target| SwitchCase { value: u64::from(target), target }).collect();
        let value = self.b.extend(ExtKind::Zero, Width::W32, ctr);
        Ok(Step::Exit(Terminator::Switch { value, cases, default: Box::new(dispatch) }))
    }

    /// `bctrl`
    pub(super) fn branch_to_count_register_and_link(&mut self, insn: &Instruction) -> Translation {
        if !bo_always(insn.op(0)) {
            return Self::unsupported(insn);
        }
        let target = self.b.get(Reg::Ctr);
        self.b.set(Reg::Lr, Value::Const(u64::from(insn.next())));
        self.b.push(Op::CallIndirect { target });
        Ok(Step::Continue)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::decoder::Opcode;
    use crate::emit::tests::{recompile, run_function};
    use crate::ir::eval::{Evaluator, GuestMemory};
    use crate::ir::Terminator;
    use crate::testing::{asm, bc, bl, blr, li, ImageBuilder, BASE};
    use crate::{Recompiler, SectionFlags};

    #[test]
    fn test_bdnz_loop_runs_ctr_times() {
        let words = [
            li(4, 0),
            asm(Opcode::Mtspr, &[9, 3]), // mtctr r3
            asm(Opcode::Addi, &[4, 4, 2]),
            bc(BASE + 0xC, 16, 0, BASE + 8), // bdnz
            blr(),
        ];
        let state = run_function(&words, |eval| eval.state.gpr[3] = 5);
        assert_eq!(state.gpr[4], 10);
        assert_eq!(state.ctr, 0);
    }

    #[rstest]
    #[case::zero_returns_early(0, 0)]
    #[case::nonzero_falls_through(1, 7)]
    fn test_beqlr(#[case] input: u64, #[case] expected: u64) {
        let words = [
            asm(Opcode::Cmpi, &[0, 0, 3, 0]),
            asm(Opcode::Bclr, &[12, 2]), // beqlr
            li(3, 7),
            blr(),
        ];
        let state = run_function(&words, |eval| eval.state.gpr[3] = input);
        assert_eq!(state.gpr[3], expected);
    }

    #[test]
    fn test_bl_calls_and_resumes() {
        let words = [
            bl(BASE, BASE + 0x10),
            asm(Opcode::Addi, &[3, 3, 1]),
            blr(),
            0,
            li(3, 5),
            blr(),
        ];
        let state = run_function(&words, |_| {});
        assert_eq!(state.gpr[3], 6);
    }

    #[test]
    fn test_pc_get_sets_lr_only() {
        let words = [asm(Opcode::Bcl, &[20, 31, 4]), asm(Opcode::Mfspr, &[3, 8]), blr()];
        let state = run_function(&words, |_| {});
        assert_eq!(state.gpr[3], u64::from(BASE + 4));
    }

    #[test]
    fn test_bctr_without_table_is_an_indirect_tail_call() {
        let words = [asm(Opcode::Mtspr, &[9, 3]), asm(Opcode::Bcctr, &[20, 0])];
        let output = recompile(&words);
        let block = output.module.get(BASE).unwrap().entry_block().unwrap();
        assert!(matches!(block.terminator, Terminator::IndirectTailCall { .. }));
    }

    fn switch_image() -> crate::Image {
        let code = [
            asm(Opcode::Cmpli, &[0, 0, 3, 2]),       // 0x00 cmplwi r3,2
            bc(BASE + 4, 12, 1, BASE + 0x30),        // 0x04 bgt default
            asm(Opcode::Addis, &[11, 0, 0x8200]),    // 0x08 lis r11,table@ha
            asm(Opcode::Addi, &[11, 11, 0x100]),     // 0x0C addi r11,r11,table@l
            asm(Opcode::Rlwinm, &[0, 3, 2, 0, 29]),  // 0x10 slwi r0,r3,2
            asm(Opcode::Lwzx, &[0, 11, 0]),          // 0x14
            asm(Opcode::Mtspr, &[9, 0]),             // 0x18 mtctr r0
            asm(Opcode::Bcctr, &[20, 0]),            // 0x1C bctr
            li(4, 10),                               // 0x20 case 0
            blr(),
            li(4, 20),                               // 0x28 cases 1 and 2
            blr(),
            li(4, -1),                               // 0x30 default
            blr(),
        ];
        let table: Vec<u8> = [BASE + 0x20, BASE + 0x28, BASE + 0x28].iter().flat_map(|t| t.to_be_bytes()).collect();
        ImageBuilder::new(BASE, 0x200)
            .text(BASE, 0x40)
            .section(".rdata", BASE + 0x100, 0x10, SectionFlags::READ)
            .words(BASE, &code)
            .bytes(BASE + 0x100, &table)
            .entry(BASE)
            .build()
    }

    #[rstest]
    #[case::first(0, 10)]
    #[case::shared(2, 20)]
    #[case::out_of_range(5, u64::MAX)]
    fn test_jump_table_becomes_a_switch(#[case] index: u64, #[case] expected: u64) {
        let image = switch_image();
        let output = Recompiler::new(Default::default()).run(&image).unwrap();
        let function = output.module.get(BASE).unwrap();
        let Terminator::Switch { cases, .. } = &function.blocks[&(BASE + 8)].terminator else {
            panic!("expected a switch, got {:?}", function.blocks[&(BASE + 8)].terminator);
        };
        assert_eq!(cases.len(), 2);

        let mut eval = Evaluator::new(&output.module).with_memory(GuestMemory::from_image(&image));
        eval.state.gpr[3] = index;
        eval.call(BASE).unwrap();
        assert_eq!(eval.state.gpr[4], expected);
    }
}
