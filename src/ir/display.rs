//! Textual form of the IR, consumed by the native backend.

use std::fmt::{self, Display, Formatter};

use super::{
    BinOp, CmpOp, ExtKind, FloatOp, FloatUnOp, FusedOp, IrFunction, Linkage, Module, Op, Reg, Temp,
    Terminator, UnOp, Value, Width,
};

impl Display for Reg {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Reg::Gpr(n) => write!(f, "r{}", n),
            Reg::Fpr(n) => write!(f, "f{}", n),
            Reg::Lr => write!(f, "lr"),
            Reg::Ctr => write!(f, "ctr"),
            Reg::Msr => write!(f, "msr"),
            Reg::Ca => write!(f, "ca"),
            Reg::Cr(n) => write!(f, "cr{}", n),
        }
    }
}

impl Display for Width {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.bits())
    }
}

impl Display for Temp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Temp(temp) => temp.fmt(f),
            Value::Const(value) => write!(f, "0x{:x}", value),
        }
    }
}

fn binop_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::MulHighS => "mulhs",
        BinOp::MulHighU => "mulhu",
        BinOp::DivS => "divs",
        BinOp::DivU => "divu",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Xor => "xor",
        BinOp::Shl => "shl",
        BinOp::ShrU => "shru",
        BinOp::ShrS => "shrs",
        BinOp::RotL => "rotl",
    }
}

fn unop_name(op: UnOp) -> &'static str {
    match op {
        UnOp::Not => "not",
        UnOp::Neg => "neg",
        UnOp::Clz => "clz",
        UnOp::ByteSwap => "bswap",
    }
}

fn cmp_name(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "eq",
        CmpOp::Ne => "ne",
        CmpOp::LtS => "lts",
        CmpOp::LtU => "ltu",
        CmpOp::GtS => "gts",
        CmpOp::GtU => "gtu",
    }
}

fn float_name(op: FloatOp) -> &'static str {
    match op {
        FloatOp::Add => "fadd",
        FloatOp::Sub => "fsub",
        FloatOp::Mul => "fmul",
        FloatOp::Div => "fdiv",
    }
}

fn float_unary_name(op: FloatUnOp) -> &'static str {
    match op {
        FloatUnOp::Neg => "fneg",
        FloatUnOp::Abs => "fabs",
        FloatUnOp::NegAbs => "fnabs",
        FloatUnOp::Sqrt => "fsqrt",
        FloatUnOp::Reciprocal => "frecip",
        FloatUnOp::ReciprocalSqrt => "frsqrt",
        FloatUnOp::RoundSingle => "fround.single",
        FloatUnOp::FromSingleBits => "fext.single",
        FloatUnOp::ToSingleBits => "ftrunc.single",
        FloatUnOp::ToInt32 => "fcvt.i32",
        FloatUnOp::ToInt32Trunc => "fcvt.i32.trunc",
        FloatUnOp::ToInt64 => "fcvt.i64",
        FloatUnOp::ToInt64Trunc => "fcvt.i64.trunc",
        FloatUnOp::FromInt64 => "fcvt.from.i64",
    }
}

fn fused_name(op: FusedOp) -> &'static str {
    match op {
        FusedOp::MulAdd => "fmadd",
        FusedOp::MulSub => "fmsub",
        FusedOp::NegMulAdd => "fnmadd",
        FusedOp::NegMulSub => "fnmsub",
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Op::Location(address) => write!(f, "; 0x{:08x}", address),
            Op::Get { dest, reg } => write!(f, "{} = get {}", dest, reg),
            Op::Set { reg, value } => write!(f, "set {}, {}", reg, value),
            Op::Binary { dest, op, width, lhs, rhs } => {
                write!(f, "{} = {}.{} {}, {}", dest, binop_name(*op), width, lhs, rhs)
            }
            Op::Unary { dest, op, width, value } => write!(f, "{} = {}.{} {}", dest, unop_name(*op), width, value),
            Op::Compare { dest, op, width, lhs, rhs } => {
                write!(f, "{} = cmp.{}.{} {}, {}", dest, cmp_name(*op), width, lhs, rhs)
            }
            Op::Extend { dest, kind, from, value } => {
                let name = match kind {
                    ExtKind::Sign => "sext",
                    ExtKind::Zero => "zext",
                };
                write!(f, "{} = {}.{} {}", dest, name, from, value)
            }
            Op::Select { dest, cond, if_true, if_false } => {
                write!(f, "{} = select {}, {}, {}", dest, cond, if_true, if_false)
            }
            Op::Load { dest, width, address } => write!(f, "{} = load.{} [{}]", dest, width, address),
            Op::Store { width, address, value } => write!(f, "store.{} [{}], {}", width, address, value),
            Op::Float { dest, op, lhs, rhs } => write!(f, "{} = {} {}, {}", dest, float_name(*op), lhs, rhs),
            Op::FloatUnary { dest, op, value } => write!(f, "{} = {} {}", dest, float_unary_name(*op), value),
            Op::FloatFused { dest, op, a, b, c } => write!(f, "{} = {} {}, {}, {}", dest, fused_name(*op), a, b, c),
            Op::FloatCompare { dest, lhs, rhs } => write!(f, "{} = fcmp {}, {}", dest, lhs, rhs),
            Op::Call { symbol, .. } => write!(f, "call @{}", symbol),
            Op::CallIndirect { target } => write!(f, "call_indirect {}", target),
            Op::Syscall => write!(f, "syscall"),
            Op::TrapIf { cond } => write!(f, "trap_if {}", cond),
            Op::Unimplemented { address, mnemonic } => write!(f, "unimplemented {} ; 0x{:08x}", mnemonic, address),
        }
    }
}

fn write_terminator(f: &mut Formatter<'_>, terminator: &Terminator, indent: usize) -> fmt::Result {
    let pad = "  ".repeat(indent);
    match terminator {
        Terminator::Jump(target) => writeln!(f, "{}jump 0x{:08x}", pad, target),
        Terminator::If { cond, then_, else_ } => {
            writeln!(f, "{}if {} {{", pad, cond)?;
            write_terminator(f, then_, indent + 1)?;
            writeln!(f, "{}}} else {{", pad)?;
            write_terminator(f, else_, indent + 1)?;
            writeln!(f, "{}}}", pad)
        }
        Terminator::Switch { value, cases, default } => {
            writeln!(f, "{}switch {} {{", pad, value)?;
            for case in cases {
                writeln!(f, "{}  0x{:x} => jump 0x{:08x}", pad, case.value, case.target)?;
            }
            writeln!(f, "{}  default =>", pad)?;
            write_terminator(f, default, indent + 2)?;
            writeln!(f, "{}}}", pad)
        }
        Terminator::Return => writeln!(f, "{}return", pad),
        Terminator::TailCall { symbol, .. } => writeln!(f, "{}tail_call @{}", pad, symbol),
        Terminator::IndirectTailCall { target } => writeln!(f, "{}tail_call_indirect {}", pad, target),
        Terminator::Unreachable => writeln!(f, "{}unreachable", pad),
    }
}

impl Display for Terminator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_terminator(f, self, 0)
    }
}

impl Display for IrFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.linkage == Linkage::External {
            return writeln!(f, "declare @{} ; 0x{:08x}", self.name, self.address);
        }
        writeln!(f, "define @{} ; 0x{:08x} temps={}", self.name, self.address, self.temps)?;
        for block in self.blocks.values() {
            writeln!(f, "0x{:08x}:", block.address)?;
            for op in &block.ops {
                writeln!(f, "  {}", op)?;
            }
            write_terminator(f, &block.terminator, 1)?;
        }
        writeln!(f, "end")
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "module entry=0x{:08x} functions={}", self.entry_point, self.len())?;
        for function in self.functions() {
            writeln!(f)?;
            function.fmt(f)?;
        }
        if let Some(trampoline) = self.trampoline() {
            writeln!(f)?;
            trampoline.fmt(f)?;
        }
        writeln!(f)?;
        writeln!(f, "exports {}", self.export_count())?;
        for export in self.exports() {
            writeln!(f, "  0x{:08x} @{}", export.guest_address, export.symbol)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::ir::{IrBlock, SwitchCase};

    #[test]
    fn test_op_rendering() {
        let op = Op::Binary {
            dest: Temp(2),
            op: BinOp::Add,
            width: Width::W64,
            lhs: Value::Temp(Temp(1)),
            rhs: Value::Const(0x10),
        };
        assert_eq!(op.to_string(), "%2 = add.i64 %1, 0x10");
        assert_eq!(Op::Set { reg: Reg::Cr(6), value: Value::Const(2) }.to_string(), "set cr6, 0x2");
        assert_eq!(Op::Location(0x8200_0004).to_string(), "; 0x82000004");
    }

    #[test]
    fn test_nested_terminator_rendering() {
        let terminator = Terminator::If {
            cond: Value::Temp(Temp(3)),
            then_: Box::new(Terminator::Return),
            else_: Box::new(Terminator::Switch {
                value: Value::Temp(Temp(4)),
                cases: vec![SwitchCase { value: 0x8200_0010, target: 0x8200_0010 }],
                default: Box::new(Terminator::IndirectTailCall { target: Value::Temp(Temp(4)) }),
            }),
        };
        let expected = "\
if %3 {
  return
} else {
  switch %4 {
    0x82000010 => jump 0x82000010
    default =>
      tail_call_indirect %4
  }
}
";
        assert_eq!(terminator.to_string(), expected);
    }

    #[test]
    fn test_module_rendering_lists_exports() {
        let mut module = Module::new(0x8200_0000);
        let block = IrBlock { address: 0x8200_0000, ops: vec![Op::Syscall], terminator: Terminator::Return };
        module.insert(IrFunction {
            address: 0x8200_0000,
            name: "sub_82000000".into(),
            linkage: Linkage::Defined,
            blocks: BTreeMap::from([(0x8200_0000, block)]),
            temps: 0,
        });
        module.insert(IrFunction::external(0x8200_0100, "__imp__KeBugCheck"));
        module.build_trampoline();

        let text = module.to_string();
        assert!(text.contains("define @sub_82000000"));
        assert!(text.contains("declare @__imp__KeBugCheck ; 0x82000100"));
        assert!(text.contains("define @xenon_entry"));
        assert!(text.contains("exports 1\n  0x82000000 @sub_82000000"));
    }
}
