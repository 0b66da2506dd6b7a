//! Appends IR operations and hands out temporaries.

use std::mem;

use crate::ir::{
    BinOp, CmpOp, ExtKind, FloatOp, FloatUnOp, FusedOp, Op, Reg, Temp, UnOp, Value, Width,
};

/// Builds the ops of one function, one block at a time.
///
/// Temporaries are numbered across the whole function.
#[derive(Debug, Default)]
pub struct FunctionBuilder {
    next_temp: u32,
    ops: Vec<Op>,
}

impl FunctionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Temporaries handed out so far.
    pub fn temps(&self) -> u32 {
        self.next_temp
    }

    /// Ops of the block being built; leaves the builder ready for the next one.
    pub fn take_ops(&mut self) -> Vec<Op> {
        mem::take(&mut self.ops)
    }

    pub fn push(&mut self, op: Op) {
        self.ops.push(op);
    }

    fn temp(&mut self) -> Temp {
        let temp = Temp(self.next_temp);
        self.next_temp += 1;
        temp
    }

    fn define(&mut self, build: impl FnOnce(Temp) -> Op) -> Value {
        let dest = self.temp();
        self.ops.push(build(dest));
        Value::Temp(dest)
    }

    pub fn get(&mut self, reg: Reg) -> Value {
        self.define(|dest| Op::Get { dest, reg })
    }

    pub fn set(&mut self, reg: Reg, value: Value) {
        self.ops.push(Op::Set { reg, value });
    }

    pub fn binary(&mut self, op: BinOp, width: Width, lhs: Value, rhs: Value) -> Value {
        self.define(|dest| Op::Binary { dest, op, width, lhs, rhs })
    }

    pub fn add(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinOp::Add, Width::W64, lhs, rhs)
    }

    pub fn and(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinOp::And, Width::W64, lhs, rhs)
    }

    pub fn or(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinOp::Or, Width::W64, lhs, rhs)
    }

    pub fn shl(&mut self, value: Value, amount: u32) -> Value {
        self.binary(BinOp::Shl, Width::W64, value, Value::Const(u64::from(amount)))
    }

    pub fn shr(&mut self, value: Value, amount: u32) -> Value {
        self.binary(BinOp::ShrU, Width::W64, value, Value::Const(u64::from(amount)))
    }

    pub fn unary(&mut self, op: UnOp, width: Width, value: Value) -> Value {
        self.define(|dest| Op::Unary { dest, op, width, value })
    }

    pub fn not(&mut self, width: Width, value: Value) -> Value {
        self.unary(UnOp::Not, width, value)
    }

    pub fn compare(&mut self, op: CmpOp, width: Width, lhs: Value, rhs: Value) -> Value {
        self.define(|dest| Op::Compare { dest, op, width, lhs, rhs })
    }

    pub fn extend(&mut self, kind: ExtKind, from: Width, value: Value) -> Value {
        self.define(|dest| Op::Extend { dest, kind, from, value })
    }

    pub fn select(&mut self, cond: Value, if_true: Value, if_false: Value) -> Value {
        self.define(|dest| Op::Select { dest, cond, if_true, if_false })
    }

    pub fn load(&mut self, width: Width, address: Value) -> Value {
        self.define(|dest| Op::Load { dest, width, address })
    }

    pub fn store(&mut self, width: Width, address: Value, value: Value) {
        self.ops.push(Op::Store { width, address, value });
    }

    pub fn float(&mut self, op: FloatOp, lhs: Value, rhs: Value) -> Value {
        self.define(|dest| Op::Float { dest, op, lhs, rhs })
    }

    pub fn float_unary(&mut self, op: FloatUnOp, value: Value) -> Value {
        self.define(|dest| Op::FloatUnary { dest, op, value })
    }

    pub fn float_fused(&mut self, op: FusedOp, a: Value, b: Value, c: Value) -> Value {
        self.define(|dest| Op::FloatFused { dest, op, a, b, c })
    }

    pub fn float_compare(&mut self, lhs: Value, rhs: Value) -> Value {
        self.define(|dest| Op::FloatCompare { dest, lhs, rhs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temps_are_function_wide() {
        let mut b = FunctionBuilder::new();
        let r3 = b.get(Reg::Gpr(3));
        let sum = b.add(r3, Value::Const(1));
        b.set(Reg::Gpr(3), sum);
        let first = b.take_ops();
        assert_eq!(first.len(), 3);
        assert_eq!(sum, Value::Temp(Temp(1)));

        let next = b.get(Reg::Lr);
        assert_eq!(next, Value::Temp(Temp(2)));
        assert_eq!(b.take_ops(), vec![Op::Get { dest: Temp(2), reg: Reg::Lr }]);
        assert_eq!(b.temps(), 3);
    }
}
