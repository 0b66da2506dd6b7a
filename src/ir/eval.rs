//! Reference evaluator for the IR.
//!
//! Runs translated functions against a [`MachineState`] and a sparse
//! [`GuestMemory`]. It exists to pin down the meaning of every [`Op`] and is
//! what the translation tests execute; it is not meant to be fast.

use std::collections::BTreeMap;

use super::{
    BinOp, CmpOp, ExtKind, FloatOp, FloatUnOp, FusedOp, IrFunction, Module, Op, Reg, Terminator, UnOp, Value,
    Width, cr,
};
use crate::{Address, Image};

const MAX_CALL_DEPTH: usize = 256;
const DEFAULT_STEP_LIMIT: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("no function at 0x{0:08x}")]
    UnknownFunction(Address),
    #[error("call to external function {0}")]
    ExternalCall(String),
    #[error("function 0x{function:08x} has no block 0x{block:08x}")]
    UnknownBlock { function: Address, block: Address },
    #[error("unimplemented {mnemonic} at 0x{address:08x}")]
    Unimplemented { address: Address, mnemonic: String },
    #[error("trap at 0x{0:08x}")]
    Trap(Address),
    #[error("reached unreachable code in block 0x{0:08x}")]
    Unreachable(Address),
    #[error("call depth exceeded")]
    CallDepth,
    #[error("step limit exceeded")]
    StepLimit,
}

/// Guest register state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineState {
    pub gpr: [u64; 32],
    pub fpr: [u64; 32],
    pub lr: u64,
    pub ctr: u64,
    pub msr: u64,
    pub ca: u64,
    pub cr: [u64; 8],
}

impl MachineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reg: Reg) -> u64 {
        match reg {
            Reg::Gpr(n) => self.gpr[n as usize & 31],
            Reg::Fpr(n) => self.fpr[n as usize & 31],
            Reg::Lr => self.lr,
            Reg::Ctr => self.ctr,
            Reg::Msr => self.msr,
            Reg::Ca => self.ca,
            Reg::Cr(n) => self.cr[n as usize & 7],
        }
    }

    pub fn set(&mut self, reg: Reg, value: u64) {
        match reg {
            Reg::Gpr(n) => self.gpr[n as usize & 31] = value,
            Reg::Fpr(n) => self.fpr[n as usize & 31] = value,
            Reg::Lr => self.lr = value,
            Reg::Ctr => self.ctr = value,
            Reg::Msr => self.msr = value,
            Reg::Ca => self.ca = value & 1,
            Reg::Cr(n) => self.cr[n as usize & 7] = value & 0xF,
        }
    }

    /// The condition register as the guest's `mfcr` sees it.
    pub fn cr_word(&self) -> u32 {
        self.cr.iter().fold(0, |word, field| (word << 4) | (*field as u32 & 0xF))
    }

    pub fn set_fpr_f64(&mut self, n: u8, value: f64) {
        self.set(Reg::Fpr(n), value.to_bits());
    }

    pub fn fpr_f64(&self, n: u8) -> f64 {
        f64::from_bits(self.get(Reg::Fpr(n)))
    }
}

/// Sparse byte-addressed guest memory; unwritten bytes read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestMemory {
    bytes: BTreeMap<Address, u8>,
}

impl GuestMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory initialised with every section of `image`.
    pub fn from_image(image: &Image) -> Self {
        let mut memory = Self::new();
        for section in &image.sections {
            memory.write_bytes(section.address, image.section_data(section));
        }
        memory
    }

    pub fn write_bytes(&mut self, address: Address, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            self.bytes.insert(address.wrapping_add(i as u32), *byte);
        }
    }

    pub fn load(&self, address: Address, width: Width) -> u64 {
        (0..width.bytes()).fold(0, |value, i| {
            let byte = self.bytes.get(&address.wrapping_add(i)).copied().unwrap_or(0);
            (value << 8) | u64::from(byte)
        })
    }

    pub fn store(&mut self, address: Address, width: Width, value: u64) {
        let bytes = width.bytes();
        for i in 0..bytes {
            let shift = 8 * (bytes - 1 - i);
            self.bytes.insert(address.wrapping_add(i), (value >> shift) as u8);
        }
    }
}

fn shift_amount(width: Width, rhs: u64) -> Option<u32> {
    u32::try_from(rhs).ok().filter(|&n| n < width.bits())
}

fn binary(op: BinOp, width: Width, lhs: u64, rhs: u64) -> u64 {
    let a = width.truncate(lhs);
    let b = width.truncate(rhs);
    let sa = width.sign_extend(a) as i64;
    let sb = width.sign_extend(b) as i64;
    let result = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::MulHighS => match width {
            Width::W64 => ((i128::from(sa) * i128::from(sb)) >> 64) as u64,
            _ => ((sa * sb) >> width.bits()) as u64,
        },
        BinOp::MulHighU => match width {
            Width::W64 => ((u128::from(a) * u128::from(b)) >> 64) as u64,
            _ => (a * b) >> width.bits(),
        },
        BinOp::DivS => {
            let min = width.sign_extend(1 << (width.bits() - 1)) as i64;
            if sb == 0 || (sb == -1 && sa == min) {
                0
            } else {
                (sa / sb) as u64
            }
        }
        BinOp::DivU => a.checked_div(b).unwrap_or(0),
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => shift_amount(width, rhs).map_or(0, |n| a << n),
        BinOp::ShrU => shift_amount(width, rhs).map_or(0, |n| a >> n),
        BinOp::ShrS => {
            let n = shift_amount(width, rhs).unwrap_or(width.bits() - 1);
            (sa >> n) as u64
        }
        BinOp::RotL => {
            let n = (rhs % u64::from(width.bits())) as u32;
            match width {
                Width::W64 => a.rotate_left(n),
                Width::W32 => {
                    let word = u64::from((a as u32).rotate_left(n));
                    return (word << 32) | word;
                }
                Width::W16 => u64::from((a as u16).rotate_left(n)),
                Width::W8 => u64::from((a as u8).rotate_left(n)),
            }
        }
    };
    width.truncate(result)
}

fn unary(op: UnOp, width: Width, value: u64) -> u64 {
    let a = width.truncate(value);
    let result = match op {
        UnOp::Not => !a,
        UnOp::Neg => a.wrapping_neg(),
        UnOp::Clz => u64::from(a.leading_zeros() - (64 - width.bits())),
        UnOp::ByteSwap => a.swap_bytes() >> (64 - width.bits()),
    };
    width.truncate(result)
}

fn compare(op: CmpOp, width: Width, lhs: u64, rhs: u64) -> u64 {
    let a = width.truncate(lhs);
    let b = width.truncate(rhs);
    let sa = width.sign_extend(a) as i64;
    let sb = width.sign_extend(b) as i64;
    let result = match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::LtS => sa < sb,
        CmpOp::LtU => a < b,
        CmpOp::GtS => sa > sb,
        CmpOp::GtU => a > b,
    };
    u64::from(result)
}

fn float(op: FloatOp, lhs: u64, rhs: u64) -> u64 {
    let (a, b) = (f64::from_bits(lhs), f64::from_bits(rhs));
    let result = match op {
        FloatOp::Add => a + b,
        FloatOp::Sub => a - b,
        FloatOp::Mul => a * b,
        FloatOp::Div => a / b,
    };
    result.to_bits()
}

fn float_unary(op: FloatUnOp, value: u64) -> u64 {
    let x = f64::from_bits(value);
    match op {
        FloatUnOp::Neg => (-x).to_bits(),
        FloatUnOp::Abs => x.abs().to_bits(),
        FloatUnOp::NegAbs => (-x.abs()).to_bits(),
        FloatUnOp::Sqrt => x.sqrt().to_bits(),
        FloatUnOp::Reciprocal => (1.0 / x).to_bits(),
        FloatUnOp::ReciprocalSqrt => (1.0 / x.sqrt()).to_bits(),
        FloatUnOp::RoundSingle => f64::from(x as f32).to_bits(),
        FloatUnOp::FromSingleBits => f64::from(f32::from_bits(value as u32)).to_bits(),
        FloatUnOp::ToSingleBits => u64::from((x as f32).to_bits()),
        FloatUnOp::ToInt32 => u64::from(x.round_ties_even() as i32 as u32),
        FloatUnOp::ToInt32Trunc => u64::from(x as i32 as u32),
        FloatUnOp::ToInt64 => x.round_ties_even() as i64 as u64,
        FloatUnOp::ToInt64Trunc => x as i64 as u64,
        FloatUnOp::FromInt64 => (value as i64 as f64).to_bits(),
    }
}

fn float_fused(op: FusedOp, a: u64, b: u64, c: u64) -> u64 {
    let (a, b, c) = (f64::from_bits(a), f64::from_bits(b), f64::from_bits(c));
    let result = match op {
        FusedOp::MulAdd => a.mul_add(b, c),
        FusedOp::MulSub => a.mul_add(b, -c),
        FusedOp::NegMulAdd => -a.mul_add(b, c),
        FusedOp::NegMulSub => -a.mul_add(b, -c),
    };
    result.to_bits()
}

fn float_compare(lhs: u64, rhs: u64) -> u64 {
    let (a, b) = (f64::from_bits(lhs), f64::from_bits(rhs));
    if a.is_nan() || b.is_nan() {
        cr::SO
    } else if a < b {
        cr::LT
    } else if a > b {
        cr::GT
    } else {
        cr::EQ
    }
}

/// Where a terminator sends control.
enum Exit {
    Block(Address),
    Return,
    Call(Address),
    CallIndirect(u64),
}

/// Executes functions of one [`Module`].
pub struct Evaluator<'m> {
    module: &'m Module,
    pub state: MachineState,
    pub memory: GuestMemory,
    /// Number of `sc` instructions executed
    pub syscalls: usize,
    step_limit: usize,
    steps: usize,
    depth: usize,
    /// Last guest instruction entered
    location: Address,
}

impl<'m> Evaluator<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            state: MachineState::new(),
            memory: GuestMemory::new(),
            syscalls: 0,
            step_limit: DEFAULT_STEP_LIMIT,
            steps: 0,
            depth: 0,
            location: 0,
        }
    }

    pub fn with_memory(mut self, memory: GuestMemory) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Run the function at `address` to completion.
    pub fn call(&mut self, address: Address) -> Result<(), EvalError> {
        let module = self.module;
        let function = module.get(address).ok_or(EvalError::UnknownFunction(address))?;
        if function.is_external() {
            return Err(EvalError::ExternalCall(function.name.clone()));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(EvalError::CallDepth);
        }
        self.depth += 1;
        let result = self.run(function);
        self.depth -= 1;
        result
    }

    /// Call through the runtime dispatch table.
    pub fn call_indirect(&mut self, target: u64) -> Result<(), EvalError> {
        self.call(target as u32)
    }

    fn run(&mut self, function: &'m IrFunction) -> Result<(), EvalError> {
        let mut temps = vec![0u64; function.temps as usize];
        let mut current = function.address;
        loop {
            let block = function
                .blocks
                .get(&current)
                .ok_or(EvalError::UnknownBlock { function: function.address, block: current })?;
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(EvalError::StepLimit);
            }
            for op in &block.ops {
                self.execute(op, &mut temps)?;
            }
            match self.terminate(&block.terminator, &temps, current)? {
                Exit::Block(next) => current = next,
                Exit::Return => return Ok(()),
                Exit::Call(target) => return self.call(target),
                Exit::CallIndirect(target) => return self.call_indirect(target),
            }
        }
    }

    fn value(temps: &[u64], value: &Value) -> u64 {
        match value {
            Value::Temp(temp) => temps.get(temp.0 as usize).copied().unwrap_or(0),
            Value::Const(value) => *value,
        }
    }

    fn execute(&mut self, op: &Op, temps: &mut Vec<u64>) -> Result<(), EvalError> {
        let v = |value: &Value| Self::value(temps.as_slice(), value);
        let (dest, result) = match op {
            Op::Location(address) => {
                self.location = *address;
                return Ok(());
            }
            Op::Get { dest, reg } => (dest, self.state.get(*reg)),
            Op::Set { reg, value } => {
                let value = v(value);
                self.state.set(*reg, value);
                return Ok(());
            }
            Op::Binary { dest, op, width, lhs, rhs } => (dest, binary(*op, *width, v(lhs), v(rhs))),
            Op::Unary { dest, op, width, value } => (dest, unary(*op, *width, v(value))),
            Op::Compare { dest, op, width, lhs, rhs } => (dest, compare(*op, *width, v(lhs), v(rhs))),
            Op::Extend { dest, kind, from, value } => {
                let value = match kind {
                    ExtKind::Sign => from.sign_extend(v(value)),
                    ExtKind::Zero => from.truncate(v(value)),
                };
                (dest, value)
            }
            Op::Select { dest, cond, if_true, if_false } => {
                (dest, if v(cond) != 0 { v(if_true) } else { v(if_false) })
            }
            Op::Load { dest, width, address } => (dest, self.memory.load(v(address) as u32, *width)),
            Op::Store { width, address, value } => {
                let (address, value) = (v(address) as u32, v(value));
                self.memory.store(address, *width, value);
                return Ok(());
            }
            Op::Float { dest, op, lhs, rhs } => (dest, float(*op, v(lhs), v(rhs))),
            Op::FloatUnary { dest, op, value } => (dest, float_unary(*op, v(value))),
            Op::FloatFused { dest, op, a, b, c } => (dest, float_fused(*op, v(a), v(b), v(c))),
            Op::FloatCompare { dest, lhs, rhs } => (dest, float_compare(v(lhs), v(rhs))),
            Op::Call { target, .. } => return self.call(*target),
            Op::CallIndirect { target } => {
                let target = v(target);
                return self.call_indirect(target);
            }
            Op::Syscall => {
                self.syscalls += 1;
                return Ok(());
            }
            Op::TrapIf { cond } => {
                return match v(cond) {
                    0 => Ok(()),
                    _ => Err(EvalError::Trap(self.location)),
                };
            }
            Op::Unimplemented { address, mnemonic } => {
                return Err(EvalError::Unimplemented { address: *address, mnemonic: mnemonic.clone() });
            }
        };
        let index = dest.0 as usize;
        if temps.len() <= index {
            temps.resize(index + 1, 0);
        }
        temps[index] = result;
        Ok(())
    }

    fn terminate(&self, terminator: &Terminator, temps: &[u64], block: Address) -> Result<Exit, EvalError> {
        Ok(match terminator {
            Terminator::Jump(target) => Exit::Block(*target),
            Terminator::If { cond, then_, else_ } => {
                let taken = if Self::value(temps, cond) != 0 { then_ } else { else_ };
                return self.terminate(taken, temps, block);
            }
            Terminator::Switch { value, cases, default } => {
                let value = Self::value(temps, value);
                match cases.iter().find(|case| case.value == value) {
                    Some(case) => Exit::Block(case.target),
                    None => return self.terminate(default, temps, block),
                }
            }
            Terminator::Return => Exit::Return,
            Terminator::TailCall { target, .. } => Exit::Call(*target),
            Terminator::IndirectTailCall { target } => Exit::CallIndirect(Self::value(temps, target)),
            Terminator::Unreachable => return Err(EvalError::Unreachable(block)),
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(BinOp::Add, Width::W32, 0xFFFF_FFFF, 1, 0)]
    #[case(BinOp::Sub, Width::W64, 0, 1, u64::MAX)]
    #[case(BinOp::MulHighU, Width::W32, 0xFFFF_FFFF, 2, 1)]
    #[case(BinOp::MulHighS, Width::W32, 0xFFFF_FFFF, 2, 0xFFFF_FFFF)]
    #[case(BinOp::DivS, Width::W32, 0xFFFF_FFF6, 3, 0xFFFF_FFFD)]
    #[case(BinOp::DivU, Width::W32, 10, 0, 0)]
    #[case(BinOp::DivS, Width::W32, 0x8000_0000, 0xFFFF_FFFF, 0)]
    #[case(BinOp::Shl, Width::W32, 1, 32, 0)]
    #[case(BinOp::ShrS, Width::W32, 0x8000_0000, 40, 0xFFFF_FFFF)]
    #[case(BinOp::ShrS, Width::W32, 0x8000_0000, 4, 0xF800_0000)]
    #[case(BinOp::RotL, Width::W32, 0x8000_0001, 1, 0x0000_0003_0000_0003)]
    #[case(BinOp::RotL, Width::W64, 0x8000_0000_0000_0001, 4, 0x18)]
    fn test_binary_semantics(
        #[case] op: BinOp,
        #[case] width: Width,
        #[case] lhs: u64,
        #[case] rhs: u64,
        #[case] expected: u64,
    ) {
        assert_eq!(binary(op, width, lhs, rhs), expected);
    }

    #[test]
    fn test_unary_semantics() {
        assert_eq!(unary(UnOp::Clz, Width::W32, 1), 31);
        assert_eq!(unary(UnOp::Clz, Width::W32, 0), 32);
        assert_eq!(unary(UnOp::Clz, Width::W64, 0xFFFF_FFFF), 32);
        assert_eq!(unary(UnOp::ByteSwap, Width::W16, 0x1234), 0x3412);
        assert_eq!(unary(UnOp::ByteSwap, Width::W32, 0x1122_3344), 0x4433_2211);
        assert_eq!(unary(UnOp::Not, Width::W32, 0), 0xFFFF_FFFF);
    }

    #[test]
    fn test_compare_is_width_aware() {
        assert_eq!(compare(CmpOp::LtS, Width::W32, 0xFFFF_FFFF, 0), 1);
        assert_eq!(compare(CmpOp::LtS, Width::W64, 0xFFFF_FFFF, 0), 0);
        assert_eq!(compare(CmpOp::GtU, Width::W32, 0x1_0000_0001, 0), 1);
    }

    #[test]
    fn test_float_semantics() {
        assert_eq!(float_compare(1.0f64.to_bits(), 2.0f64.to_bits()), cr::LT);
        assert_eq!(float_compare(f64::NAN.to_bits(), 0), cr::SO);
        let single = float_unary(FloatUnOp::FromSingleBits, u64::from(1.5f32.to_bits()));
        assert_eq!(f64::from_bits(single), 1.5);
        assert_eq!(float_unary(FloatUnOp::ToInt32Trunc, (-2.7f64).to_bits()), 0xFFFF_FFFE);
        assert_eq!(float_unary(FloatUnOp::ToInt32, 2.5f64.to_bits()), 2);
        let fused = float_fused(FusedOp::NegMulSub, 2.0f64.to_bits(), 3.0f64.to_bits(), 1.0f64.to_bits());
        assert_eq!(f64::from_bits(fused), -5.0);
    }

    #[test]
    fn test_memory_is_big_endian() {
        let mut memory = GuestMemory::new();
        memory.store(0x1000, Width::W32, 0x1122_3344);
        assert_eq!(memory.load(0x1000, Width::W16), 0x1122);
        assert_eq!(memory.load(0x1003, Width::W8), 0x44);
        assert_eq!(memory.load(0x2000, Width::W64), 0);
    }

    #[test]
    fn test_cr_word_packs_fields() {
        let mut state = MachineState::new();
        state.set(Reg::Cr(0), cr::LT);
        state.set(Reg::Cr(7), cr::EQ | 0x10);
        assert_eq!(state.cr_word(), 0x8000_0002);
    }

    #[test]
    fn test_unknown_function() {
        let module = Module::new(0);
        let mut evaluator = Evaluator::new(&module);
        assert_eq!(evaluator.call(0x100), Err(EvalError::UnknownFunction(0x100)));
    }
}
