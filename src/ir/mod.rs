//! The portable intermediate representation.
//!
//! Every translated function is a map of blocks keyed by the guest address
//! they start at. Blocks hold straight-line [`Op`]s over a fixed virtual
//! register file ([`Reg`]) and numbered temporaries, and end in one nested
//! [`Terminator`].
//!
//! All values are 64 bits wide. Width-typed operations truncate their inputs
//! to the width and zero-extend the result back to 64 bits; the one exception
//! is a 32-bit [`BinOp::RotL`], which replicates the rotated word into both
//! halves the way the guest's word rotates do.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::Address;

pub mod display;
pub mod eval;

/// Symbol of the generated entry trampoline.
pub const ENTRY_SYMBOL: &str = "xenon_entry";

/// Bits of a condition register field.
pub mod cr {
    pub const LT: u64 = 0b1000;
    pub const GT: u64 = 0b0100;
    pub const EQ: u64 = 0b0010;
    /// Summary overflow; never set by translated code
    pub const SO: u64 = 0b0001;
}

/// The virtual register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Reg {
    Gpr(u8),
    /// Floating-point register holding an `f64` bit pattern
    Fpr(u8),
    Lr,
    Ctr,
    Msr,
    /// XER carry bit, 0 or 1
    Ca,
    /// One 4-bit condition register field
    Cr(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
}

impl Width {
    pub const fn bits(self) -> u32 {
        match self {
            Width::W8 => 8,
            Width::W16 => 16,
            Width::W32 => 32,
            Width::W64 => 64,
        }
    }

    pub const fn bytes(self) -> u32 {
        self.bits() / 8
    }

    pub const fn mask(self) -> u64 {
        match self {
            Width::W64 => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }

    /// Zero-extend the low `self` bits of `value`.
    pub const fn truncate(self, value: u64) -> u64 {
        value & self.mask()
    }

    /// Sign-extend the low `self` bits of `value`.
    pub const fn sign_extend(self, value: u64) -> u64 {
        let shift = 64 - self.bits();
        (((value << shift) as i64) >> shift) as u64
    }
}

/// A function-local temporary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Temp(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Value {
    Temp(Temp),
    Const(u64),
}

impl Value {
    pub fn as_const(self) -> Option<u64> {
        match self {
            Value::Const(value) => Some(value),
            Value::Temp(_) => None,
        }
    }
}

impl From<Temp> for Value {
    fn from(temp: Temp) -> Self {
        Value::Temp(temp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// High half of the signed double-width product
    MulHighS,
    /// High half of the unsigned double-width product
    MulHighU,
    /// Signed division; zero divisors and overflow yield 0
    DivS,
    /// Unsigned division; zero divisors yield 0
    DivU,
    And,
    Or,
    Xor,
    /// Shifts by the width or more yield 0
    Shl,
    ShrU,
    /// Shifts by the width or more fill with the sign bit
    ShrS,
    RotL,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnOp {
    Not,
    Neg,
    /// Count leading zeros
    Clz,
    ByteSwap,
}

/// Comparisons produce 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CmpOp {
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExtKind {
    Sign,
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FloatOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FloatUnOp {
    Neg,
    Abs,
    NegAbs,
    Sqrt,
    /// `1 / x`
    Reciprocal,
    /// `1 / sqrt(x)`
    ReciprocalSqrt,
    /// Round to single precision, keeping the double encoding
    RoundSingle,
    /// `f32` bit pattern in the low word to `f64` bits
    FromSingleBits,
    /// `f64` bits to an `f32` bit pattern in the low word
    ToSingleBits,
    /// To a saturated `i32`, rounding to nearest
    ToInt32,
    ToInt32Trunc,
    ToInt64,
    ToInt64Trunc,
    /// Signed 64-bit integer to `f64` bits
    FromInt64,
}

/// `a * b op c` over `f64`, fused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FusedOp {
    MulAdd,
    MulSub,
    NegMulAdd,
    NegMulSub,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Op {
    /// Marks the guest instruction the following ops translate
    Location(Address),
    Get { dest: Temp, reg: Reg },
    Set { reg: Reg, value: Value },
    Binary { dest: Temp, op: BinOp, width: Width, lhs: Value, rhs: Value },
    Unary { dest: Temp, op: UnOp, width: Width, value: Value },
    Compare { dest: Temp, op: CmpOp, width: Width, lhs: Value, rhs: Value },
    /// Extend the low `from` bits of `value` to 64 bits
    Extend { dest: Temp, kind: ExtKind, from: Width, value: Value },
    Select { dest: Temp, cond: Value, if_true: Value, if_false: Value },
    /// Big-endian load, zero-extended; addresses are truncated to 32 bits
    Load { dest: Temp, width: Width, address: Value },
    Store { width: Width, address: Value, value: Value },
    Float { dest: Temp, op: FloatOp, lhs: Value, rhs: Value },
    FloatUnary { dest: Temp, op: FloatUnOp, value: Value },
    FloatFused { dest: Temp, op: FusedOp, a: Value, b: Value, c: Value },
    /// Condition register nibble for an `f64` comparison (unordered sets SO)
    FloatCompare { dest: Temp, lhs: Value, rhs: Value },
    Call { target: Address, symbol: String },
    /// Call through the runtime's address-to-function table
    CallIndirect { target: Value },
    Syscall,
    TrapIf { cond: Value },
    /// Guest code with no translation
    Unimplemented { address: Address, mnemonic: String },
}

/// One case of a [`Terminator::Switch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SwitchCase {
    pub value: u64,
    pub target: Address,
}

/// How control leaves a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Terminator {
    Jump(Address),
    If { cond: Value, then_: Box<Terminator>, else_: Box<Terminator> },
    Switch { value: Value, cases: Vec<SwitchCase>, default: Box<Terminator> },
    Return,
    /// Call `target` and return its result as our own
    TailCall { target: Address, symbol: String },
    IndirectTailCall { target: Value },
    Unreachable,
}

impl Terminator {
    /// Blocks of the current function this terminator can continue to.
    pub fn successors(&self) -> Vec<Address> {
        let mut out = Vec::new();
        self.collect_successors(&mut out);
        out
    }

    fn collect_successors(&self, out: &mut Vec<Address>) {
        match self {
            Terminator::Jump(target) => out.push(*target),
            Terminator::If { then_, else_, .. } => {
                then_.collect_successors(out);
                else_.collect_successors(out);
            }
            Terminator::Switch { cases, default, .. } => {
                out.extend(cases.iter().map(|case| case.target));
                default.collect_successors(out);
            }
            Terminator::Return
            | Terminator::TailCall { .. }
            | Terminator::IndirectTailCall { .. }
            | Terminator::Unreachable => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IrBlock {
    pub address: Address,
    pub ops: Vec<Op>,
    pub terminator: Terminator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Linkage {
    /// Has a body in this module
    Defined,
    /// Provided by the runtime (imports)
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IrFunction {
    pub address: Address,
    pub name: String,
    pub linkage: Linkage,
    /// Blocks keyed by entry address; the first one is the entry block
    pub blocks: BTreeMap<Address, IrBlock>,
    /// Number of temporaries used
    pub temps: u32,
}

impl IrFunction {
    pub fn external(address: Address, name: impl Into<String>) -> Self {
        Self { address, name: name.into(), linkage: Linkage::External, blocks: BTreeMap::new(), temps: 0 }
    }

    pub fn is_external(&self) -> bool {
        self.linkage == Linkage::External
    }

    pub fn entry_block(&self) -> Option<&IrBlock> {
        self.blocks.values().next()
    }

    pub fn op_count(&self) -> usize {
        self.blocks.values().map(|block| block.ops.len()).sum()
    }
}

/// One row of the table the runtime's indirect-call hook searches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportEntry {
    pub guest_address: Address,
    pub symbol: String,
}

/// A whole translated image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Module {
    functions: BTreeMap<Address, IrFunction>,
    pub entry_point: Address,
    trampoline: Option<IrFunction>,
}

impl Module {
    pub fn new(entry_point: Address) -> Self {
        Self { entry_point, ..Default::default() }
    }

    /// Add `function`, replacing any previous one at the same address.
    pub fn insert(&mut self, function: IrFunction) -> Option<IrFunction> {
        self.functions.insert(function.address, function)
    }

    pub fn get(&self, address: Address) -> Option<&IrFunction> {
        self.functions.get(&address)
    }

    pub fn functions(&self) -> impl Iterator<Item = &IrFunction> {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Defined functions by guest address.
    pub fn exports(&self) -> Vec<ExportEntry> {
        self.functions()
            .filter(|f| !f.is_external())
            .map(|f| ExportEntry { guest_address: f.address, symbol: f.name.clone() })
            .collect()
    }

    pub fn export_count(&self) -> usize {
        self.functions().filter(|f| !f.is_external()).count()
    }

    /// Build the trampoline that calls the function at the entry point.
    ///
    /// Returns `false` when no function was emitted there.
    pub fn build_trampoline(&mut self) -> bool {
        let Some(entry) = self.functions.get(&self.entry_point) else {
            self.trampoline = None;
            return false;
        };
        let block = IrBlock {
            address: self.entry_point,
            ops: vec![Op::Call { target: entry.address, symbol: entry.name.clone() }],
            terminator: Terminator::Return,
        };
        self.trampoline = Some(IrFunction {
            address: self.entry_point,
            name: ENTRY_SYMBOL.to_string(),
            linkage: Linkage::Defined,
            blocks: BTreeMap::from([(self.entry_point, block)]),
            temps: 0,
        });
        true
    }

    pub fn trampoline(&self) -> Option<&IrFunction> {
        self.trampoline.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defined(address: Address) -> IrFunction {
        let block = IrBlock { address, ops: Vec::new(), terminator: Terminator::Return };
        IrFunction {
            address,
            name: format!("sub_{:08X}", address),
            linkage: Linkage::Defined,
            blocks: BTreeMap::from([(address, block)]),
            temps: 0,
        }
    }

    #[test]
    fn test_width_extension() {
        assert_eq!(Width::W16.sign_extend(0x8000), 0xFFFF_FFFF_FFFF_8000);
        assert_eq!(Width::W32.sign_extend(0x7FFF_FFFF), 0x7FFF_FFFF);
        assert_eq!(Width::W8.truncate(0x1234), 0x34);
        assert_eq!(Width::W64.mask(), u64::MAX);
        assert_eq!(Width::W64.sign_extend(5), 5);
    }

    #[test]
    fn test_exports_skip_external_functions() {
        let mut module = Module::new(0x8200_0000);
        module.insert(defined(0x8200_0000));
        module.insert(defined(0x8200_0010));
        module.insert(IrFunction::external(0x8200_0100, "__imp__NtClose"));

        assert_eq!(module.len(), 3);
        assert_eq!(module.export_count(), 2);
        assert_eq!(
            module.exports()[1],
            ExportEntry { guest_address: 0x8200_0010, symbol: "sub_82000010".to_string() }
        );
    }

    #[test]
    fn test_trampoline_calls_entry() {
        let mut module = Module::new(0x8200_0010);
        assert!(!module.build_trampoline());
        module.insert(defined(0x8200_0010));
        assert!(module.build_trampoline());
        let trampoline = module.trampoline().unwrap();
        assert_eq!(trampoline.name, ENTRY_SYMBOL);
        assert_eq!(
            trampoline.entry_block().unwrap().ops,
            vec![Op::Call { target: 0x8200_0010, symbol: "sub_82000010".to_string() }]
        );
    }

    #[test]
    fn test_nested_successors() {
        let terminator = Terminator::If {
            cond: Value::Const(1),
            then_: Box::new(Terminator::Jump(0x10)),
            else_: Box::new(Terminator::Switch {
                value: Value::Temp(Temp(0)),
                cases: vec![SwitchCase { value: 0x20, target: 0x20 }],
                default: Box::new(Terminator::Unreachable),
            }),
        };
        assert_eq!(terminator.successors(), vec![0x10, 0x20]);
        assert!(Terminator::Return.successors().is_empty());
    }
}
