//! IR emission.
//!
//! Every bounded, not yet emitted function is split into basic blocks and
//! each instruction is translated by one arm of [`Translator::translate`], an
//! exhaustive match over [`Opcode`]. Instructions without a translation
//! become [`Op::Unimplemented`] markers plus an [`UnsupportedFormError`]
//! diagnostic; emission itself never fails.
//!
//! Emission only reads the frozen [`FunctionTable`] and [`InstructionStore`],
//! so function bodies are built in parallel and merged in address order.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::config::RecompilerConfig;
use crate::decoder::Opcode;
use crate::flow::{BoundaryRecoveryError, Function, FunctionFlags, FunctionTable};
use crate::ir::{cr, BinOp, IrBlock, IrFunction, Linkage, Module, Op, Reg, Terminator, Value, Width};
use crate::store::InstructionStore;
use crate::{Address, BasicBlock, Diagnostic, Image, Instruction, Report, INSTRUCTION_SIZE, NOP};

pub mod blocks;
pub mod builder;
mod branch;
mod float;
mod integer;
mod memory;
mod system;

use self::builder::FunctionBuilder;
use self::integer::{CarryForm, RotateMask};
use self::memory::Addressing;

/// An instruction decodes but has no translation rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no translation for {mnemonic} at 0x{address:08x}")]
pub struct UnsupportedFormError {
    pub address: Address,
    pub mnemonic: String,
}

impl UnsupportedFormError {
    pub fn new(insn: &Instruction) -> Self {
        Self { address: insn.address, mnemonic: insn.mnemonic().to_string() }
    }
}

/// What a translated instruction does to the block.
#[derive(Debug)]
pub(crate) enum Step {
    Continue,
    Exit(Terminator),
}

pub(crate) type Translation = Result<Step, UnsupportedFormError>;

/// Read-only inputs shared by every function being emitted.
#[derive(Clone, Copy)]
pub struct EmitContext<'a> {
    pub image: &'a Image,
    pub store: &'a InstructionStore,
    pub functions: &'a FunctionTable,
}

/// Everything one function's emission produces.
struct FunctionOutput {
    start: Address,
    function: IrFunction,
    blocks: BTreeMap<Address, BasicBlock>,
    diagnostics: Vec<Diagnostic>,
    incomplete: bool,
}

fn needs_emission(function: &Function) -> bool {
    function.is_bounded() && !function.is_import() && !function.flags.contains(FunctionFlags::EMISSION_DONE)
}

pub struct Emitter<'c> {
    config: &'c RecompilerConfig,
}

impl<'c> Emitter<'c> {
    pub fn new(config: &'c RecompilerConfig) -> Self {
        Self { config }
    }

    /// Translate every pending function of `functions` into a new module.
    pub fn emit_module(
        &self,
        image: &Image,
        store: &InstructionStore,
        functions: &mut FunctionTable,
        report: &mut Report,
    ) -> Module {
        let mut module = Module::new(image.entry_point);
        for import in functions.values().filter(|f| f.is_import()) {
            module.insert(IrFunction::external(import.start, import.name()));
        }

        let skipped = functions.values().filter(|f| !f.is_bounded()).count();
        if skipped > 0 {
            log::debug!("skipping {} unbounded functions", skipped);
        }

        let ctx = EmitContext { image, store, functions };
        let pending: Vec<&Function> = functions.values().filter(|f| needs_emission(f)).collect();
        let outputs: Vec<FunctionOutput> = if self.config.parallel_emission {
            pending.par_iter().map(|f| emit_function(&ctx, f)).collect()
        } else {
            pending.iter().map(|f| emit_function(&ctx, f)).collect()
        };

        for output in outputs {
            report.extend(output.diagnostics);
            if let Some(function) = functions.get_mut(output.start) {
                function.blocks = output.blocks;
                function.flags.insert(FunctionFlags::EMISSION_DONE);
                if output.incomplete {
                    function.flags.insert(FunctionFlags::INCOMPLETE);
                }
            }
            module.insert(output.function);
        }

        if !module.build_trampoline() {
            log::warn!("no function was emitted at the entry point 0x{:08x}", image.entry_point);
        }
        module
    }
}

fn emit_function(ctx: &EmitContext<'_>, function: &Function) -> FunctionOutput {
    let blocks = blocks::discover(function, ctx.store);
    let mut translator = Translator::new(ctx, function, &blocks);
    let ir_blocks: BTreeMap<Address, IrBlock> =
        blocks.values().map(|block| (block.address, translator.block(block))).collect();
    log::debug!("{}: {} blocks", function.name(), ir_blocks.len());

    FunctionOutput {
        start: function.start,
        function: IrFunction {
            address: function.start,
            name: function.name(),
            linkage: Linkage::Defined,
            blocks: ir_blocks,
            temps: translator.b.temps(),
        },
        diagnostics: translator.diagnostics,
        incomplete: translator.incomplete,
        blocks,
    }
}

/// `mb..=me` in big-endian bit numbering, wrapping when `mb > me`.
pub(crate) fn mask64(mb: u32, me: u32) -> u64 {
    let begin = u64::MAX >> mb;
    let end = u64::MAX << (63 - me);
    if mb <= me {
        begin & end
    } else {
        begin | end
    }
}

/// Translates the instructions of one function.
pub(crate) struct Translator<'a> {
    ctx: &'a EmitContext<'a>,
    function: &'a Function,
    blocks: &'a BTreeMap<Address, BasicBlock>,
    b: FunctionBuilder,
    diagnostics: Vec<Diagnostic>,
    incomplete: bool,
}

impl<'a> Translator<'a> {
    fn new(ctx: &'a EmitContext<'a>, function: &'a Function, blocks: &'a BTreeMap<Address, BasicBlock>) -> Self {
        Self { ctx, function, blocks, b: FunctionBuilder::new(), diagnostics: Vec::new(), incomplete: false }
    }

    fn block(&mut self, block: &BasicBlock) -> IrBlock {
        let mut terminator = None;
        let mut address = block.address;
        while address <= block.end {
            self.b.push(Op::Location(address));
            match self.ctx.store.get(address) {
                None => self.missing(address),
                Some(insn) => match self.translate(insn) {
                    Ok(Step::Continue) => {}
                    Ok(Step::Exit(exit)) => {
                        terminator = Some(exit);
                        break;
                    }
                    Err(err) => {
                        self.b.push(Op::Unimplemented { address, mnemonic: err.mnemonic.clone() });
                        self.diagnostics.push(err.into());
                    }
                },
            }
            address += INSTRUCTION_SIZE;
        }
        let terminator = match terminator {
            Some(terminator) => terminator,
            None => self.fall_through(block.end + INSTRUCTION_SIZE),
        };
        IrBlock { address: block.address, ops: self.b.take_ops(), terminator }
    }

    /// An undecodable word inside the function; already reported by the store.
    fn missing(&mut self, address: Address) {
        let word = self.ctx.store.word(address).unwrap_or(0);
        self.b.push(Op::Unimplemented { address, mnemonic: format!(".long 0x{:08x}", word) });
        self.incomplete = true;
    }

    fn symbol(&self, target: Address) -> String {
        self.ctx
            .functions
            .get(target)
            .map_or_else(|| format!("sub_{:08X}", target), |f| f.name())
    }

    /// Continue at `target`: a local jump, or a tail call when it leaves the function.
    fn goto(&self, target: Address) -> Terminator {
        if self.blocks.contains_key(&target) {
            Terminator::Jump(target)
        } else {
            Terminator::TailCall { target, symbol: self.symbol(target) }
        }
    }

    /// Control reaches `next` without a branch.
    fn fall_through(&mut self, next: Address) -> Terminator {
        if self.blocks.contains_key(&next) {
            return Terminator::Jump(next);
        }
        let resume = self.ctx.store.skip_padding(next);
        if let Some(callee) = self.ctx.functions.get(resume) {
            return Terminator::TailCall { target: resume, symbol: callee.name() };
        }
        self.diagnostics.push(
            BoundaryRecoveryError::new(self.function.start, format!("control falls off the end at 0x{:08x}", next))
                .into(),
        );
        Terminator::Unreachable
    }

    fn gpr(&mut self, n: u32) -> Value {
        self.b.get(Reg::Gpr(n as u8))
    }

    /// `rA|0` addressing: register 0 reads as zero.
    fn gpr_or_zero(&mut self, n: u32) -> Value {
        match n {
            0 => Value::Const(0),
            _ => self.gpr(n),
        }
    }

    fn set_gpr(&mut self, n: u32, value: Value) {
        self.b.set(Reg::Gpr(n as u8), value);
    }

    fn fpr(&mut self, n: u32) -> Value {
        self.b.get(Reg::Fpr(n as u8))
    }

    fn set_fpr(&mut self, n: u32, value: Value) {
        self.b.set(Reg::Fpr(n as u8), value);
    }

    /// Write the LT/GT/EQ nibble of `lhs` against `rhs` into CR field `field`.
    /// SO is always written as 0.
    fn compare_into_cr(&mut self, field: u32, lhs: Value, rhs: Value, width: Width, signed: bool) {
        use crate::ir::CmpOp;
        let (lt, gt) = if signed { (CmpOp::LtS, CmpOp::GtS) } else { (CmpOp::LtU, CmpOp::GtU) };
        let lt = self.b.compare(lt, width, lhs, rhs);
        let gt = self.b.compare(gt, width, lhs, rhs);
        let eq = self.b.compare(CmpOp::Eq, width, lhs, rhs);
        let lt = self.b.shl(lt, cr::LT.trailing_zeros());
        let gt = self.b.shl(gt, cr::GT.trailing_zeros());
        let eq = self.b.shl(eq, cr::EQ.trailing_zeros());
        let nibble = self.b.or(lt, gt);
        let nibble = self.b.or(nibble, eq);
        self.b.set(Reg::Cr(field as u8), nibble);
    }

    /// CR0 update of record (`.`) forms.
    fn record(&mut self, insn: &Instruction, result: Value, width: Width) {
        if insn.opcode.is_record() {
            self.compare_into_cr(0, result, Value::Const(0), width, true);
        }
    }

    /// Condition register bit `bit` (0 = CR0[LT]) as 0 or 1.
    fn cr_bit(&mut self, bit: u32) -> Value {
        let field = self.b.get(Reg::Cr((bit / 4) as u8));
        let shifted = self.b.shr(field, 3 - bit % 4);
        self.b.and(shifted, Value::Const(1))
    }

    fn set_cr_bit(&mut self, bit: u32, value: Value) {
        let shift = 3 - bit % 4;
        let reg = Reg::Cr((bit / 4) as u8);
        let field = self.b.get(reg);
        let cleared = self.b.and(field, Value::Const(!(1u64 << shift) & 0xF));
        let value = self.b.and(value, Value::Const(1));
        let value = self.b.shl(value, shift);
        let field = self.b.or(cleared, value);
        self.b.set(reg, field);
    }

    fn unsupported(insn: &Instruction) -> Translation {
        Err(UnsupportedFormError::new(insn))
    }

    /// Dispatch one instruction to its translation rule.
    fn translate(&mut self, insn: &Instruction) -> Translation {
        use Addressing::{Displacement, Indexed};
        use Width::{W16, W32, W64, W8};

        match insn.opcode {
            // Integer arithmetic
            Opcode::Addi => self.add_immediate(insn, false),
            Opcode::Addis => self.add_immediate(insn, true),
            Opcode::Addic | Opcode::AddicDot => self.add_carrying_immediate(insn),
            Opcode::Subfic => self.extended_add(insn, CarryForm::SubtractFromImmediate),
            Opcode::Mulli => self.multiply_immediate(insn),
            Opcode::Add | Opcode::AddDot => self.arithmetic(insn, BinOp::Add, W64, false),
            Opcode::Subf | Opcode::SubfDot => self.arithmetic(insn, BinOp::Sub, W64, true),
            Opcode::Addc | Opcode::AddcDot => self.add_carrying(insn),
            Opcode::Subfc | Opcode::SubfcDot => self.extended_add(insn, CarryForm::SubtractFrom),
            Opcode::Adde | Opcode::AddeDot => self.extended_add(insn, CarryForm::Add),
            Opcode::Subfe | Opcode::SubfeDot => self.extended_add(insn, CarryForm::Subtract),
            Opcode::Addze | Opcode::AddzeDot => self.extended_add(insn, CarryForm::AddZero),
            Opcode::Subfze | Opcode::SubfzeDot => self.extended_add(insn, CarryForm::SubtractZero),
            Opcode::Addme | Opcode::AddmeDot => self.extended_add(insn, CarryForm::AddMinusOne),
            Opcode::Subfme | Opcode::SubfmeDot => self.extended_add(insn, CarryForm::SubtractMinusOne),
            Opcode::Neg | Opcode::NegDot => self.negate(insn),
            Opcode::Mullw | Opcode::MullwDot => self.multiply_word(insn),
            Opcode::Mulld | Opcode::MulldDot => self.arithmetic(insn, BinOp::Mul, W64, false),
            Opcode::Mulhw | Opcode::MulhwDot => self.arithmetic(insn, BinOp::MulHighS, W32, false),
            Opcode::Mulhwu | Opcode::MulhwuDot => self.arithmetic(insn, BinOp::MulHighU, W32, false),
            Opcode::Mulhd => self.arithmetic(insn, BinOp::MulHighS, W64, false),
            Opcode::Mulhdu => self.arithmetic(insn, BinOp::MulHighU, W64, false),
            Opcode::Divw | Opcode::DivwDot => self.arithmetic(insn, BinOp::DivS, W32, false),
            Opcode::Divwu | Opcode::DivwuDot => self.arithmetic(insn, BinOp::DivU, W32, false),
            Opcode::Divd => self.arithmetic(insn, BinOp::DivS, W64, false),
            Opcode::Divdu => self.arithmetic(insn, BinOp::DivU, W64, false),

            // Compares and traps
            Opcode::Cmpi => self.compare_immediate(insn, true),
            Opcode::Cmpli => self.compare_immediate(insn, false),
            Opcode::Cmp => self.compare_registers(insn, true),
            Opcode::Cmpl => self.compare_registers(insn, false),
            Opcode::Twi => self.trap(insn, W32, true),
            Opcode::Tdi => self.trap(insn, W64, true),
            Opcode::Tw => self.trap(insn, W32, false),
            Opcode::Td => self.trap(insn, W64, false),

            // Logical
            Opcode::Ori if insn.word == NOP => Ok(Step::Continue),
            Opcode::Ori => self.logical_immediate(insn, BinOp::Or, false),
            Opcode::Oris => self.logical_immediate(insn, BinOp::Or, true),
            Opcode::Xori => self.logical_immediate(insn, BinOp::Xor, false),
            Opcode::Xoris => self.logical_immediate(insn, BinOp::Xor, true),
            Opcode::AndiDot => self.logical_immediate(insn, BinOp::And, false),
            Opcode::AndisDot => self.logical_immediate(insn, BinOp::And, true),
            Opcode::And | Opcode::AndDot => self.logical(insn, BinOp::And, false, false),
            Opcode::Andc | Opcode::AndcDot => self.logical(insn, BinOp::And, true, false),
            Opcode::Or | Opcode::OrDot => self.logical(insn, BinOp::Or, false, false),
            Opcode::Orc | Opcode::OrcDot => self.logical(insn, BinOp::Or, true, false),
            Opcode::Xor | Opcode::XorDot => self.logical(insn, BinOp::Xor, false, false),
            Opcode::Nor | Opcode::NorDot => self.logical(insn, BinOp::Or, false, true),
            Opcode::Nand | Opcode::NandDot => self.logical(insn, BinOp::And, false, true),
            Opcode::Eqv | Opcode::EqvDot => self.logical(insn, BinOp::Xor, false, true),
            Opcode::Extsb | Opcode::ExtsbDot => self.extend_sign(insn, W8),
            Opcode::Extsh | Opcode::ExtshDot => self.extend_sign(insn, W16),
            Opcode::Extsw | Opcode::ExtswDot => self.extend_sign(insn, W32),
            Opcode::Cntlzw | Opcode::CntlzwDot => self.count_leading_zeros(insn, W32),
            Opcode::Cntlzd => self.count_leading_zeros(insn, W64),

            // Shifts and rotates
            Opcode::Slw | Opcode::SlwDot => self.shift(insn, BinOp::Shl, W32),
            Opcode::Srw | Opcode::SrwDot => self.shift(insn, BinOp::ShrU, W32),
            Opcode::Sld | Opcode::SldDot => self.shift(insn, BinOp::Shl, W64),
            Opcode::Srd | Opcode::SrdDot => self.shift(insn, BinOp::ShrU, W64),
            Opcode::Sraw | Opcode::SrawDot => self.shift_algebraic(insn, W32, false),
            Opcode::Srad | Opcode::SradDot => self.shift_algebraic(insn, W64, false),
            Opcode::Srawi | Opcode::SrawiDot => self.shift_algebraic(insn, W32, true),
            Opcode::Sradi | Opcode::SradiDot => self.shift_algebraic(insn, W64, true),
            Opcode::Rlwinm | Opcode::RlwinmDot => self.rotate_word(insn, false, false),
            Opcode::Rlwnm | Opcode::RlwnmDot => self.rotate_word(insn, true, false),
            Opcode::Rlwimi | Opcode::RlwimiDot => self.rotate_word(insn, false, true),
            Opcode::Rldicl | Opcode::RldiclDot => self.rotate_double(insn, RotateMask::ClearLeft, false, false),
            Opcode::Rldicr | Opcode::RldicrDot => self.rotate_double(insn, RotateMask::ClearRight, false, false),
            Opcode::Rldic | Opcode::RldicDot => self.rotate_double(insn, RotateMask::Clear, false, false),
            Opcode::Rldimi | Opcode::RldimiDot => self.rotate_double(insn, RotateMask::Clear, false, true),
            Opcode::Rldcl => self.rotate_double(insn, RotateMask::ClearLeft, true, false),
            Opcode::Rldcr => self.rotate_double(insn, RotateMask::ClearRight, true, false),

            // Integer loads and stores
            Opcode::Lbz => self.load(insn, W8, false, Displacement, false),
            Opcode::Lbzu => self.load(insn, W8, false, Displacement, true),
            Opcode::Lbzx => self.load(insn, W8, false, Indexed, false),
            Opcode::Lbzux => self.load(insn, W8, false, Indexed, true),
            Opcode::Lhz => self.load(insn, W16, false, Displacement, false),
            Opcode::Lhzu => self.load(insn, W16, false, Displacement, true),
            Opcode::Lhzx => self.load(insn, W16, false, Indexed, false),
            Opcode::Lhzux => self.load(insn, W16, false, Indexed, true),
            Opcode::Lha => self.load(insn, W16, true, Displacement, false),
            Opcode::Lhau => self.load(insn, W16, true, Displacement, true),
            Opcode::Lhax => self.load(insn, W16, true, Indexed, false),
            Opcode::Lhaux => self.load(insn, W16, true, Indexed, true),
            Opcode::Lwz => self.load(insn, W32, false, Displacement, false),
            Opcode::Lwzu => self.load(insn, W32, false, Displacement, true),
            Opcode::Lwzx => self.load(insn, W32, false, Indexed, false),
            Opcode::Lwzux => self.load(insn, W32, false, Indexed, true),
            Opcode::Lwa => self.load(insn, W32, true, Displacement, false),
            Opcode::Lwax => self.load(insn, W32, true, Indexed, false),
            Opcode::Lwaux => self.load(insn, W32, true, Indexed, true),
            Opcode::Ld => self.load(insn, W64, false, Displacement, false),
            Opcode::Ldu => self.load(insn, W64, false, Displacement, true),
            Opcode::Ldx => self.load(insn, W64, false, Indexed, false),
            Opcode::Ldux => self.load(insn, W64, false, Indexed, true),
            Opcode::Lwarx => self.load(insn, W32, false, Indexed, false),
            Opcode::Ldarx => self.load(insn, W64, false, Indexed, false),
            Opcode::Lhbrx => self.load_reversed(insn, W16),
            Opcode::Lwbrx => self.load_reversed(insn, W32),
            Opcode::Lmw => self.load_multiple(insn),
            Opcode::Stb => self.store(insn, W8, Displacement, false),
            Opcode::Stbu => self.store(insn, W8, Displacement, true),
            Opcode::Stbx => self.store(insn, W8, Indexed, false),
            Opcode::Stbux => self.store(insn, W8, Indexed, true),
            Opcode::Sth => self.store(insn, W16, Displacement, false),
            Opcode::Sthu => self.store(insn, W16, Displacement, true),
            Opcode::Sthx => self.store(insn, W16, Indexed, false),
            Opcode::Sthux => self.store(insn, W16, Indexed, true),
            Opcode::Stw => self.store(insn, W32, Displacement, false),
            Opcode::Stwu => self.store(insn, W32, Displacement, true),
            Opcode::Stwx => self.store(insn, W32, Indexed, false),
            Opcode::Stwux => self.store(insn, W32, Indexed, true),
            Opcode::Std => self.store(insn, W64, Displacement, false),
            Opcode::Stdu => self.store(insn, W64, Displacement, true),
            Opcode::Stdx => self.store(insn, W64, Indexed, false),
            Opcode::Stdux => self.store(insn, W64, Indexed, true),
            Opcode::StwcxDot => self.store_conditional(insn, W32),
            Opcode::StdcxDot => self.store_conditional(insn, W64),
            Opcode::Sthbrx => self.store_reversed(insn, W16),
            Opcode::Stwbrx => self.store_reversed(insn, W32),
            Opcode::Stmw => self.store_multiple(insn),

            // Floating-point loads and stores
            Opcode::Lfs => self.load_float(insn, true, Displacement, false),
            Opcode::Lfsu => self.load_float(insn, true, Displacement, true),
            Opcode::Lfsx => self.load_float(insn, true, Indexed, false),
            Opcode::Lfsux => self.load_float(insn, true, Indexed, true),
            Opcode::Lfd => self.load_float(insn, false, Displacement, false),
            Opcode::Lfdu => self.load_float(insn, false, Displacement, true),
            Opcode::Lfdx => self.load_float(insn, false, Indexed, false),
            Opcode::Lfdux => self.load_float(insn, false, Indexed, true),
            Opcode::Stfs => self.store_float(insn, true, Displacement, false),
            Opcode::Stfsu => self.store_float(insn, true, Displacement, true),
            Opcode::Stfsx => self.store_float(insn, true, Indexed, false),
            Opcode::Stfsux => self.store_float(insn, true, Indexed, true),
            Opcode::Stfd => self.store_float(insn, false, Displacement, false),
            Opcode::Stfdu => self.store_float(insn, false, Displacement, true),
            Opcode::Stfdx => self.store_float(insn, false, Indexed, false),
            Opcode::Stfdux => self.store_float(insn, false, Indexed, true),
            Opcode::Stfiwx => self.store_float_word(insn),

            // Floating-point arithmetic
            Opcode::Fadd => self.float_arithmetic(insn, crate::ir::FloatOp::Add, false),
            Opcode::Fadds => self.float_arithmetic(insn, crate::ir::FloatOp::Add, true),
            Opcode::Fsub => self.float_arithmetic(insn, crate::ir::FloatOp::Sub, false),
            Opcode::Fsubs => self.float_arithmetic(insn, crate::ir::FloatOp::Sub, true),
            Opcode::Fmul => self.float_arithmetic(insn, crate::ir::FloatOp::Mul, false),
            Opcode::Fmuls => self.float_arithmetic(insn, crate::ir::FloatOp::Mul, true),
            Opcode::Fdiv => self.float_arithmetic(insn, crate::ir::FloatOp::Div, false),
            Opcode::Fdivs => self.float_arithmetic(insn, crate::ir::FloatOp::Div, true),
            Opcode::Fmadd => self.float_fused(insn, crate::ir::FusedOp::MulAdd, false),
            Opcode::Fmadds => self.float_fused(insn, crate::ir::FusedOp::MulAdd, true),
            Opcode::Fmsub => self.float_fused(insn, crate::ir::FusedOp::MulSub, false),
            Opcode::Fmsubs => self.float_fused(insn, crate::ir::FusedOp::MulSub, true),
            Opcode::Fnmadd => self.float_fused(insn, crate::ir::FusedOp::NegMulAdd, false),
            Opcode::Fnmadds => self.float_fused(insn, crate::ir::FusedOp::NegMulAdd, true),
            Opcode::Fnmsub => self.float_fused(insn, crate::ir::FusedOp::NegMulSub, false),
            Opcode::Fnmsubs => self.float_fused(insn, crate::ir::FusedOp::NegMulSub, true),
            Opcode::Fsqrt => self.float_unary(insn, crate::ir::FloatUnOp::Sqrt, false),
            Opcode::Fsqrts => self.float_unary(insn, crate::ir::FloatUnOp::Sqrt, true),
            Opcode::Fres => self.float_unary(insn, crate::ir::FloatUnOp::Reciprocal, true),
            Opcode::Frsqrte => self.float_unary(insn, crate::ir::FloatUnOp::ReciprocalSqrt, false),
            Opcode::Fneg => self.float_unary(insn, crate::ir::FloatUnOp::Neg, false),
            Opcode::Fabs => self.float_unary(insn, crate::ir::FloatUnOp::Abs, false),
            Opcode::Fnabs => self.float_unary(insn, crate::ir::FloatUnOp::NegAbs, false),
            Opcode::Frsp => self.float_unary(insn, crate::ir::FloatUnOp::RoundSingle, false),
            Opcode::Fctiw => self.float_unary(insn, crate::ir::FloatUnOp::ToInt32, false),
            Opcode::Fctiwz => self.float_unary(insn, crate::ir::FloatUnOp::ToInt32Trunc, false),
            Opcode::Fctid => self.float_unary(insn, crate::ir::FloatUnOp::ToInt64, false),
            Opcode::Fctidz => self.float_unary(insn, crate::ir::FloatUnOp::ToInt64Trunc, false),
            Opcode::Fcfid => self.float_unary(insn, crate::ir::FloatUnOp::FromInt64, false),
            Opcode::Fmr => self.float_move(insn),
            Opcode::Fsel => self.float_select(insn),
            Opcode::Fcmpu | Opcode::Fcmpo => self.float_compare(insn),
            // FPSCR is not modelled
            Opcode::Mffs | Opcode::Mtfsf => Self::unsupported(insn),

            // Branches
            Opcode::B | Opcode::Ba => self.branch(insn),
            Opcode::Bl | Opcode::Bla => self.branch_and_link(insn),
            Opcode::Bc | Opcode::Bca => self.branch_conditional(insn),
            Opcode::Bcl | Opcode::Bcla => self.branch_conditional_and_link(insn),
            Opcode::Bclr => self.branch_to_link_register(insn),
            Opcode::Bclrl => self.branch_to_link_register_and_link(insn),
            Opcode::Bcctr => self.branch_to_count_register(insn),
            Opcode::Bcctrl => self.branch_to_count_register_and_link(insn),

            // Special registers, condition register and system
            Opcode::Mfspr => self.move_from_spr(insn),
            Opcode::Mtspr => self.move_to_spr(insn),
            Opcode::Mftb => Self::unsupported(insn),
            Opcode::Mfcr => self.move_from_cr(insn),
            Opcode::Mtcrf => self.move_to_cr_fields(insn),
            Opcode::Mfmsr => self.move_from_msr(insn),
            Opcode::Mtmsr | Opcode::Mtmsrd => self.move_to_msr(insn),
            Opcode::Mcrf => self.move_cr_field(insn),
            Opcode::Crand => self.cr_logical(insn, BinOp::And, false, false),
            Opcode::Crandc => self.cr_logical(insn, BinOp::And, true, false),
            Opcode::Cror => self.cr_logical(insn, BinOp::Or, false, false),
            Opcode::Crorc => self.cr_logical(insn, BinOp::Or, true, false),
            Opcode::Crxor => self.cr_logical(insn, BinOp::Xor, false, false),
            Opcode::Crnand => self.cr_logical(insn, BinOp::And, false, true),
            Opcode::Crnor => self.cr_logical(insn, BinOp::Or, false, true),
            Opcode::Creqv => self.cr_logical(insn, BinOp::Xor, false, true),
            Opcode::Sc => self.system_call(),
            Opcode::Rfid => Self::unsupported(insn),
            Opcode::Sync
            | Opcode::Eieio
            | Opcode::Isync
            | Opcode::Dcbt
            | Opcode::Dcbtst
            | Opcode::Dcbf
            | Opcode::Dcbst
            | Opcode::Icbi => Ok(Step::Continue),
            Opcode::Dcbz => self.data_cache_zero(insn),

            // Vector unit
            Opcode::Lvx
            | Opcode::Lvlx
            | Opcode::Lvrx
            | Opcode::Lvsl
            | Opcode::Lvsr
            | Opcode::Stvx
            | Opcode::Stvlx
            | Opcode::Stvrx
            | Opcode::Vaddfp
            | Opcode::Vsubfp
            | Opcode::Vmaxfp
            | Opcode::Vminfp
            | Opcode::Vand
            | Opcode::Vandc
            | Opcode::Vor
            | Opcode::Vxor
            | Opcode::Vnor
            | Opcode::Vspltw
            | Opcode::Vspltisw
            | Opcode::Vsel
            | Opcode::Vperm
            | Opcode::Vsldoi
            | Opcode::Vmaddfp
            | Opcode::Vnmsubfp => Self::unsupported(insn),
        }
    }
}
