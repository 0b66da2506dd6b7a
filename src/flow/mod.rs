//! Function-boundary recovery.
//!
//! A fixed sequence of passes runs over the [`InstructionStore`] and builds a
//! [`FunctionTable`]. Each pass reads what earlier passes left behind, so the
//! order of [`Pass::ALL`] matters. Every function moves through a small state
//! machine:
//!
//! ```text
//! Unbounded --bound--> Bounded --confirm--> Confirmed
//!     |                   |
//!     +------demote-------+-------------> Demoted
//! ```
//!
//! Failures are reported per function into the shared [`Report`]; a function
//! that cannot be bounded is simply left unbounded and skipped by emission.

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;

use crate::config::RecompilerConfig;
use crate::store::InstructionStore;
use crate::{Address, BasicBlock, Image, Report, INSTRUCTION_SIZE};

pub mod idiom;
pub mod jumptable;
mod discovery;
mod epilogue;
mod seed;
mod tailcall;

pub use idiom::IdiomKind;
pub use jumptable::JumpTable;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FunctionFlags: u8 {
        /// Begins with `mflr`; its epilogue restores LR before returning
        const STARTS_WITH_LR_SAVE = 1 << 0;
        /// Start was guessed from a tail-call branch
        const HEURISTIC_PROMOTION = 1 << 1;
        /// Owns at least one resolved jump table
        const HAS_JUMP_TABLE = 1 << 2;
        /// Has an IR body (or is an external declaration)
        const EMISSION_DONE = 1 << 3;
        /// Body contains instructions that could not be decoded
        const INCOMPLETE = 1 << 4;
        /// Bounds came from `.pdata` or the configured function list
        const LISTED = 1 << 5;
    }
}

/// Where a function is in boundary recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundState {
    Unbounded,
    Bounded,
    Confirmed,
    Demoted,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    /// Ordinary translated code
    Code,
    /// Import thunk, declared external
    Import { symbol: String },
    /// Register save/restore thunk entered at `register`
    Thunk { idiom: IdiomKind, register: u8 },
}

/// A function could not be bounded, or a transition was illegal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("function 0x{function:08x}: {reason}")]
pub struct BoundaryRecoveryError {
    pub function: Address,
    pub reason: String,
}

impl BoundaryRecoveryError {
    pub fn new(function: Address, reason: impl Into<String>) -> Self {
        Self { function, reason: reason.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub start: Address,
    end: Option<Address>,
    state: BoundState,
    pub flags: FunctionFlags,
    pub kind: FunctionKind,
    /// Filled in by emission
    pub blocks: BTreeMap<Address, BasicBlock>,
    pub jump_tables: Vec<JumpTable>,
}

impl Function {
    pub fn new(start: Address) -> Self {
        Self {
            start,
            end: None,
            state: BoundState::Unbounded,
            flags: FunctionFlags::empty(),
            kind: FunctionKind::Code,
            blocks: BTreeMap::new(),
            jump_tables: Vec::new(),
        }
    }

    /// A 16-byte import thunk stub.
    pub fn import(start: Address, symbol: String) -> Self {
        Self {
            end: Some(start + 3 * INSTRUCTION_SIZE),
            state: BoundState::Bounded,
            flags: FunctionFlags::EMISSION_DONE,
            kind: FunctionKind::Import { symbol },
            ..Self::new(start)
        }
    }

    pub fn end(&self) -> Option<Address> {
        self.end
    }

    pub fn state(&self) -> BoundState {
        self.state
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self.state, BoundState::Bounded | BoundState::Confirmed)
    }

    pub fn is_thunk(&self) -> bool {
        matches!(self.kind, FunctionKind::Thunk { .. })
    }

    pub fn is_import(&self) -> bool {
        matches!(self.kind, FunctionKind::Import { .. })
    }

    /// `start <= address <= end`.
    pub fn contains(&self, address: Address) -> bool {
        self.end.is_some_and(|end| self.start <= address && address <= end)
    }

    /// `start < address <= end`.
    pub fn strictly_contains(&self, address: Address) -> bool {
        self.start != address && self.contains(address)
    }

    pub fn overlaps(&self, other: &Function) -> bool {
        match (self.end, other.end) {
            (Some(a), Some(b)) => self.start <= b && other.start <= a,
            _ => false,
        }
    }

    /// Symbol used for this function in the IR module.
    pub fn name(&self) -> String {
        match &self.kind {
            FunctionKind::Code => format!("sub_{:08X}", self.start),
            FunctionKind::Import { symbol } => symbol.clone(),
            FunctionKind::Thunk { idiom, register } => format!("{}{}", idiom.thunk_prefix(), register),
        }
    }

    /// Jump table whose dispatching `bcctr` sits at `address`.
    pub fn jump_table_at(&self, address: Address) -> Option<&JumpTable> {
        self.jump_tables.iter().find(|table| table.end == address)
    }

    fn check_end(&self, end: Address) -> Result<(), BoundaryRecoveryError> {
        if end < self.start || end % INSTRUCTION_SIZE != 0 {
            return Err(BoundaryRecoveryError::new(self.start, format!("invalid end 0x{:08x}", end)));
        }
        Ok(())
    }

    /// Unbounded -> Bounded.
    pub fn bound(&mut self, end: Address) -> Result<(), BoundaryRecoveryError> {
        if self.state != BoundState::Unbounded {
            return Err(BoundaryRecoveryError::new(self.start, format!("cannot bound a {:?} function", self.state)));
        }
        self.check_end(end)?;
        self.end = Some(end);
        self.state = BoundState::Bounded;
        Ok(())
    }

    /// Move the end of a Bounded function.
    pub fn rebound(&mut self, end: Address) -> Result<(), BoundaryRecoveryError> {
        if self.state != BoundState::Bounded {
            return Err(BoundaryRecoveryError::new(self.start, format!("cannot rebound a {:?} function", self.state)));
        }
        self.check_end(end)?;
        self.end = Some(end);
        Ok(())
    }

    /// Bounded -> Confirmed.
    pub fn confirm(&mut self) -> Result<(), BoundaryRecoveryError> {
        if self.state != BoundState::Bounded {
            return Err(BoundaryRecoveryError::new(self.start, format!("cannot confirm a {:?} function", self.state)));
        }
        self.state = BoundState::Confirmed;
        Ok(())
    }

    fn demote(&mut self) {
        self.state = BoundState::Demoted;
    }
}

/// Functions keyed by start address.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    functions: BTreeMap<Address, Function>,
    demoted: Vec<Function>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn get(&self, start: Address) -> Option<&Function> {
        self.functions.get(&start)
    }

    pub fn get_mut(&mut self, start: Address) -> Option<&mut Function> {
        self.functions.get_mut(&start)
    }

    /// Whether a live function starts at `start`.
    pub fn contains(&self, start: Address) -> bool {
        self.functions.contains_key(&start)
    }

    /// Insert `function` unless its start is already known.
    pub fn insert(&mut self, function: Function) -> bool {
        if self.contains(function.start) {
            return false;
        }
        self.functions.insert(function.start, function);
        true
    }

    /// Existing function at `start`, or a fresh unbounded one.
    pub fn entry(&mut self, start: Address) -> &mut Function {
        self.functions.entry(start).or_insert_with(|| Function::new(start))
    }

    /// Remove the function at `start` from the table.
    pub fn demote(&mut self, start: Address) -> Option<&Function> {
        let mut function = self.functions.remove(&start)?;
        log::debug!("demoting {}", function.name());
        function.demote();
        self.demoted.push(function);
        self.demoted.last()
    }

    /// Functions removed by demotion.
    pub fn demoted(&self) -> &[Function] {
        &self.demoted
    }

    pub fn values(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Function> {
        self.functions.values_mut()
    }

    pub fn starts(&self) -> Vec<Address> {
        self.functions.keys().copied().collect()
    }

    /// Last function starting at or before `address`.
    pub fn preceding(&self, address: Address) -> Option<&Function> {
        self.functions.range(..=address).next_back().map(|(_, f)| f)
    }

    /// First function starting after `address`.
    pub fn following(&self, address: Address) -> Option<&Function> {
        self.functions.range(address.saturating_add(1)..).next().map(|(_, f)| f)
    }

    /// A bounded function whose range covers `address`.
    pub fn containing(&self, address: Address) -> Option<&Function> {
        self.functions.range(..=address).rev().map(|(_, f)| f).find(|f| f.contains(address))
    }

    /// Pairs of bounded functions whose ranges intersect.
    ///
    /// Thunks entered at different registers share a tail and are not
    /// reported against each other.
    pub fn overlapping_pairs(&self) -> Vec<(Address, Address)> {
        let bounded: Vec<&Function> = self.values().filter(|f| f.is_bounded()).collect();
        let mut pairs = Vec::new();
        for (i, first) in bounded.iter().enumerate() {
            for second in &bounded[i + 1..] {
                if !first.overlaps(second) {
                    break;
                }
                if !(first.is_thunk() && second.is_thunk()) {
                    pairs.push((first.start, second.start));
                }
            }
        }
        pairs
    }
}

/// Shared state threaded through the passes.
pub struct FlowContext<'a> {
    pub image: &'a Image,
    pub store: &'a InstructionStore,
    pub config: &'a RecompilerConfig,
    pub functions: FunctionTable,
    pub report: &'a mut Report,
}

impl<'a> FlowContext<'a> {
    pub fn new(
        image: &'a Image,
        store: &'a InstructionStore,
        config: &'a RecompilerConfig,
        report: &'a mut Report,
    ) -> Self {
        Self { image, store, config, functions: FunctionTable::new(), report }
    }
}

/// Boundary recovery passes, in execution order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Pass {
    ImportSeeding,
    BoundsTable,
    PrologueIdioms,
    CallTargets,
    LinkRegisterSave,
    StackFrameSetup,
    TailCallPromotion,
    Epilogues,
    BoundCorrection,
    JumpTables,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pass::ImportSeeding => write!(f, "Import seeding"),
            Pass::BoundsTable => write!(f, "Bounds table"),
            Pass::PrologueIdioms => write!(f, "Prologue idioms"),
            Pass::CallTargets => write!(f, "Call targets"),
            Pass::LinkRegisterSave => write!(f, "Link register save"),
            Pass::StackFrameSetup => write!(f, "Stack frame setup"),
            Pass::TailCallPromotion => write!(f, "Tail call promotion"),
            Pass::Epilogues => write!(f, "Epilogues"),
            Pass::BoundCorrection => write!(f, "Bound correction"),
            Pass::JumpTables => write!(f, "Jump tables"),
        }
    }
}

impl Pass {
    /// Every pass in the order it must run.
    pub const ALL: [Pass; 10] = [
        Pass::ImportSeeding,
        Pass::BoundsTable,
        Pass::PrologueIdioms,
        Pass::CallTargets,
        Pass::LinkRegisterSave,
        Pass::StackFrameSetup,
        Pass::TailCallPromotion,
        Pass::Epilogues,
        Pass::BoundCorrection,
        Pass::JumpTables,
    ];

    /// Run the pass, returning how many functions it created or changed.
    pub fn run(&self, ctx: &mut FlowContext<'_>) -> usize {
        match self {
            Pass::ImportSeeding => seed::seed_imports(ctx),
            Pass::BoundsTable => seed::seed_bounds_table(ctx),
            Pass::PrologueIdioms => idiom::match_thunks(ctx),
            Pass::CallTargets => discovery::call_targets(ctx),
            Pass::LinkRegisterSave => discovery::link_register_saves(ctx),
            Pass::StackFrameSetup => discovery::stack_frame_setups(ctx),
            Pass::TailCallPromotion => tailcall::promote_tail_calls(ctx),
            Pass::Epilogues => epilogue::discover_epilogues(ctx),
            Pass::BoundCorrection => epilogue::correct_bounds(ctx),
            Pass::JumpTables => jumptable::discover_jump_tables(ctx),
        }
    }
}

/// Runs [`Pass::ALL`] over one image.
#[derive(Debug, Clone, Copy)]
pub struct FlowEngine<'c> {
    config: &'c RecompilerConfig,
}

impl<'c> FlowEngine<'c> {
    pub fn new(config: &'c RecompilerConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, image: &Image, store: &InstructionStore, report: &mut Report) -> FunctionTable {
        let mut ctx = FlowContext::new(image, store, self.config, report);
        for pass in Pass::ALL {
            if pass == Pass::JumpTables && !self.config.jump_tables {
                log::debug!("{} disabled", pass);
                continue;
            }
            let changed = pass.run(&mut ctx);
            log::info!("{}: {} functions changed ({} known)", pass, changed, ctx.functions.len());
            if pass == Pass::BoundCorrection {
                check_overlaps(&mut ctx);
            }
        }
        ctx.functions
    }
}

fn check_overlaps(ctx: &mut FlowContext<'_>) {
    for (first, second) in ctx.functions.overlapping_pairs() {
        log::warn!("functions 0x{:08x} and 0x{:08x} overlap", first, second);
        ctx.report.push(BoundaryRecoveryError::new(second, format!("overlaps function 0x{:08x}", first)));
    }
}

/// Whether a function can start at `address` given what precedes it: a
/// section start, padding, an undecodable word or a return.
pub(crate) fn follows_boundary(store: &InstructionStore, address: Address) -> bool {
    let previous = address.wrapping_sub(INSTRUCTION_SIZE);
    if !store.contains(previous) || store.is_padding(previous) {
        return true;
    }
    match store.get(previous) {
        None => true,
        Some(insn) => insn.is_return(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::PpcDecoder;
    use crate::testing::{b, bl, blr, li, text_image, BASE};

    #[test]
    fn test_pass_display() {
        assert_eq!(Pass::TailCallPromotion.to_string(), "Tail call promotion");
        assert_eq!(Pass::ALL[0], Pass::ImportSeeding);
        assert_eq!(Pass::ALL[9], Pass::JumpTables);
    }

    #[test]
    fn test_state_machine_rejects_illegal_moves() {
        let mut f = Function::new(0x100);
        assert!(f.confirm().is_err());
        assert!(f.rebound(0x110).is_err());
        assert!(f.bound(0xFC).is_err());
        assert!(f.bound(0x102).is_err());
        f.bound(0x110).unwrap();
        assert_eq!(f.state(), BoundState::Bounded);
        assert!(f.bound(0x120).is_err());
        f.rebound(0x10C).unwrap();
        f.confirm().unwrap();
        assert_eq!(f.state(), BoundState::Confirmed);
        assert!(f.rebound(0x110).is_err());
        assert_eq!(f.end(), Some(0x10C));
    }

    #[test]
    fn test_table_queries() {
        let mut table = FunctionTable::new();
        let mut a = Function::new(0x100);
        a.bound(0x11C).unwrap();
        table.insert(a);
        table.insert(Function::new(0x200));
        assert!(!table.insert(Function::new(0x200)));

        assert_eq!(table.containing(0x110).map(|f| f.start), Some(0x100));
        assert!(table.containing(0x120).is_none());
        assert_eq!(table.preceding(0x1FC).map(|f| f.start), Some(0x100));
        assert_eq!(table.following(0x100).map(|f| f.start), Some(0x200));
        assert_eq!(table.demote(0x200).map(|f| f.state()), Some(BoundState::Demoted));
        assert!(!table.contains(0x200));
        assert_eq!(table.demoted().len(), 1);
    }

    #[test]
    fn test_overlap_detection_exempts_thunk_pairs() {
        let mut table = FunctionTable::new();
        for (start, end) in [(0x100, 0x120), (0x110, 0x130)] {
            let mut f = Function::new(start);
            f.bound(end).unwrap();
            table.insert(f);
        }
        assert_eq!(table.overlapping_pairs(), vec![(0x100, 0x110)]);

        let mut thunks = FunctionTable::new();
        for register in 14..17u8 {
            let mut f = Function::new(0x200 + 4 * (register as u32 - 14));
            f.kind = FunctionKind::Thunk { idiom: IdiomKind::SaveGprLr, register };
            f.bound(0x250).unwrap();
            thunks.insert(f);
        }
        assert!(thunks.overlapping_pairs().is_empty());
    }

    #[test]
    fn test_names() {
        assert_eq!(Function::new(0x8200_1000).name(), "sub_82001000");
        assert_eq!(Function::import(0x8200_2000, "__imp__NtClose".into()).name(), "__imp__NtClose");
        let mut thunk = Function::new(0x8200_3000);
        thunk.kind = FunctionKind::Thunk { idiom: IdiomKind::RestoreFpr, register: 20 };
        assert_eq!(thunk.name(), "__restfpr_20");
    }

    #[test]
    fn test_engine_bounds_simple_functions_without_overlap() {
        // 0x00: bl 0x10 ; 0x04: blr ; 0x08/0x0C: padding
        // 0x10: li r3,1 ; 0x14: b 0x20 (tail call) ; 0x18: padding ; 0x1C: padding
        // 0x20: li r4,2 ; 0x24: blr
        let image = text_image(&[
            bl(BASE, BASE + 0x10),
            blr(),
            0,
            0,
            li(3, 1),
            b(BASE + 0x14, BASE + 0x20),
            0,
            0,
            li(4, 2),
            blr(),
        ]);
        let store = InstructionStore::build(&image, &PpcDecoder::new());
        let config = RecompilerConfig { tail_call_threshold: 4, ..Default::default() };
        let mut report = Report::new();
        let table = FlowEngine::new(&config).run(&image, &store, &mut report);
        assert_eq!(table.get(BASE).and_then(|f| f.end()), Some(BASE + 4));
        assert_eq!(table.get(BASE + 0x10).and_then(|f| f.end()), Some(BASE + 0x14));
        assert_eq!(table.get(BASE + 0x20).and_then(|f| f.end()), Some(BASE + 0x24));
        assert!(table
            .get(BASE + 0x20)
            .is_some_and(|f| f.flags.contains(FunctionFlags::HEURISTIC_PROMOTION)));
        assert!(table.values().all(|f| f.state() == BoundState::Confirmed));
        assert!(table.overlapping_pairs().is_empty());
        assert!(report.is_clean(), "{:?}", report.diagnostics());
    }
}
