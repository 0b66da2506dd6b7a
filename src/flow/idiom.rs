//! Compiler-generated instruction words recognised by exact match.
//!
//! The table below is the single place that knows these constants. Flow
//! passes classify raw words through [`classify`] and never compare against
//! literals themselves.

use super::{FlowContext, FunctionKind};
use crate::{Address, INSTRUCTION_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdiomKind {
    /// First word of the `__savegprlr_14` thunk
    SaveGprLr,
    /// First word of the `__restgprlr_14` thunk
    RestoreGprLr,
    /// First word of the `__savefpr_14` thunk
    SaveFpr,
    /// First word of the `__restfpr_14` thunk
    RestoreFpr,
    /// `mflr` into a scratch register
    LinkRegisterSave,
    /// Stack pointer store with update
    FrameSetup,
}

impl IdiomKind {
    /// Instructions after the last per-register save/restore.
    pub fn thunk_tail(self) -> Option<u32> {
        match self {
            IdiomKind::SaveGprLr => Some(2),
            IdiomKind::RestoreGprLr => Some(3),
            IdiomKind::SaveFpr | IdiomKind::RestoreFpr => Some(1),
            IdiomKind::LinkRegisterSave | IdiomKind::FrameSetup => None,
        }
    }

    pub fn thunk_prefix(self) -> &'static str {
        match self {
            IdiomKind::SaveGprLr => "__savegprlr_",
            IdiomKind::RestoreGprLr => "__restgprlr_",
            IdiomKind::SaveFpr => "__savefpr_",
            IdiomKind::RestoreFpr => "__restfpr_",
            IdiomKind::LinkRegisterSave => "__mflr_",
            IdiomKind::FrameSetup => "__frame_",
        }
    }
}

/// `word & mask == pattern`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Idiom {
    pub pattern: u32,
    pub mask: u32,
    pub kind: IdiomKind,
}

const EXACT: u32 = u32::MAX;

pub const IDIOMS: &[Idiom] = &[
    // std r14,-0x98(r1)
    Idiom { pattern: 0xF9C1_FF68, mask: EXACT, kind: IdiomKind::SaveGprLr },
    // ld r14,-0x98(r1)
    Idiom { pattern: 0xE9C1_FF68, mask: EXACT, kind: IdiomKind::RestoreGprLr },
    // stfd f14,-0x90(r12)
    Idiom { pattern: 0xD9CC_FF70, mask: EXACT, kind: IdiomKind::SaveFpr },
    // lfd f14,-0x90(r12)
    Idiom { pattern: 0xC9CC_FF70, mask: EXACT, kind: IdiomKind::RestoreFpr },
    // mflr r12
    Idiom { pattern: 0x7D88_02A6, mask: EXACT, kind: IdiomKind::LinkRegisterSave },
    // mflr r0
    Idiom { pattern: 0x7C08_02A6, mask: EXACT, kind: IdiomKind::LinkRegisterSave },
    // stwu r1,-X(r1)
    Idiom { pattern: 0x9421_0000, mask: 0xFFFF_0000, kind: IdiomKind::FrameSetup },
    // stdu r1,-X(r1)
    Idiom { pattern: 0xF821_0001, mask: 0xFFFF_0003, kind: IdiomKind::FrameSetup },
];

pub fn classify(word: u32) -> Option<IdiomKind> {
    IDIOMS.iter().find(|idiom| word & idiom.mask == idiom.pattern).map(|idiom| idiom.kind)
}

/// First register a save/restore thunk covers.
pub const FIRST_SAVED_REGISTER: u8 = 14;

/// Inclusive bounds of the thunk entry for `register`, given the address
/// of the `r14` entry.
pub fn thunk_bounds(kind: IdiomKind, base: Address, register: u8) -> Option<(Address, Address)> {
    let tail = kind.thunk_tail()?;
    if !(FIRST_SAVED_REGISTER..32).contains(&register) {
        return None;
    }
    let start = base + INSTRUCTION_SIZE * u32::from(register - FIRST_SAVED_REGISTER);
    let len = u32::from(32 - register) + tail;
    Some((start, start + INSTRUCTION_SIZE * (len - 1)))
}

/// Synthesize one thunk function per saved register for every thunk entry
/// word in the image.
pub(super) fn match_thunks(ctx: &mut FlowContext<'_>) -> usize {
    let matches: Vec<(Address, IdiomKind)> = ctx
        .store
        .iter()
        .filter_map(|insn| classify(insn.word).map(|kind| (insn.address, kind)))
        .filter(|(_, kind)| kind.thunk_tail().is_some())
        .collect();

    let mut changed = 0;
    for (base, kind) in matches {
        log::debug!("{:?} thunk group at 0x{:08x}", kind, base);
        for register in FIRST_SAVED_REGISTER..32 {
            let Some((start, end)) = thunk_bounds(kind, base, register) else {
                continue;
            };
            if !ctx.store.contains(end) {
                ctx.report.push(super::BoundaryRecoveryError::new(
                    start,
                    format!("{:?} thunk runs past the code section", kind),
                ));
                continue;
            }
            let function = ctx.functions.entry(start);
            function.kind = FunctionKind::Thunk { idiom: kind, register };
            if !function.is_bounded() {
                if let Err(err) = function.bound(end) {
                    ctx.report.push(err);
                    continue;
                }
            }
            changed += 1;
        }
    }
    changed
}
