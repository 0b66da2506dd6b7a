//! Start discovery from calls, LR saves and stack frame setup.

use super::idiom::{classify, IdiomKind};
use super::{follows_boundary, FlowContext, FunctionFlags};
use crate::Address;

pub(super) fn call_targets(ctx: &mut FlowContext<'_>) -> usize {
    let targets: Vec<Address> = ctx
        .store
        .iter()
        .filter(|insn| insn.is_call())
        .filter_map(|insn| insn.branch_target())
        .collect();

    let mut changed = 0;
    for target in targets {
        if !ctx.store.contains(target) {
            log::debug!("call target 0x{:08x} is outside the code sections", target);
            continue;
        }
        if !ctx.functions.contains(target) {
            ctx.functions.entry(target);
            changed += 1;
        }
    }
    changed
}

fn idiom_sites(ctx: &FlowContext<'_>, kind: IdiomKind) -> Vec<Address> {
    ctx.store
        .iter()
        .filter(|insn| classify(insn.word) == Some(kind))
        .map(|insn| insn.address)
        .collect()
}

/// Flag (or create) functions that open with `mflr`.
pub(super) fn link_register_saves(ctx: &mut FlowContext<'_>) -> usize {
    let mut changed = 0;
    for address in idiom_sites(ctx, IdiomKind::LinkRegisterSave) {
        if !ctx.functions.contains(address) && !follows_boundary(ctx.store, address) {
            continue;
        }
        let function = ctx.functions.entry(address);
        if !function.flags.contains(FunctionFlags::STARTS_WITH_LR_SAVE) {
            function.flags.insert(FunctionFlags::STARTS_WITH_LR_SAVE);
            changed += 1;
        }
    }
    changed
}

pub(super) fn stack_frame_setups(ctx: &mut FlowContext<'_>) -> usize {
    let mut changed = 0;
    for address in idiom_sites(ctx, IdiomKind::FrameSetup) {
        if ctx.functions.contains(address) || !follows_boundary(ctx.store, address) {
            continue;
        }
        ctx.functions.entry(address);
        changed += 1;
    }
    changed
}
