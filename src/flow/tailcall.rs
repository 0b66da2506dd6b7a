//! Tail-call promotion.
//!
//! An unconditional `b` is taken to leave its function when its target is
//! far away and nothing but padding follows it, or when it is the tail of a
//! `bc` that skips over it and its target lies outside the current function.

use super::{FlowContext, FunctionFlags};
use crate::{Address, Instruction};

fn distance(a: Address, b: Address) -> u32 {
    a.abs_diff(b)
}

/// `bc` directly before `insn` that branches over it.
fn skipped_by_conditional(ctx: &FlowContext<'_>, insn: &Instruction) -> bool {
    ctx.store
        .get(insn.address.wrapping_sub(4))
        .is_some_and(|prev| prev.is_conditional_branch() && prev.branch_target() == Some(insn.next()))
}

/// Whether `target` lies before the function enclosing `from`, or too far away
/// to belong to it.
fn outside_enclosing(ctx: &FlowContext<'_>, from: Address, target: Address) -> bool {
    let owner = ctx.functions.preceding(from).map(|f| f.start);
    owner.is_some_and(|start| target < start) || distance(from, target) > ctx.config.tail_call_threshold
}

pub(super) fn promote_tail_calls(ctx: &mut FlowContext<'_>) -> usize {
    let mut promoted = Vec::new();
    for insn in ctx.store.iter().filter(|insn| insn.is_unconditional_branch()) {
        let Some(target) = insn.branch_target() else {
            continue;
        };
        if !ctx.store.contains(target) || ctx.functions.contains(target) {
            continue;
        }
        let far = distance(insn.address, target) > ctx.config.tail_call_threshold;
        let next = insn.next();
        let padded = !ctx.store.contains(next) || ctx.store.is_padding(next);
        if (far && padded) || (skipped_by_conditional(ctx, insn) && outside_enclosing(ctx, insn.address, target)) {
            promoted.push(target);
        }
    }

    let mut changed = 0;
    for target in promoted {
        if ctx.functions.contains(target) {
            continue;
        }
        log::debug!("promoting tail-call target 0x{:08x}", target);
        ctx.functions.entry(target).flags.insert(FunctionFlags::HEURISTIC_PROMOTION);
        changed += 1;
    }
    changed
}
