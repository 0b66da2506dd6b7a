//! End-bound discovery and the correction pass that follows it.

use super::{BoundState, BoundaryRecoveryError, FlowContext, FunctionFlags};
use crate::decoder::Opcode;
use crate::{Address, INSTRUCTION_SIZE};

const SPR_LR: u32 = 8;

/// A word inside the code section whose value is an address in the image.
///
/// Jump-table and pointer data embedded after a function decode as `lwz`, but
/// so do real loads into r16..r31 on a large image. Callers decide by position
/// through `embedded_after`.
pub(crate) fn is_address_load(ctx: &FlowContext<'_>, address: Address) -> bool {
    ctx.store
        .word(address)
        .is_some_and(|word| word % INSTRUCTION_SIZE == 0 && ctx.image.contains(word))
}

/// An address word at `address` preceded by a run of address words that
/// starts right after a control transfer. Returns that transfer.
fn embedded_after(ctx: &FlowContext<'_>, start: Address, address: Address) -> Option<Address> {
    let mut cursor = address;
    while cursor > start && is_address_load(ctx, cursor) {
        cursor -= INSTRUCTION_SIZE;
        if ctx.store.get(cursor).is_some_and(|insn| insn.ends_flow()) {
            return Some(cursor);
        }
    }
    None
}

/// Last decoded, non-padding instruction in `[start, before)`.
fn last_instruction_before(ctx: &FlowContext<'_>, start: Address, before: Address) -> Option<Address> {
    let mut address = before;
    while address > start {
        address -= INSTRUCTION_SIZE;
        if ctx.store.get(address).is_some() && !ctx.store.is_padding(address) {
            return Some(address);
        }
    }
    None
}

fn find_end(ctx: &FlowContext<'_>, start: Address, saves_lr: bool) -> Result<Address, BoundaryRecoveryError> {
    let mut lr_restored = !saves_lr;
    let mut last_transfer = None;
    // Furthest forward branch target seen so far; a return before it is an early exit.
    let mut reach = start;
    let mut address = start;

    loop {
        if address != start && ctx.functions.contains(address) {
            return last_instruction_before(ctx, start, address)
                .or_else(|| ctx.store.get(start).map(|_| start))
                .ok_or_else(|| BoundaryRecoveryError::new(start, "no instruction before the next function"));
        }
        if !ctx.store.contains(address) {
            return last_transfer.ok_or_else(|| {
                BoundaryRecoveryError::new(
                    start,
                    format!("walked off the code section at 0x{:08x} looking for an epilogue", address),
                )
            });
        }
        let Some(insn) = ctx.store.get(address) else {
            // Zero padding or an undecodable word: the function ended before it.
            return last_transfer
                .or_else(|| last_instruction_before(ctx, start, address))
                .ok_or_else(|| BoundaryRecoveryError::new(start, format!("no code at 0x{:08x}", address)));
        };
        // Data only when it directly follows the last transfer and no branch
        // seen so far lands at or beyond it.
        let after_transfer = last_transfer.is_some_and(|end| end + INSTRUCTION_SIZE == address);
        if after_transfer && address >= reach && is_address_load(ctx, address) {
            if let Some(end) = last_transfer {
                return Ok(end);
            }
        }

        if insn.opcode == Opcode::Mtspr && insn.op(0) == SPR_LR {
            lr_restored = true;
        }
        let past_reach = address >= reach;
        if insn.is_return() && lr_restored && past_reach {
            return Ok(address);
        }
        if let Some(target) = insn.branch_target() {
            let known = target != start && ctx.functions.contains(target);
            if insn.is_unconditional_branch() && known && past_reach {
                return Ok(address);
            }
            if !known && target > reach && ctx.store.contains(target) {
                reach = target;
            }
        }
        if insn.ends_flow() {
            last_transfer = Some(address);
        }
        address += INSTRUCTION_SIZE;
    }
}

/// Bound every function that is still unbounded.
pub(super) fn discover_epilogues(ctx: &mut FlowContext<'_>) -> usize {
    let pending: Vec<(Address, bool)> = ctx
        .functions
        .values()
        .filter(|f| f.state() == BoundState::Unbounded)
        .map(|f| (f.start, f.flags.contains(FunctionFlags::STARTS_WITH_LR_SAVE)))
        .collect();

    let mut changed = 0;
    for (start, saves_lr) in pending {
        let result = find_end(ctx, start, saves_lr)
            .and_then(|end| ctx.functions.get_mut(start).map_or(Ok(()), |f| f.bound(end)));
        match result {
            Ok(()) => changed += 1,
            Err(err) => {
                log::warn!("{}", err);
                ctx.report.push(err);
            }
        }
    }
    changed
}

fn rewind_address_loads(ctx: &mut FlowContext<'_>) -> usize {
    let mut changed = 0;
    for start in ctx.functions.starts() {
        let Some(end) = ctx.functions.get(start).filter(|f| !f.is_import()).and_then(|f| f.end()) else {
            continue;
        };
        if end == start {
            continue;
        }
        let Some(new_end) = embedded_after(ctx, start, end) else {
            continue;
        };
        if let Some(function) = ctx.functions.get_mut(start) {
            match function.rebound(new_end) {
                Ok(()) => changed += 1,
                Err(err) => ctx.report.push(err),
            }
        }
    }
    changed
}

fn demote_nested_promotions(ctx: &mut FlowContext<'_>) -> usize {
    let mut doomed = Vec::new();
    let mut reach: Option<Address> = None;
    for function in ctx.functions.values() {
        let nested = reach.is_some_and(|end| function.start <= end);
        if nested && function.flags.contains(FunctionFlags::HEURISTIC_PROMOTION) {
            doomed.push(function.start);
            continue;
        }
        if let Some(end) = function.end() {
            reach = Some(reach.map_or(end, |r| r.max(end)));
        }
    }
    for start in &doomed {
        ctx.functions.demote(*start);
    }
    doomed.len()
}

fn clamp_overlaps(ctx: &mut FlowContext<'_>) -> usize {
    let mut changed = 0;
    let mut previous: Option<Address> = None;
    for start in ctx.functions.starts() {
        let Some(current) = ctx.functions.get(start).filter(|f| f.is_bounded()) else {
            continue;
        };
        let current_thunk = current.is_thunk();
        let Some(prev) = previous.and_then(|p| ctx.functions.get(p)) else {
            previous = Some(start);
            continue;
        };
        if !prev.overlaps(current) || (prev.is_thunk() && current_thunk) {
            previous = Some(start);
            continue;
        }
        if prev.is_thunk() && current.flags.contains(FunctionFlags::LISTED) {
            // Listed bounds win; the overlap check reports the conflict.
            log::warn!("listed function 0x{:08x} starts inside thunk {}", start, prev.name());
            continue;
        }
        if prev.is_thunk() {
            log::debug!("0x{:08x} starts inside thunk {}", start, prev.name());
            ctx.functions.demote(start);
            changed += 1;
            continue;
        }
        let prev_start = prev.start;
        if let Some(function) = ctx.functions.get_mut(prev_start) {
            match function.rebound(start - INSTRUCTION_SIZE) {
                Ok(()) => changed += 1,
                Err(err) => ctx.report.push(err),
            }
        }
        previous = Some(start);
    }
    changed
}

/// Fix ends that landed on embedded data, demote promoted starts nested in
/// other functions, clamp remaining overlaps and confirm everything bounded.
pub(super) fn correct_bounds(ctx: &mut FlowContext<'_>) -> usize {
    let mut changed = rewind_address_loads(ctx);
    changed += demote_nested_promotions(ctx);
    changed += clamp_overlaps(ctx);
    for function in ctx.functions.values_mut() {
        if function.state() == BoundState::Bounded {
            if let Err(err) = function.confirm() {
                ctx.report.push(err);
            }
        }
    }
    changed
}
