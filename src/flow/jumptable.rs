//! Jump-table recovery.
//!
//! A switch compiles to a bounds check (`cmplwi` + `bgt`) followed by one of a
//! few fixed instruction sequences that load a table entry and `bctr` through
//! it. The sequences are matched by opcode; the table location, scale and
//! base are read from the immediates inside the matched window.

use super::{FlowContext, FunctionFlags, FunctionKind};
use crate::decoder::Opcode;
use crate::store::InstructionStore;
use crate::{Address, Image, Instruction, INSTRUCTION_SIZE};

const SPR_CTR: u32 = 9;

/// How far back from a matched window the bounds check may sit.
const COMPARE_SEARCH_WINDOW: u32 = 8;

/// Largest case count accepted from a bounds check.
const MAX_CASES: u32 = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// `u8` entries: `base + (entry << shift)`
    ByteOffsets,
    /// `u16` entries: `base + (entry << shift)`
    HalfwordOffsets,
    /// `u32` entries holding absolute targets
    AbsoluteWords,
}

impl TableKind {
    fn entry_size(self) -> u32 {
        match self {
            TableKind::ByteOffsets => 1,
            TableKind::HalfwordOffsets => 2,
            TableKind::AbsoluteWords => 4,
        }
    }
}

/// An opcode sequence that ends in the dispatching `bcctr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub kind: TableKind,
    pub opcodes: &'static [Opcode],
}

impl Signature {
    fn window_len(&self) -> u32 {
        self.opcodes.len() as u32 * INSTRUCTION_SIZE
    }
}

pub const SIGNATURES: &[Signature] = &[
    Signature {
        kind: TableKind::ByteOffsets,
        opcodes: &[
            Opcode::Addis,
            Opcode::Addi,
            Opcode::Lbzx,
            Opcode::Rlwinm,
            Opcode::Addis,
            Opcode::Ori,
            Opcode::Addi,
            Opcode::Add,
            Opcode::Mtspr,
            Opcode::Bcctr,
        ],
    },
    Signature {
        kind: TableKind::HalfwordOffsets,
        opcodes: &[
            Opcode::Addis,
            Opcode::Addi,
            Opcode::Rlwinm,
            Opcode::Lhzx,
            Opcode::Rlwinm,
            Opcode::Addis,
            Opcode::Ori,
            Opcode::Addi,
            Opcode::Add,
            Opcode::Mtspr,
            Opcode::Bcctr,
        ],
    },
    Signature {
        kind: TableKind::AbsoluteWords,
        opcodes: &[
            Opcode::Addis,
            Opcode::Addi,
            Opcode::Rlwinm,
            Opcode::Lwzx,
            Opcode::Mtspr,
            Opcode::Bcctr,
        ],
    },
];

/// A resolved switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpTable {
    /// First instruction of the matched window
    pub start: Address,
    /// The dispatching `bcctr`
    pub end: Address,
    pub kind: TableKind,
    /// Default target followed by one target per case
    pub targets: Vec<Address>,
}

impl JumpTable {
    pub fn default_target(&self) -> Option<Address> {
        self.targets.first().copied()
    }

    pub fn cases(&self) -> &[Address] {
        self.targets.get(1..).unwrap_or_default()
    }
}

/// A window matched but its targets could not be computed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("jump table at 0x{address:08x} in function 0x{function:08x}: {reason}")]
pub struct JumpTableResolutionError {
    pub function: Address,
    pub address: Address,
    pub reason: String,
}

/// Signature whose window starts at `address`, if any.
pub fn match_signature(store: &InstructionStore, address: Address) -> Option<&'static Signature> {
    SIGNATURES.iter().find(|signature| {
        signature.opcodes.iter().enumerate().all(|(i, &opcode)| {
            store.get(address + i as u32 * INSTRUCTION_SIZE).is_some_and(|insn| {
                insn.opcode == opcode && (opcode != Opcode::Mtspr || insn.op(0) == SPR_CTR)
            })
        })
    })
}

/// `lis` immediate shifted into the high half.
fn high(insn: &Instruction) -> u32 {
    insn.op(2) << 16
}

/// Case count and default target from the `cmplwi`/`bgt` pair before `start`.
fn bounds_check(store: &InstructionStore, start: Address) -> Option<(u32, Address)> {
    let earliest = start.saturating_sub(COMPARE_SEARCH_WINDOW * INSTRUCTION_SIZE);
    let mut address = start;
    while address > earliest {
        address -= INSTRUCTION_SIZE;
        let Some(branch) = store.get(address).filter(|insn| insn.is_conditional_branch()) else {
            continue;
        };
        let default = branch.branch_target()?;
        let field = branch.op(1) / 4;
        let compare = (1..=4)
            .filter_map(|back| store.get(address.checked_sub(back * INSTRUCTION_SIZE)?))
            .find(|insn| matches!(insn.opcode, Opcode::Cmpli | Opcode::Cmpi) && insn.op(0) == field)?;
        let limit = match compare.opcode {
            Opcode::Cmpi => u32::try_from(compare.simm(3)).ok()?,
            _ => compare.op(3),
        };
        return Some((limit.checked_add(1)?, default));
    }
    None
}

/// Compute the targets of the table dispatched by the window at `start`.
pub fn resolve(
    image: &Image,
    store: &InstructionStore,
    function: Address,
    start: Address,
    signature: &Signature,
) -> Result<JumpTable, JumpTableResolutionError> {
    let fail = |reason: String| JumpTableResolutionError { function, address: start, reason };
    let window: Vec<&Instruction> = (0..signature.opcodes.len() as u32)
        .filter_map(|i| store.get(start + i * INSTRUCTION_SIZE))
        .collect();
    if window.len() != signature.opcodes.len() {
        return Err(fail("window is not fully decoded".to_string()));
    }

    let (count, default) =
        bounds_check(store, start).ok_or_else(|| fail("no bounds check before the table load".to_string()))?;
    if count > MAX_CASES {
        return Err(fail(format!("implausible case count {}", count)));
    }

    let table = high(window[0]).wrapping_add(window[1].op(2));
    let (shift, base) = match signature.kind {
        TableKind::ByteOffsets => (window[3].op(2), (high(window[4]) | window[5].op(2)).wrapping_add(window[6].op(2))),
        TableKind::HalfwordOffsets => (window[4].op(2), (high(window[5]) | window[6].op(2)).wrapping_add(window[7].op(2))),
        TableKind::AbsoluteWords => (0, 0),
    };

    let size = signature.kind.entry_size();
    let last = table.wrapping_add(count * size - 1);
    let in_data = image
        .section_containing(table)
        .is_some_and(|section| section.contains(last) && last >= table);
    if !in_data {
        return Err(fail(format!("table 0x{:08x}..=0x{:08x} is outside every section", table, last)));
    }

    let mut targets = Vec::with_capacity(count as usize + 1);
    targets.push(default);
    for index in 0..count {
        let entry = table + index * size;
        let target = match signature.kind {
            TableKind::ByteOffsets => image.read_u8(entry).map(|v| base.wrapping_add(u32::from(v) << shift)),
            TableKind::HalfwordOffsets => image.read_u16(entry).map(|v| base.wrapping_add(u32::from(v) << shift)),
            TableKind::AbsoluteWords => image.read_u32(entry),
        };
        targets.push(target.ok_or_else(|| fail(format!("entry 0x{:08x} is unmapped", entry)))?);
    }

    Ok(JumpTable { start, end: start + signature.window_len() - INSTRUCTION_SIZE, kind: signature.kind, targets })
}

pub(super) fn discover_jump_tables(ctx: &mut FlowContext<'_>) -> usize {
    let candidates: Vec<(Address, Address)> = ctx
        .functions
        .values()
        .filter(|f| f.kind == FunctionKind::Code && !f.flags.contains(FunctionFlags::EMISSION_DONE))
        .filter_map(|f| f.end().map(|end| (f.start, end)))
        .collect();

    let mut changed = 0;
    for (function, end) in candidates {
        let mut tables = Vec::new();
        let mut address = function;
        while address <= end {
            let Some(signature) = match_signature(ctx.store, address) else {
                address += INSTRUCTION_SIZE;
                continue;
            };
            let window_end = address + signature.window_len() - INSTRUCTION_SIZE;
            if window_end > end {
                break;
            }
            match resolve(ctx.image, ctx.store, function, address, signature) {
                Ok(table) => {
                    log::debug!("{:?} jump table at 0x{:08x} with {} cases", table.kind, table.end, table.cases().len());
                    tables.push(table);
                }
                Err(err) => {
                    log::warn!("{}", err);
                    ctx.report.push(err);
                }
            }
            address = window_end + INSTRUCTION_SIZE;
        }
        if tables.is_empty() {
            continue;
        }
        if let Some(f) = ctx.functions.get_mut(function) {
            f.jump_tables = tables;
            f.flags.insert(FunctionFlags::HAS_JUMP_TABLE);
            changed += 1;
        }
    }
    changed
}
