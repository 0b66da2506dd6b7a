//! Basic-block discovery.

use std::collections::{BTreeMap, BTreeSet};

use crate::decoder::Opcode;
use crate::flow::Function;
use crate::store::InstructionStore;
use crate::{Address, BasicBlock, INSTRUCTION_SIZE};

/// Split a bounded function into basic blocks.
///
/// Blocks open at the function start, at every in-range branch and
/// jump-table target, and after every branch that may not fall through.
/// Each block runs up to the instruction before the next entry, so the
/// blocks partition `[start, end]` exactly.
pub fn discover(function: &Function, store: &InstructionStore) -> BTreeMap<Address, BasicBlock> {
    let Some(end) = function.end() else {
        return BTreeMap::new();
    };
    let start = function.start;
    let in_range = |address: Address| start <= address && address <= end && address % INSTRUCTION_SIZE == 0;

    let mut entries = BTreeSet::from([start]);
    for insn in store.range(start..=end) {
        let next = insn.next();
        match insn.opcode {
            Opcode::B | Opcode::Ba | Opcode::Bc | Opcode::Bca => {
                entries.extend(insn.branch_target());
                entries.insert(next);
            }
            Opcode::Bclr | Opcode::Bcctr => {
                entries.insert(next);
            }
            _ => {}
        }
    }
    for table in &function.jump_tables {
        entries.extend(table.cases().iter().copied());
    }
    entries.retain(|&address| in_range(address));

    let entries: Vec<Address> = entries.into_iter().collect();
    entries
        .iter()
        .enumerate()
        .map(|(i, &address)| {
            let block_end = entries.get(i + 1).map_or(end, |next| next - INSTRUCTION_SIZE);
            (address, BasicBlock::new(address, block_end))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::PpcDecoder;
    use crate::testing::{b, bc, blr, li, text_image, BASE};

    fn bounded(start: Address, end: Address) -> Function {
        let mut function = Function::new(start);
        function.bound(end).unwrap();
        function
    }

    /// Blocks cover every address of the function exactly once.
    fn assert_partition(blocks: &BTreeMap<Address, BasicBlock>, start: Address, end: Address) {
        let mut expected = start;
        for block in blocks.values() {
            assert_eq!(block.address, expected);
            assert!(block.end >= block.address);
            expected = block.end + INSTRUCTION_SIZE;
        }
        assert_eq!(expected, end + INSTRUCTION_SIZE);
    }

    #[test]
    fn test_branches_open_blocks() {
        let words = [
            li(3, 0),                         // 0x00
            bc(BASE + 4, 12, 2, BASE + 0x10), // 0x04 beq 0x10
            li(3, 1),                         // 0x08
            b(BASE + 0xC, BASE + 0x14),       // 0x0C
            li(3, 2),                         // 0x10
            blr(),                            // 0x14
            bc(BASE + 0x18, 12, 2, BASE + 0x40), // 0x18 target outside the function
            blr(),                            // 0x1C
        ];
        let image = text_image(&words);
        let store = InstructionStore::build(&image, &PpcDecoder::new());
        let function = bounded(BASE, BASE + 0x1C);
        let blocks = discover(&function, &store);

        let starts: Vec<Address> = blocks.keys().map(|a| a - BASE).collect();
        assert_eq!(starts, vec![0x00, 0x08, 0x10, 0x14, 0x18, 0x1C]);
        assert_eq!(blocks[&BASE].end, BASE + 4);
        assert_eq!(blocks[&(BASE + 0x1C)].instruction_count(), 1);
        assert_partition(&blocks, BASE, BASE + 0x1C);
    }

    #[test]
    fn test_unbounded_function_has_no_blocks() {
        let image = text_image(&[blr()]);
        let store = InstructionStore::build(&image, &PpcDecoder::new());
        assert!(discover(&Function::new(BASE), &store).is_empty());
    }

    #[test]
    fn test_straight_line_function_is_one_block() {
        let image = text_image(&[li(3, 0), li(4, 1), blr()]);
        let store = InstructionStore::build(&image, &PpcDecoder::new());
        let blocks = discover(&bounded(BASE, BASE + 8), &store);
        assert_eq!(blocks.len(), 1);
        assert_partition(&blocks, BASE, BASE + 8);
    }
}
