//! Address-keyed store of every decoded instruction in the executable
//! sections of an image.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use byteorder::{BigEndian, ByteOrder};

use crate::decoder::DecodeError;
use crate::{Address, Decoder, Image, Instruction, INSTRUCTION_SIZE, NOP};

/// Raw words of one executable section.
#[derive(Debug, Clone)]
struct Region {
    start: Address,
    words: Vec<u32>,
}

impl Region {
    fn end(&self) -> Address {
        self.start + self.words.len() as u32 * INSTRUCTION_SIZE
    }

    fn word(&self, address: Address) -> Option<u32> {
        if address < self.start || address % INSTRUCTION_SIZE != 0 {
            return None;
        }
        self.words.get(((address - self.start) / INSTRUCTION_SIZE) as usize).copied()
    }
}

/// Decoded instructions keyed by address, plus the raw words they came from.
#[derive(Debug, Clone, Default)]
pub struct InstructionStore {
    instructions: BTreeMap<Address, Instruction>,
    regions: Vec<Region>,
    failures: Vec<DecodeError>,
    padding: usize,
}

impl InstructionStore {
    /// Decode every aligned word of every executable section.
    pub fn build(image: &Image, decoder: &dyn Decoder) -> Self {
        let mut store = Self::default();
        for section in image.executable_sections() {
            let start = section.address.next_multiple_of(INSTRUCTION_SIZE);
            let skip = (start - section.address) as usize;
            let data = image.section_data(section);
            let data = data.get(skip..).unwrap_or_default();

            let mut region = Region { start, words: Vec::with_capacity(data.len() / 4) };
            for (i, chunk) in data.chunks_exact(4).enumerate() {
                let address = start + i as u32 * INSTRUCTION_SIZE;
                let bytes = [chunk[0], chunk[1], chunk[2], chunk[3]];
                let word = BigEndian::read_u32(chunk);
                region.words.push(word);
                if word == 0 {
                    store.padding += 1;
                    continue;
                }
                match decoder.decode(bytes, address) {
                    Ok(insn) => {
                        store.instructions.insert(address, insn);
                    }
                    Err(err) => {
                        log::debug!("{}", err);
                        store.failures.push(err);
                    }
                }
            }
            log::debug!(
                "section {} decoded: [0x{:08x}, 0x{:08x})",
                section.name,
                region.start,
                region.end()
            );
            store.regions.push(region);
        }
        store
    }

    pub fn get(&self, address: Address) -> Option<&Instruction> {
        self.instructions.get(&address)
    }

    /// Raw word at any executable address, decodable or not.
    pub fn word(&self, address: Address) -> Option<u32> {
        self.regions.iter().find_map(|region| region.word(address))
    }

    /// Whether `address` is an aligned address inside an executable section.
    pub fn contains(&self, address: Address) -> bool {
        self.word(address).is_some()
    }

    /// Zero words and `nop`s.
    pub fn is_padding(&self, address: Address) -> bool {
        matches!(self.word(address), Some(0) | Some(NOP))
    }

    /// First address at or after `address` that is not padding.
    pub fn skip_padding(&self, mut address: Address) -> Address {
        while self.is_padding(address) {
            address += INSTRUCTION_SIZE;
        }
        address
    }

    /// Decoded instructions in `range`, in address order.
    pub fn range(&self, range: RangeInclusive<Address>) -> impl Iterator<Item = &Instruction> {
        self.instructions.range(range).map(|(_, insn)| insn)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.values()
    }

    /// `[start, end)` of every executable section.
    pub fn regions(&self) -> impl Iterator<Item = (Address, Address)> + '_ {
        self.regions.iter().map(|r| (r.start, r.end()))
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn failures(&self) -> &[DecodeError] {
        &self.failures
    }

    pub fn padding_count(&self) -> usize {
        self.padding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{Opcode, PpcDecoder};
    use crate::testing::{blr, li, ImageBuilder, BASE};
    use crate::SectionFlags;

    #[test]
    fn test_build_indexes_executable_words_only() {
        let image = ImageBuilder::new(BASE, 0x40)
            .text(BASE, 0x10)
            .section(".rdata", BASE + 0x10, 0x10, SectionFlags::READ)
            .words(BASE, &[li(3, 1), 0, 0xFFFF_FFFF, blr()])
            .words(BASE + 0x10, &[li(4, 2)])
            .build();
        let store = InstructionStore::build(&image, &PpcDecoder::new());

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(BASE).map(|i| i.opcode), Some(Opcode::Addi));
        assert_eq!(store.get(BASE + 0xC).map(|i| i.opcode), Some(Opcode::Bclr));
        assert!(store.get(BASE + 0x10).is_none());
        assert_eq!(store.padding_count(), 1);
        assert_eq!(store.failures(), &[DecodeError { address: BASE + 8, word: 0xFFFF_FFFF }]);
    }

    #[test]
    fn test_raw_words_and_padding() {
        let image = ImageBuilder::new(BASE, 0x10)
            .text(BASE, 0x10)
            .words(BASE, &[NOP, 0, blr(), 0x0400_0000])
            .build();
        let store = InstructionStore::build(&image, &PpcDecoder::new());

        assert_eq!(store.word(BASE + 0xC), Some(0x0400_0000));
        assert_eq!(store.word(BASE + 0x10), None);
        assert_eq!(store.word(BASE + 2), None);
        assert!(store.is_padding(BASE));
        assert!(store.is_padding(BASE + 4));
        assert!(!store.is_padding(BASE + 8));
        assert_eq!(store.skip_padding(BASE), BASE + 8);
        assert!(store.contains(BASE + 0xC));
        assert!(!store.contains(BASE + 0x10));
    }

    #[test]
    fn test_keys_are_aligned_and_inside_sections() {
        let image = ImageBuilder::new(BASE, 0x20)
            .text(BASE + 2, 0x12)
            .words(BASE + 4, &[li(3, 1), li(4, 2), blr()])
            .build();
        let store = InstructionStore::build(&image, &PpcDecoder::new());
        let (start, end) = store.regions().next().unwrap();
        assert_eq!(start, BASE + 4);
        for insn in store.iter() {
            assert_eq!(insn.address % 4, 0);
            assert!(start <= insn.address && insn.address < end);
        }
        assert_eq!(store.range(BASE..=BASE + 8).count(), 2);
    }
}
