//! Helpers for assembling synthetic images in tests.

use crate::decoder::{encode, Opcode};
use crate::{Address, Image, Import, ImportKind, Library, Section, SectionFlags};

pub const BASE: Address = 0x8200_0000;

pub fn asm(opcode: Opcode, operands: &[u32]) -> u32 {
    encode(opcode, operands)
}

pub fn blr() -> u32 {
    asm(Opcode::Bclr, &[20, 0])
}

pub fn li(rd: u32, value: i32) -> u32 {
    asm(Opcode::Addi, &[rd, 0, value as u32])
}

/// `b` from `from` to `to`.
pub fn b(from: Address, to: Address) -> u32 {
    asm(Opcode::B, &[to.wrapping_sub(from)])
}

/// `bl` from `from` to `to`.
pub fn bl(from: Address, to: Address) -> u32 {
    asm(Opcode::Bl, &[to.wrapping_sub(from)])
}

/// `bc bo,bi` from `from` to `to`.
pub fn bc(from: Address, bo: u32, bi: u32, to: Address) -> u32 {
    asm(Opcode::Bc, &[bo, bi, to.wrapping_sub(from)])
}

/// Builds an [`Image`] byte by byte.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    image: Image,
}

impl ImageBuilder {
    pub fn new(base: Address, size: usize) -> Self {
        Self { image: Image::new(base, vec![0; size]) }
    }

    pub fn section(mut self, name: &str, address: Address, size: u32, flags: SectionFlags) -> Self {
        self.image.sections.push(Section::new(name, address, size, flags));
        self
    }

    pub fn text(self, address: Address, size: u32) -> Self {
        self.section(".text", address, size, SectionFlags::READ | SectionFlags::EXECUTE)
    }

    pub fn words(mut self, address: Address, words: &[u32]) -> Self {
        for (i, word) in words.iter().enumerate() {
            let at = address + 4 * i as u32;
            self = self.bytes(at, &word.to_be_bytes());
        }
        self
    }

    pub fn bytes(mut self, address: Address, bytes: &[u8]) -> Self {
        let offset = (address - self.image.base) as usize;
        self.image.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn entry(mut self, address: Address) -> Self {
        self.image.entry_point = address;
        self
    }

    pub fn import_function(mut self, name: &str, ordinal: u16, target: Address) -> Self {
        self.image.imports.push(Import {
            library: Library::Xboxkrnl,
            kind: ImportKind::Function,
            name: name.to_string(),
            ordinal,
            table_address: 0,
            target_address: target,
        });
        self
    }

    pub fn import_variable(mut self, name: &str, ordinal: u16, table: Address) -> Self {
        self.image.imports.push(Import {
            library: Library::Xboxkrnl,
            kind: ImportKind::Variable,
            name: name.to_string(),
            ordinal,
            table_address: table,
            target_address: 0,
        });
        self
    }

    pub fn build(self) -> Image {
        self.image
    }
}

/// An image whose only section is `.text` holding `words` at [`BASE`].
pub fn text_image(words: &[u32]) -> Image {
    let size = (words.len() * 4).max(4) as u32;
    ImageBuilder::new(BASE, size as usize)
        .text(BASE, size)
        .words(BASE, words)
        .entry(BASE)
        .build()
}
