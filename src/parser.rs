//! Goblin-based loader for the PE base image.
//!
//! Sections are mapped at their virtual addresses into one flat buffer.
//! Imports are grouped by DLL name; an import whose table slot is read by a
//! `lis r11 / lwz r11 / mtctr r11 / bctr` stub is a function imported through
//! that stub, every other import is a variable.

use std::collections::HashMap;
use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use goblin::pe::{section_table, PE};
use goblin::Object;
use log::{debug, warn};

use crate::{Address, BinaryParser, Image, Import, ImportKind, Library, RecompError, Section, SectionFlags};

/// `IMAGE_FILE_MACHINE_POWERPCBE`
pub const COFF_MACHINE_POWERPCBE: u16 = 0x01F2;

/// Words of the import stub, with the slot address in the low halves of the
/// first two.
const THUNK_LIS_R11: u32 = 0x3D60_0000;
const THUNK_LWZ_R11: u32 = 0x816B_0000;
const THUNK_MTCTR_R11: u32 = 0x7D69_03A6;
const THUNK_BCTR: u32 = 0x4E80_0420;

fn to_address<T: TryInto<u32>>(value: T, what: &str) -> Result<Address, RecompError> {
    value.try_into().map_err(|_| RecompError::Parsing(format!("{} does not fit in 32 bits", what)))
}

fn section_flags(characteristics: u32) -> SectionFlags {
    let mut flags = SectionFlags::empty();
    if characteristics & section_table::IMAGE_SCN_MEM_READ != 0 {
        flags |= SectionFlags::READ;
    }
    if characteristics & section_table::IMAGE_SCN_MEM_WRITE != 0 {
        flags |= SectionFlags::WRITE;
    }
    if characteristics & (section_table::IMAGE_SCN_MEM_EXECUTE | section_table::IMAGE_SCN_CNT_CODE) != 0 {
        flags |= SectionFlags::EXECUTE;
    }
    flags
}

/// Slot address referenced by an import stub starting at `words[0]`.
fn thunk_slot(words: &[u32; 4]) -> Option<Address> {
    if words[0] & 0xFFFF_0000 != THUNK_LIS_R11
        || words[1] & 0xFFFF_0000 != THUNK_LWZ_R11
        || words[2] != THUNK_MTCTR_R11
        || words[3] != THUNK_BCTR
    {
        return None;
    }
    let high = words[0] << 16;
    let low = words[1] as u16 as i16 as i32 as u32;
    Some(high.wrapping_add(low))
}

/// Map of import slot address to the stub reading it.
fn find_import_thunks(image: &Image) -> HashMap<Address, Address> {
    let mut thunks = HashMap::new();
    for section in image.executable_sections() {
        let words: Vec<u32> = image
            .section_data(section)
            .chunks_exact(4)
            .map(BigEndian::read_u32)
            .collect();
        for (index, window) in words.windows(4).enumerate() {
            let window = [window[0], window[1], window[2], window[3]];
            if let Some(slot) = thunk_slot(&window) {
                thunks.entry(slot).or_insert(section.address + 4 * index as u32);
            }
        }
    }
    thunks
}

/// Loader for PowerPC PE images via Goblin.
#[derive(Debug, Default)]
pub struct GoblinParser;

impl GoblinParser {
    pub fn new() -> Self {
        GoblinParser
    }

    fn parse_pe(&self, pe: PE<'_>, bytes: &[u8]) -> Result<Image, RecompError> {
        let machine = pe.header.coff_header.machine;
        if machine != COFF_MACHINE_POWERPCBE {
            return Err(RecompError::Parsing(format!(
                "machine 0x{:04x} is not big-endian PowerPC (0x{:04x})",
                machine, COFF_MACHINE_POWERPCBE
            )));
        }
        let base = to_address(pe.image_base, "image base")?;

        let mut image_size = pe
            .header
            .optional_header
            .map(|header| header.windows_fields.size_of_image)
            .unwrap_or(0);
        for sect in &pe.sections {
            let extent = sect.virtual_size.max(sect.size_of_raw_data);
            image_size = image_size.max(sect.virtual_address.saturating_add(extent));
        }
        let mut data = vec![0u8; image_size as usize];

        let mut sections = Vec::new();
        for sect in &pe.sections {
            let name = sect.name().unwrap_or("").to_string();
            let size = if sect.virtual_size != 0 { sect.virtual_size } else { sect.size_of_raw_data };

            let raw_start = sect.pointer_to_raw_data as usize;
            let raw_len = (sect.size_of_raw_data as usize).min(bytes.len().saturating_sub(raw_start));
            if raw_len < sect.size_of_raw_data as usize {
                warn!("section {} is truncated in the file ({} of {} bytes)", name, raw_len, sect.size_of_raw_data);
            }
            let dest = sect.virtual_address as usize;
            let len = raw_len.min(data.len().saturating_sub(dest));
            if len > 0 {
                data[dest..dest + len].copy_from_slice(&bytes[raw_start..raw_start + len]);
            }

            let address = base
                .checked_add(sect.virtual_address)
                .ok_or_else(|| RecompError::Parsing(format!("section {} wraps the address space", name)))?;
            debug!("section {:<8} 0x{:08x} size 0x{:x}", name, address, size);
            sections.push(Section::new(name, address, size, section_flags(sect.characteristics)));
        }

        let entry_point = base.wrapping_add(to_address(pe.entry, "entry point")?);
        let mut image = Image { base, data, sections, entry_point, imports: Vec::new() };

        let thunks = find_import_thunks(&image);
        for import in &pe.imports {
            let table_address = base.wrapping_add(to_address(import.rva, "import slot")?);
            let (kind, target_address) = match thunks.get(&table_address) {
                Some(&thunk) => (ImportKind::Function, thunk),
                None => (ImportKind::Variable, 0),
            };
            image.imports.push(Import {
                library: Library::from_name(import.dll),
                kind,
                name: import.name.to_string(),
                ordinal: import.ordinal,
                table_address,
                target_address,
            });
        }
        debug!("{} imports, {} through stubs", image.imports.len(), thunks.len());

        Ok(image)
    }
}

impl fmt::Display for GoblinParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GoblinParser")
    }
}

impl BinaryParser for GoblinParser {
    fn parse(&self, data: &[u8]) -> Result<Image, RecompError> {
        match Object::parse(data) {
            Ok(Object::PE(pe)) => self.parse_pe(pe, data),
            Ok(_) => Err(RecompError::Parsing("not a PE image".into())),
            Err(e) => Err(RecompError::Parsing(e.to_string())),
        }
    }
}
