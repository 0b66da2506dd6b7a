//! Passes that seed the table from facts outside the instruction stream:
//! the entry point, the import list and the function bounds table.

use byteorder::{BigEndian, ReadBytesExt};

use super::{BoundaryRecoveryError, FlowContext, Function, FunctionFlags};
use crate::config::FunctionBounds;
use crate::{ImportKind, INSTRUCTION_SIZE};

/// Name of the section holding 8-byte `{begin, packed}` records.
pub const BOUNDS_TABLE_SECTION: &str = ".pdata";

pub(super) fn seed_imports(ctx: &mut FlowContext<'_>) -> usize {
    let mut changed = 0;
    for import in &ctx.image.imports {
        if import.kind != ImportKind::Function || import.target_address == 0 {
            continue;
        }
        if ctx.functions.insert(Function::import(import.target_address, import.symbol())) {
            changed += 1;
        }
    }

    let entry = ctx.image.entry_point;
    if ctx.store.contains(entry) && !ctx.functions.contains(entry) {
        ctx.functions.entry(entry);
        changed += 1;
    }
    changed
}

/// Decode the `.pdata` records; zero-length and zero-address records are skipped.
pub fn read_bounds_table(data: &[u8]) -> Vec<FunctionBounds> {
    let mut bounds = Vec::new();
    let mut cursor = data;
    while cursor.len() >= 8 {
        let (Ok(begin), Ok(packed)) = (cursor.read_u32::<BigEndian>(), cursor.read_u32::<BigEndian>()) else {
            break;
        };
        let length = (packed >> 8) & 0x3F_FFFF;
        if begin == 0 || length == 0 {
            continue;
        }
        bounds.push(FunctionBounds { start: begin, end: begin + INSTRUCTION_SIZE * (length - 1) });
    }
    bounds
}

pub(super) fn seed_bounds_table(ctx: &mut FlowContext<'_>) -> usize {
    let mut bounds = Vec::new();
    if ctx.config.use_bounds_table {
        if let Some(section) = ctx.image.find_section(BOUNDS_TABLE_SECTION) {
            bounds = read_bounds_table(ctx.image.section_data(section));
            log::debug!("{} lists {} functions", BOUNDS_TABLE_SECTION, bounds.len());
        }
    }
    bounds.extend(ctx.config.functions.iter().copied());

    let mut changed = 0;
    for FunctionBounds { start, end } in bounds {
        if !ctx.store.contains(start) || !ctx.store.contains(end) {
            ctx.report.push(BoundaryRecoveryError::new(
                start,
                format!("bounds table end 0x{:08x} is outside the code sections", end),
            ));
            continue;
        }
        let function = ctx.functions.entry(start);
        if function.is_bounded() {
            continue;
        }
        function.flags.insert(FunctionFlags::LISTED);
        match function.bound(end) {
            Ok(()) => changed += 1,
            Err(err) => ctx.report.push(err),
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecompilerConfig;
    use crate::decoder::PpcDecoder;
    use crate::flow::{FunctionKind, Pass};
    use crate::store::InstructionStore;
    use crate::testing::{blr, li, ImageBuilder, BASE};
    use crate::{Report, SectionFlags};

    fn pdata_record(begin: u32, instructions: u32) -> Vec<u8> {
        let mut bytes = begin.to_be_bytes().to_vec();
        bytes.extend_from_slice(&((instructions << 8) | 0x03).to_be_bytes());
        bytes
    }

    #[test]
    fn test_read_bounds_table() {
        let mut data = pdata_record(0x8200_0000, 4);
        data.extend(pdata_record(0, 0));
        data.extend(pdata_record(0x8200_0010, 1));
        data.extend([0xAA, 0xBB]);
        assert_eq!(
            read_bounds_table(&data),
            vec![
                FunctionBounds { start: 0x8200_0000, end: 0x8200_000C },
                FunctionBounds { start: 0x8200_0010, end: 0x8200_0010 },
            ]
        );
    }

    #[test]
    fn test_import_and_entry_seeding() {
        let image = ImageBuilder::new(BASE, 0x40)
            .text(BASE, 0x40)
            .words(BASE, &[li(3, 0), blr()])
            .entry(BASE)
            .import_function("XamShowMessageBoxUI", 0x2D, BASE + 0x20)
            .import_variable("XboxHardwareInfo", 0x156, BASE + 0x30)
            .build();
        let store = InstructionStore::build(&image, &PpcDecoder::new());
        let config = RecompilerConfig::default();
        let mut report = Report::new();
        let mut ctx = FlowContext::new(&image, &store, &config, &mut report);

        assert_eq!(Pass::ImportSeeding.run(&mut ctx), 2);
        let import = ctx.functions.get(BASE + 0x20).unwrap();
        assert_eq!(import.end(), Some(BASE + 0x2C));
        assert_eq!(import.kind, FunctionKind::Import { symbol: "__imp__XamShowMessageBoxUI".into() });
        assert!(import.flags.contains(super::super::FunctionFlags::EMISSION_DONE));
        assert!(ctx.functions.get(BASE).is_some_and(|f| !f.is_bounded()));
        assert_eq!(Pass::ImportSeeding.run(&mut ctx), 0);
    }

    #[test]
    fn test_bounds_table_and_config_seeding() {
        let pdata = [pdata_record(BASE, 2), pdata_record(BASE + 0x100, 2)].concat();
        let image = ImageBuilder::new(BASE, 0x1000)
            .text(BASE, 0x20)
            .section(".pdata", BASE + 0x800, pdata.len() as u32, SectionFlags::READ)
            .words(BASE, &[li(3, 0), blr(), li(4, 0), blr()])
            .bytes(BASE + 0x800, &pdata)
            .entry(BASE)
            .build();
        let store = InstructionStore::build(&image, &PpcDecoder::new());
        let config = RecompilerConfig {
            functions: vec![FunctionBounds { start: BASE + 8, end: BASE + 0xC }],
            ..Default::default()
        };
        let mut report = Report::new();
        let mut ctx = FlowContext::new(&image, &store, &config, &mut report);

        assert_eq!(Pass::BoundsTable.run(&mut ctx), 2);
        assert_eq!(ctx.functions.get(BASE).and_then(|f| f.end()), Some(BASE + 4));
        assert_eq!(ctx.functions.get(BASE + 8).and_then(|f| f.end()), Some(BASE + 0xC));
        assert!(ctx.functions.values().all(|f| f.flags.contains(FunctionFlags::LISTED)));
        // The record at BASE + 0x100 lies outside .text
        assert_eq!(ctx.report.summary().boundary, 1);
    }

    #[test]
    fn test_bounds_table_can_be_disabled() {
        let pdata = pdata_record(BASE, 2);
        let image = ImageBuilder::new(BASE, 0x1000)
            .text(BASE, 0x10)
            .section(".pdata", BASE + 0x800, 8, SectionFlags::READ)
            .words(BASE, &[li(3, 0), blr()])
            .bytes(BASE + 0x800, &pdata)
            .entry(BASE)
            .build();
        let store = InstructionStore::build(&image, &PpcDecoder::new());
        let config = RecompilerConfig { use_bounds_table: false, ..Default::default() };
        let mut report = Report::new();
        let mut ctx = FlowContext::new(&image, &store, &config, &mut report);
        assert_eq!(Pass::BoundsTable.run(&mut ctx), 0);
        assert!(ctx.functions.is_empty());
    }
}
