#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use crate::config::RecompilerConfig;
    use crate::decoder::Opcode;
    use crate::format::{debug_map, OutputFormat};
    use crate::ir::eval::{Evaluator, GuestMemory};
    use crate::ir::{Op, ENTRY_SYMBOL};
    use crate::metadata::ImageMetadata;
    use crate::testing::{asm, bl, blr, li, ImageBuilder, BASE};
    use crate::{Image, Recompilation, Recompiler, SectionFlags};

    const MFLR_R12: u32 = 0x7D88_02A6;
    const MTLR_R12: u32 = 0x7D88_03A6;

    /// `main` squares r3 through a call and adds one; an imported stub sits
    /// after the code and a variable import lives in `.data`.
    fn program() -> Image {
        let code = [
            MFLR_R12,                      // 0x00 main
            bl(BASE + 4, BASE + 0x20),     // 0x04
            asm(Opcode::Addi, &[3, 3, 1]), // 0x08
            MTLR_R12,                      // 0x0C
            blr(),                         // 0x10
            0,
            0,
            0,
            asm(Opcode::Mullw, &[3, 3, 3]), // 0x20 square
            blr(),                          // 0x24
            0,
            0,
            0x3D60_8200, // 0x30 import stub
            0x816B_0108,
            0x7D69_03A6,
            0x4E80_0420,
        ];
        ImageBuilder::new(BASE, 0x200)
            .text(BASE, 0x40)
            .section(".data", BASE + 0x100, 0x10, SectionFlags::READ | SectionFlags::WRITE)
            .words(BASE, &code)
            .bytes(BASE + 0x100, b"guest data bytes")
            .entry(BASE)
            .import_function("KeBugCheck", 0x59, BASE + 0x30)
            .import_variable("XboxHardwareInfo", 0x156, BASE + 0x108)
            .build()
    }

    fn recompile(image: &Image) -> Recompilation {
        let config = RecompilerConfig { parallel_emission: false, ..Default::default() };
        Recompiler::new(config).run(image).unwrap()
    }

    #[test]
    fn test_pipeline_recovers_and_runs_a_program() {
        let image = program();
        let output = recompile(&image);

        assert_eq!(output.functions.get(BASE).and_then(|f| f.end()), Some(BASE + 0x10));
        assert_eq!(output.functions.get(BASE + 0x20).and_then(|f| f.end()), Some(BASE + 0x24));
        assert!(output.functions.overlapping_pairs().is_empty());
        assert_eq!(output.report.summary().unsupported, 0);

        let import = output.module.get(BASE + 0x30).unwrap();
        assert!(import.is_external());
        assert_eq!(import.name, "__imp__KeBugCheck");

        let exports = output.module.exports();
        assert!(exports.iter().any(|e| e.guest_address == BASE && e.symbol == "sub_82000000"));
        assert!(exports.iter().any(|e| e.guest_address == BASE + 0x20));
        assert!(exports.iter().all(|e| e.guest_address != BASE + 0x30));

        let trampoline = output.module.trampoline().unwrap();
        assert_eq!(trampoline.name, ENTRY_SYMBOL);
        assert_eq!(
            trampoline.entry_block().unwrap().ops,
            vec![Op::Call { target: BASE, symbol: "sub_82000000".into() }]
        );

        let mut eval = Evaluator::new(&output.module).with_memory(GuestMemory::from_image(&image));
        eval.state.gpr[3] = 5;
        eval.call(BASE).unwrap();
        assert_eq!(eval.state.gpr[3], 26);

        let blocks = output.blocks();
        assert_eq!(blocks[&BASE].len(), 1);
        assert_eq!(blocks[&BASE][0].end, BASE + 0x10);
    }

    #[test]
    fn test_outputs_written_to_a_directory() {
        let image = program();
        let output = recompile(&image);
        let dir = tempdir().unwrap();

        let module_path = dir.path().join("module.ir");
        fs::write(&module_path, output.module.to_string()).unwrap();
        let text = fs::read_to_string(&module_path).unwrap();
        assert!(text.starts_with("module entry=0x82000000"));
        assert!(text.contains("@sub_82000020"));
        assert!(text.contains(ENTRY_SYMBOL));

        let metadata_path = dir.path().join("metadata.bin");
        ImageMetadata::from_image(&image).save(&metadata_path).unwrap();
        let metadata = ImageMetadata::load(&metadata_path).unwrap();
        assert_eq!(metadata.base, BASE);
        assert_eq!(metadata.variables.len(), 1);
        assert_eq!(metadata.variables[0].address, BASE + 0x108);
        let data = metadata.sections.iter().find(|s| s.name == ".data").unwrap();
        assert_eq!(metadata.address_of(data), BASE + 0x100);
        assert_eq!(data.data, b"guest data bytes");

        let records = debug_map(&output.store, &output.functions);
        assert_eq!(records.len(), output.store.len());
        for format in OutputFormat::available_formats() {
            let rendered = format.get_formatter().format(&records).unwrap();
            let path = dir.path().join(format!("debug_map.{}", format.extension()));
            fs::write(&path, &rendered).unwrap();
            assert!(fs::metadata(&path).unwrap().len() > 0, "{} map is empty", format);
        }

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("debug_map.json")).unwrap()).unwrap();
        assert_eq!(json["count"], records.len());
        let jsonl = fs::read_to_string(dir.path().join("debug_map.jsonl")).unwrap();
        assert_eq!(jsonl.lines().count(), records.len());
    }

    #[test]
    fn test_bad_code_yields_partial_output() {
        let code = [
            li(3, 1),
            asm(Opcode::Vor, &[1, 2, 2]),
            blr(),
            0,
            asm(Opcode::Mfspr, &[3, 272]),
            blr(),
        ];
        let image = ImageBuilder::new(BASE, 0x100)
            .text(BASE, 0x18)
            .words(BASE, &code)
            .entry(BASE)
            .build();
        let config = RecompilerConfig {
            parallel_emission: false,
            functions: vec![crate::config::FunctionBounds { start: BASE + 0x10, end: BASE + 0x14 }],
            ..Default::default()
        };
        let output = Recompiler::new(config).run(&image).unwrap();

        assert_eq!(output.report.summary().unsupported, 2);
        assert!(output.module.get(BASE).is_some());
        assert!(output.module.get(BASE + 0x10).is_some());
        assert!(output.module.trampoline().is_some());
    }

    #[test]
    fn test_configured_bounds_without_calls() {
        let code = [li(3, 1), blr(), li(3, 2), blr()];
        let image = ImageBuilder::new(BASE, 0x100).text(BASE, 0x10).words(BASE, &code).entry(BASE).build();
        let config = RecompilerConfig::from_json(&format!(
            r#"{{"parallel_emission": false, "functions": [{{"start": {}, "end": {}}}]}}"#,
            BASE + 8,
            BASE + 0xC
        ))
        .unwrap();
        let output = Recompiler::new(config).run(&image).unwrap();

        assert_eq!(output.functions.get(BASE + 8).and_then(|f| f.end()), Some(BASE + 0xC));
        let mut eval = Evaluator::new(&output.module).with_memory(GuestMemory::new());
        eval.call(BASE + 8).unwrap();
        assert_eq!(eval.state.gpr[3], 2);
    }

    #[test]
    fn test_images_without_code_are_rejected() {
        let image = ImageBuilder::new(BASE, 0x10)
            .section(".data", BASE, 0x10, SectionFlags::READ)
            .entry(BASE)
            .build();
        assert!(Recompiler::new(RecompilerConfig::default()).run(&image).is_err());
    }
}
