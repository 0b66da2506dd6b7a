//! CSV debug map formatter

use serde::Serialize;

use super::{DebugMapFormatter, DebugRecord};
use crate::RecompError;

/// One CSV row; operands are joined with spaces
#[derive(Serialize)]
struct RecordRow<'a> {
    address: String,
    raw_word: String,
    mnemonic: &'a str,
    operand_count: usize,
    operands: String,
    function: String,
}

fn csv_error(err: impl std::fmt::Display) -> RecompError {
    RecompError::Generic(format!("CSV serialization error: {}", err))
}

impl DebugMapFormatter for super::CsvFormatter {
    fn format(&self, records: &[DebugRecord]) -> Result<String, RecompError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for record in records {
            writer
                .serialize(RecordRow {
                    address: format!("0x{:08x}", record.address),
                    raw_word: format!("0x{:08x}", record.raw_word),
                    mnemonic: record.mnemonic,
                    operand_count: record.operand_count,
                    operands: record.operands.iter().map(|op| format!("0x{:x}", op)).collect::<Vec<_>>().join(" "),
                    function: record.function.map(|start| format!("0x{:08x}", start)).unwrap_or_default(),
                })
                .map_err(csv_error)?;
        }
        let bytes = writer.into_inner().map_err(csv_error)?;
        String::from_utf8(bytes).map_err(csv_error)
    }
}
