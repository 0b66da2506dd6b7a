//! JSON and JSON Lines debug map formatters

use serde::Serialize;

use super::{DebugMapFormatter, DebugRecord};
use crate::RecompError;

/// Serializable record with addresses rendered as hex strings
#[derive(Serialize)]
struct RecordJson<'a> {
    address: String,
    raw_word: String,
    mnemonic: &'a str,
    operand_count: usize,
    operands: &'a [u32],
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<String>,
}

/// Serializable debug map for JSON output
#[derive(Serialize)]
struct DebugMapJson<'a> {
    count: usize,
    records: Vec<RecordJson<'a>>,
}

fn record_to_json(record: &DebugRecord) -> RecordJson<'_> {
    RecordJson {
        address: format!("0x{:08x}", record.address),
        raw_word: format!("0x{:08x}", record.raw_word),
        mnemonic: record.mnemonic,
        operand_count: record.operand_count,
        operands: &record.operands,
        function: record.function.map(|start| format!("0x{:08x}", start)),
    }
}

fn json_error(err: serde_json::Error) -> RecompError {
    RecompError::Generic(format!("JSON serialization error: {}", err))
}

impl DebugMapFormatter for super::JsonFormatter {
    fn format(&self, records: &[DebugRecord]) -> Result<String, RecompError> {
        let map = DebugMapJson { count: records.len(), records: records.iter().map(record_to_json).collect() };
        serde_json::to_string_pretty(&map).map_err(json_error)
    }
}

impl DebugMapFormatter for super::JsonLinesFormatter {
    fn format(&self, records: &[DebugRecord]) -> Result<String, RecompError> {
        let mut output = String::new();
        for record in records {
            output.push_str(&serde_json::to_string(&record_to_json(record)).map_err(json_error)?);
            output.push('\n');
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::format::tests::sample_records;
    use crate::format::{JsonFormatter, JsonLinesFormatter};

    #[test]
    fn test_json_document() {
        let text = JsonFormatter.format(&sample_records()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["count"], 3);
        assert_eq!(value["records"][1]["address"], "0x82000004");
        assert_eq!(value["records"][1]["raw_word"], "0x7c632214");
        assert_eq!(value["records"][1]["operands"], serde_json::json!([3, 3, 4]));
        assert!(value["records"][0].get("function").is_none());
    }

    #[test]
    fn test_json_lines_one_record_per_line() {
        let text = JsonLinesFormatter.format(&sample_records()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let last: Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last["mnemonic"], "bclr");
        assert_eq!(last["function"], "0x82000004");
    }
}
