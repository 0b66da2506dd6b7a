//! Debug map output: one record per decoded instruction, sorted by address,
//! used to correlate runtime faults with guest instructions.

mod csv;
mod json;

pub use self::csv::*;
pub use self::json::*;

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::Serialize;

use crate::flow::FunctionTable;
use crate::store::InstructionStore;
use crate::{Address, Instruction, RecompError};

/// One decoded instruction of the debug map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugRecord {
    pub address: Address,
    /// The instruction word after the big-endian load, so it reads as the
    /// opcode value rather than in file byte order
    pub raw_word: u32,
    pub mnemonic: &'static str,
    pub operand_count: usize,
    pub operands: Vec<u32>,
    /// Start of the function holding this instruction, if any
    pub function: Option<Address>,
}

impl DebugRecord {
    pub fn new(insn: &Instruction, function: Option<Address>) -> Self {
        Self {
            address: insn.address,
            raw_word: insn.word,
            mnemonic: insn.mnemonic(),
            operand_count: insn.operands.len(),
            operands: insn.operands.clone(),
            function,
        }
    }
}

/// Every decoded instruction of `store`, tagged with its enclosing function.
pub fn debug_map(store: &InstructionStore, functions: &FunctionTable) -> Vec<DebugRecord> {
    store
        .iter()
        .map(|insn| DebugRecord::new(insn, functions.containing(insn.address).map(|f| f.start)))
        .collect()
}

/// Supported debug map formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output (default)
    #[default]
    Text,
    /// JSON array
    Json,
    /// JSON Lines format (one JSON object per line)
    #[value(name = "jsonl")]
    JsonLines,
    /// CSV format (comma-separated values)
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "jsonlines" => Ok(OutputFormat::JsonLines),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl OutputFormat {
    /// Get all available output formats
    pub fn available_formats() -> &'static [Self] {
        &[OutputFormat::Text, OutputFormat::Json, OutputFormat::JsonLines, OutputFormat::Csv]
    }

    /// File extension of the written debug map
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Json => "json",
            OutputFormat::JsonLines => "jsonl",
            OutputFormat::Csv => "csv",
        }
    }

    /// Get a formatter for this output format
    pub fn get_formatter(&self) -> Box<dyn DebugMapFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Json => Box::new(JsonFormatter),
            OutputFormat::JsonLines => Box::new(JsonLinesFormatter),
            OutputFormat::Csv => Box::new(CsvFormatter),
        }
    }
}

/// Formatter trait for debug map output
pub trait DebugMapFormatter {
    /// Render `records`, already sorted by address
    fn format(&self, records: &[DebugRecord]) -> Result<String, RecompError>;
}

/// Format the debug map in plain text
pub struct TextFormatter;

/// Format the debug map as a JSON array
pub struct JsonFormatter;

/// Format the debug map in JSON Lines
pub struct JsonLinesFormatter;

/// Format the debug map in CSV
pub struct CsvFormatter;

impl DebugMapFormatter for TextFormatter {
    fn format(&self, records: &[DebugRecord]) -> Result<String, RecompError> {
        let mut output = String::new();
        let mut current = None;
        for record in records {
            if record.function != current {
                current = record.function;
                match current {
                    Some(start) => output.push_str(&format!("\nsub_{:08X}:\n", start)),
                    None => output.push_str("\n; outside any function\n"),
                }
            }
            let operands = record.operands.iter().map(|op| format!("0x{:x}", op)).collect::<Vec<_>>().join(",");
            output.push_str(&format!(
                "  0x{:08x}: {:08x}  {:<10} {}\n",
                record.address, record.raw_word, record.mnemonic, operands
            ));
        }
        Ok(output)
    }
}
