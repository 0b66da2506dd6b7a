//! Core data model, traits, diagnostics and pipeline driver for the Xenon
//! static recompiler.
//!
//! The recompiler turns a big-endian PowerPC executable image into a portable
//! IR module. It runs as a strictly staged batch:
//!
//! 1. every executable section is decoded into an [`store::InstructionStore`],
//! 2. the [`flow`] passes recover function boundaries and jump tables,
//! 3. the [`emit`] engine translates each function into [`ir`] blocks.
//!
//! Per-instruction and per-function failures never abort the run. They are
//! collected into a [`Report`] next to the (knowingly partial) output.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use std::fs;
//! use xenon_recomp::{config::RecompilerConfig, parser::GoblinParser, BinaryParser, Recompiler};
//!
//! let data = fs::read("path/to/default.pe").unwrap();
//! let image = GoblinParser::new().parse(&data).unwrap();
//!
//! let output = Recompiler::new(RecompilerConfig::default()).run(&image).unwrap();
//! println!("{}", output.module);
//! output.report.log_summary();
//! ```

pub mod bitfield;
pub mod config;
pub mod decoder;
pub mod emit;
pub mod flow;
pub mod format;
pub mod ir;
pub mod metadata;
pub mod parser;
pub mod store;
#[cfg(test)]
mod testing;
mod large_tests;

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::config::RecompilerConfig;
use crate::decoder::{DecodeError, Opcode, PpcDecoder};
use crate::emit::{Emitter, UnsupportedFormError};
use crate::flow::jumptable::JumpTableResolutionError;
use crate::flow::{BoundaryRecoveryError, FlowEngine, FunctionTable};
use crate::metadata::MetadataError;
use crate::store::InstructionStore;

/// A guest address.
pub type Address = u32;

/// Size of every PowerPC instruction in bytes.
pub const INSTRUCTION_SIZE: u32 = 4;

/// The canonical `nop` (`ori r0,r0,0`).
pub const NOP: u32 = 0x6000_0000;

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Guest address of the instruction
    pub address: Address,
    /// Instruction word after the big-endian byte swap
    pub word: u32,
    /// Decoded opcode
    pub opcode: Opcode,
    /// Operand values in the order given by [`Opcode::form`]
    pub operands: Vec<u32>,
}

impl Instruction {
    pub fn mnemonic(&self) -> &'static str {
        self.opcode.mnemonic()
    }

    /// Operand `index`, or 0 when the form has fewer operands.
    pub fn op(&self, index: usize) -> u32 {
        self.operands.get(index).copied().unwrap_or(0)
    }

    /// Operand `index` as a register number.
    pub fn reg(&self, index: usize) -> u8 {
        self.op(index) as u8
    }

    /// Operand `index` reinterpreted as a signed immediate.
    pub fn simm(&self, index: usize) -> i32 {
        self.op(index) as i32
    }

    /// Address of the next instruction.
    pub fn next(&self) -> Address {
        self.address.wrapping_add(INSTRUCTION_SIZE)
    }

    /// Static target of an I-form or B-form branch.
    pub fn branch_target(&self) -> Option<Address> {
        match self.opcode {
            Opcode::B | Opcode::Bl => Some(self.address.wrapping_add(self.op(0))),
            Opcode::Ba | Opcode::Bla => Some(self.op(0)),
            Opcode::Bc | Opcode::Bcl => Some(self.address.wrapping_add(self.op(2))),
            Opcode::Bca | Opcode::Bcla => Some(self.op(2)),
            _ => None,
        }
    }

    /// `bl` / `bla`.
    pub fn is_call(&self) -> bool {
        matches!(self.opcode, Opcode::Bl | Opcode::Bla)
    }

    /// `b` / `ba`.
    pub fn is_unconditional_branch(&self) -> bool {
        matches!(self.opcode, Opcode::B | Opcode::Ba)
    }

    /// `bc` / `bca` without link.
    pub fn is_conditional_branch(&self) -> bool {
        matches!(self.opcode, Opcode::Bc | Opcode::Bca)
    }

    /// Unconditional `blr`.
    pub fn is_return(&self) -> bool {
        self.opcode == Opcode::Bclr && bo_always(self.op(0))
    }

    /// Unconditional `bctr`.
    pub fn is_indirect_jump(&self) -> bool {
        self.opcode == Opcode::Bcctr && bo_always(self.op(0))
    }

    /// Instructions after which execution never falls through.
    pub fn ends_flow(&self) -> bool {
        self.is_unconditional_branch() || self.is_return() || self.is_indirect_jump()
    }

    /// Any instruction that may transfer control away from the next address.
    pub fn is_control_transfer(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::B
                | Opcode::Ba
                | Opcode::Bc
                | Opcode::Bca
                | Opcode::Bclr
                | Opcode::Bcctr
                | Opcode::Sc
                | Opcode::Rfid
        )
    }
}

/// BO values that ignore both CTR and the condition bit.
pub fn bo_always(bo: u32) -> bool {
    bo & 0x14 == 0x14
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())?;
        for (i, operand) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { "," };
            write!(f, "{}0x{:x}", sep, operand)?;
        }
        Ok(())
    }
}

/// Decoder trait: architecture-specific instruction decoding.
pub trait Decoder: Send + Sync {
    /// Decode the big-endian instruction bytes found at `address`.
    fn decode(&self, bytes: [u8; 4], address: Address) -> Result<Instruction, DecodeError>;
}

/// One basic block of a function, both bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BasicBlock {
    /// Entry address
    pub address: Address,
    /// Address of the last instruction
    pub end: Address,
}

impl BasicBlock {
    pub fn new(address: Address, end: Address) -> Self {
        Self { address, end }
    }

    pub fn contains(&self, address: Address) -> bool {
        self.address <= address && address <= self.end
    }

    pub fn instruction_count(&self) -> usize {
        ((self.end - self.address) / INSTRUCTION_SIZE + 1) as usize
    }
}

bitflags! {
    /// Section permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SectionFlags: u32 {
        const READ = 1;
        const WRITE = 2;
        const EXECUTE = 4;
    }
}

/// A section of the loaded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name
    pub name: String,
    /// Guest address of the first byte
    pub address: Address,
    /// Size in bytes
    pub size: u32,
    /// Permissions
    pub flags: SectionFlags,
}

impl Section {
    pub fn new(name: impl Into<String>, address: Address, size: u32, flags: SectionFlags) -> Self {
        Self { name: name.into(), address, size, flags }
    }

    /// One past the last byte.
    pub fn end_address(&self) -> Address {
        self.address.wrapping_add(self.size)
    }

    pub fn contains(&self, address: Address) -> bool {
        self.address <= address && address < self.end_address()
    }

    pub fn is_executable(&self) -> bool {
        self.flags.contains(SectionFlags::EXECUTE)
    }
}

/// Libraries an import can come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Library {
    Xboxkrnl,
    Xam,
    Xbdm,
    Other(String),
}

impl Library {
    pub fn from_name(name: &str) -> Self {
        let stem = name.split('.').next().unwrap_or(name).to_ascii_lowercase();
        match stem.as_str() {
            "xboxkrnl" => Library::Xboxkrnl,
            "xam" => Library::Xam,
            "xbdm" => Library::Xbdm,
            _ => Library::Other(name.to_string()),
        }
    }
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Library::Xboxkrnl => write!(f, "xboxkrnl.exe"),
            Library::Xam => write!(f, "xam.xex"),
            Library::Xbdm => write!(f, "xbdm.xex"),
            Library::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Whether an import resolves to code or to data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportKind {
    Function,
    Variable,
}

/// One entry of the image's import list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub library: Library,
    pub kind: ImportKind,
    pub name: String,
    pub ordinal: u16,
    /// Address of the import table slot
    pub table_address: Address,
    /// Address of the import thunk (0 when the image has none)
    pub target_address: Address,
}

impl Import {
    /// Symbol the runtime resolves this import by.
    pub fn symbol(&self) -> String {
        if self.name.is_empty() {
            format!("__imp__{}_{}", self.library, self.ordinal)
        } else {
            format!("__imp__{}", self.name)
        }
    }
}

/// A flat guest memory image plus its section table.
#[derive(Debug, Clone, Default)]
pub struct Image {
    /// Load address of `data[0]`
    pub base: Address,
    /// Image bytes, laid out at their guest addresses
    pub data: Vec<u8>,
    pub sections: Vec<Section>,
    pub entry_point: Address,
    pub imports: Vec<Import>,
}

impl Image {
    pub fn new(base: Address, data: Vec<u8>) -> Self {
        Self { base, data, ..Default::default() }
    }

    /// One past the last mapped byte.
    pub fn end_address(&self) -> Address {
        self.base.wrapping_add(self.data.len() as u32)
    }

    pub fn contains(&self, address: Address) -> bool {
        self.base <= address && address < self.end_address()
    }

    /// `len` bytes starting at `address`, if fully mapped.
    pub fn bytes(&self, address: Address, len: usize) -> Option<&[u8]> {
        let offset = address.checked_sub(self.base)? as usize;
        self.data.get(offset..offset.checked_add(len)?)
    }

    pub fn read_u8(&self, address: Address) -> Option<u8> {
        self.bytes(address, 1).map(|b| b[0])
    }

    pub fn read_u16(&self, address: Address) -> Option<u16> {
        self.bytes(address, 2).map(BigEndian::read_u16)
    }

    pub fn read_u32(&self, address: Address) -> Option<u32> {
        self.bytes(address, 4).map(BigEndian::read_u32)
    }

    /// Find a section by name
    pub fn find_section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_containing(&self, address: Address) -> Option<&Section> {
        self.sections.iter().find(|s| s.contains(address))
    }

    pub fn executable_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.is_executable())
    }

    /// Bytes backing `section`, clipped to the mapped image.
    pub fn section_data(&self, section: &Section) -> &[u8] {
        let start = section.address.saturating_sub(self.base) as usize;
        let start = start.min(self.data.len());
        let end = start.saturating_add(section.size as usize).min(self.data.len());
        &self.data[start..end]
    }

    /// Reject images the pipeline cannot work on at all.
    pub fn validate(&self) -> Result<(), RecompError> {
        if self.executable_sections().next().is_none() {
            return Err(RecompError::Image("no executable section".to_string()));
        }
        for section in &self.sections {
            if section.address < self.base || section.end_address() > self.end_address() {
                return Err(RecompError::Image(format!(
                    "section {} [0x{:08x}, 0x{:08x}) lies outside the image",
                    section.name,
                    section.address,
                    section.end_address()
                )));
            }
        }
        if !self.executable_sections().any(|s| s.contains(self.entry_point)) {
            return Err(RecompError::Image(format!(
                "entry point 0x{:08x} is not in an executable section",
                self.entry_point
            )));
        }
        Ok(())
    }
}

/// Parser trait: turn raw bytes into an [`Image`].
pub trait BinaryParser: Send + Sync {
    /// Parse an executable into a flat image
    fn parse(&self, data: &[u8]) -> Result<Image, RecompError>;
}

/// Process-level failures.
#[derive(Debug, thiserror::Error)]
pub enum RecompError {
    /// Failed to parse binary format
    #[error("Failed to parse binary format: {0}")]
    Parsing(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Metadata file error
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Structurally unusable image
    #[error("Invalid image: {0}")]
    Image(String),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

/// A recoverable per-instruction or per-function failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Diagnostic {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Boundary(#[from] BoundaryRecoveryError),
    #[error(transparent)]
    Unsupported(#[from] UnsupportedFormError),
    #[error(transparent)]
    JumpTable(#[from] JumpTableResolutionError),
}

/// Diagnostic counts per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub decode: usize,
    pub boundary: usize,
    pub unsupported: usize,
    pub jump_table: usize,
}

impl ReportSummary {
    pub fn total(&self) -> usize {
        self.decode + self.boundary + self.unsupported + self.jump_table
    }
}

/// Everything that went wrong during one run.
#[derive(Debug, Clone, Default)]
pub struct Report {
    diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: impl Into<Diagnostic>) {
        self.diagnostics.push(diagnostic.into());
    }

    pub fn extend<I, D>(&mut self, diagnostics: I)
    where
        I: IntoIterator<Item = D>,
        D: Into<Diagnostic>,
    {
        self.diagnostics.extend(diagnostics.into_iter().map(Into::into));
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary::default();
        for diagnostic in &self.diagnostics {
            match diagnostic {
                Diagnostic::Decode(_) => summary.decode += 1,
                Diagnostic::Boundary(_) => summary.boundary += 1,
                Diagnostic::Unsupported(_) => summary.unsupported += 1,
                Diagnostic::JumpTable(_) => summary.jump_table += 1,
            }
        }
        summary
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        if self.is_clean() {
            log::info!("recompilation finished without diagnostics");
            return;
        }
        log::warn!(
            "recompilation finished with {} diagnostics ({} decode, {} boundary, {} unsupported, {} jump table)",
            summary.total(),
            summary.decode,
            summary.boundary,
            summary.unsupported,
            summary.jump_table
        );
        for diagnostic in &self.diagnostics {
            log::debug!("{}", diagnostic);
        }
    }
}

/// Output of one recompilation run.
#[derive(Debug)]
pub struct Recompilation {
    pub store: InstructionStore,
    pub functions: FunctionTable,
    pub module: ir::Module,
    pub report: Report,
}

impl Recompilation {
    /// Basic blocks of every emitted function, keyed by function start.
    pub fn blocks(&self) -> BTreeMap<Address, Vec<BasicBlock>> {
        self.functions
            .values()
            .filter(|f| !f.blocks.is_empty())
            .map(|f| (f.start, f.blocks.values().copied().collect()))
            .collect()
    }
}

/// The staged pipeline: decode, recover flow, emit.
#[derive(Debug, Clone)]
pub struct Recompiler {
    config: RecompilerConfig,
    decoder: PpcDecoder,
}

impl Recompiler {
    pub fn new(config: RecompilerConfig) -> Self {
        Self { config, decoder: PpcDecoder::new() }
    }

    pub fn config(&self) -> &RecompilerConfig {
        &self.config
    }

    pub fn run(&self, image: &Image) -> Result<Recompilation, RecompError> {
        image.validate()?;
        let mut report = Report::new();

        let store = InstructionStore::build(image, &self.decoder);
        log::info!(
            "decoded {} instructions ({} padding words, {} undecodable)",
            store.len(),
            store.padding_count(),
            store.failures().len()
        );
        report.extend(store.failures().iter().cloned());

        let mut functions = FlowEngine::new(&self.config).run(image, &store, &mut report);
        log::info!("recovered {} functions", functions.len());

        let module = Emitter::new(&self.config).emit_module(image, &store, &mut functions, &mut report);
        log::info!("emitted {} IR functions", module.len());

        Ok(Recompilation { store, functions, module, report })
    }
}
