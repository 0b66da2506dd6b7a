//! Binary metadata file consumed by the runtime to rebuild guest memory.
//!
//! Little-endian layout:
//!
//! ```text
//! magic "XRMD" | version u32 | flags u32 | base u32
//! variable count u32, then { name length u32, name, address u32 }
//! section count u32, then { offset u32, size u32, flags u32, name length u32, name, bytes[size] }
//! ```
//!
//! Section offsets are relative to the image base.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{Address, Image, ImportKind, SectionFlags};

pub const MAGIC: [u8; 4] = *b"XRMD";
pub const VERSION: u32 = 1;

/// Names longer than this are rejected when reading.
const MAX_NAME_LEN: u32 = 0x1000;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("bad magic {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),

    #[error("file ends inside a record")]
    Truncated,

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("{0} does not fit in 32 bits")]
    TooLarge(&'static str),

    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for MetadataError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => MetadataError::Truncated,
            _ => MetadataError::Io(err),
        }
    }
}

/// An imported variable the runtime patches at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRecord {
    pub name: String,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionRecord {
    pub name: String,
    /// Offset from the image base
    pub offset: u32,
    pub flags: SectionFlags,
    pub data: Vec<u8>,
}

impl SectionRecord {
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMetadata {
    pub flags: u32,
    pub base: Address,
    pub variables: Vec<VariableRecord>,
    pub sections: Vec<SectionRecord>,
}

fn len32(len: usize, what: &'static str) -> Result<u32, MetadataError> {
    u32::try_from(len).map_err(|_| MetadataError::TooLarge(what))
}

fn write_name<W: Write>(writer: &mut W, name: &str) -> Result<(), MetadataError> {
    writer.write_u32::<LittleEndian>(len32(name.len(), "name")?)?;
    writer.write_all(name.as_bytes())?;
    Ok(())
}

fn read_name<R: Read>(reader: &mut R) -> Result<String, MetadataError> {
    let len = reader.read_u32::<LittleEndian>()?;
    if len > MAX_NAME_LEN {
        return Err(MetadataError::InvalidName(format!("length {} exceeds {}", len, MAX_NAME_LEN)));
    }
    let mut bytes = vec![0; len as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|err| MetadataError::InvalidName(err.to_string()))
}

impl ImageMetadata {
    /// Section layout and imported variables of `image`.
    pub fn from_image(image: &Image) -> Self {
        let variables = image
            .imports
            .iter()
            .filter(|import| import.kind == ImportKind::Variable)
            .map(|import| VariableRecord { name: import.symbol(), address: import.table_address })
            .collect();
        let sections = image
            .sections
            .iter()
            .map(|section| SectionRecord {
                name: section.name.clone(),
                offset: section.address.wrapping_sub(image.base),
                flags: section.flags,
                data: image.section_data(section).to_vec(),
            })
            .collect();
        Self { flags: 0, base: image.base, variables, sections }
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), MetadataError> {
        writer.write_all(&MAGIC)?;
        writer.write_u32::<LittleEndian>(VERSION)?;
        writer.write_u32::<LittleEndian>(self.flags)?;
        writer.write_u32::<LittleEndian>(self.base)?;

        writer.write_u32::<LittleEndian>(len32(self.variables.len(), "variable count")?)?;
        for variable in &self.variables {
            write_name(writer, &variable.name)?;
            writer.write_u32::<LittleEndian>(variable.address)?;
        }

        writer.write_u32::<LittleEndian>(len32(self.sections.len(), "section count")?)?;
        for section in &self.sections {
            writer.write_u32::<LittleEndian>(section.offset)?;
            writer.write_u32::<LittleEndian>(len32(section.data.len(), "section size")?)?;
            writer.write_u32::<LittleEndian>(section.flags.bits())?;
            write_name(writer, &section.name)?;
            writer.write_all(&section.data)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self, MetadataError> {
        let mut magic = [0; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(MetadataError::BadMagic(magic));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(MetadataError::UnsupportedVersion(version));
        }
        let flags = reader.read_u32::<LittleEndian>()?;
        let base = reader.read_u32::<LittleEndian>()?;

        let count = reader.read_u32::<LittleEndian>()?;
        let mut variables = Vec::new();
        for _ in 0..count {
            let name = read_name(reader)?;
            let address = reader.read_u32::<LittleEndian>()?;
            variables.push(VariableRecord { name, address });
        }

        let count = reader.read_u32::<LittleEndian>()?;
        let mut sections = Vec::new();
        for _ in 0..count {
            let offset = reader.read_u32::<LittleEndian>()?;
            let size = reader.read_u32::<LittleEndian>()?;
            let flags = SectionFlags::from_bits_retain(reader.read_u32::<LittleEndian>()?);
            let name = read_name(reader)?;
            let mut data = Vec::new();
            reader.by_ref().take(u64::from(size)).read_to_end(&mut data)?;
            if data.len() != size as usize {
                return Err(MetadataError::Truncated);
            }
            sections.push(SectionRecord { name, offset, flags, data });
        }

        Ok(Self { flags, base, variables, sections })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MetadataError> {
        let mut writer = BufWriter::new(File::create(path).map_err(MetadataError::Io)?);
        self.write(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, MetadataError> {
        let mut reader = BufReader::new(File::open(path).map_err(MetadataError::Io)?);
        Self::read(&mut reader)
    }

    /// Guest address of `section`.
    pub fn address_of(&self, section: &SectionRecord) -> Address {
        self.base.wrapping_add(section.offset)
    }
}
