//! Parsed bytecode container
//!
//! ```text
//! header   [magic "TOPI"][u16 version][u16 reserved]
//!
//! v1       u64 n, n × global, u64 m, m × bough (u8 name length), code to end
//! v2       u64 globals offset, u64 boughs offset, u64 code offset,
//!          tables at those offsets (u16 bough name length), code to end
//!
//! global   u8 len, name, u32 index, u8 is_extern, u8 is_mutable
//! bough    len, name, u32 entry
//! ```
//!
//! Counts are trusted only as far as the bytes behind them: every entry is
//! read through a bounds-checked [`Reader`] and preallocation is capped by
//! the remaining input.

use std::collections::BTreeSet;
use std::io::Read;
use std::ops::Range;

use rustc_hash::FxHashMap;
use topi_value::Reader;

use crate::error::{FormatError, FormatResult, Section};
use crate::instruction::Instruction;
use crate::symbol::{Bough, GlobalSymbol};
use crate::{CONTAINER_MAGIC, FormatVersion, HEADER_LEN};

/// Smallest encoded global entry (empty name)
const MIN_GLOBAL_LEN: usize = 1 + 4 + 1 + 1;
/// Smallest encoded bough entry (empty name, 1-byte length)
const MIN_BOUGH_LEN: usize = 1 + 4;

/// A validated container that owns its bytes
///
/// The bytes live in a boxed slice that is never reallocated, so offsets
/// taken from the tables stay valid for the container's lifetime.
#[derive(Debug, Clone)]
pub struct Container {
    bytes: Box<[u8]>,
    version: FormatVersion,
    globals: Vec<GlobalSymbol>,
    boughs: Vec<Bough>,
    code: Range<usize>,
    global_names: FxHashMap<String, usize>,
    bough_names: FxHashMap<String, usize>,
}

impl Container {
    /// Parse and validate a container
    pub fn parse(bytes: impl Into<Box<[u8]>>) -> FormatResult<Self> {
        let bytes = bytes.into();
        let mut reader = Reader::new(&bytes);

        let magic = reader
            .take(4)
            .map_err(FormatError::malformed(Section::Header))?;
        if magic != CONTAINER_MAGIC {
            return Err(FormatError::InvalidMagic);
        }
        let raw_version = reader
            .read_u16()
            .map_err(FormatError::malformed(Section::Header))?;
        let version =
            FormatVersion::from_u16(raw_version).ok_or(FormatError::UnsupportedVersion(raw_version))?;
        reader
            .read_u16()
            .map_err(FormatError::malformed(Section::Header))?;

        let (globals, boughs, code_start) = match version {
            FormatVersion::Sequential => {
                let globals = read_globals(&mut reader)?;
                let boughs = read_boughs(&mut reader, version)?;
                (globals, boughs, reader.position())
            }
            FormatVersion::Offset => {
                let globals_at = read_offset(&mut reader, Section::GlobalTable, bytes.len())?;
                let boughs_at = read_offset(&mut reader, Section::BoughTable, bytes.len())?;
                let code_at = read_offset(&mut reader, Section::Code, bytes.len())?;

                let globals = read_globals(&mut Reader::at(&bytes, globals_at).map_err(
                    FormatError::malformed(Section::GlobalTable),
                )?)?;
                let boughs = read_boughs(
                    &mut Reader::at(&bytes, boughs_at)
                        .map_err(FormatError::malformed(Section::BoughTable))?,
                    version,
                )?;
                (globals, boughs, code_at)
            }
        };

        let code = code_start..bytes.len();
        let global_names = index_globals(&globals)?;
        let bough_names = index_boughs(&boughs, code.len())?;

        Ok(Self {
            bytes,
            version,
            globals,
            boughs,
            code,
            global_names,
            bough_names,
        })
    }

    /// Read a whole container from `reader`
    pub fn read_from<R: Read>(reader: &mut R) -> std::io::Result<FormatResult<Self>> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Self::parse(bytes))
    }

    /// Layout version
    pub fn version(&self) -> FormatVersion {
        self.version
    }

    /// The full container bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Global symbols in table order
    pub fn globals(&self) -> &[GlobalSymbol] {
        &self.globals
    }

    /// Look up a global by name
    pub fn global(&self, name: &str) -> Option<&GlobalSymbol> {
        self.global_names.get(name).map(|&i| &self.globals[i])
    }

    /// Names of all extern globals
    pub fn externs(&self) -> BTreeSet<String> {
        self.globals
            .iter()
            .filter(|g| g.is_extern)
            .map(|g| g.name.clone())
            .collect()
    }

    /// Boughs in table order
    pub fn boughs(&self) -> &[Bough] {
        &self.boughs
    }

    /// Bough names in table order
    pub fn bough_names(&self) -> Vec<&str> {
        self.boughs.iter().map(|b| b.name.as_str()).collect()
    }

    /// Look up a bough by name
    pub fn bough(&self, name: &str) -> Option<&Bough> {
        self.bough_names.get(name).map(|&i| &self.boughs[i])
    }

    /// Highest global slot index plus one
    pub fn slot_count(&self) -> usize {
        self.globals
            .iter()
            .map(|g| g.index as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// The code section
    pub fn code(&self) -> &[u8] {
        &self.bytes[self.code.clone()]
    }

    /// Decode the instruction at `ip`, returning it with the next offset
    pub fn instruction_at(&self, ip: u32) -> FormatResult<(Instruction, u32)> {
        Instruction::decode(self.code(), ip)
    }
}

fn read_offset(reader: &mut Reader<'_>, section: Section, len: usize) -> FormatResult<usize> {
    let offset = reader
        .read_u64()
        .map_err(FormatError::malformed(Section::Header))?;
    match usize::try_from(offset) {
        Ok(at) if at >= HEADER_LEN && at <= len => Ok(at),
        _ => Err(FormatError::OffsetOutOfRange {
            section,
            offset,
            len,
        }),
    }
}

fn read_globals(reader: &mut Reader<'_>) -> FormatResult<Vec<GlobalSymbol>> {
    let malformed = || FormatError::malformed(Section::GlobalTable);
    let count = reader.read_u64().map_err(malformed())?;
    let capacity = usize::try_from(count)
        .unwrap_or(usize::MAX)
        .min(reader.remaining() / MIN_GLOBAL_LEN);

    let mut globals = Vec::with_capacity(capacity);
    for _ in 0..count {
        let len = reader.read_u8().map_err(malformed())? as usize;
        let name = reader.read_str(len).map_err(malformed())?.to_string();
        let index = reader.read_u32().map_err(malformed())?;
        let is_extern = read_flag(reader, &name, "extern")?;
        let is_mutable = read_flag(reader, &name, "mutable")?;
        globals.push(GlobalSymbol {
            name,
            index,
            is_extern,
            is_mutable,
        });
    }
    Ok(globals)
}

fn read_flag(reader: &mut Reader<'_>, name: &str, flag: &'static str) -> FormatResult<bool> {
    match reader
        .read_u8()
        .map_err(FormatError::malformed(Section::GlobalTable))?
    {
        0 => Ok(false),
        1 => Ok(true),
        byte => Err(FormatError::InvalidFlag {
            name: name.to_string(),
            flag,
            byte,
        }),
    }
}

fn read_boughs(reader: &mut Reader<'_>, version: FormatVersion) -> FormatResult<Vec<Bough>> {
    let malformed = || FormatError::malformed(Section::BoughTable);
    let count = reader.read_u64().map_err(malformed())?;
    let capacity = usize::try_from(count)
        .unwrap_or(usize::MAX)
        .min(reader.remaining() / MIN_BOUGH_LEN);

    let mut boughs = Vec::with_capacity(capacity);
    for _ in 0..count {
        let len = match version {
            FormatVersion::Sequential => reader.read_u8().map_err(malformed())? as usize,
            FormatVersion::Offset => reader.read_u16().map_err(malformed())? as usize,
        };
        let name = reader.read_str(len).map_err(malformed())?.to_string();
        let entry = reader.read_u32().map_err(malformed())?;
        boughs.push(Bough { name, entry });
    }
    Ok(boughs)
}

fn index_globals(globals: &[GlobalSymbol]) -> FormatResult<FxHashMap<String, usize>> {
    let mut names = FxHashMap::default();
    let mut indices = FxHashMap::default();
    for (i, global) in globals.iter().enumerate() {
        if names.insert(global.name.clone(), i).is_some() {
            return Err(FormatError::DuplicateSymbol(global.name.clone()));
        }
        if indices.insert(global.index, i).is_some() {
            return Err(FormatError::DuplicateGlobalIndex(global.index));
        }
    }
    Ok(names)
}

fn index_boughs(boughs: &[Bough], code_len: usize) -> FormatResult<FxHashMap<String, usize>> {
    let mut names = FxHashMap::default();
    for (i, bough) in boughs.iter().enumerate() {
        if bough.entry as usize > code_len {
            return Err(FormatError::EntryOutOfRange {
                bough: bough.name.clone(),
                entry: bough.entry,
                code_len,
            });
        }
        if names.insert(bough.name.clone(), i).is_some() {
            return Err(FormatError::DuplicateBough(bough.name.clone()));
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContainerBuilder;

    fn sample(version: FormatVersion) -> Vec<u8> {
        let mut builder = ContainerBuilder::new().version(version);
        builder.variable("score");
        builder.extern_variable("playerName");
        builder.bough("main").line("Mara", "Hi", &[]).end();
        builder.build().unwrap()
    }

    #[test]
    fn test_parse_both_versions() {
        for version in [FormatVersion::Sequential, FormatVersion::Offset] {
            let container = Container::parse(sample(version)).unwrap();
            assert_eq!(container.version(), version);
            assert_eq!(container.globals().len(), 2);
            assert_eq!(container.bough_names(), ["main"]);
            assert_eq!(container.externs().into_iter().collect::<Vec<_>>(), ["playerName"]);
            assert_eq!(container.bough("main").unwrap().entry, 0);
            assert!(matches!(
                container.instruction_at(0).unwrap().0,
                Instruction::Line { .. }
            ));
        }
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = sample(FormatVersion::Offset);
        bytes[0] = b'X';
        assert_eq!(Container::parse(bytes).unwrap_err(), FormatError::InvalidMagic);
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = sample(FormatVersion::Offset);
        bytes[4] = 9;
        assert_eq!(
            Container::parse(bytes).unwrap_err(),
            FormatError::UnsupportedVersion(9)
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(Container::parse(Vec::new()).unwrap_err().is_truncated());
    }

    #[test]
    fn test_read_from() {
        let bytes = sample(FormatVersion::Sequential);
        let container = Container::read_from(&mut bytes.as_slice()).unwrap().unwrap();
        assert_eq!(container.as_bytes(), bytes.as_slice());
    }
}
