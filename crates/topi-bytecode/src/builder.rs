//! Container builder
//!
//! Used by tooling and tests to assemble containers without a compiler.
//! Jump targets are written through [`Label`]s and patched on [`ContainerBuilder::build`].

use topi_value::TaggedValue;

use crate::error::{FormatError, FormatResult};
use crate::instruction::{Instruction, Opcode, write_str};
use crate::symbol::{Bough, GlobalSymbol};
use crate::{CONTAINER_MAGIC, FormatVersion, HEADER_LEN};

/// A forward-referencable code position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// Builder for container bytes
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    version: FormatVersion,
    globals: Vec<GlobalSymbol>,
    boughs: Vec<Bough>,
    code: Vec<u8>,
    labels: Vec<Option<u32>>,
    fixups: Vec<(usize, Label)>,
    error: Option<FormatError>,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBuilder {
    /// Create a builder for the current layout
    pub fn new() -> Self {
        Self {
            version: FormatVersion::CURRENT,
            globals: Vec::new(),
            boughs: Vec::new(),
            code: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            error: None,
        }
    }

    /// Select the layout to write
    pub fn version(mut self, version: FormatVersion) -> Self {
        self.version = version;
        self
    }

    /// Declare a global and return its slot index
    pub fn global(&mut self, name: impl Into<String>, is_extern: bool, is_mutable: bool) -> u32 {
        let index = self.globals.len() as u32;
        self.globals.push(GlobalSymbol {
            name: name.into(),
            index,
            is_extern,
            is_mutable,
        });
        index
    }

    /// Declare a mutable script variable
    pub fn variable(&mut self, name: impl Into<String>) -> u32 {
        self.global(name, false, true)
    }

    /// Declare a script constant
    pub fn constant(&mut self, name: impl Into<String>) -> u32 {
        self.global(name, false, false)
    }

    /// Declare a host-provided variable or function
    pub fn extern_variable(&mut self, name: impl Into<String>) -> u32 {
        self.global(name, true, true)
    }

    /// Start a bough at the current code position
    pub fn bough(&mut self, name: impl Into<String>) -> &mut Self {
        self.boughs.push(Bough {
            name: name.into(),
            entry: self.code.len() as u32,
        });
        self
    }

    /// Create an unbound label
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Bind `label` to the current code position
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0 as usize] = Some(self.code.len() as u32);
        self
    }

    /// Append a pre-built instruction verbatim
    pub fn emit(&mut self, instruction: &Instruction) -> FormatResult<&mut Self> {
        instruction.encode(&mut self.code)?;
        Ok(self)
    }

    /// Emit a line
    pub fn line(&mut self, speaker: &str, content: &str, tags: &[&str]) -> &mut Self {
        self.push(Instruction::Line {
            speaker: speaker.to_string(),
            content: content.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        })
    }

    /// Emit untagged choices, each resuming at its label
    pub fn choices(&mut self, options: &[(&str, Label)]) -> &mut Self {
        let Ok(count) = u8::try_from(options.len()) else {
            return self.fail(FormatError::Oversized(format!("{} choices", options.len())));
        };
        self.code.push(Opcode::Choices as u8);
        self.code.push(count);
        for (content, label) in options {
            if let Err(e) = write_str(content, &mut self.code) {
                return self.fail(e);
            }
            // no tags
            self.code.push(0);
            self.placeholder(*label);
        }
        self
    }

    /// Emit an unconditional jump
    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.code.push(Opcode::Jump as u8);
        self.placeholder(label);
        self
    }

    /// Emit a jump taken when `global` is falsy
    pub fn jump_if_false(&mut self, global: u32, label: Label) -> &mut Self {
        self.code.push(Opcode::JumpIfFalse as u8);
        self.code.extend_from_slice(&global.to_le_bytes());
        self.placeholder(label);
        self
    }

    /// Emit an assignment
    pub fn set(&mut self, global: u32, value: impl Into<TaggedValue>) -> &mut Self {
        self.push(Instruction::Set {
            global,
            value: value.into(),
        })
    }

    /// Emit a call
    pub fn call(&mut self, function: u32, args: Vec<TaggedValue>, dest: Option<u32>) -> &mut Self {
        self.push(Instruction::Call {
            function,
            args,
            dest,
        })
    }

    /// Emit an end
    pub fn end(&mut self) -> &mut Self {
        self.push(Instruction::End)
    }

    fn push(&mut self, instruction: Instruction) -> &mut Self {
        let start = self.code.len();
        if let Err(e) = instruction.encode(&mut self.code) {
            self.code.truncate(start);
            return self.fail(e);
        }
        self
    }

    // Keeps the first error; `build` reports it
    fn fail(&mut self, error: FormatError) -> &mut Self {
        self.error.get_or_insert(error);
        self
    }

    fn placeholder(&mut self, label: Label) {
        self.fixups.push((self.code.len(), label));
        self.code.extend_from_slice(&[0; 4]);
    }

    /// Serialize the container
    pub fn build(&self) -> FormatResult<Vec<u8>> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let mut code = self.code.clone();
        for &(at, label) in &self.fixups {
            let target = self.labels[label.0 as usize].ok_or(FormatError::UnboundLabel(label.0))?;
            code[at..at + 4].copy_from_slice(&target.to_le_bytes());
        }

        let globals = self.encode_globals()?;
        let boughs = self.encode_boughs()?;

        let mut out = Vec::with_capacity(HEADER_LEN + 24 + globals.len() + boughs.len() + code.len());
        out.extend_from_slice(&CONTAINER_MAGIC);
        out.extend_from_slice(&(self.version as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());

        if self.version == FormatVersion::Offset {
            let globals_at = (HEADER_LEN + 24) as u64;
            let boughs_at = globals_at + globals.len() as u64;
            let code_at = boughs_at + boughs.len() as u64;
            for offset in [globals_at, boughs_at, code_at] {
                out.extend_from_slice(&offset.to_le_bytes());
            }
        }
        out.extend_from_slice(&globals);
        out.extend_from_slice(&boughs);
        out.extend_from_slice(&code);
        Ok(out)
    }

    fn encode_globals(&self) -> FormatResult<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.globals.len() as u64).to_le_bytes());
        for global in &self.globals {
            let len = u8::try_from(global.name.len())
                .map_err(|_| FormatError::Oversized(global.name.clone()))?;
            out.push(len);
            out.extend_from_slice(global.name.as_bytes());
            out.extend_from_slice(&global.index.to_le_bytes());
            out.push(u8::from(global.is_extern));
            out.push(u8::from(global.is_mutable));
        }
        Ok(out)
    }

    fn encode_boughs(&self) -> FormatResult<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.boughs.len() as u64).to_le_bytes());
        for bough in &self.boughs {
            let oversized = || FormatError::Oversized(bough.name.clone());
            match self.version {
                FormatVersion::Sequential => {
                    out.push(u8::try_from(bough.name.len()).map_err(|_| oversized())?);
                }
                FormatVersion::Offset => {
                    let len = u16::try_from(bough.name.len()).map_err(|_| oversized())?;
                    out.extend_from_slice(&len.to_le_bytes());
                }
            }
            out.extend_from_slice(bough.name.as_bytes());
            out.extend_from_slice(&bough.entry.to_le_bytes());
        }
        Ok(out)
    }
}
