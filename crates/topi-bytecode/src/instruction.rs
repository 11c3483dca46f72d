//! Dialogue instructions
//!
//! ```text
//! opcode: u8
//! End          -
//! Line         str speaker, str content, u8 n, n × str tag
//! Choices      u8 n, n × (str content, u8 m, m × str tag, u32 target)
//! Jump         u32 target
//! JumpIfFalse  u32 global, u32 target
//! Set          u32 global, value
//! Call         u32 function, u8 argc, argc × value, u32 dest
//! ```
//!
//! `str` is a u16 length followed by UTF-8 bytes and `value` is the tagged
//! wire form from [`topi_value::abi`]. Targets are offsets into the code
//! section.

use topi_value::{Reader, TaggedValue, abi};

use crate::error::{FormatError, FormatResult, Section};

/// `dest` of a [`Instruction::Call`] whose result is discarded
pub const DISCARD: u32 = u32::MAX;

/// Operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Stop execution
    End = 0,
    /// Emit a line and wait for continue
    Line = 1,
    /// Present options and wait for a selection
    Choices = 2,
    /// Unconditional jump
    Jump = 3,
    /// Jump when a global is falsy
    JumpIfFalse = 4,
    /// Assign a constant to a global
    Set = 5,
    /// Invoke a function held in a global
    Call = 6,
}

impl Opcode {
    /// Decode an opcode byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::End,
            1 => Self::Line,
            2 => Self::Choices,
            3 => Self::Jump,
            4 => Self::JumpIfFalse,
            5 => Self::Set,
            6 => Self::Call,
            _ => return None,
        })
    }
}

/// One selectable option of a [`Instruction::Choices`]
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceOption {
    /// Option text
    pub content: String,
    /// Author tags
    pub tags: Vec<String>,
    /// Code offset to resume at when picked
    pub target: u32,
}

/// A decoded instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Stop execution
    End,
    /// Emit a line of dialogue
    Line {
        /// Speaking character
        speaker: String,
        /// Line text
        content: String,
        /// Author tags
        tags: Vec<String>,
    },
    /// Present options
    Choices {
        /// Options in display order
        options: Vec<ChoiceOption>,
    },
    /// Unconditional jump
    Jump {
        /// Destination offset
        target: u32,
    },
    /// Jump when `global` is falsy
    JumpIfFalse {
        /// Global slot tested
        global: u32,
        /// Destination offset
        target: u32,
    },
    /// Assign `value` to `global`
    Set {
        /// Global slot assigned
        global: u32,
        /// Constant value
        value: TaggedValue,
    },
    /// Call the function bound to `function`
    Call {
        /// Global slot holding the function
        function: u32,
        /// Constant arguments
        args: Vec<TaggedValue>,
        /// Global receiving the result, if any
        dest: Option<u32>,
    },
}

impl Instruction {
    /// Operation code
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::End => Opcode::End,
            Self::Line { .. } => Opcode::Line,
            Self::Choices { .. } => Opcode::Choices,
            Self::Jump { .. } => Opcode::Jump,
            Self::JumpIfFalse { .. } => Opcode::JumpIfFalse,
            Self::Set { .. } => Opcode::Set,
            Self::Call { .. } => Opcode::Call,
        }
    }

    /// Append the encoded instruction to `out`
    pub fn encode(&self, out: &mut Vec<u8>) -> FormatResult<()> {
        out.push(self.opcode() as u8);
        match self {
            Self::End => {}
            Self::Line {
                speaker,
                content,
                tags,
            } => {
                write_str(speaker, out)?;
                write_str(content, out)?;
                write_tags(tags, out)?;
            }
            Self::Choices { options } => {
                write_count(options.len(), out)?;
                for option in options {
                    write_str(&option.content, out)?;
                    write_tags(&option.tags, out)?;
                    out.extend_from_slice(&option.target.to_le_bytes());
                }
            }
            Self::Jump { target } => out.extend_from_slice(&target.to_le_bytes()),
            Self::JumpIfFalse { global, target } => {
                out.extend_from_slice(&global.to_le_bytes());
                out.extend_from_slice(&target.to_le_bytes());
            }
            Self::Set { global, value } => {
                out.extend_from_slice(&global.to_le_bytes());
                abi::encode(value, out);
            }
            Self::Call {
                function,
                args,
                dest,
            } => {
                out.extend_from_slice(&function.to_le_bytes());
                write_count(args.len(), out)?;
                for arg in args {
                    abi::encode(arg, out);
                }
                out.extend_from_slice(&dest.unwrap_or(DISCARD).to_le_bytes());
            }
        }
        Ok(())
    }

    /// Decode the instruction at `ip`, returning it with the next offset
    pub fn decode(code: &[u8], ip: u32) -> FormatResult<(Self, u32)> {
        let mut reader =
            Reader::at(code, ip as usize).map_err(FormatError::malformed(Section::Code))?;
        let byte = reader
            .read_u8()
            .map_err(FormatError::malformed(Section::Code))?;
        let opcode = Opcode::from_u8(byte).ok_or(FormatError::InvalidOpcode { opcode: byte, ip })?;

        let instruction =
            decode_operands(opcode, &mut reader).map_err(FormatError::malformed(Section::Code))?;
        Ok((instruction, reader.position() as u32))
    }
}

fn decode_operands(opcode: Opcode, reader: &mut Reader<'_>) -> topi_value::DecodeResult<Instruction> {
    Ok(match opcode {
        Opcode::End => Instruction::End,
        Opcode::Line => Instruction::Line {
            speaker: read_str(reader)?,
            content: read_str(reader)?,
            tags: read_tags(reader)?,
        },
        Opcode::Choices => {
            let count = reader.read_u8()?;
            let mut options = Vec::with_capacity(count as usize);
            for _ in 0..count {
                options.push(ChoiceOption {
                    content: read_str(reader)?,
                    tags: read_tags(reader)?,
                    target: reader.read_u32()?,
                });
            }
            Instruction::Choices { options }
        }
        Opcode::Jump => Instruction::Jump {
            target: reader.read_u32()?,
        },
        Opcode::JumpIfFalse => Instruction::JumpIfFalse {
            global: reader.read_u32()?,
            target: reader.read_u32()?,
        },
        Opcode::Set => Instruction::Set {
            global: reader.read_u32()?,
            value: abi::decode(reader)?,
        },
        Opcode::Call => {
            let function = reader.read_u32()?;
            let argc = reader.read_u8()?;
            let mut args = Vec::with_capacity(argc as usize);
            for _ in 0..argc {
                args.push(abi::decode(reader)?);
            }
            let dest = reader.read_u32()?;
            Instruction::Call {
                function,
                args,
                dest: (dest != DISCARD).then_some(dest),
            }
        }
    })
}

fn read_str(reader: &mut Reader<'_>) -> topi_value::DecodeResult<String> {
    let len = reader.read_u16()? as usize;
    reader.read_str(len).map(str::to_string)
}

fn read_tags(reader: &mut Reader<'_>) -> topi_value::DecodeResult<Vec<String>> {
    let count = reader.read_u8()?;
    (0..count).map(|_| read_str(reader)).collect()
}

pub(crate) fn write_str(s: &str, out: &mut Vec<u8>) -> FormatResult<()> {
    let len = u16::try_from(s.len()).map_err(|_| FormatError::Oversized(s.to_string()))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_count(count: usize, out: &mut Vec<u8>) -> FormatResult<()> {
    let count = u8::try_from(count).map_err(|_| FormatError::Oversized(format!("{count} operands")))?;
    out.push(count);
    Ok(())
}

fn write_tags(tags: &[String], out: &mut Vec<u8>) -> FormatResult<()> {
    write_count(tags.len(), out)?;
    for tag in tags {
        write_str(tag, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(instruction: &Instruction) -> Vec<u8> {
        let mut out = Vec::new();
        instruction.encode(&mut out).unwrap();
        out
    }

    #[test]
    fn test_decode_returns_next_offset() {
        let mut code = encoded(&Instruction::Jump { target: 7 });
        let jump_len = code.len() as u32;
        code.extend(encoded(&Instruction::End));

        let (first, next) = Instruction::decode(&code, 0).unwrap();
        assert_eq!(first, Instruction::Jump { target: 7 });
        assert_eq!(next, jump_len);
        assert_eq!(Instruction::decode(&code, next).unwrap().0, Instruction::End);
    }

    #[test]
    fn test_line_with_tags() {
        let line = Instruction::Line {
            speaker: "Mara".into(),
            content: "Hello".into(),
            tags: vec!["greeting".into(), "calm".into()],
        };
        let code = encoded(&line);
        assert_eq!(Instruction::decode(&code, 0).unwrap(), (line, code.len() as u32));
    }

    #[test]
    fn test_call_discard_destination() {
        let call = Instruction::Call {
            function: 2,
            args: vec![1.into(), "x".into()],
            dest: None,
        };
        let code = encoded(&call);
        assert_eq!(&code[code.len() - 4..], &DISCARD.to_le_bytes());
        assert_eq!(Instruction::decode(&code, 0).unwrap().0, call);
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(
            Instruction::decode(&[0xEE], 0),
            Err(FormatError::InvalidOpcode { opcode: 0xEE, ip: 0 })
        );
    }

    #[test]
    fn test_truncated_operand() {
        let code = encoded(&Instruction::JumpIfFalse { global: 1, target: 9 });
        let err = Instruction::decode(&code[..code.len() - 1], 0).unwrap_err();
        assert!(err.is_truncated());
    }

    #[test]
    fn test_ip_past_end() {
        assert!(Instruction::decode(&[0], 5).is_err());
    }
}
