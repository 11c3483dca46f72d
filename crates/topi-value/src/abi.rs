//! Wire form of [`TaggedValue`]
//!
//! ```text
//! tag: u8
//! Nil     -
//! Bool    u8 (0 | 1)
//! Number  f64
//! String  u32 len, UTF-8 bytes
//! List    u32 count, count values
//! Set     u32 count, count values (unique)
//! Map     u32 count, count (key, value) pairs (unique keys)
//! Enum    u32 len, type name, u32 len, value
//! ```
//!
//! All integers are little-endian. Collections are read by their declared
//! count; the decoder never scans for a terminator.

use crate::error::{DecodeError, DecodeResult};
use crate::reader::Reader;
use crate::value::{EnumValue, Tag, TaggedValue, ValueMap, ValueSet};

/// Deepest collection nesting the decoder accepts
pub const MAX_DEPTH: usize = 64;

/// Most entries a single set or map may declare
///
/// Members compare with numeric tolerance, so uniqueness is checked by a
/// linear scan and decoding costs O(n²) in the entry count.
pub const MAX_UNIQUE_ENTRIES: usize = 4096;

/// Append the wire form of `value` to `out`
pub fn encode(value: &TaggedValue, out: &mut Vec<u8>) {
    out.push(value.tag() as u8);
    match value {
        TaggedValue::Nil => {}
        TaggedValue::Bool(b) => out.push(u8::from(*b)),
        TaggedValue::Number(n) => out.extend_from_slice(&n.to_le_bytes()),
        TaggedValue::String(s) => encode_str(s, out),
        TaggedValue::List(items) => {
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode(item, out);
            }
        }
        TaggedValue::Set(set) => {
            out.extend_from_slice(&(set.len() as u32).to_le_bytes());
            for item in set {
                encode(item, out);
            }
        }
        TaggedValue::Map(map) => {
            out.extend_from_slice(&(map.len() as u32).to_le_bytes());
            for (k, v) in map.iter() {
                encode(k, out);
                encode(v, out);
            }
        }
        TaggedValue::Enum(e) => {
            encode_str(&e.type_name, out);
            encode_str(&e.value, out);
        }
    }
}

/// Encode a value into a fresh buffer
pub fn encode_to_vec(value: &TaggedValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode(value, &mut out);
    out
}

fn encode_str(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Decode one value at the reader's position
pub fn decode(reader: &mut Reader<'_>) -> DecodeResult<TaggedValue> {
    decode_nested(reader, 0)
}

/// Decode a buffer that must contain exactly one value
pub fn decode_exact(bytes: &[u8]) -> DecodeResult<TaggedValue> {
    let mut reader = Reader::new(bytes);
    let value = decode(&mut reader)?;
    if !reader.is_empty() {
        return Err(DecodeError::TrailingBytes(reader.remaining()));
    }
    Ok(value)
}

fn decode_nested(reader: &mut Reader<'_>, depth: usize) -> DecodeResult<TaggedValue> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::TooDeep(MAX_DEPTH));
    }
    let offset = reader.position();
    let byte = reader.read_u8()?;
    let tag = Tag::from_u8(byte).ok_or(DecodeError::InvalidTag { tag: byte, offset })?;

    Ok(match tag {
        Tag::Nil => TaggedValue::Nil,
        Tag::Bool => {
            let offset = reader.position();
            match reader.read_u8()? {
                0 => TaggedValue::Bool(false),
                1 => TaggedValue::Bool(true),
                byte => return Err(DecodeError::InvalidBool { byte, offset }),
            }
        }
        Tag::Number => TaggedValue::Number(reader.read_f64()?),
        Tag::String => TaggedValue::String(decode_str(reader)?),
        Tag::List => {
            let count = reader.read_u32()? as usize;
            // Every value is at least one byte, so the input bounds the allocation
            let mut items = Vec::with_capacity(count.min(reader.remaining()));
            for _ in 0..count {
                items.push(decode_nested(reader, depth + 1)?);
            }
            TaggedValue::List(items)
        }
        Tag::Set => {
            let count = read_unique_count(reader, 1)?;
            let mut set = ValueSet::new();
            for _ in 0..count {
                let at = reader.position();
                if !set.insert(decode_nested(reader, depth + 1)?) {
                    return Err(DecodeError::DuplicateMember(at));
                }
            }
            TaggedValue::Set(set)
        }
        Tag::Map => {
            let count = read_unique_count(reader, 2)?;
            let mut map = ValueMap::new();
            for _ in 0..count {
                let at = reader.position();
                let key = decode_nested(reader, depth + 1)?;
                let value = decode_nested(reader, depth + 1)?;
                if map.insert(key, value).is_some() {
                    return Err(DecodeError::DuplicateKey(at));
                }
            }
            TaggedValue::Map(map)
        }
        Tag::Enum => {
            let type_name = decode_str(reader)?;
            let value = decode_str(reader)?;
            TaggedValue::Enum(EnumValue { type_name, value })
        }
    })
}

// Entry count of a set or map; `min_entry` is the smallest wire size of one entry
fn read_unique_count(reader: &mut Reader<'_>, min_entry: usize) -> DecodeResult<usize> {
    let offset = reader.position();
    let count = reader.read_u32()? as usize;
    let limit = MAX_UNIQUE_ENTRIES.min(reader.remaining() / min_entry);
    if count > limit {
        return Err(DecodeError::TooManyEntries {
            count,
            limit,
            offset,
        });
    }
    Ok(count)
}

fn decode_str(reader: &mut Reader<'_>) -> DecodeResult<String> {
    let len = reader.read_u32()? as usize;
    reader.read_str(len).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_value_survives_the_wire() {
        let mut map = ValueMap::new();
        map.insert("hp".into(), 10.into());
        map.insert(TaggedValue::enumeration("Act", "one"), TaggedValue::Nil);
        let value = TaggedValue::List(vec![
            true.into(),
            "line".into(),
            TaggedValue::Set([1.into(), 2.into()].into_iter().collect()),
            TaggedValue::Map(map),
        ]);

        let bytes = encode_to_vec(&value);
        assert_eq!(decode_exact(&bytes).unwrap(), value);
    }

    #[test]
    fn test_number_layout() {
        let bytes = encode_to_vec(&TaggedValue::Number(1.5));
        assert_eq!(bytes[0], Tag::Number as u8);
        assert_eq!(&bytes[1..], &1.5f64.to_le_bytes());
    }

    #[test]
    fn test_declared_count_is_respected() {
        // List declares 3 items but only 2 follow
        let mut bytes = vec![Tag::List as u8];
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.push(Tag::Nil as u8);
        bytes.push(Tag::Nil as u8);
        assert!(matches!(
            decode_exact(&bytes),
            Err(DecodeError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn test_set_entry_count_bounded() {
        let mut bytes = vec![Tag::Set as u8];
        bytes.extend_from_slice(&((MAX_UNIQUE_ENTRIES + 1) as u32).to_le_bytes());
        for i in 0..=MAX_UNIQUE_ENTRIES {
            bytes.push(Tag::Number as u8);
            bytes.extend_from_slice(&(i as f64).to_le_bytes());
        }
        assert!(matches!(
            decode_exact(&bytes),
            Err(DecodeError::TooManyEntries { count, limit: MAX_UNIQUE_ENTRIES, offset: 1 })
                if count == MAX_UNIQUE_ENTRIES + 1
        ));

        // A map cannot declare more pairs than its bytes could hold
        let mut bytes = vec![Tag::Map as u8];
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[Tag::Nil as u8; 4]);
        assert!(matches!(
            decode_exact(&bytes),
            Err(DecodeError::TooManyEntries { count: 3, limit: 2, .. })
        ));
    }

    #[test]
    fn test_huge_count_does_not_allocate_up_front() {
        let mut bytes = vec![Tag::List as u8];
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(decode_exact(&bytes).is_err());
    }

    #[test]
    fn test_invalid_tag_and_bool() {
        assert_eq!(
            decode_exact(&[9]),
            Err(DecodeError::InvalidTag { tag: 9, offset: 0 })
        );
        assert_eq!(
            decode_exact(&[Tag::Bool as u8, 2]),
            Err(DecodeError::InvalidBool { byte: 2, offset: 1 })
        );
    }

    #[test]
    fn test_duplicate_set_member_rejected() {
        let mut bytes = vec![Tag::Set as u8];
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.push(Tag::Nil as u8);
        bytes.push(Tag::Nil as u8);
        assert_eq!(decode_exact(&bytes), Err(DecodeError::DuplicateMember(6)));
    }

    #[test]
    fn test_depth_limit() {
        let mut bytes = Vec::new();
        for _ in 0..=MAX_DEPTH + 1 {
            bytes.push(Tag::List as u8);
            bytes.extend_from_slice(&1u32.to_le_bytes());
        }
        bytes.push(Tag::Nil as u8);
        assert_eq!(decode_exact(&bytes), Err(DecodeError::TooDeep(MAX_DEPTH)));
    }

    #[test]
    fn test_trailing_bytes() {
        assert_eq!(
            decode_exact(&[Tag::Nil as u8, 0]),
            Err(DecodeError::TrailingBytes(1))
        );
    }
}
