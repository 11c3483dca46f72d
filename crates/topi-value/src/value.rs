//! Tagged value representation

use std::fmt;

use crate::error::{ValueError, ValueResult};

/// Numbers closer than this compare equal
pub const NUMBER_EPSILON: f64 = 1e-4;

/// Discriminant of a [`TaggedValue`], also its wire tag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Tag {
    /// No value
    Nil = 0,
    /// Boolean
    Bool = 1,
    /// Floating point number
    Number = 2,
    /// UTF-8 string
    String = 3,
    /// Ordered list
    List = 4,
    /// Set of unique members
    Set = 5,
    /// Key/value map
    Map = 6,
    /// Enum type and value
    Enum = 7,
}

impl Tag {
    /// Decode a tag byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Nil,
            1 => Self::Bool,
            2 => Self::Number,
            3 => Self::String,
            4 => Self::List,
            5 => Self::Set,
            6 => Self::Map,
            7 => Self::Enum,
            _ => return None,
        })
    }

    /// Human readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::Nil => "Nil",
            Self::Bool => "Bool",
            Self::Number => "Number",
            Self::String => "String",
            Self::List => "List",
            Self::Set => "Set",
            Self::Map => "Map",
            Self::Enum => "Enum",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Enum payload: the enum's type name and its current value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnumValue {
    /// Declared enum type
    pub type_name: String,
    /// Current member
    pub value: String,
}

impl EnumValue {
    /// Create an enum payload
    pub fn new(type_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.value)
    }
}

/// A set of values, unique under [`TaggedValue`] equality
#[derive(Debug, Clone, Default)]
pub struct ValueSet {
    items: Vec<TaggedValue>,
}

impl ValueSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a member, returns false if an equal member was present
    pub fn insert(&mut self, value: TaggedValue) -> bool {
        if self.contains(&value) {
            return false;
        }
        self.items.push(value);
        true
    }

    /// Check membership
    pub fn contains(&self, value: &TaggedValue) -> bool {
        self.items.iter().any(|item| item == value)
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate members in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, TaggedValue> {
        self.items.iter()
    }
}

impl PartialEq for ValueSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.items.iter().all(|item| other.contains(item))
    }
}

impl FromIterator<TaggedValue> for ValueSet {
    fn from_iter<I: IntoIterator<Item = TaggedValue>>(iter: I) -> Self {
        let mut set = Self::new();
        for item in iter {
            set.insert(item);
        }
        set
    }
}

impl<'a> IntoIterator for &'a ValueSet {
    type Item = &'a TaggedValue;
    type IntoIter = std::slice::Iter<'a, TaggedValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// An ordered map with unique keys
#[derive(Debug, Clone, Default)]
pub struct ValueMap {
    entries: Vec<(TaggedValue, TaggedValue)>,
}

impl ValueMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, returning the previous value for the key
    pub fn insert(&mut self, key: TaggedValue, value: TaggedValue) -> Option<TaggedValue> {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Look up a key
    pub fn get(&self, key: &TaggedValue) -> Option<&TaggedValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Check if a key is present
    pub fn contains_key(&self, key: &TaggedValue) -> bool {
        self.get(key).is_some()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&TaggedValue, &TaggedValue)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl PartialEq for ValueMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| o == v))
    }
}

impl FromIterator<(TaggedValue, TaggedValue)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (TaggedValue, TaggedValue)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// A value crossing the VM boundary
///
/// Each variant owns its payload; nothing is shared between variants.
/// Use the `as_*` accessors to read a payload: they fail with
/// [`ValueError::TagMismatch`] instead of coercing.
#[derive(Debug, Clone, Default)]
pub enum TaggedValue {
    /// No value
    #[default]
    Nil,
    /// Boolean
    Bool(bool),
    /// Number
    Number(f64),
    /// String
    String(String),
    /// List
    List(Vec<TaggedValue>),
    /// Set
    Set(ValueSet),
    /// Map
    Map(ValueMap),
    /// Enum
    Enum(EnumValue),
}

impl TaggedValue {
    /// Create an enum value
    pub fn enumeration(type_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Enum(EnumValue::new(type_name, value))
    }

    /// The value's tag
    pub fn tag(&self) -> Tag {
        match self {
            Self::Nil => Tag::Nil,
            Self::Bool(_) => Tag::Bool,
            Self::Number(_) => Tag::Number,
            Self::String(_) => Tag::String,
            Self::List(_) => Tag::List,
            Self::Set(_) => Tag::Set,
            Self::Map(_) => Tag::Map,
            Self::Enum(_) => Tag::Enum,
        }
    }

    /// Check for nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Nil and `false` are falsy, everything else is truthy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    fn mismatch(&self, expected: Tag) -> ValueError {
        ValueError::TagMismatch {
            expected,
            actual: self.tag(),
        }
    }

    /// Read a boolean payload
    pub fn as_bool(&self) -> ValueResult<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            _ => Err(self.mismatch(Tag::Bool)),
        }
    }

    /// Read a number payload
    pub fn as_number(&self) -> ValueResult<f64> {
        match self {
            Self::Number(n) => Ok(*n),
            _ => Err(self.mismatch(Tag::Number)),
        }
    }

    /// Read a number payload rounded to the nearest integer
    pub fn as_i32(&self) -> ValueResult<i32> {
        self.as_number().map(|n| n.round() as i32)
    }

    /// Read a string payload
    pub fn as_str(&self) -> ValueResult<&str> {
        match self {
            Self::String(s) => Ok(s),
            _ => Err(self.mismatch(Tag::String)),
        }
    }

    /// Read a list payload
    pub fn as_list(&self) -> ValueResult<&[TaggedValue]> {
        match self {
            Self::List(items) => Ok(items),
            _ => Err(self.mismatch(Tag::List)),
        }
    }

    /// Read a set payload
    pub fn as_set(&self) -> ValueResult<&ValueSet> {
        match self {
            Self::Set(set) => Ok(set),
            _ => Err(self.mismatch(Tag::Set)),
        }
    }

    /// Read a map payload
    pub fn as_map(&self) -> ValueResult<&ValueMap> {
        match self {
            Self::Map(map) => Ok(map),
            _ => Err(self.mismatch(Tag::Map)),
        }
    }

    /// Read an enum payload
    pub fn as_enum(&self) -> ValueResult<&EnumValue> {
        match self {
            Self::Enum(e) => Ok(e),
            _ => Err(self.mismatch(Tag::Enum)),
        }
    }
}

impl PartialEq for TaggedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => (a - b).abs() < NUMBER_EPSILON,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Enum(a), Self::Enum(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::List(items) => write_items(f, "List", items.iter()),
            Self::Set(set) => write_items(f, "Set", set.iter()),
            Self::Map(map) => {
                f.write_str("Map{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Self::Enum(e) => write!(f, "{e}"),
        }
    }
}

fn write_items<'a>(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    items: impl Iterator<Item = &'a TaggedValue>,
) -> fmt::Result {
    write!(f, "{name}{{")?;
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str("}")
}

impl From<bool> for TaggedValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for TaggedValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<f32> for TaggedValue {
    fn from(n: f32) -> Self {
        Self::Number(n as f64)
    }
}

impl From<i32> for TaggedValue {
    fn from(n: i32) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for TaggedValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for TaggedValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<EnumValue> for TaggedValue {
    fn from(e: EnumValue) -> Self {
        Self::Enum(e)
    }
}

impl From<Vec<TaggedValue>> for TaggedValue {
    fn from(items: Vec<TaggedValue>) -> Self {
        Self::List(items)
    }
}
