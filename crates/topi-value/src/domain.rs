//! Enum domains
//!
//! A domain lists the members an enum type may hold. Sequential domains
//! describe progressions (acts, quest stages) that may only move forward.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ValueError, ValueResult};
use crate::value::{EnumValue, TaggedValue};

/// Declared members of an enum type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDomain {
    name: String,
    #[serde(default)]
    sequential: bool,
    values: Vec<String>,
}

impl EnumDomain {
    /// Unordered domain
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            sequential: false,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Domain whose values may only advance
    pub fn sequential<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sequential: true,
            ..Self::new(name, values)
        }
    }

    /// Enum type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether values may only advance
    pub fn is_sequential(&self) -> bool {
        self.sequential
    }

    /// Members in declaration order
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Position of a member
    pub fn index_of(&self, value: &str) -> Option<usize> {
        self.values.iter().position(|v| v == value)
    }

    /// Build a member value, checking membership
    pub fn value(&self, value: &str) -> ValueResult<EnumValue> {
        let candidate = EnumValue::new(self.name.clone(), value);
        self.check(&candidate)?;
        Ok(candidate)
    }

    /// Check type and membership, returning the member's index
    pub fn check(&self, value: &EnumValue) -> ValueResult<usize> {
        if value.type_name != self.name {
            return Err(ValueError::WrongEnumType {
                expected: self.name.clone(),
                actual: value.type_name.clone(),
            });
        }
        self.index_of(&value.value)
            .ok_or_else(|| ValueError::NotInDomain {
                type_name: self.name.clone(),
                value: value.value.clone(),
            })
    }

    /// Check that `next` may replace `current`
    pub fn check_transition(&self, current: Option<&EnumValue>, next: &EnumValue) -> ValueResult<()> {
        let next_index = self.check(next)?;
        if !self.sequential {
            return Ok(());
        }
        let Some(current) = current.filter(|c| c.type_name == self.name) else {
            return Ok(());
        };
        match self.index_of(&current.value) {
            Some(current_index) if next_index < current_index => {
                Err(ValueError::SequenceRegression {
                    type_name: self.name.clone(),
                    from: current.value.clone(),
                    to: next.value.clone(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Registry of known enum domains
#[derive(Debug, Clone, Default)]
pub struct EnumDomains {
    domains: FxHashMap<String, EnumDomain>,
}

impl EnumDomains {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a domain, replacing any previous one with the same name
    pub fn declare(&mut self, domain: EnumDomain) -> Option<EnumDomain> {
        self.domains.insert(domain.name.clone(), domain)
    }

    /// Look up a domain
    pub fn get(&self, name: &str) -> Option<&EnumDomain> {
        self.domains.get(name)
    }

    /// Declared domains in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &EnumDomain> {
        self.domains.values()
    }

    /// Number of declared domains
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Check if nothing is declared
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Validate replacing `current` with `next`
    ///
    /// Non-enum values and enums of undeclared types pass unchecked.
    pub fn check_assignment(&self, current: &TaggedValue, next: &TaggedValue) -> ValueResult<()> {
        let TaggedValue::Enum(next) = next else {
            return Ok(());
        };
        let Some(domain) = self.domains.get(&next.type_name) else {
            return Ok(());
        };
        let current = match current {
            TaggedValue::Enum(e) => Some(e),
            _ => None,
        };
        domain.check_transition(current, next)
    }
}

impl FromIterator<EnumDomain> for EnumDomains {
    fn from_iter<I: IntoIterator<Item = EnumDomain>>(iter: I) -> Self {
        let mut domains = Self::new();
        for domain in iter {
            domains.declare(domain);
        }
        domains
    }
}
