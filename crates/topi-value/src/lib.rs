//! # Topi Values
//!
//! Tagged values exchanged between the Topi dialogue VM and its host.
//!
//! ## Design Principles
//!
//! - **Sum type**: every tag owns exactly one payload, read through checked accessors
//! - **Tolerant numbers**: numbers compare equal within [`NUMBER_EPSILON`]
//! - **Counted wire form**: collections are decoded by declared count, never by terminator
//! - **Explicit ownership**: buffers handed across the boundary return to their producer

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod abi;
pub mod buffer;
pub mod domain;
pub mod error;
pub mod json;
pub mod reader;
pub mod value;

pub use buffer::{Deallocator, ValueBuffer};
pub use domain::{EnumDomain, EnumDomains};
pub use error::{DecodeError, DecodeResult, ValueError, ValueResult};
pub use reader::Reader;
pub use value::{EnumValue, NUMBER_EPSILON, Tag, TaggedValue, ValueMap, ValueSet};
