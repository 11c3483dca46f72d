//! Buffers handed from a value producer to a consumer
//!
//! The producer allocates the bytes and supplies a [`Deallocator`]. The
//! consumer reads them and gives them back through that entry point when
//! the [`ValueBuffer`] is released or dropped. The consumer never frees
//! the bytes with its own allocator.

use std::fmt;
use std::sync::Arc;

use crate::abi;
use crate::error::DecodeResult;
use crate::value::{Tag, TaggedValue};

/// Producer-side release entry point
pub trait Deallocator: Send + Sync {
    /// Take back a buffer previously handed out
    fn release(&self, bytes: Box<[u8]>);
}

/// Wire-encoded value owned by its producer until released
pub struct ValueBuffer {
    bytes: Option<Box<[u8]>>,
    owner: Arc<dyn Deallocator>,
}

impl ValueBuffer {
    /// Wrap bytes produced by `owner`
    pub fn new(bytes: Box<[u8]>, owner: Arc<dyn Deallocator>) -> Self {
        Self {
            bytes: Some(bytes),
            owner,
        }
    }

    /// Encode `value` and hand it out on behalf of `owner`
    pub fn encode(value: &TaggedValue, owner: Arc<dyn Deallocator>) -> Self {
        Self::new(abi::encode_to_vec(value).into_boxed_slice(), owner)
    }

    /// Raw wire bytes; empty once released
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_deref().unwrap_or(&[])
    }

    /// Tag of the held value
    pub fn tag(&self) -> Option<Tag> {
        self.as_bytes().first().copied().and_then(Tag::from_u8)
    }

    /// Decode the held value
    pub fn decode(&self) -> DecodeResult<TaggedValue> {
        abi::decode_exact(self.as_bytes())
    }

    /// Check whether the bytes went back to the producer
    pub fn is_released(&self) -> bool {
        self.bytes.is_none()
    }

    /// Return the bytes to the producer; later calls do nothing
    pub fn release(&mut self) {
        if let Some(bytes) = self.bytes.take() {
            self.owner.release(bytes);
        }
    }
}

impl Drop for ValueBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ValueBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueBuffer")
            .field("tag", &self.tag())
            .field("len", &self.as_bytes().len())
            .field("released", &self.is_released())
            .finish()
    }
}
