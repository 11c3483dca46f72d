//! Opaque VM handles

use std::fmt;

/// Generational index naming a live VM in a [`crate::Library`]
///
/// A handle stops resolving once its VM is destroyed, even if the slot is
/// later reused for another VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmHandle {
    index: u32,
    generation: u32,
}

impl VmHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Arena slot
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at creation
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into a single integer, e.g. for a host-side map key
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Unpack from [`VmHandle::to_bits`]
    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for VmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vm#{}v{}", self.index, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits() {
        let handle = VmHandle::new(7, 3);
        assert_eq!(VmHandle::from_bits(handle.to_bits()), handle);
        assert_eq!(handle.to_string(), "vm#7v3");
    }
}
