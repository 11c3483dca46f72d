//! Symbol table entries

/// A global variable slot declared by the script
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlobalSymbol {
    /// Variable name
    pub name: String,
    /// Slot index in the VM's global table
    pub index: u32,
    /// Provided by the host rather than the script
    pub is_extern: bool,
    /// Script may reassign it after first initialization
    pub is_mutable: bool,
}

/// A named entry point into the code section
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bough {
    /// Bough name
    pub name: String,
    /// Offset of the first instruction, relative to the code section
    pub entry: u32,
}
