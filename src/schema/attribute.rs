//! Attribute metadata: a named value stream over cells.

use crate::config::constants::{DEFAULT_COMPRESSION_LEVEL, VAR_NUM};
use crate::types::{Compressor, Datatype};

/// A named, typed value stream. `val_num` is the fixed number of values per
/// cell, or [`VAR_NUM`] for variable-sized cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    name: String,
    datatype: Datatype,
    val_num: u32,
    compressor: Compressor,
    level: i32,
}

impl Attribute {
    /// A fixed-size attribute holding one value per cell, uncompressed.
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype,
            val_num: 1,
            compressor: Compressor::NoCompression,
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub fn with_val_num(mut self, val_num: u32) -> Self {
        self.val_num = val_num;
        self
    }

    /// Marks the attribute variable-sized (a run of values per cell,
    /// addressed through an offsets stream).
    pub fn var(mut self) -> Self {
        self.val_num = VAR_NUM;
        self
    }

    pub fn with_compressor(mut self, compressor: Compressor, level: i32) -> Self {
        self.compressor = compressor;
        self.level = level;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    pub fn val_num(&self) -> u32 {
        self.val_num
    }

    pub fn compressor(&self) -> Compressor {
        self.compressor
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn var_size(&self) -> bool {
        self.val_num == VAR_NUM
    }

    /// Bytes per cell, or None for variable-sized attributes.
    pub fn cell_size(&self) -> Option<u64> {
        if self.var_size() {
            None
        } else {
            Some(self.val_num as u64 * self.datatype.size() as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_cell_size() {
        let a = Attribute::new("a1", Datatype::Int32);
        assert_eq!(a.cell_size(), Some(4));

        let a = Attribute::new("a3", Datatype::Float32).with_val_num(2);
        assert_eq!(a.cell_size(), Some(8));

        let a = Attribute::new("a2", Datatype::Char).var();
        assert!(a.var_size());
        assert_eq!(a.cell_size(), None);
    }
}
