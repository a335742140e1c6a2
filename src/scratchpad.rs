//! Scratchpad address space and its static partitioning
//!
//! Addresses are row indices inside a 32-bit field. Bit 31 selects the
//! accumulator instead of the main scratchpad; inside the accumulator, bit 30
//! makes a write add onto the existing contents instead of replacing them.
//!
//! ```text
//!   0 ........................ P          main partition A (I x K tiles)
//!   P ........................ 2P         main partition B (K x J tiles)
//!   1<<31 ....                            bias / accumulator (I x J tiles)
//!   3<<30 ....                            output: same rows, accumulate bit set
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

use crate::hardware::ArrayConfig;

/// Width of the scratchpad address field in an operand
pub const ADDR_LEN: u32 = 32;

/// Opaque scratchpad address, or the all-ones "discard" sentinel
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScratchpadAddress(u64);

impl ScratchpadAddress {
    /// Write nothing / read zeros
    pub const GARBAGE: ScratchpadAddress = ScratchpadAddress(u64::MAX);

    pub const ACCUMULATOR_BIT: u64 = 1 << (ADDR_LEN - 1);
    pub const ACCUMULATE_BIT: u64 = 1 << (ADDR_LEN - 2);
    const ROW_MASK: u64 = Self::ACCUMULATE_BIT - 1;

    pub const fn new(raw: u64) -> Self {
        ScratchpadAddress(raw)
    }

    /// Decode the address field of an operand word
    pub fn from_operand(word: u64) -> Self {
        if word == u64::MAX {
            Self::GARBAGE
        } else {
            ScratchpadAddress(word & 0xFFFF_FFFF)
        }
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_garbage(self) -> bool {
        self == Self::GARBAGE
    }

    pub fn is_accumulator(self) -> bool {
        !self.is_garbage() && self.0 & Self::ACCUMULATOR_BIT != 0
    }

    /// Accumulator writes add rather than overwrite
    pub fn accumulates(self) -> bool {
        self.is_accumulator() && self.0 & Self::ACCUMULATE_BIT != 0
    }

    /// Row index inside the selected memory
    pub fn row(self) -> usize {
        if self.is_accumulator() {
            (self.0 & Self::ROW_MASK) as usize
        } else {
            (self.0 & (Self::ACCUMULATOR_BIT - 1)) as usize
        }
    }

    /// Same rows, overwriting instead of accumulating
    pub fn without_accumulate(self) -> Self {
        if self.is_garbage() {
            self
        } else {
            ScratchpadAddress(self.0 & !Self::ACCUMULATE_BIT)
        }
    }

    /// Address `rows` rows further on, keeping the region bits
    pub fn offset(self, rows: usize) -> Self {
        if self.is_garbage() {
            self
        } else {
            ScratchpadAddress(self.0 + rows as u64)
        }
    }
}

impl fmt::Debug for ScratchpadAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_garbage() {
            write!(f, "GARBAGE")
        } else {
            write!(f, "{:#010x}", self.0)
        }
    }
}

/// What a tile in the scratchpad is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandRole {
    A,
    B,
    Bias,
    Output,
}

/// Base addresses of the four operand partitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchpadLayout {
    dim: usize,
    a_base: u64,
    b_base: u64,
    bias_base: u64,
    output_base: u64,
}

impl ScratchpadLayout {
    pub fn new(config: &ArrayConfig) -> Self {
        Self {
            dim: config.dim,
            a_base: 0,
            b_base: config.partition_rows() as u64,
            bias_base: ScratchpadAddress::ACCUMULATOR_BIT,
            output_base: ScratchpadAddress::ACCUMULATOR_BIT | ScratchpadAddress::ACCUMULATE_BIT,
        }
    }

    pub fn base(&self, role: OperandRole) -> ScratchpadAddress {
        ScratchpadAddress(match role {
            OperandRole::A => self.a_base,
            OperandRole::B => self.b_base,
            OperandRole::Bias => self.bias_base,
            OperandRole::Output => self.output_base,
        })
    }

    /// Address of tile `(tile_row, tile_col)` in a row-major grid
    /// `block_width` tiles wide
    pub fn address_for(
        &self,
        role: OperandRole,
        tile_row: usize,
        tile_col: usize,
        block_width: usize,
    ) -> ScratchpadAddress {
        self.base(role)
            .offset((tile_row * block_width + tile_col) * self.dim)
    }

    /// Raw address range occupied by a `tile_rows`x`tile_cols` grid
    pub fn span(&self, role: OperandRole, tile_rows: usize, tile_cols: usize) -> Range<u64> {
        let start = self.base(role).raw();
        start..start + (tile_rows * tile_cols * self.dim) as u64
    }

    /// Accumulator rows addressed by a grid, ignoring the accumulate bit
    pub fn accumulator_rows(&self, role: OperandRole, tile_rows: usize, tile_cols: usize) -> Range<usize> {
        let start = self.base(role).row();
        start..start + tile_rows * tile_cols * self.dim
    }
}
