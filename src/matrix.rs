//! Host matrices and address-space matrix views
//!
//! A [`MatrixView`] describes a rectangular region of external memory by base
//! address, shape and row stride. The scheduler only ever borrows views; the
//! storage behind them belongs to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

use crate::error::{ScheduleError, ScheduleResult};
use crate::hardware::{Acc, Elem};

/// Fixed-width signed element that can live in external memory
pub trait Element: Copy + Default + PartialEq + fmt::Debug + 'static {
    /// Width in bytes
    const BYTES: usize;

    fn write_le(self, out: &mut [u8]);

    fn read_le(bytes: &[u8]) -> Self;
}

impl Element for Elem {
    const BYTES: usize = 1;

    fn write_le(self, out: &mut [u8]) {
        out[0] = self as u8;
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] as Elem
    }
}

impl Element for Acc {
    const BYTES: usize = 4;

    fn write_le(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        Acc::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Dense row-major matrix held on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Element> Matrix<T> {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![T::default(); rows * cols],
        }
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> ScheduleResult<Self> {
        if data.len() != rows * cols {
            return Err(ScheduleError::shape(
                format!("{} elements for ({}, {})", rows * cols, rows, cols),
                data.len().to_string(),
            ));
        }
        Ok(Self { rows, cols, data })
    }

    /// Build a matrix by evaluating `f(row, col)` for every cell
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[T] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

/// Rectangular window into external memory
///
/// `row_stride` is counted in elements and may exceed `cols`, which is how
/// sub-matrices of a larger allocation are described.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct MatrixView<T> {
    pub base: u64,
    pub rows: usize,
    pub cols: usize,
    pub row_stride: usize,
    #[serde(skip)]
    _elem: PhantomData<T>,
}

// Manual impls: the element type is a marker and must not need Clone/Debug.
impl<T> Clone for MatrixView<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for MatrixView<T> {}

impl<T> PartialEq for MatrixView<T> {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base
            && self.rows == other.rows
            && self.cols == other.cols
            && self.row_stride == other.row_stride
    }
}

impl<T> Eq for MatrixView<T> {}

impl<T> fmt::Debug for MatrixView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatrixView")
            .field("base", &format_args!("{:#x}", self.base))
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("row_stride", &self.row_stride)
            .finish()
    }
}

impl<T: Element> MatrixView<T> {
    pub fn new(base: u64, rows: usize, cols: usize, row_stride: usize) -> Self {
        Self {
            base,
            rows,
            cols,
            row_stride,
            _elem: PhantomData,
        }
    }

    /// Densely packed view (`row_stride == cols`)
    pub fn packed(base: u64, rows: usize, cols: usize) -> Self {
        Self::new(base, rows, cols, cols)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Distance between consecutive rows in bytes
    pub fn stride_bytes(&self) -> u64 {
        (self.row_stride * T::BYTES) as u64
    }

    /// Byte address of element `(row, col)`
    pub fn address_of(&self, row: usize, col: usize) -> u64 {
        self.base + ((row * self.row_stride + col) * T::BYTES) as u64
    }

    /// Byte address of the top-left element of tile `(tile_row, tile_col)`
    pub fn tile_address(&self, tile_row: usize, tile_col: usize, dim: usize) -> u64 {
        self.address_of(tile_row * dim, tile_col * dim)
    }

    /// Window of `rows`x`cols` starting at `(row, col)`, sharing the stride
    pub fn sub_view(&self, row: usize, col: usize, rows: usize, cols: usize) -> Self {
        Self::new(self.address_of(row, col), rows, cols, self.row_stride)
    }

    /// Number of bytes from `base` to one past the last element
    pub fn extent_bytes(&self) -> u64 {
        if self.rows == 0 || self.cols == 0 {
            return 0;
        }
        (((self.rows - 1) * self.row_stride + self.cols) * T::BYTES) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_addressing() {
        let view = MatrixView::<Acc>::new(0x1000, 8, 8, 12);
        assert_eq!(view.stride_bytes(), 48);
        assert_eq!(view.address_of(1, 2), 0x1000 + 56);
        assert_eq!(view.tile_address(1, 1, 4), 0x1000 + (4 * 12 + 4) * 4);
        assert_eq!(view.extent_bytes(), ((7 * 12 + 8) * 4) as u64);
    }

    #[test]
    fn test_sub_view_keeps_stride() {
        let view = MatrixView::<Elem>::packed(0x2000, 16, 16);
        let sub = view.sub_view(4, 8, 4, 4);
        assert_eq!(sub.base, 0x2000 + 4 * 16 + 8);
        assert_eq!(sub.row_stride, 16);
        assert_eq!(sub.shape(), (4, 4));
    }

    #[test]
    fn test_matrix_from_fn() {
        let m = Matrix::<Elem>::from_fn(2, 3, |r, c| (r * 3 + c) as Elem);
        assert_eq!(m.row(1), &[3, 4, 5]);
        assert_eq!(m.get(0, 2), 2);
        assert!(Matrix::<Elem>::from_vec(2, 2, vec![1, 2, 3]).is_err());
    }

    #[test]
    fn test_element_round_trip_bytes() {
        let mut buf = [0u8; 4];
        (-5i32).write_le(&mut buf);
        assert_eq!(Acc::read_le(&buf), -5);
        (-3i8).write_le(&mut buf);
        assert_eq!(Elem::read_le(&buf), -3);
    }
}
