//! Simulated external memory
//!
//! Sparse, paged storage for the byte address space the matrix views point
//! into. Pages are created on first write and unwritten memory reads as zero,
//! so large address spaces cost nothing until used.

use std::collections::BTreeMap;

use crate::matrix::{Element, Matrix, MatrixView};

/// Sparse external memory with a bump allocator for matrices
pub struct HostMemory {
    /// page_address -> page_data
    pages: BTreeMap<u64, Box<[u8; Self::PAGE_SIZE]>>,
    /// Next free address handed out by `alloc`
    next_free: u64,
    bytes_written: u64,
    bytes_read: u64,
}

impl HostMemory {
    pub const PAGE_SIZE: usize = 4096;

    const PAGE_MASK: u64 = !(Self::PAGE_SIZE as u64 - 1);

    /// Allocations start here so that address zero is never a valid matrix
    pub const HEAP_BASE: u64 = 0x1000_0000;

    /// Alignment of every allocation
    pub const ALIGN: u64 = 64;

    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
            next_free: Self::HEAP_BASE,
            bytes_written: 0,
            bytes_read: 0,
        }
    }

    fn page_mut(&mut self, addr: u64) -> &mut [u8; Self::PAGE_SIZE] {
        self.pages
            .entry(addr & Self::PAGE_MASK)
            .or_insert_with(|| Box::new([0u8; Self::PAGE_SIZE]))
    }

    #[inline]
    pub fn write_u8(&mut self, addr: u64, value: u8) {
        let offset = (addr & !Self::PAGE_MASK) as usize;
        self.page_mut(addr)[offset] = value;
        self.bytes_written += 1;
    }

    #[inline]
    pub fn read_u8(&mut self, addr: u64) -> u8 {
        self.bytes_read += 1;
        let offset = (addr & !Self::PAGE_MASK) as usize;
        self.pages
            .get(&(addr & Self::PAGE_MASK))
            .map(|page| page[offset])
            .unwrap_or(0)
    }

    pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.write_u8(addr + i as u64, b);
        }
    }

    pub fn read_bytes(&mut self, addr: u64, len: usize) -> Vec<u8> {
        (0..len).map(|i| self.read_u8(addr + i as u64)).collect()
    }

    pub fn write<T: Element>(&mut self, addr: u64, value: T) {
        let mut buf = [0u8; 8];
        value.write_le(&mut buf);
        self.write_bytes(addr, &buf[..T::BYTES]);
    }

    pub fn read<T: Element>(&mut self, addr: u64) -> T {
        let bytes = self.read_bytes(addr, T::BYTES);
        T::read_le(&bytes)
    }

    /// Reserve `bytes` of address space
    pub fn alloc_bytes(&mut self, bytes: u64) -> u64 {
        let base = self.next_free;
        let size = bytes.max(1);
        self.next_free = (base + size + Self::ALIGN - 1) & !(Self::ALIGN - 1);
        base
    }

    /// Reserve a densely packed `rows`x`cols` matrix
    pub fn alloc<T: Element>(&mut self, rows: usize, cols: usize) -> MatrixView<T> {
        self.alloc_strided(rows, cols, cols)
    }

    /// Reserve a matrix whose rows are `row_stride` elements apart
    pub fn alloc_strided<T: Element>(
        &mut self,
        rows: usize,
        cols: usize,
        row_stride: usize,
    ) -> MatrixView<T> {
        let bytes = (rows * row_stride.max(cols) * T::BYTES) as u64;
        MatrixView::new(self.alloc_bytes(bytes), rows, cols, row_stride.max(cols))
    }

    /// Allocate and fill a packed copy of `matrix`
    pub fn store<T: Element>(&mut self, matrix: &Matrix<T>) -> MatrixView<T> {
        let view = self.alloc(matrix.rows(), matrix.cols());
        self.write_matrix(&view, matrix);
        view
    }

    /// Copy `matrix` into the region described by `view`
    pub fn write_matrix<T: Element>(&mut self, view: &MatrixView<T>, matrix: &Matrix<T>) {
        let rows = view.rows.min(matrix.rows());
        let cols = view.cols.min(matrix.cols());
        for r in 0..rows {
            for c in 0..cols {
                self.write(view.address_of(r, c), matrix.get(r, c));
            }
        }
    }

    /// Read the region described by `view` into a host matrix
    pub fn read_matrix<T: Element>(&mut self, view: &MatrixView<T>) -> Matrix<T> {
        let mut out = Matrix::zeros(view.rows, view.cols);
        for r in 0..view.rows {
            for c in 0..view.cols {
                let value = self.read(view.address_of(r, c));
                out.set(r, c, value);
            }
        }
        out
    }

    /// Number of pages materialized so far
    pub fn resident_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl Default for HostMemory {
    fn default() -> Self {
        Self::new()
    }
}
