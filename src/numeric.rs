//! Quantization primitives and the reference matmul
//!
//! Everything here is pure. The reference matmul is the oracle the array
//! path must reproduce bit for bit, so the rounding rule is fixed: round half
//! away from zero on the magnitude, then saturate to `Elem`.

use crate::error::{ScheduleError, ScheduleResult};
use crate::hardware::{Acc, Activation, Elem, QuantConfig};
use crate::matrix::Matrix;

/// Divide by `2^shift` rounding half away from zero, then clamp to `Elem`
pub fn rounding_shift_saturate(value: Acc, shift: u32) -> Elem {
    let shift = shift.min(62);
    let magnitude = (value as i64).abs();
    let rounded = if shift == 0 {
        magnitude
    } else {
        (magnitude + (1i64 << (shift - 1))) >> shift
    };
    let signed = if value < 0 { -rounded } else { rounded };
    signed.clamp(Elem::MIN as i64, Elem::MAX as i64) as Elem
}

pub fn relu(x: Acc) -> Acc {
    x.max(0)
}

/// ReLU clamped to `6 * scale`
pub fn relu6(x: Acc, scale: Acc) -> Acc {
    x.max(0).min(6 * scale)
}

/// Apply `activation` to an already-quantized value
pub fn apply_activation(value: Elem, activation: Activation, relu6_shift: u32) -> Elem {
    let x = value as Acc;
    let activated = match activation {
        Activation::None => x,
        Activation::Relu => relu(x),
        Activation::Relu6 => relu6(x, 1 << relu6_shift.min(24)),
    };
    activated.clamp(Elem::MIN as Acc, Elem::MAX as Acc) as Elem
}

/// Full output stage: rounding shift, saturation, activation
pub fn requantize(value: Acc, quant: &QuantConfig) -> Elem {
    let shifted = rounding_shift_saturate(value, quant.acc_shift);
    apply_activation(shifted, quant.activation, quant.relu6_shift)
}

/// Reference `C = act(round_shift(A * B + D))`
///
/// Sums are formed in the accumulator type with wrapping adds, matching the
/// array's accumulator. `bias == None` is the no-bias case.
pub fn cpu_reference_matmul(
    a: &Matrix<Elem>,
    b: &Matrix<Elem>,
    bias: Option<&Matrix<Acc>>,
    quant: &QuantConfig,
) -> ScheduleResult<Matrix<Elem>> {
    let (m, k) = a.shape();
    let (k2, n) = b.shape();
    if k != k2 {
        return Err(ScheduleError::shape(
            format!("B with {} rows", k),
            format!("{} rows", k2),
        ));
    }
    if let Some(d) = bias {
        if d.shape() != (m, n) {
            return Err(ScheduleError::shape(
                format!("bias of shape ({}, {})", m, n),
                format!("({}, {})", d.rows(), d.cols()),
            ));
        }
    }

    let mut c = Matrix::zeros(m, n);
    for i in 0..m {
        for j in 0..n {
            let mut sum: Acc = 0;
            for p in 0..k {
                sum = sum.wrapping_add((a.get(i, p) as Acc) * (b.get(p, j) as Acc));
            }
            if let Some(d) = bias {
                sum = sum.wrapping_add(d.get(i, j));
            }
            c.set(i, j, requantize(sum, quant));
        }
    }
    Ok(c)
}

/// Linear congruential generator for reproducible test data
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    pub const DEFAULT_SEED: u32 = 777;

    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Next value in `0..=255`
    pub fn next_byte(&mut self) -> u8 {
        self.state = self.state.wrapping_mul(1664525).wrapping_add(1013904223);
        (self.state >> 24) as u8
    }

    /// Next value in `low..=high`
    pub fn next_in(&mut self, low: i32, high: i32) -> i32 {
        let span = (high - low + 1).max(1) as u32;
        low + (self.next_byte() as u32 % span) as i32
    }

    pub fn matrix_elem(&mut self, rows: usize, cols: usize, low: i32, high: i32) -> Matrix<Elem> {
        Matrix::from_fn(rows, cols, |_, _| self.next_in(low, high) as Elem)
    }

    pub fn matrix_acc(&mut self, rows: usize, cols: usize, low: i32, high: i32) -> Matrix<Acc> {
        Matrix::from_fn(rows, cols, |_, _| self.next_in(low, high))
    }
}

impl Default for Lcg {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEED)
    }
}
