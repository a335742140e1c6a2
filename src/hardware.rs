//! Hardware description of the target compute array
//!
//! The array is a `dim`x`dim` mesh fed from a banked scratchpad and an
//! accumulator memory. Three engines (load, execute, store) drain their own
//! instruction sub-streams and only synchronize through dependency queues.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Narrow element type used for operands and results
pub type Elem = i8;

/// Wide element type used for bias and accumulation
pub type Acc = i32;

/// Configuration for the compute array and its scratchpad
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayConfig {
    /// Side length of the square array (the hardware tile size)
    pub dim: usize,
    /// Number of scratchpad banks
    pub sp_banks: usize,
    /// Rows per scratchpad bank
    pub sp_bank_rows: usize,
    /// Rows in the accumulator memory
    pub acc_rows: usize,
    /// Largest single DMA request in bytes; bounds block move-in length
    pub max_bytes: usize,
    /// Capacity of each inter-engine dependency queue
    pub queue_capacity: usize,
}

impl ArrayConfig {
    pub fn new(dim: usize, sp_banks: usize, sp_bank_rows: usize, acc_rows: usize) -> Self {
        Self {
            dim,
            sp_banks,
            sp_bank_rows,
            acc_rows,
            max_bytes: 64,
            queue_capacity: 8,
        }
    }

    /// 4x4 array with a proportionally small scratchpad, used by tests
    pub fn small() -> Self {
        Self {
            dim: 4,
            sp_banks: 4,
            sp_bank_rows: 64,
            acc_rows: 64,
            max_bytes: 16,
            queue_capacity: 4,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Total rows in the main scratchpad
    pub fn sp_rows(&self) -> usize {
        self.sp_banks * self.sp_bank_rows
    }

    /// Rows in each half of the main scratchpad (one for A, one for B)
    pub fn partition_rows(&self) -> usize {
        self.sp_rows() / 2
    }

    /// Number of whole tiles that fit in one main partition
    pub fn partition_tiles(&self) -> usize {
        self.partition_rows() / self.dim
    }

    /// Number of whole tiles that fit in the accumulator
    pub fn acc_tiles(&self) -> usize {
        self.acc_rows / self.dim
    }

    /// Tiles merged into one move-in of narrow elements
    pub fn max_block_len(&self) -> usize {
        (self.max_bytes / (self.dim * std::mem::size_of::<Elem>())).max(1)
    }

    /// Tiles merged into one move-in of wide (accumulator) elements
    pub fn max_block_len_acc(&self) -> usize {
        (self.max_bytes / (self.dim * std::mem::size_of::<Acc>())).max(1)
    }

    /// Largest tile-block multiples allowed by the scratchpad geometry,
    /// as `(max I/J factor, max K factor)`.
    ///
    /// The I and J factors share the accumulator, so each is bounded by the
    /// square root of the accumulator tile count; K takes whatever is left of
    /// a main partition.
    pub fn max_tile_factors(&self) -> (usize, usize) {
        let max_i_j = self.acc_tiles().isqrt().max(1);
        let max_k = (self.partition_tiles() / max_i_j).max(1);
        (max_i_j, max_k)
    }

    /// Estimated cycles for one compute through the mesh
    pub fn cycles_per_compute(&self) -> u64 {
        3 * self.dim as u64 - 1
    }

    /// Check the geometry is usable
    pub fn validate(&self) -> Result<(), String> {
        if self.dim == 0 {
            return Err("array dimension must be non-zero".to_string());
        }
        if self.sp_rows() % (2 * self.dim) != 0 || self.partition_tiles() == 0 {
            return Err(format!(
                "scratchpad of {} rows does not split into two tile-aligned partitions",
                self.sp_rows()
            ));
        }
        if self.acc_tiles() == 0 {
            return Err(format!(
                "accumulator of {} rows cannot hold a {}x{} tile",
                self.acc_rows, self.dim, self.dim
            ));
        }
        if self.queue_capacity < 2 {
            return Err(format!(
                "queue capacity {} is below the two tokens one iteration needs",
                self.queue_capacity
            ));
        }
        if self.sp_rows() >= 1 << 31 || self.acc_rows >= 1 << 30 {
            return Err("scratchpad does not fit the 32-bit address field".to_string());
        }
        Ok(())
    }
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self::new(16, 4, 4096, 1024)
    }
}

/// Which operand stays resident in the array across the innermost loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dataflow {
    OutputStationary,
    WeightStationary,
    /// Computed on the host by the reference kernel; never lowered
    CpuReference,
}

impl Dataflow {
    /// Mode bit written by ConfigureExecute, if the array can run this dataflow
    pub fn mode_bit(self) -> Option<u64> {
        match self {
            Dataflow::OutputStationary => Some(0),
            Dataflow::WeightStationary => Some(1),
            Dataflow::CpuReference => None,
        }
    }

    pub fn from_mode_bit(bit: u64) -> Self {
        if bit & 1 == 0 {
            Dataflow::OutputStationary
        } else {
            Dataflow::WeightStationary
        }
    }
}

impl fmt::Display for Dataflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dataflow::OutputStationary => write!(f, "os"),
            Dataflow::WeightStationary => write!(f, "ws"),
            Dataflow::CpuReference => write!(f, "cpu"),
        }
    }
}

impl FromStr for Dataflow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "os" | "output-stationary" => Ok(Dataflow::OutputStationary),
            "ws" | "weight-stationary" => Ok(Dataflow::WeightStationary),
            "cpu" | "cpu-reference" => Ok(Dataflow::CpuReference),
            other => Err(format!("Unknown dataflow: {}", other)),
        }
    }
}

/// Activation applied to results on their way out of the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    None,
    Relu,
    Relu6,
}

impl Activation {
    /// Two-bit code packed into ConfigureExecute
    pub fn code(self) -> u64 {
        match self {
            Activation::None => 0,
            Activation::Relu => 1,
            Activation::Relu6 => 2,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Activation::None),
            1 => Some(Activation::Relu),
            2 => Some(Activation::Relu6),
            _ => None,
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::None => write!(f, "none"),
            Activation::Relu => write!(f, "relu"),
            Activation::Relu6 => write!(f, "relu6"),
        }
    }
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Activation::None),
            "relu" => Ok(Activation::Relu),
            "relu6" => Ok(Activation::Relu6),
            other => Err(format!("Unknown activation: {}", other)),
        }
    }
}

/// Output stage applied when an accumulator row is moved out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuantConfig {
    pub activation: Activation,
    /// Rounding right shift taking accumulator values back to `Elem`
    pub acc_shift: u32,
    /// ReLU6 ceiling is `6 << relu6_shift`
    pub relu6_shift: u32,
}

impl QuantConfig {
    pub fn new(activation: Activation, acc_shift: u32, relu6_shift: u32) -> Self {
        Self {
            activation,
            acc_shift,
            relu6_shift,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ArrayConfig::default();
        assert_eq!(config.sp_rows(), 16384);
        assert_eq!(config.max_block_len(), 4);
        assert_eq!(config.max_block_len_acc(), 1);
        assert_eq!(config.max_tile_factors(), (8, 64));
        assert_eq!(config.cycles_per_compute(), 47);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_small_config() {
        let config = ArrayConfig::small();
        assert_eq!(config.partition_tiles(), 32);
        assert_eq!(config.acc_tiles(), 16);
        assert_eq!(config.max_tile_factors(), (4, 8));
        assert_eq!(config.max_block_len(), 4);
        assert_eq!(config.max_block_len_acc(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tile_factors_round_down_non_square() {
        // 10 accumulator tiles: I/J factor 3, K gets 32 / 3
        let config = ArrayConfig {
            acc_rows: 40,
            ..ArrayConfig::small()
        };
        assert_eq!(config.max_tile_factors(), (3, 10));
    }

    #[test]
    fn test_validate_rejects_tiny_queue() {
        let config = ArrayConfig::small().with_queue_capacity(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("WS".parse::<Dataflow>().unwrap(), Dataflow::WeightStationary);
        assert_eq!("relu6".parse::<Activation>().unwrap(), Activation::Relu6);
        assert!("gelu".parse::<Activation>().is_err());
        assert_eq!(Dataflow::CpuReference.mode_bit(), None);
    }
}
