//! Error types for the systolic lowering pipeline

use thiserror::Error;

use crate::queue::Queue;

/// Result type for scheduling, simulation and listing operations
pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Scheduling errors
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid array configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    #[error("Dimension {dimension} is not a multiple of {factor} tiles of size {tile}")]
    Indivisible {
        dimension: usize,
        factor: usize,
        tile: usize,
    },

    #[error("Scratchpad overflow: {message}")]
    ScratchpadOverflow { message: String },

    #[error("Dataflow {dataflow} cannot be lowered to array instructions")]
    UnsupportedDataflow { dataflow: String },

    #[error("Queue {queue} overflowed at instruction {index}: capacity {capacity}")]
    QueueOverflow {
        queue: Queue,
        index: usize,
        capacity: usize,
    },

    #[error("Queue {queue} underflowed at instruction {index}: pop without a matching push")]
    QueueUnderflow { queue: Queue, index: usize },

    #[error("Fence at instruction {index} reached with {outstanding} outstanding tokens on {queue}")]
    QueueNotDrained {
        queue: Queue,
        index: usize,
        outstanding: usize,
    },

    #[error("Scratchpad address {address:#x} out of range")]
    AddressOutOfRange { address: u64 },

    #[error("Unknown opcode {opcode} (funct {funct:#04x})")]
    UnknownOpcode { opcode: u8, funct: u8 },

    #[error("Lexer error on line {line}: {message}")]
    LexerError { line: usize, message: String },

    #[error("Parse error on line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScheduleError {
    pub fn config(msg: impl Into<String>) -> Self {
        ScheduleError::InvalidConfig { message: msg.into() }
    }

    pub fn shape(expected: impl Into<String>, got: impl Into<String>) -> Self {
        ScheduleError::ShapeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub fn overflow(msg: impl Into<String>) -> Self {
        ScheduleError::ScratchpadOverflow { message: msg.into() }
    }

    pub fn parse(line: usize, msg: impl Into<String>) -> Self {
        ScheduleError::ParseError {
            line,
            message: msg.into(),
        }
    }
}
