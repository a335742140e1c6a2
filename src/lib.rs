//! Matmul to Systolic Array Lowering
//!
//! This library lowers `C = act(A * B + D)` onto a fixed-size systolic array
//! fed from a software-managed scratchpad. It picks tile blocks that fit the
//! scratchpad, walks them in output- or weight-stationary order, and emits
//! the move-in/compute/move-out stream together with the dependency flags
//! that keep the load, execute and store engines from racing each other.
//!
//! # Example
//!
//! ```rust
//! use matmul_to_systolic::{lower_matmul, ArrayConfig, ArraySimulator, Dataflow, Matrix, QuantConfig};
//!
//! let config = ArrayConfig::small(); // 4x4 array
//! let mut sim = ArraySimulator::new(&config);
//! let a = Matrix::from_fn(8, 8, |r, c| (r + c) as i8);
//! let b = Matrix::from_fn(8, 8, |r, c| (r == c) as i8);
//! let problem = sim.load_problem(&a, &b, None, QuantConfig::default());
//!
//! let stream = lower_matmul(&problem, Dataflow::OutputStationary, &config).unwrap();
//! println!("{}", stream);
//! ```

pub mod clock;
pub mod error;
pub mod hardware;
pub mod instruction;
pub mod lexer;
pub mod matrix;
pub mod memory;
pub mod numeric;
pub mod parser;
pub mod queue;
pub mod scheduler;
pub mod scratchpad;
pub mod simulator;
pub mod sink;
pub mod tiling;

pub use error::{ScheduleError, ScheduleResult};
pub use hardware::{Acc, Activation, ArrayConfig, Dataflow, Elem, QuantConfig};
pub use instruction::{DependencyFlags, Engine, Instruction, InstructionKind, RawInstruction};
pub use matrix::{Matrix, MatrixView};
pub use memory::HostMemory;
pub use numeric::{cpu_reference_matmul, rounding_shift_saturate, Lcg};
pub use parser::parse_listing;
pub use queue::{Queue, QueueModel, QueueState};
pub use scheduler::{OutputStationary, TileScheduler, TileWalk, WeightStationary};
pub use scratchpad::{ScratchpadAddress, ScratchpadLayout};
pub use simulator::ArraySimulator;
pub use sink::{InstructionSink, InstructionStream, NullSink};
pub use tiling::{choose_tile_factor, tiled_matmul, tiled_matmul_auto, MatmulProblem, TilingPlan};

/// Lower a matmul with the automatic plan and return the validated stream
pub fn lower_matmul(
    problem: &MatmulProblem,
    dataflow: Dataflow,
    config: &ArrayConfig,
) -> ScheduleResult<InstructionStream> {
    let mut model = QueueModel::wrapping(config.queue_capacity, InstructionStream::new());
    tiled_matmul_auto(problem, dataflow, config, &mut model)?;
    Ok(model.into_inner())
}

/// Replay a textual listing through the queue model
pub fn check_listing(source: &str, capacity: usize) -> ScheduleResult<QueueState> {
    let instructions = parse_listing(source)?;
    queue::validate(&instructions, capacity)
}
