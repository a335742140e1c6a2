//! Tile-factor selection and the outer tiling loop
//!
//! Full matrices are cut into blocks of `plan.i x plan.j x plan.k` hardware
//! tiles. Every block is handed to a [`TileScheduler`]; blocks along K share
//! the accumulator, so bias is only presented on the first K block and the
//! output only on the last.

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{ScheduleError, ScheduleResult};
use crate::hardware::{Acc, ArrayConfig, Dataflow, Elem, QuantConfig};
use crate::instruction::Instruction;
use crate::matrix::MatrixView;
use crate::scheduler::{
    BiasInput, OutputStationary, TileBlock, TileCounts, TileScheduler, TileWalk, WeightStationary,
};
use crate::sink::InstructionSink;

/// Largest factor `<= max_factor` dividing `dimension`, or 1 if there is none
pub fn choose_tile_factor(dimension: usize, max_factor: usize) -> usize {
    (1..=max_factor)
        .rev()
        .find(|f| dimension % f == 0)
        .unwrap_or(1)
}

/// `C[m x n] = A[m x k] * B[k x n]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatmulShape {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl MatmulShape {
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        Self { m, n, k }
    }
}

/// Block size in tiles along I, J and K
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilingPlan {
    pub i: usize,
    pub j: usize,
    pub k: usize,
}

impl TilingPlan {
    pub fn new(i: usize, j: usize, k: usize) -> Self {
        Self { i, j, k }
    }

    /// Largest factors the scratchpad allows that divide the shape
    pub fn auto(shape: &MatmulShape, config: &ArrayConfig) -> Self {
        let (max_i_j, max_k) = config.max_tile_factors();
        let dim = config.dim.max(1);
        Self {
            i: choose_tile_factor(shape.m / dim, max_i_j),
            j: choose_tile_factor(shape.n / dim, max_i_j),
            k: choose_tile_factor(shape.k / dim, max_k),
        }
    }

    /// Reject plans that leave tiles uncovered or overflow a partition
    pub fn check(&self, shape: &MatmulShape, config: &ArrayConfig) -> ScheduleResult<()> {
        let dim = config.dim;
        for (dimension, factor) in [(shape.m, self.i), (shape.n, self.j), (shape.k, self.k)] {
            if factor == 0 || dimension == 0 || dimension % (factor * dim) != 0 {
                return Err(ScheduleError::Indivisible {
                    dimension,
                    factor,
                    tile: dim,
                });
            }
        }

        let partition = config.partition_tiles();
        if self.i * self.k > partition || self.k * self.j > partition {
            return Err(ScheduleError::overflow(format!(
                "plan {}x{}x{} needs {} A and {} B tiles per partition of {}",
                self.i,
                self.j,
                self.k,
                self.i * self.k,
                self.k * self.j,
                partition
            )));
        }
        if self.i * self.j > config.acc_tiles() {
            return Err(ScheduleError::overflow(format!(
                "plan {}x{} output tiles exceed {} accumulator tiles",
                self.i,
                self.j,
                config.acc_tiles()
            )));
        }
        Ok(())
    }

    /// Number of blocks along I, J and K
    pub fn blocks(&self, shape: &MatmulShape, dim: usize) -> (usize, usize, usize) {
        (
            shape.m / (self.i * dim),
            shape.n / (self.j * dim),
            shape.k / (self.k * dim),
        )
    }

    fn tiles(&self) -> TileCounts {
        TileCounts::new(self.i, self.j, self.k)
    }
}

/// Operands of one `C = act(A * B + D)` in external memory
#[derive(Debug, Clone, Copy)]
pub struct MatmulProblem {
    pub a: MatrixView<Elem>,
    pub b: MatrixView<Elem>,
    /// `None` is the no-bias case
    pub bias: Option<MatrixView<Acc>>,
    pub c: MatrixView<Elem>,
    pub quant: QuantConfig,
}

impl MatmulProblem {
    /// Shape of the multiply, checking the four views agree
    pub fn shape(&self) -> ScheduleResult<MatmulShape> {
        let (m, k) = self.a.shape();
        let (k2, n) = self.b.shape();
        if k2 != k {
            return Err(ScheduleError::shape(
                format!("B with {} rows", k),
                format!("{} rows", k2),
            ));
        }
        if self.c.shape() != (m, n) {
            return Err(ScheduleError::shape(
                format!("C of shape ({}, {})", m, n),
                format!("{:?}", self.c.shape()),
            ));
        }
        if let Some(bias) = &self.bias {
            if bias.shape() != (m, n) {
                return Err(ScheduleError::shape(
                    format!("bias of shape ({}, {})", m, n),
                    format!("{:?}", bias.shape()),
                ));
            }
        }
        Ok(MatmulShape::new(m, n, k))
    }
}

/// What a lowering session produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoweringStats {
    pub plan: TilingPlan,
    pub blocks: usize,
    pub retirements: usize,
    pub drains: usize,
}

/// Lower `problem` with an explicit tiling plan
pub fn tiled_matmul<S: InstructionSink>(
    problem: &MatmulProblem,
    plan: &TilingPlan,
    dataflow: Dataflow,
    config: &ArrayConfig,
    sink: &mut S,
) -> ScheduleResult<LoweringStats> {
    config.validate().map_err(ScheduleError::config)?;
    let shape = problem.shape()?;
    plan.check(&shape, config)?;
    let configure = Instruction::configure_execute(dataflow, &problem.quant)?;

    info!(
        "lowering {}x{}x{} matmul ({}, plan {}x{}x{}, bias {})",
        shape.m,
        shape.n,
        shape.k,
        dataflow,
        plan.i,
        plan.j,
        plan.k,
        problem.bias.is_some()
    );
    sink.issue(configure)?;

    match dataflow {
        Dataflow::OutputStationary => {
            walk_blocks(TileScheduler::new(OutputStationary, config), problem, plan, &shape, sink)
        }
        Dataflow::WeightStationary => {
            walk_blocks(TileScheduler::new(WeightStationary, config), problem, plan, &shape, sink)
        }
        Dataflow::CpuReference => Err(ScheduleError::UnsupportedDataflow {
            dataflow: dataflow.to_string(),
        }),
    }
}

/// Lower `problem` with the largest plan the scratchpad allows
pub fn tiled_matmul_auto<S: InstructionSink>(
    problem: &MatmulProblem,
    dataflow: Dataflow,
    config: &ArrayConfig,
    sink: &mut S,
) -> ScheduleResult<LoweringStats> {
    let plan = TilingPlan::auto(&problem.shape()?, config);
    tiled_matmul(problem, &plan, dataflow, config, sink)
}

fn walk_blocks<W: TileWalk, S: InstructionSink>(
    mut scheduler: TileScheduler<W>,
    problem: &MatmulProblem,
    plan: &TilingPlan,
    shape: &MatmulShape,
    sink: &mut S,
) -> ScheduleResult<LoweringStats> {
    let dim = scheduler.config().dim;
    let (blocks_i, blocks_j, blocks_k) = plan.blocks(shape, dim);
    let (rows, cols, depth) = (plan.i * dim, plan.j * dim, plan.k * dim);

    for i0 in 0..blocks_i {
        for j0 in 0..blocks_j {
            for k0 in 0..blocks_k {
                let bias = if k0 > 0 {
                    BiasInput::Accumulate
                } else {
                    match problem.bias {
                        Some(d) => BiasInput::Load(d.sub_view(i0 * rows, j0 * cols, rows, cols)),
                        None => BiasInput::Overwrite,
                    }
                };
                let output = (k0 == blocks_k - 1)
                    .then(|| problem.c.sub_view(i0 * rows, j0 * cols, rows, cols));
                let block = TileBlock {
                    a: problem.a.sub_view(i0 * rows, k0 * depth, rows, depth),
                    b: problem.b.sub_view(k0 * depth, j0 * cols, depth, cols),
                    bias,
                    output,
                    tiles: plan.tiles(),
                    first_block: (i0, j0, k0) == (0, 0, 0),
                    last_block: (i0, j0, k0) == (blocks_i - 1, blocks_j - 1, blocks_k - 1),
                    no_bias: problem.bias.is_none(),
                };
                scheduler.schedule_block(&block, sink)?;
            }
        }
    }

    scheduler.drain_all(sink)?;
    sink.issue(Instruction::fence())?;
    Ok(LoweringStats {
        plan: *plan,
        blocks: scheduler.blocks(),
        retirements: scheduler.retirements(),
        drains: scheduler.drains(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::InstructionKind;
    use crate::memory::HostMemory;
    use crate::queue::QueueModel;
    use crate::sink::InstructionStream;
    use pretty_assertions::assert_eq;

    fn problem(mem: &mut HostMemory, shape: MatmulShape, bias: bool) -> MatmulProblem {
        MatmulProblem {
            a: mem.alloc(shape.m, shape.k),
            b: mem.alloc(shape.k, shape.n),
            bias: bias.then(|| mem.alloc(shape.m, shape.n)),
            c: mem.alloc(shape.m, shape.n),
            quant: QuantConfig::default(),
        }
    }

    #[test]
    fn test_choose_tile_factor() {
        assert_eq!(choose_tile_factor(12, 8), 6);
        assert_eq!(choose_tile_factor(16, 8), 8);
        assert_eq!(choose_tile_factor(7, 4), 1);
        assert_eq!(choose_tile_factor(40, 64), 40);
        assert_eq!(choose_tile_factor(3, 3), 3);
    }

    #[test]
    fn test_auto_plan_respects_capacity() {
        let config = ArrayConfig::small();
        let shape = MatmulShape::new(64, 48, 128);
        let plan = TilingPlan::auto(&shape, &config);
        assert_eq!(plan, TilingPlan::new(4, 4, 8));
        assert!(plan.check(&shape, &config).is_ok());
        assert_eq!(plan.blocks(&shape, config.dim), (4, 3, 4));
    }

    #[test]
    fn test_indivisible_shape_rejected() {
        let config = ArrayConfig::small();
        let shape = MatmulShape::new(12, 8, 8);
        let err = TilingPlan::new(2, 1, 1).check(&shape, &config).unwrap_err();
        match err {
            ScheduleError::Indivisible { dimension, factor, tile } => {
                assert_eq!((dimension, factor, tile), (12, 2, 4));
            }
            other => panic!("expected Indivisible, got {:?}", other),
        }
        assert!(TilingPlan::new(1, 1, 1)
            .check(&MatmulShape::new(6, 8, 8), &config)
            .is_err());
    }

    #[test]
    fn test_oversized_plan_rejected() {
        let config = ArrayConfig::small();
        let shape = MatmulShape::new(64, 64, 64);
        let err = TilingPlan::new(4, 4, 16).check(&shape, &config).unwrap_err();
        assert!(matches!(err, ScheduleError::ScratchpadOverflow { .. }));
    }

    #[test]
    fn test_cpu_dataflow_is_not_lowered() {
        let config = ArrayConfig::small();
        let mut mem = HostMemory::new();
        let p = problem(&mut mem, MatmulShape::new(4, 4, 4), false);
        let mut stream = InstructionStream::new();
        let err = tiled_matmul_auto(&p, Dataflow::CpuReference, &config, &mut stream).unwrap_err();
        assert!(matches!(err, ScheduleError::UnsupportedDataflow { .. }));
        assert!(stream.is_empty());
    }

    #[test]
    fn test_block_walk_bias_and_output_placement() {
        let config = ArrayConfig::small();
        let mut mem = HostMemory::new();
        let shape = MatmulShape::new(8, 8, 16);
        let p = problem(&mut mem, shape, true);
        let plan = TilingPlan::new(1, 1, 2);

        for dataflow in [Dataflow::OutputStationary, Dataflow::WeightStationary] {
            let mut model = QueueModel::wrapping(config.queue_capacity, InstructionStream::new());
            let stats = tiled_matmul(&p, &plan, dataflow, &config, &mut model).unwrap();
            let stream = model.into_inner();

            // 2x2 output positions, two K blocks each
            assert_eq!(stats.blocks, 8);
            assert_eq!(stats.drains, stats.retirements);
            // bias once per output tile, output once per output tile
            let bias_loads = stream
                .iter()
                .filter(|i| i.kind == InstructionKind::MoveIn && i.spad_address().is_accumulator())
                .count();
            assert_eq!(bias_loads, 4);
            assert_eq!(stream.count(InstructionKind::MoveOut), 4);
            assert_eq!(stream.count(InstructionKind::ConfigureExecute), 1);
            assert_eq!(stream.instructions().last().map(|i| i.kind), Some(InstructionKind::Fence));
        }
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut mem = HostMemory::new();
        let mut p = problem(&mut mem, MatmulShape::new(4, 4, 4), false);
        p.c = mem.alloc(4, 8);
        assert!(matches!(p.shape(), Err(ScheduleError::ShapeMismatch { .. })));
    }
}
