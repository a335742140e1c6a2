//! Functional model of the array
//!
//! Executes an instruction stream in program order against a scratchpad of
//! narrow rows, an accumulator of wide rows and a `dim`x`dim` mesh. Timing
//! between engines is not modelled; the dependency flags are checked
//! separately by the queue model. What this gives is the numeric result of
//! a stream, which must match the reference matmul bit for bit.

use log::{debug, trace};
use serde::Serialize;

use crate::error::{ScheduleError, ScheduleResult};
use crate::hardware::{Acc, ArrayConfig, Dataflow, Elem, QuantConfig};
use crate::instruction::{Instruction, InstructionKind};
use crate::matrix::Matrix;
use crate::memory::HostMemory;
use crate::numeric::{cpu_reference_matmul, requantize, rounding_shift_saturate};
use crate::queue::QueueModel;
use crate::scratchpad::ScratchpadAddress;
use crate::sink::InstructionSink;
use crate::tiling::{tiled_matmul, LoweringStats, MatmulProblem, TilingPlan};

/// Counters collected while executing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    pub instructions: u64,
    pub computes: u64,
    pub rows_moved_in: u64,
    pub rows_moved_out: u64,
    /// External memory traffic, including host-side loads and readback
    pub dram_bytes_read: u64,
    pub dram_bytes_written: u64,
    /// Rough estimate: `3 * dim - 1` per compute, one per DMA row
    pub cycles: u64,
}

pub struct ArraySimulator {
    config: ArrayConfig,
    memory: HostMemory,
    scratchpad: Vec<Elem>,
    accumulator: Vec<Acc>,
    /// Output-stationary partial sums
    mesh: Vec<Acc>,
    /// Weight-stationary latched weights
    weights: Vec<Acc>,
    dataflow: Dataflow,
    quant: QuantConfig,
    load_stride: u64,
    store_stride: u64,
    /// (preload operand, output address) of the next compute
    pending: Option<(ScratchpadAddress, ScratchpadAddress)>,
    stats: SimStats,
}

impl ArraySimulator {
    pub fn new(config: &ArrayConfig) -> Self {
        Self::with_memory(config, HostMemory::new())
    }

    pub fn with_memory(config: &ArrayConfig, memory: HostMemory) -> Self {
        let dim = config.dim;
        Self {
            config: config.clone(),
            memory,
            scratchpad: vec![0; config.sp_rows() * dim],
            accumulator: vec![0; config.acc_rows * dim],
            mesh: vec![0; dim * dim],
            weights: vec![0; dim * dim],
            dataflow: Dataflow::OutputStationary,
            quant: QuantConfig::default(),
            load_stride: 0,
            store_stride: 0,
            pending: None,
            stats: SimStats::default(),
        }
    }

    pub fn config(&self) -> &ArrayConfig {
        &self.config
    }

    pub fn memory(&self) -> &HostMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut HostMemory {
        &mut self.memory
    }

    pub fn stats(&self) -> SimStats {
        SimStats {
            dram_bytes_read: self.memory.bytes_read(),
            dram_bytes_written: self.memory.bytes_written(),
            ..self.stats
        }
    }

    /// Store the operands in external memory and allocate the result
    pub fn load_problem(
        &mut self,
        a: &Matrix<Elem>,
        b: &Matrix<Elem>,
        bias: Option<&Matrix<Acc>>,
        quant: QuantConfig,
    ) -> MatmulProblem {
        let a = self.memory.store(a);
        let b = self.memory.store(b);
        let bias = bias.map(|d| self.memory.store(d));
        let c = self.memory.alloc(a.rows, b.cols);
        MatmulProblem { a, b, bias, c, quant }
    }

    pub fn read_output(&mut self, problem: &MatmulProblem) -> Matrix<Elem> {
        self.memory.read_matrix(&problem.c)
    }

    /// Compute `problem` with `dataflow`, leaving the result in memory
    ///
    /// Array dataflows are lowered and executed through the queue model, so
    /// a stream that would break the dependency queues fails here too. The
    /// CPU dataflow evaluates the reference kernel directly on the views.
    pub fn run_matmul(
        &mut self,
        problem: &MatmulProblem,
        dataflow: Dataflow,
        plan: Option<&TilingPlan>,
    ) -> ScheduleResult<Option<LoweringStats>> {
        if dataflow == Dataflow::CpuReference {
            let a = self.memory.read_matrix(&problem.a);
            let b = self.memory.read_matrix(&problem.b);
            let bias = problem.bias.map(|d| self.memory.read_matrix(&d));
            let c = cpu_reference_matmul(&a, &b, bias.as_ref(), &problem.quant)?;
            self.memory.write_matrix(&problem.c, &c);
            return Ok(None);
        }

        let config = self.config.clone();
        let plan = match plan {
            Some(plan) => *plan,
            None => TilingPlan::auto(&problem.shape()?, &config),
        };
        let mut model = QueueModel::wrapping(config.queue_capacity, &mut *self);
        let stats = tiled_matmul(problem, &plan, dataflow, &config, &mut model)?;
        debug!("simulated {} instructions", model.issued());
        Ok(Some(stats))
    }

    fn check_row(&self, addr: ScratchpadAddress, rows: usize) -> ScheduleResult<usize> {
        let limit = if addr.is_accumulator() {
            self.config.acc_rows
        } else {
            self.config.sp_rows()
        };
        let row = addr.row();
        if addr.is_garbage() || row + rows > limit {
            return Err(ScheduleError::AddressOutOfRange { address: addr.raw() });
        }
        Ok(row)
    }

    /// A `dim`x`dim` tile widened to the accumulator type; the sentinel
    /// reads as zeros
    fn read_tile(&self, addr: ScratchpadAddress) -> ScheduleResult<Vec<Acc>> {
        let dim = self.config.dim;
        if addr.is_garbage() {
            return Ok(vec![0; dim * dim]);
        }
        let row = self.check_row(addr, dim)?;
        let span = row * dim..(row + dim) * dim;
        Ok(if addr.is_accumulator() {
            self.accumulator[span].to_vec()
        } else {
            self.scratchpad[span].iter().map(|&x| x as Acc).collect()
        })
    }

    fn write_tile(&mut self, addr: ScratchpadAddress, tile: &[Acc]) -> ScheduleResult<()> {
        if addr.is_garbage() {
            return Ok(());
        }
        let dim = self.config.dim;
        let row = self.check_row(addr, dim)?;
        let span = row * dim..(row + dim) * dim;
        if addr.is_accumulator() {
            let accumulate = addr.accumulates();
            for (dst, &v) in self.accumulator[span].iter_mut().zip(tile) {
                *dst = if accumulate { dst.wrapping_add(v) } else { v };
            }
        } else {
            for (dst, &v) in self.scratchpad[span].iter_mut().zip(tile) {
                *dst = rounding_shift_saturate(v, 0);
            }
        }
        Ok(())
    }

    fn multiply(&self, a: &[Acc], b: &[Acc]) -> Vec<Acc> {
        let dim = self.config.dim;
        let mut out = vec![0 as Acc; dim * dim];
        for r in 0..dim {
            for c in 0..dim {
                let mut sum: Acc = 0;
                for p in 0..dim {
                    sum = sum.wrapping_add(a[r * dim + p].wrapping_mul(b[p * dim + c]));
                }
                out[r * dim + c] = sum;
            }
        }
        out
    }

    fn move_in(&mut self, inst: &Instruction) -> ScheduleResult<()> {
        let dim = self.config.dim;
        let spad = inst.spad_address();
        let blocks = inst.block_len();
        let first = self.check_row(spad, blocks * dim)?;
        let accumulate = spad.accumulates();

        for t in 0..blocks {
            for r in 0..dim {
                let row = first + t * dim + r;
                let src = inst.rs1 + r as u64 * self.load_stride;
                for c in 0..dim {
                    let col = (t * dim + c) as u64;
                    if spad.is_accumulator() {
                        let value: Acc = self.memory.read(src + col * 4);
                        let dst = &mut self.accumulator[row * dim + c];
                        *dst = if accumulate { dst.wrapping_add(value) } else { value };
                    } else {
                        self.scratchpad[row * dim + c] = self.memory.read(src + col);
                    }
                }
            }
        }
        self.stats.rows_moved_in += (blocks * dim) as u64;
        self.stats.cycles += (blocks * dim) as u64;
        Ok(())
    }

    fn move_out(&mut self, inst: &Instruction) -> ScheduleResult<()> {
        let dim = self.config.dim;
        let spad = inst.spad_address();
        let first = self.check_row(spad, dim)?;
        for r in 0..dim {
            let dst = inst.rs1 + r as u64 * self.store_stride;
            for c in 0..dim {
                let idx = (first + r) * dim + c;
                let value = if spad.is_accumulator() {
                    requantize(self.accumulator[idx], &self.quant)
                } else {
                    self.scratchpad[idx]
                };
                self.memory.write(dst + c as u64, value);
            }
        }
        self.stats.rows_moved_out += dim as u64;
        self.stats.cycles += dim as u64;
        Ok(())
    }

    fn compute(&mut self, inst: &Instruction, preloaded: bool) -> ScheduleResult<()> {
        let (preload, output) = self
            .pending
            .take()
            .unwrap_or((ScratchpadAddress::GARBAGE, ScratchpadAddress::GARBAGE));
        let a = self.read_tile(ScratchpadAddress::from_operand(inst.rs1))?;
        let b = self.read_tile(ScratchpadAddress::from_operand(inst.rs2))?;

        let result = match self.dataflow {
            Dataflow::WeightStationary => {
                if preloaded {
                    self.weights = self.read_tile(preload)?;
                }
                let mut out = self.multiply(&a, &self.weights);
                // the second operand is added on the way out
                for (o, d) in out.iter_mut().zip(&b) {
                    *o = o.wrapping_add(*d);
                }
                out
            }
            _ => {
                if preloaded {
                    self.mesh = self.read_tile(preload)?;
                }
                let product = self.multiply(&a, &b);
                for (m, p) in self.mesh.iter_mut().zip(&product) {
                    *m = m.wrapping_add(*p);
                }
                self.mesh.clone()
            }
        };
        self.write_tile(output, &result)?;
        self.stats.computes += 1;
        self.stats.cycles += self.config.cycles_per_compute();
        Ok(())
    }
}

impl InstructionSink for ArraySimulator {
    fn issue(&mut self, inst: Instruction) -> ScheduleResult<()> {
        trace!("sim {}", inst);
        self.stats.instructions += 1;
        match inst.kind {
            InstructionKind::ConfigureExecute => {
                if let Some((dataflow, quant)) = inst.execute_config() {
                    self.dataflow = dataflow;
                    self.quant = quant;
                }
            }
            InstructionKind::ConfigureLoad => self.load_stride = inst.rs2,
            InstructionKind::ConfigureStore => self.store_stride = inst.rs2,
            InstructionKind::MoveIn => self.move_in(&inst)?,
            InstructionKind::MoveOut => self.move_out(&inst)?,
            InstructionKind::Preload => {
                self.pending = Some((
                    ScratchpadAddress::from_operand(inst.rs1),
                    ScratchpadAddress::from_operand(inst.rs2),
                ));
            }
            InstructionKind::ComputePreloaded => self.compute(&inst, true)?,
            InstructionKind::ComputeAccumulate => self.compute(&inst, false)?,
            InstructionKind::Flush => {
                self.mesh.iter_mut().for_each(|x| *x = 0);
                self.weights.iter_mut().for_each(|x| *x = 0);
                self.pending = None;
            }
            InstructionKind::Fence => {}
        }
        Ok(())
    }
}
