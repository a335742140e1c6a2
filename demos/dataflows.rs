//! Example: Output- vs Weight-Stationary Lowering
//!
//! Lowers the same 64x64x64 matmul with both dataflows on a 16x16 array,
//! runs each stream through the simulator and compares the instruction mix.
//!
//! Run with: cargo run --example dataflows

use matmul_to_systolic::{
    cpu_reference_matmul, tiled_matmul, Activation, ArrayConfig, ArraySimulator, Dataflow,
    InstructionKind, InstructionStream, Lcg, QuantConfig, QueueModel, TilingPlan,
};

fn main() {
    println!("=== Output- vs Weight-Stationary Lowering ===\n");

    let config = ArrayConfig::default();
    let mut lcg = Lcg::default();
    let a = lcg.matrix_elem(64, 64, -4, 4);
    let b = lcg.matrix_elem(64, 64, -4, 4);
    let d = lcg.matrix_acc(64, 64, -64, 64);
    let quant = QuantConfig::new(Activation::Relu, 3, 0);
    let expected = cpu_reference_matmul(&a, &b, Some(&d), &quant).unwrap();

    for plan in [TilingPlan::new(1, 1, 1), TilingPlan::new(2, 2, 4)] {
        println!("Plan {}x{}x{} tiles per block", plan.i, plan.j, plan.k);
        for dataflow in [Dataflow::OutputStationary, Dataflow::WeightStationary] {
            let mut sim = ArraySimulator::new(&config);
            let problem = sim.load_problem(&a, &b, Some(&d), quant);

            let mut model = QueueModel::wrapping(config.queue_capacity, InstructionStream::new());
            let stats = tiled_matmul(&problem, &plan, dataflow, &config, &mut model).unwrap();
            let stream = model.into_inner();
            stream.replay(&mut sim).unwrap();

            let ok = sim.read_output(&problem) == expected;
            println!(
                "  {}: {} instructions ({} mvin, {} compute, {} drains), {} blocks, matches reference: {}",
                dataflow,
                stream.len(),
                stream.count(InstructionKind::MoveIn),
                stream.count(InstructionKind::ComputePreloaded)
                    + stream.count(InstructionKind::ComputeAccumulate),
                stats.drains,
                stats.blocks,
                ok
            );
        }
        println!();
    }

    // The first few instructions of a single-block stream
    let mut sim = ArraySimulator::new(&config);
    let problem = sim.load_problem(&a, &b, None, QuantConfig::default());
    let mut stream = InstructionStream::new();
    tiled_matmul(
        &problem,
        &TilingPlan::new(4, 4, 4),
        Dataflow::WeightStationary,
        &config,
        &mut stream,
    )
    .unwrap();
    println!("First instructions of a weight-stationary stream:");
    for inst in stream.iter().take(12) {
        println!("  {}", inst);
    }
}
