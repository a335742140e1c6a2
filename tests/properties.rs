//! Property tests: equivalence with the reference kernel, tiling invariance
//! and queue safety over randomly shaped problems on a 4x4 array.

use matmul_to_systolic::{
    cpu_reference_matmul, tiled_matmul, Activation, ArrayConfig, ArraySimulator, Dataflow, Lcg,
    Matrix, QuantConfig, QueueModel, TilingPlan,
};
use proptest::prelude::*;

fn divisor(n: usize, pick: usize) -> usize {
    let divisors: Vec<usize> = (1..=n).filter(|d| n % d == 0).collect();
    divisors[pick % divisors.len()]
}

fn activation(code: u64) -> Activation {
    Activation::from_code(code).unwrap_or_default()
}

fn dataflow(ws: bool) -> Dataflow {
    if ws {
        Dataflow::WeightStationary
    } else {
        Dataflow::OutputStationary
    }
}

struct Case {
    a: Matrix<i8>,
    b: Matrix<i8>,
    bias: Option<Matrix<i32>>,
    quant: QuantConfig,
}

fn case(tiles: (usize, usize, usize), seed: u32, bias: bool, quant: QuantConfig) -> Case {
    let dim = ArrayConfig::small().dim;
    let (m, n, k) = (tiles.0 * dim, tiles.1 * dim, tiles.2 * dim);
    let mut lcg = Lcg::new(seed);
    Case {
        a: lcg.matrix_elem(m, k, -8, 8),
        b: lcg.matrix_elem(k, n, -8, 8),
        bias: bias.then(|| lcg.matrix_acc(m, n, -200, 200)),
        quant,
    }
}

fn simulate(case: &Case, dataflow: Dataflow, plan: &TilingPlan, config: &ArrayConfig) -> Matrix<i8> {
    let mut sim = ArraySimulator::new(config);
    let problem = sim.load_problem(&case.a, &case.b, case.bias.as_ref(), case.quant);
    sim.run_matmul(&problem, dataflow, Some(plan)).unwrap();
    sim.read_output(&problem)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_array_matches_reference(
        tiles in (1usize..=3, 1usize..=3, 1usize..=4),
        picks in (0usize..4, 0usize..4, 0usize..4),
        seed in any::<u32>(),
        bias in any::<bool>(),
        act in 0u64..3,
        shift in 0u32..6,
        relu6_shift in 0u32..3,
        ws in any::<bool>(),
    ) {
        let config = ArrayConfig::small();
        let quant = QuantConfig::new(activation(act), shift, relu6_shift);
        let case = case(tiles, seed, bias, quant);
        let plan = TilingPlan::new(
            divisor(tiles.0, picks.0),
            divisor(tiles.1, picks.1),
            divisor(tiles.2, picks.2),
        );

        let expected = cpu_reference_matmul(&case.a, &case.b, case.bias.as_ref(), &quant).unwrap();
        prop_assert_eq!(simulate(&case, dataflow(ws), &plan, &config), expected.clone());
        prop_assert_eq!(simulate(&case, Dataflow::CpuReference, &plan, &config), expected);
    }

    #[test]
    fn prop_result_independent_of_plan(
        tiles in (1usize..=4, 1usize..=4, 1usize..=4),
        picks in (0usize..4, 0usize..4, 0usize..4),
        seed in any::<u32>(),
        bias in any::<bool>(),
        ws in any::<bool>(),
    ) {
        let config = ArrayConfig::small();
        let quant = QuantConfig::new(Activation::None, 1, 0);
        let case = case(tiles, seed, bias, quant);
        let plan = TilingPlan::new(
            divisor(tiles.0, picks.0),
            divisor(tiles.1, picks.1),
            divisor(tiles.2, picks.2),
        );

        let unit = simulate(&case, dataflow(ws), &TilingPlan::new(1, 1, 1), &config);
        let tiled = simulate(&case, dataflow(ws), &plan, &config);
        prop_assert_eq!(unit, tiled);
    }

    #[test]
    fn prop_streams_are_queue_safe(
        tiles in (1usize..=4, 1usize..=4, 1usize..=6),
        picks in (0usize..4, 0usize..4, 0usize..4),
        capacity in 2usize..6,
        bias in any::<bool>(),
        ws in any::<bool>(),
    ) {
        let config = ArrayConfig::small().with_queue_capacity(capacity);
        let case = case(tiles, 1, bias, QuantConfig::default());
        let plan = TilingPlan::new(
            divisor(tiles.0, picks.0),
            divisor(tiles.1, picks.1),
            divisor(tiles.2, picks.2),
        );
        let mut sim = ArraySimulator::new(&config);
        let problem = sim.load_problem(&case.a, &case.b, case.bias.as_ref(), case.quant);

        let mut model = QueueModel::new(capacity);
        let stats = tiled_matmul(&problem, &plan, dataflow(ws), &config, &mut model);
        prop_assert!(stats.is_ok(), "{:?}", stats.err());
        prop_assert!(model.state().is_drained());
        for queue in matmul_to_systolic::Queue::ALL {
            prop_assert!(model.state().high_water(queue) <= capacity);
        }
    }
}
