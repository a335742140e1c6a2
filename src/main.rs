//! Matmul to Systolic Array CLI
//!
//! Usage:
//!   matmul2systolic run --shape 64x64x64 --dataflow ws --bias --activation relu
//!   matmul2systolic run --shape 32x32x32 --plan 1x1x1 --listing
//!   matmul2systolic check stream.lst --capacity 8
//!   RUST_LOG=debug matmul2systolic run --config array.json --json

use clap::{Args as ClapArgs, Parser as ClapParser, Subcommand};
use colored::Colorize;
use log::info;
use std::fs;
use std::io::{self, Read};

use matmul_to_systolic::clock::{timed, MonotonicClock};
use matmul_to_systolic::tiling::MatmulShape;
use matmul_to_systolic::{
    check_listing, cpu_reference_matmul, tiled_matmul, Activation, ArrayConfig, ArraySimulator,
    Dataflow, Elem, InstructionStream, Lcg, Matrix, QuantConfig, Queue, QueueModel, TilingPlan,
};

#[derive(ClapParser, Debug)]
#[command(name = "matmul2systolic")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Lowers tiled matmuls to systolic array instruction streams")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a stream for random operands, simulate it and compare with the reference
    Run(RunArgs),
    /// Replay an instruction listing through the dependency queue model
    Check(CheckArgs),
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Problem shape as MxNxK (C is MxN, shared dimension K)
    #[arg(short = 's', long = "shape", value_parser = parse_triple, default_value = "32x32x32")]
    shape: (usize, usize, usize),

    /// Dataflow: os, ws or cpu
    #[arg(short = 'd', long = "dataflow", default_value = "os")]
    dataflow: Dataflow,

    /// Explicit tile-block factors as IxJxK (default: largest that fit)
    #[arg(short = 'p', long = "plan", value_parser = parse_triple)]
    plan: Option<(usize, usize, usize)>,

    /// Add a random bias matrix
    #[arg(short = 'b', long = "bias")]
    bias: bool,

    /// Activation: none, relu or relu6
    #[arg(short = 'a', long = "activation", default_value = "none")]
    activation: Activation,

    /// Rounding right shift applied to accumulator values
    #[arg(long = "shift", default_value = "0")]
    acc_shift: u32,

    /// ReLU6 ceiling is 6 << relu6-shift
    #[arg(long = "relu6-shift", default_value = "0")]
    relu6_shift: u32,

    /// Seed for the operand generator
    #[arg(long = "seed", default_value = "777")]
    seed: u32,

    /// Array configuration as JSON (default: 16x16 array)
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    /// Override the array dimension
    #[arg(long = "dim")]
    dim: Option<usize>,

    /// Print the instruction listing
    #[arg(short = 'l', long = "listing")]
    listing: bool,

    /// Print the instruction stream as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[derive(ClapArgs, Debug)]
struct CheckArgs {
    /// Listing file (default: stdin)
    #[arg(value_name = "FILE")]
    input_file: Option<String>,

    /// Capacity of each dependency queue
    #[arg(long = "capacity", default_value = "8")]
    capacity: usize,
}

fn parse_triple(s: &str) -> Result<(usize, usize, usize), String> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 3 {
        return Err(format!("Invalid format: {} (expected AxBxC)", s));
    }
    let mut values = [0usize; 3];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part
            .parse::<usize>()
            .map_err(|_| format!("Invalid number: {}", part))?;
    }
    Ok((values[0], values[1], values[2]))
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", context.red(), err);
    std::process::exit(1);
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args),
        Command::Check(args) => check(args),
    }
}

fn load_config(args: &RunArgs) -> ArrayConfig {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .unwrap_or_else(|e| fail(&format!("Failed to read config '{}'", path), e));
            serde_json::from_str(&text).unwrap_or_else(|e| fail("Invalid config", e))
        }
        None => ArrayConfig::default(),
    };
    if let Some(dim) = args.dim {
        config.dim = dim;
    }
    if let Err(e) = config.validate() {
        fail("Invalid config", e);
    }
    config
}

fn run(args: RunArgs) {
    let config = load_config(&args);
    let (m, n, k) = args.shape;
    let quant = QuantConfig::new(args.activation, args.acc_shift, args.relu6_shift);

    let mut lcg = Lcg::new(args.seed);
    let a = lcg.matrix_elem(m, k, -8, 8);
    let b = lcg.matrix_elem(k, n, -8, 8);
    let d = args.bias.then(|| lcg.matrix_acc(m, n, -100, 100));
    let expected = cpu_reference_matmul(&a, &b, d.as_ref(), &quant)
        .unwrap_or_else(|e| fail("Reference error", e));

    if args.verbose {
        println!("{}", "Matmul to Systolic Array Lowering".bold().blue());
        println!("{}", "=".repeat(35));
        println!();
        println!(
            "{}: {}x{}x{} ({}, bias {}, {} shift {})",
            "Problem".green(),
            m,
            n,
            k,
            args.dataflow,
            args.bias,
            quant.activation,
            quant.acc_shift
        );
        println!(
            "{}: {}x{} array, {} scratchpad rows, {} accumulator rows",
            "Target".green(),
            config.dim,
            config.dim,
            config.sp_rows(),
            config.acc_rows
        );
        println!();
    }

    let mut sim = ArraySimulator::new(&config);
    let problem = sim.load_problem(&a, &b, d.as_ref(), quant);
    let clock = MonotonicClock::new();

    if args.dataflow == Dataflow::CpuReference {
        let (result, elapsed) = timed(&clock, || sim.run_matmul(&problem, Dataflow::CpuReference, None));
        if let Err(e) = result {
            fail("Simulation error", e);
        }
        info!("reference kernel took {:?}", elapsed);
        report_match(&expected, &sim.read_output(&problem));
        return;
    }

    let plan = match args.plan {
        Some((i, j, k)) => TilingPlan::new(i, j, k),
        None => TilingPlan::auto(&MatmulShape::new(m, n, k), &config),
    };
    let mut model = QueueModel::wrapping(config.queue_capacity, InstructionStream::new());
    let (lowered, elapsed) = timed(&clock, || {
        tiled_matmul(&problem, &plan, args.dataflow, &config, &mut model)
    });
    let stats = lowered.unwrap_or_else(|e| fail("Scheduling error", e));
    let stream = model.into_inner();
    info!("lowered {} instructions in {:?}", stream.len(), elapsed);

    stream
        .replay(&mut sim)
        .unwrap_or_else(|e| fail("Simulation error", e));

    if args.json_output {
        match stream.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => fail("Failed to serialize to JSON", e),
        }
        return;
    }
    if args.listing {
        print!("{}", stream);
        return;
    }

    println!("{}", "Lowering Results".bold().green());
    println!("{}", "=".repeat(50));
    println!();
    println!("{}: {}x{}x{} tiles per block", "Plan".cyan(), plan.i, plan.j, plan.k);
    println!("{}: {}", "Blocks".cyan(), stats.blocks);
    println!("{}: {}", "Instructions".cyan(), stream.len());
    println!(
        "{}: {} retirements, {} drains",
        "Synchronization".cyan(),
        stats.retirements,
        stats.drains
    );
    let sim_stats = sim.stats();
    println!("{}: {} computes, ~{} cycles", "Execution".cyan(), sim_stats.computes, sim_stats.cycles);
    println!(
        "{}: {} bytes read, {} bytes written",
        "DRAM traffic".cyan(),
        sim_stats.dram_bytes_read,
        sim_stats.dram_bytes_written
    );
    if args.verbose {
        println!();
        println!("{}", "Instruction Mix".bold().yellow());
        println!("{}", "-".repeat(50));
        for (mnemonic, count) in stream.summary() {
            println!("  {:<20} {}", mnemonic, count);
        }
    }
    println!();
    report_match(&expected, &sim.read_output(&problem));
}

fn report_match(expected: &Matrix<Elem>, actual: &Matrix<Elem>) {
    let mismatches = expected
        .as_slice()
        .iter()
        .zip(actual.as_slice())
        .filter(|(e, a)| e != a)
        .count();
    if mismatches == 0 {
        println!("{}", "Result matches the reference kernel".bold().green());
    } else {
        println!(
            "{}: {} of {} elements differ",
            "MISMATCH".bold().red(),
            mismatches,
            expected.as_slice().len()
        );
        std::process::exit(2);
    }
}

fn check(args: CheckArgs) {
    let source = if let Some(file) = &args.input_file {
        fs::read_to_string(file)
            .unwrap_or_else(|e| fail(&format!("Failed to read file '{}'", file), e))
    } else {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .unwrap_or_else(|e| fail("Failed to read stdin", e));
        buffer
    };

    match check_listing(&source, args.capacity) {
        Ok(state) => {
            println!("{}", "Listing is queue-safe".bold().green());
            for queue in Queue::ALL {
                println!(
                    "  {:<8} peak {} / {}",
                    queue.to_string(),
                    state.high_water(queue),
                    state.capacity()
                );
            }
            if !state.is_drained() {
                println!("{}", "warning: queues not drained at end of listing".yellow());
            }
        }
        Err(e) => fail("Queue violation", e),
    }
}
