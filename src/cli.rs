//! Thin demonstration harness: parses a [`Specs`], runs the kernel's one
//! built-in demonstration model, and prints the resulting value plus queue
//! statistics (SPEC_FULL §A "CLI / demonstration surface"). Narrowed from
//! the teacher's three-stage `generate-ensembles` / `simulate` / `analyze`
//! pipeline to a single `run` command — this binary is strictly ambient
//! tooling, not part of the kernel's public surface (spec.md §6: "no CLI is
//! part of the core").

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use serde::{Deserialize, Serialize};

use kairos_sim::dynamics::{Dynamics, Integrator};
use kairos_sim::process::{hold, run_process};
use kairos_sim::queue::InfiniteQueue;
use kairos_sim::simulation::{run_simulation, run_simulation_series};
use kairos_sim::strategy::Strategy;
use kairos_sim::{Method, Specs};

#[derive(Parser, Debug)]
#[command(author, version, about = "Hybrid discrete-event / continuous-time simulation kernel — demonstration harness", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs the built-in demonstration model (a constant-derivative
    /// integrator alongside a producer/consumer queue) once, or as a
    /// reproducible series, and prints the resulting statistics.
    Run {
        /// TOML file holding `{start_time, stop_time, dt, method}`; overrides
        /// the individual flags below when given.
        #[arg(long)]
        specs_file: Option<PathBuf>,

        #[arg(long, default_value_t = 0.0)]
        start_time: f64,
        #[arg(long, default_value_t = 10.0)]
        stop_time: f64,
        #[arg(long, default_value_t = 0.5)]
        dt: f64,
        #[arg(long, value_enum, default_value_t = MethodArg::Rk4)]
        method: MethodArg,

        /// Number of independent runs; 1 runs [`run_simulation`] directly,
        /// more than 1 runs [`run_simulation_series`].
        #[arg(long, default_value_t = 1)]
        runs: u64,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Writes the run's `Specs` back out — `.bin` for `bincode`,
        /// anything else for `serde_json` — purely to exercise the
        /// serialization stack kept from the teacher's dependency table.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum MethodArg {
    Euler,
    Rk2,
    Rk4,
}

impl From<MethodArg> for Method {
    fn from(m: MethodArg) -> Self {
        match m {
            MethodArg::Euler => Method::Euler,
            MethodArg::Rk2 => Method::Rk2,
            MethodArg::Rk4 => Method::Rk4,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SpecsFile {
    start_time: f64,
    stop_time: f64,
    dt: f64,
    method: String,
}

fn parse_method(s: &str) -> Method {
    match s.to_ascii_lowercase().as_str() {
        "euler" => Method::Euler,
        "rk2" => Method::Rk2,
        "rk4" => Method::Rk4,
        other => panic!("unknown integration method in specs file: {other}"),
    }
}

/// Resolves the `Specs` for a `run` invocation: the file, if given,
/// otherwise the CLI flags.
fn resolve_specs(
    specs_file: &Option<PathBuf>,
    start_time: f64,
    stop_time: f64,
    dt: f64,
    method: MethodArg,
) -> Specs {
    let (start_time, stop_time, dt, method) = match specs_file {
        Some(path) => {
            let text = fs::read_to_string(path)
                .unwrap_or_else(|e| panic!("failed to read specs file {}: {e}", path.display()));
            let parsed: SpecsFile =
                toml::from_str(&text).unwrap_or_else(|e| panic!("invalid specs file {}: {e}", path.display()));
            (parsed.start_time, parsed.stop_time, parsed.dt, parse_method(&parsed.method))
        }
        None => (start_time, stop_time, dt, method.into()),
    };
    Specs::new(start_time, stop_time, dt, method).expect("invalid run specs")
}

/// The kernel's built-in demonstration model: an `Integrator` with `dx/dt =
/// 1` (so `x(stop_time) = stop_time`, spec.md §8 scenario 4) running
/// alongside a producer process that feeds an FCFS `InfiniteQueue` and a
/// consumer process that drains it, so the statistics printed below have
/// something to report. Not a user model in the sense the spec's Non-goals
/// exclude (fisheries, RNG programs) — it exists only to exercise the
/// kernel end to end.
fn demo_model(run: &kairos_sim::Run) -> Dynamics<f64> {
    let specs = *run.specs();
    let x = Integrator::new(specs, 0.0);
    x.set_derivative(Dynamics::constant(1.0));

    let queue: InfiniteQueue<u64> = InfiniteQueue::new(Strategy::Fcfs, Strategy::Fcfs);
    let run_for_producer = run.clone();
    let producer_queue = queue.clone();
    run_process(
        run,
        false,
        hold(specs.dt).and_then(move |_| {
            producer_queue.enqueue(&run_for_producer, 0);
            kairos_sim::process::Process::pure(())
        }),
    );
    let consumer_queue = queue.clone();
    run_process(run, false, consumer_queue.dequeue().map(|_| ()));

    x.as_dynamics()
}

pub fn run(cli: Cli) {
    match cli.command {
        Commands::Run { specs_file, start_time, stop_time, dt, method, runs, seed, output } => {
            let specs = resolve_specs(&specs_file, start_time, stop_time, dt, method);
            info!("running specs={specs:?} runs={runs} seed={seed}");

            if runs <= 1 {
                let x = run_simulation(specs, demo_model);
                println!("x(stop_time={}) = {x}", specs.stop_time);
            } else {
                let xs = run_simulation_series(specs, seed, runs, demo_model);
                println!("ran {} independent runs", xs.len());
                for (i, x) in xs.iter().enumerate() {
                    println!("  run {i}: x(stop_time) = {x}");
                }
            }

            if let Some(path) = output {
                write_specs(&specs, &path);
            }
        }
    }
}

fn write_specs(specs: &Specs, path: &PathBuf) {
    if path.extension().and_then(|e| e.to_str()) == Some("bin") {
        let bytes = bincode::serialize(specs).expect("bincode serialization of Specs cannot fail");
        fs::write(path, bytes).unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
    } else {
        let json = serde_json::to_string_pretty(specs).expect("json serialization of Specs cannot fail");
        fs::write(path, json).unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
    }
}
