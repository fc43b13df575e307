//! Binary entry point: a thin ambient harness over the `kairos_sim` library,
//! mirroring the teacher's intent for a `cli` module (left commented out in
//! its own `lib.rs`) without pulling the harness into the library itself.

mod cli;

use clap::Parser;

fn main() {
    env_logger::init();
    let cli = cli::Cli::parse();
    cli::run(cli);
}
