mod cli;
mod handlers;

use clap::Parser;
use pmw_backend_thread::ThreadBackend;
use pmw_core::{Master, TaskSelector, TaskSpec};

use crate::cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    pmw_core::HandlerTable::register("monte_pi_throw_darts", handlers::throw_darts);

    let backend = ThreadBackend::new(cli.num_workers as usize);
    let master = Master::new(backend);

    let tests_per_task = cli.num_tests / cli.num_workers as u64;
    let mut tasks = Vec::with_capacity(cli.num_workers as usize);

    for seed in 0..cli.num_workers as u64 {
        let input = bincode::serialize(&(seed, tests_per_task))?;
        let task = master.submit_task(TaskSpec::handler("monte_pi_throw_darts", vec![input]))?;
        tasks.push(task);
    }

    let mut num_hits: u64 = 0;
    let mut num_tests: u64 = 0;

    for _ in 0..tasks.len() {
        let Some((_task, output)) = master.get_result(TaskSelector::Many(tasks.clone()), true)? else {
            anyhow::bail!("get_result returned nothing while tasks were still outstanding");
        };
        let pmw_core::TaskOutput::Single { result, .. } = output else {
            anyhow::bail!("monte_pi_throw_darts produced a composite output unexpectedly");
        };
        let (hits, tests): (u64, u64) = bincode::deserialize(&result)?;
        num_hits += hits;
        num_tests += tests;
    }

    master.shutdown();

    let pi_estimate = 4.0 * num_hits as f64 / num_tests as f64;
    println!("Estimate of pi: {pi_estimate}");
    println!("Estimate error: {}", (pi_estimate - std::f64::consts::PI).abs());
    println!("Number of tasks: {}", cli.num_workers);
    println!("Total samples: {num_tests}");

    Ok(())
}
