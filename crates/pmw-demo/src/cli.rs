use clap::Parser;

fn default_num_workers() -> u16 {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(64) as u16
}

/// Estimate pi with a map-reduce-shaped Monte Carlo dart throw.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Number of worker tasks to split the sampling across.
    #[arg(short = 'n', long, default_value_t = default_num_workers())]
    pub num_workers: u16,

    /// Total number of Monte Carlo samples across all tasks.
    #[arg(short = 't', long, default_value_t = 1_000_000)]
    pub num_tests: u64,
}
