use clap::Parser;
use release_dl::{CliTools, Config, Ledgers, ReleaseProcessor, RunStats, load_releases};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(
    version = env!("CARGO_PKG_VERSION"),
    name = env!("CARGO_PKG_NAME"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
struct Cli {
    /// Destination root for organized releases
    #[clap(short, long)]
    destination: Option<PathBuf>,

    /// JSON file with the release records to process
    #[clap(short, long)]
    input: Option<PathBuf>,

    /// Configuration file (JSON)
    #[clap(long)]
    config: Option<PathBuf>,

    /// Process only the first N releases that have links
    #[clap(short, long)]
    limit: Option<usize>,

    /// Only check that the external tools are installed
    #[clap(short, long)]
    check: bool,

    /// Delete the completion ledger and exit
    #[clap(short, long)]
    reset: bool,

    /// Print ledger and queue counts and exit
    #[clap(short, long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("release_dl=info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, code = e.error_code(), "release-dl failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> release_dl::Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env()?;
    if let Some(destination) = cli.destination {
        config.paths.destination = destination;
    }
    if let Some(input) = cli.input {
        config.paths.input = input;
    }

    if cli.check {
        let missing = CliTools::from_config(&config.tools).missing();
        if missing.is_empty() {
            println!("All external tools found.");
            return Ok(ExitCode::SUCCESS);
        }
        for tool in &missing {
            println!("missing: {} (needed for {})", tool.binary, tool.purpose);
        }
        return Ok(ExitCode::FAILURE);
    }

    if cli.reset {
        let mut ledgers = Ledgers::open(&config.paths)?;
        ledgers.completed.reset()?;
        println!("Completion ledger cleared.");
        return Ok(ExitCode::SUCCESS);
    }

    if cli.stats {
        let stats = Ledgers::open(&config.paths)?.stats();
        println!("Completed: {}", stats.completed);
        println!("Failed:    {}", stats.failed);
        println!("Pending:   {}", stats.pending);
        return Ok(ExitCode::SUCCESS);
    }

    let releases = load_releases(&config.paths.input)?;
    let mut processor = ReleaseProcessor::new(config)?;
    let stats = release_dl::run_with_shutdown(&mut processor, &releases, cli.limit).await?;
    print_summary(&stats);
    Ok(ExitCode::SUCCESS)
}

fn print_summary(stats: &RunStats) {
    println!();
    println!("Summary ({} releases)", stats.total());
    println!("  succeeded: {}", stats.succeeded);
    println!("  skipped:   {}", stats.skipped);
    println!("  failed:    {}", stats.failed);
    println!("  partial:   {}", stats.partial);
    println!("  pending:   {}", stats.pending);
}
