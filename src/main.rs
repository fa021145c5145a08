use anyhow::{bail, Context};
use clap::Parser;
use reset_deepscan::cli::{self, Args};
use reset_deepscan::{DeepSearch, SearchConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "reset_deepscan=debug"
    } else {
        "reset_deepscan=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    init_logging(args.verbose);

    // Validate arguments
    if let Err(e) = args.validate() {
        bail!("Invalid arguments: {}", e);
    }

    let base = match &args.config {
        Some(path) => cli::load_config(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SearchConfig::default(),
    };
    let config = args.to_config(base);
    config.validate().context("invalid search configuration")?;

    let zone = args.zone()?;
    let records = cli::load_records(&args.records, zone)
        .with_context(|| format!("loading records {}", args.records.display()))?;
    if records.is_empty() {
        warn!("No reference records loaded; the report will be empty");
    }
    info!(
        "Loaded {} records, {} workers, matchers {:?}",
        records.len(),
        config.worker_count(),
        config.enabled_matchers
    );

    let report = DeepSearch::new(records, config)
        .run(&args.root)
        .with_context(|| format!("deep search of {}", args.root.display()))?;

    let json = match (args.summary_only, args.pretty) {
        (true, true) => serde_json::to_string_pretty(&report.summary)?,
        (true, false) => serde_json::to_string(&report.summary)?,
        (false, true) => serde_json::to_string_pretty(&report)?,
        (false, false) => serde_json::to_string(&report)?,
    };
    println!("{}", json);

    info!(
        "{} matches, {} diagnostics, {:.1} MB/s",
        report.stats.matches_found,
        report.stats.diagnostics,
        report.stats.throughput_mbps()
    );
    Ok(())
}
