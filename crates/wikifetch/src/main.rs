use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wikifetch_core::client::MediaWikiClient;
use wikifetch_core::config::{
    ConfigOverrides, DEFAULT_CONFIG_FILENAME, FetchConfig, load_config_file,
};
use wikifetch_core::run::{RunReport, run};
use wikifetch_core::runtime::{OutputLayout, normalize_for_display};

#[derive(Debug, Parser)]
#[command(
    name = "wikifetch",
    version,
    about = "Fetch wiki category collections and daily feeds into JSON files"
)]
struct Cli {
    #[arg(long, value_name = "PATH", help = "Config file (default: wikifetch.toml)")]
    config: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Directory that receives the JSON artifacts"
    )]
    output_dir: Option<PathBuf>,
    #[arg(
        long,
        value_name = "YYYY-MM-DD",
        help = "Run date for the daily feeds (default: today, UTC)"
    )]
    date: Option<NaiveDate>,
    #[arg(long, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, help = "Print the run report as JSON")]
    json: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .or_else(|| env::var("WIKIFETCH_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    let file = load_config_file(&config_path)?;
    let config = FetchConfig::resolve(
        &file,
        &ConfigOverrides {
            output_dir: cli.output_dir.clone(),
        },
    )
    .with_context(|| {
        format!(
            "invalid configuration in {}",
            normalize_for_display(&config_path)
        )
    })?;
    let layout = OutputLayout::from_config(&config);
    debug!(
        config = %normalize_for_display(&config_path),
        output = %normalize_for_display(&layout.root),
        "configuration resolved"
    );
    let date = cli.date.unwrap_or_else(|| Utc::now().date_naive());

    let mut client = MediaWikiClient::new(&config)?;
    let report = run(&config, &layout, &mut client, date)?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize run report")?
        );
    } else {
        print_report(&report);
    }
    if cli.diagnostics {
        println!("\n[diagnostics]");
        println!("config_path={}", normalize_for_display(&config_path));
        println!("{}", config.diagnostics());
        println!("{}", layout.diagnostics());
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_report(report: &RunReport) {
    println!("wikifetch run {}", report.date.format("%Y-%m-%d"));
    println!("categories: {}", report.categories.len());
    for category in &report.categories {
        match &category.error {
            Some(error) => println!(
                "  - {} [{}] failed at {}: {error}",
                category.slug,
                category.category,
                category.stage
            ),
            None => println!(
                "  - {} [{}] {} (articles: {}, dropped: {}, requests: {})",
                category.slug,
                category.category,
                category.status.as_str(),
                category.articles,
                category.dropped,
                category.requests
            ),
        }
    }
    for feed in [&report.featured, &report.on_this_day] {
        println!(
            "{}: {} ({})",
            feed.kind,
            feed.status.as_str(),
            normalize_for_display(&feed.path)
        );
        if let Some(error) = &feed.error {
            println!("  error: {error}");
        }
    }
    println!("failed_categories: {}", report.failed_categories());
    println!("changed_artifacts: {}", report.changed_artifacts());
    println!("requests: {}", report.requests);
    println!(
        "elapsed_ms: {}",
        (report.finished_at - report.started_at).num_milliseconds()
    );
}
