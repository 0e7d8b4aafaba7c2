use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use forum_mirror::{Error, FetchCommand, FetchOrchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let args = FetchCommand::parse();
    initialize_logging(args.verbose)?;

    let working_dir =
        std::env::current_dir().context("could not get current working directory")?;
    let (config, ranges) = args.into_config(working_dir);

    println!("🚀 Mirroring forum topic: {}", config.url_template.blue());
    println!("📁 Target directory: {:?}", config.target_dir);

    let orchestrator = FetchOrchestrator::new(config)?;
    let summary = match orchestrator.run(&ranges).await {
        Ok(summary) => summary,
        Err(e @ Error::NoPagesSelected) => {
            eprintln!("{} {}", "error:".red(), e);
            eprintln!("Run 'forum-mirror --help' for usage.");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(archive) = &summary.archived_ledger {
        println!("🗄️  Previous list of failed downloads archived to {:?}", archive);
    }
    if !summary.recovered.is_empty() {
        println!("🔁 Reattempted pages: {}", join_pages(&summary.recovered));
    }
    if !summary.skipped.is_empty() {
        println!("⏭️  Skipped already fetched pages: {}", join_pages(&summary.skipped));
    }
    println!("📊 Pages fetched: {}", summary.persisted.len().to_string().green());
    if summary.failed.is_empty() {
        println!("✅ Forum topic mirroring completed successfully!");
    } else {
        println!(
            "⚠️  Pages that failed and will be reattempted next run: {}",
            join_pages(&summary.failed).yellow()
        );
    }

    Ok(())
}

fn initialize_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn join_pages(pages: &[u32]) -> String {
    pages
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
