mod commands;
mod logging;
mod progress;
mod prompt;

use std::process;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliSink;
use trace_ingest_core::{Catalog, Pipeline, ProcessingConfig, ProcessingState};
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match trace_ingest_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Run) => run_pipeline(config),
        Some(Commands::Status) => show_status(&config),
        Some(Commands::Show { name }) => show_package(&config, &name),
        Some(Commands::List { state }) => list_packages(&config, state),
        Some(Commands::MarkHandled { name }) => mark_handled(&config, &name),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
        Some(Commands::TruncateDb) => {
            let question = "Are you SURE you want to COMPLETELY DELETE the catalog?";
            match prompt::confirm_on_terminal(question) {
                Ok(true) => truncate_catalog(&config),
                Ok(false) => {
                    println!("Catalog left untouched");
                    Ok(())
                }
                Err(err) => Err(err).context("reading confirmation"),
            }
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
    Ok(())
}

fn open_catalog(config: &ProcessingConfig) -> anyhow::Result<Catalog> {
    Catalog::open(&config.catalog_path)
        .with_context(|| format!("opening catalog {}", config.catalog_path.display()))
}

fn run_pipeline(config: ProcessingConfig) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(config)?;
    let sink = CliSink::new();
    let summary = pipeline.run_once(&sink)?;

    println!();
    info!(
        "{} discovered, {} moved, {} measured in {}",
        format!("{}", summary.discovered).green(),
        format!("{}", summary.moved).green(),
        format!("{}", summary.measured).green(),
        format!("{:.2}s", summary.duration.as_secs_f64()).cyan(),
    );
    if summary.skipped > 0 {
        info!("{} skipped", format!("{}", summary.skipped).yellow());
    }
    if !summary.failures.is_empty() {
        warn!("{} failed", format!("{}", summary.failures.len()).red());
        for failure in &summary.failures {
            warn!("  [{}] {}: {}", failure.stage, failure.package, failure.detail);
        }
    }
    for (stage, message) in &summary.stage_errors {
        error!("Stage {} did not run: {}", stage, message);
    }
    Ok(())
}

fn show_status(config: &ProcessingConfig) -> anyhow::Result<()> {
    let catalog = open_catalog(config)?;
    for (state, count) in catalog.state_counts()? {
        println!("{:<30} {}", state.to_string().bold(), count);
    }
    println!("{:<30} {}", "total".bold(), catalog.package_count()?);
    Ok(())
}

fn show_package(config: &ProcessingConfig, name: &str) -> anyhow::Result<()> {
    let catalog = open_catalog(config)?;
    let Some(package) = catalog.package_by_name(name)? else {
        bail!("no package named {}", name);
    };

    println!("{} (#{})", package.name.bold(), package.id);
    println!("  path:        {}", package.full_path.display());
    if let Some(captured) = package.captured_at {
        println!("  captured at: {}", captured.to_rfc3339());
    }
    println!(
        "  state:       {}",
        package
            .state
            .map_or("registered".to_string(), |s| s.to_string())
            .cyan()
    );

    println!("  history:");
    for record in catalog.history(package.id)? {
        println!(
            "    {}  {:<28} {}",
            record.changed_at.to_rfc3339(),
            record.state.to_string(),
            record.path.display()
        );
    }

    let measurements = catalog.measurements_for(package.id)?;
    if !measurements.is_empty() {
        println!("  measurements:");
        for m in measurements.iter() {
            println!("    {:<20} {}", m.kind, m.payload);
        }
    }
    Ok(())
}

fn list_packages(config: &ProcessingConfig, state: ProcessingState) -> anyhow::Result<()> {
    let catalog = open_catalog(config)?;
    let packages = catalog.packages_in_state(state)?;
    for package in &packages {
        println!("{}\t{}", package.name, package.full_path.display());
    }
    info!("{} packages {}", format!("{}", packages.len()).green(), state);
    Ok(())
}

fn mark_handled(config: &ProcessingConfig, name: &str) -> anyhow::Result<()> {
    let catalog = open_catalog(config)?;
    let package = catalog.mark_handled(name, Utc::now())?;
    let state = package.state.map_or("registered".to_string(), |s| s.to_string());
    println!("{} -> {}", package.name.bold(), state.green());
    Ok(())
}

fn truncate_catalog(config: &ProcessingConfig) -> anyhow::Result<()> {
    open_catalog(config)?.truncate_all()?;
    println!("All tables truncated");
    Ok(())
}
