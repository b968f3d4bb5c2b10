mod commands;
mod logging;
mod progress;

use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use progress::CliReporter;
use serde::Deserialize;
use snapkeeper_core::engine::project_db_path;
use snapkeeper_core::storage::models::ProjectSettings;
use snapkeeper_core::{
    CpuProfile, EngineConfig, Error, FileCategory, HashLevel, PipelineEngine, ScanFilter, Store,
};
use std::path::Path;
use std::process;
use std::sync::Arc;
use tracing::error;

/// Optional per-project `Config.toml` with scan-filter overrides.
#[derive(Debug, Default, Clone, Deserialize)]
struct CliConfig {
    #[serde(default)]
    ignore_patterns: Vec<String>,
    min_size_bytes: Option<u64>,
    max_size_bytes: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    let _guard = match logging::init_logger(&args.project) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Cannot set up logging under {}: {}", args.project.display(), err);
            None
        }
    };

    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return Ok(());
    };

    if let Err(err) = dispatch(&args.project, command) {
        if err.is_cancelled() {
            println!("{}", "Cancelled. Progress is saved; rerun to resume.".yellow());
            return Ok(());
        }
        error!("Error: {}", err);
        process::exit(1);
    }
    Ok(())
}

fn dispatch(project_dir: &Path, command: Commands) -> snapkeeper_core::Result<()> {
    let command = match command {
        Commands::Init { name, hash, profile, target } => {
            return init_project(project_dir, &name, &hash, &profile, target.as_deref());
        }
        other => other,
    };

    let store = Arc::new(Store::open(&project_db_path(project_dir))?);
    let settings = store
        .load_settings()?
        .ok_or_else(|| Error::Config("no project here; run `snapkeeper init` first".into()))?;
    let config = engine_config(&settings, &load_cli_config(project_dir));
    let engine = PipelineEngine::with_store(Arc::clone(&store), config)
        .with_reporter(Arc::new(CliReporter::new()));

    match command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::AddRoot { path, label } => {
            let id = engine.add_root(&path, label.as_deref())?;
            println!("Added root {} ({})", path.display(), id);
        }
        Commands::Roots => {
            for root in engine.roots()? {
                let flag = if root.is_enabled { "enabled" } else { "disabled" };
                println!(
                    "{:>4}  {}  [{} | {}]  {} files, {} bytes",
                    root.id,
                    root.path,
                    root.root_type.as_str(),
                    flag,
                    root.file_count,
                    root.total_bytes
                );
            }
        }
        Commands::SetTarget { path } => {
            store.set_target_path(&path.to_string_lossy())?;
            println!("Destination set to {}", path.display());
        }
        Commands::Scan => {
            let outcome = engine.scan()?;
            println!(
                "Scan: {} candidates, {} rejected, {} errors, {} reparse points skipped",
                format!("{}", outcome.emitted).green(),
                outcome.rejected,
                format_errors(outcome.errors),
                outcome.reparse_points_skipped
            );
        }
        Commands::Hash => {
            let outcome = engine.hash()?;
            println!(
                "Hash: {} hashed, {} errors",
                format!("{}", outcome.hashed).green(),
                format_errors(outcome.errors)
            );
        }
        Commands::Plan => print_plan(&engine.plan()?),
        Commands::Run => print_plan(&engine.run_to_plan()?),
        Commands::Tree => {
            for node in store.folder_tree()? {
                let name = node.user_edited_name.as_deref().unwrap_or(&node.display_name);
                let flag = if node.copy_enabled { "" } else { "  [excluded]" };
                println!(
                    "{}{}  - {} unique, {} dupes, {} bytes{}",
                    node.proposed_relative_path,
                    if name != node.display_name {
                        format!("  (renamed: {})", name)
                    } else {
                        String::new()
                    },
                    node.unique_count,
                    node.duplicate_count,
                    node.total_size_bytes,
                    flag
                );
            }
        }
        Commands::Dupes { offset, limit, instances } => {
            for entry in store.list_unique_files(offset, limit)? {
                let name = entry.planned_file_name.as_deref().unwrap_or("?");
                let folder = entry.planned_folder_path.as_deref().unwrap_or("-");
                let flag = if entry.copy_enabled { "" } else { "  [excluded]" };
                println!(
                    "{:>5}  {}/{}  [{}]  x{}  {} bytes  {}{}",
                    entry.unique_file_id,
                    folder,
                    name,
                    entry.category.as_str(),
                    entry.duplicate_count,
                    entry.size_bytes,
                    &entry.hash_hex[..entry.hash_hex.len().min(12)],
                    flag
                );
                if instances {
                    for path in store.instances_for_unique_file(entry.unique_file_id)? {
                        println!("       {}", path);
                    }
                }
            }
        }
        Commands::Copy => {
            let outcome = engine.copy()?;
            println!(
                "Copy: {} copied, {} verified, {} skipped, {} failed",
                format!("{}", outcome.copied).green(),
                format!("{}", outcome.verified).green(),
                outcome.skipped,
                format_errors(outcome.failed)
            );
        }
        Commands::Verify => {
            let report = engine.verify()?;
            println!(
                "Verification: {} checked, {} matched, {} mismatched, {} missing, {} unreadable",
                report.checked,
                format!("{}", report.matched).green(),
                format_errors(report.mismatched as u64),
                report.missing,
                report.read_errors
            );
        }
        Commands::Status => {
            let summary = engine.summary()?;
            println!("State: {}", engine.state().as_str().cyan());
            println!(
                "Instances: {} total ({} discovered, {} hashed, {} errors)",
                summary.total_instances, summary.discovered, summary.hashed, summary.errored
            );
            println!(
                "Unique files: {} ({} duplicate instances, {} of {} bytes unique)",
                summary.unique_files,
                summary.duplicate_instances,
                summary.unique_bytes,
                summary.total_bytes
            );
            if let Some(last_error) = &settings.last_error {
                println!("Last error: {}", last_error.red());
            }
        }
        Commands::FailedJobs => {
            let failed = store.failed_jobs()?;
            if failed.is_empty() {
                println!("No failed jobs");
            }
            for job in failed {
                println!(
                    "{:>4}  {} -> {}  ({} attempts): {}",
                    job.job_id,
                    job.source_absolute_path,
                    job.destination_full_path,
                    job.attempt_count,
                    job.last_error.as_deref().unwrap_or("unknown").red()
                );
            }
        }
        Commands::Reset => {
            engine.return_to_idle()?;
            println!("Pipeline returned to Idle");
        }
    }
    Ok(())
}

fn init_project(
    project_dir: &Path,
    name: &str,
    hash: &str,
    profile: &str,
    target: Option<&Path>,
) -> snapkeeper_core::Result<()> {
    let hash_level = HashLevel::parse(hash)
        .ok_or_else(|| Error::HashUnavailable(hash.to_string()))?;
    let cpu_profile = CpuProfile::parse(profile)
        .ok_or_else(|| Error::Config(format!("unknown CPU profile '{}'", profile)))?;

    std::fs::create_dir_all(project_dir)?;
    let store = Store::open(&project_db_path(project_dir))?;
    store.init_project(
        name,
        hash_level,
        cpu_profile,
        &[FileCategory::Image, FileCategory::Movie, FileCategory::Audio],
    )?;
    if let Some(target) = target {
        store.set_target_path(&target.to_string_lossy())?;
    }
    println!(
        "Project '{}' ready ({} hashing, {} profile)",
        name.green(),
        hash_level.as_str(),
        cpu_profile.as_str()
    );
    Ok(())
}

fn load_cli_config(project_dir: &Path) -> CliConfig {
    config::Config::builder()
        .add_source(config::File::from(project_dir.join("Config")).required(false))
        .build()
        .and_then(|c| c.try_deserialize::<CliConfig>())
        .unwrap_or_default()
}

/// The engine config is settings-first: the store fixes the hash algorithm
/// and profile; Config.toml only tunes the scan filter.
fn engine_config(settings: &ProjectSettings, cli: &CliConfig) -> EngineConfig {
    let mut config = EngineConfig::default();
    if let Some(level) = HashLevel::parse(&settings.hash_level) {
        config.hash_level = level;
    }
    if let Some(profile) = CpuProfile::parse(&settings.cpu_profile) {
        config.cpu_profile = profile;
    }
    config.verify_after_copy = settings.verify_by_default;
    config.movie_hash_chunk_mb = settings.movie_hash_chunk_size_mb.map(|mb| mb as u32);
    config.filter = ScanFilter {
        enabled_categories: settings.enabled_categories.clone(),
        min_size_bytes: cli.min_size_bytes,
        max_size_bytes: cli.max_size_bytes,
        ignore_patterns: cli.ignore_patterns.clone(),
    };
    config
}

fn format_errors(count: u64) -> ColoredString {
    if count > 0 {
        format!("{}", count).red()
    } else {
        format!("{}", count).normal()
    }
}

fn print_plan(plan: &snapkeeper_core::planner::PlanSummary) {
    println!(
        "Plan: {} unique files in {} folders, {} duplicate instances, {} bytes to copy",
        format!("{}", plan.unique_files).green(),
        plan.folders,
        format!("{}", plan.duplicate_instances).yellow(),
        plan.total_bytes
    );
}
