use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use engflow_core::{
    backup::{load_backup, validate_backup, BackupArtifact, BackupEngine},
    config::MigrationConfig,
    db,
    detailed_validation::{generate_differences_report, DetailedValidator},
    entities::Entity,
    integrity::{generate_integrity_report, IntegrityValidator, ValidationResult},
    migration::{MigrationReport, MigrationRunner},
    rollback::{generate_rollback_report, RollbackEngine, RollbackResult},
    store::{JsonFileKeyValueStore, PostgresTabularStore},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "EngFlow local-to-Postgres migration tooling", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// JSON export of the browser local store
    #[arg(long, global = true)]
    local_store: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Snapshot the local store into a backup file
    Backup(BackupArgs),
    /// Check a backup file's structure, checksums and record count
    VerifyBackup(BackupFileArgs),
    /// Overwrite the local store with the contents of a backup file
    Restore(BackupFileArgs),
    /// Back up, copy the local store into Postgres, then check integrity
    Migrate(MigrateArgs),
    /// Compare local and remote records field by field
    Validate(ReportArgs),
    /// Run count, foreign-key and structural checks against Postgres
    Integrity(ReportArgs),
    /// Empty the remote tables and restore the local store from a backup
    Rollback(RollbackArgs),
}

#[derive(Args, Debug)]
struct BackupArgs {
    /// Directory the backup file is written to (defaults to the configured backup_dir)
    #[arg(long)]
    dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct BackupFileArgs {
    /// Backup file produced by `engflow-admin backup`
    path: PathBuf,
}

#[derive(Args, Debug)]
struct MigrateArgs {
    /// Roll back automatically when the migration or the integrity check fails
    #[arg(long)]
    auto_rollback: bool,
    /// Directory the pre-migration backup is written to
    #[arg(long)]
    dir: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct ReportArgs {
    /// Write the Markdown report to this file
    #[arg(long)]
    output: Option<PathBuf>,
    /// Print the full result as JSON instead of a summary table
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct RollbackArgs {
    /// Backup file to roll back to
    backup: PathBuf,
    /// Reason recorded in the rollback report
    #[arg(long)]
    reason: Option<String>,
    #[command(flatten)]
    report: ReportArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let mut config =
        MigrationConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(path) = cli.local_store {
        config.local_store_path = path;
    }

    match cli.command {
        Command::Backup(args) => handle_backup(&config, args),
        Command::VerifyBackup(args) => handle_verify_backup(args),
        Command::Restore(args) => handle_restore(&config, args),
        Command::Migrate(args) => handle_migrate(&config, args).await,
        Command::Validate(args) => handle_validate(&config, args).await,
        Command::Integrity(args) => handle_integrity(&config, args).await,
        Command::Rollback(args) => handle_rollback(&config, args).await,
    }
}

fn open_local(config: &MigrationConfig) -> Result<JsonFileKeyValueStore> {
    JsonFileKeyValueStore::open(&config.local_store_path).with_context(|| {
        format!(
            "failed to open local store {}",
            config.local_store_path.display()
        )
    })
}

async fn open_remote(config: &MigrationConfig) -> Result<PostgresTabularStore> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL (or ENGFLOW_DATABASE_URL) must be set")?;
    let pool = db::connect(database_url).await?;
    Ok(PostgresTabularStore::new(pool))
}

fn emit_report(report: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, report)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => println!("{report}"),
    }
    Ok(())
}

fn artifact_table(artifact: &BackupArtifact) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Entity", "Records", "Checksum"]);
    for entity in Entity::ALL {
        let checksum = artifact
            .checksums
            .as_ref()
            .and_then(|checksums| checksums.get(&entity))
            .cloned()
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            entity.to_string(),
            artifact.records(entity).len().to_string(),
            checksum,
        ]);
    }
    table
}

fn handle_backup(config: &MigrationConfig, args: BackupArgs) -> Result<()> {
    let local = open_local(config)?;
    let dir = args.dir.unwrap_or_else(|| config.backup_dir.clone());

    let engine = BackupEngine::with_options(&local, config.backup_options());
    let (artifact, path) = engine.execute_backup(&dir).context("backup failed")?;

    println!("{}", artifact_table(&artifact));
    println!(
        "Backup of {} records written to {}",
        artifact.total_records(),
        path.display()
    );
    Ok(())
}

fn handle_verify_backup(args: BackupFileArgs) -> Result<()> {
    let artifact = load_backup(&args.path)
        .with_context(|| format!("failed to read backup {}", args.path.display()))?;

    println!("{}", artifact_table(&artifact));
    if !validate_backup(&artifact) {
        bail!("backup {} is invalid", args.path.display());
    }
    println!("Backup {} is valid.", args.path.display());
    Ok(())
}

fn handle_restore(config: &MigrationConfig, args: BackupFileArgs) -> Result<()> {
    let artifact = load_backup(&args.path)
        .with_context(|| format!("failed to read backup {}", args.path.display()))?;
    let local = open_local(config)?;

    BackupEngine::with_options(&local, config.backup_options())
        .restore_from_backup(&artifact)
        .context("restore failed")?;

    println!(
        "Restored {} records into {}",
        artifact.total_records(),
        local.path().display()
    );
    Ok(())
}

fn migration_table(report: &MigrationReport) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Entity", "Local", "Inserted", "Skipped", "Status"]);
    for entry in &report.entities {
        table.add_row(vec![
            entry.entity.to_string(),
            entry.local_records.to_string(),
            entry.inserted_records.to_string(),
            entry.skipped_records.to_string(),
            format!("{:?}", entry.status),
        ]);
    }
    table
}

fn integrity_table(result: &ValidationResult) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Check", "Status", "Detail"]);
    for validation in &result.validations {
        table.add_row(vec![
            format!("count {}", validation.entity),
            validation.status.icon().to_string(),
            validation.message.clone(),
        ]);
    }
    for validation in &result.foreign_key_validations {
        table.add_row(vec![
            validation.relationship.clone(),
            validation.status.icon().to_string(),
            validation.message.clone(),
        ]);
    }
    for check in &result.data_integrity_checks {
        table.add_row(vec![
            check.check.clone(),
            check.status.icon().to_string(),
            check.message.clone(),
        ]);
    }
    table
}

fn rollback_table(result: &RollbackResult) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Step", "Status", "Duration (ms)", "Detail"]);
    for operation in &result.operations {
        table.add_row(vec![
            operation.name.clone(),
            operation.status.icon().to_string(),
            operation.duration.to_string(),
            operation.detail.clone(),
        ]);
    }
    table
}

async fn handle_migrate(config: &MigrationConfig, args: MigrateArgs) -> Result<()> {
    let local = open_local(config)?;
    let remote = open_remote(config).await?;
    let dir = args.dir.unwrap_or_else(|| config.backup_dir.clone());

    let (backup, backup_path) = BackupEngine::with_options(&local, config.backup_options())
        .execute_backup(&dir)
        .context("pre-migration backup failed; nothing was migrated")?;
    info!(path = %backup_path.display(), "pre-migration backup written");
    println!("Backup written to {}", backup_path.display());

    let report = MigrationRunner::with_options(&local, &remote, config.migration_options())
        .execute_migration()
        .await;
    println!("{}", migration_table(&report));

    let validation = IntegrityValidator::new(&local, &remote)
        .validate_migration_integrity()
        .await;
    println!("{}", integrity_table(&validation));

    if report.success && validation.success {
        println!(
            "Migrated {} records (integrity score {}%).",
            report.total_inserted, validation.summary.integrity_score
        );
        return Ok(());
    }

    if !args.auto_rollback {
        bail!(
            "migration finished with {} errors and {} integrity errors; run `engflow-admin rollback {}` to undo it",
            report.errors.len(),
            validation.errors.len(),
            backup_path.display()
        );
    }

    warn!("migration failed, rolling back");
    let rollback = RollbackEngine::with_options(&local, &remote, config.rollback_options())
        .auto_rollback(&backup, &report.errors, Some(&validation))
        .await;
    println!("{}", generate_rollback_report(&rollback));

    if rollback.success {
        bail!("migration failed and was rolled back");
    }
    bail!(
        "migration failed and the rollback did not complete; backup kept at {}",
        backup_path.display()
    )
}

async fn handle_validate(config: &MigrationConfig, args: ReportArgs) -> Result<()> {
    let local = open_local(config)?;
    let remote = open_remote(config).await?;

    let result = DetailedValidator::new(&local, &remote)
        .perform_detailed_validation()
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let mut table = Table::new();
        table.set_header(vec![
            "Entity", "Status", "Local", "Supabase", "Matching", "Missing", "Extra", "Modified",
        ]);
        for comparison in &result.comparisons {
            table.add_row(vec![
                comparison.entity_name.to_string(),
                comparison.status.icon().to_string(),
                comparison.local_records.to_string(),
                comparison.supabase_records.to_string(),
                comparison.matching_records.to_string(),
                comparison.missing_records.len().to_string(),
                comparison.extra_records.len().to_string(),
                comparison.modified_records.len().to_string(),
            ]);
        }
        println!("{table}");
        println!("Accuracy: {}%", result.summary.accuracy_percentage);
    }

    if let Some(output) = args.output.as_deref() {
        emit_report(&generate_differences_report(&result), Some(output))?;
    }

    if !result.success || !result.errors.is_empty() {
        bail!("detailed validation found {} errors", result.errors.len());
    }
    Ok(())
}

async fn handle_integrity(config: &MigrationConfig, args: ReportArgs) -> Result<()> {
    let local = open_local(config)?;
    let remote = open_remote(config).await?;

    let result = IntegrityValidator::new(&local, &remote)
        .validate_migration_integrity()
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", integrity_table(&result));
        println!("Integrity score: {}%", result.summary.integrity_score);
    }

    if let Some(output) = args.output.as_deref() {
        emit_report(&generate_integrity_report(&result), Some(output))?;
    }

    if !result.success {
        bail!("integrity validation found {} errors", result.errors.len());
    }
    Ok(())
}

async fn handle_rollback(config: &MigrationConfig, args: RollbackArgs) -> Result<()> {
    let backup = load_backup(&args.backup)
        .with_context(|| format!("failed to read backup {}", args.backup.display()))?;
    let local = open_local(config)?;
    let remote = open_remote(config).await?;

    let result = RollbackEngine::with_options(&local, &remote, config.rollback_options())
        .execute_rollback(&backup, args.reason.as_deref())
        .await;

    if args.report.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", rollback_table(&result));
    }

    match args.report.output.as_deref() {
        Some(output) => emit_report(&generate_rollback_report(&result), Some(output))?,
        None if !args.report.json => emit_report(&generate_rollback_report(&result), None)?,
        None => {}
    }

    if !result.success {
        bail!("rollback failed: {}", result.errors.join("; "));
    }
    Ok(())
}
