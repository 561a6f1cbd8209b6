//! Returns both stores to their pre-migration state from a backup artifact.
//!
//! A rollback is a fixed sequence of [`RollbackStep`]s. Each step is timed,
//! logged into [`RollbackResult::operations`] and answers with a
//! [`StepOutcome`]: `Continue` moves on to the next step, `Abort` ends the
//! pipeline. Effects of completed steps are never undone.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::backup::{BackupArtifact, BackupEngine, BackupOptions};
use crate::entities::Entity;
use crate::integrity::ValidationResult;
use crate::store::local::{load_entity, KeyValueStore};
use crate::store::remote::TabularStore;

pub const INVALID_BACKUP_ERROR: &str = "Rollback cancelled: invalid backup";

pub const DEFAULT_TABLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RollbackOptions {
    /// Pause between two remote table deletions.
    pub table_delay: Duration,
    pub backup: BackupOptions,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self {
            table_delay: DEFAULT_TABLE_DELAY,
            backup: BackupOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RollbackStep {
    ValidateBackup,
    CleanupRemote,
    VerifyCleanup,
    RestoreLocal,
    VerifyIntegrity,
}

impl RollbackStep {
    pub const SEQUENCE: [RollbackStep; 5] = [
        RollbackStep::ValidateBackup,
        RollbackStep::CleanupRemote,
        RollbackStep::VerifyCleanup,
        RollbackStep::RestoreLocal,
        RollbackStep::VerifyIntegrity,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RollbackStep::ValidateBackup => "Validar backup",
            RollbackStep::CleanupRemote => "Limpar Supabase",
            RollbackStep::VerifyCleanup => "Verificar limpeza",
            RollbackStep::RestoreLocal => "Restaurar armazenamento local",
            RollbackStep::VerifyIntegrity => "Verificar integridade final",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Warning,
    Error,
}

impl OperationStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            OperationStatus::Success => "✅",
            OperationStatus::Warning => "⚠️",
            OperationStatus::Error => "❌",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOperation {
    pub step: RollbackStep,
    pub name: String,
    pub status: OperationStatus,
    pub detail: String,
    /// Milliseconds.
    pub duration: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub supabase_records_removed: u64,
    pub local_storage_restored: bool,
    pub backup_validated: bool,
    /// Rows left after cleanup; an uncountable table counts as one.
    pub remaining_records: u64,
    /// Tables whose post-cleanup count could not be read.
    pub unverified_tables: Vec<Entity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackSummary {
    /// Milliseconds.
    pub total_duration: u64,
    pub completed_operations: usize,
    pub failed_operations: usize,
    pub data_integrity_maintained: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    pub success: bool,
    pub reason: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub operations: Vec<RollbackOperation>,
    pub cleanup: CleanupSummary,
    pub summary: RollbackSummary,
}

struct StepReport {
    status: OperationStatus,
    detail: String,
    outcome: StepOutcome,
}

impl StepReport {
    fn success(detail: String) -> Self {
        Self {
            status: OperationStatus::Success,
            detail,
            outcome: StepOutcome::Continue,
        }
    }

    fn warning(detail: String) -> Self {
        Self {
            status: OperationStatus::Warning,
            detail,
            outcome: StepOutcome::Continue,
        }
    }

    fn fatal(detail: String) -> Self {
        Self {
            status: OperationStatus::Error,
            detail,
            outcome: StepOutcome::Abort,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub struct RollbackEngine<'a, K: ?Sized, T: ?Sized> {
    local: &'a K,
    remote: &'a T,
    options: RollbackOptions,
}

impl<'a, K, T> RollbackEngine<'a, K, T>
where
    K: KeyValueStore + ?Sized,
    T: TabularStore + ?Sized,
{
    pub fn new(local: &'a K, remote: &'a T) -> Self {
        Self::with_options(local, remote, RollbackOptions::default())
    }

    pub fn with_options(local: &'a K, remote: &'a T, options: RollbackOptions) -> Self {
        Self {
            local,
            remote,
            options,
        }
    }

    pub async fn execute_rollback(
        &self,
        backup: &BackupArtifact,
        reason: Option<&str>,
    ) -> RollbackResult {
        let started = Instant::now();
        let mut result = RollbackResult {
            reason: reason.map(str::to_string),
            ..RollbackResult::default()
        };

        info!(reason = reason.unwrap_or("unspecified"), "rollback started");

        for step in RollbackStep::SEQUENCE {
            let step_started = Instant::now();
            let report = self.run_step(step, backup, &mut result).await;
            info!(step = step.label(), status = ?report.status, detail = %report.detail, "rollback step finished");
            result.operations.push(RollbackOperation {
                step,
                name: step.label().to_string(),
                status: report.status,
                detail: report.detail,
                duration: millis(step_started.elapsed()),
            });
            if report.outcome == StepOutcome::Abort {
                error!(step = step.label(), "rollback aborted");
                break;
            }
        }

        let failed_operations = result
            .operations
            .iter()
            .filter(|operation| operation.status == OperationStatus::Error)
            .count();
        result.success = result.errors.is_empty();
        result.summary.total_duration = millis(started.elapsed());
        result.summary.completed_operations = result.operations.len() - failed_operations;
        result.summary.failed_operations = failed_operations;

        info!(
            success = result.success,
            removed = result.cleanup.supabase_records_removed,
            duration_ms = result.summary.total_duration,
            "rollback finished"
        );
        result
    }

    /// Builds a reason from what triggered the rollback and runs it.
    pub async fn auto_rollback(
        &self,
        backup: &BackupArtifact,
        migration_errors: &[String],
        validation: Option<&ValidationResult>,
    ) -> RollbackResult {
        let reason = auto_rollback_reason(migration_errors, validation);
        warn!(reason = %reason, "automatic rollback triggered");
        self.execute_rollback(backup, Some(&reason)).await
    }

    async fn run_step(
        &self,
        step: RollbackStep,
        backup: &BackupArtifact,
        result: &mut RollbackResult,
    ) -> StepReport {
        match step {
            RollbackStep::ValidateBackup => self.validate_backup(backup, result),
            RollbackStep::CleanupRemote => self.cleanup_remote(result).await,
            RollbackStep::VerifyCleanup => self.verify_cleanup(result).await,
            RollbackStep::RestoreLocal => self.restore_local(backup, result),
            RollbackStep::VerifyIntegrity => self.verify_integrity(backup, result),
        }
    }

    /// Structure only; checksums are verified again by the restore.
    fn validate_backup(&self, backup: &BackupArtifact, result: &mut RollbackResult) -> StepReport {
        if !backup.has_required_sections() {
            result.errors.push(INVALID_BACKUP_ERROR.to_string());
            return StepReport::fatal("metadata, data or checksums missing".to_string());
        }
        result.cleanup.backup_validated = true;
        StepReport::success(format!("{} records in backup", backup.total_records()))
    }

    /// Deletes children before parents. A failing table is reported and the
    /// next one is attempted; only successful tables count as removed.
    async fn cleanup_remote(&self, result: &mut RollbackResult) -> StepReport {
        let mut failed = Vec::new();

        for (index, entity) in Entity::DELETION_ORDER.into_iter().enumerate() {
            if index > 0 && !self.options.table_delay.is_zero() {
                tokio::time::sleep(self.options.table_delay).await;
            }

            let existing = match self.remote.count(entity).await {
                Ok(count) => Some(count),
                Err(err) => {
                    warn!(entity = %entity, error = %err, "could not count rows before cleanup");
                    None
                }
            };

            match self.remote.delete_all(entity).await {
                Ok(deleted) => {
                    let removed = existing.unwrap_or(deleted);
                    result.cleanup.supabase_records_removed += removed;
                    info!(entity = %entity, removed, "remote table cleaned");
                }
                Err(err) => {
                    warn!(entity = %entity, error = %err, "remote cleanup failed");
                    result
                        .warnings
                        .push(format!("Failed to clean {entity}: {err}"));
                    failed.push(entity);
                }
            }
        }

        let removed = result.cleanup.supabase_records_removed;
        if failed.is_empty() {
            StepReport::success(format!("{removed} records removed"))
        } else {
            StepReport::warning(format!(
                "{removed} records removed; failed tables: {}",
                join_entities(&failed)
            ))
        }
    }

    async fn verify_cleanup(&self, result: &mut RollbackResult) -> StepReport {
        let mut remaining = 0u64;
        let mut unverified = Vec::new();

        for entity in Entity::DELETION_ORDER {
            match self.remote.count(entity).await {
                Ok(count) => remaining += count,
                Err(err) => {
                    warn!(entity = %entity, error = %err, "could not verify cleanup");
                    remaining += 1;
                    unverified.push(entity);
                }
            }
        }

        result.cleanup.remaining_records = remaining;
        result.cleanup.unverified_tables = unverified.clone();

        if remaining == 0 {
            return StepReport::success("remote store is empty".to_string());
        }

        result.warnings.push(format!(
            "Remote store not fully cleaned: {remaining} records remaining"
        ));
        if !unverified.is_empty() {
            result.warnings.push(format!(
                "Could not verify cleanup of: {}",
                join_entities(&unverified)
            ));
        }
        StepReport::warning(format!("{remaining} records remaining"))
    }

    fn restore_local(&self, backup: &BackupArtifact, result: &mut RollbackResult) -> StepReport {
        let engine = BackupEngine::with_options(self.local, self.options.backup.clone());
        match engine.restore_from_backup(backup) {
            Ok(()) => {
                result.cleanup.local_storage_restored = true;
                StepReport::success(format!("{} records restored", backup.total_records()))
            }
            Err(err) => {
                result
                    .errors
                    .push(format!("Local store restore failed: {err}"));
                StepReport::fatal(err.to_string())
            }
        }
    }

    /// Every entity of the backup must be back in the local store with the
    /// same number of records.
    fn verify_integrity(&self, backup: &BackupArtifact, result: &mut RollbackResult) -> StepReport {
        let Some(data) = backup.data.as_ref() else {
            result
                .errors
                .push("Integrity check failed: backup has no data".to_string());
            return StepReport::fatal("backup has no data".to_string());
        };

        let mut mismatches = Vec::new();
        for (entity, expected) in data {
            let present = match self.local.get(entity.storage_key()) {
                Ok(value) => value.is_some(),
                Err(err) => {
                    mismatches.push(format!("{entity}: {err}"));
                    continue;
                }
            };
            if !expected.is_empty() && !present {
                mismatches.push(format!("{entity}: missing from local store"));
                continue;
            }
            match load_entity(self.local, *entity) {
                Ok(actual) if actual.len() == expected.len() => {}
                Ok(actual) => mismatches.push(format!(
                    "{entity}: expected {} records, found {}",
                    expected.len(),
                    actual.len()
                )),
                Err(err) => mismatches.push(format!("{entity}: {err}")),
            }
        }

        if mismatches.is_empty() {
            result.summary.data_integrity_maintained = true;
            return StepReport::success(format!("{} entities verified", data.len()));
        }

        result.errors.extend(
            mismatches
                .iter()
                .map(|mismatch| format!("Integrity check failed for {mismatch}")),
        );
        StepReport::fatal(format!("{} entities mismatched", mismatches.len()))
    }
}

fn join_entities(entities: &[Entity]) -> String {
    entities
        .iter()
        .map(Entity::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn auto_rollback_reason(
    migration_errors: &[String],
    validation: Option<&ValidationResult>,
) -> String {
    let mut causes = Vec::new();
    if let Some(first) = migration_errors.first() {
        causes.push(format!(
            "{} migration errors (first: {first})",
            migration_errors.len()
        ));
    }
    if let Some(validation) = validation.filter(|validation| !validation.success) {
        causes.push(format!(
            "integrity validation failed with {} errors (score {}%)",
            validation.errors.len(),
            validation.summary.integrity_score
        ));
    }
    if causes.is_empty() {
        "Automatic rollback requested".to_string()
    } else {
        format!("Automatic rollback: {}", causes.join("; "))
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Sim"
    } else {
        "Não"
    }
}

/// Markdown report of a rollback run.
pub fn generate_rollback_report(result: &RollbackResult) -> String {
    let mut lines = vec![
        "# Relatório de Rollback".to_string(),
        String::new(),
        "## Resumo Geral".to_string(),
        String::new(),
        format!(
            "- Status: {}",
            if result.success { "✅ Rollback concluído" } else { "❌ Rollback falhou" }
        ),
        format!(
            "- Motivo: {}",
            result.reason.as_deref().unwrap_or("não informado")
        ),
        format!("- Duração total: {} ms", result.summary.total_duration),
        format!(
            "- Operações concluídas: {}",
            result.summary.completed_operations
        ),
        format!("- Operações com falha: {}", result.summary.failed_operations),
        format!(
            "- Integridade dos dados mantida: {}",
            yes_no(result.summary.data_integrity_maintained)
        ),
        String::new(),
        "## Limpeza".to_string(),
        String::new(),
        format!(
            "- Registros removidos do Supabase: {}",
            result.cleanup.supabase_records_removed
        ),
        format!("- Backup validado: {}", yes_no(result.cleanup.backup_validated)),
        format!(
            "- Armazenamento local restaurado: {}",
            yes_no(result.cleanup.local_storage_restored)
        ),
    ];

    if !result.cleanup.unverified_tables.is_empty() {
        lines.push(format!(
            "- Tabelas não verificadas: {}",
            join_entities(&result.cleanup.unverified_tables)
        ));
    }

    lines.push(String::new());
    lines.push("## Operações".to_string());
    lines.push(String::new());
    lines.extend(result.operations.iter().map(|operation| {
        format!(
            "- {} {} ({} ms): {}",
            operation.status.icon(),
            operation.name,
            operation.duration,
            operation.detail
        )
    }));

    if !result.errors.is_empty() {
        lines.push(String::new());
        lines.push("## ❌ Erros".to_string());
        lines.push(String::new());
        lines.extend(result.errors.iter().map(|error| format!("- {error}")));
    }

    if !result.warnings.is_empty() {
        lines.push(String::new());
        lines.push("## ⚠️ Avisos".to_string());
        lines.push(String::new());
        lines.extend(result.warnings.iter().map(|warning| format!("- {warning}")));
    }

    lines.push(String::new());
    lines.join("\n")
}
