//! Post-migration integrity checks against the remote store.
//!
//! Three independent phases each contribute scored units: one per entity
//! count, one per foreign-key relationship and one per structural check.
//! A failing unit is recorded and the next one runs.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::entities::{Entity, Relationship, RELATIONSHIPS};
use crate::error::StoreError;
use crate::records::{value_as_id, Record};
use crate::store::local::{load_entity, KeyValueStore};
use crate::store::remote::TabularStore;

pub const MIN_EXPENSE_YEAR: i32 = 2000;
pub const MAX_EXPENSE_YEAR: i32 = 2030;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Success,
    Warning,
    Error,
}

impl CheckStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            CheckStatus::Success => "✅",
            CheckStatus::Warning => "⚠️",
            CheckStatus::Error => "❌",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountValidation {
    pub entity: Entity,
    pub local_count: u64,
    /// `None` when the remote count could not be read.
    pub supabase_count: Option<u64>,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyValidation {
    pub relationship: String,
    pub child: Entity,
    pub checked_references: u64,
    /// `-1` when the relationship could not be checked at all.
    pub broken_references: i64,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataIntegrityCheck {
    pub check: String,
    pub entity: Entity,
    pub checked_records: u64,
    pub violations: u64,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegritySummary {
    pub total_local_records: u64,
    pub total_supabase_records: u64,
    pub matching_counts: bool,
    pub integrity_score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub success: bool,
    pub validations: Vec<CountValidation>,
    pub foreign_key_validations: Vec<ForeignKeyValidation>,
    pub data_integrity_checks: Vec<DataIntegrityCheck>,
    pub summary: IntegritySummary,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn failed(message: String) -> Self {
        Self {
            success: false,
            validations: Vec::new(),
            foreign_key_validations: Vec::new(),
            data_integrity_checks: Vec::new(),
            summary: IntegritySummary {
                total_local_records: 0,
                total_supabase_records: 0,
                matching_counts: false,
                integrity_score: 0,
            },
            errors: vec![message],
            warnings: Vec::new(),
        }
    }

    fn statuses(&self) -> impl Iterator<Item = CheckStatus> + '_ {
        self.validations
            .iter()
            .map(|v| v.status)
            .chain(self.foreign_key_validations.iter().map(|v| v.status))
            .chain(self.data_integrity_checks.iter().map(|c| c.status))
    }
}

#[derive(Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Findings {
    fn record(&mut self, status: CheckStatus, message: &str) {
        match status {
            CheckStatus::Success => {}
            CheckStatus::Warning => self.warnings.push(message.to_string()),
            CheckStatus::Error => self.errors.push(message.to_string()),
        }
    }
}

pub struct IntegrityValidator<'a, K: ?Sized, T: ?Sized> {
    local: &'a K,
    remote: &'a T,
}

impl<'a, K, T> IntegrityValidator<'a, K, T>
where
    K: KeyValueStore + ?Sized,
    T: TabularStore + ?Sized,
{
    pub fn new(local: &'a K, remote: &'a T) -> Self {
        Self { local, remote }
    }

    pub async fn validate_migration_integrity(&self) -> ValidationResult {
        match self.run().await {
            Ok(result) => {
                info!(
                    score = result.summary.integrity_score,
                    errors = result.errors.len(),
                    warnings = result.warnings.len(),
                    "integrity validation finished"
                );
                result
            }
            Err(err) => {
                error!(error = %err, "integrity validation aborted");
                ValidationResult::failed(format!("Integrity validation failed: {err}"))
            }
        }
    }

    async fn run(&self) -> Result<ValidationResult, StoreError> {
        let mut findings = Findings::default();

        let validations = self.validate_counts(&mut findings).await?;

        let mut foreign_key_validations = Vec::with_capacity(RELATIONSHIPS.len());
        for relationship in RELATIONSHIPS {
            let validation = self.validate_relationship(relationship).await;
            findings.record(validation.status, &validation.message);
            foreign_key_validations.push(validation);
        }

        let data_integrity_checks = self.structural_checks(&mut findings).await;

        let total_local_records = validations.iter().map(|v| v.local_count).sum();
        let total_supabase_records = validations.iter().filter_map(|v| v.supabase_count).sum();
        let matching_counts = validations
            .iter()
            .all(|v| v.supabase_count == Some(v.local_count));

        let mut result = ValidationResult {
            success: findings.errors.is_empty(),
            validations,
            foreign_key_validations,
            data_integrity_checks,
            summary: IntegritySummary {
                total_local_records,
                total_supabase_records,
                matching_counts,
                integrity_score: 0,
            },
            errors: findings.errors,
            warnings: findings.warnings,
        };
        result.summary.integrity_score = integrity_score(&result);
        Ok(result)
    }

    async fn validate_counts(
        &self,
        findings: &mut Findings,
    ) -> Result<Vec<CountValidation>, StoreError> {
        let mut validations = Vec::with_capacity(Entity::ALL.len());
        for entity in Entity::ALL {
            let local_count = load_entity(self.local, entity)?.len() as u64;
            let validation = match self.remote.count(entity).await {
                Ok(remote_count) => count_validation(entity, local_count, remote_count),
                Err(err) => {
                    warn!(entity = %entity, error = %err, "remote count failed");
                    CountValidation {
                        entity,
                        local_count,
                        supabase_count: None,
                        status: CheckStatus::Error,
                        message: format!("{entity}: could not count remote records: {err}"),
                    }
                }
            };
            findings.record(validation.status, &validation.message);
            validations.push(validation);
        }
        Ok(validations)
    }

    /// Every non-null reference of the relationship's child table must
    /// resolve to an existing parent row. Multi-column relationships sum
    /// their broken references.
    async fn validate_relationship(&self, relationship: &Relationship) -> ForeignKeyValidation {
        let label = relationship.label();
        match self.broken_references(relationship).await {
            Ok((checked, 0)) => ForeignKeyValidation {
                relationship: label.clone(),
                child: relationship.child,
                checked_references: checked,
                broken_references: 0,
                status: CheckStatus::Success,
                message: format!("{label}: {checked} references resolved"),
            },
            Ok((checked, broken)) => ForeignKeyValidation {
                relationship: label.clone(),
                child: relationship.child,
                checked_references: checked,
                broken_references: i64::try_from(broken).unwrap_or(i64::MAX),
                status: CheckStatus::Error,
                message: format!("{label}: {broken} broken references out of {checked}"),
            },
            Err(err) => {
                warn!(relationship = %label, error = %err, "foreign key lookup failed");
                ForeignKeyValidation {
                    relationship: label.clone(),
                    child: relationship.child,
                    checked_references: 0,
                    broken_references: -1,
                    status: CheckStatus::Error,
                    message: format!("{label}: could not verify references: {err}"),
                }
            }
        }
    }

    async fn broken_references(
        &self,
        relationship: &Relationship,
    ) -> Result<(u64, u64), StoreError> {
        let mut checked = 0u64;
        let mut broken = 0u64;
        let mut known: BTreeMap<(Entity, String), bool> = BTreeMap::new();

        for key in relationship.keys {
            let rows = self.remote.select_not_null(key.child, key.column).await?;
            for row in &rows {
                let Some(reference) = row.get(key.column) else {
                    continue;
                };
                if reference.is_null() {
                    continue;
                }
                checked += 1;
                let Some(parent_id) = value_as_id(reference) else {
                    broken += 1;
                    continue;
                };
                let cache_key = (key.parent, parent_id);
                let found = match known.get(&cache_key) {
                    Some(found) => *found,
                    None => {
                        let found = self.remote.exists(key.parent, &cache_key.1).await?;
                        known.insert(cache_key, found);
                        found
                    }
                };
                if !found {
                    broken += 1;
                }
            }
        }
        Ok((checked, broken))
    }

    async fn structural_checks(&self, findings: &mut Findings) -> Vec<DataIntegrityCheck> {
        let mut checks = Vec::with_capacity(3);

        let clients = self.remote.select_all(Entity::Clientes).await;
        checks.push(structural_check(
            "clientes com nome preenchido",
            Entity::Clientes,
            &clients,
            CheckStatus::Error,
            |record| !has_name(record),
        ));

        let expenses = self.remote.select_all(Entity::Despesas).await;
        checks.push(structural_check(
            "despesas com data válida",
            Entity::Despesas,
            &expenses,
            CheckStatus::Warning,
            |record| !expense_date_in_range(record.get("data")),
        ));
        checks.push(structural_check(
            "despesas com valor não negativo",
            Entity::Despesas,
            &expenses,
            CheckStatus::Warning,
            |record| !expense_value_valid(record.get("valor")),
        ));

        for check in &checks {
            findings.record(check.status, &check.message);
        }
        checks
    }
}

fn count_validation(entity: Entity, local_count: u64, remote_count: u64) -> CountValidation {
    let (status, message) = match local_count.cmp(&remote_count) {
        std::cmp::Ordering::Equal => (
            CheckStatus::Success,
            format!("{entity}: {local_count} records in both stores"),
        ),
        std::cmp::Ordering::Greater => (
            CheckStatus::Error,
            format!(
                "{entity}: {} records lost (local {local_count}, Supabase {remote_count})",
                local_count - remote_count
            ),
        ),
        std::cmp::Ordering::Less => (
            CheckStatus::Warning,
            format!(
                "{entity}: {} extra remote records (local {local_count}, Supabase {remote_count})",
                remote_count - local_count
            ),
        ),
    };
    CountValidation {
        entity,
        local_count,
        supabase_count: Some(remote_count),
        status,
        message,
    }
}

fn structural_check<F>(
    check: &str,
    entity: Entity,
    rows: &Result<Vec<Record>, StoreError>,
    severity: CheckStatus,
    violates: F,
) -> DataIntegrityCheck
where
    F: Fn(&Record) -> bool,
{
    let rows = match rows {
        Ok(rows) => rows,
        Err(err) => {
            warn!(entity = %entity, check, error = %err, "structural check could not read remote rows");
            return DataIntegrityCheck {
                check: check.to_string(),
                entity,
                checked_records: 0,
                violations: 0,
                status: CheckStatus::Error,
                message: format!("{check}: could not read {entity}: {err}"),
            };
        }
    };

    let violations = rows.iter().filter(|&record| violates(record)).count() as u64;
    let (status, message) = if violations == 0 {
        (CheckStatus::Success, format!("{check}: ok"))
    } else {
        (severity, format!("{check}: {violations} violations"))
    };
    DataIntegrityCheck {
        check: check.to_string(),
        entity,
        checked_records: rows.len() as u64,
        violations,
        status,
        message,
    }
}

fn has_name(record: &Record) -> bool {
    matches!(record.get("nome"), Some(Value::String(name)) if !name.trim().is_empty())
}

/// Year of an expense date: RFC 3339, `YYYY-MM-DD[ HH:MM:SS]` or epoch
/// milliseconds.
pub fn expense_year(value: &Value) -> Option<i32> {
    match value {
        Value::String(text) => {
            let text = text.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.year());
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
                    return Some(parsed.year());
                }
            }
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(|date| date.year())
        }
        Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|date| date.year()),
        _ => None,
    }
}

fn expense_date_in_range(value: Option<&Value>) -> bool {
    value
        .and_then(expense_year)
        .is_some_and(|year| (MIN_EXPENSE_YEAR..=MAX_EXPENSE_YEAR).contains(&year))
}

fn expense_value_valid(value: Option<&Value>) -> bool {
    let amount = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    amount.is_some_and(|amount| amount >= 0.0)
}

/// `round(100 * successful / total)` across every scored unit.
fn integrity_score(result: &ValidationResult) -> u32 {
    let (total, successful) = result.statuses().fold((0usize, 0usize), |(total, ok), status| {
        (total + 1, ok + usize::from(status == CheckStatus::Success))
    });
    if total == 0 {
        return 100;
    }
    (100.0 * successful as f64 / total as f64).round() as u32
}

/// Markdown report of an integrity validation run.
pub fn generate_integrity_report(result: &ValidationResult) -> String {
    let summary = &result.summary;
    let mut lines = vec![
        "# Relatório de Integridade da Migração".to_string(),
        String::new(),
        "## Resumo Geral".to_string(),
        String::new(),
        format!(
            "- Status: {}",
            if result.success { "✅ Íntegra" } else { "❌ Problemas encontrados" }
        ),
        format!("- Registros locais: {}", summary.total_local_records),
        format!("- Registros no Supabase: {}", summary.total_supabase_records),
        format!(
            "- Contagens conferem: {}",
            if summary.matching_counts { "Sim" } else { "Não" }
        ),
        format!("- Pontuação de integridade: {}%", summary.integrity_score),
        String::new(),
        "## Contagem por Entidade".to_string(),
        String::new(),
        "| Entidade | Local | Supabase | Status |".to_string(),
        "|---|---|---|---|".to_string(),
    ];

    lines.extend(result.validations.iter().map(|v| {
        format!(
            "| {} | {} | {} | {} |",
            v.entity,
            v.local_count,
            v.supabase_count
                .map_or_else(|| "?".to_string(), |count| count.to_string()),
            v.status.icon()
        )
    }));

    lines.push(String::new());
    lines.push("## Chaves Estrangeiras".to_string());
    lines.push(String::new());
    lines.extend(result.foreign_key_validations.iter().map(|v| {
        let broken = if v.broken_references < 0 {
            "não verificado".to_string()
        } else {
            format!("{} referências quebradas", v.broken_references)
        };
        format!(
            "- {} {}: {} ({} verificadas)",
            v.status.icon(),
            v.relationship,
            broken,
            v.checked_references
        )
    }));

    lines.push(String::new());
    lines.push("## Verificações de Dados".to_string());
    lines.push(String::new());
    lines.extend(result.data_integrity_checks.iter().map(|c| {
        format!(
            "- {} {}: {} violações em {} registros",
            c.status.icon(),
            c.check,
            c.violations,
            c.checked_records
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
