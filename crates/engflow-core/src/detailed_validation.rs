//! Record-by-record, field-by-field comparison of the local store against
//! the remote store.
//!
//! Every entity is compared independently. Local records are ground truth:
//! records only present locally are *missing*, records only present remotely
//! are *extra*, and records present on both sides with a differing business
//! field are *modified*. Storage timestamps never count as a difference.
//!
//! A per-entity checksum over the normalized sequences (timestamps stripped,
//! sorted by id) is reported next to the per-record verdict as an
//! independent signal.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::checksum::checksum_json;
use crate::entities::Entity;
use crate::error::StoreError;
use crate::records::{
    is_timestamp_field, normalize_record, objects_only, record_id, values_equal, Record,
};
use crate::store::local::{load_entity, KeyValueStore};
use crate::store::remote::TabularStore;

const CRITICAL_DIFFERENCES_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonStatus {
    Success,
    Warning,
    Error,
}

impl ComparisonStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            ComparisonStatus::Success => "✅",
            ComparisonStatus::Warning => "⚠️",
            ComparisonStatus::Error => "❌",
        }
    }
}

/// One differing field. `None` means the field is absent on that side.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDifference {
    pub field: String,
    pub local_value: Option<Value>,
    pub supabase_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifiedRecord {
    pub id: String,
    pub local: Record,
    pub supabase: Record,
    pub differences: Vec<FieldDifference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumComparison {
    pub local: String,
    pub supabase: String,
    #[serde(rename = "match")]
    pub matches: bool,
}

impl ChecksumComparison {
    fn new(local: String, supabase: String) -> Self {
        let matches = local == supabase;
        Self {
            local,
            supabase,
            matches,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub entity_name: Entity,
    pub status: ComparisonStatus,
    pub local_records: usize,
    pub supabase_records: usize,
    pub matching_records: usize,
    pub missing_records: Vec<Record>,
    pub extra_records: Vec<Record>,
    pub modified_records: Vec<ModifiedRecord>,
    pub checksum: ChecksumComparison,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedSummary {
    pub total_local_records: usize,
    pub total_supabase_records: usize,
    pub total_matching_records: usize,
    pub accuracy_percentage: u32,
    pub global_checksum: ChecksumComparison,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedValidationResult {
    /// False only when the comparison itself could not run.
    pub success: bool,
    pub comparisons: Vec<ComparisonResult>,
    pub summary: DetailedSummary,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl DetailedValidationResult {
    fn failed(message: String) -> Self {
        Self {
            success: false,
            comparisons: Vec::new(),
            summary: DetailedSummary {
                total_local_records: 0,
                total_supabase_records: 0,
                total_matching_records: 0,
                accuracy_percentage: 0,
                global_checksum: ChecksumComparison::new(String::new(), String::new()),
            },
            errors: vec![message],
            warnings: Vec::new(),
        }
    }
}

pub struct DetailedValidator<'a, K: ?Sized, T: ?Sized> {
    local: &'a K,
    remote: &'a T,
}

impl<'a, K, T> DetailedValidator<'a, K, T>
where
    K: KeyValueStore + ?Sized,
    T: TabularStore + ?Sized,
{
    pub fn new(local: &'a K, remote: &'a T) -> Self {
        Self { local, remote }
    }

    /// Compares all entities. Per-entity problems land in the result; only a
    /// failure of the local store itself produces `success == false`.
    pub async fn perform_detailed_validation(&self) -> DetailedValidationResult {
        match self.compare_all().await {
            Ok(result) => {
                info!(
                    accuracy = result.summary.accuracy_percentage,
                    local = result.summary.total_local_records,
                    matching = result.summary.total_matching_records,
                    "detailed validation finished"
                );
                result
            }
            Err(err) => {
                error!(error = %err, "detailed validation aborted");
                DetailedValidationResult::failed(format!("Detailed validation failed: {err}"))
            }
        }
    }

    async fn compare_all(&self) -> Result<DetailedValidationResult, StoreError> {
        let mut comparisons = Vec::with_capacity(Entity::ALL.len());
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for entity in Entity::ALL {
            let (local, dropped) = objects_only(load_entity(self.local, entity)?);
            if dropped > 0 {
                warnings.push(format!(
                    "{entity}: {dropped} local entries are not objects and were ignored"
                ));
            }

            let remote = match self.remote.select_all(entity).await {
                Ok(records) => records,
                Err(err) => {
                    warn!(entity = %entity, error = %err, "remote read failed, comparing against empty set");
                    warnings.push(format!("{entity}: could not read remote records: {err}"));
                    Vec::new()
                }
            };

            let comparison = compare_records(entity, &local, &remote, &mut warnings)?;
            match comparison.status {
                ComparisonStatus::Error => errors.push(format!(
                    "{entity}: {} missing in Supabase, {} modified",
                    comparison.missing_records.len(),
                    comparison.modified_records.len()
                )),
                ComparisonStatus::Warning => warnings.push(format!(
                    "{entity}: {} extra records in Supabase",
                    comparison.extra_records.len()
                )),
                ComparisonStatus::Success if !comparison.checksum.matches => warnings.push(
                    format!("{entity}: records match but checksums differ"),
                ),
                ComparisonStatus::Success => {}
            }
            comparisons.push(comparison);
        }

        let summary = summarize(&comparisons)?;
        Ok(DetailedValidationResult {
            success: true,
            comparisons,
            summary,
            errors,
            warnings,
        })
    }
}

/// Classifies every record of one entity. Records without an id cannot be
/// paired and are reported through `warnings`.
pub fn compare_records(
    entity: Entity,
    local: &[Record],
    remote: &[Record],
    warnings: &mut Vec<String>,
) -> Result<ComparisonResult, StoreError> {
    let local_by_id = index_by_id(entity, "local", local, warnings);
    let remote_by_id = index_by_id(entity, "Supabase", remote, warnings);

    let mut matching_records = 0;
    let mut missing_records = Vec::new();
    let mut modified_records = Vec::new();

    for (id, local_record) in &local_by_id {
        match remote_by_id.get(id) {
            Some(remote_record) => {
                let differences = diff_records(local_record, remote_record);
                if differences.is_empty() {
                    matching_records += 1;
                } else {
                    modified_records.push(ModifiedRecord {
                        id: id.clone(),
                        local: (*local_record).clone(),
                        supabase: (*remote_record).clone(),
                        differences,
                    });
                }
            }
            None => missing_records.push((*local_record).clone()),
        }
    }

    let extra_records: Vec<Record> = remote_by_id
        .iter()
        .filter(|(id, _)| !local_by_id.contains_key(*id))
        .map(|(_, record)| (*record).clone())
        .collect();

    let status = if !missing_records.is_empty() || !modified_records.is_empty() {
        ComparisonStatus::Error
    } else if !extra_records.is_empty() {
        ComparisonStatus::Warning
    } else {
        ComparisonStatus::Success
    };

    Ok(ComparisonResult {
        entity_name: entity,
        status,
        local_records: local.len(),
        supabase_records: remote.len(),
        matching_records,
        missing_records,
        extra_records,
        modified_records,
        checksum: ChecksumComparison::new(
            normalized_checksum(local)?,
            normalized_checksum(remote)?,
        ),
    })
}

fn index_by_id<'r>(
    entity: Entity,
    side: &str,
    records: &'r [Record],
    warnings: &mut Vec<String>,
) -> BTreeMap<String, &'r Record> {
    let mut by_id = BTreeMap::new();
    let mut without_id = 0;
    for record in records {
        match record_id(record) {
            Some(id) => {
                by_id.insert(id, record);
            }
            None => without_id += 1,
        }
    }
    if without_id > 0 {
        warnings.push(format!(
            "{entity}: {without_id} {side} records have no id and were not compared"
        ));
    }
    by_id
}

/// Field-level differences over the union of both records' fields, storage
/// timestamps excluded. An absent field and an explicit `null` are the same.
pub fn diff_records(local: &Record, remote: &Record) -> Vec<FieldDifference> {
    let fields: BTreeSet<&String> = local
        .keys()
        .chain(remote.keys())
        .filter(|field| !is_timestamp_field(field))
        .collect();

    fields
        .into_iter()
        .filter_map(|field| {
            let local_value = local.get(field).filter(|value| !value.is_null());
            let remote_value = remote.get(field).filter(|value| !value.is_null());
            let same = match (local_value, remote_value) {
                (Some(a), Some(b)) => values_equal(a, b),
                (None, None) => true,
                _ => false,
            };
            (!same).then(|| FieldDifference {
                field: field.clone(),
                local_value: local_value.cloned(),
                supabase_value: remote_value.cloned(),
            })
        })
        .collect()
}

/// Checksum of the sequence with timestamps stripped, numbers normalized and
/// records sorted by id.
pub fn normalized_checksum(records: &[Record]) -> Result<String, StoreError> {
    let mut normalized: Vec<Record> = records.iter().map(normalize_record).collect();
    normalized.sort_by_key(record_id);
    Ok(checksum_json(&normalized)?)
}

fn summarize(comparisons: &[ComparisonResult]) -> Result<DetailedSummary, StoreError> {
    let total_local_records = comparisons.iter().map(|c| c.local_records).sum();
    let total_supabase_records = comparisons.iter().map(|c| c.supabase_records).sum();
    let total_matching_records = comparisons.iter().map(|c| c.matching_records).sum();

    let local_meta: Vec<Value> = comparisons
        .iter()
        .map(|c| json!({"entity": c.entity_name, "count": c.local_records, "checksum": c.checksum.local}))
        .collect();
    let remote_meta: Vec<Value> = comparisons
        .iter()
        .map(|c| json!({"entity": c.entity_name, "count": c.supabase_records, "checksum": c.checksum.supabase}))
        .collect();

    Ok(DetailedSummary {
        total_local_records,
        total_supabase_records,
        total_matching_records,
        accuracy_percentage: accuracy_percentage(total_matching_records, total_local_records),
        global_checksum: ChecksumComparison::new(
            checksum_json(&local_meta)?,
            checksum_json(&remote_meta)?,
        ),
    })
}

/// `round(100 * matching / local)`, 100 when there is nothing local.
/// Extra remote records do not lower the figure.
pub fn accuracy_percentage(matching: usize, local: usize) -> u32 {
    if local == 0 {
        return 100;
    }
    (100.0 * matching as f64 / local as f64).round() as u32
}

fn display_value(value: &Option<Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => "null".to_string(),
    }
}

/// Markdown report of a detailed validation run.
pub fn generate_differences_report(result: &DetailedValidationResult) -> String {
    let summary = &result.summary;
    let mut lines = vec![
        "# Relatório de Validação Detalhada".to_string(),
        String::new(),
        "## Resumo Geral".to_string(),
        String::new(),
        format!(
            "- Status: {}",
            if result.success { "✅ Concluída" } else { "❌ Falhou" }
        ),
        format!("- Registros locais: {}", summary.total_local_records),
        format!("- Registros no Supabase: {}", summary.total_supabase_records),
        format!("- Registros idênticos: {}", summary.total_matching_records),
        format!("- Precisão: {}%", summary.accuracy_percentage),
        format!(
            "- Checksum global: {} (local `{}` / Supabase `{}`)",
            if summary.global_checksum.matches { "✅" } else { "❌" },
            summary.global_checksum.local,
            summary.global_checksum.supabase
        ),
        String::new(),
        "## Detalhes por Entidade".to_string(),
    ];

    for comparison in &result.comparisons {
        lines.push(String::new());
        lines.push(format!(
            "### {} {}",
            comparison.status.icon(),
            comparison.entity_name
        ));
        lines.push(format!(
            "- Locais: {} | Supabase: {} | Idênticos: {}",
            comparison.local_records, comparison.supabase_records, comparison.matching_records
        ));
        lines.push(format!(
            "- Ausentes no Supabase: {}",
            comparison.missing_records.len()
        ));
        lines.push(format!(
            "- Extras no Supabase: {}",
            comparison.extra_records.len()
        ));
        lines.push(format!("- Modificados: {}", comparison.modified_records.len()));
        lines.push(format!(
            "- Checksum: {} (local `{}` / Supabase `{}`)",
            if comparison.checksum.matches { "✅" } else { "❌" },
            comparison.checksum.local,
            comparison.checksum.supabase
        ));
    }

    let differences: Vec<String> = result
        .comparisons
        .iter()
        .flat_map(|comparison| {
            comparison.modified_records.iter().flat_map(move |modified| {
                modified.differences.iter().map(move |difference| {
                    format!(
                        "- {}[{}].{}: \"{}\" → \"{}\"",
                        comparison.entity_name,
                        modified.id,
                        difference.field,
                        display_value(&difference.local_value),
                        display_value(&difference.supabase_value)
                    )
                })
            })
        })
        .collect();

    if !differences.is_empty() {
        lines.push(String::new());
        lines.push("## Diferenças Críticas".to_string());
        lines.push(String::new());
        lines.extend(differences.iter().take(CRITICAL_DIFFERENCES_LIMIT).cloned());
        if differences.len() > CRITICAL_DIFFERENCES_LIMIT {
            lines.push(format!(
                "- ... e mais {} diferenças",
                differences.len() - CRITICAL_DIFFERENCES_LIMIT
            ));
        }
    }

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

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn timestamps_never_count_as_differences() {
        let local = record(json!({"id": "c-1", "nome": "Alfa"}));
        let remote = record(json!({
            "id": "c-1",
            "nome": "Alfa",
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-02T10:00:00Z"
        }));
        assert!(diff_records(&local, &remote).is_empty());
    }

    #[test]
    fn absent_and_null_fields_are_equivalent() {
        let local = record(json!({"id": "c-1"}));
        let remote = record(json!({"id": "c-1", "telefone": null}));
        assert!(diff_records(&local, &remote).is_empty());
    }

    #[test]
    fn nested_objects_compare_structurally() {
        let local = record(json!({"id": "o-1", "endereco": {"cidade": "Recife", "uf": "PE"}}));
        let remote = record(json!({"id": "o-1", "endereco": {"uf": "PE", "cidade": "Olinda"}}));
        let differences = diff_records(&local, &remote);
        assert_eq!(differences.len(), 1);
        assert_eq!(differences[0].field, "endereco");
    }

    #[test]
    fn checksum_ignores_order_and_timestamps() {
        let local = vec![
            record(json!({"id": "b", "valor": 2})),
            record(json!({"id": "a", "valor": 1.0})),
        ];
        let remote = vec![
            record(json!({"id": "a", "valor": 1, "created_at": "2024-01-01T00:00:00Z"})),
            record(json!({"valor": 2.0, "id": "b", "updated_at": "2024-01-01T00:00:00Z"})),
        ];
        assert_eq!(
            normalized_checksum(&local).expect("checksum"),
            normalized_checksum(&remote).expect("checksum")
        );
    }

    #[test]
    fn large_integers_that_differ_are_reported() {
        let local = record(json!({"id": "d-1", "valor": 9_007_199_254_740_993_u64}));
        let remote = record(json!({"id": "d-1", "valor": 9_007_199_254_740_992_u64}));
        let differences = diff_records(&local, &remote);
        assert_eq!(differences.len(), 1);
        assert_eq!(differences[0].field, "valor");
    }

    #[test]
    fn accuracy_handles_empty_local_store() {
        assert_eq!(accuracy_percentage(0, 0), 100);
        assert_eq!(accuracy_percentage(1, 2), 50);
        assert_eq!(accuracy_percentage(2, 3), 67);
    }

    #[test]
    fn report_caps_critical_differences() {
        let local: Vec<Record> = (0..25)
            .map(|i| record(json!({"id": format!("c-{i:02}"), "nome": "local"})))
            .collect();
        let remote: Vec<Record> = (0..25)
            .map(|i| record(json!({"id": format!("c-{i:02}"), "nome": "remote"})))
            .collect();
        let mut warnings = Vec::new();
        let comparison =
            compare_records(Entity::Clientes, &local, &remote, &mut warnings).expect("compare");
        let summary = summarize(std::slice::from_ref(&comparison)).expect("summary");
        let result = DetailedValidationResult {
            success: true,
            comparisons: vec![comparison],
            summary,
            errors: vec!["clientes: 0 missing in Supabase, 25 modified".to_string()],
            warnings,
        };

        let report = generate_differences_report(&result);
        assert!(report.contains("# Relatório de Validação Detalhada"));
        assert!(report.contains("## Resumo Geral"));
        assert!(report.contains("clientes[c-00].nome: \"local\" → \"remote\""));
        assert!(!report.contains("clientes[c-20].nome"));
        assert!(report.contains("e mais 5 diferenças"));
        assert!(report.contains("## ❌ Erros"));
        assert!(!report.contains("## ⚠️ Avisos"));
    }
}
