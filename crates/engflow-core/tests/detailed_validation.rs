mod common;

use anyhow::Result;
use common::{
    local_with, migrated_remote, records, seeded_local, FailingKeyValueStore, Op, RecordingStore,
    FIXTURE_RECORDS,
};
use engflow_core::{
    detailed_validation::{generate_differences_report, ComparisonStatus, DetailedValidator},
    entities::Entity,
    store::MemoryTabularStore,
};
use serde_json::json;

#[tokio::test]
async fn faithful_migration_scores_full_accuracy() -> Result<()> {
    let local = seeded_local();
    let remote = migrated_remote(&local).await?;

    let result = DetailedValidator::new(&local, &remote)
        .perform_detailed_validation()
        .await;

    assert!(result.success);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.comparisons.len(), 8);
    for comparison in &result.comparisons {
        assert_eq!(comparison.status, ComparisonStatus::Success, "{}", comparison.entity_name);
        assert!(comparison.checksum.matches, "{}", comparison.entity_name);
    }
    assert_eq!(result.summary.total_local_records as u64, FIXTURE_RECORDS);
    assert_eq!(result.summary.total_matching_records as u64, FIXTURE_RECORDS);
    assert_eq!(result.summary.accuracy_percentage, 100);
    assert!(result.summary.global_checksum.matches);
    Ok(())
}

#[tokio::test]
async fn one_modified_record_of_two_scores_fifty() -> Result<()> {
    let client = json!({"id": "cli-1", "nome": "Construtora Alfa"});
    let local = local_with(&[
        (Entity::Clientes, json!([client.clone()])),
        (
            Entity::Despesas,
            json!([{"id": "desp-1", "descricao": "Cimento", "valor": 1500}]),
        ),
    ]);
    let remote = MemoryTabularStore::new();
    remote.seed_unchecked(Entity::Clientes, records(json!([client])))?;
    remote.seed_unchecked(
        Entity::Despesas,
        records(json!([{"id": "desp-1", "descricao": "Cimento", "valor": 1750}])),
    )?;

    let result = DetailedValidator::new(&local, &remote)
        .perform_detailed_validation()
        .await;

    assert_eq!(result.summary.accuracy_percentage, 50);
    let despesas = result
        .comparisons
        .iter()
        .find(|comparison| comparison.entity_name == Entity::Despesas)
        .expect("despesas comparison");
    assert_eq!(despesas.status, ComparisonStatus::Error);
    let modified = &despesas.modified_records[0];
    assert_eq!(modified.id, "desp-1");
    assert_eq!(modified.differences.len(), 1);
    assert_eq!(modified.differences[0].field, "valor");
    assert_eq!(modified.differences[0].local_value, Some(json!(1500)));
    assert_eq!(modified.differences[0].supabase_value, Some(json!(1750)));
    Ok(())
}

#[tokio::test]
async fn extra_and_missing_records_are_not_confused() -> Result<()> {
    let local = local_with(&[(
        Entity::Clientes,
        json!([{"id": "cli-a", "nome": "A"}, {"id": "cli-b", "nome": "B"}]),
    )]);
    let remote = MemoryTabularStore::new();
    remote.seed_unchecked(
        Entity::Clientes,
        records(json!([{"id": "cli-b", "nome": "B"}, {"id": "cli-c", "nome": "C"}])),
    )?;

    let result = DetailedValidator::new(&local, &remote)
        .perform_detailed_validation()
        .await;
    let clientes = &result.comparisons[0];

    assert_eq!(clientes.entity_name, Entity::Clientes);
    assert_eq!(clientes.missing_records.len(), 1);
    assert_eq!(clientes.missing_records[0]["id"], json!("cli-a"));
    assert_eq!(clientes.extra_records.len(), 1);
    assert_eq!(clientes.extra_records[0]["id"], json!("cli-c"));
    assert_eq!(clientes.matching_records, 1);
    assert_eq!(clientes.status, ComparisonStatus::Error);
    Ok(())
}

#[tokio::test]
async fn extra_records_alone_only_warn() -> Result<()> {
    let local = local_with(&[(Entity::Setores, json!([{"id": "set-1", "nome": "Campo"}]))]);
    let remote = MemoryTabularStore::new();
    remote.seed_unchecked(
        Entity::Setores,
        records(json!([{"id": "set-1", "nome": "Campo"}, {"id": "set-2", "nome": "Escritório"}])),
    )?;

    let result = DetailedValidator::new(&local, &remote)
        .perform_detailed_validation()
        .await;
    let setores = result
        .comparisons
        .iter()
        .find(|comparison| comparison.entity_name == Entity::Setores)
        .expect("setores comparison");

    assert_eq!(setores.status, ComparisonStatus::Warning);
    assert_eq!(result.summary.accuracy_percentage, 100);
    assert!(result.errors.is_empty());
    assert!(result.warnings.iter().any(|warning| warning.contains("extra")));
    Ok(())
}

#[tokio::test]
async fn repeated_validation_is_identical() -> Result<()> {
    let local = seeded_local();
    let remote = migrated_remote(&local).await?;
    remote.seed_unchecked(
        Entity::Clientes,
        records(json!([{"id": "cli-9", "nome": "Somente remoto"}])),
    )?;

    let validator = DetailedValidator::new(&local, &remote);
    let first = validator.perform_detailed_validation().await;
    let second = validator.perform_detailed_validation().await;

    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn remote_read_failure_becomes_a_warning() -> Result<()> {
    let local = seeded_local();
    let remote = RecordingStore::new(migrated_remote(&local).await?)
        .failing(Op::SelectAll, Entity::Videos);

    let result = DetailedValidator::new(&local, &remote)
        .perform_detailed_validation()
        .await;

    assert!(result.success);
    let videos = result
        .comparisons
        .iter()
        .find(|comparison| comparison.entity_name == Entity::Videos)
        .expect("videos comparison");
    assert_eq!(videos.supabase_records, 0);
    assert_eq!(videos.missing_records.len(), 1);
    assert!(result
        .warnings
        .iter()
        .any(|warning| warning.starts_with("videos: could not read remote records")));
    Ok(())
}

#[tokio::test]
async fn local_store_failure_is_catastrophic() -> Result<()> {
    let local = FailingKeyValueStore::new(seeded_local()).failing_reads();
    let remote = MemoryTabularStore::new();

    let result = DetailedValidator::new(&local, &remote)
        .perform_detailed_validation()
        .await;

    assert!(!result.success);
    assert_eq!(result.summary.accuracy_percentage, 0);
    assert_eq!(result.errors.len(), 1);
    assert!(result.comparisons.is_empty());
    Ok(())
}

#[tokio::test]
async fn report_lists_field_differences() -> Result<()> {
    let local = seeded_local();
    let remote = migrated_remote(&local).await?;
    let mut changed = remote.rows(Entity::Obras)[0].clone();
    changed.insert("nome".to_string(), json!("Edifício Norte"));
    remote.seed_unchecked(Entity::Obras, vec![changed])?;

    let result = DetailedValidator::new(&local, &remote)
        .perform_detailed_validation()
        .await;
    let report = generate_differences_report(&result);

    assert!(report.starts_with("# Relatório de Validação Detalhada"));
    assert!(report.contains("## Resumo Geral"));
    assert!(report.contains("## Detalhes por Entidade"));
    assert!(report.contains("## Diferenças Críticas"));
    assert!(report.contains("obras[obr-1].nome: \"Edifício Central\" → \"Edifício Norte\""));
    assert!(report.contains("### ❌ obras"));
    Ok(())
}
