mod common;

use anyhow::Result;
use common::{
    fixture_entities, local_with, migrated_remote, records, seeded_local, FailingKeyValueStore,
    Op, RecordingStore, FIXTURE_RECORDS,
};
use engflow_core::{
    entities::Entity,
    integrity::{
        generate_integrity_report, CheckStatus, ForeignKeyValidation, IntegrityValidator,
        ValidationResult,
    },
    store::MemoryTabularStore,
};
use serde_json::json;

fn relationship(result: &ValidationResult, child: Entity) -> &ForeignKeyValidation {
    result
        .foreign_key_validations
        .iter()
        .find(|validation| validation.child == child)
        .expect("relationship present")
}

/// Copies the fixture into a remote store without any foreign-key checks so
/// individual rows can be broken.
fn unchecked_remote(entries: &[(Entity, serde_json::Value)]) -> Result<MemoryTabularStore> {
    let remote = MemoryTabularStore::new();
    for (entity, value) in entries {
        remote.seed_unchecked(*entity, records(value.clone()))?;
    }
    Ok(remote)
}

#[tokio::test]
async fn clean_migration_scores_one_hundred() -> Result<()> {
    let local = seeded_local();
    let remote = migrated_remote(&local).await?;

    let result = IntegrityValidator::new(&local, &remote)
        .validate_migration_integrity()
        .await;

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.validations.len(), 8);
    assert_eq!(result.foreign_key_validations.len(), 6);
    assert_eq!(result.data_integrity_checks.len(), 3);
    assert_eq!(result.summary.integrity_score, 100);
    assert!(result.summary.matching_counts);
    assert_eq!(result.summary.total_local_records, FIXTURE_RECORDS);
    assert_eq!(result.summary.total_supabase_records, FIXTURE_RECORDS);

    let despesas = relationship(&result, Entity::Despesas);
    assert_eq!(despesas.relationship, "despesas → obras/clientes");
    assert_eq!(despesas.checked_references, 2);
    assert_eq!(despesas.broken_references, 0);
    Ok(())
}

#[tokio::test]
async fn orphaned_project_is_reported() -> Result<()> {
    let local = seeded_local();
    let mut entries = fixture_entities();
    entries[4].1[0]["cliente_id"] = json!("cli-inexistente");
    let remote = unchecked_remote(&entries)?;

    let result = IntegrityValidator::new(&local, &remote)
        .validate_migration_integrity()
        .await;

    let obras = relationship(&result, Entity::Obras);
    assert!(obras.broken_references >= 1);
    assert_eq!(obras.status, CheckStatus::Error);
    assert!(!result.success);
    assert!(result.summary.integrity_score < 100);
    Ok(())
}

#[tokio::test]
async fn lost_and_extra_records_are_classified() -> Result<()> {
    let local = seeded_local();
    let mut entries = fixture_entities();
    entries[0].1 = json!([{"id": "cli-1", "nome": "Construtora Alfa"}]);
    entries[1].1 = json!([{"id": "set-1", "nome": "Campo"}, {"id": "set-2", "nome": "Escritório"}]);
    let remote = unchecked_remote(&entries)?;

    let result = IntegrityValidator::new(&local, &remote)
        .validate_migration_integrity()
        .await;

    let clientes = &result.validations[0];
    assert_eq!(clientes.status, CheckStatus::Error);
    assert!(clientes.message.contains("records lost"));
    let setores = &result.validations[1];
    assert_eq!(setores.status, CheckStatus::Warning);
    assert!(result.warnings.iter().any(|warning| warning.contains("extra remote records")));
    assert!(!result.summary.matching_counts);
    Ok(())
}

#[tokio::test]
async fn relationship_lookup_failure_marks_minus_one() -> Result<()> {
    let local = seeded_local();
    let remote = RecordingStore::new(migrated_remote(&local).await?)
        .failing(Op::SelectNotNull, Entity::Funcoes);

    let result = IntegrityValidator::new(&local, &remote)
        .validate_migration_integrity()
        .await;

    let funcoes = relationship(&result, Entity::Funcoes);
    assert_eq!(funcoes.broken_references, -1);
    assert_eq!(funcoes.status, CheckStatus::Error);
    assert_eq!(relationship(&result, Entity::Funcionarios).status, CheckStatus::Success);
    Ok(())
}

#[tokio::test]
async fn structural_problems_are_graded() -> Result<()> {
    let local = local_with(&[
        (
            Entity::Clientes,
            json!([{"id": "cli-1", "nome": ""}, {"id": "cli-2", "nome": "Beta"}]),
        ),
        (
            Entity::Despesas,
            json!([
                {"id": "desp-1", "valor": 10, "data": "1999-05-01"},
                {"id": "desp-2", "valor": -5, "data": "2024-05-01"},
                {"id": "desp-3", "data": "2024-05-02"}
            ]),
        ),
    ]);
    let remote = MemoryTabularStore::new();
    remote.seed_unchecked(
        Entity::Clientes,
        records(json!([{"id": "cli-1", "nome": ""}, {"id": "cli-2", "nome": "Beta"}])),
    )?;
    remote.seed_unchecked(
        Entity::Despesas,
        records(json!([
            {"id": "desp-1", "valor": 10, "data": "1999-05-01"},
            {"id": "desp-2", "valor": -5, "data": "2024-05-01"},
            {"id": "desp-3", "data": "2024-05-02"}
        ])),
    )?;

    let result = IntegrityValidator::new(&local, &remote)
        .validate_migration_integrity()
        .await;

    let [names, dates, values] = &result.data_integrity_checks[..] else {
        panic!("expected three structural checks");
    };
    assert_eq!(names.status, CheckStatus::Error);
    assert_eq!(names.violations, 1);
    assert_eq!(dates.status, CheckStatus::Warning);
    assert_eq!(dates.violations, 1);
    assert_eq!(values.status, CheckStatus::Warning);
    assert_eq!(values.violations, 2);

    assert!(!result.success);
    // 8 counts and 6 relationships pass, 3 structural checks fail.
    assert_eq!(result.summary.integrity_score, 82);
    Ok(())
}

#[tokio::test]
async fn repeated_integrity_validation_is_identical() -> Result<()> {
    let local = seeded_local();
    let mut entries = fixture_entities();
    entries[6].1[0]["obra_id"] = json!("obr-404");
    let remote = unchecked_remote(&entries)?;

    let validator = IntegrityValidator::new(&local, &remote);
    let first = validator.validate_migration_integrity().await;
    let second = validator.validate_migration_integrity().await;

    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn local_store_failure_zeroes_the_score() -> Result<()> {
    let local = FailingKeyValueStore::new(seeded_local()).failing_reads();
    let remote = MemoryTabularStore::new();

    let result = IntegrityValidator::new(&local, &remote)
        .validate_migration_integrity()
        .await;

    assert!(!result.success);
    assert_eq!(result.summary.integrity_score, 0);
    assert_eq!(result.errors.len(), 1);
    Ok(())
}

#[tokio::test]
async fn report_has_fixed_sections() -> Result<()> {
    let local = seeded_local();
    let remote = migrated_remote(&local).await?;
    let result = IntegrityValidator::new(&local, &remote)
        .validate_migration_integrity()
        .await;

    let report = generate_integrity_report(&result);

    assert!(report.starts_with("# Relatório de Integridade da Migração"));
    assert!(report.contains("## Resumo Geral"));
    assert!(report.contains("- Pontuação de integridade: 100%"));
    assert!(report.contains("- ✅ obras → clientes"));
    assert!(!report.contains("## ❌ Erros"));
    Ok(())
}
