//! End-to-end runs of the pipeline against the in-memory store.

mod helpers;

use helpers::{config, extractor, record, FlakyStore, SlowStore, StalledExtractor, TempSource};
use pharmagraph::driver::{GraphStore, Predicate};
use pharmagraph::edges::RelationshipType;
use pharmagraph::identity::{CanonicalId, Fingerprint, SourcePriorities};
use pharmagraph::nodes::{Label, Properties, PropertyValue};
use pharmagraph::source::{Checkpoint, Extractor, JsonLinesConfig, JsonLinesExtractor, SourceRecord};
use pharmagraph::transform::{PharmaTransformer, RecordKind};
use pharmagraph::{InMemoryGraphStore, Pipeline, PipelineConfig, RunStatus, Stage};
use serde_json::json;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn pipeline(config: PipelineConfig) -> Pipeline<PharmaTransformer> {
    Pipeline::new(config, PharmaTransformer::new()).expect("valid config")
}

fn compound(source: &str, id: &str, name: &str) -> SourceRecord {
    record(
        source,
        id,
        json!({"record_type": "compound", "chembl_id": id, "name": name, "molecular_weight": 180.16}),
    )
}

/// A document mentioning aspirin and published by Bayer, plus the compound itself.
fn small_corpus() -> Vec<SourceRecord> {
    vec![
        compound("chembl", "CHEMBL25", "Aspirin"),
        record(
            "fda",
            "label-1",
            json!({
                "record_type": "document",
                "file_path": "/labels/aspirin.pdf",
                "content_hash": "ABC123",
                "title": "Aspirin label",
                "company": "Bayer AG",
                "compounds": ["CHEMBL25"],
                "full_text": "Aspirin   is used to reduce fever."
            }),
        ),
        record(
            "ctgov",
            "NCT01234567",
            json!({
                "record_type": "clinical_trial",
                "nct_id": "nct01234567",
                "title": "Aspirin in secondary prevention",
                "phase": "Phase 3",
                "enrollment": 1200,
                "start_date": "2020-01-15",
                "completion_date": "2023-06-30",
                "sponsor": "Bayer AG",
                "compounds": [{"id": "CHEMBL25", "confidence": 0.9}]
            }),
        ),
    ]
}

fn document_id(path: &str, hash: &str) -> CanonicalId {
    CanonicalId::new(
        Label::Document,
        &Fingerprint::compute(Label::Document, &[path.to_string(), hash.to_string()]),
    )
}

// ---------------------------------------------------------------------------
// Idempotence and merging
// ---------------------------------------------------------------------------

/// Verify that a second run over the same input leaves node and relationship counts unchanged.
#[tokio::test]
async fn test_rerun_is_idempotent() {
    let store = InMemoryGraphStore::new();
    let pipeline = pipeline(config());

    let first = pipeline.run(&[extractor("mixed", small_corpus())], &store).await;
    assert_eq!(first.status, RunStatus::Completed, "{first}");
    assert_eq!(first.exit_code(), 0, "{first}");
    let nodes = store.count_nodes(None, &[]).await.expect("count");
    let rels = store.count_relationships(None).await.expect("count");

    let second = pipeline.run(&[extractor("mixed", small_corpus())], &store).await;
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(store.count_nodes(None, &[]).await.expect("count"), nodes);
    assert_eq!(store.count_relationships(None).await.expect("count"), rels);

    // Compound, document, trial and one shared organization.
    assert_eq!(nodes, 4);
    assert_eq!(store.count_nodes(Some(Label::Organization), &[]).await.expect("count"), 1);
    assert_eq!(
        store.count_relationships(Some(RelationshipType::Mentions)).await.expect("count"),
        1
    );
    assert_eq!(rels, 4);
}

#[tokio::test]
async fn test_two_sources_merge_into_one_document() {
    let store = InMemoryGraphStore::new();
    let mut cfg = config();
    cfg.source_priorities = SourcePriorities::new().with("A", 90).with("B", 10);
    let pipeline = pipeline(cfg);

    let doc = |source: &str, title: &str| {
        record(
            source,
            &format!("{source}-1"),
            json!({
                "record_type": "document",
                "file_path": "C:\\Labels\\ASA.pdf ",
                "content_hash": "f00d",
                "title": title
            }),
        )
    };
    let extractors: Vec<Box<dyn Extractor>> = vec![
        extractor("B", vec![doc("B", "asa label (scan)")]),
        extractor("A", vec![doc("A", "Acetylsalicylic Acid Label")]),
    ];

    let report = pipeline.run(&extractors, &store).await;
    assert!(report.is_completed(), "{report}");

    let id = document_id("c:/labels/asa.pdf", "f00d");
    assert!(id.to_string().starts_with("DOC-"));
    let stored = store.node(&id).expect("merged document stored");
    assert_eq!(store.count_nodes(Some(Label::Document), &[]).await.expect("count"), 1);
    assert_eq!(
        stored.get("title"),
        Some(&PropertyValue::from("Acetylsalicylic Acid Label"))
    );
    assert_eq!(
        stored.get("sources"),
        Some(&PropertyValue::from(vec!["A".to_string(), "B".to_string()]))
    );

    assert_eq!(report.merges.len(), 1);
    assert_eq!(report.merges[0].canonical_id, id);
    assert_eq!(report.merges[0].sources, vec!["A".to_string(), "B".to_string()]);
}

/// Verify that documents keyed under different path and title aliases still merge.
#[tokio::test]
async fn test_two_sources_with_field_aliases_merge() {
    let store = InMemoryGraphStore::new();
    let mut cfg = config();
    cfg.source_priorities = SourcePriorities::new().with("A", 90).with("B", 10);
    let extractors: Vec<Box<dyn Extractor>> = vec![
        extractor(
            "A",
            vec![record(
                "A",
                "a1",
                json!({"record_type": "document", "title": "Aspirin Tablet", "file": "/x/asa.pdf"}),
            )],
        ),
        extractor(
            "B",
            vec![record(
                "B",
                "b1",
                json!({"record_type": "document", "name": "ASPIRIN", "file_path": "/x/asa.pdf"}),
            )],
        ),
    ];

    let report = pipeline(cfg).run(&extractors, &store).await;

    assert_eq!(report.exit_code(), 0, "{report}");
    assert!(report.failed_records.is_empty());
    assert_eq!(store.count_nodes(Some(Label::Document), &[]).await.expect("count"), 1);

    let id = document_id("/x/asa.pdf", "");
    let stored = store.node(&id).expect("merged document stored");
    assert_eq!(stored.get("title"), Some(&PropertyValue::from("Aspirin Tablet")));
    assert_eq!(
        stored.get("sources"),
        Some(&PropertyValue::from(vec!["A".to_string(), "B".to_string()]))
    );
    assert_eq!(report.merges.len(), 1);
    assert_eq!(report.merges[0].merged_from, vec!["a1".to_string(), "b1".to_string()]);
}

/// Verify that a placeholder name never replaces a real one across runs.
#[tokio::test]
async fn test_set_if_better_across_runs() {
    let store = InMemoryGraphStore::new();
    let pipeline = pipeline(config());
    let id = {
        let mut key = Properties::new();
        key.insert("external_id".into(), PropertyValue::from("CHEMBL:CHEMBL1082"));
        CanonicalId::for_key(Label::Compound, &key)
    };

    for name in ["Unknown", "Amoxicillin", "Unknown"] {
        let report = pipeline
            .run(&[extractor("scraper", vec![compound("scraper", "CHEMBL1082", name)])], &store)
            .await;
        assert!(report.is_completed(), "{report}");
    }

    let stored = store.node(&id).expect("compound stored");
    assert_eq!(stored.get("name"), Some(&PropertyValue::from("Amoxicillin")));
    assert_eq!(store.node_count(), 1);
}

// ---------------------------------------------------------------------------
// Partial failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_one_invalid_node_out_of_hundred() {
    let store = InMemoryGraphStore::new();
    let mut records: Vec<SourceRecord> = (0..99)
        .map(|i| compound("chembl", &format!("CHEMBL{}", 1000 + i), &format!("Compound {i}")))
        .collect();
    records.push(record(
        "chembl",
        "CHEMBL9",
        json!({
            "record_type": "compound",
            "chembl_id": "CHEMBL9",
            "name": "Heavy",
            "molecular_weight": 9999.0,
            "targets": ["P23219"]
        }),
    ));

    let report = pipeline(config()).run(&[extractor("chembl", records)], &store).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.load.nodes_written, 99);
    assert_eq!(store.node_count(), 99);
    assert_eq!(store.relationship_count(), 0);
    assert_eq!(report.failed_records.len(), 1);
    let failures: Vec<_> = report.failures_in(Stage::Validating).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].origins, vec!["chembl:CHEMBL9".to_string()]);
    assert!(failures[0].error.contains("molecular_weight"));
    assert!(failures[0].error.contains("1 relationship(s) dropped"));
    assert_eq!(report.stats(Stage::Validating).skipped, 1);
}

#[tokio::test]
async fn test_malformed_and_untransformable_records_are_reported() {
    use pharmagraph::errors::ExtractionError;
    use pharmagraph::source::InMemoryExtractor;

    let store = InMemoryGraphStore::new();
    let source = InMemoryExtractor::new(
        "fda",
        vec![
            compound("fda", "CHEMBL25", "Aspirin"),
            record("fda", "no-kind", json!({"title": "orphan"})),
        ],
    )
    .with_error(ExtractionError::Malformed {
        record: "fda:dump.jsonl#3".into(),
        reason: "invalid JSON".into(),
    });

    let report = pipeline(config()).run(&[Box::new(source) as Box<dyn Extractor>], &store).await;

    assert!(report.is_completed(), "{report}");
    assert_eq!(report.failures_in(Stage::Extracting).count(), 1);
    assert_eq!(report.failures_in(Stage::Transforming).count(), 1);
    assert_eq!(report.stats(Stage::Extracting).processed, 3);
    assert_eq!(store.node_count(), 1);
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Verify that a batch is attempted exactly `max_retries + 1` times and the run still completes.
#[tokio::test]
async fn test_retry_bound_then_recorded_failure() {
    let store = FlakyStore::always_failing();
    let report = pipeline(config())
        .run(&[extractor("chembl", vec![compound("chembl", "CHEMBL25", "Aspirin")])], &store)
        .await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(store.attempts(), 3);
    assert_eq!(report.load.attempts, 3);
    let failures: Vec<_> = report.failures_in(Stage::Loading).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].error.contains("transient"));
    assert!(store.inner.is_closed());
}

#[tokio::test]
async fn test_transient_failure_recovers() {
    let store = FlakyStore::new(2);
    let report = pipeline(config())
        .run(&[extractor("chembl", vec![compound("chembl", "CHEMBL25", "Aspirin")])], &store)
        .await;

    assert_eq!(report.exit_code(), 0, "{report}");
    assert_eq!(store.inner.node_count(), 1);
    assert_eq!(report.load.attempts, 3);
}

// ---------------------------------------------------------------------------
// Run modes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_strict_mode_aborts_before_any_write() {
    let store = InMemoryGraphStore::new();
    let mut cfg = config();
    cfg.strict = true;
    let records = vec![
        compound("chembl", "CHEMBL25", "Aspirin"),
        record(
            "chembl",
            "CHEMBL9",
            json!({"record_type": "compound", "chembl_id": "CHEMBL9", "name": "Heavy", "molecular_weight": -1}),
        ),
    ];

    let report = pipeline(cfg).run(&[extractor("chembl", records)], &store).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.exit_code(), 2);
    assert!(report.cause.as_deref().unwrap_or_default().contains("failed validation"));
    assert_eq!(store.write_calls(), 0);
    assert!(store.is_closed());
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let store = InMemoryGraphStore::new();
    let mut cfg = config();
    cfg.dry_run = true;

    let report = pipeline(cfg).run(&[extractor("mixed", small_corpus())], &store).await;

    assert!(report.is_completed(), "{report}");
    assert!(report.dry_run);
    assert_eq!(store.write_calls(), 0);
    assert_eq!(store.pings(), 0);
    assert_eq!(report.load.planned_nodes.get(&Label::Compound), Some(&1));
    assert_eq!(report.load.planned_nodes.get(&Label::Organization), Some(&1));
    assert_eq!(
        report.load.planned_relationships.get(&RelationshipType::SponsoredBy),
        Some(&1)
    );
    assert!(report.to_string().contains("would write"));
}

#[tokio::test]
async fn test_cancellation_fails_the_run() {
    let store = InMemoryGraphStore::new();
    let pipeline = pipeline(config());
    pipeline.cancellation_token().cancel();

    let report = pipeline.run(&[extractor("mixed", small_corpus())], &store).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.cause.as_deref(), Some("cancelled"));
    assert_eq!(store.write_calls(), 0);
    assert!(store.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout() {
    let store = InMemoryGraphStore::new();
    let mut cfg = config();
    cfg.run_timeout_secs = Some(1);

    let extractors: Vec<Box<dyn Extractor>> = vec![Box::new(StalledExtractor)];
    let report = pipeline(cfg).run(&extractors, &store).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.cause.as_deref(), Some("run timed out"));
    assert!(store.is_closed());
}

#[tokio::test]
async fn test_run_timeout_lets_in_flight_batches_finish() {
    let store = SlowStore::new(std::time::Duration::from_secs(2));
    let mut cfg = config();
    cfg.run_timeout_secs = Some(1);
    let records: Vec<SourceRecord> = (0..12)
        .map(|i| compound("chembl", &format!("CHEMBL{}", 2000 + i), &format!("Compound {i}")))
        .collect();

    let report = pipeline(cfg).run(&[extractor("chembl", records)], &store).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.cause.as_deref(), Some("run timed out"));
    assert_eq!(report.load.nodes_written, 12);
    assert_eq!(store.inner.node_count(), 12);
    assert!(store.inner.is_closed());
}

#[tokio::test]
async fn test_unreadable_source_mid_stream_is_fatal() {
    use pharmagraph::errors::ExtractionError;
    use pharmagraph::source::InMemoryExtractor;

    let store = InMemoryGraphStore::new();
    let source = InMemoryExtractor::new("fda", vec![compound("fda", "CHEMBL25", "Aspirin")]).with_error(
        ExtractionError::Unreadable {
            source_name: "fda".into(),
            reason: "connection closed".into(),
        },
    );

    let report = pipeline(config()).run(&[Box::new(source) as Box<dyn Extractor>], &store).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.cause.as_deref().unwrap_or_default().contains("connection closed"));
    assert_eq!(store.write_calls(), 0);
}

// ---------------------------------------------------------------------------
// JSON-lines sources and checkpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_source_directory_fails_run() {
    let dir = TempSource::new();
    let source = JsonLinesExtractor::new(JsonLinesConfig::new("fda", dir.path.join("absent")));
    let store = InMemoryGraphStore::new();

    let report = pipeline(config()).run(&[Box::new(source) as Box<dyn Extractor>], &store).await;

    assert_eq!(report.status, RunStatus::Failed);
}

/// Verify that a resumed run skips every record the checkpoint marks as done,
/// and retries the one that failed validation.
#[tokio::test]
async fn test_checkpoint_resume_skips_completed_records() {
    let source = TempSource::new();
    source.write_jsonl(
        "targets.jsonl",
        &[
            json!({"id": "t1", "uniprot_id": "P23219", "name": "Prostaglandin G/H synthase 1"}),
            json!({"id": "t2", "uniprot_id": "P35354", "name": "Prostaglandin G/H synthase 2"}),
            json!({"id": "t3", "uniprot_id": "not-an-accession", "name": "Broken"}),
        ],
    );
    let checkpoint_path = source.path.join("state/checkpoint.json");

    let mut cfg = config();
    cfg.checkpoint_path = Some(checkpoint_path.clone());
    let pipeline = Pipeline::new(cfg, PharmaTransformer::new().with_default_kind("uniprot", RecordKind::Target))
        .expect("valid config");
    let open = || -> Vec<Box<dyn Extractor>> {
        vec![Box::new(JsonLinesExtractor::new(JsonLinesConfig::new("uniprot", source.path.clone())))]
    };
    let store = InMemoryGraphStore::new();

    let first = pipeline.run(&open(), &store).await;
    assert!(first.is_completed(), "{first}");
    assert_eq!(store.node_count(), 2);

    let checkpoint = Checkpoint::load(&checkpoint_path).expect("checkpoint written");
    assert_eq!(checkpoint.len(), 2);
    assert!(checkpoint.contains("uniprot:t1"));
    assert!(!checkpoint.contains("uniprot:t3"));
    assert_eq!(checkpoint.metadata.len(), 1);

    let second = pipeline.run(&open(), &store).await;
    assert_eq!(second.stats(Stage::Extracting).skipped, 2);
    assert_eq!(second.stats(Stage::Transforming).processed, 1);
    assert_eq!(second.failures_in(Stage::Validating).count(), 1);
    assert_eq!(store.node_count(), 2);
}

#[tokio::test]
async fn test_filtered_counts_through_store() {
    let store = InMemoryGraphStore::new();
    let report = pipeline(config()).run(&[extractor("mixed", small_corpus())], &store).await;
    assert!(report.is_completed(), "{report}");

    let phase3 = store
        .count_nodes(
            Some(Label::ClinicalTrial),
            &[Predicate::Eq("phase".into(), PropertyValue::from("Phase 3"))],
        )
        .await
        .expect("count");
    assert_eq!(phase3, 1);
}
