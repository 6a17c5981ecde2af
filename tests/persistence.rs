//! Persistence and recovery tests for the medgate engine.
//!
//! These verify that graph snapshots and archived workflow sessions survive
//! a close + reopen cycle of the durable store.

use std::sync::Arc;

use tokio_stream::StreamExt;

use medgate::config::EngineConfig;
use medgate::graph::{GraphSnapshot, Properties, TemporalGraph};
use medgate::provider::ScriptedGenerator;
use medgate::store::DurableStore;
use medgate::tool::ToolRegistry;
use medgate::workflow::{SessionArchive, SessionStatus, WorkflowEngine};

fn date(s: &str) -> chrono::NaiveDate {
    s.parse().unwrap()
}

fn sample_graph() -> TemporalGraph {
    let graph = TemporalGraph::new();
    graph.add_entity("patient-1", "Patient", Properties::new());
    graph.add_entity("warfarin", "Drug", Properties::new());
    graph.add_entity("aspirin", "Drug", Properties::new());
    graph
        .add_relation("patient-1", "warfarin", "TOOK", date("2021-03-01"), None)
        .unwrap();
    graph
        .add_relation("patient-1", "aspirin", "TOOK", date("2022-01-01"), Some(date("2022-02-01")))
        .unwrap();
    graph
        .add_relation("warfarin", "aspirin", "INTERACTS_WITH", date("2000-01-01"), None)
        .unwrap();
    graph
}

#[test]
fn graph_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let checkpoints = ["2021-06-01", "2022-01-15", "2022-02-01", "2022-02-02", "2020-01-01"];

    let expected: Vec<_> = {
        let store = DurableStore::open(dir.path()).unwrap();
        let graph = sample_graph();
        store.save_graph(&graph).unwrap();
        checkpoints
            .iter()
            .map(|d| graph.query_active_at("patient-1", date(d)))
            .collect()
    };

    let store = DurableStore::open(dir.path()).unwrap();
    let graph = TemporalGraph::new();
    let stats = store.restore_graph(&graph).unwrap().unwrap();
    assert_eq!(stats.node_count, 3);
    assert_eq!(stats.edge_count, 3);
    for (day, want) in checkpoints.iter().zip(&expected) {
        assert_eq!(&graph.query_active_at("patient-1", date(day)), want, "at {day}");
    }
}

#[test]
fn fresh_store_has_no_graph() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = DurableStore::open(dir.path()).unwrap();
    let graph = TemporalGraph::new();
    assert!(store.restore_graph(&graph).unwrap().is_none());
    assert_eq!(graph.stats().node_count, 0);
}

#[test]
fn snapshot_file_round_trip_is_query_equivalent() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("graph.json");
    let graph = sample_graph();
    graph.export_snapshot().write_file(&path).unwrap();

    let restored = TemporalGraph::from_snapshot(GraphSnapshot::read_file(&path).unwrap()).unwrap();
    assert_eq!(restored.stats(), graph.stats());
    for entity in ["patient-1", "warfarin", "aspirin"] {
        for d in ["2021-01-01", "2022-01-20", "2024-01-01"] {
            assert_eq!(
                restored.describe_active_at(entity, date(d)),
                graph.describe_active_at(entity, date(d))
            );
        }
    }
}

#[tokio::test]
async fn archived_sessions_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();

    let id = {
        let store = DurableStore::open(dir.path()).unwrap();
        let generator = Arc::new(ScriptedGenerator::new([
            r#"{"thought": "t", "final_answer": "hydrate"}"#,
            "Drink plenty of fluids.",
            r#"{"status": "approved", "confidence": 0.8, "flags": []}"#,
        ]));
        let engine = WorkflowEngine::new(
            EngineConfig::default(),
            generator,
            ToolRegistry::new(),
            Arc::new(TemporalGraph::new()),
        )
        .with_archive(Arc::new(store));
        let run = engine.run_workflow("How do I recover from a cold?", Some("general")).unwrap();
        let id = run.session_id();
        let _: Vec<_> = run.collect().await;
        id
    };

    let store = Arc::new(DurableStore::open(dir.path()).unwrap());
    let archived = store.load_sessions().unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].id, id);
    assert_eq!(archived[0].status, SessionStatus::Completed);

    // A fresh engine serves archived sessions through its listing APIs.
    let engine = WorkflowEngine::new(
        EngineConfig::default(),
        Arc::new(ScriptedGenerator::default()),
        ToolRegistry::new(),
        Arc::new(TemporalGraph::new()),
    )
    .with_archive(store);
    let listed = engine.list_workflows();
    assert_eq!(listed.len(), 1);
    let detail = engine.workflow_detail(id).unwrap();
    assert_eq!(detail.final_answer.as_deref(), Some("Drink plenty of fluids."));
    assert!(!detail.steps.is_empty());
}
