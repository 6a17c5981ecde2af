//! Temporal knowledge graph: entities linked by relations with validity intervals.
//!
//! - **Engine** ([`TemporalGraph`]): petgraph-backed store with point-in-time queries
//! - **Snapshots** ([`GraphSnapshot`]): full-state export/load and crash-safe file writes
//!
//! A relation is *active* on a date `d` when `start <= d <= end`, where an open
//! end means "still active". Overlapping intervals between the same pair of
//! entities are kept as separate relations and are all active when `d` falls
//! in each of them.

pub mod snapshot;
pub mod temporal;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use snapshot::{GraphSnapshot, SNAPSHOT_VERSION};
pub use temporal::TemporalGraph;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors from the temporal graph engine.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("unknown entity: \"{entity_id}\"")]
    #[diagnostic(
        code(medgate::graph::unknown_entity),
        help("Register both endpoints with `add_entity` before adding a relation between them.")
    )]
    UnknownEntity { entity_id: String },

    #[error("invalid interval for {relation_type}: end {end} is before start {start}")]
    #[diagnostic(
        code(medgate::graph::invalid_interval),
        help("A relation's end date must be on or after its start date. Omit the end for open intervals.")
    )]
    InvalidInterval {
        relation_type: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("invalid snapshot: {message}")]
    #[diagnostic(
        code(medgate::graph::invalid_snapshot),
        help(
            "The snapshot was rejected as a whole and the graph was left unchanged. \
             Check that it was produced by `export_snapshot` of a compatible version."
        )
    )]
    InvalidSnapshot { message: String },

    #[error("snapshot I/O failed for {path}: {source}")]
    #[diagnostic(
        code(medgate::graph::snapshot_io),
        help("Check that the target directory exists and is writable. The previous snapshot file is untouched.")
    )]
    SnapshotIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// Arbitrary entity/relation properties, ordered for stable comparison and export.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// A clinical entity node (patient, drug, condition, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEntity {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub properties: Properties,
}

/// A directed edge annotated with a validity interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalRelation {
    pub source: String,
    pub target: String,
    pub relation_type: String,
    pub start: NaiveDate,
    /// `None` = still active.
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub properties: Properties,
}

impl TemporalRelation {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation_type: impl Into<String>,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation_type: relation_type.into(),
            start,
            end,
            properties: Properties::new(),
        }
    }

    /// Whether the interval contains `date` (inclusive on both ends).
    pub fn is_active_at(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end.unwrap_or(date)
    }

    /// Whether `entity_id` is one of the endpoints.
    pub fn touches(&self, entity_id: &str) -> bool {
        self.source == entity_id || self.target == entity_id
    }

    /// Check the `start <= end` invariant.
    pub fn validate_interval(&self) -> GraphResult<()> {
        match self.end {
            Some(end) if end < self.start => Err(GraphError::InvalidInterval {
                relation_type: self.relation_type.clone(),
                start: self.start,
                end,
            }),
            _ => Ok(()),
        }
    }
}

/// Which side of a relation the queried entity sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationDirection {
    Outgoing,
    Incoming,
}

/// An active relation with the counterpart entity resolved, for tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRelation {
    pub direction: RelationDirection,
    pub relation_type: String,
    pub counterpart_id: String,
    pub counterpart_label: String,
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

/// A batch of writes applied atomically by [`TemporalGraph::ingest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphBatch {
    #[serde(default)]
    pub entities: Vec<GraphEntity>,
    #[serde(default)]
    pub relations: Vec<TemporalRelation>,
}

/// Node and edge counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
}

impl std::fmt::Display for GraphStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} entities, {} relations", self.node_count, self.edge_count)
    }
}
