//! Point-in-time graph engine.
//!
//! All state (petgraph structure plus the id → node index) lives behind one
//! `RwLock`, so writers are serialized and readers always see a state that is
//! either before or after a complete ingestion, never in between.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::NaiveDate;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use super::snapshot::{GraphSnapshot, SNAPSHOT_VERSION};
use super::{
    ActiveRelation, GraphBatch, GraphEntity, GraphError, GraphResult, GraphStats, Properties,
    RelationDirection, TemporalRelation,
};

/// The graph structure guarded by [`TemporalGraph`]'s lock.
#[derive(Debug, Default)]
struct GraphState {
    graph: DiGraph<GraphEntity, TemporalRelation>,
    index: HashMap<String, NodeIndex>,
}

impl GraphState {
    /// Insert or replace an entity. Returns `true` if it was new.
    fn upsert_entity(&mut self, entity: GraphEntity) -> bool {
        match self.index.get(&entity.id) {
            Some(&idx) => {
                self.graph[idx] = entity;
                false
            }
            None => {
                let id = entity.id.clone();
                let idx = self.graph.add_node(entity);
                self.index.insert(id, idx);
                true
            }
        }
    }

    fn check_relation(&self, relation: &TemporalRelation, pending: &HashSet<&str>) -> GraphResult<()> {
        relation.validate_interval()?;
        for endpoint in [&relation.source, &relation.target] {
            if !self.index.contains_key(endpoint) && !pending.contains(endpoint.as_str()) {
                return Err(GraphError::UnknownEntity {
                    entity_id: endpoint.clone(),
                });
            }
        }
        Ok(())
    }

    /// Add an already-validated relation.
    fn push_relation(&mut self, relation: TemporalRelation) {
        let source = self.index[&relation.source];
        let target = self.index[&relation.target];
        self.graph.add_edge(source, target, relation);
    }

    fn active_at(&self, entity_id: &str, date: NaiveDate) -> Vec<TemporalRelation> {
        let Some(&idx) = self.index.get(entity_id) else {
            return Vec::new();
        };

        let outgoing = self.graph.edges_directed(idx, Direction::Outgoing);
        // Self-loops already appear in the outgoing pass.
        let incoming = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|e| e.source() != e.target());

        let mut active: Vec<TemporalRelation> = outgoing
            .chain(incoming)
            .map(|e| e.weight())
            .filter(|rel| rel.is_active_at(date))
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            (a.start, &a.relation_type, &a.source, &a.target, a.end)
                .cmp(&(b.start, &b.relation_type, &b.source, &b.target, b.end))
        });
        active
    }

    fn label_of(&self, entity_id: &str) -> String {
        self.index
            .get(entity_id)
            .map(|&idx| self.graph[idx].label.clone())
            .unwrap_or_else(|| entity_id.to_string())
    }

    fn to_snapshot(&self) -> GraphSnapshot {
        let mut entities: Vec<GraphEntity> = self.graph.node_weights().cloned().collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        GraphSnapshot {
            version: SNAPSHOT_VERSION,
            entities,
            relations: self.graph.edge_weights().cloned().collect(),
        }
    }

    /// Build a fresh state from a snapshot, rejecting it as a whole on any defect.
    fn from_snapshot(snapshot: GraphSnapshot) -> GraphResult<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(GraphError::InvalidSnapshot {
                message: format!(
                    "unsupported version {} (expected {SNAPSHOT_VERSION})",
                    snapshot.version
                ),
            });
        }

        let mut state = Self::default();
        for entity in snapshot.entities {
            let id = entity.id.clone();
            if !state.upsert_entity(entity) {
                return Err(GraphError::InvalidSnapshot {
                    message: format!("duplicate entity id \"{id}\""),
                });
            }
        }
        let none = HashSet::new();
        for relation in snapshot.relations {
            state
                .check_relation(&relation, &none)
                .map_err(|e| GraphError::InvalidSnapshot {
                    message: e.to_string(),
                })?;
            state.push_relation(relation);
        }
        Ok(state)
    }
}

/// Time-indexed entity/relation store shared read-mostly across sessions.
#[derive(Debug, Default)]
pub struct TemporalGraph {
    state: RwLock<GraphState>,
}

impl TemporalGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a snapshot.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> GraphResult<Self> {
        Ok(Self {
            state: RwLock::new(GraphState::from_snapshot(snapshot)?),
        })
    }

    /// Insert or replace an entity (idempotent upsert). Returns `true` if it was new.
    pub fn add_entity(
        &self,
        id: impl Into<String>,
        label: impl Into<String>,
        properties: Properties,
    ) -> bool {
        let entity = GraphEntity {
            id: id.into(),
            label: label.into(),
            properties,
        };
        let mut state = self.state.write().expect("graph lock poisoned");
        let created = state.upsert_entity(entity);
        tracing::debug!(created, "graph: entity upserted");
        created
    }

    /// Add a relation between two registered entities.
    pub fn add_relation(
        &self,
        source: &str,
        target: &str,
        relation_type: &str,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> GraphResult<()> {
        self.insert_relation(TemporalRelation::new(source, target, relation_type, start, end))
    }

    /// Add a fully specified relation (with properties).
    pub fn insert_relation(&self, relation: TemporalRelation) -> GraphResult<()> {
        let mut state = self.state.write().expect("graph lock poisoned");
        state.check_relation(&relation, &HashSet::new())?;
        state.push_relation(relation);
        Ok(())
    }

    /// Apply a batch of entities and relations atomically.
    ///
    /// Relations may reference entities introduced in the same batch. On any
    /// error nothing is applied.
    pub fn ingest(&self, batch: GraphBatch) -> GraphResult<GraphStats> {
        let mut state = self.state.write().expect("graph lock poisoned");
        {
            let pending: HashSet<&str> = batch.entities.iter().map(|e| e.id.as_str()).collect();
            for relation in &batch.relations {
                state.check_relation(relation, &pending)?;
            }
        }
        let (entities, relations) = (batch.entities.len(), batch.relations.len());
        for entity in batch.entities {
            state.upsert_entity(entity);
        }
        for relation in batch.relations {
            state.push_relation(relation);
        }
        tracing::info!(entities, relations, "graph: batch ingested");
        Ok(GraphStats {
            node_count: state.graph.node_count(),
            edge_count: state.graph.edge_count(),
        })
    }

    /// All relations touching `entity_id` that are active on `date`.
    ///
    /// An unknown entity yields an empty list.
    pub fn query_active_at(&self, entity_id: &str, date: NaiveDate) -> Vec<TemporalRelation> {
        let state = self.state.read().expect("graph lock poisoned");
        state.active_at(entity_id, date)
    }

    /// Active relations with direction and counterpart labels resolved.
    pub fn describe_active_at(&self, entity_id: &str, date: NaiveDate) -> Vec<ActiveRelation> {
        let state = self.state.read().expect("graph lock poisoned");
        state
            .active_at(entity_id, date)
            .into_iter()
            .map(|rel| {
                let (direction, counterpart) = if rel.source == entity_id {
                    (RelationDirection::Outgoing, rel.target.clone())
                } else {
                    (RelationDirection::Incoming, rel.source.clone())
                };
                ActiveRelation {
                    direction,
                    counterpart_label: state.label_of(&counterpart),
                    counterpart_id: counterpart,
                    relation_type: rel.relation_type,
                    start: rel.start,
                    end: rel.end,
                }
            })
            .collect()
    }

    /// Look up an entity by id.
    pub fn entity(&self, entity_id: &str) -> Option<GraphEntity> {
        let state = self.state.read().expect("graph lock poisoned");
        state
            .index
            .get(entity_id)
            .map(|&idx| state.graph[idx].clone())
    }

    /// Node and edge counts.
    pub fn stats(&self) -> GraphStats {
        let state = self.state.read().expect("graph lock poisoned");
        GraphStats {
            node_count: state.graph.node_count(),
            edge_count: state.graph.edge_count(),
        }
    }

    /// Export the full state.
    pub fn export_snapshot(&self) -> GraphSnapshot {
        let state = self.state.read().expect("graph lock poisoned");
        state.to_snapshot()
    }

    /// Replace the full state with a snapshot. All-or-nothing: on error the
    /// current state is untouched.
    pub fn load_snapshot(&self, snapshot: GraphSnapshot) -> GraphResult<GraphStats> {
        let fresh = GraphState::from_snapshot(snapshot)?;
        let stats = GraphStats {
            node_count: fresh.graph.node_count(),
            edge_count: fresh.graph.edge_count(),
        };
        *self.state.write().expect("graph lock poisoned") = fresh;
        tracing::info!(%stats, "graph: snapshot loaded");
        Ok(stats)
    }
}
