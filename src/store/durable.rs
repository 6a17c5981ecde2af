//! ACID-durable store backed by redb.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;
use crate::graph::{GraphSnapshot, GraphStats, TemporalGraph};
use crate::store::StoreResult;
use crate::workflow::archive::SessionArchive;
use crate::workflow::session::WorkflowSession;

/// Latest graph snapshot, JSON-encoded under [`SNAPSHOT_KEY`].
const GRAPH_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("graph");

/// Archived workflow sessions, JSON-encoded, keyed by session id.
const SESSION_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

const SNAPSHOT_KEY: &str = "snapshot";

type BlobTable = TableDefinition<'static, &'static str, &'static [u8]>;

fn redb_err<E: std::fmt::Display>(context: &'static str) -> impl Fn(E) -> StoreError {
    move |e| StoreError::Redb {
        message: format!("{context} failed: {e}"),
    }
}

/// ACID-durable store using redb.
///
/// All writes go through transactions. Reads use MVCC snapshots.
#[derive(Clone)]
pub struct DurableStore {
    db: Arc<Database>,
}

impl DurableStore {
    /// Open or create a durable store in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join("medgate.redb");
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;

        // Create both tables up front so readers never hit a missing table.
        let txn = db.begin_write().map_err(redb_err("begin_write"))?;
        txn.open_table(GRAPH_TABLE)
            .map_err(redb_err("open_table"))?;
        txn.open_table(SESSION_TABLE)
            .map_err(redb_err("open_table"))?;
        txn.commit().map_err(redb_err("commit"))?;

        Ok(Self { db: Arc::new(db) })
    }

    fn put(&self, table: BlobTable, key: &str, value: &[u8]) -> StoreResult<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(redb_err("begin_write"))?;
        {
            let mut table = txn
                .open_table(table)
                .map_err(redb_err("open_table"))?;
            table
                .insert(key, value)
                .map_err(redb_err("insert"))?;
        }
        txn.commit().map_err(redb_err("commit"))?;
        Ok(())
    }

    fn get(&self, table: BlobTable, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let txn = self
            .db
            .begin_read()
            .map_err(redb_err("begin_read"))?;
        let table = txn
            .open_table(table)
            .map_err(redb_err("open_table"))?;
        let result = table.get(key).map_err(redb_err("get"))?;
        Ok(result.map(|guard| guard.value().to_vec()))
    }

    /// Replace the stored graph snapshot in one transaction.
    pub fn save_graph_snapshot(&self, snapshot: &GraphSnapshot) -> StoreResult<()> {
        let bytes = serde_json::to_vec(snapshot).map_err(|e| StoreError::Serialization {
            message: format!("failed to encode graph snapshot: {e}"),
        })?;
        self.put(GRAPH_TABLE, SNAPSHOT_KEY, &bytes)?;
        tracing::info!(
            entities = snapshot.entities.len(),
            relations = snapshot.relations.len(),
            "store: graph snapshot committed"
        );
        Ok(())
    }

    /// Read the last committed graph snapshot, if any.
    pub fn load_graph_snapshot(&self) -> StoreResult<Option<GraphSnapshot>> {
        self.get(GRAPH_TABLE, SNAPSHOT_KEY)?
            .map(|bytes| {
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
                    message: format!("failed to decode graph snapshot: {e}"),
                })
            })
            .transpose()
    }

    /// Persist the graph's current state.
    pub fn save_graph(&self, graph: &TemporalGraph) -> StoreResult<GraphStats> {
        let snapshot = graph.export_snapshot();
        self.save_graph_snapshot(&snapshot)?;
        Ok(graph.stats())
    }

    /// Replace the graph's state with the persisted snapshot, if there is one.
    ///
    /// A snapshot the graph refuses leaves the graph unchanged.
    pub fn restore_graph(&self, graph: &TemporalGraph) -> crate::error::MedgateResult<Option<GraphStats>> {
        match self.load_graph_snapshot()? {
            Some(snapshot) => Ok(Some(graph.load_snapshot(snapshot)?)),
            None => Ok(None),
        }
    }

    /// Write (or overwrite) an archived session.
    pub fn put_session(&self, session: &WorkflowSession) -> StoreResult<()> {
        let bytes = serde_json::to_vec(session).map_err(|e| StoreError::Serialization {
            message: format!("failed to encode session {}: {e}", session.id),
        })?;
        self.put(SESSION_TABLE, &session.id.to_string(), &bytes)
    }

    /// Read one archived session.
    pub fn get_session(&self, id: &str) -> StoreResult<Option<WorkflowSession>> {
        self.get(SESSION_TABLE, id)?
            .map(|bytes| {
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
                    message: format!("failed to decode session {id}: {e}"),
                })
            })
            .transpose()
    }

    /// Read every archived session.
    pub fn all_sessions(&self) -> StoreResult<Vec<WorkflowSession>> {
        let txn = self
            .db
            .begin_read()
            .map_err(redb_err("begin_read"))?;
        let table = txn
            .open_table(SESSION_TABLE)
            .map_err(redb_err("open_table"))?;
        let mut sessions = Vec::new();
        for entry in table.iter().map_err(redb_err("iter"))? {
            let (key, value) = entry.map_err(redb_err("iter"))?;
            let session = serde_json::from_slice(value.value()).map_err(|e| {
                StoreError::Serialization {
                    message: format!("failed to decode session {}: {e}", key.value()),
                }
            })?;
            sessions.push(session);
        }
        Ok(sessions)
    }
}

impl SessionArchive for DurableStore {
    fn store_session(&self, session: &WorkflowSession) -> Result<(), StoreError> {
        self.put_session(session)
    }

    fn load_sessions(&self) -> Result<Vec<WorkflowSession>, StoreError> {
        self.all_sessions()
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphEntity, Properties, SNAPSHOT_VERSION};
    use tempfile::TempDir;

    fn snapshot(ids: &[&str]) -> GraphSnapshot {
        GraphSnapshot {
            version: SNAPSHOT_VERSION,
            entities: ids
                .iter()
                .map(|id| GraphEntity {
                    id: (*id).into(),
                    label: "Entity".into(),
                    properties: Properties::new(),
                })
                .collect(),
            relations: Vec::new(),
        }
    }

    #[test]
    fn empty_store_has_no_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        assert!(store.load_graph_snapshot().unwrap().is_none());
        assert!(store.all_sessions().unwrap().is_empty());
    }

    #[test]
    fn snapshot_replace() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();

        store.save_graph_snapshot(&snapshot(&["a"])).unwrap();
        store.save_graph_snapshot(&snapshot(&["a", "b"])).unwrap();
        assert_eq!(store.load_graph_snapshot().unwrap(), Some(snapshot(&["a", "b"])));
    }

    #[test]
    fn persistence_across_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let store = DurableStore::open(dir.path()).unwrap();
            store.save_graph_snapshot(&snapshot(&["kept"])).unwrap();
        }
        let store = DurableStore::open(dir.path()).unwrap();
        assert_eq!(store.load_graph_snapshot().unwrap(), Some(snapshot(&["kept"])));
    }

    #[test]
    fn graph_save_and_restore() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        let graph = TemporalGraph::new();
        graph.add_entity("patient-1", "Patient", Properties::new());
        graph.add_entity("drugX", "Drug", Properties::new());
        graph
            .add_relation("patient-1", "drugX", "TOOK", "2022-01-01".parse().unwrap(), None)
            .unwrap();
        store.save_graph(&graph).unwrap();

        let restored = TemporalGraph::new();
        let stats = store.restore_graph(&restored).unwrap().unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.edge_count, 1);
        assert_eq!(
            restored.query_active_at("patient-1", "2023-05-05".parse().unwrap()),
            graph.query_active_at("patient-1", "2023-05-05".parse().unwrap())
        );
    }

    #[test]
    fn session_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        let session = WorkflowSession::new("chest pain in a 60 year old", None);

        store.put_session(&session).unwrap();
        let loaded = store.get_session(&session.id.to_string()).unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.query, session.query);
        assert_eq!(store.all_sessions().unwrap().len(), 1);
        assert!(store.get_session("missing").unwrap().is_none());
    }
}
