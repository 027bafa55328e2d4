//! SQLite storage backend for NeoBridge

use super::traits::{GraphStore, MergeOutcome, NodeFilter, OpenStore, StorageError, StorageResult};
use crate::graph::{Label, NaturalKey, Node, NodeId, Properties, Property, PropertyValue, RelType};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How long a writer waits on another process's lock before the call fails
/// as `Unavailable`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed graph store
///
/// Nodes live in one table keyed by `uuid`, with a UNIQUE index on
/// `(label, natural_key)` arbitrating concurrent creates. Edges are keyed
/// by `(rel, source_id, target_id)`, which gives them set semantics.
/// Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                uuid TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                natural_key TEXT NOT NULL,
                properties_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- One node per natural key per label
            CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_natural_key
                ON nodes(label, natural_key);
            CREATE INDEX IF NOT EXISTS idx_nodes_label
                ON nodes(label, uuid);

            CREATE TABLE IF NOT EXISTS edges (
                rel TEXT NOT NULL,
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (rel, source_id, target_id),
                FOREIGN KEY (source_id) REFERENCES nodes(uuid),
                FOREIGN KEY (target_id) REFERENCES nodes(uuid)
            );

            CREATE INDEX IF NOT EXISTS idx_edges_source
                ON edges(source_id, rel);
            CREATE INDEX IF NOT EXISTS idx_edges_target
                ON edges(target_id, rel);

            PRAGMA foreign_keys = ON;

            -- Concurrent readers while a writer holds the lock
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    /// SQL expression reading one property out of the JSON column.
    /// Property names come from the `Property` enumeration only.
    fn property_expr(property: Property) -> String {
        format!("json_extract(properties_json, '$.{}')", property.as_str())
    }

    fn to_sql_value(value: &PropertyValue) -> StorageResult<Value> {
        Ok(match value {
            PropertyValue::Bool(b) => Value::Integer(i64::from(*b)),
            PropertyValue::Int(i) => Value::Integer(*i),
            PropertyValue::Float(f) => Value::Real(*f),
            PropertyValue::String(s) => Value::Text(s.clone()),
            PropertyValue::Array(_) => Value::Text(serde_json::to_string(value)?),
        })
    }

    fn row_to_node(uuid: String, label: String, properties_json: String) -> StorageResult<Node> {
        let id = NodeId::parse(&uuid).map_err(|e| StorageError::CorruptRow(e.to_string()))?;
        let label = label.parse::<Label>().map_err(StorageError::CorruptRow)?;
        Ok(Node {
            id,
            label,
            properties: serde_json::from_str(&properties_json)?,
        })
    }

    fn query_nodes(
        conn: &Connection,
        sql: &str,
        values: Vec<Value>,
    ) -> StorageResult<Vec<Node>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let (uuid, label, properties) = row?;
            nodes.push(Self::row_to_node(uuid, label, properties)?);
        }
        Ok(nodes)
    }

    fn merge_node_sync(
        &self,
        key: &NaturalKey,
        extra: &Properties,
        new_id: NodeId,
    ) -> StorageResult<MergeOutcome> {
        let ordered = key.ordered().map_err(|p| {
            StorageError::Constraint(format!("{} key component '{}' missing or blank", key.label(), p))
        })?;
        let label = key.label().as_str();
        let canonical = key.canonical();

        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front, so the lookup and the
        // insert below cannot interleave with another writer.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT uuid, properties_json FROM nodes WHERE label = ?1 AND natural_key = ?2",
                params![label, canonical],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let outcome = match existing {
            Some((uuid, properties_json)) => {
                let mut properties: Properties = serde_json::from_str(&properties_json)?;
                let mut changed = false;
                for (name, value) in extra {
                    if properties.get(name) != Some(value) {
                        properties.insert(name.clone(), value.clone());
                        changed = true;
                    }
                }
                if changed {
                    tx.execute(
                        "UPDATE nodes SET properties_json = ?1 WHERE uuid = ?2",
                        params![serde_json::to_string(&properties)?, uuid],
                    )?;
                }
                let id = NodeId::parse(&uuid).map_err(|e| StorageError::CorruptRow(e.to_string()))?;
                MergeOutcome { id, created: false }
            }
            None => {
                let created_at = chrono::Utc::now().to_rfc3339();
                let mut properties = extra.clone();
                for (property, value) in ordered {
                    properties.insert(property.as_str().to_string(), value.clone());
                }
                properties.insert(Property::Uuid.as_str().to_string(), new_id.into());
                properties.insert(
                    Property::CreatedAt.as_str().to_string(),
                    PropertyValue::String(created_at.clone()),
                );
                tx.execute(
                    r#"
                    INSERT INTO nodes (uuid, label, natural_key, properties_json, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![
                        new_id.to_string(),
                        label,
                        canonical,
                        serde_json::to_string(&properties)?,
                        created_at,
                    ],
                )?;
                MergeOutcome { id: new_id, created: true }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl GraphStore for SqliteStore {
    async fn ensure_unique_constraint(&self, label: Label) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_{}_uuid ON nodes(uuid) WHERE label = '{}'",
                label.as_str().to_lowercase(),
                label.as_str()
            ),
            [],
        )?;
        Ok(())
    }

    async fn ensure_index(&self, label: Label, properties: &[Property]) -> StorageResult<()> {
        if properties.is_empty() {
            return Ok(());
        }
        let name: Vec<&str> = properties.iter().map(|p| p.as_str()).collect();
        let columns: Vec<String> = properties.iter().map(|p| Self::property_expr(*p)).collect();

        let conn = self.lock()?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_{} ON nodes({}) WHERE label = '{}'",
                label.as_str().to_lowercase(),
                name.join("_"),
                columns.join(", "),
                label.as_str()
            ),
            [],
        )?;
        Ok(())
    }

    async fn merge_node(
        &self,
        key: &NaturalKey,
        extra: &Properties,
        new_id: NodeId,
    ) -> StorageResult<MergeOutcome> {
        self.merge_node_sync(key, extra, new_id)
    }

    async fn merge_edge(&self, rel: RelType, from: NodeId, to: NodeId) -> StorageResult<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            r#"
            INSERT INTO edges (rel, source_id, target_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(rel, source_id, target_id) DO NOTHING
            "#,
            params![
                rel.as_str(),
                from.to_string(),
                to.to_string(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(rows > 0)
    }

    async fn load_node(&self, id: NodeId) -> StorageResult<Option<Node>> {
        let conn = self.lock()?;
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT uuid, label, properties_json FROM nodes WHERE uuid = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            Some((uuid, label, properties)) => Ok(Some(Self::row_to_node(uuid, label, properties)?)),
            None => Ok(None),
        }
    }

    async fn find_nodes(
        &self,
        label: Label,
        filter: &NodeFilter,
        limit: usize,
    ) -> StorageResult<Vec<Node>> {
        let mut sql = String::from("SELECT uuid, label, properties_json FROM nodes WHERE label = ?");
        let mut values = vec![Value::Text(label.as_str().to_string())];

        for (property, value) in &filter.equals {
            sql.push_str(&format!(" AND {} = ?", Self::property_expr(*property)));
            values.push(Self::to_sql_value(value)?);
        }
        sql.push_str(&format!(" ORDER BY uuid LIMIT {}", limit));

        let conn = self.lock()?;
        Self::query_nodes(&conn, &sql, values)
    }

    async fn scan_nodes(
        &self,
        label: Label,
        after: Option<NodeId>,
        limit: usize,
    ) -> StorageResult<Vec<Node>> {
        let after = after.map(|id| id.to_string()).unwrap_or_default();
        let conn = self.lock()?;
        Self::query_nodes(
            &conn,
            "SELECT uuid, label, properties_json FROM nodes
             WHERE label = ?1 AND uuid > ?2 ORDER BY uuid LIMIT ?3",
            vec![
                Value::Text(label.as_str().to_string()),
                Value::Text(after),
                Value::Integer(limit as i64),
            ],
        )
    }

    async fn edges_from(&self, id: NodeId, rel: RelType) -> StorageResult<Vec<NodeId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT target_id FROM edges WHERE source_id = ?1 AND rel = ?2 ORDER BY target_id",
        )?;
        let rows = stmt.query_map(params![id.to_string(), rel.as_str()], |row| row.get::<_, String>(0))?;

        let mut targets = Vec::new();
        for row in rows {
            let target = row?;
            targets.push(NodeId::parse(&target).map_err(|e| StorageError::CorruptRow(e.to_string()))?);
        }
        Ok(targets)
    }

    async fn count_nodes(&self, label: Label) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE label = ?1",
            params![label.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    async fn count_edges(&self, rel: RelType) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE rel = ?1",
            params![rel.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn lemma_key(text: &str) -> NaturalKey {
        NaturalKey::new(Label::Lemma)
            .with(Property::Text, text)
            .with(Property::Language, "en")
    }

    fn extra(pairs: &[(&str, PropertyValue)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_merge_creates_then_matches() {
        let store = create_test_store();
        let first = store
            .merge_node(&lemma_key("run"), &Properties::new(), NodeId::new())
            .await
            .unwrap();
        assert!(first.created);

        let second = store
            .merge_node(&lemma_key("run"), &Properties::new(), NodeId::new())
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(store.count_nodes(Label::Lemma).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_created_node_carries_key_and_identifier() {
        let store = create_test_store();
        let id = NodeId::new();
        store
            .merge_node(&lemma_key("walk"), &Properties::new(), id)
            .await
            .unwrap();

        let node = store.load_node(id).await.unwrap().unwrap();
        assert_eq!(node.label, Label::Lemma);
        assert_eq!(node.text(Property::Text), Some("walk"));
        assert_eq!(node.text(Property::Language), Some("en"));
        assert_eq!(node.text(Property::Uuid), Some(id.to_string().as_str()));
        assert!(node.get(Property::CreatedAt).is_some());
    }

    #[tokio::test]
    async fn test_merge_updates_extra_properties_without_deleting() {
        let store = create_test_store();
        let key = NaturalKey::new(Label::Place)
            .with(Property::Id, "E1")
            .with(Property::Toolchain, "tc");

        let created = store
            .merge_node(
                &key,
                &extra(&[("name", "Soho".into()), ("code", "E001".into())]),
                NodeId::new(),
            )
            .await
            .unwrap();
        store
            .merge_node(&key, &extra(&[("name", "SoHo".into())]), NodeId::new())
            .await
            .unwrap();

        let node = store.load_node(created.id).await.unwrap().unwrap();
        assert_eq!(node.text(Property::Name), Some("SoHo"));
        assert_eq!(node.text(Property::Code), Some("E001"));
        assert_eq!(
            node.text(Property::Uuid),
            Some(created.id.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_merge_rejects_incomplete_key() {
        let store = create_test_store();
        let key = NaturalKey::new(Label::Lemma).with(Property::Text, "run");
        let err = store
            .merge_node(&key, &Properties::new(), NodeId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_same_key_under_different_labels_is_distinct() {
        let store = create_test_store();
        let county = NaturalKey::new(Label::County)
            .with(Property::Name, "Kent")
            .with(Property::Set, "historic")
            .with(Property::Toolchain, "tc");
        let district = NaturalKey::new(Label::LocalAuthorityDistrict)
            .with(Property::Name, "Kent")
            .with(Property::Set, "historic")
            .with(Property::Toolchain, "tc");

        let a = store.merge_node(&county, &Properties::new(), NodeId::new()).await.unwrap();
        let b = store.merge_node(&district, &Properties::new(), NodeId::new()).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_merge_edge_is_set_semantics() {
        let store = create_test_store();
        let a = store.merge_node(&lemma_key("a"), &Properties::new(), NodeId::new()).await.unwrap().id;
        let b = store.merge_node(&lemma_key("b"), &Properties::new(), NodeId::new()).await.unwrap().id;

        assert!(store.merge_edge(RelType::Next, a, b).await.unwrap());
        assert!(!store.merge_edge(RelType::Next, a, b).await.unwrap());
        // Reverse direction and other types are distinct edges
        assert!(store.merge_edge(RelType::Next, b, a).await.unwrap());
        assert!(store.merge_edge(RelType::Is, a, b).await.unwrap());

        assert_eq!(store.count_edges(RelType::Next).await.unwrap(), 2);
        assert_eq!(store.edges_from(a, RelType::Next).await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn test_merge_edge_to_missing_node_is_constraint_violation() {
        let store = create_test_store();
        let a = store.merge_node(&lemma_key("a"), &Properties::new(), NodeId::new()).await.unwrap().id;
        let err = store.merge_edge(RelType::Is, a, NodeId::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_find_nodes_by_property() {
        let store = create_test_store();
        for (index, text) in ["The", "cat", "sat"].iter().enumerate() {
            let key = NaturalKey::new(Label::Token)
                .with(Property::Text, *text)
                .with(Property::Paragraph, 0i64)
                .with(Property::Index, index as i64)
                .with(Property::Norm, text.to_lowercase())
                .with(Property::Language, "en")
                .with(Property::Source, "src");
            store.merge_node(&key, &Properties::new(), NodeId::new()).await.unwrap();
        }

        let filter = NodeFilter::new()
            .with(Property::Source, "src")
            .with(Property::Paragraph, 0i64)
            .with(Property::Index, 1i64);
        let found = store.find_nodes(Label::Token, &filter, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text(Property::Text), Some("cat"));
    }

    #[tokio::test]
    async fn test_scan_nodes_pages_in_identifier_order() {
        let store = create_test_store();
        for i in 0..7 {
            store
                .merge_node(&lemma_key(&format!("w{}", i)), &Properties::new(), NodeId::new())
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut after = None;
        loop {
            let page = store.scan_nodes(Label::Lemma, after, 3).await.unwrap();
            if page.is_empty() {
                break;
            }
            after = page.last().map(|n| n.id);
            seen.extend(page.into_iter().map(|n| n.id));
        }
        assert_eq!(seen.len(), 7);
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
    }

    #[tokio::test]
    async fn test_constraint_and_index_declarations_are_idempotent() {
        let store = create_test_store();
        for _ in 0..2 {
            store.ensure_unique_constraint(Label::Place).await.unwrap();
            store.ensure_index(Label::Token, &[Property::Index, Property::Paragraph]).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.db");

        let id = {
            let store = SqliteStore::open(&path).unwrap();
            store.ensure_unique_constraint(Label::Lemma).await.unwrap();
            store.merge_node(&lemma_key("run"), &Properties::new(), NodeId::new()).await.unwrap().id
        };

        let store = SqliteStore::open(&path).unwrap();
        store.ensure_unique_constraint(Label::Lemma).await.unwrap();
        let again = store
            .merge_node(&lemma_key("run"), &Properties::new(), NodeId::new())
            .await
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.id, id);
    }
}
