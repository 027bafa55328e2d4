//! Neo4j storage backend (bolt protocol via neo4rs)
//!
//! Query text is assembled only from the `Label`, `RelType` and `Property`
//! enumerations; every value travels as a query parameter.

use super::traits::{GraphStore, MergeOutcome, NodeFilter, StorageError, StorageResult};
use crate::graph::{Label, NaturalKey, Node, NodeId, Properties, Property, PropertyValue, RelType};
use async_trait::async_trait;
use neo4rs::{query, BoltBoolean, BoltFloat, BoltInteger, BoltMap, BoltString, BoltType, ConfigBuilder, Graph, Query};

/// Neo4j-backed graph store. Sessions come from the driver's pool and are
/// returned to it when each call's stream is dropped.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    /// Connect to Neo4j with the given credentials.
    pub async fn connect(uri: &str, user: &str, password: &str) -> StorageResult<Self> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .fetch_size(500)
            .max_connections(10)
            .build()?;
        let graph = Graph::connect(config).await?;
        Ok(Self { graph })
    }

    fn to_bolt(value: &PropertyValue) -> BoltType {
        match value {
            PropertyValue::Bool(b) => BoltType::Boolean(BoltBoolean::new(*b)),
            PropertyValue::Int(i) => BoltType::Integer(BoltInteger::new(*i)),
            PropertyValue::Float(f) => BoltType::Float(BoltFloat::new(*f)),
            PropertyValue::String(s) => BoltType::String(BoltString::from(s.as_str())),
            PropertyValue::Array(items) => {
                BoltType::from(items.iter().map(Self::to_bolt).collect::<Vec<BoltType>>())
            }
        }
    }

    fn from_bolt(value: &BoltType) -> Option<PropertyValue> {
        match value {
            BoltType::Boolean(b) => Some(PropertyValue::Bool(b.value)),
            BoltType::Integer(i) => Some(PropertyValue::Int(i.value)),
            BoltType::Float(f) => Some(PropertyValue::Float(f.value)),
            BoltType::String(s) => Some(PropertyValue::String(s.value.clone())),
            BoltType::List(items) => Some(PropertyValue::Array(
                items.value.iter().filter_map(Self::from_bolt).collect(),
            )),
            _ => None,
        }
    }

    fn properties_map(properties: &Properties) -> BoltType {
        BoltType::Map(BoltMap::from_iter(
            properties
                .iter()
                .map(|(k, v)| (BoltString::from(k.as_str()), Self::to_bolt(v))),
        ))
    }

    fn row_to_node(row: &neo4rs::Row, label: Label) -> StorageResult<Node> {
        let uuid: String = row
            .get("uuid")
            .map_err(|e| StorageError::CorruptRow(e.to_string()))?;
        let props: BoltMap = row
            .get("props")
            .map_err(|e| StorageError::CorruptRow(e.to_string()))?;
        let id = NodeId::parse(&uuid).map_err(|e| StorageError::CorruptRow(e.to_string()))?;

        let properties = props
            .value
            .iter()
            .filter_map(|(k, v)| Self::from_bolt(v).map(|pv| (k.value.clone(), pv)))
            .collect();
        Ok(Node {
            id,
            label,
            properties,
        })
    }

    async fn collect_nodes(&self, q: Query, label: Label) -> StorageResult<Vec<Node>> {
        let mut stream = self.graph.execute(q).await?;
        let mut nodes = Vec::new();
        while let Some(row) = stream.next().await? {
            nodes.push(Self::row_to_node(&row, label)?);
        }
        Ok(nodes)
    }

    async fn single_count(&self, q: Query) -> StorageResult<u64> {
        let mut stream = self.graph.execute(q).await?;
        let count = match stream.next().await? {
            Some(row) => row.get::<i64>("count").unwrap_or(0),
            None => 0,
        };
        Ok(count as u64)
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn ensure_unique_constraint(&self, label: Label) -> StorageResult<()> {
        let cypher = format!(
            "CREATE CONSTRAINT {}UUID IF NOT EXISTS FOR (n:{}) REQUIRE n.uuid IS UNIQUE",
            label.as_str().to_lowercase(),
            label.as_str()
        );
        self.graph.run(query(&cypher)).await?;
        Ok(())
    }

    async fn ensure_index(&self, label: Label, properties: &[Property]) -> StorageResult<()> {
        if properties.is_empty() {
            return Ok(());
        }
        let name: Vec<&str> = properties.iter().map(|p| p.as_str()).collect();
        let columns: Vec<String> = properties
            .iter()
            .map(|p| format!("n.`{}`", p.as_str()))
            .collect();
        let cypher = format!(
            "CREATE INDEX {}_{} IF NOT EXISTS FOR (n:{}) ON ({})",
            label.as_str().to_lowercase(),
            name.join("_"),
            label.as_str(),
            columns.join(", ")
        );
        self.graph.run(query(&cypher)).await?;
        Ok(())
    }

    async fn merge_node(
        &self,
        key: &NaturalKey,
        extra: &Properties,
        new_id: NodeId,
    ) -> StorageResult<MergeOutcome> {
        let ordered = key.ordered().map_err(|p| {
            StorageError::Constraint(format!("{} key component '{}' missing or blank", key.label(), p))
        })?;

        let pattern: Vec<String> = ordered
            .iter()
            .enumerate()
            .map(|(i, (p, _))| format!("`{}`: $k{}", p.as_str(), i))
            .collect();
        // The fresh identifier only survives on the create path, so reading
        // it back tells us which branch MERGE took.
        let cypher = format!(
            "MERGE (n:{label} {{{pattern}}})
             ON CREATE SET n += $extra, n.uuid = $uuid, n.created_at = $created_at
             ON MATCH SET n += $extra
             RETURN n.uuid AS uuid",
            label = key.label().as_str(),
            pattern = pattern.join(", "),
        );

        let mut q = query(&cypher)
            .param("extra", Self::properties_map(extra))
            .param("uuid", new_id.to_string())
            .param("created_at", chrono::Utc::now().to_rfc3339());
        for (i, (_, value)) in ordered.iter().enumerate() {
            q = q.param(&format!("k{}", i), Self::to_bolt(value));
        }

        let mut stream = self.graph.execute(q).await?;
        let row = stream
            .next()
            .await?
            .ok_or_else(|| StorageError::CorruptRow(format!("MERGE on {} returned no row", key)))?;
        let uuid: String = row
            .get("uuid")
            .map_err(|e| StorageError::CorruptRow(e.to_string()))?;
        let id = NodeId::parse(&uuid).map_err(|e| StorageError::CorruptRow(e.to_string()))?;

        Ok(MergeOutcome {
            id,
            created: id == new_id,
        })
    }

    async fn merge_edge(&self, rel: RelType, from: NodeId, to: NodeId) -> StorageResult<bool> {
        let cypher = format!(
            "MATCH (a {{uuid: $from}}), (b {{uuid: $to}})
             OPTIONAL MATCH (a)-[existing:{rel}]->(b)
             WITH a, b, existing IS NULL AS created
             MERGE (a)-[:{rel}]->(b)
             RETURN created",
            rel = rel.as_str(),
        );
        let q = query(&cypher)
            .param("from", from.to_string())
            .param("to", to.to_string());

        let mut stream = self.graph.execute(q).await?;
        match stream.next().await? {
            Some(row) => Ok(row.get::<bool>("created").unwrap_or(false)),
            None => Err(StorageError::Constraint(format!(
                "cannot link {} -[:{}]-> {}: endpoint missing",
                from, rel, to
            ))),
        }
    }

    async fn load_node(&self, id: NodeId) -> StorageResult<Option<Node>> {
        let q = query("MATCH (n {uuid: $uuid}) RETURN n.uuid AS uuid, labels(n) AS labels, properties(n) AS props LIMIT 1")
            .param("uuid", id.to_string());
        let mut stream = self.graph.execute(q).await?;
        let Some(row) = stream.next().await? else {
            return Ok(None);
        };
        let labels: Vec<String> = row
            .get("labels")
            .map_err(|e| StorageError::CorruptRow(e.to_string()))?;
        let label = labels
            .iter()
            .find_map(|l| l.parse::<Label>().ok())
            .ok_or_else(|| StorageError::CorruptRow(format!("node {} has no known label", id)))?;
        Ok(Some(Self::row_to_node(&row, label)?))
    }

    async fn find_nodes(
        &self,
        label: Label,
        filter: &NodeFilter,
        limit: usize,
    ) -> StorageResult<Vec<Node>> {
        let conditions: Vec<String> = filter
            .equals
            .iter()
            .enumerate()
            .map(|(i, (p, _))| format!("n.`{}` = $f{}", p.as_str(), i))
            .collect();
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let cypher = format!(
            "MATCH (n:{label}) {where_clause}
             RETURN n.uuid AS uuid, properties(n) AS props
             ORDER BY n.uuid LIMIT $limit",
            label = label.as_str(),
        );

        let mut q = query(&cypher).param("limit", limit as i64);
        for (i, (_, value)) in filter.equals.iter().enumerate() {
            q = q.param(&format!("f{}", i), Self::to_bolt(value));
        }
        self.collect_nodes(q, label).await
    }

    async fn scan_nodes(
        &self,
        label: Label,
        after: Option<NodeId>,
        limit: usize,
    ) -> StorageResult<Vec<Node>> {
        let cypher = format!(
            "MATCH (n:{}) WHERE n.uuid > $after
             RETURN n.uuid AS uuid, properties(n) AS props
             ORDER BY n.uuid LIMIT $limit",
            label.as_str()
        );
        let q = query(&cypher)
            .param("after", after.map(|id| id.to_string()).unwrap_or_default())
            .param("limit", limit as i64);
        self.collect_nodes(q, label).await
    }

    async fn edges_from(&self, id: NodeId, rel: RelType) -> StorageResult<Vec<NodeId>> {
        let cypher = format!(
            "MATCH (a {{uuid: $uuid}})-[:{}]->(b) RETURN b.uuid AS uuid ORDER BY b.uuid",
            rel.as_str()
        );
        let mut stream = self
            .graph
            .execute(query(&cypher).param("uuid", id.to_string()))
            .await?;

        let mut targets = Vec::new();
        while let Some(row) = stream.next().await? {
            let uuid: String = row
                .get("uuid")
                .map_err(|e| StorageError::CorruptRow(e.to_string()))?;
            targets.push(NodeId::parse(&uuid).map_err(|e| StorageError::CorruptRow(e.to_string()))?);
        }
        Ok(targets)
    }

    async fn count_nodes(&self, label: Label) -> StorageResult<u64> {
        let cypher = format!("MATCH (n:{}) RETURN count(n) AS count", label.as_str());
        self.single_count(query(&cypher)).await
    }

    async fn count_edges(&self, rel: RelType) -> StorageResult<u64> {
        let cypher = format!("MATCH ()-[r:{}]->() RETURN count(r) AS count", rel.as_str());
        self.single_count(query(&cypher)).await
    }
}
