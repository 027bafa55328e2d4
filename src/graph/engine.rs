//! UpsertEngine: the identity and upsert layer every adapter writes through

use super::edge::Edge;
use super::node::{NaturalKey, NodeId, Properties};
use super::schema::{Label, Property, RelType};
use crate::storage::{GraphStore, StorageError, StorageResult};
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Number of in-process lock stripes serialising upserts per natural key
const LOCK_STRIPES: usize = 64;

/// Errors that can occur in NeoBridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A natural-key component is missing, blank, or not part of the label's key
    #[error("invalid natural key for {label}: property '{property}'")]
    InvalidKey { label: Label, property: Property },

    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Transient backend failure; retried before it surfaces
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for BridgeError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Unavailable(reason) => BridgeError::StoreUnavailable(reason),
            StorageError::Constraint(reason) => BridgeError::ConstraintViolation(reason),
            other => BridgeError::Storage(other),
        }
    }
}

impl BridgeError {
    /// True for errors that affect only the current record or document.
    pub fn is_record_scoped(&self) -> bool {
        matches!(
            self,
            BridgeError::InvalidKey { .. }
                | BridgeError::MissingColumn(_)
                | BridgeError::MalformedInput(_)
        )
    }
}

/// Result type for NeoBridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bounded exponential backoff for transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl RetryPolicy {
    /// A policy that surfaces the first failure
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based): base * factor^attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(self.factor.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            factor: 3,
        }
    }
}

/// Result of an upsert: the node's identifier and whether this call made it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: NodeId,
    pub created: bool,
}

/// The identity and upsert layer.
///
/// Wraps a `GraphStore` and guarantees one identifier per node (a UUID v4
/// generated only on the create path), validated natural keys, set-semantics
/// links and one-time constraint declarations per label.
pub struct UpsertEngine {
    store: Arc<dyn GraphStore>,
    retry: RetryPolicy,
    declared: DashMap<Label, ()>,
    indexed: DashMap<(Label, Vec<Property>), ()>,
    stripes: Vec<Mutex<()>>,
}

impl UpsertEngine {
    /// Create an engine over a store with the default retry policy
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self::with_retry(store, RetryPolicy::default())
    }

    pub fn with_retry(store: Arc<dyn GraphStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            declared: DashMap::new(),
            indexed: DashMap::new(),
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run a store call, retrying `StoreUnavailable` with bounded backoff.
    /// Every other error surfaces immediately.
    pub async fn with_retry_on<T, F, Fut>(&self, operation: &str, mut call: F) -> BridgeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await.map_err(BridgeError::from) {
                Err(BridgeError::StoreUnavailable(reason)) if attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "store unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Declare that nodes of `label` carry a unique identifier.
    ///
    /// Issued at most once per label per engine; the store declaration
    /// itself is idempotent across restarts.
    pub async fn ensure_unique_identity(&self, label: Label) -> BridgeResult<()> {
        if self.declared.contains_key(&label) {
            return Ok(());
        }
        self.with_retry_on("ensure_unique_constraint", || {
            self.store.ensure_unique_constraint(label)
        })
        .await?;
        self.declared.insert(label, ());
        debug!(%label, "declared unique identifier constraint");
        Ok(())
    }

    /// Declare a secondary index over `properties` of `label`
    pub async fn ensure_index(&self, label: Label, properties: &[Property]) -> BridgeResult<()> {
        let key = (label, properties.to_vec());
        if self.indexed.contains_key(&key) {
            return Ok(());
        }
        self.with_retry_on("ensure_index", || self.store.ensure_index(label, properties))
            .await?;
        self.indexed.insert(key, ());
        debug!(%label, ?properties, "declared index");
        Ok(())
    }

    /// Match-or-create a node by natural key, returning its identifier.
    pub async fn upsert(&self, key: &NaturalKey, extra: Properties) -> BridgeResult<NodeId> {
        Ok(self.upsert_outcome(key, extra).await?.id)
    }

    /// Like `upsert`, also reporting whether the node was created.
    ///
    /// `extra` never overrides key components, the identifier or the
    /// creation timestamp; those entries are dropped before the merge.
    pub async fn upsert_outcome(
        &self,
        key: &NaturalKey,
        mut extra: Properties,
    ) -> BridgeResult<UpsertOutcome> {
        let label = key.label();
        key.ordered()
            .map_err(|property| BridgeError::InvalidKey { label, property })?;

        extra.remove(Property::Uuid.as_str());
        extra.remove(Property::CreatedAt.as_str());
        for property in label.natural_key() {
            extra.remove(property.as_str());
        }

        self.ensure_unique_identity(label).await?;

        let _guard = self.stripe(key).lock().await;
        let new_id = NodeId::new();
        let outcome = self
            .with_retry_on("merge_node", || self.store.merge_node(key, &extra, new_id))
            .await?;

        if outcome.created {
            debug!(%label, id = %outcome.id, "created node");
        }
        Ok(UpsertOutcome {
            id: outcome.id,
            created: outcome.created,
        })
    }

    /// Create `(from)-[rel]->(to)` if absent. Returns true when created.
    pub async fn link(&self, rel: RelType, from: NodeId, to: NodeId) -> BridgeResult<bool> {
        let created = self
            .with_retry_on("merge_edge", || self.store.merge_edge(rel, from, to))
            .await?;
        if created {
            debug!(edge = %Edge::new(rel, from, to), "created edge");
        }
        Ok(created)
    }

    /// Upsert the Toolchain node for a producing process.
    pub async fn register_toolchain(&self, name: &str, version: &str) -> BridgeResult<NodeId> {
        let key = NaturalKey::new(Label::Toolchain)
            .with(Property::Name, name)
            .with(Property::Version, version);
        let id = self.upsert(&key, Properties::new()).await?;
        debug!(name, version, %id, "registered toolchain");
        Ok(id)
    }

    fn stripe(&self, key: &NaturalKey) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.label().hash(&mut hasher);
        key.canonical().hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PropertyValue;
    use crate::storage::{MergeOutcome, NodeFilter, OpenStore, SqliteStore};
    use crate::graph::Node;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn engine() -> UpsertEngine {
        UpsertEngine::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
    }

    fn lemma(text: &str) -> NaturalKey {
        NaturalKey::new(Label::Lemma)
            .with(Property::Text, text)
            .with(Property::Language, "en")
    }

    #[tokio::test]
    async fn upsert_returns_same_id_for_same_key() {
        let engine = engine();
        let first = engine.upsert_outcome(&lemma("walk"), Properties::new()).await.unwrap();
        let second = engine.upsert_outcome(&lemma("walk"), Properties::new()).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(engine.store().count_nodes(Label::Lemma).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_rejects_blank_component_as_invalid_key() {
        let engine = engine();
        let err = engine.upsert(&lemma(""), Properties::new()).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidKey {
                label: Label::Lemma,
                property: Property::Text
            }
        ));
        assert!(err.is_record_scoped());
    }

    #[tokio::test]
    async fn extra_cannot_override_identity() {
        let engine = engine();
        let mut extra = Properties::new();
        extra.insert("uuid".into(), PropertyValue::from("not-a-uuid"));
        extra.insert("text".into(), PropertyValue::from("other"));
        extra.insert("pos".into(), PropertyValue::from("VERB"));

        let id = engine.upsert(&lemma("walk"), extra).await.unwrap();
        let node = engine.store().load_node(id).await.unwrap().unwrap();

        assert_eq!(node.text(Property::Uuid), Some(id.to_string().as_str()));
        assert_eq!(node.text(Property::Text), Some("walk"));
        assert_eq!(node.text(Property::Pos), Some("VERB"));
    }

    #[tokio::test]
    async fn link_is_idempotent() {
        let engine = engine();
        let a = engine.upsert(&lemma("a"), Properties::new()).await.unwrap();
        let b = engine.upsert(&lemma("b"), Properties::new()).await.unwrap();

        assert!(engine.link(RelType::Matches, a, b).await.unwrap());
        assert!(!engine.link(RelType::Matches, a, b).await.unwrap());
        assert_eq!(engine.store().count_edges(RelType::Matches).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn register_toolchain_is_stable() {
        let engine = engine();
        let a = engine.register_toolchain("ipn2neo4j", "1.0.0").await.unwrap();
        let b = engine.register_toolchain("ipn2neo4j", "1.0.0").await.unwrap();
        let c = engine.register_toolchain("ipn2neo4j", "1.1.0").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn concurrent_upserts_converge_on_one_node() {
        let engine = Arc::new(engine());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.upsert(&lemma("soho"), Properties::new()).await.unwrap()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(engine.store().count_nodes(Label::Lemma).await.unwrap(), 1);
    }

    #[test]
    fn retry_delay_grows_geometrically() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(300));
        assert_eq!(policy.delay(2), Duration::from_millis(900));
    }

    #[test]
    fn storage_errors_map_to_bridge_taxonomy() {
        assert!(matches!(
            BridgeError::from(StorageError::Unavailable("busy".into())),
            BridgeError::StoreUnavailable(_)
        ));
        assert!(matches!(
            BridgeError::from(StorageError::Constraint("dup".into())),
            BridgeError::ConstraintViolation(_)
        ));
        assert!(matches!(
            BridgeError::from(StorageError::Poisoned),
            BridgeError::Storage(_)
        ));
    }

    /// Store whose merges fail as unavailable a fixed number of times.
    struct FlakyStore {
        inner: SqliteStore,
        failures_left: AtomicU32,
        merges: AtomicU32,
    }

    #[async_trait]
    impl GraphStore for FlakyStore {
        async fn ensure_unique_constraint(&self, label: Label) -> StorageResult<()> {
            self.inner.ensure_unique_constraint(label).await
        }
        async fn ensure_index(&self, label: Label, properties: &[Property]) -> StorageResult<()> {
            self.inner.ensure_index(label, properties).await
        }
        async fn merge_node(
            &self,
            key: &NaturalKey,
            extra: &Properties,
            new_id: NodeId,
        ) -> StorageResult<MergeOutcome> {
            self.merges.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StorageError::Unavailable("database is locked".into()));
            }
            self.inner.merge_node(key, extra, new_id).await
        }
        async fn merge_edge(&self, rel: RelType, from: NodeId, to: NodeId) -> StorageResult<bool> {
            self.inner.merge_edge(rel, from, to).await
        }
        async fn load_node(&self, id: NodeId) -> StorageResult<Option<Node>> {
            self.inner.load_node(id).await
        }
        async fn find_nodes(
            &self,
            label: Label,
            filter: &NodeFilter,
            limit: usize,
        ) -> StorageResult<Vec<Node>> {
            self.inner.find_nodes(label, filter, limit).await
        }
        async fn scan_nodes(
            &self,
            label: Label,
            after: Option<NodeId>,
            limit: usize,
        ) -> StorageResult<Vec<Node>> {
            self.inner.scan_nodes(label, after, limit).await
        }
        async fn edges_from(&self, id: NodeId, rel: RelType) -> StorageResult<Vec<NodeId>> {
            self.inner.edges_from(id, rel).await
        }
        async fn count_nodes(&self, label: Label) -> StorageResult<u64> {
            self.inner.count_nodes(label).await
        }
        async fn count_edges(&self, rel: RelType) -> StorageResult<u64> {
            self.inner.count_edges(rel).await
        }
    }

    fn flaky(failures: u32) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            failures_left: AtomicU32::new(failures),
            merges: AtomicU32::new(0),
        })
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            factor: 2,
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = flaky(2);
        let engine = UpsertEngine::with_retry(store.clone(), fast_retry(3));

        engine.upsert(&lemma("walk"), Properties::new()).await.unwrap();
        assert_eq!(store.merges.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_store_unavailable() {
        let store = flaky(10);
        let engine = UpsertEngine::with_retry(store.clone(), fast_retry(2));

        let err = engine.upsert(&lemma("walk"), Properties::new()).await.unwrap_err();
        assert!(matches!(err, BridgeError::StoreUnavailable(_)));
        assert_eq!(store.merges.load(Ordering::SeqCst), 3);
    }
}
