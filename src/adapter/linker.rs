//! CorpusLinker: batch linking of annotations to geographic names
//!
//! Bridges the annotation graph and the gazetteer graph by text matching:
//! - Entity whose text equals a geographic name → `Is` (or `Homophone`
//!   when the entity is a PERSON)
//! - Lemma whose text equals a geographic name → `Matches`
//!
//! Matching is case-insensitive on both sides. Edge creation has set
//! semantics, so re-running over an unchanged graph creates nothing.

use super::cancel::CancellationToken;
use crate::graph::{schema::PERSON, BridgeResult, Label, Node, NodeId, Property, RelType, UpsertEngine};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Toolchain name registered by the linking pass
pub const TOOLCHAIN_NAME: &str = "corpuslinker";
pub const TOOLCHAIN_VERSION: &str = "1.0.0";

pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Geographic labels, in the order passes run
pub const GEOGRAPHIC_LABELS: [Label; 4] = [
    Label::Place,
    Label::County,
    Label::LocalAuthorityDistrict,
    Label::PlaceNameDescriptor,
];

/// Annotation labels matched against each geographic label
pub const ANNOTATION_LABELS: [Label; 2] = [Label::Entity, Label::Lemma];

/// One geographic label matched against one annotation label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkPass {
    pub geographic: Label,
    pub annotation: Label,
}

impl LinkPass {
    pub fn new(geographic: Label, annotation: Label) -> Self {
        Self {
            geographic,
            annotation,
        }
    }

    /// All eight passes in run order
    pub fn all() -> Vec<LinkPass> {
        GEOGRAPHIC_LABELS
            .iter()
            .flat_map(|g| ANNOTATION_LABELS.iter().map(move |a| LinkPass::new(*g, *a)))
            .collect()
    }

    /// Property holding the geographic node's matchable name
    fn name_property(&self) -> Property {
        match self.geographic {
            Label::PlaceNameDescriptor => Property::Code,
            _ => Property::Name,
        }
    }

    /// Relationship from an annotation node to a matching geographic node
    fn relationship(&self, annotation: &Node) -> RelType {
        match self.annotation {
            Label::Entity if annotation.text(Property::Type) == Some(PERSON) => RelType::Homophone,
            Label::Entity => RelType::Is,
            _ => RelType::Matches,
        }
    }
}

impl fmt::Display for LinkPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.geographic, self.annotation)
    }
}

/// Outcome of one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub pass: LinkPass,
    /// Matching (annotation, geographic) pairs seen
    pub candidates: usize,
    /// Edges this pass created
    pub created: usize,
}

/// Outcome of a full linking run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkReport {
    pub passes: Vec<PassReport>,
}

impl LinkReport {
    pub fn total_candidates(&self) -> usize {
        self.passes.iter().map(|p| p.candidates).sum()
    }

    pub fn total_created(&self) -> usize {
        self.passes.iter().map(|p| p.created).sum()
    }
}

/// Paginated, cancellable linking pass over the accumulated graph.
pub struct CorpusLinker {
    engine: Arc<UpsertEngine>,
    page_size: usize,
}

impl CorpusLinker {
    pub fn new(engine: Arc<UpsertEngine>) -> Self {
        Self {
            engine,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn page(&self, label: Label, after: Option<NodeId>) -> BridgeResult<Vec<Node>> {
        self.engine
            .with_retry_on("scan_nodes", || {
                self.engine.store().scan_nodes(label, after, self.page_size)
            })
            .await
    }

    /// Lower-cased name → geographic node ids, built page by page.
    async fn name_index(
        &self,
        pass: LinkPass,
        cancel: &CancellationToken,
    ) -> BridgeResult<HashMap<String, Vec<NodeId>>> {
        let property = pass.name_property();
        let mut index: HashMap<String, Vec<NodeId>> = HashMap::new();
        let mut after = None;

        loop {
            cancel.check()?;
            let page = self.page(pass.geographic, after).await?;
            for node in &page {
                if let Some(name) = node.text(property).filter(|n| !n.is_empty()) {
                    index.entry(name.to_lowercase()).or_default().push(node.id);
                }
            }
            match page.last() {
                Some(last) if page.len() == self.page_size => after = Some(last.id),
                _ => break,
            }
        }
        Ok(index)
    }

    /// Run a single pass. Cancellation is checked at every page boundary.
    pub async fn run_pass(&self, pass: LinkPass, cancel: &CancellationToken) -> BridgeResult<PassReport> {
        info!(%pass, "matching");
        let names = self.name_index(pass, cancel).await?;
        let mut report = PassReport {
            pass,
            candidates: 0,
            created: 0,
        };
        if names.is_empty() {
            return Ok(report);
        }

        let mut after = None;
        loop {
            cancel.check()?;
            let page = self.page(pass.annotation, after).await?;
            for node in &page {
                let Some(text) = node.text(Property::Text) else {
                    continue;
                };
                let Some(targets) = names.get(&text.to_lowercase()) else {
                    continue;
                };
                let rel = pass.relationship(node);
                for target in targets {
                    report.candidates += 1;
                    if self.engine.link(rel, node.id, *target).await? {
                        report.created += 1;
                        debug!(%pass, text, %rel, "linked");
                    }
                }
            }
            match page.last() {
                Some(last) if page.len() == self.page_size => after = Some(last.id),
                _ => break,
            }
        }

        info!(%pass, candidates = report.candidates, created = report.created, "pass complete");
        Ok(report)
    }

    /// Run all passes in order.
    pub async fn run(&self, cancel: &CancellationToken) -> BridgeResult<LinkReport> {
        let mut report = LinkReport::default();
        for pass in LinkPass::all() {
            report.passes.push(self.run_pass(pass, cancel).await?);
        }
        info!(
            candidates = report.total_candidates(),
            created = report.total_created(),
            "linking complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BridgeError, NaturalKey, Properties};
    use crate::storage::{OpenStore, SqliteStore};

    fn engine() -> Arc<UpsertEngine> {
        Arc::new(UpsertEngine::new(Arc::new(SqliteStore::open_in_memory().unwrap())))
    }

    async fn county(engine: &UpsertEngine, name: &str) -> NodeId {
        let key = NaturalKey::new(Label::County)
            .with(Property::Name, name)
            .with(Property::Set, "historic")
            .with(Property::Toolchain, "tc");
        engine.upsert(&key, Properties::new()).await.unwrap()
    }

    async fn entity(engine: &UpsertEngine, text: &str, kind: &str) -> NodeId {
        let key = NaturalKey::new(Label::Entity)
            .with(Property::Text, text)
            .with(Property::Type, kind);
        engine.upsert(&key, Properties::new()).await.unwrap()
    }

    async fn lemma(engine: &UpsertEngine, text: &str) -> NodeId {
        let key = NaturalKey::new(Label::Lemma)
            .with(Property::Text, text)
            .with(Property::Language, "en");
        engine.upsert(&key, Properties::new()).await.unwrap()
    }

    #[test]
    fn there_are_eight_passes() {
        let passes = LinkPass::all();
        assert_eq!(passes.len(), 8);
        assert_eq!(passes[0], LinkPass::new(Label::Place, Label::Entity));
        assert_eq!(passes[1], LinkPass::new(Label::Place, Label::Lemma));
    }

    #[tokio::test]
    async fn matching_ignores_case() {
        let engine = engine();
        let middlesex = county(&engine, "Middlesex").await;
        let mention = entity(&engine, "MIDDLESEX", "GPE").await;

        let report = CorpusLinker::new(engine.clone())
            .run_pass(LinkPass::new(Label::County, Label::Entity), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(engine.store().edges_from(mention, RelType::Is).await.unwrap(), vec![middlesex]);
    }

    #[tokio::test]
    async fn person_entities_become_homophones_only() {
        let engine = engine();
        let kent = county(&engine, "Kent").await;
        let person = entity(&engine, "Kent", PERSON).await;
        let place = entity(&engine, "Kent", "GPE").await;

        CorpusLinker::new(engine.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        let store = engine.store();
        assert_eq!(store.edges_from(person, RelType::Homophone).await.unwrap(), vec![kent]);
        assert!(store.edges_from(person, RelType::Is).await.unwrap().is_empty());
        assert_eq!(store.edges_from(place, RelType::Is).await.unwrap(), vec![kent]);
        assert!(store.edges_from(place, RelType::Homophone).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lemmas_match_geographic_names() {
        let engine = engine();
        let kent = county(&engine, "Kent").await;
        let l = lemma(&engine, "kent").await;

        CorpusLinker::new(engine.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(engine.store().edges_from(l, RelType::Matches).await.unwrap(), vec![kent]);
    }

    #[tokio::test]
    async fn descriptors_match_on_code() {
        let engine = engine();
        let key = NaturalKey::new(Label::PlaceNameDescriptor)
            .with(Property::Code, "LOC")
            .with(Property::Toolchain, "tc");
        let descriptor = engine.upsert(&key, Properties::new()).await.unwrap();
        let l = lemma(&engine, "loc").await;

        CorpusLinker::new(engine.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            engine.store().edges_from(l, RelType::Matches).await.unwrap(),
            vec![descriptor]
        );
    }

    #[tokio::test]
    async fn second_run_creates_nothing() {
        let engine = engine();
        county(&engine, "Kent").await;
        county(&engine, "Surrey").await;
        entity(&engine, "Kent", "GPE").await;
        lemma(&engine, "surrey").await;

        let linker = CorpusLinker::new(engine.clone());
        let first = linker.run(&CancellationToken::new()).await.unwrap();
        let second = linker.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(first.total_created(), 2);
        assert_eq!(second.total_created(), 0);
        assert_eq!(second.total_candidates(), first.total_candidates());
    }

    #[tokio::test]
    async fn small_pages_see_every_node() {
        let engine = engine();
        for name in ["Kent", "Surrey", "Essex", "Sussex"] {
            county(&engine, name).await;
            entity(&engine, name, "GPE").await;
        }

        let report = CorpusLinker::new(engine.clone())
            .with_page_size(1)
            .run_pass(LinkPass::new(Label::County, Label::Entity), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.created, 4);
    }

    #[tokio::test]
    async fn cancelled_run_stops_at_page_boundary() {
        let engine = engine();
        county(&engine, "Kent").await;
        entity(&engine, "Kent", "GPE").await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = CorpusLinker::new(engine.clone()).run(&cancel).await.unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled));
        assert_eq!(engine.store().count_edges(RelType::Is).await.unwrap(), 0);
    }
}
