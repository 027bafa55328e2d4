//! Linguistic annotation adapter
//!
//! Writes the output of an external NLP pipeline into the graph: one
//! Source per document, one Token per word occurrence chained by `Next`
//! within each paragraph, the token's lemma, tags and coreference cluster,
//! and the entity spans found in each paragraph.

use super::cancel::CancellationToken;
use super::traits::{Adapter, AdapterInput, EmitStats};
use crate::graph::{
    schema::tag_class, BridgeError, BridgeResult, Label, NaturalKey, NodeId, Properties, Property,
    PropertyValue, RelType, UpsertEngine,
};
use crate::storage::NodeFilter;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Toolchain name registered by the annotation import
pub const TOOLCHAIN_NAME: &str = "spacy2neo4j";
pub const TOOLCHAIN_VERSION: &str = "1.1.0";

pub const INPUT_KIND: &str = "annotated-document";

/// One token as emitted by the annotation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedToken {
    pub text: String,
    pub norm: String,
    pub language: String,
    pub lemma: String,
    /// Coarse part-of-speech tag
    pub pos: String,
    /// Fine-grained tag
    pub tag: String,
    /// Coreference cluster id, 0 for none
    #[serde(default)]
    pub cluster: i64,
    /// Auxiliary semantic tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub musas: Vec<String>,
    /// Position within the paragraph
    pub index: i64,
}

/// A typed entity mention covering tokens `[start, end)` of a paragraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub text: String,
    pub label: String,
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedParagraph {
    #[serde(default)]
    pub tokens: Vec<AnnotatedToken>,
    #[serde(default)]
    pub entities: Vec<EntitySpan>,
}

/// A processed document: its identity and annotated paragraphs in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedDocument {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub paragraphs: Vec<AnnotatedParagraph>,
}

/// Which parts of a document to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationOptions {
    pub tokens: bool,
    pub entities: bool,
    /// Write auxiliary (pymusas) tags alongside coarse and fine tags
    pub auxiliary_tags: bool,
}

impl Default for AnnotationOptions {
    fn default() -> Self {
        Self {
            tokens: true,
            entities: true,
            auxiliary_tags: true,
        }
    }
}

fn tag_key(class: &str, value: &str) -> NaturalKey {
    NaturalKey::new(Label::Tag)
        .with(Property::Class, class)
        .with(Property::Type, value)
}

/// Adapter for annotated documents.
pub struct AnnotationAdapter {
    engine: Arc<UpsertEngine>,
    options: AnnotationOptions,
}

impl AnnotationAdapter {
    pub fn new(engine: Arc<UpsertEngine>) -> Self {
        Self {
            engine,
            options: AnnotationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AnnotationOptions) -> Self {
        self.options = options;
        self
    }

    async fn upsert(&self, stats: &mut EmitStats, key: &NaturalKey, extra: Properties) -> BridgeResult<NodeId> {
        Ok(stats.record_node(self.engine.upsert_outcome(key, extra).await?))
    }

    async fn link(&self, stats: &mut EmitStats, rel: RelType, from: NodeId, to: NodeId) -> BridgeResult<()> {
        stats.record_edge(self.engine.link(rel, from, to).await?);
        Ok(())
    }

    async fn tag(&self, stats: &mut EmitStats, token: NodeId, class: &str, value: &str) -> BridgeResult<()> {
        let tag = self.upsert(stats, &tag_key(class, value), Properties::new()).await?;
        self.link(stats, RelType::Tagged, token, tag).await
    }

    async fn write_token(
        &self,
        stats: &mut EmitStats,
        source: NodeId,
        paragraph: i64,
        token: &AnnotatedToken,
    ) -> BridgeResult<NodeId> {
        let key = NaturalKey::new(Label::Token)
            .with(Property::Text, token.text.as_str())
            .with(Property::Paragraph, paragraph)
            .with(Property::Index, token.index)
            .with(Property::Norm, token.norm.as_str())
            .with(Property::Language, token.language.as_str())
            .with(Property::Source, source);

        let mut extra = Properties::new();
        extra.insert(Property::Pos.as_str().into(), token.pos.as_str().into());
        extra.insert(Property::Tag.as_str().into(), token.tag.as_str().into());
        extra.insert(Property::Lemma.as_str().into(), token.lemma.as_str().into());
        if token.cluster != 0 {
            extra.insert(Property::Cluster.as_str().into(), PropertyValue::Int(token.cluster));
        }
        if self.options.auxiliary_tags && !token.musas.is_empty() {
            extra.insert(Property::Musas.as_str().into(), token.musas.clone().into());
        }
        let id = self.upsert(stats, &key, extra).await?;

        let lemma_key = NaturalKey::new(Label::Lemma)
            .with(Property::Text, token.lemma.as_str())
            .with(Property::Language, token.language.as_str());
        let lemma = self.upsert(stats, &lemma_key, Properties::new()).await?;
        self.link(stats, RelType::Is, id, lemma).await?;

        self.tag(stats, id, tag_class::FINE, &token.tag).await?;
        self.tag(stats, id, tag_class::COARSE, &token.pos).await?;
        if self.options.auxiliary_tags {
            for musas in &token.musas {
                self.tag(stats, id, tag_class::PYMUSAS, musas).await?;
            }
        }

        if token.cluster != 0 {
            let cluster_key = NaturalKey::new(Label::Cluster)
                .with(Property::Id, token.cluster)
                .with(Property::Source, source);
            let cluster = self.upsert(stats, &cluster_key, Properties::new()).await?;
            self.link(stats, RelType::PartOf, id, cluster).await?;
        }

        Ok(id)
    }

    /// Token identifier for `(source, paragraph, index)`, from this call's
    /// writes first and the store second.
    async fn resolve_token(
        &self,
        written: &HashMap<(i64, i64), NodeId>,
        source: NodeId,
        paragraph: i64,
        index: i64,
    ) -> BridgeResult<Option<NodeId>> {
        if let Some(id) = written.get(&(paragraph, index)) {
            return Ok(Some(*id));
        }
        let filter = NodeFilter::new()
            .with(Property::Source, source)
            .with(Property::Paragraph, paragraph)
            .with(Property::Index, index);
        let found = self
            .engine
            .with_retry_on("find_nodes", || {
                self.engine.store().find_nodes(Label::Token, &filter, 1)
            })
            .await?;
        Ok(found.first().map(|n| n.id))
    }

    async fn write_entity(
        &self,
        stats: &mut EmitStats,
        written: &HashMap<(i64, i64), NodeId>,
        source: NodeId,
        paragraph: i64,
        token_bound: Option<i64>,
        span: &EntitySpan,
    ) -> BridgeResult<()> {
        if span.start < 0 || span.end <= span.start {
            return Err(BridgeError::MalformedInput(format!(
                "entity '{}' has empty range [{}, {}) in paragraph {}",
                span.text, span.start, span.end, paragraph
            )));
        }
        if let Some(bound) = token_bound.filter(|bound| span.end > *bound) {
            return Err(BridgeError::MalformedInput(format!(
                "entity '{}' ends at {} past the {} tokens of paragraph {}",
                span.text, span.end, bound, paragraph
            )));
        }

        let mut tokens = Vec::new();
        for index in span.start..span.end {
            match self.resolve_token(written, source, paragraph, index).await? {
                Some(id) => tokens.push(id),
                None => {
                    return Err(BridgeError::MalformedInput(format!(
                        "entity '{}' refers to unknown token {} in paragraph {}",
                        span.text, index, paragraph
                    )))
                }
            }
        }

        let key = NaturalKey::new(Label::Entity)
            .with(Property::Text, span.text.as_str())
            .with(Property::Type, span.label.as_str());
        let entity = self.upsert(stats, &key, Properties::new()).await?;
        for token in tokens {
            self.link(stats, RelType::Is, token, entity).await?;
        }
        Ok(())
    }

    /// Write one document. Cancellation is checked between paragraphs.
    pub async fn ingest_document(
        &self,
        document: &AnnotatedDocument,
        cancel: &CancellationToken,
    ) -> BridgeResult<EmitStats> {
        let mut stats = EmitStats::new();

        let source_key = NaturalKey::new(Label::Source)
            .with(Property::Title, document.title.as_str())
            .with(Property::Url, document.url.as_str());
        let source = self.upsert(&mut stats, &source_key, Properties::new()).await?;
        info!(title = %document.title, %source, paragraphs = document.paragraphs.len(), "processing document");

        for (paragraph, para) in document.paragraphs.iter().enumerate() {
            cancel.check()?;
            let paragraph = paragraph as i64;
            let mut written = HashMap::new();

            if self.options.tokens {
                let mut previous: Option<NodeId> = None;
                for token in &para.tokens {
                    let id = self.write_token(&mut stats, source, paragraph, token).await?;
                    if let Some(prev) = previous {
                        self.link(&mut stats, RelType::Next, prev, id).await?;
                    }
                    written.insert((paragraph, token.index), id);
                    previous = Some(id);
                }
            }

            if self.options.entities {
                // Without tokens in the document the store is the only bound.
                let token_bound = para.tokens.iter().map(|t| t.index.saturating_add(1)).max();
                for span in &para.entities {
                    self.write_entity(&mut stats, &written, source, paragraph, token_bound, span)
                        .await?;
                }
            }
            debug!(title = %document.title, paragraph, "paragraph written");
        }

        Ok(stats)
    }
}

#[async_trait]
impl Adapter for AnnotationAdapter {
    fn id(&self) -> &str {
        "annotation"
    }

    fn input_kind(&self) -> &str {
        INPUT_KIND
    }

    async fn prepare(&self) -> BridgeResult<()> {
        self.engine
            .ensure_index(Label::Token, &[Property::Index, Property::Paragraph])
            .await?;
        self.engine.ensure_index(Label::Tag, &[Property::Type]).await?;
        for label in [
            Label::Toolchain,
            Label::Source,
            Label::Token,
            Label::Lemma,
            Label::Tag,
            Label::Cluster,
            Label::Entity,
        ] {
            self.engine.ensure_unique_identity(label).await?;
        }
        Ok(())
    }

    async fn process(
        &self,
        input: &AdapterInput,
        cancel: &CancellationToken,
    ) -> BridgeResult<EmitStats> {
        let document = input.downcast_data::<AnnotatedDocument>().ok_or_else(|| {
            BridgeError::MalformedInput(format!("{} is not an annotated document", input.origin))
        })?;
        self.ingest_document(document, cancel).await
    }
}
