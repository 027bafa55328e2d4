//! Adapter layer
//!
//! Adapters turn domain input (gazetteer rows, annotated documents) into
//! node and relationship upserts through the shared `UpsertEngine`. The
//! linker runs afterwards over the accumulated graph.

pub mod annotation;
mod cancel;
pub mod geographic;
mod ingest;
pub mod linker;
pub mod reader;
mod traits;

pub use annotation::{
    AnnotatedDocument, AnnotatedParagraph, AnnotatedToken, AnnotationAdapter, AnnotationOptions,
    EntitySpan,
};
pub use cancel::CancellationToken;
pub use geographic::{GeographicAdapter, ReferenceRecord};
pub use ingest::{IngestPipeline, RunAborted, RunSummary};
pub use linker::{CorpusLinker, LinkPass, LinkReport, PassReport};
pub use reader::{read_documents, ReaderError, ReferenceReader};
pub use traits::{Adapter, AdapterInput, EmitStats};
