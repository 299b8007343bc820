//! Graph facts and their persistence.
//!
//! Holds the extraction output model (`GraphFragment`), the idempotent merge operations it
//! compiles to (`PersistenceOp`), the writer / watermark / retrieval contracts consumed by
//! the ingestion pipeline, and the SQLite, Neo4j HTTP and JSON-file backends.

mod compile;
mod fragment;
mod neo4j;
mod ops;
mod sqlite;
mod store;
mod watermark_file;

pub use compile::{CompileError, Compiler, MergeCompiler};
pub use fragment::{GraphFragment, GraphNode, GraphRelationship};
pub use neo4j::{Neo4jHttpConfig, Neo4jHttpStore, DEFAULT_NEO4J_DATABASE, DEFAULT_NEO4J_URL};
pub use ops::{sanitize_label, CypherStatement, PersistenceOp, PropertyMap};
pub use sqlite::{GraphCounts, SqliteGraphStore, StoredNode};
pub use store::{
    search_terms, AppliedTransaction, GraphFact, GraphRetriever, GraphStoreError, GraphWriter,
    NodeView, WatermarkStore,
};
pub use watermark_file::FileWatermarkStore;
