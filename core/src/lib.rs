//! Inverted-index engine for JSON documents partitioned by (index, type).
//!
//! Documents are flattened into dotted field paths, split into whitespace
//! terms and recorded as `(document, field)` postings in one compressed shard
//! file per term. Queries intersect or union the per-term document lists.

pub mod catalog;
pub mod dictionary;
pub mod docstore;
pub mod document;
pub mod error;
pub mod index;
pub mod indexer;
pub mod persist;
pub mod postings;
pub mod query;
pub mod tokenizer;

pub use docstore::StoredDocument;
pub use document::{flatten, flatten_json, DocumentValue, Flattened};
pub use error::{EngineError, Result};
pub use index::*;
pub use persist::EngineConfig;
pub use query::{parse_search_body, Mode, QueryMap, SearchHits, SearchRequest, DEFAULT_PAGE_SIZE};
