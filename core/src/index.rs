use crate::catalog::FieldCatalog;
use crate::dictionary::TermDictionary;
use crate::docstore::{DocumentStore, StoredDocument};
use crate::persist::{ensure_meta, EngineConfig, IndexPaths};
use crate::postings::PostingsStore;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeSet;
use std::fmt;

pub type DocId = u64;
pub type FieldId = u32;

const MAX_NAME_LEN: usize = 255;

/// An (index, type) pair. Every store is partitioned by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    index: String,
    kind: String,
}

impl Namespace {
    pub fn new(index: impl Into<String>, kind: impl Into<String>) -> Result<Self> {
        let index = index.into();
        let kind = kind.into();
        validate_name("index", &index)?;
        validate_name("type", &kind)?;
        Ok(Self { index, kind })
    }

    pub fn index(&self) -> &str { &self.index }
    pub fn kind(&self) -> &str { &self.kind }

    /// Name of this namespace's tree in each sled database.
    pub fn tree_name(&self) -> String { format!("{}/{}", self.index, self.kind) }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.kind)
    }
}

fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(EngineError::InvalidNamespace(format!("{what} name is empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::InvalidNamespace(format!("{what} name longer than {MAX_NAME_LEN} bytes")));
    }
    if name.chars().any(|c| c == '/' || c.is_control()) {
        return Err(EngineError::InvalidNamespace(format!("{what} name {name:?} contains '/' or a control character")));
    }
    Ok(())
}

/// Identifier of one postings shard: an uppercase hex digest. The first two
/// pairs of hex digits pick the bucket directories.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardId(String);

impl ShardId {
    /// Content address of `term` within `ns`. Only used when a term is first
    /// registered; afterwards the dictionary's stored value is authoritative.
    pub fn derive(ns: &Namespace, term: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(ns.index.as_bytes());
        hasher.update([0u8]);
        hasher.update(ns.kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(term.as_bytes());
        ShardId(format!("{:X}", hasher.finalize()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        if s.len() < 4 || !s.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b)) {
            return Err(EngineError::Corrupt(format!("invalid shard id {s:?}")));
        }
        Ok(ShardId(s.to_string()))
    }

    pub fn as_str(&self) -> &str { &self.0 }

    /// First- and second-level bucket names.
    pub fn buckets(&self) -> (&str, &str) { (&self.0[..2], &self.0[2..4]) }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// One occurrence of a term: which document, which field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub field_id: FieldId,
}

impl Posting {
    pub fn new(doc_id: DocId, field_id: FieldId) -> Self { Self { doc_id, field_id } }
}

/// Postings of one term, ordered by (doc_id, field_id), no duplicates.
pub type PostingsList = BTreeSet<Posting>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceStats {
    pub documents: usize,
    pub fields: usize,
    pub terms: usize,
}

/// Handle on one data directory: documents, field catalog, term dictionary
/// and postings. Shared across request handlers behind an `Arc`.
pub struct Engine {
    config: EngineConfig,
    paths: IndexPaths,
    pub(crate) documents: DocumentStore,
    pub(crate) catalog: FieldCatalog,
    pub(crate) dictionary: TermDictionary,
    pub(crate) postings: PostingsStore,
}

impl Engine {
    pub fn open(config: EngineConfig) -> Result<Self> {
        let paths = IndexPaths::new(&config.data_dir);
        paths.create_layout()?;
        let meta = ensure_meta(&paths)?;
        let documents = DocumentStore::open(paths.documents())?;
        let catalog = FieldCatalog::open(paths.fields())?;
        let dictionary = TermDictionary::open(paths.dictionary())?;
        let postings = PostingsStore::new(paths.inverted(), config.lock_stripes);
        if config.precreate_buckets {
            let created = postings.prepare_buckets()?;
            tracing::info!(created, "postings buckets ready");
        }
        tracing::info!(data_dir = %paths.root.display(), created_at = %meta.created_at, "engine opened");
        Ok(Self { config, paths, documents, catalog, dictionary, postings })
    }

    pub fn config(&self) -> &EngineConfig { &self.config }
    pub fn paths(&self) -> &IndexPaths { &self.paths }
    pub fn documents(&self) -> &DocumentStore { &self.documents }
    pub fn catalog(&self) -> &FieldCatalog { &self.catalog }
    pub fn dictionary(&self) -> &TermDictionary { &self.dictionary }
    pub fn postings(&self) -> &PostingsStore { &self.postings }

    pub fn get_document(&self, ns: &Namespace, doc_id: DocId) -> Result<Option<StoredDocument>> {
        self.documents.get(ns, doc_id)
    }

    pub fn stats(&self, ns: &Namespace) -> Result<NamespaceStats> {
        Ok(NamespaceStats {
            documents: self.documents.count(ns)?,
            fields: self.catalog.fields(ns)?.len(),
            terms: self.dictionary.len(ns)?,
        })
    }

    /// Every registered field of `ns`, in id order.
    pub fn field_mapping(&self, ns: &Namespace) -> Result<Vec<(String, FieldId)>> {
        self.catalog.fields(ns)
    }

    pub fn flush(&self) -> Result<()> {
        self.documents.flush()?;
        self.catalog.flush()?;
        self.dictionary.flush()?;
        Ok(())
    }
}
