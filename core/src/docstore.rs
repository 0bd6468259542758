use crate::persist::{decode_u64, existing_tree, next_id};
use crate::{DocId, EngineError, Namespace, Result};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: DocId,
    pub source: Value,
}

/// Raw JSON bodies keyed by auto-increment id, one sled tree per namespace.
/// Id counters live in the database's default tree.
pub struct DocumentStore {
    db: sled::Db,
}

impl DocumentStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Ok(Self { db: sled::open(dir)? })
    }

    fn tree(&self, ns: &Namespace) -> Result<sled::Tree> {
        Ok(self.db.open_tree(ns.tree_name())?)
    }

    fn existing(&self, ns: &Namespace) -> Result<Option<sled::Tree>> {
        existing_tree(&self.db, &ns.tree_name())
    }

    pub fn insert(&self, ns: &Namespace, doc: &Value) -> Result<DocId> {
        let bytes = serde_json::to_vec(doc)?;
        let id = next_id(&self.db, ns.tree_name().as_bytes())?;
        self.tree(ns)?.insert(id.to_be_bytes(), bytes)?;
        Ok(id)
    }

    pub fn get(&self, ns: &Namespace, id: DocId) -> Result<Option<StoredDocument>> {
        let Some(tree) = self.existing(ns)? else { return Ok(None) };
        match tree.get(id.to_be_bytes())? {
            Some(raw) => Ok(Some(decode_document(id, &raw)?)),
            None => Ok(None),
        }
    }

    /// Documents for `ids` in the given order; unknown ids are skipped.
    pub fn fetch(&self, ns: &Namespace, ids: &[DocId]) -> Result<Vec<StoredDocument>> {
        let mut out = Vec::with_capacity(ids.len());
        let Some(tree) = self.existing(ns)? else { return Ok(out) };
        for &id in ids {
            if let Some(raw) = tree.get(id.to_be_bytes())? {
                out.push(decode_document(id, &raw)?);
            }
        }
        Ok(out)
    }

    /// Total document count plus the first `limit` documents in id order.
    pub fn scan(&self, ns: &Namespace, limit: usize) -> Result<(usize, Vec<StoredDocument>)> {
        let mut out = Vec::new();
        let Some(tree) = self.existing(ns)? else { return Ok((0, out)) };
        for item in tree.iter().take(limit) {
            let (key, raw) = item?;
            out.push(decode_document(decode_u64(&key)?, &raw)?);
        }
        Ok((tree.len(), out))
    }

    pub fn count(&self, ns: &Namespace) -> Result<usize> {
        Ok(self.existing(ns)?.map_or(0, |tree| tree.len()))
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

// Stored bodies were valid JSON when written; failing now means the store is damaged.
fn decode_document(id: DocId, raw: &[u8]) -> Result<StoredDocument> {
    let source = serde_json::from_slice(raw).map_err(|e| EngineError::Corrupt(format!("document {id}: {e}")))?;
    Ok(StoredDocument { id, source })
}
