use crate::document::flatten_json;
use crate::tokenizer::distinct_tokens;
use crate::{DocId, Engine, EngineError, FieldId, Namespace, Posting, PostingsList, Result};
use serde_json::Value;
use std::collections::BTreeMap;

impl Engine {
    /// Store `doc` and add its terms to the namespace's postings.
    ///
    /// All failures come back as [`EngineError::Index`]. Nothing is rolled
    /// back: fields, the document row and shards merged before the failure
    /// stay in place, and re-submitting the document is safe.
    pub fn add_document(&self, ns: &Namespace, doc: &Value) -> Result<DocId> {
        self.index_document(ns, doc).map_err(EngineError::index)
    }

    fn index_document(&self, ns: &Namespace, doc: &Value) -> Result<DocId> {
        let flat = flatten_json(doc, self.config().max_depth)?;

        // register shapes before the document row so a conflicting body leaves no orphan
        for group in &flat.groups {
            self.catalog.ensure_group(ns, group)?;
        }
        let mut fields: Vec<(FieldId, &str)> = Vec::with_capacity(flat.fields.len());
        for (path, text) in &flat.fields {
            fields.push((self.catalog.ensure_field(ns, path)?, text.as_str()));
        }

        let doc_id = self.documents.insert(ns, doc)?;
        let by_term = candidate_postings(doc_id, &fields);

        let mut new_terms = 0usize;
        for (term, postings) in &by_term {
            let (shard, created) = self.dictionary.ensure_term(ns, term)?;
            if created {
                new_terms += 1;
            }
            self.postings.merge(&shard, postings.iter().copied())?;
        }
        tracing::debug!(namespace = %ns, doc_id, fields = fields.len(), terms = by_term.len(), new_terms, "document indexed");
        Ok(doc_id)
    }
}

/// Group one document's postings by term.
pub fn candidate_postings(doc_id: DocId, fields: &[(FieldId, &str)]) -> BTreeMap<String, PostingsList> {
    let mut by_term: BTreeMap<String, PostingsList> = BTreeMap::new();
    for &(field_id, text) in fields {
        for token in distinct_tokens(text) {
            by_term.entry(token).or_default().insert(Posting::new(doc_id, field_id));
        }
    }
    by_term
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn groups_terms_across_fields() {
        let by_term = candidate_postings(7, &[(1, "i like search"), (2, "i like google like")]);
        assert_eq!(by_term.len(), 4);
        assert_eq!(by_term["like"].iter().copied().collect::<Vec<_>>(), vec![Posting::new(7, 1), Posting::new(7, 2)]);
        assert_eq!(by_term["google"].len(), 1);
    }

    #[test]
    fn indexing_writes_catalog_dictionary_and_postings() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(EngineConfig::new(dir.path())).unwrap();
        let ns = Namespace::new("test", "doc").unwrap();
        let id = engine.add_document(&ns, &json!({"a": {"b": "i like search"}, "c": "i like google"})).unwrap();

        let ab = engine.catalog().lookup_field(&ns, "a.b").unwrap().unwrap();
        let c = engine.catalog().lookup_field(&ns, "c").unwrap().unwrap();
        assert_eq!(engine.catalog().lookup_field(&ns, "a").unwrap(), None);

        let shard = engine.dictionary().lookup_term(&ns, "like").unwrap().unwrap();
        let postings = engine.postings().load(&shard).unwrap();
        assert_eq!(postings.into_iter().collect::<Vec<_>>(), vec![Posting::new(id, ab), Posting::new(id, c)]);
    }

    #[test]
    fn failures_are_index_errors_without_document_rows() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(EngineConfig::new(dir.path())).unwrap();
        let ns = Namespace::new("test", "doc").unwrap();

        let err = engine.add_document(&ns, &json!({"a": {"b": {"c": {"d": "x"}}}})).unwrap_err();
        assert!(matches!(err, EngineError::Index { .. }));
        assert!(matches!(err.root_cause(), EngineError::Structure(_)));

        let err = engine.add_document(&ns, &json!({"n": 1})).unwrap_err();
        assert!(matches!(err.root_cause(), EngineError::Type { .. }));
        assert_eq!(engine.documents().count(&ns).unwrap(), 0);
    }

    #[test]
    fn field_shape_must_stay_consistent() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(EngineConfig::new(dir.path())).unwrap();
        let ns = Namespace::new("test", "doc").unwrap();
        engine.add_document(&ns, &json!({"a": "flat text"})).unwrap();
        let err = engine.add_document(&ns, &json!({"a": {"b": "nested"}})).unwrap_err();
        assert!(matches!(err.root_cause(), EngineError::Structure(_)));

        engine.add_document(&ns, &json!({"g": {"h": "nested"}})).unwrap();
        let err = engine.add_document(&ns, &json!({"g": "flat"})).unwrap_err();
        assert!(matches!(err.root_cause(), EngineError::Structure(_)));
        assert_eq!(engine.documents().count(&ns).unwrap(), 2);
    }

    #[test]
    fn reindexing_the_same_body_does_not_duplicate_postings() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(EngineConfig::new(dir.path())).unwrap();
        let ns = Namespace::new("test", "doc").unwrap();
        let body = json!({"a": "same same words"});
        let first = engine.add_document(&ns, &body).unwrap();
        let second = engine.add_document(&ns, &body).unwrap();
        assert!(second > first);
        let shard = engine.dictionary().lookup_term(&ns, "same").unwrap().unwrap();
        assert_eq!(engine.postings().load(&shard).unwrap().len(), 2);
    }
}
