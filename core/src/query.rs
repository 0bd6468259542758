use crate::docstore::StoredDocument;
use crate::tokenizer::tokenize;
use crate::{DocId, Engine, EngineError, FieldId, Namespace, PostingsList, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Field path -> query text.
pub type QueryMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Every collected term list has to contain the document.
    Must,
    /// Any collected term list may contain the document.
    Should,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Mode> {
        match s {
            "must" => Some(Mode::Must),
            "should" => Some(Mode::Should),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchRequest {
    Terms { mode: Mode, fields: QueryMap },
    MatchAll,
    /// A query kind we don't evaluate; answers with no hits.
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    /// Matches before truncation to the page size.
    pub total: usize,
    pub hits: Vec<StoredDocument>,
}

/// Read a `_search` body: `{"query": {"match" | "match_all" | "must" | "should": {...}}}`.
pub fn parse_search_body(body: &Value) -> Result<SearchRequest> {
    let obj = body
        .as_object()
        .ok_or_else(|| EngineError::Query("search body must be a JSON object".into()))?;
    let query = obj
        .get("query")
        .ok_or_else(|| EngineError::Query("missing \"query\"".into()))?
        .as_object()
        .ok_or_else(|| EngineError::Query("\"query\" must be an object".into()))?;

    if let Some(fields) = query.get("match") {
        return Ok(SearchRequest::Terms { mode: Mode::Must, fields: parse_fields("match", fields)? });
    }
    if query.contains_key("match_all") {
        return Ok(SearchRequest::MatchAll);
    }
    if let Some(fields) = query.get("must") {
        return Ok(SearchRequest::Terms { mode: Mode::Must, fields: parse_fields("must", fields)? });
    }
    if let Some(fields) = query.get("should") {
        return Ok(SearchRequest::Terms { mode: Mode::Should, fields: parse_fields("should", fields)? });
    }
    Ok(SearchRequest::Empty)
}

fn parse_fields(clause: &str, value: &Value) -> Result<QueryMap> {
    let obj = value
        .as_object()
        .ok_or_else(|| EngineError::Query(format!("\"{clause}\" must map field names to text")))?;
    let mut fields = QueryMap::new();
    for (path, text) in obj {
        let text = text
            .as_str()
            .ok_or_else(|| EngineError::Query(format!("\"{clause}.{path}\" must be a string")))?;
        fields.insert(path.clone(), text.to_string());
    }
    Ok(fields)
}

impl Engine {
    /// Boolean term search. `mode` is `"must"` or `"should"`; anything else
    /// matches nothing.
    pub fn search(&self, ns: &Namespace, query: &QueryMap, mode: &str, size: usize) -> Result<SearchHits> {
        match Mode::parse(mode) {
            Some(mode) => self.search_terms(ns, query, mode, size),
            None => Ok(SearchHits::default()),
        }
    }

    pub fn execute(&self, ns: &Namespace, request: &SearchRequest, size: usize) -> Result<SearchHits> {
        match request {
            SearchRequest::Terms { mode, fields } => self.search_terms(ns, fields, *mode, size),
            SearchRequest::MatchAll => {
                let (total, hits) = self.documents.scan(ns, size)?;
                Ok(SearchHits { total, hits })
            }
            SearchRequest::Empty => Ok(SearchHits::default()),
        }
    }

    fn search_terms(&self, ns: &Namespace, query: &QueryMap, mode: Mode, size: usize) -> Result<SearchHits> {
        let mut lists: Vec<Vec<DocId>> = Vec::new();
        for (path, text) in query {
            // unknown fields and terms contribute no list at all
            let Some(field_id) = self.catalog.lookup_field(ns, path)? else { continue };
            for token in tokenize(text) {
                let Some(shard) = self.dictionary.lookup_term(ns, &token)? else { continue };
                let postings = match self.postings.load(&shard) {
                    Ok(list) => list,
                    // registered, first merge still in flight
                    Err(e) if e.is_not_found() => PostingsList::new(),
                    Err(e) => return Err(e),
                };
                lists.push(docs_in_field(&postings, field_id));
            }
        }
        let collected = lists.len();
        let ids = combine(lists, mode);
        let total = ids.len();
        let page: Vec<DocId> = ids.into_iter().take(size).collect();
        let hits = self.documents.fetch(ns, &page)?;
        tracing::debug!(namespace = %ns, ?mode, lists = collected, total, returned = hits.len(), "search evaluated");
        Ok(SearchHits { total, hits })
    }
}

/// Ascending ids of documents whose `field_id` holds the term.
pub fn docs_in_field(postings: &PostingsList, field_id: FieldId) -> Vec<DocId> {
    let mut ids: Vec<DocId> = postings.iter().filter(|p| p.field_id == field_id).map(|p| p.doc_id).collect();
    ids.dedup();
    ids
}

/// Intersect (`Must`) or union (`Should`) id lists. No lists means no hits.
pub fn combine(lists: Vec<Vec<DocId>>, mode: Mode) -> Vec<DocId> {
    let mut sets = lists.into_iter().map(|l| l.into_iter().collect::<BTreeSet<DocId>>());
    let Some(first) = sets.next() else { return Vec::new() };
    let merged = match mode {
        Mode::Must => sets.fold(first, |acc, s| acc.intersection(&s).copied().collect()),
        Mode::Should => sets.fold(first, |mut acc, s| {
            acc.extend(s);
            acc
        }),
    };
    merged.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Posting;
    use serde_json::json;

    #[test]
    fn combine_modes() {
        let lists = || vec![vec![1, 2, 3], vec![2, 3, 4], vec![3, 9]];
        assert_eq!(combine(lists(), Mode::Must), vec![3]);
        assert_eq!(combine(lists(), Mode::Should), vec![1, 2, 3, 4, 9]);
        assert!(combine(Vec::new(), Mode::Must).is_empty());
        assert!(combine(Vec::new(), Mode::Should).is_empty());
        assert!(combine(vec![vec![1], vec![]], Mode::Must).is_empty());
    }

    #[test]
    fn filters_postings_by_field() {
        let postings: PostingsList = [Posting::new(1, 1), Posting::new(1, 2), Posting::new(2, 2), Posting::new(3, 1)]
            .into_iter()
            .collect();
        assert_eq!(docs_in_field(&postings, 1), vec![1, 3]);
        assert_eq!(docs_in_field(&postings, 2), vec![1, 2]);
        assert!(docs_in_field(&postings, 5).is_empty());
    }

    #[test]
    fn parses_mode_names() {
        assert_eq!(Mode::parse("must"), Some(Mode::Must));
        assert_eq!(Mode::parse("should"), Some(Mode::Should));
        assert_eq!(Mode::parse("MUST"), None);
    }

    #[test]
    fn parses_body_shapes() {
        let req = parse_search_body(&json!({"query": {"match": {"a.b": "search"}}})).unwrap();
        let mut fields = QueryMap::new();
        fields.insert("a.b".into(), "search".into());
        assert_eq!(req, SearchRequest::Terms { mode: Mode::Must, fields: fields.clone() });

        let req = parse_search_body(&json!({"query": {"should": {"a.b": "search"}}})).unwrap();
        assert_eq!(req, SearchRequest::Terms { mode: Mode::Should, fields });

        assert_eq!(parse_search_body(&json!({"query": {"match_all": {}}})).unwrap(), SearchRequest::MatchAll);
        assert_eq!(parse_search_body(&json!({"query": {"fuzzy": {}}})).unwrap(), SearchRequest::Empty);
    }

    #[test]
    fn malformed_bodies_are_query_errors() {
        for body in [json!([]), json!({}), json!({"query": "x"}), json!({"query": {"match": {"a": 1}}}), json!({"query": {"must": []}})] {
            assert!(matches!(parse_search_body(&body), Err(EngineError::Query(_))), "{body}");
        }
    }

    #[test]
    fn registered_term_without_shard_counts_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(crate::EngineConfig::new(dir.path())).unwrap();
        let ns = Namespace::new("test", "log").unwrap();
        let id = engine.add_document(&ns, &json!({"a": "known"})).unwrap();
        let (shard, created) = engine.dictionary.ensure_term(&ns, "pending").unwrap();
        assert!(created);
        assert!(!engine.postings.exists(&shard));

        let mut query = QueryMap::new();
        query.insert("a".into(), "known pending".into());
        let must = engine.search(&ns, &query, "must", 10).unwrap();
        assert_eq!(must.total, 0);
        assert!(must.hits.is_empty());
        let should = engine.search(&ns, &query, "should", 10).unwrap();
        assert_eq!(should.hits.iter().map(|d| d.id).collect::<Vec<_>>(), vec![id]);

        query.insert("a".into(), "pending".into());
        assert_eq!(engine.search(&ns, &query, "should", 10).unwrap().total, 0);
    }
}
