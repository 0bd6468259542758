use crate::persist::{existing_tree, next_id};
use crate::{EngineError, FieldId, Namespace, Result};
use std::path::Path;

/// Field path -> field id, one sled tree per namespace.
///
/// Grouping paths (the `a` and `a.b` of `a.b.c`) are kept in the same tree with
/// an empty value, so a path can never be both a field and a group.
pub struct FieldCatalog {
    db: sled::Db,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Field(FieldId),
    Group,
}

impl FieldCatalog {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Ok(Self { db: sled::open(dir)? })
    }

    fn tree(&self, ns: &Namespace) -> Result<sled::Tree> {
        Ok(self.db.open_tree(ns.tree_name())?)
    }

    fn existing(&self, ns: &Namespace) -> Result<Option<sled::Tree>> {
        existing_tree(&self.db, &ns.tree_name())
    }

    /// Id of `path`, registering it on first sight. Concurrent callers racing
    /// on the same new path all get the id of whichever insert won.
    pub fn ensure_field(&self, ns: &Namespace, path: &str) -> Result<FieldId> {
        let tree = self.tree(ns)?;
        loop {
            if let Some(raw) = tree.get(path)? {
                return expect_field(path, decode(path, &raw)?);
            }
            let candidate = self.next_field_id(ns)?;
            match tree.compare_and_swap(path, None as Option<&[u8]>, Some(&candidate.to_be_bytes()[..]))? {
                Ok(()) => {
                    tracing::debug!(namespace = %ns, path, field_id = candidate, "field registered");
                    return Ok(candidate);
                }
                Err(lost) => {
                    if let Some(raw) = lost.current {
                        return expect_field(path, decode(path, &raw)?);
                    }
                }
            }
        }
    }

    pub fn lookup_field(&self, ns: &Namespace, path: &str) -> Result<Option<FieldId>> {
        let Some(tree) = self.existing(ns)? else { return Ok(None) };
        match tree.get(path)? {
            Some(raw) => match decode(path, &raw)? {
                Entry::Field(id) => Ok(Some(id)),
                Entry::Group => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Record `path` as a grouping node. Fails if it is already a field.
    pub fn ensure_group(&self, ns: &Namespace, path: &str) -> Result<()> {
        let tree = self.tree(ns)?;
        let current = match tree.compare_and_swap(path, None as Option<&[u8]>, Some(&b""[..]))? {
            Ok(()) => return Ok(()),
            Err(lost) => lost.current,
        };
        match current.map(|raw| decode(path, &raw)).transpose()? {
            Some(Entry::Field(_)) => Err(EngineError::Structure(format!(
                "{path} is an indexed field, it cannot hold nested values"
            ))),
            _ => Ok(()),
        }
    }

    /// Every field of `ns` ordered by id.
    pub fn fields(&self, ns: &Namespace) -> Result<Vec<(String, FieldId)>> {
        let mut out = Vec::new();
        let Some(tree) = self.existing(ns)? else { return Ok(out) };
        for item in tree.iter() {
            let (key, raw) = item?;
            let path = String::from_utf8_lossy(&key).into_owned();
            if let Entry::Field(id) = decode(&path, &raw)? {
                out.push((path, id));
            }
        }
        out.sort_by_key(|(_, id)| *id);
        Ok(out)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn next_field_id(&self, ns: &Namespace) -> Result<FieldId> {
        let id = next_id(&self.db, ns.tree_name().as_bytes())?;
        FieldId::try_from(id).map_err(|_| EngineError::Corrupt(format!("field id space of {ns} exhausted")))
    }
}

fn decode(path: &str, raw: &[u8]) -> Result<Entry> {
    match raw.len() {
        0 => Ok(Entry::Group),
        4 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(raw);
            Ok(Entry::Field(FieldId::from_be_bytes(buf)))
        }
        n => Err(EngineError::Corrupt(format!("catalog entry for {path} has {n} bytes"))),
    }
}

fn expect_field(path: &str, entry: Entry) -> Result<FieldId> {
    match entry {
        Entry::Field(id) => Ok(id),
        Entry::Group => Err(EngineError::Structure(format!(
            "{path} holds nested values in earlier documents, it cannot be a text field"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn ns(index: &str) -> Namespace {
        Namespace::new(index, "doc").unwrap()
    }

    #[test]
    fn ensure_is_idempotent() {
        let dir = tempdir().unwrap();
        let catalog = FieldCatalog::open(dir.path()).unwrap();
        let a = catalog.ensure_field(&ns("t"), "a.b").unwrap();
        let b = catalog.ensure_field(&ns("t"), "a.b").unwrap();
        assert_eq!(a, b);
        assert_eq!(catalog.lookup_field(&ns("t"), "a.b").unwrap(), Some(a));
        assert_eq!(catalog.lookup_field(&ns("t"), "missing").unwrap(), None);
    }

    #[test]
    fn ids_increase_per_namespace() {
        let dir = tempdir().unwrap();
        let catalog = FieldCatalog::open(dir.path()).unwrap();
        assert_eq!(catalog.ensure_field(&ns("t"), "a").unwrap(), 1);
        assert_eq!(catalog.ensure_field(&ns("t"), "b").unwrap(), 2);
        assert_eq!(catalog.ensure_field(&ns("u"), "b").unwrap(), 1);
        assert_eq!(catalog.fields(&ns("t")).unwrap(), vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn shape_conflicts_are_rejected() {
        let dir = tempdir().unwrap();
        let catalog = FieldCatalog::open(dir.path()).unwrap();
        catalog.ensure_field(&ns("t"), "a").unwrap();
        assert!(matches!(catalog.ensure_group(&ns("t"), "a"), Err(EngineError::Structure(_))));

        catalog.ensure_group(&ns("t"), "b").unwrap();
        catalog.ensure_group(&ns("t"), "b").unwrap();
        assert!(matches!(catalog.ensure_field(&ns("t"), "b"), Err(EngineError::Structure(_))));
        assert_eq!(catalog.lookup_field(&ns("t"), "b").unwrap(), None);
        assert_eq!(catalog.fields(&ns("t")).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_registration_yields_one_id() {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(FieldCatalog::open(dir.path()).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let catalog = catalog.clone();
                std::thread::spawn(move || catalog.ensure_field(&ns("t"), "title").unwrap())
            })
            .collect();
        let ids: Vec<FieldId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(catalog.fields(&ns("t")).unwrap().len(), 1);
    }

    #[test]
    fn lookups_on_unknown_namespaces_create_nothing() {
        let dir = tempdir().unwrap();
        let catalog = FieldCatalog::open(dir.path()).unwrap();
        let before = catalog.db.tree_names().len();
        for i in 0..50 {
            assert_eq!(catalog.lookup_field(&ns(&format!("ghost{i}")), "a").unwrap(), None);
            assert!(catalog.fields(&ns(&format!("ghost{i}"))).unwrap().is_empty());
        }
        assert_eq!(catalog.db.tree_names().len(), before);

        catalog.ensure_field(&ns("real"), "a").unwrap();
        assert_eq!(catalog.db.tree_names().len(), before + 1);
    }
}
