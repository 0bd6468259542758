use crate::persist::existing_tree;
use crate::{Namespace, Result, ShardId};
use std::path::Path;

/// Term -> postings shard id, one sled tree per namespace.
///
/// The stored shard id is the source of truth once a term is registered, even
/// though the first value is derived from the term itself.
pub struct TermDictionary {
    db: sled::Db,
}

impl TermDictionary {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Ok(Self { db: sled::open(dir)? })
    }

    fn tree(&self, ns: &Namespace) -> Result<sled::Tree> {
        Ok(self.db.open_tree(ns.tree_name())?)
    }

    /// Shard id of `term`, registering it if needed. The flag is true when this
    /// call performed the registration.
    pub fn ensure_term(&self, ns: &Namespace, term: &str) -> Result<(ShardId, bool)> {
        let tree = self.tree(ns)?;
        if let Some(raw) = tree.get(term)? {
            return Ok((decode(&raw)?, false));
        }
        let shard = ShardId::derive(ns, term);
        match tree.compare_and_swap(term, None as Option<&[u8]>, Some(shard.as_str().as_bytes()))? {
            Ok(()) => Ok((shard, true)),
            // lost a race with another first registration; theirs stands
            Err(lost) => match lost.current {
                Some(raw) => Ok((decode(&raw)?, false)),
                None => Ok((shard, false)),
            },
        }
    }

    pub fn lookup_term(&self, ns: &Namespace, term: &str) -> Result<Option<ShardId>> {
        let Some(tree) = existing_tree(&self.db, &ns.tree_name())? else { return Ok(None) };
        tree.get(term)?.map(|raw| decode(&raw)).transpose()
    }

    pub fn len(&self, ns: &Namespace) -> Result<usize> {
        Ok(existing_tree(&self.db, &ns.tree_name())?.map_or(0, |tree| tree.len()))
    }

    pub fn is_empty(&self, ns: &Namespace) -> Result<bool> {
        Ok(self.len(ns)? == 0)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode(raw: &[u8]) -> Result<ShardId> {
    ShardId::parse(&String::from_utf8_lossy(raw))
}
