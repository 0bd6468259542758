use crate::persist::{read_optional, write_atomic};
use crate::{EngineError, Posting, PostingsList, Result, ShardId};
use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::DefaultHasher;
use std::fs::create_dir_all;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Encoded width of one posting: u64 doc id + u32 field id, bincode fixint.
pub const POSTING_WIDTH: usize = 12;
const ZSTD_LEVEL: i32 = 3;
const BUCKETS_PER_LEVEL: usize = 256;

/// Postings shards on disk, one file per term under `XX/YY/<id>.IF`.
///
/// Writers to the same shard are serialized through a striped lock table, so a
/// merge always sees the previous merge's result. Readers go lock-free: files
/// are only ever replaced by rename.
pub struct PostingsStore {
    root: PathBuf,
    stripes: Box<[Mutex<()>]>,
}

impl PostingsStore {
    pub fn new<P: AsRef<Path>>(root: P, stripes: usize) -> Self {
        let n = stripes.max(1).next_power_of_two();
        Self {
            root: root.as_ref().to_path_buf(),
            stripes: (0..n).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn root(&self) -> &Path { &self.root }

    pub fn shard_path(&self, shard: &ShardId) -> PathBuf {
        let (l1, l2) = shard.buckets();
        self.root.join(l1).join(l2).join(format!("{shard}.IF"))
    }

    pub fn exists(&self, shard: &ShardId) -> bool { self.shard_path(shard).is_file() }

    pub fn load(&self, shard: &ShardId) -> Result<PostingsList> {
        match read_optional(&self.shard_path(shard))? {
            Some(bytes) => decode(shard, &bytes),
            None => Err(EngineError::NotFound(format!("postings shard {shard}"))),
        }
    }

    /// Overwrite the shard with `list`.
    pub fn store(&self, shard: &ShardId, list: &PostingsList) -> Result<()> {
        let _guard = self.lock(shard);
        self.write(shard, list)
    }

    /// Union `additions` into the shard and return the merged list. A missing
    /// shard file counts as an empty list.
    pub fn merge<I>(&self, shard: &ShardId, additions: I) -> Result<PostingsList>
    where
        I: IntoIterator<Item = Posting>,
    {
        let _guard = self.lock(shard);
        let path = self.shard_path(shard);
        let existing = read_optional(&path)?;
        let existed = existing.is_some();
        let mut list = match existing {
            Some(bytes) => decode(shard, &bytes)?,
            None => PostingsList::new(),
        };
        let before = list.len();
        list.extend(additions);
        if list.len() != before || (!existed && !list.is_empty()) {
            self.write(shard, &list)?;
        }
        Ok(list)
    }

    /// Create all 256 x 256 leaf buckets up front. Returns how many were new.
    pub fn prepare_buckets(&self) -> Result<usize> {
        let mut created = 0;
        for l1 in 0..BUCKETS_PER_LEVEL {
            for l2 in 0..BUCKETS_PER_LEVEL {
                let dir = self.root.join(format!("{l1:02X}")).join(format!("{l2:02X}"));
                if !dir.is_dir() {
                    create_dir_all(&dir)?;
                    created += 1;
                }
            }
        }
        Ok(created)
    }

    fn write(&self, shard: &ShardId, list: &PostingsList) -> Result<()> {
        let bytes = encode(list)?;
        write_atomic(&self.shard_path(shard), &bytes)?;
        tracing::trace!(%shard, postings = list.len(), bytes = bytes.len(), "shard written");
        Ok(())
    }

    fn lock(&self, shard: &ShardId) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        shard.hash(&mut hasher);
        let slot = (hasher.finish() as usize) & (self.stripes.len() - 1);
        self.stripes[slot].lock()
    }
}

/// zstd over back-to-back fixed-width pairs, ascending, no length header.
pub fn encode(list: &PostingsList) -> Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(list.len() * POSTING_WIDTH);
    for posting in list {
        bincode::serialize_into(&mut raw, posting)?;
    }
    Ok(zstd::encode_all(&raw[..], ZSTD_LEVEL)?)
}

pub fn decode(shard: &ShardId, bytes: &[u8]) -> Result<PostingsList> {
    let raw = zstd::decode_all(bytes).map_err(|e| EngineError::Corrupt(format!("shard {shard}: {e}")))?;
    if raw.len() % POSTING_WIDTH != 0 {
        return Err(EngineError::Corrupt(format!("shard {shard}: {} trailing bytes", raw.len() % POSTING_WIDTH)));
    }
    let mut list = PostingsList::new();
    for chunk in raw.chunks_exact(POSTING_WIDTH) {
        list.insert(bincode::deserialize::<Posting>(chunk)?);
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Namespace;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn shard(term: &str) -> ShardId {
        ShardId::derive(&Namespace::new("test", "doc").unwrap(), term)
    }

    fn list(pairs: &[(u64, u32)]) -> PostingsList {
        pairs.iter().map(|&(d, f)| Posting::new(d, f)).collect()
    }

    #[test]
    fn store_then_load() {
        let dir = tempdir().unwrap();
        let store = PostingsStore::new(dir.path(), 16);
        let id = shard("search");
        let postings = list(&[(1, 2), (2, 3), (7, 1)]);
        store.store(&id, &postings).unwrap();
        assert_eq!(store.load(&id).unwrap(), postings);

        let path = store.shard_path(&id);
        let (l1, l2) = id.buckets();
        assert!(path.ends_with(format!("{l1}/{l2}/{id}.IF")));
    }

    #[test]
    fn missing_shard_is_not_found() {
        let dir = tempdir().unwrap();
        let store = PostingsStore::new(dir.path(), 16);
        assert!(matches!(store.load(&shard("nothing")), Err(EngineError::NotFound(_))));
        assert!(!store.exists(&shard("nothing")));
    }

    #[test]
    fn merge_unions_without_duplicates() {
        let dir = tempdir().unwrap();
        let store = PostingsStore::new(dir.path(), 16);
        let id = shard("like");
        store.merge(&id, list(&[(1, 1), (1, 2)])).unwrap();
        let merged = store.merge(&id, list(&[(1, 2), (2, 1)])).unwrap();
        assert_eq!(merged, list(&[(1, 1), (1, 2), (2, 1)]));
        assert_eq!(store.load(&id).unwrap(), merged);
    }

    #[test]
    fn encoding_is_fixed_width_pairs() {
        let raw = zstd::decode_all(&encode(&list(&[(1, 2), (3, 4)])).unwrap()[..]).unwrap();
        assert_eq!(raw.len(), 2 * POSTING_WIDTH);
        assert_eq!(&raw[..8], &1u64.to_le_bytes());
        assert_eq!(&raw[8..12], &2u32.to_le_bytes());
    }

    #[test]
    fn corrupt_shard_is_reported() {
        let dir = tempdir().unwrap();
        let store = PostingsStore::new(dir.path(), 16);
        let id = shard("broken");
        write_atomic(&store.shard_path(&id), b"not zstd").unwrap();
        assert!(matches!(store.load(&id), Err(EngineError::Corrupt(_))));
    }

    #[test]
    fn concurrent_merges_keep_every_posting() {
        let dir = tempdir().unwrap();
        let store = Arc::new(PostingsStore::new(dir.path(), 4));
        let id = shard("hot");
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let store = store.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    for i in 0..25u64 {
                        store.merge(&id, [Posting::new(t * 100 + i, 1)]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.load(&id).unwrap().len(), 200);
    }

    #[test]
    fn prepares_all_buckets_once() {
        let dir = tempdir().unwrap();
        let store = PostingsStore::new(dir.path(), 1);
        assert_eq!(store.prepare_buckets().unwrap(), 65_536);
        assert_eq!(store.prepare_buckets().unwrap(), 0);
        assert!(dir.path().join("FF").join("00").is_dir());
    }
}
