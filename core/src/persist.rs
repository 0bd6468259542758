use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, create_dir_all, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub const LAYOUT_VERSION: u32 = 1;
pub const DEFAULT_MAX_DEPTH: usize = 3;
pub const DEFAULT_LOCK_STRIPES: usize = 1024;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of the on-disk layout.
    pub data_dir: PathBuf,
    /// Maximum number of segments in a flattened field path.
    pub max_depth: usize,
    /// Size of the postings lock table; rounded up to a power of two.
    pub lock_stripes: usize,
    /// Create all 65,536 postings buckets when the engine opens.
    pub precreate_buckets: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            max_depth: DEFAULT_MAX_DEPTH,
            lock_stripes: DEFAULT_LOCK_STRIPES,
            precreate_buckets: false,
        }
    }
}

impl EngineConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self { data_dir: data_dir.as_ref().to_path_buf(), ..Self::default() }
    }
    pub fn with_max_depth(mut self, max_depth: usize) -> Self { self.max_depth = max_depth; self }
    pub fn with_lock_stripes(mut self, stripes: usize) -> Self { self.lock_stripes = stripes; self }
    pub fn with_precreate_buckets(mut self, yes: bool) -> Self { self.precreate_buckets = yes; self }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut f = File::open(path)?;
        let mut buf = String::new();
        f.read_to_string(&mut buf)?;
        Ok(serde_json::from_str(&buf)?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetaFile {
    pub version: u32,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn documents(&self) -> PathBuf { self.root.join("document") }
    pub fn fields(&self) -> PathBuf { self.root.join("field") }
    pub fn dictionary(&self) -> PathBuf { self.root.join("dictionary") }
    pub fn inverted(&self) -> PathBuf { self.root.join("inverted") }
    fn meta(&self) -> PathBuf { self.root.join("meta.json") }

    pub fn create_layout(&self) -> Result<()> {
        for dir in [self.documents(), self.fields(), self.dictionary(), self.inverted()] {
            create_dir_all(dir)?;
        }
        Ok(())
    }
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let json = serde_json::to_string_pretty(meta)?;
    write_atomic(&paths.meta(), json.as_bytes())
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta())?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    Ok(meta)
}

/// Writes `meta.json` on first open and rejects layouts from another version.
pub fn ensure_meta(paths: &IndexPaths) -> Result<MetaFile> {
    match load_meta(paths) {
        Ok(meta) if meta.version == LAYOUT_VERSION => Ok(meta),
        Ok(meta) => Err(EngineError::IncompatibleLayout { expected: LAYOUT_VERSION, found: meta.version }),
        Err(EngineError::Io(e)) if e.kind() == ErrorKind::NotFound => {
            let meta = MetaFile {
                version: LAYOUT_VERSION,
                created_at: time::OffsetDateTime::now_utc()
                    .format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_default(),
            };
            save_meta(paths, &meta)?;
            Ok(meta)
        }
        Err(e) => Err(e),
    }
}

/// Replace `target` with `bytes` without a reader ever seeing a partial file:
/// write a sibling temp file, sync it, rename over the target.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| EngineError::NotFound(format!("parent directory of {}", target.display())))?;
    create_dir_all(dir)?;
    let file_name = target.file_name().and_then(|s| s.to_str()).unwrap_or("file");
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = dir.join(format!(".{file_name}.{}.{seq}.tmp", std::process::id()));
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, target) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Read a whole file, `None` if it doesn't exist.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| EngineError::Corrupt(format!("expected 8 byte id, got {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

/// Atomically bump the counter stored under `key` and return the new value.
/// The first value handed out is 1.
pub(crate) fn next_id(tree: &sled::Tree, key: &[u8]) -> Result<u64> {
    let updated = tree.update_and_fetch(key, |old| {
        let current = old.and_then(|b| <[u8; 8]>::try_from(b).ok()).map(u64::from_be_bytes).unwrap_or(0);
        Some(current.saturating_add(1).to_be_bytes().to_vec())
    })?;
    match updated {
        Some(bytes) => decode_u64(&bytes),
        None => Err(EngineError::Corrupt(format!("counter {} vanished", String::from_utf8_lossy(key)))),
    }
}

/// Open `name` only if it already exists. `sled::Db::open_tree` creates the
/// tree on demand, which read paths must not do.
pub(crate) fn existing_tree(db: &sled::Db, name: &str) -> Result<Option<sled::Tree>> {
    if db.tree_names().iter().any(|n| n.as_ref() == name.as_bytes()) {
        Ok(Some(db.open_tree(name)?))
    } else {
        Ok(None)
    }
}
