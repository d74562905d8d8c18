//! Persistent key-value store for DHT contents.

use std::fmt::Debug;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;

use crate::common::Id;

/// Maximum number of values held by a [MemStore].
pub const MAX_VALUES: usize = 1000;

/// Storage backing the values this node is responsible for.
pub trait Storage: Debug + Send {
    fn get(&mut self, target: &Id) -> std::io::Result<Option<Vec<u8>>>;

    fn put(&mut self, target: &Id, value: &[u8]) -> std::io::Result<()>;
}

#[derive(Debug)]
/// One file per target, named by its hex encoding, under the node's `data/` directory.
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        Ok(FsStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, target: &Id) -> PathBuf {
        self.dir.join(target.to_string())
    }
}

impl Storage for FsStore {
    fn get(&mut self, target: &Id) -> std::io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.path(target)) {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn put(&mut self, target: &Id, value: &[u8]) -> std::io::Result<()> {
        // Write then rename, so a reader never sees a partial value.
        let path = self.path(target);
        let partial = path.with_extension("partial");

        std::fs::write(&partial, value)?;
        std::fs::rename(partial, path)
    }
}

#[derive(Debug)]
/// In-memory store for ephemeral nodes, evicting the least recently used value.
pub struct MemStore {
    values: LruCache<Id, Vec<u8>>,
}

impl Default for MemStore {
    fn default() -> Self {
        let capacity = NonZeroUsize::new(MAX_VALUES).unwrap_or(NonZeroUsize::MIN);

        MemStore {
            values: LruCache::new(capacity),
        }
    }
}

impl Storage for MemStore {
    fn get(&mut self, target: &Id) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.values.get(target).cloned())
    }

    fn put(&mut self, target: &Id, value: &[u8]) -> std::io::Result<()> {
        self.values.put(*target, value.to_vec());
        Ok(())
    }
}
