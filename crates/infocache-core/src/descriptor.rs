//! Resource descriptors held by the cache
//!
//! The cache does not interpret descriptor contents. It only needs to ask a
//! descriptor to re-read its external state in place, and it observes how
//! many owners a handle has through `Arc::strong_count`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Object describing a resource's attributes.
///
/// Implementations use interior mutability: `refresh` is called through a
/// shared handle while other holders may be reading.
pub trait Descriptor: Send + Sync + 'static {
    /// Re-read external state in place
    fn refresh(&self) -> Result<()>;
}

/// Shared-ownership handle to a descriptor (cache + external consumers)
pub type MetadataHandle<D> = Arc<D>;

/// Attributes of a local file captured at the last refresh
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileSnapshot {
    pub exists: bool,
    pub is_dir: bool,
    pub len: u64,
    pub readonly: bool,
    pub modified: Option<DateTime<Utc>>,
}

/// Descriptor for a `file://` resource backed by `std::fs::metadata`
#[derive(Debug)]
pub struct FileDescriptor {
    path: PathBuf,
    snapshot: RwLock<FileSnapshot>,
}

impl FileDescriptor {
    /// Create a descriptor and read its initial state.
    ///
    /// A missing file is not an error: the snapshot reports `exists == false`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = read_snapshot(&path)?;
        Ok(Self {
            path,
            snapshot: RwLock::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> FileSnapshot {
        self.snapshot.read().clone()
    }
}

impl Descriptor for FileDescriptor {
    fn refresh(&self) -> Result<()> {
        let snapshot = read_snapshot(&self.path)?;
        *self.snapshot.write() = snapshot;
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> Result<FileSnapshot> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FileSnapshot::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to stat {}", path.display()));
        }
    };

    Ok(FileSnapshot {
        exists: true,
        is_dir: meta.is_dir(),
        len: meta.len(),
        readonly: meta.permissions().readonly(),
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
    })
}
