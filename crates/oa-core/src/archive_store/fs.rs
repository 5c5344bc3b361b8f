//! Directory-backed archive store.

use super::{check_key, ArchiveStore, ArchiveStoreError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Archive store rooted at `<root>/<bucket>`.
///
/// Uploads copy into a temporary sibling and rename it into place, so readers
/// never observe a partially written object.
#[derive(Debug, Clone)]
pub struct FsArchiveStore {
    bucket_dir: PathBuf,
}

impl FsArchiveStore {
    pub fn new(root: &Path, bucket: &str) -> Self {
        Self {
            bucket_dir: root.join(bucket),
        }
    }

    /// Filesystem path of the object stored under `key`.
    pub fn object_path(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.bucket_dir.join(key))
    }
}

impl ArchiveStore for FsArchiveStore {
    fn store(&self, key: &str, path: &Path) -> Result<()> {
        let dest = self.object_path(key)?;
        let io_err = |source| ArchiveStoreError::Io {
            key: key.to_string(),
            source,
        };

        let parent = dest.parent().unwrap_or(&self.bucket_dir);
        fs::create_dir_all(parent).map_err(io_err)?;

        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = parent.join(format!(
            ".{}.{}.tmp",
            file_name,
            uuid::Uuid::new_v4().simple()
        ));

        let copied = fs::copy(path, &tmp)
            .and_then(|_| fs::File::open(&tmp)?.sync_all())
            .and_then(|_| fs::rename(&tmp, &dest));
        if let Err(e) = copied {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(e));
        }

        debug!(key, dest = %dest.display(), "Stored archive object");
        Ok(())
    }

    fn exists(&self, key: &str, expected_sha: Option<&str>) -> Result<bool> {
        let path = self.object_path(key)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(false),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(source) => {
                return Err(ArchiveStoreError::Io {
                    key: key.to_string(),
                    source,
                })
            }
        }

        if let Some(expected) = expected_sha {
            let actual = oa_bundle::sha256_file(&path).map_err(|source| ArchiveStoreError::Io {
                key: key.to_string(),
                source,
            })?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(ArchiveStoreError::ChecksumMismatch {
                    key: key.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        Ok(true)
    }

    fn describe(&self) -> String {
        format!("fs:{}", self.bucket_dir.display())
    }
}
