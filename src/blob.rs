//! Backing storage for payload bytes, one location per stored object.

use crate::allocator::IdAllocator;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Where payload bytes live. A location is an identifier handed out by the
/// allocator; the store never interprets it beyond that.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Claims a fresh location. Fails with `ErrorKind::AlreadyExists` if the
    /// location is already taken.
    async fn create(&self, location: &str) -> io::Result<()>;

    /// Writes `data` under `filename` inside a claimed location and makes it
    /// durable before returning.
    async fn write(&self, location: &str, filename: &str, data: &[u8]) -> io::Result<()>;

    /// Removes a location and everything in it.
    async fn delete_all(&self, location: &str) -> io::Result<()>;

    /// Removes every location left behind by an earlier run. Anything that
    /// is not an allocated location is left alone. Returns how many were
    /// removed.
    async fn purge_all(&self) -> io::Result<usize>;
}

/// Filesystem store: one directory per location under `root`, holding the
/// payload under its public filename.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn init(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    // SECURITY: locations and filenames must be single path components so
    // nothing can be written or deleted outside the root
    fn component<'a>(value: &'a str, what: &str) -> io::Result<&'a str> {
        let valid = !value.is_empty()
            && value != "."
            && value != ".."
            && !value.contains(['/', '\\', '\0']);
        if valid {
            Ok(value)
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid {what}: {value:?}"),
            ))
        }
    }

    fn location_path(&self, location: &str) -> io::Result<PathBuf> {
        Ok(self.root.join(Self::component(location, "location")?))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn create(&self, location: &str) -> io::Result<()> {
        fs::create_dir(self.location_path(location)?).await
    }

    async fn write(&self, location: &str, filename: &str, data: &[u8]) -> io::Result<()> {
        let path = self
            .location_path(location)?
            .join(Self::component(filename, "filename")?);

        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn delete_all(&self, location: &str) -> io::Result<()> {
        fs::remove_dir_all(self.location_path(location)?).await
    }

    async fn purge_all(&self) -> io::Result<usize> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let allocated = entry.file_name().to_str().is_some_and(IdAllocator::is_allocated);
            if !allocated || !entry.file_type().await?.is_dir() {
                tracing::debug!(
                    path = %entry.path().display(),
                    "Leaving foreign entry in storage root"
                );
                continue;
            }
            fs::remove_dir_all(entry.path()).await?;
            removed += 1;
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_delete_location() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());

        blobs.create("loc").await.unwrap();
        blobs.write("loc", "hello.txt", b"hi there").await.unwrap();
        let on_disk = std::fs::read(dir.path().join("loc").join("hello.txt")).unwrap();
        assert_eq!(on_disk, b"hi there");

        blobs.delete_all("loc").await.unwrap();
        assert!(!dir.path().join("loc").exists());
    }

    #[tokio::test]
    async fn create_refuses_taken_location() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());

        blobs.create("loc").await.unwrap();
        let err = blobs.create("loc").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn deleting_missing_location_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());

        let err = blobs.delete_all("gone").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn rejects_components_that_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());

        for bad in ["..", "a/b", "", "."] {
            let err = blobs.create(bad).await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{bad:?}");
        }

        blobs.create("loc").await.unwrap();
        let err = blobs.write("loc", "../escape", b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn purge_removes_only_allocated_locations() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        let blobs = FsBlobStore::new(&root);
        blobs.init().await.unwrap();

        let one = IdAllocator.allocate();
        let two = IdAllocator.allocate();
        blobs.create(&one).await.unwrap();
        blobs.write(&one, "f", b"1").await.unwrap();
        blobs.create(&two).await.unwrap();

        std::fs::write(root.join("thesis.pdf"), b"x").unwrap();
        std::fs::create_dir(root.join(".git")).unwrap();
        std::fs::write(root.join(".git").join("HEAD"), b"ref").unwrap();
        // Allocator-shaped but a plain file
        std::fs::write(root.join(IdAllocator.allocate()), b"x").unwrap();

        assert_eq!(blobs.purge_all().await.unwrap(), 2);
        assert!(!root.join(&one).exists());
        assert!(!root.join(&two).exists());
        assert!(root.join("thesis.pdf").exists());
        assert!(root.join(".git").join("HEAD").exists());
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 3);
    }
}
