//! Disk-backed cache store
//!
//! One regular file per entry, named after its cache key, directly under the
//! root directory. The directory listing is the index. New entries are
//! written to a hidden temporary file and linked into place only once the
//! whole body has been flushed, so a reader never sees a partial entry and
//! concurrent writers of the same key converge on a single complete file.

use crate::error::{Result, TentaError};
use crate::tee::{ClientSender, TeeWriter};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info, warn};

/// Prefix of in-progress writes; such files are never entries
pub const TEMP_PREFIX: &str = ".tenta-";

/// Permission bits of a stored entry
#[cfg(unix)]
const ENTRY_MODE: u32 = 0o644;

/// Metadata of a stored entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub size: u64,
    pub modified_at: SystemTime,
}

/// Outcome of a streamed write
#[derive(Debug)]
pub enum WriteOutcome {
    /// A new entry of this many bytes was created
    Stored(u64),
    /// Another writer created the entry first; the body was still served
    AlreadyStored(u64),
    /// The body was served but could not be persisted
    NotStored { bytes: u64, error: TentaError },
}

/// Disk cache rooted at a single directory
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Open the store, creating the root directory if needed
    ///
    /// Leftover temporary files from an interrupted run are removed.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            TentaError::StoreIoError(format!(
                "Failed to create cache directory {}: {}",
                root.display(),
                e
            ))
        })?;

        let store = CacheStore { root };
        let removed = store.remove_stale_temp_files().await?;
        if removed > 0 {
            info!("Removed {} interrupted cache writes", removed);
        }
        Ok(store)
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing `key`
    ///
    /// Keys must be plain file names so that they cannot escape the root.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains('/')
            || key.contains('\\')
            || key.contains('\0')
        {
            return Err(TentaError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    /// Check whether an entry exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(TentaError::StoreIoError(format!(
                "Failed to check {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Read the full content of an entry
    pub async fn read(&self, key: &str) -> Result<Bytes> {
        let path = self.path_for(key)?;
        let data = fs::read(&path).await?;
        Ok(Bytes::from(data))
    }

    /// Metadata of a single entry
    pub async fn stat(&self, key: &str) -> Result<CacheEntry> {
        let path = self.path_for(key)?;
        let meta = fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(TentaError::NotFound(key.to_string()));
        }
        Ok(CacheEntry {
            key: key.to_string(),
            size: meta.len(),
            modified_at: meta.modified()?,
        })
    }

    /// Stream `source` to the client and into a new entry for `key`
    ///
    /// The client receives each chunk as soon as it arrives from `source`.
    /// If the cache file cannot be created or written, the copy continues
    /// for the client and the failure is reported in [`WriteOutcome::NotStored`].
    ///
    /// # Errors
    /// * `TransportError` when `source` fails mid-body; the client response
    ///   is aborted and nothing is stored
    /// * `InternalError` when the client disconnects before the body ends
    pub async fn write_streaming<S>(
        &self,
        key: &str,
        mut source: S,
        client: &mut ClientSender,
    ) -> Result<WriteOutcome>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        let dest = self.path_for(key)?;

        let (file, temp_path) = match self.create_temp_file().await {
            Ok((file, temp_path)) => (Some(file), Some(temp_path)),
            Err(e) => {
                warn!("Error creating local file for {}, serving uncached: {}", key, e);
                (None, None)
            }
        };

        let mut tee = TeeWriter::new(client, file);
        while let Some(chunk) = source.next().await {
            match chunk {
                Ok(chunk) => {
                    if tee.write(chunk).await.is_err() {
                        debug!("Client went away while streaming {}", key);
                        return Err(TentaError::InternalError(
                            "client disconnected".to_string(),
                        ));
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    tee.abort(e).await;
                    return Err(TentaError::TransportError(message));
                }
            }
        }

        let summary = tee.finish().await;
        let bytes = summary.bytes;

        let temp_path = match (temp_path, summary.stored) {
            (Some(temp_path), Ok(())) => temp_path,
            (_, Err(e)) => {
                return Ok(WriteOutcome::NotStored {
                    bytes,
                    error: TentaError::StoreIoError(e.to_string()),
                })
            }
            (None, Ok(())) => {
                return Ok(WriteOutcome::NotStored {
                    bytes,
                    error: TentaError::StoreIoError("no cache file".to_string()),
                })
            }
        };

        match temp_path.persist_noclobber(&dest) {
            Ok(()) => {
                debug!("Created cache file {} ({} bytes)", dest.display(), bytes);
                Ok(WriteOutcome::Stored(bytes))
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Cache file {} was created by a concurrent request", dest.display());
                Ok(WriteOutcome::AlreadyStored(bytes))
            }
            Err(e) => Ok(WriteOutcome::NotStored {
                bytes,
                error: TentaError::StoreIoError(e.error.to_string()),
            }),
        }
    }

    /// Delete an entry, returning the number of bytes freed
    pub async fn delete(&self, key: &str) -> Result<u64> {
        let entry = self.stat(key).await?;
        let path = self.path_for(key)?;
        fs::remove_file(&path).await?;
        debug!("Deleted cache file {}", path.display());
        Ok(entry.size)
    }

    /// List every entry in the store
    ///
    /// Entries that disappear while the directory is being walked are skipped.
    pub async fn list(&self) -> Result<Vec<CacheEntry>> {
        let mut dir = fs::read_dir(&self.root).await.map_err(|e| {
            TentaError::StoreIoError(format!(
                "Error reading cache dir {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let mut entries = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let name = match item.file_name().into_string() {
                Ok(name) if !name.starts_with('.') => name,
                _ => continue,
            };

            let meta = match item.metadata().await {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !meta.is_file() {
                continue;
            }

            entries.push(CacheEntry {
                key: name,
                size: meta.len(),
                modified_at: meta.modified()?,
            });
        }

        Ok(entries)
    }

    async fn create_temp_file(&self) -> Result<(fs::File, tempfile::TempPath)> {
        let root = self.root.clone();
        let named = tokio::task::spawn_blocking(move || {
            let named = tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile_in(root)?;
            // tempfile creates 0600; entries get ordinary file permissions
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                named
                    .as_file()
                    .set_permissions(std::fs::Permissions::from_mode(ENTRY_MODE))?;
            }
            Ok::<_, io::Error>(named)
        })
        .await
        .map_err(|e| TentaError::InternalError(e.to_string()))??;

        let (file, temp_path) = named.into_parts();
        Ok((fs::File::from_std(file), temp_path))
    }

    async fn remove_stale_temp_files(&self) -> Result<usize> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut removed = 0;
        while let Some(item) = dir.next_entry().await? {
            let is_temp = item
                .file_name()
                .to_str()
                .map(|name| name.starts_with(TEMP_PREFIX))
                .unwrap_or(false);
            if is_temp {
                match fs::remove_file(item.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove {}: {}", item.path().display(), e),
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tee::client_channel;
    use futures::stream;

    fn body(chunks: &[&'static [u8]]) -> impl Stream<Item = io::Result<Bytes>> + Unpin {
        stream::iter(
            chunks
                .iter()
                .map(|c| Ok::<_, io::Error>(Bytes::from_static(*c)))
                .collect::<Vec<_>>(),
        )
    }

    async fn drain(rx: crate::tee::ClientReceiver) -> Vec<u8> {
        let frames: Vec<_> = rx.collect().await;
        let mut out = Vec::new();
        for frame in frames {
            if let Ok(data) = frame.unwrap().into_data() {
                out.extend_from_slice(&data);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();

        assert!(!store.exists("123").await.unwrap());
        assert!(store.read("123").await.unwrap_err().is_not_found());
        assert!(store.delete("123").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let (mut tx, rx) = client_channel();
        let reader = tokio::spawn(drain(rx));

        let outcome = store
            .write_streaming("42", body(&[b"hel", b"lo"]), &mut tx)
            .await
            .unwrap();
        drop(tx);

        assert!(matches!(outcome, WriteOutcome::Stored(5)));
        assert_eq!(reader.await.unwrap(), b"hello");
        assert!(store.exists("42").await.unwrap());
        assert_eq!(store.read("42").await.unwrap(), Bytes::from_static(b"hello"));

        let entries = store.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "42");
        assert_eq!(entries[0].size, 5);
    }

    #[tokio::test]
    async fn test_existing_entry_is_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("7"), b"first").await.unwrap();

        let (mut tx, rx) = client_channel();
        let reader = tokio::spawn(drain(rx));
        let outcome = store
            .write_streaming("7", body(&[b"second"]), &mut tx)
            .await
            .unwrap();
        drop(tx);

        assert!(matches!(outcome, WriteOutcome::AlreadyStored(6)));
        assert_eq!(reader.await.unwrap(), b"second");
        assert_eq!(store.read("7").await.unwrap(), Bytes::from_static(b"first"));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_source_error_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let (mut tx, rx) = client_channel();
        let reader = tokio::spawn(async move { rx.collect::<Vec<_>>().await });

        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"par")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let result = store.write_streaming("9", source, &mut tx).await;
        drop(tx);

        assert!(matches!(result, Err(TentaError::TransportError(_))));
        let frames = reader.await.unwrap();
        assert!(frames.last().unwrap().is_err());
        assert!(!store.exists("9").await.unwrap());
        assert!(store.list().await.unwrap().is_empty());

        let mut dir_items = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(dir_items.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_returns_size() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("1"), b"abcdef").await.unwrap();

        assert_eq!(store.delete("1").await.unwrap(), 6);
        assert!(!store.exists("1").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();

        for key in ["", "../etc/passwd", "a/b", ".hidden", ".."] {
            assert!(matches!(
                store.read(key).await,
                Err(TentaError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_open_removes_stale_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(".tenta-abc123"), b"partial").await.unwrap();
        tokio::fs::write(dir.path().join("5"), b"kept").await.unwrap();

        let store = CacheStore::open(dir.path()).await.unwrap();

        assert!(!dir.path().join(".tenta-abc123").exists());
        let entries = store.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "5");
    }

    #[tokio::test]
    async fn test_list_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();

        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_root_still_serves_body() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        let store = CacheStore::open(&root).await.unwrap();
        std::fs::remove_dir(&root).unwrap();

        let (mut tx, rx) = client_channel();
        let reader = tokio::spawn(drain(rx));
        let outcome = store
            .write_streaming("11", body(&[b"he", b"llo"]), &mut tx)
            .await
            .unwrap();
        drop(tx);

        assert!(matches!(
            outcome,
            WriteOutcome::NotStored { bytes: 5, error: TentaError::StoreIoError(_) }
        ));
        assert_eq!(reader.await.unwrap(), b"hello");
        assert!(!store.exists("11").await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_entries_are_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let (mut tx, rx) = client_channel();
        let reader = tokio::spawn(drain(rx));

        store
            .write_streaming("12", body(&[b"data"]), &mut tx)
            .await
            .unwrap();
        drop(tx);
        reader.await.unwrap();

        let meta = std::fs::metadata(dir.path().join("12")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, ENTRY_MODE);
    }
}
