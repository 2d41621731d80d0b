use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use cloudup_core::{StorageType, UploadMethod};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use super::error::UploadError;
use super::paths::{join_remote, parent_of};
use super::sampler::SpeedMode;

pub type ItemId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Processing,
    Uploading,
    Success,
    Error,
    Conflict,
    Canceled,
    Resumable,
}

impl UploadStatus {
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        matches!(
            (self, next),
            (Pending, Processing | Canceled)
                | (Processing, Uploading | Error | Conflict | Canceled)
                | (Uploading, Success | Error | Canceled)
                | (Error, Pending | Canceled)
                | (Conflict, Pending | Canceled)
                | (Resumable, Pending | Canceled)
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(
            self,
            UploadStatus::Success | UploadStatus::Error | UploadStatus::Canceled
        )
    }
}

#[derive(Clone)]
enum FileSource {
    Path(PathBuf),
    Memory(Arc<[u8]>),
    Placeholder,
}

#[derive(Clone)]
pub struct FileHandle {
    name: String,
    size: u64,
    source: FileSource,
}

impl FileHandle {
    pub async fn open(path: &Path) -> io::Result<Self> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            size: meta.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            source: FileSource::Memory(bytes),
        }
    }

    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            source: FileSource::Placeholder,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.source, FileSource::Placeholder)
    }

    pub async fn read_range(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        match &self.source {
            FileSource::Path(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(offset)).await?;
                let mut buf = Vec::with_capacity(len as usize);
                file.take(len).read_to_end(&mut buf).await?;
                if (buf.len() as u64) < len {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} shrank while uploading", path.display()),
                    ));
                }
                Ok(buf)
            }
            FileSource::Memory(bytes) => {
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(bytes.len());
                let end = usize::try_from(offset.saturating_add(len))
                    .unwrap_or(usize::MAX)
                    .min(bytes.len());
                Ok(bytes[start..end].to_vec())
            }
            FileSource::Placeholder => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} must be selected again before uploading", self.name),
            )),
        }
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            FileSource::Path(path) => path.display().to_string(),
            FileSource::Memory(_) => "<memory>".to_string(),
            FileSource::Placeholder => "<placeholder>".to_string(),
        };
        f.debug_struct("FileHandle")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("source", &source)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct UploadItem {
    pub id: ItemId,
    pub name: String,
    pub size: u64,
    pub status: UploadStatus,
    pub file: FileHandle,
    pub relative_path: String,
    pub target_path: String,
    pub uploaded_size: u64,
    pub instant_speed: f64,
    pub average_speed: f64,
    pub start_time: Option<Instant>,
    pub last_time: Option<Instant>,
    pub last_size: u64,
    pub session_id: Option<String>,
    pub upload_method: UploadMethod,
    pub upload_url: Option<String>,
    pub content_type: Option<String>,
    pub storage_type: Option<StorageType>,
    pub policy_id: Option<String>,
    pub chunk_size: Option<u64>,
    pub total_chunks: Option<u32>,
    pub uploaded_chunks: BTreeSet<u32>,
    pub overwrite: bool,
    pub error_message: Option<String>,
    pub needs_refresh: bool,
    pub is_resuming: bool,
    pub(crate) cancel: CancellationToken,
}

impl UploadItem {
    pub fn new(
        id: ItemId,
        file: FileHandle,
        relative_path: String,
        target_path: String,
        policy_id: Option<String>,
        overwrite: bool,
    ) -> Self {
        let name = super::paths::file_name_of(&relative_path).to_string();
        Self {
            id,
            name,
            size: file.size(),
            status: UploadStatus::Pending,
            file,
            relative_path,
            target_path,
            uploaded_size: 0,
            instant_speed: 0.0,
            average_speed: 0.0,
            start_time: None,
            last_time: None,
            last_size: 0,
            session_id: None,
            upload_method: UploadMethod::Server,
            upload_url: None,
            content_type: None,
            storage_type: None,
            policy_id,
            chunk_size: None,
            total_chunks: None,
            uploaded_chunks: BTreeSet::new(),
            overwrite,
            error_message: None,
            needs_refresh: false,
            is_resuming: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn full_path(&self) -> String {
        join_remote(&self.target_path, &self.relative_path)
    }

    pub fn parent_path(&self) -> String {
        parent_of(&self.full_path())
    }

    pub fn matches_key(&self, target_path: &str, relative_path: &str) -> bool {
        self.target_path == target_path && self.relative_path == relative_path
    }

    pub fn set_status(&mut self, next: UploadStatus) -> Result<(), UploadError> {
        if !self.status.can_transition_to(next) {
            return Err(UploadError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn reset_transfer(&mut self) {
        self.session_id = None;
        self.upload_method = UploadMethod::Server;
        self.upload_url = None;
        self.content_type = None;
        self.storage_type = None;
        self.chunk_size = None;
        self.total_chunks = None;
        self.uploaded_chunks.clear();
        self.uploaded_size = 0;
        self.instant_speed = 0.0;
        self.average_speed = 0.0;
        self.start_time = None;
        self.last_time = None;
        self.last_size = 0;
        self.error_message = None;
        self.is_resuming = false;
        self.cancel = CancellationToken::new();
    }

    pub fn display_speed(&self, mode: SpeedMode) -> f64 {
        match mode {
            SpeedMode::Instant => self.instant_speed,
            SpeedMode::Average => self.average_speed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(relative: &str, target: &str) -> UploadItem {
        UploadItem::new(
            1,
            FileHandle::from_bytes("x", vec![0u8; 10]),
            relative.into(),
            target.into(),
            None,
            false,
        )
    }

    #[test]
    fn state_machine_allows_happy_path() {
        let mut item = item("a.txt", "/");
        item.set_status(UploadStatus::Processing).unwrap();
        item.set_status(UploadStatus::Uploading).unwrap();
        item.set_status(UploadStatus::Success).unwrap();
        assert_eq!(item.status, UploadStatus::Success);
    }

    #[test]
    fn state_machine_rejects_skipping_negotiation() {
        let mut item = item("a.txt", "/");
        let err = item.set_status(UploadStatus::Uploading).unwrap_err();
        assert!(matches!(
            err,
            UploadError::InvalidTransition {
                from: UploadStatus::Pending,
                to: UploadStatus::Uploading
            }
        ));
        assert_eq!(item.status, UploadStatus::Pending);
    }

    #[test]
    fn canceled_is_terminal() {
        assert!(!UploadStatus::Canceled.can_transition_to(UploadStatus::Pending));
        assert!(!UploadStatus::Success.can_transition_to(UploadStatus::Canceled));
        assert!(UploadStatus::Resumable.can_transition_to(UploadStatus::Pending));
    }

    #[test]
    fn name_and_paths_derive_from_relative_path() {
        let item = item("photos/2024/a.jpg", "/albums");
        assert_eq!(item.name, "a.jpg");
        assert_eq!(item.full_path(), "/albums/photos/2024/a.jpg");
        assert_eq!(item.parent_path(), "/albums/photos/2024");
    }

    #[test]
    fn reset_transfer_clears_chunks_and_session() {
        let mut item = item("a.txt", "/");
        item.session_id = Some("s".into());
        item.total_chunks = Some(3);
        item.uploaded_chunks.extend([0, 1]);
        item.uploaded_size = 7;
        item.error_message = Some("boom".into());
        item.reset_transfer();
        assert!(item.session_id.is_none());
        assert!(item.uploaded_chunks.is_empty());
        assert_eq!(item.uploaded_size, 0);
        assert!(item.error_message.is_none());
    }

    #[tokio::test]
    async fn memory_handle_reads_clamped_ranges() {
        let handle = FileHandle::from_bytes("m.bin", b"abcdefgh".to_vec());
        assert_eq!(handle.read_range(2, 3).await.unwrap(), b"cde");
        assert_eq!(handle.read_range(6, 10).await.unwrap(), b"gh");
    }

    #[tokio::test]
    async fn path_handle_reads_requested_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"0123456789").unwrap();
        let handle = FileHandle::open(&path).await.unwrap();
        assert_eq!(handle.name(), "f.bin");
        assert_eq!(handle.size(), 10);
        assert_eq!(handle.read_range(4, 4).await.unwrap(), b"4567");
    }

    #[tokio::test]
    async fn placeholder_cannot_be_read() {
        let handle = FileHandle::placeholder("gone.iso");
        assert!(handle.is_placeholder());
        assert!(handle.read_range(0, 1).await.is_err());
    }
}
