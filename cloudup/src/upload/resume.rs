use cloudup_core::{DirectoryObject, SessionStatus, UploadMethod};

use super::error::UploadError;
use super::item::{FileHandle, ItemId, UploadItem, UploadStatus};
use super::paths::normalize_remote;

pub const RESELECT_MESSAGE: &str = "select the original file again to resume this upload";

pub fn orphan_candidates(objects: &[DirectoryObject]) -> impl Iterator<Item = (&DirectoryObject, &str)> {
    objects.iter().filter_map(|object| {
        object
            .upload_session_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(|id| (object, id))
    })
}

/// Builds a parked item for a still-valid orphaned session. The local file
/// is unknown until the user selects it again, so a placeholder stands in.
pub fn resumable_item(
    id: ItemId,
    object: &DirectoryObject,
    session_id: &str,
    status: &SessionStatus,
    policy_id: Option<String>,
) -> UploadItem {
    let mut item = UploadItem::new(
        id,
        FileHandle::placeholder(object.name.clone()),
        object.name.clone(),
        normalize_remote(&object.path),
        policy_id,
        false,
    );
    item.size = object.size;
    item.status = UploadStatus::Resumable;
    item.session_id = Some(session_id.to_string());
    item.upload_method = UploadMethod::Server;
    item.chunk_size = Some(status.chunk_size);
    item.total_chunks = Some(status.total_chunks);
    item.uploaded_chunks = status
        .uploaded_chunks
        .iter()
        .copied()
        .filter(|index| *index < status.total_chunks)
        .collect();
    item.uploaded_size = (item.uploaded_chunks.len() as u64)
        .saturating_mul(status.chunk_size)
        .min(object.size);
    item.error_message = Some(RESELECT_MESSAGE.to_string());
    item.is_resuming = true;
    item
}

pub fn verify_fingerprint(item: &UploadItem, file: &FileHandle) -> Result<(), UploadError> {
    if file.name() == item.name && file.size() == item.size {
        return Ok(());
    }
    Err(UploadError::FingerprintMismatch {
        expected_name: item.name.clone(),
        expected_size: item.size,
        actual_name: file.name().to_string(),
        actual_size: file.size(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudup_core::ObjectType;

    fn orphan(size: u64) -> DirectoryObject {
        DirectoryObject {
            name: "movie.mkv".into(),
            path: "/videos".into(),
            object_type: ObjectType::File,
            size,
            upload_session_id: Some("s-42".into()),
        }
    }

    fn status(uploaded: Vec<u32>) -> SessionStatus {
        SessionStatus {
            is_valid: true,
            uploaded_chunks: uploaded,
            chunk_size: 100,
            total_chunks: 3,
        }
    }

    #[test]
    fn finds_objects_with_session_ids() {
        let mut plain = orphan(1);
        plain.upload_session_id = None;
        let mut blank = orphan(1);
        blank.upload_session_id = Some(String::new());
        let objects = vec![plain, orphan(250), blank];
        let found: Vec<_> = orphan_candidates(&objects).map(|(_, id)| id).collect();
        assert_eq!(found, vec!["s-42"]);
    }

    #[test]
    fn synthesized_item_is_resumable_with_progress() {
        let item = resumable_item(7, &orphan(250), "s-42", &status(vec![0, 1, 9]), None);
        assert_eq!(item.status, UploadStatus::Resumable);
        assert!(item.file.is_placeholder());
        assert_eq!(item.full_path(), "/videos/movie.mkv");
        assert_eq!(item.uploaded_chunks.len(), 2);
        assert_eq!(item.uploaded_size, 200);
        assert_eq!(item.error_message.as_deref(), Some(RESELECT_MESSAGE));
    }

    #[test]
    fn listed_parent_with_trailing_slash_is_normalized() {
        let mut object = orphan(250);
        object.path = "/videos/".into();
        let item = resumable_item(7, &object, "s-42", &status(vec![]), None);
        assert_eq!(item.target_path, "/videos");
        assert_eq!(item.full_path(), "/videos/movie.mkv");
    }

    #[test]
    fn uploaded_size_is_clamped_to_file_size() {
        let item = resumable_item(7, &orphan(250), "s-42", &status(vec![0, 1, 2]), None);
        assert_eq!(item.uploaded_size, 250);
    }

    #[test]
    fn fingerprint_requires_name_and_size() {
        let item = resumable_item(7, &orphan(3), "s-42", &status(vec![]), None);
        assert!(verify_fingerprint(&item, &FileHandle::from_bytes("movie.mkv", b"abc".to_vec())).is_ok());
        assert!(matches!(
            verify_fingerprint(&item, &FileHandle::from_bytes("movie.mkv", b"ab".to_vec())),
            Err(UploadError::FingerprintMismatch { .. })
        ));
        assert!(verify_fingerprint(&item, &FileHandle::from_bytes("other.mkv", b"abc".to_vec())).is_err());
    }
}
