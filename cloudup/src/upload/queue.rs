use serde::Serialize;

use super::error::UploadError;
use super::item::{ItemId, UploadItem, UploadStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Changed { id: ItemId, status: UploadStatus },
    Removed { id: ItemId },
    FileRequested { id: ItemId },
    Notice(String),
    Drained { refreshed: bool },
}

#[derive(Debug, Default)]
pub struct UploadQueue {
    items: Vec<UploadItem>,
    next_id: ItemId,
}

impl UploadQueue {
    pub fn allocate_id(&mut self) -> ItemId {
        self.next_id += 1;
        self.next_id
    }

    pub fn push(&mut self, item: UploadItem) {
        self.items.push(item);
    }

    pub fn get(&self, id: ItemId) -> Option<&UploadItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut UploadItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    pub fn require_mut(&mut self, id: ItemId) -> Result<&mut UploadItem, UploadError> {
        self.get_mut(id).ok_or(UploadError::NotFound(id))
    }

    pub fn find_by_key(&self, target_path: &str, relative_path: &str) -> Option<&UploadItem> {
        self.items
            .iter()
            .find(|item| item.matches_key(target_path, relative_path))
    }

    pub fn remove(&mut self, id: ItemId) -> Option<UploadItem> {
        let index = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.remove(index))
    }

    pub fn first_pending(&self) -> Option<ItemId> {
        self.items
            .iter()
            .find(|item| item.status == UploadStatus::Pending)
            .map(|item| item.id)
    }

    pub fn has_pending(&self) -> bool {
        self.first_pending().is_some()
    }

    pub fn ids_with_status(&self, status: UploadStatus) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|item| item.status == status)
            .map(|item| item.id)
            .collect()
    }

    pub fn items(&self) -> &[UploadItem] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [UploadItem] {
        &mut self.items
    }

    pub fn summary(&self) -> UploadSummary {
        let mut summary = UploadSummary::default();
        for item in &self.items {
            summary.total_bytes += item.size;
            summary.uploaded_bytes += item.uploaded_size.min(item.size);
            match item.status {
                UploadStatus::Pending => summary.pending += 1,
                UploadStatus::Processing | UploadStatus::Uploading => summary.active += 1,
                UploadStatus::Success => summary.succeeded += 1,
                UploadStatus::Error => summary.failed += 1,
                UploadStatus::Conflict => summary.conflicts += 1,
                UploadStatus::Canceled => summary.canceled += 1,
                UploadStatus::Resumable => summary.resumable += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub pending: usize,
    pub active: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub canceled: usize,
    pub resumable: usize,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
}
