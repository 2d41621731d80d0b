use thiserror::Error;

use super::chunk::ChunkError;
use super::item::{ItemId, UploadStatus};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload item {0} not found")]
    NotFound(ItemId),
    #[error("cannot move upload from {from:?} to {to:?}")]
    InvalidTransition { from: UploadStatus, to: UploadStatus },
    #[error(
        "selected file {actual_name} ({actual_size} bytes) does not match {expected_name} ({expected_size} bytes)"
    )]
    FingerprintMismatch {
        expected_name: String,
        expected_size: u64,
        actual_name: String,
        actual_size: u64,
    },
    #[error("api error: {0}")]
    Api(#[from] cloudup_core::CloudError),
    #[error("chunk transfer error: {0}")]
    Chunk(#[from] ChunkError),
}
