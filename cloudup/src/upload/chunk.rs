use std::collections::BTreeSet;
use std::io;

use cloudup_core::{CloudClient, CloudError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::backoff::RetryPolicy;
use super::item::FileHandle;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("request failed: {0}")]
    Cloud(#[from] CloudError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("chunk size must be positive")]
    ZeroChunkSize,
    #[error("{size} bytes in chunks of {chunk_size} exceeds the chunk index range")]
    TooManyChunks { size: u64, chunk_size: u64 },
    #[error("chunk {index} is outside 0..{total}")]
    OutOfRange { index: u32, total: u32 },
    #[error("session did not provide a {0}")]
    MissingTarget(&'static str),
    #[error("upload canceled")]
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
}

impl ChunkPlan {
    pub fn new(size: u64, chunk_size: u64) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::ZeroChunkSize);
        }
        let total_chunks = u32::try_from(size.div_ceil(chunk_size))
            .map_err(|_| ChunkError::TooManyChunks { size, chunk_size })?;
        Ok(Self {
            size,
            chunk_size,
            total_chunks,
        })
    }

    /// Byte offset and length of chunk `index`; the last chunk may be short.
    pub fn range(&self, index: u32) -> Result<(u64, u64), ChunkError> {
        if index >= self.total_chunks {
            return Err(ChunkError::OutOfRange {
                index,
                total: self.total_chunks,
            });
        }
        let offset = u64::from(index) * self.chunk_size;
        Ok((offset, self.chunk_size.min(self.size - offset)))
    }

    pub fn missing(&self, uploaded: &BTreeSet<u32>) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|index| !uploaded.contains(index))
            .collect()
    }

    pub fn uploaded_bytes(&self, uploaded: &BTreeSet<u32>) -> u64 {
        uploaded
            .iter()
            .filter_map(|index| self.range(*index).ok())
            .map(|(_, len)| len)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkTarget {
    Relay {
        session_id: String,
    },
    Direct {
        upload_url: String,
        content_type: Option<String>,
    },
}

#[derive(Clone)]
pub struct ChunkUploader {
    client: CloudClient,
    retry: RetryPolicy,
}

impl ChunkUploader {
    pub fn new(client: CloudClient, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub async fn upload(
        &self,
        target: &ChunkTarget,
        plan: &ChunkPlan,
        file: &FileHandle,
        index: u32,
        cancel: &CancellationToken,
    ) -> Result<u64, ChunkError> {
        let (offset, len) = plan.range(index)?;
        let bytes = file.read_range(offset, len).await?;
        let mut failures = 0u32;
        loop {
            let send = self.send(target, plan, index, bytes.clone());
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(ChunkError::Canceled),
                result = send => result,
            };
            match result {
                Ok(()) => return Ok(len),
                Err(err) if err.is_retryable() && self.retry.should_retry(failures + 1) => {
                    failures += 1;
                    let delay = self.retry.delay(failures);
                    debug!(index, failures, ?delay, error = %err, "retrying chunk");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ChunkError::Canceled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn send(
        &self,
        target: &ChunkTarget,
        plan: &ChunkPlan,
        index: u32,
        bytes: Vec<u8>,
    ) -> Result<(), CloudError> {
        match target {
            ChunkTarget::Relay { session_id } => {
                self.client
                    .upload_chunk_relay(session_id, index, bytes)
                    .await
            }
            ChunkTarget::Direct {
                upload_url,
                content_type,
            } => {
                self.client
                    .upload_chunk_direct(
                        upload_url,
                        content_type.as_deref(),
                        index,
                        plan.total_chunks,
                        bytes,
                    )
                    .await
            }
        }
    }
}
