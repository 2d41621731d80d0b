use std::sync::Arc;
use std::time::Duration;

use cloudup_core::{
    CloudClient, CloudError, CreateSessionRequest, SessionStatus, StorageType, UploadCredential,
    UploadMethod,
};
use thiserror::Error;
use tracing::{debug, warn};

use super::chunk::{ChunkError, ChunkPlan, ChunkTarget};
use super::path_lock::{PathLocks, Throttle};

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("naming conflict: {0}")]
    Conflict(String),
    #[error("session negotiation failed: {0}")]
    Failed(#[from] CloudError),
    #[error("invalid session: {0}")]
    Invalid(#[from] ChunkError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    pub session_id: Option<String>,
    pub method: UploadMethod,
    pub upload_url: Option<String>,
    pub content_type: Option<String>,
    pub storage_type: StorageType,
    pub chunks: ChunkPlan,
}

impl SessionPlan {
    pub fn from_credential(credential: UploadCredential, size: u64) -> Result<Self, ChunkError> {
        let chunks = ChunkPlan::new(size, credential.chunk_size)?;
        Ok(Self {
            session_id: credential.session_id,
            method: credential.upload_method,
            upload_url: credential.upload_url,
            content_type: credential.content_type,
            storage_type: credential.storage_policy.storage_type,
            chunks,
        })
    }

    pub fn target(&self) -> Result<ChunkTarget, ChunkError> {
        match self.method {
            UploadMethod::Server => Ok(ChunkTarget::Relay {
                session_id: self
                    .session_id
                    .clone()
                    .ok_or(ChunkError::MissingTarget("session id"))?,
            }),
            UploadMethod::Client => Ok(ChunkTarget::Direct {
                upload_url: self
                    .upload_url
                    .clone()
                    .ok_or(ChunkError::MissingTarget("upload url"))?,
                content_type: self.content_type.clone(),
            }),
        }
    }

    pub fn requires_finalize(&self) -> bool {
        self.method == UploadMethod::Client && self.storage_type.requires_finalize()
    }
}

#[derive(Clone)]
pub struct SessionNegotiator {
    client: CloudClient,
    locks: PathLocks,
    throttle: Arc<Throttle>,
}

impl SessionNegotiator {
    pub fn new(client: CloudClient, min_interval: Duration) -> Self {
        Self {
            client,
            locks: PathLocks::new(),
            throttle: Arc::new(Throttle::new(min_interval)),
        }
    }

    pub async fn negotiate(
        &self,
        parent: &str,
        request: &CreateSessionRequest,
    ) -> Result<SessionPlan, NegotiationError> {
        let _lock = self.locks.acquire(parent).await;
        self.throttle.wait().await;
        debug!(path = %request.path, size = request.size, overwrite = request.overwrite, "creating upload session");
        let credential = match self.client.create_upload_session(request).await {
            Ok(credential) => credential,
            Err(err) if err.is_conflict() => {
                return Err(NegotiationError::Conflict(conflict_message(&err)));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(SessionPlan::from_credential(credential, request.size)?)
    }

    pub async fn validate(&self, session_id: &str) -> Result<SessionStatus, CloudError> {
        self.throttle.wait().await;
        self.client.validate_upload_session(session_id).await
    }

    pub async fn finalize(&self, path: &str, policy_id: &str, size: u64) -> Result<(), CloudError> {
        self.client.finalize_client_upload(path, policy_id, size).await
    }

    pub async fn delete_best_effort(&self, session_id: &str, path: &str) {
        if let Err(err) = self.client.delete_upload_session(session_id, path).await {
            warn!(session_id, path, error = %err, "failed to delete upload session");
        }
    }
}

fn conflict_message(err: &CloudError) -> String {
    match err {
        CloudError::Backend { message, .. } if !message.is_empty() => message.clone(),
        _ => "an object with the same name already exists".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudup_core::StoragePolicyInfo;

    fn credential(method: UploadMethod, storage_type: StorageType) -> UploadCredential {
        UploadCredential {
            session_id: Some("s-1".into()),
            upload_url: Some("https://bucket.example/obj".into()),
            content_type: Some("application/octet-stream".into()),
            chunk_size: 4,
            upload_method: method,
            storage_policy: StoragePolicyInfo { storage_type },
        }
    }

    #[test]
    fn plan_computes_total_chunks() {
        let plan =
            SessionPlan::from_credential(credential(UploadMethod::Server, StorageType::Local), 9)
                .unwrap();
        assert_eq!(plan.chunks.total_chunks, 3);
        assert_eq!(
            plan.target().unwrap(),
            ChunkTarget::Relay {
                session_id: "s-1".into()
            }
        );
        assert!(!plan.requires_finalize());
    }

    #[test]
    fn client_transport_to_s3_needs_finalize() {
        let plan = SessionPlan::from_credential(credential(UploadMethod::Client, StorageType::S3), 9)
            .unwrap();
        assert!(plan.requires_finalize());
        assert!(matches!(plan.target().unwrap(), ChunkTarget::Direct { .. }));
    }

    #[test]
    fn server_chunk_size_too_small_for_file_is_invalid() {
        let mut credential = credential(UploadMethod::Server, StorageType::Local);
        credential.chunk_size = 1;
        assert!(matches!(
            SessionPlan::from_credential(credential, u64::from(u32::MAX) + 1),
            Err(ChunkError::TooManyChunks { .. })
        ));
    }

    #[test]
    fn relay_without_session_id_is_invalid() {
        let mut credential = credential(UploadMethod::Server, StorageType::Local);
        credential.session_id = None;
        let plan = SessionPlan::from_credential(credential, 1).unwrap();
        assert!(matches!(
            plan.target(),
            Err(ChunkError::MissingTarget("session id"))
        ));
    }

    #[test]
    fn conflict_message_prefers_backend_text() {
        let err = CloudError::Backend {
            code: 40004,
            message: "Object existed".into(),
        };
        assert_eq!(conflict_message(&err), "Object existed");
    }
}
