use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSessionRequest {
    pub path: String,
    pub size: u64,
    pub policy_id: String,
    pub overwrite: bool,
}

/// Transport selected by the backend for a negotiated session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadMethod {
    /// Chunks are relayed through the backend under the session id.
    Server,
    /// Chunks go straight to an external storage URL.
    Client,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    Remote,
    S3,
    Ks3,
    Oss,
    Cos,
    Onedrive,
    #[serde(other)]
    Other,
}

impl StorageType {
    /// Direct uploads to these backends are invisible to the server until
    /// they are registered through the finalize call.
    pub fn requires_finalize(&self) -> bool {
        matches!(self, StorageType::S3 | StorageType::Ks3)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoragePolicyInfo {
    #[serde(rename = "type")]
    pub storage_type: StorageType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadCredential {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub upload_url: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    pub chunk_size: u64,
    pub upload_method: UploadMethod,
    pub storage_policy: StoragePolicyInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStatus {
    pub is_valid: bool,
    #[serde(default)]
    pub uploaded_chunks: Vec<u32>,
    pub chunk_size: u64,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    File,
    Dir,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryObject {
    pub name: String,
    /// Directory containing the object, not the object's own path.
    pub path: String,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    #[serde(default)]
    pub size: u64,
    /// Set while a chunked upload into this object has not been finalized.
    #[serde(default)]
    pub upload_session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryPage {
    pub objects: Vec<DirectoryObject>,
    pub page: u32,
    pub page_size: u32,
    pub total: u32,
}
