use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use url::Url;

use crate::session::{
    CreateSessionRequest, DirectoryObject, DirectoryPage, SessionStatus, UploadCredential,
};

const CODE_OK: i64 = 0;
const CODE_OBJECT_EXISTS: i64 = 40004;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("backend error {code}: {message}")]
    Backend { code: i64, message: String },
    #[error("api response missing data")]
    MissingData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Conflict,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct CloudClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl CloudClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, CloudError> {
        Self::with_http(Client::new(), base_url, token)
    }

    pub fn with_http(
        http: Client,
        base_url: &str,
        token: impl Into<String>,
    ) -> Result<Self, CloudError> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub async fn create_upload_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<UploadCredential, CloudError> {
        let url = self.endpoint("/api/v3/file/upload")?;
        let response = self
            .http
            .put(url)
            .header("Authorization", self.auth_header_value())
            .json(request)
            .send()
            .await?;
        Self::handle_envelope(response).await
    }

    pub async fn validate_upload_session(
        &self,
        session_id: &str,
    ) -> Result<SessionStatus, CloudError> {
        let url = self.endpoint(&format!("/api/v3/file/upload/{session_id}"))?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_envelope(response).await
    }

    pub async fn delete_upload_session(
        &self,
        session_id: &str,
        path: &str,
    ) -> Result<(), CloudError> {
        let mut url = self.endpoint(&format!("/api/v3/file/upload/{session_id}"))?;
        url.query_pairs_mut().append_pair("path", path);
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_empty_envelope(response).await
    }

    pub async fn upload_chunk_relay(
        &self,
        session_id: &str,
        index: u32,
        bytes: Vec<u8>,
    ) -> Result<(), CloudError> {
        let url = self.endpoint(&format!("/api/v3/file/upload/{session_id}/{index}"))?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        Self::handle_empty_envelope(response).await
    }

    /// Uploads one chunk straight to storage. Multi-chunk uploads address
    /// parts with a 1-based `partNumber` query parameter.
    pub async fn upload_chunk_direct(
        &self,
        upload_url: &str,
        content_type: Option<&str>,
        index: u32,
        total_chunks: u32,
        bytes: Vec<u8>,
    ) -> Result<(), CloudError> {
        let mut url = Url::parse(upload_url)?;
        if total_chunks > 1 {
            url.query_pairs_mut()
                .append_pair("partNumber", &(index + 1).to_string());
        }
        let response = self
            .http
            .put(url)
            .header(
                "Content-Type",
                content_type.unwrap_or("application/octet-stream"),
            )
            .body(bytes)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(CloudError::Api { status, body })
        }
    }

    pub async fn finalize_client_upload(
        &self,
        path: &str,
        policy_id: &str,
        size: u64,
    ) -> Result<(), CloudError> {
        let url = self.endpoint("/api/v3/file/upload/finalize")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&FinalizeRequest {
                path,
                policy_id,
                size,
            })
            .send()
            .await?;
        Self::handle_empty_envelope(response).await
    }

    pub async fn list_directory(
        &self,
        path: &str,
        page: u32,
        page_size: u32,
    ) -> Result<DirectoryPage, CloudError> {
        let mut url = self.endpoint("/api/v3/directory")?;
        url.query_pairs_mut()
            .append_pair("path", path)
            .append_pair("page", &page.to_string())
            .append_pair("page_size", &page_size.to_string());
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_envelope(response).await
    }

    pub async fn list_directory_all(
        &self,
        path: &str,
        page_size: u32,
    ) -> Result<Vec<DirectoryObject>, CloudError> {
        let page_size = page_size.max(1);
        let mut page = 1u32;
        let mut objects = Vec::new();
        loop {
            let listing = self.list_directory(path, page, page_size).await?;
            let received = listing.objects.len();
            objects.extend(listing.objects);
            if received == 0 || objects.len() as u64 >= u64::from(listing.total) {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(objects)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, CloudError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CloudError> {
        let envelope: Envelope<T> = Self::read_envelope(response).await?;
        envelope.data.ok_or(CloudError::MissingData)
    }

    async fn handle_empty_envelope(response: reqwest::Response) -> Result<(), CloudError> {
        let _: Envelope<serde_json::Value> = Self::read_envelope(response).await?;
        Ok(())
    }

    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Envelope<T>, CloudError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::Api { status, body });
        }
        let envelope = response.json::<Envelope<T>>().await?;
        if envelope.code != CODE_OK {
            return Err(CloudError::Backend {
                code: envelope.code,
                message: envelope.msg,
            });
        }
        Ok(envelope)
    }
}

impl CloudError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            CloudError::Api { status, body } => {
                if mentions_conflict(body) && status.is_client_error() {
                    Some(ApiErrorClass::Conflict)
                } else {
                    Some(classify_api_status(*status))
                }
            }
            CloudError::Backend { code, message } => {
                if *code == CODE_OBJECT_EXISTS || mentions_conflict(message) {
                    Some(ApiErrorClass::Conflict)
                } else {
                    Some(ApiErrorClass::Permanent)
                }
            }
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.classification() == Some(ApiErrorClass::Conflict)
    }

    /// Network failures and throttling are worth another attempt; everything
    /// the backend rejected on its merits is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            CloudError::Request(err) => !err.is_decode(),
            _ => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::CONFLICT {
        ApiErrorClass::Conflict
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(status, StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY)
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn mentions_conflict(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("already exist") || message.contains("conflict")
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct FinalizeRequest<'a> {
    path: &'a str,
    policy_id: &'a str,
    size: u64,
}
