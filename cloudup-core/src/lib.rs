mod client;
mod session;

pub use client::{ApiErrorClass, CloudClient, CloudError};
pub use session::{
    CreateSessionRequest, DirectoryObject, DirectoryPage, ObjectType, SessionStatus,
    StoragePolicyInfo, StorageType, UploadCredential, UploadMethod,
};
