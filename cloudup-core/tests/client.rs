use cloudup_core::{
    CloudClient, CloudError, CreateSessionRequest, ObjectType, StorageType, UploadMethod,
};
use serde_json::json;
use wiremock::matchers::{body_bytes, body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn create_upload_session_sends_bearer_token_and_body() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/v3/file/upload"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_json(json!({
            "path": "/Docs/Hello.txt",
            "size": 2621440,
            "policy_id": "p1",
            "overwrite": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "",
            "data": {
                "session_id": "s-1",
                "chunk_size": 1048576,
                "upload_method": "server",
                "storage_policy": { "type": "local" }
            }
        })))
        .mount(&server)
        .await;

    let client = CloudClient::new(&server.uri(), "test-token").unwrap();
    let credential = client
        .create_upload_session(&CreateSessionRequest {
            path: "/Docs/Hello.txt".into(),
            size: 2_621_440,
            policy_id: "p1".into(),
            overwrite: false,
        })
        .await
        .unwrap();

    assert_eq!(credential.session_id.as_deref(), Some("s-1"));
    assert_eq!(credential.upload_method, UploadMethod::Server);
    assert_eq!(credential.chunk_size, 1_048_576);
    assert_eq!(credential.storage_policy.storage_type, StorageType::Local);
}

#[tokio::test]
async fn create_upload_session_surfaces_conflict_code() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/v3/file/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 40004,
            "msg": "Object existed"
        })))
        .mount(&server)
        .await;

    let client = CloudClient::new(&server.uri(), "test-token").unwrap();
    let err = client
        .create_upload_session(&CreateSessionRequest {
            path: "/a.txt".into(),
            size: 1,
            policy_id: "p1".into(),
            overwrite: false,
        })
        .await
        .expect_err("expected conflict");

    assert!(err.is_conflict());
    assert!(matches!(err, CloudError::Backend { code: 40004, .. }));
}

#[tokio::test]
async fn create_upload_session_http_409_is_conflict() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/v3/file/upload"))
        .respond_with(ResponseTemplate::new(409).set_body_string("exists"))
        .mount(&server)
        .await;

    let client = CloudClient::new(&server.uri(), "test-token").unwrap();
    let err = client
        .create_upload_session(&CreateSessionRequest {
            path: "/a.txt".into(),
            size: 1,
            policy_id: "p1".into(),
            overwrite: false,
        })
        .await
        .expect_err("expected conflict");

    assert!(err.is_conflict());
}

#[tokio::test]
async fn validate_upload_session_parses_chunks() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/file/upload/s-9"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": {
                "is_valid": true,
                "uploaded_chunks": [0, 2],
                "chunk_size": 1024,
                "total_chunks": 4
            }
        })))
        .mount(&server)
        .await;

    let client = CloudClient::new(&server.uri(), "test-token").unwrap();
    let status = client.validate_upload_session("s-9").await.unwrap();

    assert!(status.is_valid);
    assert_eq!(status.uploaded_chunks, vec![0, 2]);
    assert_eq!(status.total_chunks, 4);
}

#[tokio::test]
async fn delete_upload_session_passes_path() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/v3/file/upload/s-3"))
        .and(query_param("path", "/Docs/Big File.iso"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0 })))
        .expect(1)
        .mount(&server)
        .await;

    let client = CloudClient::new(&server.uri(), "test-token").unwrap();
    client
        .delete_upload_session("s-3", "/Docs/Big File.iso")
        .await
        .unwrap();
}

#[tokio::test]
async fn upload_chunk_relay_posts_bytes_to_indexed_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v3/file/upload/s-1/2"))
        .and(header("content-type", "application/octet-stream"))
        .and(body_bytes(b"chunk".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0 })))
        .expect(1)
        .mount(&server)
        .await;

    let client = CloudClient::new(&server.uri(), "test-token").unwrap();
    client
        .upload_chunk_relay("s-1", 2, b"chunk".to_vec())
        .await
        .unwrap();
}

#[tokio::test]
async fn upload_chunk_direct_addresses_parts_when_multi_chunk() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/bucket/object"))
        .and(query_param("partNumber", "3"))
        .and(header("content-type", "text/plain"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = CloudClient::new(&server.uri(), "test-token").unwrap();
    client
        .upload_chunk_direct(
            &format!("{}/bucket/object", server.uri()),
            Some("text/plain"),
            2,
            4,
            b"part".to_vec(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn upload_chunk_direct_reports_storage_errors() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/bucket/object"))
        .respond_with(ResponseTemplate::new(503).set_body_string("slow down"))
        .mount(&server)
        .await;

    let client = CloudClient::new(&server.uri(), "test-token").unwrap();
    let err = client
        .upload_chunk_direct(
            &format!("{}/bucket/object", server.uri()),
            None,
            0,
            1,
            b"part".to_vec(),
        )
        .await
        .expect_err("expected storage error");

    assert!(err.is_retryable());
}

#[tokio::test]
async fn finalize_client_upload_posts_registration() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v3/file/upload/finalize"))
        .and(body_json(json!({
            "path": "/Docs/A.bin",
            "policy_id": "s3-policy",
            "size": 42
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0 })))
        .expect(1)
        .mount(&server)
        .await;

    let client = CloudClient::new(&server.uri(), "test-token").unwrap();
    client
        .finalize_client_upload("/Docs/A.bin", "s3-policy", 42)
        .await
        .unwrap();
}

#[tokio::test]
async fn list_directory_all_follows_pages() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/directory"))
        .and(query_param("path", "/Docs"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": {
                "page": 1,
                "page_size": 2,
                "total": 3,
                "objects": [
                    { "name": "A.txt", "path": "/Docs", "type": "file", "size": 1 },
                    { "name": "B", "path": "/Docs", "type": "dir" }
                ]
            }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v3/directory"))
        .and(query_param("path", "/Docs"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": {
                "page": 2,
                "page_size": 2,
                "total": 3,
                "objects": [
                    {
                        "name": "C.iso",
                        "path": "/Docs",
                        "type": "file",
                        "size": 4096,
                        "upload_session_id": "s-7"
                    }
                ]
            }
        })))
        .mount(&server)
        .await;

    let client = CloudClient::new(&server.uri(), "test-token").unwrap();
    let objects = client.list_directory_all("/Docs", 2).await.unwrap();

    assert_eq!(objects.len(), 3);
    assert_eq!(objects[1].object_type, ObjectType::Dir);
    assert_eq!(objects[2].upload_session_id.as_deref(), Some("s-7"));
}

#[tokio::test]
async fn missing_data_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/file/upload/s-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0 })))
        .mount(&server)
        .await;

    let client = CloudClient::new(&server.uri(), "test-token").unwrap();
    let err = client
        .validate_upload_session("s-1")
        .await
        .expect_err("expected missing data");

    assert!(matches!(err, CloudError::MissingData));
}
