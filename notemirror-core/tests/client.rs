use futures_util::StreamExt;
use notemirror_core::{ApiErrorClass, DriveClient, DriveError};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn list_files_sends_bearer_header_and_query() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(header("authorization", "Bearer test-token"))
        .and(query_param("q", "name contains '.note'"))
        .and(query_param("spaces", "drive"))
        .and(query_param("pageSize", "50"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nextPageToken": "page-2",
            "files": [
                {
                    "id": "f1",
                    "name": "Journal.note",
                    "mimeType": "application/octet-stream",
                    "size": "1024",
                    "modifiedTime": "2024-01-01T00:00:00.000Z",
                    "parents": ["folder-a"],
                    "md5Checksum": "0cc175b9c0f1b6a831c399e269772661"
                }
            ]
        })))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let page = client
        .list_files("name contains '.note'", 50, None)
        .await
        .unwrap();

    assert_eq!(page.next_page_token.as_deref(), Some("page-2"));
    assert_eq!(page.files.len(), 1);
    let file = &page.files[0];
    assert_eq!(file.id, "f1");
    assert_eq!(file.size, Some(1024));
    assert_eq!(file.parents, vec!["folder-a".to_string()]);
    assert_eq!(
        file.modified_time.as_deref(),
        Some("2024-01-01T00:00:00.000Z")
    );
    assert!(!file.is_folder());
}

#[tokio::test]
async fn list_files_forwards_page_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let page = client.list_files("trashed = false", 10, Some("page-2")).await.unwrap();

    assert!(page.files.is_empty());
    assert!(page.next_page_token.is_none());
}

#[tokio::test]
async fn get_file_returns_name_and_parents() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/folder-b"))
        .and(query_param("fields", "name,parents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Meetings",
            "parents": ["folder-a"]
        })))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let folder = client
        .get_file("folder-b", &["name", "parents"])
        .await
        .unwrap();

    assert_eq!(folder.name, "Meetings");
    assert_eq!(folder.parents, vec!["folder-a".to_string()]);
    assert!(folder.size.is_none());
}

#[tokio::test]
async fn download_streams_media_bytes() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/f1"))
        .and(query_param("alt", "media"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"note-bytes"))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let mut stream = client.download("f1").await.unwrap();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk.unwrap());
    }

    assert_eq!(body, b"note-bytes");
}

#[tokio::test]
async fn rate_limited_response_carries_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/f1"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "3")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client.download("f1").await.err().unwrap();

    assert!(matches!(err, DriveError::Api { .. }));
    assert_eq!(err.classification(), Some(ApiErrorClass::RateLimit));
    assert_eq!(err.retry_after_secs(), Some(3));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn not_found_is_permanent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client.get_file("gone", &["name"]).await.unwrap_err();

    assert_eq!(err.classification(), Some(ApiErrorClass::Permanent));
    assert!(!err.is_retryable());
}
