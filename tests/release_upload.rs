use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pipewright::publish::{ReleaseAssetUploader, Uploader};
use pipewright::retry::RetryPolicy;

fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
}

async fn artifact(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("app.tar.gz");
    tokio::fs::write(&path, b"release bytes").await.unwrap();
    path
}

#[tokio::test]
async fn fresh_release_is_created_and_asset_posted() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repos/octo/app/releases"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 1,
            "upload_url": format!("{}/uploads/repos/octo/app/releases/1/assets{{?name,label}}", server.uri()),
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/uploads/repos/octo/app/releases/1/assets"))
        .and(query_param("name", "app.tar.gz"))
        .and(header_exists("x-checksum-sha256"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"state": "uploaded"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir).await;

    let uploader =
        ReleaseAssetUploader::new(server.uri(), "octo", "app", "token-123", Some("v1.0".into()))
            .with_policy(fast_policy());

    let result = uploader.upload(&file).await;
    assert!(result.success, "expected success, got: {}", result.message);
    assert!(result.message.contains("v1.0"));
    server.verify().await;
}

#[tokio::test]
async fn existing_release_is_found_by_tag_when_create_conflicts() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repos/octo/app/releases"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "message": "Validation Failed",
            "errors": [{"code": "already_exists"}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octo/app/releases/tags/v1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7,
            "upload_url": format!("{}/uploads/releases/7/assets{{?name,label}}", server.uri()),
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/uploads/releases/7/assets"))
        .and(query_param("name", "app.tar.gz"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir).await;

    let uploader =
        ReleaseAssetUploader::new(server.uri(), "octo", "app", "token-123", Some("v1.0".into()))
            .with_policy(fast_policy());

    let result = uploader.upload(&file).await;
    assert!(result.success, "expected success, got: {}", result.message);
    server.verify().await;
}

#[tokio::test]
async fn falls_back_to_first_listed_release() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repos/octo/app/releases"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/app/releases/tags/v1.0"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/app/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 9,
                "upload_url": format!("{}/uploads/releases/9/assets{{?name,label}}", server.uri()),
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/uploads/releases/9/assets"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir).await;

    let uploader =
        ReleaseAssetUploader::new(server.uri(), "octo", "app", "token-123", Some("v1.0".into()))
            .with_policy(fast_policy());

    let result = uploader.upload(&file).await;
    assert!(result.success, "expected success, got: {}", result.message);
    server.verify().await;
}

#[tokio::test]
async fn bad_token_resolution_chain_is_terminal_and_not_retried() {
    let server = MockServer::start().await;

    // A bad token turns every resolution step into a 401; none of the three
    // requests may be re-issued by the retry coordinator.
    Mock::given(method("POST"))
        .and(path("/repos/octo/app/releases"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/app/releases/tags/v1.0"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/app/releases"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir).await;

    let uploader =
        ReleaseAssetUploader::new(server.uri(), "octo", "app", "bad-token", Some("v1.0".into()))
            .with_policy(fast_policy());

    let result = uploader.upload(&file).await;
    assert!(!result.success);
    assert!(result.message.contains("could not resolve a release"));
    assert!(result.message.contains("401"));
    server.verify().await;
}

#[tokio::test]
async fn terminal_asset_rejection_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repos/octo/app/releases"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "upload_url": format!("{}/uploads/assets{{?name,label}}", server.uri()),
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/uploads/assets"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir).await;

    let uploader =
        ReleaseAssetUploader::new(server.uri(), "octo", "app", "bad-token", Some("v1.0".into()))
            .with_policy(fast_policy());

    let result = uploader.upload(&file).await;
    assert!(!result.success);
    assert!(result.message.contains("403"));
    assert!(result.message.contains("forbidden"));
    server.verify().await;
}
