//! Integration tests for UpdateChecker and UpdateInstaller
//!
//! These tests run against a local mock of the release feed and verify:
//! - Version comparison against the latest release tag
//! - 404 handling for a missing repository or release
//! - Failure reporting for bad status codes, tags and documents
//! - Download progress reporting and archive extraction

use camino::Utf8PathBuf;
use figma_converter::AppConfig;
use figma_converter::services::{
    CheckFailure, DownloadProgress, InstallError, UpdateChecker, UpdateInstaller, UpdateResult,
};
use semver::Version;
use serde_json::json;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPO_PATH: &str = "/repos/fraold/figma-converter";
const LATEST_PATH: &str = "/repos/fraold/figma-converter/releases/latest";

fn checker_for(server: &MockServer) -> UpdateChecker {
    let mut config = AppConfig::new("unused");
    config.feed_url = server.uri();
    config.repository = "fraold/figma-converter".to_string();
    UpdateChecker::new(&config).unwrap()
}

async fn mount_repo(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(REPO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "full_name": "fraold/figma-converter"
        })))
        .mount(server)
        .await;
}

async fn mount_latest(server: &MockServer, tag: &str, download_url: Option<String>) {
    let assets = match download_url {
        Some(url) => json!([{
            "name": "figma-converter.zip",
            "size": 1024,
            "browser_download_url": url
        }]),
        None => json!([]),
    };
    Mock::given(method("GET"))
        .and(path(LATEST_PATH))
        .and(header("accept", "application/vnd.github+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tag_name": tag,
            "body": "Bug fixes",
            "html_url": "https://github.com/fraold/figma-converter/releases/tag/v2.0.0",
            "assets": assets,
        })))
        .mount(server)
        .await;
}

fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, contents) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[tokio::test]
async fn test_newer_release_found() {
    let server = MockServer::start().await;
    mount_repo(&server).await;
    mount_latest(&server, "v2.0.0", Some(format!("{}/dl/update.zip", server.uri()))).await;

    match checker_for(&server).check("1.0.0").await {
        UpdateResult::UpdateFound(update) => {
            assert_eq!(update.version, Version::new(2, 0, 0));
            assert_eq!(update.notes, "Bug fixes");
            assert_eq!(
                update.download_url(),
                Some(format!("{}/dl/update.zip", server.uri()).as_str())
            );
        }
        other => panic!("Expected UpdateFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_older_release_is_up_to_date() {
    let server = MockServer::start().await;
    mount_repo(&server).await;
    mount_latest(&server, "v0.9.0", None).await;

    assert_eq!(checker_for(&server).check("1.0.0").await, UpdateResult::UpToDate);
}

#[tokio::test]
async fn test_same_release_is_up_to_date() {
    let server = MockServer::start().await;
    mount_repo(&server).await;
    mount_latest(&server, "1.0.0", None).await;

    assert_eq!(checker_for(&server).check("1.0.0").await, UpdateResult::UpToDate);
}

#[tokio::test]
async fn test_missing_release_is_up_to_date() {
    let server = MockServer::start().await;
    mount_repo(&server).await;
    Mock::given(method("GET"))
        .and(path(LATEST_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert_eq!(checker_for(&server).check("1.0.0").await, UpdateResult::UpToDate);
}

#[tokio::test]
async fn test_missing_repository_skips_release_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(REPO_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(LATEST_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    assert_eq!(checker_for(&server).check("1.0.0").await, UpdateResult::UpToDate);
}

#[tokio::test]
async fn test_server_error_is_check_failed() {
    let server = MockServer::start().await;
    mount_repo(&server).await;
    Mock::given(method("GET"))
        .and(path(LATEST_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert_eq!(
        checker_for(&server).check("1.0.0").await,
        UpdateResult::CheckFailed(CheckFailure::HttpStatus(500))
    );
}

#[tokio::test]
async fn test_repository_probe_error_is_check_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(REPO_PATH))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    assert_eq!(
        checker_for(&server).check("1.0.0").await,
        UpdateResult::CheckFailed(CheckFailure::HttpStatus(403))
    );
}

#[tokio::test]
async fn test_invalid_tag_is_check_failed() {
    let server = MockServer::start().await;
    mount_repo(&server).await;
    mount_latest(&server, "nightly", None).await;

    assert_eq!(
        checker_for(&server).check("1.0.0").await,
        UpdateResult::CheckFailed(CheckFailure::InvalidVersion("nightly".to_string()))
    );
}

#[tokio::test]
async fn test_malformed_document_is_check_failed() {
    let server = MockServer::start().await;
    mount_repo(&server).await;
    Mock::given(method("GET"))
        .and(path(LATEST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>rate limited</html>"))
        .mount(&server)
        .await;

    assert!(matches!(
        checker_for(&server).check("1.0.0").await,
        UpdateResult::CheckFailed(CheckFailure::MalformedResponse(_))
    ));
}

#[tokio::test]
async fn test_unreachable_feed_is_check_failed() {
    // Bound then released, so nothing listens on the port
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let mut config = AppConfig::new("unused");
    config.feed_url = format!("http://127.0.0.1:{port}");
    config.http_timeout_secs = 5;
    let checker = UpdateChecker::new(&config).unwrap();

    assert!(matches!(
        checker.check("1.0.0").await,
        UpdateResult::CheckFailed(CheckFailure::Network(_))
    ));
}

#[tokio::test]
async fn test_download_progress_is_monotonic() {
    let server = MockServer::start().await;
    let body = vec![7u8; 256 * 1024];
    Mock::given(method("GET"))
        .and(path("/dl/update.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let target = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let installer = UpdateInstaller::new(target.clone(), Duration::from_secs(5)).unwrap();

    let mut reports: Vec<DownloadProgress> = Vec::new();
    let written = assert_ok!(
        installer
            .download(
                &format!("{}/dl/update.zip", server.uri()),
                &target.join("update.zip"),
                |p| reports.push(p),
            )
            .await
    );

    assert_eq!(written, body.len() as u64);
    assert!(reports.len() >= 2);
    assert_eq!(reports.first().unwrap().downloaded, 0);

    let fractions: Vec<f64> = reports.iter().filter_map(|p| p.fraction()).collect();
    assert_eq!(fractions.len(), reports.len());
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert!(fractions.iter().all(|f| (0.0..=1.0).contains(f)));
    assert_eq!(*fractions.last().unwrap(), 1.0);
}

#[tokio::test]
async fn test_download_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dl/update.zip"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let target = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let installer = UpdateInstaller::new(target.clone(), Duration::from_secs(5)).unwrap();

    let err = assert_err!(
        installer
            .apply(&format!("{}/dl/update.zip", server.uri()), |_| {})
            .await
    );
    assert!(matches!(err, InstallError::HttpStatus(404)));
    // Nothing was extracted
    assert!(!target.join("figma-converter").exists());
}

#[tokio::test]
async fn test_apply_extracts_and_removes_archive() {
    let server = MockServer::start().await;
    let archive = zip_bytes(&[
        ("figma-converter", b"#!/bin/sh\necho new\n"),
        ("docs/CHANGELOG.md", b"# 2.0.0\n"),
    ]);
    Mock::given(method("GET"))
        .and(path("/dl/update.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let target = Utf8PathBuf::try_from(temp_dir.path().join("install")).unwrap();
    let installer = UpdateInstaller::new(target.clone(), Duration::from_secs(5)).unwrap();

    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&progress);
    let installed = installer
        .apply(&format!("{}/dl/update.zip", server.uri()), move |p| {
            sink.lock().unwrap().push(p)
        })
        .await
        .unwrap();

    assert_eq!(installed.files(), 2);
    assert_eq!(installed.target_dir(), target.as_path());
    assert_eq!(
        std::fs::read_to_string(target.join("docs/CHANGELOG.md")).unwrap(),
        "# 2.0.0\n"
    );
    assert!(!target.join("update.zip").exists());
    assert!(!progress.lock().unwrap().is_empty());
}
