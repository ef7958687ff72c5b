use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use doc_ingest_core::config::{GoogleDriveSource, S3Source};
use doc_ingest_core::connectors::{GoogleDriveConnector, S3Connector};
use doc_ingest_core::{
    Connector, DownloadConfig, Element, Orchestrator, RunOptions, TextPartitioner,
};
use serde_json::json;
use tempfile::{tempdir, TempDir};
use wiremock::{
    matchers::{body_string_contains, header, method, path, path_regex, query_param, query_param_is_missing},
    Mock, MockServer, ResponseTemplate,
};

const TEST_PRIVATE_KEY: &str = include_str!("fixtures/drive_service_account.pem");

fn download_config(root: &TempDir) -> DownloadConfig {
    DownloadConfig {
        download_dir: root.path().join("downloads"),
        output_dir: root.path().join("structured-output"),
        re_download: false,
        preserve_downloads: false,
    }
}

fn read_elements(path: PathBuf) -> Vec<Element> {
    serde_json::from_slice(&std::fs::read(&path).expect("output exists")).expect("valid json")
}

fn orchestrator() -> Orchestrator {
    Orchestrator::new(RunOptions::default(), Arc::new(TextPartitioner::new()))
}

// ============================================================================
// S3
// ============================================================================

fn list_page(keys: &[&str], next_token: Option<&str>) -> String {
    let contents: String = keys
        .iter()
        .map(|k| format!("<Contents><Key>{k}</Key><Size>12</Size></Contents>"))
        .collect();
    let truncation = match next_token {
        Some(token) => format!(
            "<IsTruncated>true</IsTruncated><NextContinuationToken>{token}</NextContinuationToken>"
        ),
        None => "<IsTruncated>false</IsTruncated>".to_string(),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Name>fixtures</Name><Prefix>docs/</Prefix><KeyCount>{}</KeyCount><MaxKeys>1000</MaxKeys>{truncation}{contents}</ListBucketResult>"#,
        keys.len()
    )
}

fn xml(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/xml")
        .set_body_string(body)
}

async fn s3_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/fixtures/?$"))
        .and(query_param("list-type", "2"))
        .and(query_param("prefix", "docs/"))
        .and(query_param_is_missing("continuation-token"))
        .respond_with(xml(list_page(&["docs/a.txt", "docs/sub/"], Some("page-2"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/fixtures/?$"))
        .and(query_param("continuation-token", "page-2"))
        .respond_with(xml(list_page(&["docs/sub/b.md"], None)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fixtures/docs/a.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Quarterly numbers are in.\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fixtures/docs/sub/b.md"))
        .respond_with(ResponseTemplate::new(200).set_body_string("# Notes\n\n- one\n- two\n"))
        .mount(&server)
        .await;
    server
}

fn s3_source(server: &MockServer) -> S3Source {
    S3Source {
        url: "s3://fixtures/docs/".into(),
        anonymous: true,
        endpoint: Some(server.uri()),
        region: Some("us-east-1".into()),
    }
}

#[tokio::test]
async fn s3_follows_continuation_tokens_and_skips_folder_markers() {
    let server = s3_server().await;
    let root = tempdir().unwrap();
    let mut connector = S3Connector::new(s3_source(&server), download_config(&root));

    connector.initialize().await.unwrap();
    let handles = connector.enumerate().await.unwrap();
    let ids: Vec<&str> = handles.iter().map(|h| h.identity()).collect();
    assert_eq!(ids, vec!["a.txt", "sub/b.md"]);
    connector.release();
}

#[tokio::test]
async fn s3_end_to_end_writes_structured_outputs() {
    let server = s3_server().await;
    let root = tempdir().unwrap();
    let download = download_config(&root);
    let connector = S3Connector::new(s3_source(&server), download.clone());

    let report = orchestrator().run(Box::new(connector)).await.unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.succeeded.len(), 2);
    let a = read_elements(download.output_dir.join("a.txt.json"));
    assert_eq!(a[0].text, "Quarterly numbers are in.");
    let b = read_elements(download.output_dir.join("sub/b.md.json"));
    assert_eq!(b.len(), 3);
}

// ============================================================================
// Google Drive
// ============================================================================

const FOLDER: &str = "application/vnd.google-apps.folder";

fn drive_file(id: &str, name: &str, mime_type: &str) -> serde_json::Value {
    json!({"id": id, "name": name, "mimeType": mime_type})
}

fn children_of(folder: &str) -> String {
    format!("'{folder}' in parents and trashed = false")
}

async fn drive_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("jwt-bearer"))
        .and(body_string_contains("assertion="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "drive-tok",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/team-folder"))
        .and(header("authorization", "Bearer drive-tok"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(drive_file("team-folder", "Team", FOLDER)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files"))
        .and(query_param("q", children_of("team-folder")))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [
                drive_file("id1", "report.txt", "text/plain"),
                drive_file("id2", "report.txt", "text/plain"),
                drive_file("notes-id", "Notes", "application/vnd.google-apps.document"),
                drive_file("sub-id", "Sub", FOLDER)
            ],
            "nextPageToken": "p2"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files"))
        .and(query_param("q", children_of("team-folder")))
        .and(query_param("pageToken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [
                drive_file("budget-id", "Budget", "application/vnd.google-apps.spreadsheet"),
                drive_file("form-id", "Survey", "application/vnd.google-apps.form")
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files"))
        .and(query_param("q", children_of("sub-id")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [drive_file("deep-id", "deep.md", "text/markdown")]
        })))
        .mount(&server)
        .await;

    for (id, body) in [
        ("id1", "First report."),
        ("id2", "Second report."),
        ("deep-id", "# Deep\n\nNested content."),
    ] {
        Mock::given(method("GET"))
            .and(path(format!("/files/{id}")))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/files/notes-id/export"))
        .and(query_param("mimeType", "text/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Meeting notes."))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/budget-id/export"))
        .and(query_param("mimeType", "text/csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string("item,cost\nrent,100\n"))
        .mount(&server)
        .await;
    server
}

fn service_account_key(root: &TempDir, server: &MockServer) -> PathBuf {
    let key_path = root.path().join("service-account.json");
    let key = json!({
        "type": "service_account",
        "client_email": "ingest@example.iam.gserviceaccount.com",
        "private_key": TEST_PRIVATE_KEY,
        "token_uri": format!("{}/token", server.uri())
    });
    std::fs::write(&key_path, serde_json::to_vec(&key).unwrap()).unwrap();
    key_path
}

fn drive_source(
    root: &TempDir,
    server: &MockServer,
    recursive: bool,
    extension: Option<&str>,
) -> GoogleDriveSource {
    GoogleDriveSource {
        drive_id: "team-folder".into(),
        service_account_key: Some(service_account_key(root, server)),
        recursive,
        extension: extension.map(str::to_string),
        api_base: Some(server.uri()),
    }
}

#[tokio::test]
async fn drive_walk_pages_exports_and_keeps_identities_unique() {
    let server = drive_server().await;
    let root = tempdir().unwrap();
    let mut connector =
        GoogleDriveConnector::new(drive_source(&root, &server, true, None), download_config(&root));

    connector.initialize().await.unwrap();
    let handles = connector.enumerate().await.unwrap();

    let mut ids: Vec<&str> = handles.iter().map(|h| h.identity()).collect();
    ids.sort();
    assert_eq!(
        ids,
        vec![
            "Budget.csv",
            "Notes.txt",
            "Sub/deep.md",
            "report (id1).txt",
            "report (id2).txt",
        ]
    );
    let outputs: HashSet<PathBuf> = handles.iter().map(|h| h.output_path().to_path_buf()).collect();
    assert_eq!(outputs.len(), handles.len(), "every document has its own output path");
    let downloads: HashSet<PathBuf> =
        handles.iter().map(|h| h.download_path().to_path_buf()).collect();
    assert_eq!(downloads.len(), handles.len());
}

#[tokio::test]
async fn drive_without_recursion_filters_by_extension() {
    let server = drive_server().await;
    let root = tempdir().unwrap();
    let mut connector = GoogleDriveConnector::new(
        drive_source(&root, &server, false, Some(".csv")),
        download_config(&root),
    );

    connector.initialize().await.unwrap();
    let handles = connector.enumerate().await.unwrap();
    let ids: Vec<&str> = handles.iter().map(|h| h.identity()).collect();
    assert_eq!(ids, vec!["Budget.csv"]);
}

#[tokio::test]
async fn drive_same_named_files_produce_separate_outputs() {
    let server = drive_server().await;
    let root = tempdir().unwrap();
    let download = download_config(&root);
    let connector =
        GoogleDriveConnector::new(drive_source(&root, &server, true, None), download.clone());

    let report = orchestrator().run(Box::new(connector)).await.unwrap();

    assert_eq!(report.succeeded.len(), 5);
    let first = read_elements(download.output_dir.join("report (id1).txt.json"));
    let second = read_elements(download.output_dir.join("report (id2).txt.json"));
    assert_eq!(first[0].text, "First report.");
    assert_eq!(second[0].text, "Second report.");
    let notes = read_elements(download.output_dir.join("Notes.txt.json"));
    assert_eq!(notes[0].text, "Meeting notes.");
    assert!(download.output_dir.join("Sub/deep.md.json").is_file());
}
