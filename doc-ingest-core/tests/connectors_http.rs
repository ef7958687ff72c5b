use std::sync::Arc;

use doc_ingest_core::config::{
    GitHubSource, GitLabSource, RedditSource, WikipediaSource, DEFAULT_REDDIT_USER_AGENT,
};
use doc_ingest_core::connectors::{
    GitHubConnector, GitLabConnector, RedditConnector, WikipediaConnector,
};
use doc_ingest_core::{
    Connector, ConnectorError, DownloadConfig, Element, Orchestrator, RunOptions, TextPartitioner,
};
use serde_json::json;
use tempfile::{tempdir, TempDir};
use wiremock::{
    matchers::{body_string_contains, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn download_config(root: &TempDir) -> DownloadConfig {
    DownloadConfig {
        download_dir: root.path().join("downloads"),
        output_dir: root.path().join("structured-output"),
        re_download: false,
        preserve_downloads: false,
    }
}

fn read_elements(path: std::path::PathBuf) -> Vec<Element> {
    serde_json::from_slice(&std::fs::read(&path).expect("output exists")).expect("valid json")
}

fn orchestrator() -> Orchestrator {
    Orchestrator::new(RunOptions::default(), Arc::new(TextPartitioner::new()))
}

// ============================================================================
// GitHub
// ============================================================================

async fn github_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/handbook"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"default_branch": "trunk"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/handbook/git/trees/trunk"))
        .and(query_param("recursive", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tree": [
                {"path": "README.md", "type": "blob"},
                {"path": "docs", "type": "tree"},
                {"path": "docs/onboarding.txt", "type": "blob"},
                {"path": "src/main.rs", "type": "blob"},
                {"path": "logo.svg", "type": "blob"}
            ],
            "truncated": false
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/handbook/contents/README.md"))
        .and(query_param("ref", "trunk"))
        .and(header("accept", "application/vnd.github.raw"))
        .respond_with(ResponseTemplate::new(200).set_body_string("# Handbook\n\nHow we work together.\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/handbook/contents/docs/onboarding.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Welcome aboard.\n\n- laptop\n- badge\n"))
        .mount(&server)
        .await;
    server
}

fn github_source(server: &MockServer, file_glob: Option<&str>) -> GitHubSource {
    GitHubSource {
        url: "https://github.com/acme/handbook".into(),
        access_token: Some("ghp_test".into()),
        branch: None,
        file_glob: file_glob.map(str::to_string),
        api_base: Some(server.uri()),
    }
}

#[tokio::test]
async fn github_lists_supported_files_on_default_branch() {
    let server = github_server().await;
    let root = tempdir().unwrap();
    let mut connector = GitHubConnector::new(github_source(&server, None), download_config(&root));

    connector.initialize().await.unwrap();
    let handles = connector.enumerate().await.unwrap();
    let mut ids: Vec<&str> = handles.iter().map(|h| h.identity()).collect();
    ids.sort();
    assert_eq!(ids, vec!["README.md", "docs/onboarding.txt"]);
    connector.release();
}

#[tokio::test]
async fn github_file_glob_narrows_the_listing() {
    let server = github_server().await;
    let root = tempdir().unwrap();
    let mut connector =
        GitHubConnector::new(github_source(&server, Some("*.txt")), download_config(&root));

    connector.initialize().await.unwrap();
    let handles = connector.enumerate().await.unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].identity(), "docs/onboarding.txt");
}

#[tokio::test]
async fn github_end_to_end_writes_structured_outputs() {
    let server = github_server().await;
    let root = tempdir().unwrap();
    let download = download_config(&root);
    let connector = GitHubConnector::new(github_source(&server, None), download.clone());

    let report = orchestrator().run(Box::new(connector)).await.unwrap();

    assert_eq!(report.succeeded.len(), 2);
    let readme = read_elements(download.output_dir.join("README.md.json"));
    assert_eq!(readme[0].text, "Handbook");
    let onboarding = read_elements(download.output_dir.join("docs/onboarding.txt.json"));
    assert_eq!(onboarding.len(), 3);
    assert!(!download.download_dir.exists(), "empty download dirs are pruned");
}

#[tokio::test]
async fn github_missing_repository_fails_initialize() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/ghost"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
        .mount(&server)
        .await;
    let root = tempdir().unwrap();
    let mut source = github_source(&server, None);
    source.url = "acme/ghost".into();
    let mut connector = GitHubConnector::new(source, download_config(&root));

    let err = connector.initialize().await.unwrap_err();
    assert!(matches!(err, ConnectorError::NotFound(_)));
}

// ============================================================================
// GitLab
// ============================================================================

#[tokio::test]
async fn gitlab_follows_tree_pagination() {
    let server = MockServer::start().await;
    let project = "/api/v4/projects/group%2Fproject";
    Mock::given(method("GET"))
        .and(path(format!("{project}/repository/tree")))
        .and(query_param("page", "1"))
        .and(header("private-token", "glpat-test"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-next-page", "2")
                .set_body_json(json!([
                    {"path": "a.md", "type": "blob"},
                    {"path": "img", "type": "tree"}
                ])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{project}/repository/tree")))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-next-page", "")
                .set_body_json(json!([{"path": "guides/b.rst", "type": "blob"}])),
        )
        .mount(&server)
        .await;

    let root = tempdir().unwrap();
    let mut connector = GitLabConnector::new(
        GitLabSource {
            url: format!("{}/group/project", server.uri()),
            access_token: Some("glpat-test".into()),
            branch: Some("main".into()),
            file_glob: None,
        },
        download_config(&root),
    );

    connector.initialize().await.unwrap();
    let ids: Vec<String> = connector
        .enumerate()
        .await
        .unwrap()
        .iter()
        .map(|h| h.identity().to_string())
        .collect();
    assert_eq!(ids, vec!["a.md", "guides/b.rst"]);
}

// ============================================================================
// Reddit
// ============================================================================

#[tokio::test]
async fn reddit_hot_posts_become_markdown_documents() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok", "expires_in": 3600})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/rust/hot"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "after": null,
                "children": [
                    {"data": {"id": "abc", "selftext": "Ownership explained."}},
                    {"data": {"id": "def", "selftext": ""}}
                ]
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .and(query_param("id", "t3_abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"after": null, "children": [{"data": {"id": "abc", "selftext": "Ownership explained."}}]}
        })))
        .mount(&server)
        .await;

    let root = tempdir().unwrap();
    let download = download_config(&root);
    let mut connector = RedditConnector::new(
        RedditSource {
            subreddit_name: "rust".into(),
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            user_agent: DEFAULT_REDDIT_USER_AGENT.into(),
            search_query: None,
            num_posts: 10,
            auth_base: Some(server.uri()),
            api_base: Some(server.uri()),
        },
        download.clone(),
    );

    connector.initialize().await.unwrap();
    let mut handles = connector.enumerate().await.unwrap();
    let ids: Vec<&str> = handles.iter().map(|h| h.identity()).collect();
    assert_eq!(ids, vec!["abc.md", "def.md"]);

    let first = &mut handles[0];
    first.fetch().await.unwrap();
    assert_eq!(
        std::fs::read_to_string(first.download_path()).unwrap(),
        "Ownership explained."
    );
    first.release();
}

#[tokio::test]
async fn reddit_without_credentials_fails_initialize() {
    let root = tempdir().unwrap();
    let mut connector = RedditConnector::new(
        RedditSource {
            subreddit_name: "rust".into(),
            client_id: None,
            client_secret: None,
            user_agent: DEFAULT_REDDIT_USER_AGENT.into(),
            search_query: None,
            num_posts: 10,
            auth_base: None,
            api_base: None,
        },
        download_config(&root),
    );
    let err = connector.initialize().await.unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidConfig(_)));
}

// ============================================================================
// Wikipedia
// ============================================================================

#[tokio::test]
async fn wikipedia_page_yields_html_text_and_summary() {
    let server = MockServer::start().await;
    let api = "/w/api.php";
    Mock::given(method("GET"))
        .and(path(api))
        .and(query_param("list", "search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"search": [{"title": "Open-source software"}]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(api))
        .and(query_param("redirects", "1"))
        .and(query_param("titles", "Open-source software"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"pages": [{"title": "Open-source software", "pageid": 1}]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(api))
        .and(query_param("action", "parse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "parse": {"text": "<div><h2>History</h2><p>Started in the 1950s.</p></div>"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(api))
        .and(query_param("prop", "extracts"))
        .and(query_param("exintro", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"pages": [{"title": "Open-source software", "extract": "Software released under a license."}]}
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(api))
        .and(query_param("prop", "extracts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"pages": [{
                "title": "Open-source software",
                "extract": "Software released under a license.\n\nHistory\n\nStarted in the 1950s."
            }]}
        })))
        .mount(&server)
        .await;

    let root = tempdir().unwrap();
    let download = download_config(&root);
    let connector = WikipediaConnector::new(
        WikipediaSource {
            page_title: "open source software".into(),
            auto_suggest: true,
            api_base: Some(server.uri()),
        },
        download.clone(),
    );

    let report = orchestrator().run(Box::new(connector)).await.unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded.len(), 3);
    let html = read_elements(download.output_dir.join("Open-source software-html.html.json"));
    assert_eq!(html[0].text, "History");
    let summary = read_elements(download.output_dir.join("Open-source software-summary.txt.json"));
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].text, "Software released under a license.");
    let text = read_elements(download.output_dir.join("Open-source software-text.txt.json"));
    assert_eq!(text.len(), 3);
}

#[tokio::test]
async fn wikipedia_missing_page_fails_enumeration() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .and(query_param("redirects", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"pages": [{"title": "Nope", "missing": true}]}
        })))
        .mount(&server)
        .await;

    let root = tempdir().unwrap();
    let mut connector = WikipediaConnector::new(
        WikipediaSource {
            page_title: "Nope".into(),
            auto_suggest: false,
            api_base: Some(server.uri()),
        },
        download_config(&root),
    );
    connector.initialize().await.unwrap();
    let err = connector.enumerate().await.unwrap_err();
    assert!(matches!(err, ConnectorError::NotFound(_)));
}
