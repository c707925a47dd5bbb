mod common;

use std::io::Cursor;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{json, Value};
use tempfile::TempDir;
use webwise::constants;
use webwise::feedback::{FeedbackLog, Rating};
use webwise::web_server::{build_router, AppState};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_server(mock: &MockServer, dir: &TempDir) -> TestServer {
    let state = AppState::new(&common::settings_for(mock, dir.path())).unwrap();
    TestServer::new(build_router(state)).unwrap()
}

#[tokio::test]
async fn test_index_renders_page() {
    let mock = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let server = test_server(&mock, &temp_dir);

    let response = server.get("/").await;
    response.assert_status_ok();
    let page = response.text();
    assert!(page.contains("<title>Webwise</title>"));
}

#[tokio::test]
async fn test_history_starts_with_greeting() {
    let mock = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let server = test_server(&mock, &temp_dir);

    let smart: Value = server.get("/api/history/smart").await.json();
    assert_eq!(
        smart,
        json!({ "messages": [ { "role": "assistant", "content": constants::SMART_CHAT_GREETING } ] })
    );

    let web: Value = server.get("/api/history/web").await.json();
    assert_eq!(web["messages"][0]["content"], constants::WEB_CHAT_GREETING);

    server
        .get("/api/history/voice")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_uses_uploaded_document() {
    let mock = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    common::mount_completion(&mock, "the launch code is 0000", "The code is 0000.").await;
    let server = test_server(&mock, &temp_dir);

    let upload = server
        .post("/api/document")
        .add_query_param("name", "secrets.txt")
        .bytes("the launch code is 0000".into())
        .await;
    upload.assert_status_ok();
    let summary: Value = upload.json();
    assert_eq!(summary["message"], "Successfully processed secrets.txt");
    assert_eq!(summary["chars"], 23);

    let reply: Value = server
        .post("/api/chat")
        .json(&json!({ "message": "what is the launch code?" }))
        .await
        .json();
    assert_eq!(reply, json!({ "type": "reply", "message": "The code is 0000." }));

    let history: Value = server.get("/api/history/smart").await.json();
    assert_eq!(history["messages"].as_array().unwrap().len(), 3);

    server
        .delete("/api/document")
        .await
        .assert_status(StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_chat_project_request() {
    let mock = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let server = test_server(&mock, &temp_dir);

    let reply: Value = server
        .post("/api/chat")
        .json(&json!({ "message": "generate project: a pomodoro timer" }))
        .await
        .json();
    assert_eq!(reply["type"], "project_requested");
    assert_eq!(reply["message"], constants::PROJECT_SWITCH_MESSAGE);
}

#[tokio::test]
async fn test_upload_rejects_unsupported_format() {
    let mock = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let server = test_server(&mock, &temp_dir);

    let response = server
        .post("/api/document")
        .add_query_param("name", "diagram.png")
        .bytes(vec![0x89, b'P', b'N', b'G'].into())
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "Unsupported file format: png");
}

#[tokio::test]
async fn test_web_chat_without_search_reports_failure() {
    let mock = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let mut settings = common::settings_for(&mock, temp_dir.path());
    settings.google_api_key = None;
    let server = TestServer::new(build_router(AppState::new(&settings).unwrap())).unwrap();

    let reply: Value = server
        .post("/api/web-chat")
        .json(&json!({ "message": "latest tokio release" }))
        .await
        .json();
    assert_eq!(reply["answer"], constants::WEB_CHAT_FAILURE);
    assert!(reply["error"].is_string());
    assert_eq!(reply["sources"], json!([]));
}

#[tokio::test]
async fn test_history_is_readable_during_slow_web_chat() {
    let mock = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<p>Patience pays.</p>", "text/html")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&mock)
        .await;
    common::mount_completion(&mock, "Patience pays.", "It does.").await;
    let server = test_server(&mock, &temp_dir);
    let prompt = format!("What does {}/slow say?", mock.uri());

    let chat = async {
        server
            .post("/api/web-chat")
            .json(&json!({ "message": prompt, "source": "web-page" }))
            .await
            .json::<Value>()
    };
    let history = async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let started = Instant::now();
        let history: Value = server.get("/api/history/web").await.json();
        (history, started.elapsed())
    };
    let (reply, (during, waited)) = tokio::join!(chat, history);

    assert!(waited < Duration::from_secs(1), "history waited {:?}", waited);
    assert_eq!(during["messages"].as_array().unwrap().len(), 1);
    assert_eq!(reply["answer"], "It does.");

    let after: Value = server.get("/api/history/web").await.json();
    assert_eq!(after["messages"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_feedback_is_appended() {
    let mock = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let server = test_server(&mock, &temp_dir);

    let response = server
        .post("/api/feedback")
        .json(&json!({ "query": "what is rust?", "response": "A language.", "feedback": "Yes" }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["message"], "Thank you for your feedback!");

    let records = FeedbackLog::new(temp_dir.path().join("feedback.json"))
        .records()
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].query, "what is rust?");
    assert_eq!(records[0].feedback, Rating::Yes);
}

#[tokio::test]
async fn test_project_archive_download() {
    let mock = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    common::mount_completion(&mock, "highly skilled project manager", "plan").await;
    common::mount_completion(&mock, "expert software analyst", "requirements").await;
    common::mount_completion(&mock, "experienced software architect", "app\n\tmain.py\n").await;
    common::mount_completion(&mock, "skilled software developer", "print('hello')").await;
    let server = test_server(&mock, &temp_dir);

    server
        .get("/api/project/archive")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let project: Value = server
        .post("/api/project")
        .json(&json!({ "idea": "a hello world app" }))
        .await
        .json();
    assert_eq!(project["plan"], "plan");
    assert_eq!(project["files"][0]["path"], "app/main.py");
    assert!(project.get("archive").is_none());

    let archive = server.get("/api/project/archive").await;
    archive.assert_status_ok();
    assert_eq!(archive.header("content-type"), "application/zip");
    let zip = zip::ZipArchive::new(Cursor::new(archive.as_bytes().to_vec())).unwrap();
    assert!(zip.file_names().any(|name| name == "app/main.py"));
}

#[tokio::test]
async fn test_empty_project_idea_is_bad_request() {
    let mock = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let server = test_server(&mock, &temp_dir);

    server
        .post("/api/project")
        .json(&json!({ "idea": "" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}
