#![allow(dead_code)]

use std::path::Path;

use serde_json::{json, Value};
use webwise::config::Settings;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Settings pointing both remote APIs at `server`.
pub fn settings_for(server: &MockServer, projects_dir: &Path) -> Settings {
    Settings {
        openai_api_key: Some("sk-test".to_string()),
        openai_base_url: server.uri(),
        google_api_key: Some("google-test".to_string()),
        google_cse_id: Some("cse-test".to_string()),
        google_search_url: server.uri(),
        feedback_file: projects_dir.join("feedback.json"),
        projects_dir: Some(projects_dir.join("projects")),
        ..Settings::default()
    }
}

pub fn completion_body(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [
            { "index": 0, "message": { "role": "assistant", "content": content }, "finish_reason": "stop" }
        ]
    })
}

/// Answers completion requests whose body contains `marker` with `content`.
pub async fn mount_completion(server: &MockServer, marker: &str, content: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains(marker))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(content)))
        .mount(server)
        .await;
}
