mod common;

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::sync::broadcast;
use webwise::completion::CompletionClient;
use webwise::config::Settings;
use webwise::project_generator::{ProjectGenerator, Stage};
use webwise::WebwiseError;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STRUCTURE: &str = "Here is the structure:\ncalc\n\tmain.py\n\tutils\n\t\tmath_ops.py\n";

async fn mount_design_stages(server: &MockServer, structure: &str) {
    common::mount_completion(server, "highly skilled project manager", "1. Project Overview: a calculator").await;
    common::mount_completion(server, "expert software analyst", "- add two numbers").await;
    common::mount_completion(server, "experienced software architect", structure).await;
}

fn generator(settings: &Settings) -> ProjectGenerator {
    let client = CompletionClient::new(settings).unwrap();
    ProjectGenerator::new(client, settings).unwrap()
}

fn archive_entry(archive: &[u8], name: &str) -> String {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
    let mut contents = String::new();
    zip.by_name(name).unwrap().read_to_string(&mut contents).unwrap();
    contents
}

fn leftover_workdirs(projects_dir: &Path) -> usize {
    std::fs::read_dir(projects_dir).unwrap().count()
}

#[test_log::test(tokio::test)]
async fn test_generate_without_running() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    mount_design_stages(&server, STRUCTURE).await;
    common::mount_completion(&server, "skilled software developer", "```python\nprint('ok')\n```").await;

    let settings = common::settings_for(&server, temp_dir.path());
    let (tx, mut rx) = broadcast::channel(64);
    let project = generator(&settings)
        .with_progress(tx)
        .generate("a command line calculator", false)
        .await
        .unwrap();

    assert_eq!(project.idea, "a command line calculator");
    assert_eq!(project.plan, "1. Project Overview: a calculator");
    assert_eq!(project.requirements, "- add two numbers");
    assert!(project.failures.is_empty());
    assert!(project.execution.is_none());

    let paths: Vec<PathBuf> = project.files.iter().map(|f| f.path.clone()).collect();
    assert_eq!(
        paths,
        vec![PathBuf::from("calc/main.py"), PathBuf::from("calc/utils/math_ops.py")]
    );
    assert!(project.files.iter().all(|f| f.code == "print('ok')\n"));

    assert_eq!(archive_entry(&project.archive, "calc/main.py"), "print('ok')\n");
    assert_eq!(archive_entry(&project.archive, "calc/utils/math_ops.py"), "print('ok')\n");

    // plan, requirements, structure and one call per file
    assert_eq!(server.received_requests().await.unwrap().len(), 5);
    assert_eq!(leftover_workdirs(&temp_dir.path().join("projects")), 0);

    let mut stages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        stages.push(event.stage);
    }
    assert_eq!(stages.first(), Some(&Stage::Plan));
    assert_eq!(stages.last(), Some(&Stage::Done));
    assert!(stages.contains(&Stage::Package));
}

#[tokio::test]
async fn test_readme_with_inner_fences_is_written_whole() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let readme = "# Calc\n\nInstall with:\n```bash\npip install -r requirements.txt\n```\n\nRun `python main.py`.\n";
    mount_design_stages(&server, "calc\n\tREADME.md\n\tmain.py\n").await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Write the code for 'calc/README.md'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::completion_body(readme)))
        .with_priority(1)
        .mount(&server)
        .await;
    common::mount_completion(&server, "skilled software developer", "```python\nprint('ok')\n```").await;

    let settings = common::settings_for(&server, temp_dir.path());
    let project = generator(&settings).generate("a calculator", false).await.unwrap();

    assert_eq!(archive_entry(&project.archive, "calc/README.md"), readme);
    assert_eq!(archive_entry(&project.archive, "calc/main.py"), "print('ok')\n");
}

#[tokio::test]
async fn test_file_failure_does_not_stop_generation() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    mount_design_stages(&server, STRUCTURE).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Write the code for 'calc/utils/math_ops.py'"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model overloaded"))
        .with_priority(1)
        .mount(&server)
        .await;
    common::mount_completion(&server, "skilled software developer", "print('main')").await;

    let settings = common::settings_for(&server, temp_dir.path());
    let project = generator(&settings).generate("a calculator", false).await.unwrap();

    assert_eq!(project.files.len(), 1);
    assert_eq!(project.files[0].path, PathBuf::from("calc/main.py"));
    assert_eq!(project.failures.len(), 1);
    assert_eq!(project.failures[0].path, PathBuf::from("calc/utils/math_ops.py"));
    assert!(project.failures[0].error.contains("500"));

    // The skeleton file is still packaged, empty
    assert_eq!(archive_entry(&project.archive, "calc/utils/math_ops.py"), "");
}

#[tokio::test]
async fn test_plan_failure_aborts_before_touching_disk() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let settings = common::settings_for(&server, temp_dir.path());
    let err = generator(&settings).generate("anything", false).await.unwrap_err();

    assert!(matches!(err, WebwiseError::Api { status: 401, .. }));
    assert!(!temp_dir.path().join("projects").exists());
}

#[tokio::test]
async fn test_empty_idea_is_rejected() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();

    let settings = common::settings_for(&server, temp_dir.path());
    let err = generator(&settings).generate("  ", false).await.unwrap_err();

    assert!(matches!(err, WebwiseError::InvalidInput(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[cfg(unix)]
mod execution {
    use super::*;

    fn shell_settings(server: &MockServer, dir: &Path, max_fix_attempts: u32) -> Settings {
        Settings {
            interpreter: "sh".to_string(),
            entry_point: "main.py".to_string(),
            max_fix_attempts,
            ..common::settings_for(server, dir)
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_run_is_fixed_and_rerun() {
        let server = MockServer::start().await;
        let temp_dir = TempDir::new().unwrap();
        mount_design_stages(&server, "calc\n\tmain.py\n").await;
        common::mount_completion(&server, "skilled software developer", "```sh\necho broken >&2\n```").await;
        common::mount_completion(&server, "debugging expert", "```sh\necho fixed\n```").await;

        let settings = shell_settings(&server, temp_dir.path(), 3);
        let project = generator(&settings).generate("a shell greeter", true).await.unwrap();

        let execution = project.execution.unwrap();
        assert_eq!(execution.entry_point, Some(PathBuf::from("calc/main.py")));
        assert_eq!(execution.attempts.len(), 2);
        assert!(execution.attempts[0].failed());
        assert_eq!(execution.attempts[0].stderr.trim(), "broken");
        assert_eq!(execution.attempts[1].stdout.trim(), "fixed");
        assert_eq!(execution.fixed_files, vec![PathBuf::from("calc/main.py")]);
        assert!(execution.succeeded);

        // The archive carries the fixed code, not the first draft
        assert_eq!(archive_entry(&project.archive, "calc/main.py"), "echo fixed\n");
    }

    #[tokio::test]
    async fn test_fix_loop_is_bounded() {
        let server = MockServer::start().await;
        let temp_dir = TempDir::new().unwrap();
        mount_design_stages(&server, "calc\n\tmain.py\n").await;
        common::mount_completion(&server, "skilled software developer", "echo broken >&2").await;
        common::mount_completion(&server, "debugging expert", "echo still broken >&2").await;

        let settings = shell_settings(&server, temp_dir.path(), 1);
        let project = generator(&settings).generate("a shell greeter", true).await.unwrap();

        let execution = project.execution.unwrap();
        assert_eq!(execution.attempts.len(), 2);
        assert_eq!(execution.fixed_files.len(), 1);
        assert!(!execution.succeeded);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_reported_without_fixing() {
        let server = MockServer::start().await;
        let temp_dir = TempDir::new().unwrap();
        mount_design_stages(&server, "calc\n\tmain.py\n").await;
        common::mount_completion(&server, "skilled software developer", "print('hi')").await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_string_contains("debugging expert"))
            .respond_with(ResponseTemplate::new(200).set_body_json(common::completion_body("unused")))
            .expect(0)
            .mount(&server)
            .await;

        let settings = Settings {
            interpreter: "webwise-no-such-interpreter".to_string(),
            ..common::settings_for(&server, temp_dir.path())
        };
        let project = generator(&settings).generate("a greeter", true).await.unwrap();

        let execution = project.execution.unwrap();
        assert_eq!(execution.attempts.len(), 1);
        assert!(execution.attempts[0].stderr.starts_with("Failed to start"));
        assert!(!execution.succeeded);
    }

    #[tokio::test]
    async fn test_project_without_entry_point() {
        let server = MockServer::start().await;
        let temp_dir = TempDir::new().unwrap();
        mount_design_stages(&server, "lib\n\tcore.py\n").await;
        common::mount_completion(&server, "skilled software developer", "x = 1").await;

        let settings = shell_settings(&server, temp_dir.path(), 3);
        let project = generator(&settings).generate("a library", true).await.unwrap();

        let execution = project.execution.unwrap();
        assert_eq!(execution.entry_point, None);
        assert!(execution.attempts.is_empty());
        assert!(!execution.succeeded);
    }
}
