//! Project generator.
//!
//! An idea goes through a fixed sequence of completion calls: plan,
//! requirements, folder structure, then one call per file. The tree is
//! written to a fresh working directory, optionally run (with a bounded
//! ask-the-model-to-fix loop), zipped into memory, and the directory removed.

use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::completion::CompletionClient;
use crate::config::Settings;
use crate::constants;
use crate::error::{Result, WebwiseError};
use crate::folder_structure::FolderStructure;

const FENCE: &str = "```";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plan,
    Requirements,
    Structure,
    Code,
    Execute,
    Fix,
    Package,
    Done,
}

/// Progress notification for whoever is watching a generation run.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionAttempt {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionAttempt {
    /// Anything on stderr counts as a failure, as does a non-zero exit.
    pub fn failed(&self) -> bool {
        self.exit_code != Some(0) || !self.stderr.trim().is_empty()
    }

    fn error_text(&self) -> String {
        if self.stderr.trim().is_empty() {
            match self.exit_code {
                Some(code) => format!("Process exited with status {}", code),
                None => "Process terminated without an exit status".to_string(),
            }
        } else {
            self.stderr.clone()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    /// Entry file relative to the project root, if one was found
    pub entry_point: Option<PathBuf>,
    pub attempts: Vec<ExecutionAttempt>,
    pub fixed_files: Vec<PathBuf>,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedProject {
    pub idea: String,
    pub plan: String,
    pub requirements: String,
    pub folder_structure: String,
    pub files: Vec<GeneratedFile>,
    pub failures: Vec<FileFailure>,
    pub execution: Option<ExecutionReport>,
    #[serde(skip)]
    pub archive: Vec<u8>,
}

// Output of the filesystem half of a run
struct Assembled {
    files: Vec<GeneratedFile>,
    failures: Vec<FileFailure>,
    execution: Option<ExecutionReport>,
    archive: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct ProjectGenerator {
    client: CompletionClient,
    projects_dir: PathBuf,
    interpreter: String,
    entry_point: String,
    max_fix_attempts: u32,
    run_timeout: Duration,
    progress: Option<broadcast::Sender<ProgressEvent>>,
}

impl ProjectGenerator {
    pub fn new(client: CompletionClient, settings: &Settings) -> Result<Self> {
        Ok(Self {
            client,
            projects_dir: settings.projects_dir()?,
            interpreter: settings.interpreter.clone(),
            entry_point: settings.entry_point.clone(),
            max_fix_attempts: settings.max_fix_attempts,
            run_timeout: Duration::from_secs(constants::RUN_TIMEOUT_SECS),
            progress: None,
        })
    }

    /// Sends stage updates to `tx` while generating.
    pub fn with_progress(mut self, tx: broadcast::Sender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    fn report(&self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        info!(?stage, "{}", message);
        if let Some(tx) = &self.progress {
            // No subscribers is fine
            let _ = tx.send(ProgressEvent { stage, message });
        }
    }

    pub async fn project_plan(&self, idea: &str) -> Result<String> {
        let user = format!("Create a comprehensive project plan for this idea: {}", idea);
        self.client
            .ask(constants::PLAN_SYSTEM_PROMPT, &user, constants::PLAN_MAX_TOKENS)
            .await
    }

    pub async fn requirements(&self, idea: &str) -> Result<String> {
        let user = format!("Extract the requirements for this project idea: {}", idea);
        self.client
            .ask(constants::REQUIREMENTS_SYSTEM_PROMPT, &user, constants::REQUIREMENTS_MAX_TOKENS)
            .await
    }

    pub async fn folder_structure(&self, idea: &str) -> Result<String> {
        let user = format!("Design the folder structure for this project: {}", idea);
        self.client
            .ask(constants::STRUCTURE_SYSTEM_PROMPT, &user, constants::STRUCTURE_MAX_TOKENS)
            .await
    }

    pub async fn code_for_file(&self, prompt: &str, file_path: &Path) -> Result<String> {
        let user = format!(
            "Write the code for '{}' with this functionality: {}",
            file_path.display(),
            prompt
        );
        self.client
            .ask(constants::CODE_SYSTEM_PROMPT, &user, constants::CODE_MAX_TOKENS)
            .await
    }

    pub async fn fix_code(&self, error_message: &str, code: &str, file_path: &Path) -> Result<String> {
        let user = format!(
            "Fix this error in '{}':\n{}\n\nCode:\n{}",
            file_path.display(),
            error_message,
            code
        );
        self.client
            .ask(constants::FIX_SYSTEM_PROMPT, &user, constants::FIX_MAX_TOKENS)
            .await
    }

    /// Runs the whole pipeline for one idea.
    ///
    /// The working directory is removed before returning, on success or error.
    #[instrument(skip(self))]
    pub async fn generate(&self, idea: &str, run: bool) -> Result<GeneratedProject> {
        let idea = idea.trim();
        if idea.is_empty() {
            return Err(WebwiseError::InvalidInput("project idea is empty".to_string()));
        }

        self.report(Stage::Plan, "Generating project plan...");
        let plan = self.project_plan(idea).await?;

        self.report(Stage::Requirements, "Extracting requirements...");
        let requirements = self.requirements(idea).await?;

        self.report(Stage::Structure, "Designing folder structure...");
        let folder_structure = self.folder_structure(idea).await?;
        let structure = FolderStructure::parse(&folder_structure);
        if structure.is_empty() {
            warn!("Folder structure listing had no usable entries");
        }

        tokio::fs::create_dir_all(&self.projects_dir).await?;
        let workdir = tempfile::Builder::new()
            .prefix(constants::PROJECT_DIR_PREFIX)
            .tempdir_in(&self.projects_dir)?;
        info!(path = %workdir.path().display(), "Assembling project");

        let assembled = self
            .assemble(workdir.path(), idea, &requirements, &folder_structure, &structure, run)
            .await;

        if let Err(e) = workdir.close() {
            warn!(error = %e, "Failed to remove project working directory");
        }
        let Assembled {
            files,
            failures,
            execution,
            archive,
        } = assembled?;

        self.report(Stage::Done, format!("Generated {} files", files.len()));
        Ok(GeneratedProject {
            idea: idea.to_string(),
            plan,
            requirements,
            folder_structure,
            files,
            failures,
            execution,
            archive,
        })
    }

    async fn assemble(
        &self,
        root: &Path,
        idea: &str,
        requirements: &str,
        folder_structure: &str,
        structure: &FolderStructure,
        run: bool,
    ) -> Result<Assembled> {
        structure.materialize(root).await?;

        let mut files = Vec::new();
        let mut failures = Vec::new();
        for entry in structure.files() {
            self.report(Stage::Code, format!("Writing {}", entry.path.display()));
            let prompt = format!(
                "Project: {}\nFile: {}\nStructure:\n{}\nRequirements:\n{}",
                idea,
                entry.path.display(),
                folder_structure,
                requirements
            );

            let code = match self.code_for_file(&prompt, &entry.path).await {
                Ok(raw) => strip_code_fence(&raw),
                Err(e) => {
                    error!(path = %entry.path.display(), error = %e, "Error generating code");
                    failures.push(FileFailure {
                        path: entry.path.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            tokio::fs::write(root.join(&entry.path), &code).await?;
            files.push(GeneratedFile {
                path: entry.path.clone(),
                code,
            });
        }

        let execution = if run {
            Some(self.execute(root).await?)
        } else {
            None
        };

        self.report(Stage::Package, "Packaging project archive...");
        let archive = blocking(root, zip_directory).await?;
        Ok(Assembled {
            files,
            failures,
            execution,
            archive,
        })
    }

    /// Runs the entry point; on failure asks the model to fix one file and retries.
    pub async fn execute(&self, root: &Path) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();
        let name = self.entry_point.clone();
        let Some(entry) = blocking(root, move |root| find_entry_point(root, &name)).await? else {
            warn!(entry_point = %self.entry_point, "No entry point in generated project");
            return Ok(report);
        };
        let run_dir = entry.parent().unwrap_or(root).to_path_buf();
        report.entry_point = entry.strip_prefix(root).ok().map(Path::to_path_buf);

        let mut fixes = 0;
        loop {
            self.report(Stage::Execute, format!("Running {} {}", self.interpreter, self.entry_point));
            let attempt = match self.run_once(&run_dir).await {
                Ok(attempt) => attempt,
                Err(message) => {
                    // The interpreter itself is unusable; no code fix will help
                    error!(%message, "Could not run generated project");
                    report.attempts.push(ExecutionAttempt {
                        exit_code: None,
                        stdout: String::new(),
                        stderr: message,
                    });
                    return Ok(report);
                }
            };

            let failed = attempt.failed();
            let error_text = attempt.error_text();
            report.attempts.push(attempt);
            if !failed {
                report.succeeded = true;
                self.report(Stage::Execute, "Code executed successfully!");
                return Ok(report);
            }

            if fixes >= self.max_fix_attempts {
                warn!(fixes, "Giving up after reaching the fix attempt limit");
                return Ok(report);
            }
            fixes += 1;

            self.report(Stage::Fix, "Attempting to fix errors...");
            match self.fix_one_file(root, &run_dir, &error_text).await? {
                Some(fixed) => report.fixed_files.push(fixed),
                None => {
                    warn!("Model proposed no changes; stopping");
                    return Ok(report);
                }
            }
        }
    }

    async fn run_once(&self, dir: &Path) -> std::result::Result<ExecutionAttempt, String> {
        let child = Command::new(&self.interpreter)
            .arg(&self.entry_point)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to start {}: {}", self.interpreter, e))?;

        match tokio::time::timeout(self.run_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ExecutionAttempt {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(format!("Failed to collect output: {}", e)),
            Err(_) => Ok(ExecutionAttempt {
                exit_code: None,
                stdout: String::new(),
                stderr: format!("Execution timed out after {}s", self.run_timeout.as_secs()),
            }),
        }
    }

    /// Rewrites the first sibling source file whose proposed fix differs.
    async fn fix_one_file(&self, root: &Path, dir: &Path, error_text: &str) -> Result<Option<PathBuf>> {
        let extension = Path::new(&self.entry_point)
            .extension()
            .map(|e| e.to_os_string());
        let mut candidates = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && path.extension().map(|e| e.to_os_string()) == extension {
                candidates.push(path);
            }
        }
        candidates.sort();

        for path in candidates {
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            let original = tokio::fs::read_to_string(&path).await?;
            let fixed = strip_code_fence(&self.fix_code(error_text, &original, &relative).await?);
            if fixed != original {
                info!(file = %relative.display(), "Applying fix");
                tokio::fs::write(&path, &fixed).await?;
                return Ok(Some(relative));
            }
        }
        Ok(None)
    }
}

/// Runs a filesystem walk over `root` on the blocking pool.
async fn blocking<T, F>(root: &Path, walk: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Path) -> Result<T> + Send + 'static,
{
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || walk(&root))
        .await
        .map_err(|e| WebwiseError::Io(std::io::Error::other(e)))?
}

/// Unwraps a reply that is one fenced code block from its first to its last line.
///
/// Anything else, including text that merely contains fenced blocks (a README
/// with an install snippet), is returned unchanged.
pub fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    let fenced = trimmed.len() > 2 * FENCE.len() && trimmed.starts_with(FENCE) && trimmed.ends_with(FENCE);
    let Some((_, rest)) = trimmed.split_once('\n').filter(|_| fenced) else {
        return raw.to_string();
    };
    let body = rest.strip_suffix(FENCE).unwrap_or(rest);
    let mut code = body.trim_end().to_string();
    code.push('\n');
    code
}

/// Breadth-first search for `name` below `root`, shallowest match first.
pub fn find_entry_point(root: &Path, name: &str) -> Result<Option<PathBuf>> {
    let mut queue = VecDeque::from([root.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        let mut children: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        children.sort();

        for child in &children {
            if child.is_file() && child.file_name().is_some_and(|f| f == name) {
                return Ok(Some(child.clone()));
            }
        }
        queue.extend(children.into_iter().filter(|c| c.is_dir()));
    }
    Ok(None)
}

/// Zips the contents of `root` (not `root` itself) into memory.
pub fn zip_directory(root: &Path) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    add_directory(&mut writer, root, root, options)?;
    Ok(writer.finish()?.into_inner())
}

fn add_directory(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    root: &Path,
    dir: &Path,
    options: SimpleFileOptions,
) -> Result<()> {
    let mut children: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    children.sort();

    for path in children {
        let name = archive_name(root, &path);
        if path.is_dir() {
            writer.add_directory(format!("{}/", name), options)?;
            add_directory(writer, root, &path, options)?;
        } else {
            writer.start_file(name, options)?;
            writer.write_all(&std::fs::read(&path)?)?;
        }
    }
    Ok(())
}

fn archive_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
