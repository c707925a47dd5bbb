use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

use webwise::chat::{ChatOutcome, DataSource, SmartChat, WebChat};
use webwise::completion::CompletionClient;
use webwise::config::Settings;
use webwise::constants;
use webwise::documents::{self, Document};
use webwise::feedback::{FeedbackLog, FeedbackRecord, Rating};
use webwise::project_generator::ProjectGenerator;
use webwise::search::SearchClient;
use webwise::web_context::PageFetcher;
use webwise::web_server;

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the web UI.
    Serve {
        #[arg(long, default_value_t = constants::DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
    },
    /// Chat in the terminal.
    Chat {
        #[arg(long, help = "Answer from the web instead of the smart chat.")]
        web: bool,
        #[arg(long, value_enum, default_value_t = DataSource::WebSearch, help = "Where web answers get their content.")]
        source: DataSource,
        #[arg(long, help = "Document whose text is given to the smart chat as context.")]
        document: Option<PathBuf>,
    },
    /// Generate a project from an idea and write it as a zip archive.
    Generate {
        idea: String,
        #[arg(long, help = "Run the generated code and try to fix errors.")]
        run: bool,
        #[arg(long, default_value = constants::ARCHIVE_FILE_NAME, help = "Where to write the archive.")]
        output: PathBuf,
    },
    /// Print the text extracted from a document.
    Extract { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for environment variables like API keys)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g., RUST_LOG=info,webwise=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("Webwise starting with command: {:?}", cli.command);

    match cli.command {
        Commands::Serve { port } => {
            let server = web_server::start_web_server(port, &cli.settings);
            tokio::select! {
                res = server => res.context("Web server stopped")?,
                _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, shutting down..."),
            }
        }
        Commands::Chat {
            web,
            source,
            document,
        } => {
            let client = CompletionClient::new(&cli.settings).context("Completion client is not configured")?;
            if web {
                let search = SearchClient::new(&cli.settings).ok();
                let web_chat = WebChat::new(client, search, PageFetcher::new()?);
                let feedback = FeedbackLog::new(cli.settings.feedback_file.clone());
                run_web_chat(&web_chat, source, &feedback).await?;
            } else {
                let document = match document {
                    Some(path) => Some(load_document(&path).await?),
                    None => None,
                };
                let generator = ProjectGenerator::new(client.clone(), &cli.settings)?;
                run_smart_chat(&SmartChat::new(client), &generator, document.as_ref()).await?;
            }
        }
        Commands::Generate { idea, run, output } => {
            let client = CompletionClient::new(&cli.settings).context("Completion client is not configured")?;
            let generator = ProjectGenerator::new(client, &cli.settings)?;
            generate_project(&generator, &idea, run, &output).await?;
        }
        Commands::Extract { path } => {
            let document = load_document(&path).await?;
            println!("{}", document.text);
        }
    }

    Ok(())
}

async fn load_document(path: &Path) -> Result<Document> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let document = tokio::task::spawn_blocking(move || documents::extract_text(&name, &bytes))
        .await
        .context("Document extraction task failed")??;
    info!("Successfully processed {}", document.name);
    Ok(document)
}

struct Prompter {
    lines: tokio::io::Lines<BufReader<tokio::io::Stdin>>,
    stdout: tokio::io::Stdout,
}

impl Prompter {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            stdout: tokio::io::stdout(),
        }
    }

    /// Shows `label` and reads one line; `None` at end of input.
    async fn ask(&mut self, label: &str) -> Result<Option<String>> {
        self.stdout.write_all(label.as_bytes()).await?;
        self.stdout.flush().await?;
        Ok(self.lines.next_line().await?)
    }
}

async fn run_smart_chat(chat: &SmartChat, generator: &ProjectGenerator, document: Option<&Document>) -> Result<()> {
    let mut history = SmartChat::new_history();
    let mut prompter = Prompter::new();
    println!("{}", constants::SMART_CHAT_GREETING);

    while let Some(line) = prompter.ask("\n> ").await? {
        if line.trim().is_empty() {
            continue;
        }
        match chat.respond(&mut history, &line, document).await {
            Ok(ChatOutcome::Reply(reply)) => println!("{}", reply),
            Ok(ChatOutcome::ProjectRequested(message)) => {
                println!("{}", message);
                let Some(idea) = prompter.ask("Enter your project idea: ").await? else {
                    break;
                };
                let run = prompter
                    .ask("Run the generated code? [y/N] ")
                    .await?
                    .is_some_and(|answer| answer.trim().eq_ignore_ascii_case("y"));
                if let Err(e) = generate_project(generator, &idea, run, Path::new(constants::ARCHIVE_FILE_NAME)).await {
                    error!("Project generation failed: {:?}", e);
                    println!("An error occurred: {}", e);
                }
            }
            Err(e) => println!("Error: {}\n{}", e, constants::SMART_CHAT_FAILURE),
        }
    }
    Ok(())
}

async fn run_web_chat(chat: &WebChat, source: DataSource, feedback: &FeedbackLog) -> Result<()> {
    let mut history = WebChat::new_history();
    let mut prompter = Prompter::new();
    println!("{}", constants::WEB_CHAT_GREETING);

    while let Some(line) = prompter.ask("\n> ").await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match chat.respond(&mut history, &line, source).await {
            Ok(reply) => reply,
            Err(e) => {
                println!("Error: {}", e);
                continue;
            }
        };
        if let Some(err) = &reply.error {
            println!("Error processing data: {}", err);
        }
        println!("{}", reply.answer);
        for link in &reply.sources {
            println!("  - {}", link);
        }

        let Some(answer) = prompter.ask("Was this response helpful? [y/n, Enter to skip] ").await? else {
            break;
        };
        if answer.trim().is_empty() {
            continue;
        }
        match answer.parse::<Rating>() {
            Ok(rating) => {
                let record = FeedbackRecord {
                    query: line.trim().to_string(),
                    response: reply.answer.clone(),
                    feedback: rating,
                };
                feedback.append(&record).await?;
                println!("Thank you for your feedback!");
            }
            Err(e) => println!("{}", e),
        }
    }
    Ok(())
}

async fn generate_project(generator: &ProjectGenerator, idea: &str, run: bool, output: &Path) -> Result<()> {
    println!("Generating project...");
    let project = generator.generate(idea, run).await.context("Project generation failed")?;

    println!("\n# Project Plan:\n{}", project.plan);
    println!("\n# Requirements:\n{}", project.requirements);
    println!("\n# Folder Structure:\n{}", project.folder_structure);
    println!("\n# Generated Code:");
    for file in &project.files {
        println!("\n## {}\n{}", file.path.display(), file.code);
    }
    for failure in &project.failures {
        println!("Error generating code for {}: {}", failure.path.display(), failure.error);
    }

    if let Some(execution) = &project.execution {
        for attempt in &execution.attempts {
            if attempt.failed() {
                println!("Error:\n{}", attempt.stderr);
            } else {
                println!("{}", attempt.stdout);
            }
        }
        if execution.succeeded {
            println!("Code executed successfully!");
        } else if execution.entry_point.is_none() {
            println!("No entry point found to run.");
        }
    }

    tokio::fs::write(output, &project.archive)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("\nProject archive written to {}", output.display());
    Ok(())
}
