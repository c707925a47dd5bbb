// Chat front-ends: the document-aware smart chat and the web-powered chat.
// Both are used by the web UI and by the interactive CLI session.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::completion::CompletionClient;
use crate::constants;
use crate::documents::{self, Document};
use crate::error::{Result, WebwiseError};
use crate::history::{ChatHistory, ChatMessage};
use crate::search::SearchClient;
use crate::web_context::{self, PageFetcher, PageText};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum ChatOutcome {
    Reply(String),
    /// The prompt asked for a project; the UI should switch modes.
    ProjectRequested(String),
}

/// True when the prompt asks for a project to be generated.
pub fn wants_project(prompt: &str) -> bool {
    let lowered = prompt.to_lowercase();
    constants::PROJECT_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

fn require_prompt(prompt: &str) -> Result<&str> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(WebwiseError::InvalidInput("prompt is empty".to_string()));
    }
    Ok(prompt)
}

#[derive(Clone, Debug)]
pub struct SmartChat {
    client: CompletionClient,
}

impl SmartChat {
    pub fn new(client: CompletionClient) -> Self {
        Self { client }
    }

    pub fn new_history() -> ChatHistory {
        ChatHistory::with_greeting(constants::SMART_CHAT_GREETING)
    }

    /// Answers one prompt and records both sides in `history`.
    ///
    /// On a failed completion the generic failure reply is recorded and the
    /// error returned for the caller to display.
    #[instrument(skip(self, history, document), fields(history = history.len()))]
    pub async fn respond(
        &self,
        history: &mut ChatHistory,
        prompt: &str,
        document: Option<&Document>,
    ) -> Result<ChatOutcome> {
        let prompt = require_prompt(prompt)?;

        if wants_project(prompt) {
            info!("Prompt asks for a project, switching modes");
            history.push(ChatMessage::user(prompt));
            history.push(ChatMessage::assistant(constants::PROJECT_SWITCH_MESSAGE));
            return Ok(ChatOutcome::ProjectRequested(
                constants::PROJECT_SWITCH_MESSAGE.to_string(),
            ));
        }

        let messages = build_smart_messages(history.recent(constants::SMART_CHAT_CONTEXT_WINDOW), prompt, document);
        history.push(ChatMessage::user(prompt));

        match self.client.complete(&messages, constants::SMART_CHAT_MAX_TOKENS).await {
            Ok(reply) => {
                history.push(ChatMessage::assistant(reply.clone()));
                Ok(ChatOutcome::Reply(reply))
            }
            Err(e) => {
                error!(error = %e, "Smart chat completion failed");
                history.push(ChatMessage::assistant(constants::SMART_CHAT_FAILURE));
                Err(e)
            }
        }
    }
}

fn build_smart_messages(context: &[ChatMessage], prompt: &str, document: Option<&Document>) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(constants::SMART_CHAT_SYSTEM_PROMPT)];
    if let Some(doc) = document {
        messages.push(ChatMessage::system(format!(
            "Context from uploaded document:\n{}",
            doc.text
        )));
    }
    messages.extend_from_slice(context);
    messages.push(ChatMessage::user(prompt));
    messages
}

/// Where the web chat gets its context from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DataSource {
    /// Search the web for the prompt and read the top results.
    #[default]
    WebSearch,
    /// Read the page at the first URL in the prompt.
    WebPage,
    /// Read a documentation site starting at the first URL in the prompt.
    DocsWebsite,
    /// Read the pages listed by the sitemap at the first URL in the prompt.
    Sitemap,
    /// Read the local file named in the prompt.
    File,
    /// Read the text files under the local directory named in the prompt.
    Directory,
    /// Answer from a `question | answer` pair given as the prompt.
    QnaPair,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebChatReply {
    pub answer: String,
    pub sources: Vec<String>,
    /// Set when the data source could not be processed
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct WebChat {
    client: CompletionClient,
    search: Option<SearchClient>,
    fetcher: PageFetcher,
}

impl WebChat {
    pub fn new(client: CompletionClient, search: Option<SearchClient>, fetcher: PageFetcher) -> Self {
        if search.is_none() {
            warn!("Web search is not configured; only the web-page source will work");
        }
        Self {
            client,
            search,
            fetcher,
        }
    }

    pub fn new_history() -> ChatHistory {
        ChatHistory::with_greeting(constants::WEB_CHAT_GREETING)
    }

    /// Answers one prompt from web content. Processing failures become the
    /// generic failure reply; only an empty prompt is an error.
    #[instrument(skip(self, history), fields(history = history.len()))]
    pub async fn respond(
        &self,
        history: &mut ChatHistory,
        prompt: &str,
        source: DataSource,
    ) -> Result<WebChatReply> {
        let prompt = require_prompt(prompt)?;
        let context = history.recent(constants::WEB_CHAT_CONTEXT_WINDOW).to_vec();
        history.push(ChatMessage::user(prompt));

        let reply = match self.answer(&context, prompt, source).await {
            Ok((answer, sources)) => WebChatReply {
                answer,
                sources,
                error: None,
            },
            Err(e) => {
                error!(error = %e, "Error processing data");
                WebChatReply {
                    answer: constants::WEB_CHAT_FAILURE.to_string(),
                    sources: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };

        history.push(ChatMessage::assistant(reply.answer.clone()));
        Ok(reply)
    }

    async fn answer(&self, context: &[ChatMessage], prompt: &str, source: DataSource) -> Result<(String, Vec<String>)> {
        let gathered = self.gather(prompt, source).await?;

        let mut messages = vec![ChatMessage::system(constants::WEB_CHAT_SYSTEM_PROMPT)];
        if let Some(content) = gathered.content {
            messages.push(ChatMessage::system(content));
        }
        messages.extend_from_slice(context);
        messages.push(ChatMessage::user(prompt));

        let answer = self.client.complete(&messages, constants::WEB_CHAT_MAX_TOKENS).await?;
        Ok((answer, gathered.sources))
    }

    async fn gather(&self, prompt: &str, source: DataSource) -> Result<Gathered> {
        match source {
            DataSource::WebSearch => {
                let search = self.search.as_ref().ok_or_else(|| {
                    WebwiseError::Config("GOOGLE_API_KEY and GOOGLE_CSE_ID are required for web search".to_string())
                })?;
                let results = search.search(prompt, constants::SEARCH_RESULT_COUNT).await?;
                info!(count = results.len(), "Analyzing search results...");
                Ok(Gathered::web(self.fetcher.gather(&results).await))
            }
            DataSource::WebPage => {
                let url = prompt_url(prompt, "web page")?;
                info!(url, "Analyzing web page...");
                Ok(Gathered::web(vec![self.fetcher.fetch(url).await?]))
            }
            DataSource::DocsWebsite => {
                let url = prompt_url(prompt, "docs website")?;
                info!(url, "Analyzing docs website...");
                Ok(Gathered::web(self.fetcher.crawl_docs(url).await?))
            }
            DataSource::Sitemap => {
                let url = prompt_url(prompt, "sitemap")?;
                info!(url, "Analyzing sitemap...");
                Ok(Gathered::web(self.fetcher.sitemap(url).await?))
            }
            DataSource::File => {
                let path = prompt_path(prompt, false).await?;
                info!(path = %path.display(), "Analyzing file...");
                let document = on_blocking_pool(move || documents::load_file(&path)).await?;
                Ok(Gathered::local(vec![document]))
            }
            DataSource::Directory => {
                let path = prompt_path(prompt, true).await?;
                info!(path = %path.display(), "Analyzing directory...");
                let documents = on_blocking_pool(move || documents::load_directory(&path)).await?;
                Ok(Gathered::local(documents))
            }
            DataSource::QnaPair => {
                let (question, answer) = split_qna(prompt)?;
                info!("Analyzing Q&A pair...");
                Ok(Gathered {
                    content: Some(format!("Q&A pair:\nQuestion: {}\nAnswer: {}", question, answer)),
                    sources: Vec::new(),
                })
            }
        }
    }
}

/// Context gathered from a data source, ready for a system message.
struct Gathered {
    content: Option<String>,
    sources: Vec<String>,
}

impl Gathered {
    fn web(pages: Vec<PageText>) -> Self {
        Self::from_pages("Web content", pages)
    }

    fn local(documents: Vec<Document>) -> Self {
        let pages = documents
            .into_iter()
            .map(|doc| PageText {
                link: doc.name,
                text: web_context::truncate_chars(&doc.text, constants::PAGE_TEXT_BUDGET),
            })
            .collect();
        Self::from_pages("File content", pages)
    }

    fn from_pages(heading: &str, pages: Vec<PageText>) -> Self {
        let content = (!pages.is_empty())
            .then(|| format!("{}:\n{}", heading, web_context::build_context(&pages)));
        Self {
            content,
            sources: pages.into_iter().map(|p| p.link).collect(),
        }
    }
}

fn prompt_url<'a>(prompt: &'a str, source: &str) -> Result<&'a str> {
    web_context::extract_first_url(prompt)
        .ok_or_else(|| WebwiseError::InvalidInput(format!("the {} source needs a URL in the prompt", source)))
}

/// First word of the prompt that names an existing file, or directory when
/// `directory` is set.
async fn prompt_path(prompt: &str, directory: bool) -> Result<PathBuf> {
    for word in prompt.split_whitespace() {
        let candidate = word
            .trim_matches(['"', '\'', '`'])
            .trim_end_matches(['?', ',', ';', ':']);
        if candidate.is_empty() {
            continue;
        }
        if let Ok(meta) = tokio::fs::metadata(candidate).await {
            if (directory && meta.is_dir()) || (!directory && meta.is_file()) {
                return Ok(PathBuf::from(candidate));
            }
        }
    }
    let wanted = if directory { "directory" } else { "file" };
    Err(WebwiseError::InvalidInput(format!(
        "the {} source needs an existing {} path in the prompt",
        wanted, wanted
    )))
}

async fn on_blocking_pool<T, F>(read: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(read)
        .await
        .map_err(|e| WebwiseError::Io(std::io::Error::other(e)))?
}

fn split_qna(prompt: &str) -> Result<(&str, &str)> {
    let mut parts = prompt.split(constants::QNA_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(question), Some(answer), None) if !question.trim().is_empty() && !answer.trim().is_empty() => {
            Ok((question.trim(), answer.trim()))
        }
        _ => Err(WebwiseError::InvalidInput(
            "the Q&A pair source expects 'question | answer'".to_string(),
        )),
    }
}
