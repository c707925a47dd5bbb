// Fixed prompt texts, greetings, token budgets and defaults.

use regex::Regex;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_GOOGLE_SEARCH_URL: &str = "https://www.googleapis.com";
pub const DEFAULT_FEEDBACK_FILE: &str = "feedback.json";
pub const DEFAULT_INTERPRETER: &str = "python";
pub const DEFAULT_ENTRY_POINT: &str = "main.py";
pub const DEFAULT_MAX_FIX_ATTEMPTS: u32 = 3;
pub const RUN_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PORT: u16 = 8501;

/// Name prefix of the per-run working directory under the projects dir.
pub const PROJECT_DIR_PREFIX: &str = "generated_project";
pub const ARCHIVE_FILE_NAME: &str = "project.zip";

// Web chat
pub const SEARCH_RESULT_COUNT: u32 = 3;
pub const SEARCH_CACHE_CAPACITY: usize = 128;
pub const PAGE_TEXT_BUDGET: usize = 4000;
pub const PAGE_FETCH_TIMEOUT_SECS: u64 = 15;
/// Pages read from one documentation site, the start page included.
pub const DOCS_SITE_PAGE_LIMIT: usize = 10;
pub const SITEMAP_PAGE_LIMIT: usize = 10;
pub const DIRECTORY_FILE_LIMIT: usize = 50;
/// Extensions the directory source reads.
pub const DIRECTORY_EXTENSIONS: [&str; 1] = ["txt"];
/// Separates the question from the answer for the Q&A pair source.
pub const QNA_SEPARATOR: &str = " | ";

pub const WEB_CHAT_GREETING: &str = "Hi! I'm a web-powered chatbot. Ask me anything, and I'll do my best to find the information you need!";
pub const WEB_CHAT_SYSTEM_PROMPT: &str = "You are a research assistant. Answer the user's question using the web content provided. \
    If the content does not contain the answer, say so and answer from general knowledge. Cite the source links you relied on.";
pub const WEB_CHAT_FAILURE: &str = "Could not process the data source.";
pub const WEB_CHAT_MAX_TOKENS: u32 = 2000;
/// History messages replayed to the model with each web chat prompt.
pub const WEB_CHAT_CONTEXT_WINDOW: usize = 5;

// Smart chat
pub const SMART_CHAT_GREETING: &str = "Hi! I'm a smart chatbot that can help with both general questions and project generation. \
    You can also upload documents to chat about their contents. How can I assist you today?";
pub const SMART_CHAT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant that can both chat and help with project generation. \
    You can provide information, answer questions, and help users with their projects.";
pub const SMART_CHAT_FAILURE: &str = "I encountered an error processing your request.";
pub const PROJECT_SWITCH_MESSAGE: &str = "I'll help you generate a project. Switching to Project Generator mode...";
pub const PROJECT_KEYWORDS: [&str; 3] = ["create project", "generate project", "build project"];
pub const SMART_CHAT_CONTEXT_WINDOW: usize = 5;
pub const SMART_CHAT_MAX_TOKENS: u32 = 2000;

// Project generator
pub const PLAN_SYSTEM_PROMPT: &str = "You are a highly skilled project manager with expertise in software development. Create comprehensive project plans with: \
    1. Project Overview 2. Requirements 3. Project Scope 4. Technology Stack 5. Project Structure \
    6. Development Phases 7. Testing and Deployment 8. Team Roles 9. Risk Management";
pub const PLAN_MAX_TOKENS: u32 = 4000;

pub const REQUIREMENTS_SYSTEM_PROMPT: &str =
    "You are an expert software analyst. Extract all functional and non-functional requirements for the project.";
pub const REQUIREMENTS_MAX_TOKENS: u32 = 2000;

pub const STRUCTURE_SYSTEM_PROMPT: &str = "You are an experienced software architect. Design a well-organized folder structure following best practices. \
    IMPORTANT: Respond ONLY with the folder structure, no explanatory text. Use proper indentation with tabs.";
pub const STRUCTURE_MAX_TOKENS: u32 = 1000;

pub const CODE_SYSTEM_PROMPT: &str = "You are a skilled software developer. Write clean, efficient, and well-documented code.";
pub const CODE_MAX_TOKENS: u32 = 4000;

pub const FIX_SYSTEM_PROMPT: &str = "You are a debugging expert. Fix code errors while maintaining functionality.";
pub const FIX_MAX_TOKENS: u32 = 4000;

/// Leading words that mark a folder-listing line as prose rather than an entry.
pub const PROSE_PREFIXES: [&str; 5] = ["Here", "This", "The", "A ", "An "];

lazy_static::lazy_static! {
    pub static ref URL_PATTERN: Regex =
        Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("valid URL regex");
    pub static ref SCRIPT_STYLE_PATTERN: Regex =
        Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)\s*>").expect("valid script regex");
    pub static ref HTML_TAG_PATTERN: Regex =
        Regex::new(r"(?s)<!--.*?-->|<[^>]*>").expect("valid tag regex");
    pub static ref HREF_PATTERN: Regex =
        Regex::new(r#"(?i)href\s*=\s*["']([^"'#]+)"#).expect("valid href regex");
    pub static ref WHITESPACE_PATTERN: Regex =
        Regex::new(r"\s+").expect("valid whitespace regex");
}
