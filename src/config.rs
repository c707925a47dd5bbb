use std::path::PathBuf;

use clap::Args;

use crate::constants;
use crate::error::{Result, WebwiseError};

/// Runtime settings shared by every command.
///
/// Each value can come from a flag, from the environment (a `.env` file is
/// loaded first), or fall back to its default.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, help = "API key for the completion service.")]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = constants::DEFAULT_OPENAI_BASE_URL, help = "Base URL of the completion service.")]
    pub openai_base_url: String,

    #[arg(long, env = "WEBWISE_MODEL", default_value = constants::DEFAULT_CHAT_MODEL, help = "Model identifier sent with every completion request.")]
    pub model: String,

    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true, help = "API key for Google Custom Search.")]
    pub google_api_key: Option<String>,

    #[arg(long, env = "GOOGLE_CSE_ID", help = "Custom Search engine id.")]
    pub google_cse_id: Option<String>,

    #[arg(long, env = "GOOGLE_SEARCH_URL", default_value = constants::DEFAULT_GOOGLE_SEARCH_URL, help = "Base URL of the search service.")]
    pub google_search_url: String,

    #[arg(long, env = "WEBWISE_FEEDBACK_FILE", default_value = constants::DEFAULT_FEEDBACK_FILE, help = "Append-only feedback log (JSON lines).")]
    pub feedback_file: PathBuf,

    #[arg(long, env = "WEBWISE_PROJECTS_DIR", help = "Where generated projects are assembled [default: ~/Downloads/projects].")]
    pub projects_dir: Option<PathBuf>,

    #[arg(long, env = "WEBWISE_INTERPRETER", default_value = constants::DEFAULT_INTERPRETER, help = "Program used to run a generated project.")]
    pub interpreter: String,

    #[arg(long, env = "WEBWISE_ENTRY_POINT", default_value = constants::DEFAULT_ENTRY_POINT, help = "Entry file of a generated project.")]
    pub entry_point: String,

    #[arg(long, env = "WEBWISE_MAX_FIX_ATTEMPTS", default_value_t = constants::DEFAULT_MAX_FIX_ATTEMPTS, help = "Upper bound on auto-fix rounds after a failed run.")]
    pub max_fix_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: constants::DEFAULT_OPENAI_BASE_URL.to_string(),
            model: constants::DEFAULT_CHAT_MODEL.to_string(),
            google_api_key: None,
            google_cse_id: None,
            google_search_url: constants::DEFAULT_GOOGLE_SEARCH_URL.to_string(),
            feedback_file: PathBuf::from(constants::DEFAULT_FEEDBACK_FILE),
            projects_dir: None,
            interpreter: constants::DEFAULT_INTERPRETER.to_string(),
            entry_point: constants::DEFAULT_ENTRY_POINT.to_string(),
            max_fix_attempts: constants::DEFAULT_MAX_FIX_ATTEMPTS,
        }
    }
}

impl Settings {
    pub fn openai_api_key(&self) -> Result<&str> {
        non_empty(self.openai_api_key.as_deref())
            .ok_or_else(|| WebwiseError::Config("OPENAI_API_KEY is not set".to_string()))
    }

    pub fn google_credentials(&self) -> Result<(&str, &str)> {
        let key = non_empty(self.google_api_key.as_deref())
            .ok_or_else(|| WebwiseError::Config("GOOGLE_API_KEY is not set".to_string()))?;
        let cse = non_empty(self.google_cse_id.as_deref())
            .ok_or_else(|| WebwiseError::Config("GOOGLE_CSE_ID is not set".to_string()))?;
        Ok((key, cse))
    }

    /// `~/Downloads/projects` unless overridden.
    pub fn projects_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.projects_dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| home.join("Downloads").join("projects"))
            .ok_or_else(|| WebwiseError::Config("could not determine the home directory".to_string()))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
