use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{Result, WebwiseError};

/// Answer to "Was this response helpful?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rating {
    Yes,
    No,
}

impl FromStr for Rating {
    type Err = WebwiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "y" => Ok(Rating::Yes),
            "no" | "n" => Ok(Rating::No),
            other => Err(WebwiseError::InvalidInput(format!(
                "feedback must be Yes or No, got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rating::Yes => f.write_str("Yes"),
            Rating::No => f.write_str("No"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub query: String,
    pub response: String,
    pub feedback: Rating,
}

/// Append-only JSON-lines feedback file.
#[derive(Debug)]
pub struct FeedbackLog {
    path: PathBuf,
    // Serializes appends from concurrent requests
    write_lock: Mutex<()>,
}

impl FeedbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a single line, creating the file if needed.
    pub async fn append(&self, record: &FeedbackRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        info!(path = %self.path.display(), feedback = %record.feedback, "Feedback recorded");
        Ok(())
    }

    /// Every record in file order. A missing file reads as empty.
    pub async fn records(&self) -> Result<Vec<FeedbackRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(WebwiseError::from))
            .collect()
    }
}
