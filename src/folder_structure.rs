//! Folder-structure listings.
//!
//! The model answers the structure prompt with an indented tree such as
//!
//! ```text
//! todo_app/
//!     main.py
//!     models/
//!         task.py
//! ```
//!
//! Depth is the count of leading indentation characters. An entry's parent is
//! the closest earlier directory with a smaller depth.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::constants::PROSE_PREFIXES;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// Path relative to the project root
    pub path: PathBuf,
    pub kind: EntryKind,
    pub depth: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderStructure {
    entries: Vec<Entry>,
}

fn is_indent_char(c: char) -> bool {
    matches!(c, ' ' | '\t' | '│' | '├' | '└' | '─' | '|' | '`' | '-' | '*' | '+' | '\u{a0}')
}

fn is_prose(trimmed: &str) -> bool {
    PROSE_PREFIXES.iter().any(|prefix| trimmed.starts_with(prefix))
}

/// Name must stay inside the project root.
fn is_safe_name(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

impl FolderStructure {
    pub fn parse(listing: &str) -> Self {
        let mut entries = Vec::new();
        // (depth, path) of the directories that can still receive children
        let mut parents: Vec<(usize, PathBuf)> = Vec::new();

        for raw in listing.lines() {
            let line = raw.trim_end();
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("```") || is_prose(trimmed) {
                continue;
            }

            let depth = line.chars().take_while(|c| is_indent_char(*c)).count();
            let mut name: &str = line
                .char_indices()
                .find(|(_, c)| !is_indent_char(*c))
                .map(|(idx, _)| &line[idx..])
                .unwrap_or("");
            if let Some(idx) = name.find(" #") {
                name = &name[..idx];
            }
            let name = name.trim();

            let forced_dir = name.ends_with('/') || name.ends_with('\\');
            let name = name.trim_end_matches(['/', '\\']);
            if !is_safe_name(name) {
                if !name.is_empty() {
                    warn!(name, "Skipping folder entry outside the project root");
                }
                continue;
            }

            let kind = if !forced_dir && name.contains('.') {
                EntryKind::File
            } else {
                EntryKind::Directory
            };

            while parents.last().is_some_and(|(d, _)| *d >= depth) {
                parents.pop();
            }
            let path = match parents.last() {
                Some((_, parent)) => parent.join(name),
                None => PathBuf::from(name),
            };

            if kind == EntryKind::Directory {
                parents.push((depth, path.clone()));
            }
            entries.push(Entry { path, kind, depth });
        }

        debug!(entries = entries.len(), "Parsed folder structure");
        Self { entries }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn files(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.kind == EntryKind::File)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Creates every directory and an empty file for every file entry.
    ///
    /// Files that already exist are left untouched.
    pub async fn materialize(&self, root: &Path) -> Result<()> {
        tokio::fs::create_dir_all(root).await?;
        for entry in &self.entries {
            let full = root.join(&entry.path);
            match entry.kind {
                EntryKind::Directory => tokio::fs::create_dir_all(&full).await?,
                EntryKind::File => {
                    if let Some(parent) = full.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&full)
                        .await?;
                }
            }
        }
        Ok(())
    }
}
