//! Document ingestion.
//!
//! An upload arrives as raw bytes plus its file name. The extension picks an
//! extractor, and every extractor reduces the file to a single text blob that
//! can be handed to the model as context.

use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto_from_rs, Data, Reader as _};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::constants;
use crate::error::{Result, WebwiseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Word,
    Excel,
    Xml,
    PlainText,
}

impl DocumentKind {
    /// Maps a file extension (case-insensitive, without the dot) to its extractor.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "doc" | "docx" => Some(Self::Word),
            "xls" | "xlsx" => Some(Self::Excel),
            "xml" => Some(Self::Xml),
            "txt" | "json" | "csv" => Some(Self::PlainText),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Pdf => "PDF",
            Self::Word => "Word",
            Self::Excel => "Excel",
            Self::Xml => "XML",
            Self::PlainText => "text",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Text extracted from an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub name: String,
    pub kind: DocumentKind,
    pub text: String,
}

/// Extension of `file_name`: everything after the last dot.
pub fn extension_of(file_name: &str) -> &str {
    file_name.rsplit('.').next().unwrap_or("")
}

#[instrument(skip(bytes), fields(size = bytes.len()))]
pub fn extract_text(file_name: &str, bytes: &[u8]) -> Result<Document> {
    let ext = extension_of(file_name);
    let kind = DocumentKind::from_extension(ext)
        .ok_or_else(|| WebwiseError::UnsupportedFormat(ext.to_string()))?;

    let text = match kind {
        DocumentKind::Pdf => extract_pdf(bytes)?,
        DocumentKind::Word => extract_docx(bytes)?,
        DocumentKind::Excel => extract_excel(bytes)?,
        DocumentKind::Xml => extract_xml(bytes)?,
        DocumentKind::PlainText => String::from_utf8(bytes.to_vec())
            .map_err(|e| WebwiseError::extraction(kind.label(), e))?,
    };

    debug!(%kind, chars = text.len(), "Extracted document text");
    Ok(Document {
        name: file_name.to_string(),
        kind,
        text,
    })
}

/// Reads a file from disk and extracts it like an upload of the same name.
pub fn load_file(path: &Path) -> Result<Document> {
    let bytes = std::fs::read(path)?;
    let mut document = extract_text(&path.to_string_lossy(), &bytes)?;
    if let Some(name) = path.file_name() {
        document.name = name.to_string_lossy().into_owned();
    }
    Ok(document)
}

/// Every file under `dir` with one of the directory extensions, recursively,
/// in path order. Each document is named by its full path.
#[instrument]
pub fn load_directory(dir: &Path) -> Result<Vec<Document>> {
    let mut files = Vec::new();
    collect_files(dir, &mut files)?;
    files.sort();
    if files.len() > constants::DIRECTORY_FILE_LIMIT {
        warn!(found = files.len(), "Directory has too many files, reading the first ones");
        files.truncate(constants::DIRECTORY_FILE_LIMIT);
    }

    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let bytes = std::fs::read(&path)?;
        let mut document = extract_text(&path.to_string_lossy(), &bytes)?;
        document.name = path.display().to_string();
        documents.push(document);
    }
    debug!(files = documents.len(), "Loaded directory");
    Ok(documents)
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&path, files)?;
        } else if file_type.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| constants::DIRECTORY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        {
            files.push(path);
        }
    }
    Ok(())
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| WebwiseError::extraction("PDF", e))?;
    Ok(text)
}

/// One line per `w:p` paragraph of `word/document.xml`.
fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| WebwiseError::extraction("Word", e))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| WebwiseError::extraction("Word", e))?
        .read_to_string(&mut xml)?;

    let mut reader = Reader::from_str(&xml);
    let mut text = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:t" => in_text_run = true,
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text_run = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => text.push('\t'),
                b"w:br" | b"w:cr" => text.push('\n'),
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text_run => {
                let unescaped = t.unescape().map_err(|e| WebwiseError::extraction("Word", e))?;
                text.push_str(&unescaped);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(WebwiseError::extraction("Word", e)),
            _ => {}
        }
    }
    Ok(text)
}

/// First worksheet as an aligned table: header row, then indexed data rows.
fn extract_excel(bytes: &[u8]) -> Result<String> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| WebwiseError::extraction("Excel", e))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| WebwiseError::extraction("Excel", "workbook has no sheets"))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| WebwiseError::extraction("Excel", e))?;

    let rows: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();
    Ok(render_table(&rows))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn render_table(rows: &[Vec<String>]) -> String {
    let Some((header, body)) = rows.split_first() else {
        return "Empty DataFrame".to_string();
    };

    // Row labels form the first column; the header row gets a blank label.
    let mut table: Vec<Vec<String>> = Vec::with_capacity(rows.len());
    table.push(std::iter::once(String::new()).chain(header.iter().cloned()).collect());
    for (i, row) in body.iter().enumerate() {
        table.push(std::iter::once(i.to_string()).chain(row.iter().cloned()).collect());
    }

    let columns = table.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|c| {
            table
                .iter()
                .filter_map(|r| r.get(c))
                .map(|s| s.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    table
        .iter()
        .map(|row| {
            let cells: Vec<String> = (0..columns)
                .map(|c| {
                    let cell = row.get(c).map(String::as_str).unwrap_or("");
                    if c == 0 {
                        format!("{:<width$}", cell, width = widths[c])
                    } else {
                        format!("{:>width$}", cell, width = widths[c])
                    }
                })
                .collect();
            cells.join("  ").trim_end().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// All text nodes concatenated in document order.
fn extract_xml(bytes: &[u8]) -> Result<String> {
    let source = std::str::from_utf8(bytes).map_err(|e| WebwiseError::extraction("XML", e))?;
    let mut reader = Reader::from_str(source);
    let mut text = String::new();
    let mut depth: usize = 0;
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => {
                depth += 1;
                saw_root = true;
            }
            Ok(Event::Empty(_)) => saw_root = true,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Text(t)) if depth > 0 => {
                let unescaped = t.unescape().map_err(|e| WebwiseError::extraction("XML", e))?;
                text.push_str(&unescaped);
            }
            Ok(Event::CData(c)) if depth > 0 => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(WebwiseError::extraction("XML", e)),
            _ => {}
        }
    }

    if !saw_root {
        return Err(WebwiseError::extraction("XML", "no root element"));
    }
    Ok(text)
}
