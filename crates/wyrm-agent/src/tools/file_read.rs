//! The file-read tool: tag parsing, safe execution, result formatting
//!
//! Read failures are values handed back to the model, never errors raised
//! into the stream.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

/// Largest file the tool will hand to the model
pub const MAX_FILE_SIZE: u64 = 512 * 1024;

/// How much of the head of a file is sniffed for binary content
const BINARY_SNIFF_LEN: usize = 8 * 1024;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[FILE_READ\](.*?)\[/FILE_READ\]").unwrap());

static STRIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\s*\[FILE_READ\].*?\[/FILE_READ\]\s*").unwrap());

/// Whether the text contains a well-formed file-read block
pub fn has_tag(text: &str) -> bool {
    TAG_RE.is_match(text)
}

/// Extract the requested path from the first file-read block.
/// The body is either a JSON object with a string `path` field or a bare
/// single-line path; anything else parses as nothing.
pub fn parse(text: &str) -> Option<String> {
    let body = TAG_RE.captures(text)?.get(1)?.as_str().trim();

    if body.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        return value
            .get("path")
            .and_then(|p| p.as_str())
            .map(|p| p.to_string());
    }

    if !body.is_empty() && !body.contains('\n') {
        return Some(body.to_string());
    }

    None
}

/// Remove the file-read block and the whitespace around it
pub fn strip(text: &str) -> String {
    STRIP_RE.replace_all(text, "").trim().to_string()
}

/// Ways a file read can fail, all reported back to the model as text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileReadError {
    #[error("not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("not a file")]
    NotAFile,
    #[error("too large ({0} bytes)")]
    TooLarge(u64),
    #[error("binary file")]
    Binary,
    #[error("{0}")]
    Io(String),
}

/// Read a file for the model: resolve to an absolute path, refuse
/// non-files, oversized files, and binaries, and decode as UTF-8.
pub async fn read(path: &str) -> Result<String, FileReadError> {
    let absolute = to_absolute(Path::new(path));

    let meta = tokio::fs::metadata(&absolute)
        .await
        .map_err(map_io_error)?;

    if !meta.is_file() {
        return Err(FileReadError::NotAFile);
    }
    if meta.len() > MAX_FILE_SIZE {
        return Err(FileReadError::TooLarge(meta.len()));
    }

    let bytes = tokio::fs::read(&absolute).await.map_err(map_io_error)?;

    let sniff_len = bytes.len().min(BINARY_SNIFF_LEN);
    if bytes[..sniff_len].contains(&0) {
        return Err(FileReadError::Binary);
    }

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Wrap a read outcome in the delimited block the model is re-prompted with
pub fn format(path: &str, result: &Result<String, FileReadError>) -> String {
    match result {
        Ok(content) => format!("[FILE CONTENT: {}]\n{}\n[/FILE CONTENT]", path, content),
        Err(e) => format!("[FILE ERROR: {}]\n{}\n[/FILE ERROR]", path, e),
    }
}

fn to_absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    }
}

fn map_io_error(e: std::io::Error) -> FileReadError {
    match e.kind() {
        std::io::ErrorKind::NotFound => FileReadError::NotFound,
        std::io::ErrorKind::PermissionDenied => FileReadError::PermissionDenied,
        _ => FileReadError::Io(e.to_string()),
    }
}
