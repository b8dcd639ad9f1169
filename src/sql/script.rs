//! SQL script files and `GO` batch separation
//!
//! `GO` is a client-side separator, not T-SQL: the server never sees it, so a
//! script has to be cut into batches before it is sent.

use std::path::Path;

use encoding_rs::WINDOWS_1252;

use crate::error::SqlOpsError;

/// One non-blank batch of a script, with the 1-based line it starts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<'a> {
    pub content: &'a str,
    pub start_line: usize,
}

/// Read a script as a string, trying UTF-8 first, then Windows-1252 as fallback
pub fn read_script_file(path: &Path) -> Result<String, SqlOpsError> {
    let bytes = std::fs::read(path).map_err(|source| SqlOpsError::ScriptRead {
        path: path.to_path_buf(),
        source,
    })?;

    let text = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(err) => {
            // Scripts saved by older Windows tooling are commonly 1252
            let bytes = err.into_bytes();
            let (decoded, _, had_errors) = WINDOWS_1252.decode(&bytes);
            if had_errors {
                return Err(SqlOpsError::ScriptRead {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "File contains invalid characters",
                    ),
                });
            }
            decoded.into_owned()
        }
    };

    Ok(text.trim_start_matches('\u{feff}').to_string())
}

/// A line holding only `GO` or `GO;`, in any case.
fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.eq_ignore_ascii_case("go") || trimmed.eq_ignore_ascii_case("go;")
}

fn push_batch<'a>(batches: &mut Vec<Batch<'a>>, content: &'a str, start_line: usize) {
    if !content.trim().is_empty() {
        batches.push(Batch {
            content,
            start_line,
        });
    }
}

/// Split a script into the batches sent to the server.
///
/// Each batch keeps its trailing line break. Whitespace-only batches are
/// dropped.
pub fn split_batches(content: &str) -> Vec<Batch<'_>> {
    let mut batches = Vec::new();
    let mut batch_start = 0;
    let mut batch_line = 1;
    let mut offset = 0;
    for (line_no, line) in (1..).zip(content.split_inclusive('\n')) {
        if is_separator(line) {
            push_batch(&mut batches, &content[batch_start..offset], batch_line);
            batch_start = offset + line.len();
            batch_line = line_no + 1;
        }
        offset += line.len();
    }
    push_batch(&mut batches, &content[batch_start..], batch_line);

    batches
}
