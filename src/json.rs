//! JSON decoding that reports where a payload went wrong.
//!
//! Google responses and extractor output are both large, loosely specified
//! documents; a bare serde error ("invalid type: null, expected a string")
//! says nothing about which field failed. [`decode`] adds the field path,
//! position, and a marked excerpt of the offending line.

use std::fmt;

use serde::de::DeserializeOwned;

/// Characters of context shown around the failing column.
const SNIPPET_WIDTH: usize = 24;

/// A JSON payload that did not match the expected shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonDiagnostic {
    /// Dotted field path, e.g. `payload.parts[1].filename`. Empty at the root.
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub reason: String,
    pub snippet: String,
}

impl fmt::Display for JsonDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.path.is_empty() {
            write!(f, "at '{}': ", self.path)?;
        }
        write!(
            f,
            "{} (line {} col {})\n{}",
            self.reason, self.line, self.column, self.snippet
        )
    }
}

impl std::error::Error for JsonDiagnostic {}

pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T, JsonDiagnostic> {
    let deserializer = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(deserializer).map_err(|err| {
        let path = match err.path().to_string() {
            p if p == "." => String::new(),
            p => p,
        };
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let message = inner.to_string();
        let location = format!(" at line {line} column {column}");
        let message = message.strip_suffix(&location).unwrap_or(&message);

        JsonDiagnostic {
            path,
            line,
            column,
            reason: describe(message),
            snippet: excerpt(body, line, column),
        }
    })
}

/// Rephrase serde's "invalid type: X, expected Y" as "expected Y, got X".
fn describe(message: &str) -> String {
    message
        .strip_prefix("invalid type: ")
        .or_else(|| message.strip_prefix("invalid value: "))
        .and_then(|rest| rest.split_once(", expected "))
        .map(|(actual, expected)| format!("expected {}, got {actual}", expected.trim()))
        .unwrap_or_else(|| message.to_owned())
}

/// The failing line trimmed to a window around `column`, with a caret under it.
fn excerpt(body: &str, line: usize, column: usize) -> String {
    let text = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if text.trim().is_empty() {
        return "(empty line)".to_owned();
    }

    let chars: Vec<char> = text.chars().collect();
    let at = column.saturating_sub(1).min(chars.len().saturating_sub(1));
    let start = at.saturating_sub(SNIPPET_WIDTH / 2);
    let end = (at + SNIPPET_WIDTH / 2).min(chars.len());
    let window: String = chars[start..end].iter().collect();

    format!("  {window}\n  {}^", " ".repeat(at - start))
}
