//! Replay file reader with iterator interface
//!
//! A replay file seeds the in-memory queue with recorded messages, one JSON
//! object per line:
//!
//! ```text
//! {"eventType": "TransactionCreatedEvent", "body": {"transactionId": "...", ...}}
//! {"eventType": "TransactionCreatedEvent", "body": "{\"transactionId\": ...}"}
//! {"body": "message without an EventType attribute"}
//! ```
//!
//! `body` may be a JSON string, taken verbatim as the message body, or any
//! other JSON value, which is re-serialized. Blank lines are skipped.
//!
//! # Error Handling
//!
//! - Fatal errors (file not found) are returned from `new()`
//! - Lines that are not a replay record are yielded as Err variants, with
//!   their line number

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::types::AggregatorError;

/// One recorded queue message
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayRecord {
    /// Value of the `EventType` attribute, if the message had one
    pub event_type: Option<String>,
    /// Raw message body
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayLine {
    event_type: Option<String>,
    #[serde(default)]
    body: Value,
}

impl From<ReplayLine> for ReplayRecord {
    fn from(line: ReplayLine) -> Self {
        let body = match line.body {
            Value::String(raw) => raw,
            other => other.to_string(),
        };

        ReplayRecord {
            event_type: line.event_type,
            body,
        }
    }
}

/// Parse one line of a replay file
pub fn parse_replay_line(line: &str) -> Result<ReplayRecord, String> {
    serde_json::from_str::<ReplayLine>(line)
        .map(ReplayRecord::from)
        .map_err(|e| e.to_string())
}

/// Streaming reader over a replay file
#[derive(Debug)]
pub struct ReplayReader {
    lines: Lines<BufReader<File>>,
    line_num: usize,
}

impl ReplayReader {
    /// Open a replay file
    ///
    /// # Returns
    ///
    /// * `Ok(ReplayReader)` if the file opened successfully
    /// * `Err(AggregatorError::IoError)` if it could not be opened
    pub fn new(path: &Path) -> Result<Self, AggregatorError> {
        let file = File::open(path).map_err(|e| AggregatorError::IoError {
            message: format!("Failed to open file '{}': {}", path.display(), e),
        })?;

        Ok(Self {
            lines: BufReader::with_capacity(8 * 1024, file).lines(),
            line_num: 0,
        })
    }
}

impl Iterator for ReplayReader {
    type Item = Result<ReplayRecord, String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_num += 1;

            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(format!("Line {}: read error: {}", self.line_num, e))),
            };

            if line.trim().is_empty() {
                continue;
            }

            return Some(
                parse_replay_line(&line).map_err(|e| format!("Line {}: {}", self.line_num, e)),
            );
        }
    }
}
