//! Conversation transcript: one row per answered message.
//!
//! Recording is fire-and-forget from the router's point of view; a failing transcript
//! is logged and never reaches the sender.

mod file;
mod sheets;

pub use file::FileTranscript;
pub use sheets::SheetsTranscript;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::channels::SenderId;
use crate::config::{resolve_secret, resolve_transcript_path, Config, TranscriptBackend};

/// Rows returned by `history` when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 5;

/// Which step of the routing chain produced the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Greeting,
    Intent,
    Primary,
    Secondary,
}

impl ReplySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplySource::Greeting => "greeting",
            ReplySource::Intent => "intent",
            ReplySource::Primary => "primary",
            ReplySource::Secondary => "secondary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "greeting" => Some(ReplySource::Greeting),
            "intent" => Some(ReplySource::Intent),
            "primary" => Some(ReplySource::Primary),
            "secondary" => Some(ReplySource::Secondary),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReplySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logged exchange. `bot_response` is the answer text without attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Utc>,
    pub sender: SenderId,
    pub user_message: String,
    pub bot_response: String,
    pub source: ReplySource,
    pub language: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("transcript io: {0}")]
    Io(#[from] std::io::Error),
    #[error("transcript encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("sheets request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("sheets api error: {0}")]
    Api(String),
    #[error("transcript not configured: {0}")]
    NotConfigured(String),
}

/// Append-only conversation log.
#[async_trait]
pub trait Transcript: Send + Sync {
    fn name(&self) -> &str;
    async fn record(&self, entry: &TranscriptEntry) -> Result<(), TranscriptError>;
    /// Most recent `limit` entries for `sender`, oldest first.
    async fn history(
        &self,
        sender: &SenderId,
        limit: usize,
    ) -> Result<Vec<TranscriptEntry>, TranscriptError>;
}

/// Pick the configured backend. Sheets without a spreadsheet id falls back to the file.
pub fn build_transcript(config: &Config, config_path: &Path) -> Arc<dyn Transcript> {
    let tc = &config.transcript;
    if tc.backend == TranscriptBackend::Sheets {
        match resolve_secret("GOOGLE_SHEETS_ID", &tc.spreadsheet_id) {
            Some(spreadsheet_id) => {
                log::info!(
                    "transcript: google sheets {} ({})",
                    spreadsheet_id,
                    tc.sheet_title
                );
                return Arc::new(SheetsTranscript::new(
                    &tc.base_url,
                    spreadsheet_id,
                    tc.sheet_title.clone(),
                    resolve_secret("GOOGLE_SHEETS_ACCESS_TOKEN", &tc.access_token),
                ));
            }
            None => log::warn!("transcript: sheets selected but no spreadsheet id, using file"),
        }
    }
    let path = resolve_transcript_path(config, config_path);
    log::info!("transcript: file {}", path.display());
    Arc::new(FileTranscript::new(path))
}

/// Keep the last `limit` of `rows` (already in chronological order).
fn tail<T>(mut rows: Vec<T>, limit: usize) -> Vec<T> {
    if rows.len() > limit {
        rows.drain(..rows.len() - limit);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_names_roundtrip() {
        for s in [
            ReplySource::Greeting,
            ReplySource::Intent,
            ReplySource::Primary,
            ReplySource::Secondary,
        ] {
            assert_eq!(ReplySource::parse(s.as_str()), Some(s));
        }
        assert_eq!(ReplySource::parse("llm"), None);
    }

    #[test]
    fn tail_keeps_latest() {
        assert_eq!(tail(vec![1, 2, 3, 4, 5, 6], 5), vec![2, 3, 4, 5, 6]);
        assert_eq!(tail(vec![1, 2], 5), vec![1, 2]);
        assert!(tail(vec![1, 2], 0).is_empty());
    }

    #[test]
    fn sheets_without_id_falls_back_to_file() {
        let mut config = Config::default();
        config.transcript.backend = TranscriptBackend::Sheets;
        // GOOGLE_SHEETS_ID is not set in the test environment.
        if std::env::var("GOOGLE_SHEETS_ID").is_ok() {
            return;
        }
        let t = build_transcript(&config, Path::new("/tmp/sapa/config.json"));
        assert_eq!(t.name(), "file");
    }
}
