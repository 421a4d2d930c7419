//! JSON-lines transcript on local disk.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{tail, Transcript, TranscriptEntry, TranscriptError};
use crate::channels::SenderId;

pub struct FileTranscript {
    path: PathBuf,
    // Serializes appends so concurrent records never interleave within a line.
    write_lock: Mutex<()>,
}

impl FileTranscript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl Transcript for FileTranscript {
    fn name(&self) -> &str {
        "file"
    }

    async fn record(&self, entry: &TranscriptEntry) -> Result<(), TranscriptError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn history(
        &self,
        sender: &SenderId,
        limit: usize,
    ) -> Result<Vec<TranscriptEntry>, TranscriptError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let rows: Vec<TranscriptEntry> = raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str::<TranscriptEntry>(l) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::debug!("transcript: skipping unreadable line: {}", e);
                    None
                }
            })
            .filter(|e| &e.sender == sender)
            .collect();
        Ok(tail(rows, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::ReplySource;
    use chrono::Utc;
    use std::sync::Arc;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("sapa-transcript-{}", uuid::Uuid::new_v4()))
            .join("conversations.jsonl")
    }

    fn entry(sender: &str, n: usize) -> TranscriptEntry {
        TranscriptEntry {
            timestamp: Utc::now(),
            sender: SenderId::from(sender),
            user_message: format!("q{}", n),
            bot_response: format!("a{}", n),
            source: ReplySource::Primary,
            language: "id".to_string(),
        }
    }

    #[tokio::test]
    async fn missing_file_has_no_history() {
        let t = FileTranscript::new(temp_path());
        let rows = t.history(&SenderId::from("x"), 5).await.expect("history");
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn history_filters_sender_and_keeps_latest() {
        let path = temp_path();
        let t = FileTranscript::new(&path);
        for n in 0..7 {
            t.record(&entry("alice", n)).await.expect("record");
            t.record(&entry("bob", n)).await.expect("record");
        }
        let rows = t.history(&SenderId::from("alice"), 5).await.expect("history");
        let asked: Vec<_> = rows.iter().map(|r| r.user_message.as_str()).collect();
        assert_eq!(asked, vec!["q2", "q3", "q4", "q5", "q6"]);
        assert!(rows.iter().all(|r| r.sender.as_str() == "alice"));
        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[tokio::test]
    async fn concurrent_records_stay_line_delimited() {
        let path = temp_path();
        let t = Arc::new(FileTranscript::new(&path));
        let mut tasks = Vec::new();
        for n in 0..20 {
            let t = Arc::clone(&t);
            tasks.push(tokio::spawn(async move { t.record(&entry("c", n)).await }));
        }
        for task in tasks {
            task.await.expect("join").expect("record");
        }
        let rows = t.history(&SenderId::from("c"), 100).await.expect("history");
        assert_eq!(rows.len(), 20);
        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }
}
