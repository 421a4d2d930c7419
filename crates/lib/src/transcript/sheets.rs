//! Google Sheets transcript via the Sheets v4 REST API.
//!
//! The target sheet and its header row are created on first use. A failed setup is not
//! cached; the next record tries again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::{tail, ReplySource, Transcript, TranscriptEntry, TranscriptError};
use crate::channels::SenderId;

pub const HEADER: [&str; 6] = [
    "Timestamp",
    "Sender ID",
    "User Message",
    "Bot Response",
    "Source",
    "Language",
];

pub struct SheetsTranscript {
    base_url: String,
    spreadsheet_id: String,
    sheet_title: String,
    access_token: Option<String>,
    ready: OnceCell<()>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

impl SheetsTranscript {
    pub fn new(
        base_url: &str,
        spreadsheet_id: impl Into<String>,
        sheet_title: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            sheet_title: sheet_title.into(),
            access_token,
            ready: OnceCell::new(),
            client: reqwest::Client::new(),
        }
    }

    fn spreadsheet_url(&self) -> String {
        format!("{}/v4/spreadsheets/{}", self.base_url, self.spreadsheet_id)
    }

    /// `.../values/'<title>'!<range><suffix>` with the range as one encoded path segment.
    fn values_url(&self, range: &str, suffix: &str) -> Result<reqwest::Url, TranscriptError> {
        let mut url = reqwest::Url::parse(&self.spreadsheet_url())
            .map_err(|e| TranscriptError::NotConfigured(format!("invalid sheets url: {}", e)))?;
        let segment = format!("{}!{}{}", quote_sheet_title(&self.sheet_title), range, suffix);
        url.path_segments_mut()
            .map_err(|_| TranscriptError::NotConfigured("sheets url cannot take a path".into()))?
            .push("values")
            .push(&segment);
        Ok(url)
    }

    fn token(&self) -> Result<&str, TranscriptError> {
        self.access_token
            .as_deref()
            .ok_or_else(|| TranscriptError::NotConfigured("sheets access token not set".into()))
    }

    async fn check(res: reqwest::Response, what: &str) -> Result<reqwest::Response, TranscriptError> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(TranscriptError::Api(format!("{}: {} {}", what, status, body)))
    }

    async fn ensure_ready(&self) -> Result<(), TranscriptError> {
        self.ready
            .get_or_try_init(|| async {
                self.ensure_sheet().await?;
                self.ensure_header().await?;
                log::info!("transcript: sheet {} ready", self.sheet_title);
                Ok::<(), TranscriptError>(())
            })
            .await
            .map(|_| ())
    }

    async fn ensure_sheet(&self) -> Result<(), TranscriptError> {
        let token = self.token()?;
        let res = self
            .client
            .get(self.spreadsheet_url())
            .query(&[("fields", "sheets.properties.title")])
            .bearer_auth(token)
            .send()
            .await?;
        let meta: SpreadsheetMeta = Self::check(res, "get spreadsheet").await?.json().await?;
        if meta
            .sheets
            .iter()
            .any(|s| s.properties.title == self.sheet_title)
        {
            return Ok(());
        }
        log::info!("transcript: creating sheet {}", self.sheet_title);
        let body = serde_json::json!({
            "requests": [{ "addSheet": { "properties": { "title": self.sheet_title } } }]
        });
        let res = self
            .client
            .post(format!("{}:batchUpdate", self.spreadsheet_url()))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        Self::check(res, "add sheet").await?;
        Ok(())
    }

    async fn ensure_header(&self) -> Result<(), TranscriptError> {
        let token = self.token()?;
        let res = self
            .client
            .get(self.values_url("A1:F1", "")?)
            .bearer_auth(token)
            .send()
            .await?;
        let first: ValueRange = Self::check(res, "read header").await?.json().await?;
        if first.values.first().is_some_and(|row| !row.is_empty()) {
            return Ok(());
        }
        let res = self
            .client
            .put(self.values_url("A1:F1", "")?)
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(token)
            .json(&serde_json::json!({ "values": [HEADER] }))
            .send()
            .await?;
        Self::check(res, "write header").await?;
        Ok(())
    }
}

/// A1 notation sheet name: single-quoted, inner quotes doubled.
fn quote_sheet_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

fn entry_to_row(entry: &TranscriptEntry) -> [String; 6] {
    [
        entry.timestamp.to_rfc3339(),
        entry.sender.to_string(),
        entry.user_message.clone(),
        entry.bot_response.clone(),
        entry.source.as_str().to_string(),
        entry.language.clone(),
    ]
}

/// None for the header row and rows written by hand that don't parse.
fn row_to_entry(row: &[String]) -> Option<TranscriptEntry> {
    let cell = |i: usize| row.get(i).map(String::as_str).unwrap_or("");
    let timestamp = DateTime::parse_from_rfc3339(cell(0)).ok()?.with_timezone(&Utc);
    Some(TranscriptEntry {
        timestamp,
        sender: SenderId::from(cell(1)),
        user_message: cell(2).to_string(),
        bot_response: cell(3).to_string(),
        source: ReplySource::parse(cell(4))?,
        language: cell(5).to_string(),
    })
}

#[async_trait]
impl Transcript for SheetsTranscript {
    fn name(&self) -> &str {
        "sheets"
    }

    async fn record(&self, entry: &TranscriptEntry) -> Result<(), TranscriptError> {
        self.ensure_ready().await?;
        let res = self
            .client
            .post(self.values_url("A:F", ":append")?)
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .bearer_auth(self.token()?)
            .json(&serde_json::json!({ "values": [entry_to_row(entry)] }))
            .send()
            .await?;
        Self::check(res, "append row").await?;
        Ok(())
    }

    async fn history(
        &self,
        sender: &SenderId,
        limit: usize,
    ) -> Result<Vec<TranscriptEntry>, TranscriptError> {
        self.ensure_ready().await?;
        let res = self
            .client
            .get(self.values_url("A:F", "")?)
            .bearer_auth(self.token()?)
            .send()
            .await?;
        let data: ValueRange = Self::check(res, "read rows").await?.json().await?;
        let rows = data
            .values
            .iter()
            .filter_map(|r| row_to_entry(r))
            .filter(|e| &e.sender == sender)
            .collect();
        Ok(tail(rows, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn header_row_is_skipped() {
        assert!(row_to_entry(&strings(&HEADER)).is_none());
    }

    #[test]
    fn row_roundtrip() {
        let entry = TranscriptEntry {
            timestamp: DateTime::parse_from_rfc3339("2024-03-01T08:15:00+00:00")
                .expect("ts")
                .with_timezone(&Utc),
            sender: SenderId::from("628123"),
            user_message: "jam buka toko?".into(),
            bot_response: "Toko buka jam 9.".into(),
            source: ReplySource::Intent,
            language: "id".into(),
        };
        let row = entry_to_row(&entry);
        assert_eq!(row[4], "intent");
        assert_eq!(row_to_entry(&row), Some(entry));
    }

    #[test]
    fn short_rows_are_skipped() {
        assert!(row_to_entry(&strings(&["2024-03-01T08:15:00Z", "x"])).is_none());
    }

    #[tokio::test]
    async fn missing_token_fails_and_is_retried() {
        let t = SheetsTranscript::new("http://127.0.0.1:9", "sheet-id", "Conversations", None);
        let sender = SenderId::from("a");
        let err = t.history(&sender, 5).await.expect_err("no token");
        assert!(matches!(err, TranscriptError::NotConfigured(_)));
        assert!(!t.ready.initialized());
        assert!(t.history(&sender, 5).await.is_err());
    }

    #[test]
    fn values_url_quotes_sheet_title() {
        let t = SheetsTranscript::new("https://sheets.example/", "abc", "Conversations", None);
        assert_eq!(
            t.values_url("A:F", "").expect("url").as_str(),
            "https://sheets.example/v4/spreadsheets/abc/values/'Conversations'!A:F"
        );
        let t = SheetsTranscript::new("https://sheets.example", "abc", "Chat Log!", None);
        assert_eq!(
            t.values_url("A:F", ":append").expect("url").as_str(),
            "https://sheets.example/v4/spreadsheets/abc/values/'Chat%20Log!'!A:F:append"
        );
    }

    #[test]
    fn inner_quotes_are_doubled() {
        assert_eq!(quote_sheet_title("Budi's log"), "'Budi''s log'");
    }
}
