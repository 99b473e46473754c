use crate::config::ApiConfig;
use crate::error::{PipelineError, Result};
use crate::model::{Document, SessionToken};
use log::debug;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Drive MIME type of a native spreadsheet
pub const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";

/// Result of presenting the selection surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    Picked(Document),
    /// The user dismissed the surface without choosing
    Cancelled,
}

/// Lets an authenticated session choose one spreadsheet
pub trait DocumentPicker: Send + Sync {
    /// # Errors
    /// * `PickerFailure` if the selection surface could not be loaded
    fn pick(&self, token: &SessionToken) -> impl Future<Output = Result<PickOutcome>> + Send;
}

/// The interactive half of the picker: choose among listed spreadsheets
pub trait Chooser: Send + Sync {
    /// # Returns
    /// * `Result<Option<Document>>` - The chosen document, `None` when dismissed
    fn choose(&self, documents: Vec<Document>) -> impl Future<Output = Result<Option<Document>>> + Send;
}

/// Picks the first spreadsheet with an exact title
#[derive(Debug, Clone)]
pub struct TitleChooser {
    title: String,
}

impl TitleChooser {
    pub fn new(title: impl Into<String>) -> Self {
        TitleChooser { title: title.into() }
    }
}

impl Chooser for TitleChooser {
    async fn choose(&self, documents: Vec<Document>) -> Result<Option<Document>> {
        Ok(documents.into_iter().find(|doc| doc.title == self.title))
    }
}

/// Numbered list on stderr, choice read from stdin
///
/// Empty input or `q` dismisses the picker.
#[derive(Debug, Clone, Default)]
pub struct PromptChooser;

impl Chooser for PromptChooser {
    async fn choose(&self, documents: Vec<Document>) -> Result<Option<Document>> {
        let mut stderr = tokio::io::stderr();
        if documents.is_empty() {
            stderr
                .write_all(b"No spreadsheets found in your Drive.\n")
                .await
                .map_err(|e| PipelineError::Picker(e.to_string()))?;
            return Ok(None);
        }

        let mut menu = String::from("Choose a spreadsheet:\n");
        for (i, doc) in documents.iter().enumerate() {
            menu.push_str(&format!("  {:>2}. {}\n", i + 1, doc.title));
        }
        menu.push_str("Number (empty or q to cancel): ");
        stderr
            .write_all(menu.as_bytes())
            .await
            .map_err(|e| PipelineError::Picker(e.to_string()))?;
        stderr
            .flush()
            .await
            .map_err(|e| PipelineError::Picker(e.to_string()))?;

        let mut reader = BufReader::new(tokio::io::stdin());
        loop {
            // EOF leaves the line empty, which dismisses.
            let mut line = String::new();
            reader
                .read_line(&mut line)
                .await
                .map_err(|e| PipelineError::Picker(e.to_string()))?;
            match parse_selection(&line, documents.len()) {
                Selection::Cancel => return Ok(None),
                Selection::Index(i) => return Ok(documents.into_iter().nth(i)),
                Selection::Invalid => {
                    stderr
                        .write_all(format!("Enter 1-{} or q: ", documents.len()).as_bytes())
                        .await
                        .map_err(|e| PipelineError::Picker(e.to_string()))?;
                    stderr
                        .flush()
                        .await
                        .map_err(|e| PipelineError::Picker(e.to_string()))?;
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Selection {
    Cancel,
    Index(usize),
    Invalid,
}

fn parse_selection(input: &str, count: usize) -> Selection {
    let input = input.trim();
    if input.is_empty() || input.eq_ignore_ascii_case("q") {
        return Selection::Cancel;
    }
    match input.parse::<usize>() {
        Ok(n) if n >= 1 && n <= count => Selection::Index(n - 1),
        _ => Selection::Invalid,
    }
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

/// Picker backed by the Drive file listing, restricted to spreadsheets
pub struct DrivePicker<C> {
    http: reqwest::Client,
    drive_base: String,
    developer_key: Option<String>,
    chooser: C,
}

impl<C: Chooser> DrivePicker<C> {
    pub fn new(api: &ApiConfig, chooser: C) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("progress/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(DrivePicker {
            http,
            drive_base: api.drive_base.clone(),
            developer_key: api.developer_key.clone(),
            chooser,
        })
    }

    /// List the user's spreadsheets, most recently modified first
    pub async fn list_spreadsheets(&self, token: &SessionToken) -> Result<Vec<Document>> {
        let url = format!("{}/files", self.drive_base);
        let q = format!("mimeType='{}' and trashed=false", SPREADSHEET_MIME_TYPE);
        let mut query = vec![
            ("q", q.as_str()),
            ("fields", "files(id,name)"),
            ("orderBy", "modifiedTime desc"),
            ("pageSize", "100"),
        ];
        if let Some(key) = self.developer_key.as_deref() {
            query.push(("key", key));
        }

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token.access_token)
            .query(&query)
            .send()
            .await
            .map_err(|e| PipelineError::Picker(format!("network error: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Picker(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| PipelineError::Picker(e.to_string()))?;
        parse_file_list(&body)
    }
}

impl<C: Chooser> DocumentPicker for DrivePicker<C> {
    async fn pick(&self, token: &SessionToken) -> Result<PickOutcome> {
        let documents = self.list_spreadsheets(token).await?;
        debug!("picker listed {} spreadsheets", documents.len());
        Ok(match self.chooser.choose(documents).await? {
            Some(document) => PickOutcome::Picked(document),
            None => PickOutcome::Cancelled,
        })
    }
}

fn parse_file_list(body: &str) -> Result<Vec<Document>> {
    let list: FileList = serde_json::from_str(body)
        .map_err(|e| PipelineError::Picker(format!("malformed file list: {}", e)))?;
    Ok(list
        .files
        .into_iter()
        .map(|f| Document { id: f.id, title: f.name })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, title: &str) -> Document {
        Document { id: id.into(), title: title.into() }
    }

    #[test]
    fn test_parse_file_list() {
        let body = r#"{"files":[{"id":"1a","name":"Exercises"},{"id":"2b","name":"Budget"}]}"#;
        let docs = parse_file_list(body).unwrap();
        assert_eq!(docs, vec![doc("1a", "Exercises"), doc("2b", "Budget")]);

        assert_eq!(parse_file_list("{}").unwrap(), vec![]);
        assert!(matches!(parse_file_list("<html>"), Err(PipelineError::Picker(_))));
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!(parse_selection("2\n", 3), Selection::Index(1));
        assert_eq!(parse_selection(" 1 ", 3), Selection::Index(0));
        assert_eq!(parse_selection("\n", 3), Selection::Cancel);
        assert_eq!(parse_selection("Q", 3), Selection::Cancel);
        assert_eq!(parse_selection("0", 3), Selection::Invalid);
        assert_eq!(parse_selection("4", 3), Selection::Invalid);
        assert_eq!(parse_selection("two", 3), Selection::Invalid);
    }

    #[tokio::test]
    async fn test_title_chooser() {
        let chooser = TitleChooser::new("Exercises");
        let docs = vec![doc("1", "Budget"), doc("2", "Exercises"), doc("3", "Exercises")];

        assert_eq!(chooser.choose(docs).await.unwrap(), Some(doc("2", "Exercises")));
        assert_eq!(chooser.choose(vec![doc("1", "Budget")]).await.unwrap(), None);
    }
}
