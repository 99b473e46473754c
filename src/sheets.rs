use crate::config::ApiConfig;
use crate::error::{PipelineError, Result};
use crate::model::{Document, Sheet, SessionToken, SpreadsheetMetadata, is_hidden_title};
use log::{debug, info};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// Address window read from every visible sheet
pub const FETCH_WINDOW: &str = "A1:Z100";

/// Raw grid of one range, row-major
pub type Grid = Vec<Vec<String>>;

/// Read access to the spreadsheet API
pub trait SheetsApi: Send + Sync {
    /// Read the document title and its worksheet titles, in document order
    fn metadata(
        &self,
        document_id: &str,
        token: &SessionToken,
    ) -> impl Future<Output = Result<SpreadsheetMetadata>> + Send;

    /// Read every range in one request, returning one grid per range in request order
    fn batch_get(
        &self,
        document_id: &str,
        ranges: &[String],
        token: &SessionToken,
    ) -> impl Future<Output = Result<Vec<Grid>>> + Send;
}

/// A1 range covering [`FETCH_WINDOW`] of the sheet titled `title`
///
/// The title is always single-quoted with embedded quotes doubled, so titles
/// that look like cell references (`AB12`, `R1C1`) still name the sheet.
pub fn sheet_range(title: &str) -> String {
    format!("'{}'!{}", title.replace('\'', "''"), FETCH_WINDOW)
}

/// Retrieves the raw grids of a document's visible sheets
pub struct GridFetcher<A> {
    api: A,
}

impl<A: SheetsApi> GridFetcher<A> {
    pub fn new(api: A) -> Self {
        GridFetcher { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Resolve a document id to a [`Document`] through the metadata read
    pub async fn describe(&self, document_id: &str, token: &SessionToken) -> Result<Document> {
        let metadata = self.api.metadata(document_id, token).await?;
        Ok(Document {
            id: document_id.to_string(),
            title: metadata.title,
        })
    }

    /// Fetch the grids of every visible sheet of `document`
    ///
    /// Hidden sheets are dropped before the batched read. The result is in
    /// metadata order. Nothing is returned unless every range was read.
    ///
    /// # Arguments
    /// * `document` - The document to read
    /// * `token` - Credentials for the spreadsheet API
    ///
    /// # Errors
    /// * `FetchFailure` if the metadata read or the batched read fails, or the
    ///   batched read returns a different number of ranges than requested
    pub async fn fetch(&self, document: &Document, token: &SessionToken) -> Result<Vec<Sheet>> {
        let metadata = self.api.metadata(&document.id, token).await?;
        let titles: Vec<String> = metadata
            .sheet_titles
            .into_iter()
            .filter(|title| !is_hidden_title(title))
            .collect();

        if titles.is_empty() {
            info!("document {} has no visible sheets", document.id);
            return Ok(Vec::new());
        }

        let ranges: Vec<String> = titles.iter().map(|title| sheet_range(title)).collect();
        debug!("reading {} ranges from document {}", ranges.len(), document.id);
        let grids = self.api.batch_get(&document.id, &ranges, token).await?;

        if grids.len() != titles.len() {
            return Err(PipelineError::Fetch(format!(
                "requested {} ranges but received {}",
                titles.len(),
                grids.len()
            )));
        }

        Ok(titles
            .into_iter()
            .zip(grids)
            .map(|(title, rows)| Sheet { title, rows })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct SpreadsheetResponse {
    properties: SheetProperties,
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    value_ranges: Vec<ValueRange>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    // Omitted by the API when the range is empty.
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Sheets v4 REST client
#[derive(Clone)]
pub struct GoogleSheetsClient {
    http: reqwest::Client,
    sheets_base: String,
    developer_key: Option<String>,
}

impl GoogleSheetsClient {
    pub fn new(api: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("progress/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(GoogleSheetsClient {
            http,
            sheets_base: api.sheets_base.clone(),
            developer_key: api.developer_key.clone(),
        })
    }

    async fn get(&self, url: &str, query: &[(&str, &str)], token: &SessionToken) -> Result<String> {
        let mut request = self.http.get(url).bearer_auth(&token.access_token).query(query);
        if let Some(key) = self.developer_key.as_deref() {
            request = request.query(&[("key", key)]);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| PipelineError::Fetch(format!("network error: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Fetch(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        resp.text()
            .await
            .map_err(|e| PipelineError::Fetch(e.to_string()))
    }
}

impl SheetsApi for GoogleSheetsClient {
    async fn metadata(&self, document_id: &str, token: &SessionToken) -> Result<SpreadsheetMetadata> {
        let url = format!(
            "{}/spreadsheets/{}",
            self.sheets_base,
            urlencoding::encode(document_id)
        );
        let body = self
            .get(&url, &[("fields", "properties.title,sheets.properties.title")], token)
            .await?;
        parse_metadata(&body)
    }

    async fn batch_get(
        &self,
        document_id: &str,
        ranges: &[String],
        token: &SessionToken,
    ) -> Result<Vec<Grid>> {
        let url = format!(
            "{}/spreadsheets/{}/values:batchGet",
            self.sheets_base,
            urlencoding::encode(document_id)
        );
        let mut query: Vec<(&str, &str)> = ranges.iter().map(|r| ("ranges", r.as_str())).collect();
        query.push(("majorDimension", "ROWS"));
        query.push(("valueRenderOption", "FORMATTED_VALUE"));

        let body = self.get(&url, &query, token).await?;
        parse_batch_get(&body)
    }
}

fn parse_metadata(body: &str) -> Result<SpreadsheetMetadata> {
    let response: SpreadsheetResponse = serde_json::from_str(body)
        .map_err(|e| PipelineError::Fetch(format!("malformed spreadsheet metadata: {}", e)))?;
    Ok(SpreadsheetMetadata {
        title: response.properties.title,
        sheet_titles: response
            .sheets
            .into_iter()
            .map(|sheet| sheet.properties.title)
            .collect(),
    })
}

fn parse_batch_get(body: &str) -> Result<Vec<Grid>> {
    let response: BatchGetResponse = serde_json::from_str(body)
        .map_err(|e| PipelineError::Fetch(format!("malformed range response: {}", e)))?;
    Ok(response
        .value_ranges
        .into_iter()
        .map(|range| {
            range
                .values
                .into_iter()
                .map(|row| row.into_iter().map(cell_text).collect())
                .collect()
        })
        .collect())
}

// FORMATTED_VALUE yields strings; anything else is kept as its JSON text.
fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
