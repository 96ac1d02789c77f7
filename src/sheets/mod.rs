use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::sheets::model::{UpdateValueRange, UpdateValuesResponse, ValueRange};

pub mod memory;
pub mod model;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/";

static SPREADSHEET_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/spreadsheets/d/([A-Za-z0-9_-]+)").expect("valid spreadsheet url regex"));

static A1_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:'((?:[^']|'')+)'|([^!']+))!([A-Z]+)([0-9]+)(?::([A-Z]+)([0-9]+)?)?$")
        .expect("valid A1 regex")
});

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("unexpected cell value {0}; expected text or number")]
    UnexpectedCell(String),
    #[error("invalid A1 range: {0}")]
    InvalidRange(String),
}

/// A single spreadsheet cell as returned by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(s)
        }
    }

    /// True for empty cells and whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(_) => false,
        }
    }

    /// Render the cell as display text. Whole numbers drop the fraction.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            CellValue::Number(n) => n.to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Empty => Value::String(String::new()),
            CellValue::Text(s) => Value::String(s.clone()),
            CellValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(n.to_string())),
        }
    }
}

impl TryFrom<Value> for CellValue {
    type Error = SheetError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(CellValue::Empty),
            Value::String(s) => Ok(CellValue::text(s)),
            Value::Number(n) => n
                .as_f64()
                .map(CellValue::Number)
                .ok_or_else(|| SheetError::UnexpectedCell(n.to_string())),
            other => Err(SheetError::UnexpectedCell(other.to_string())),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::text(s)
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::text(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Rows,
    Columns,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Rows => "ROWS",
            Dimension::Columns => "COLUMNS",
        }
    }
}

/// Spreadsheet + sheet (tab) a submission is projected onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetTarget {
    pub spreadsheet_id: String,
    pub sheet_name: String,
}

impl SheetTarget {
    pub fn new(spreadsheet_id: impl Into<String>, sheet_name: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name: sheet_name.into(),
        }
    }

    /// A1 range covering columns `start_col..=end_col` (0-based) and rows
    /// `start_row..=end_row` (1-based).
    pub fn range(&self, start_col: usize, start_row: u32, end_col: usize, end_row: u32) -> String {
        format!(
            "{}!{}{}:{}{}",
            quote_sheet_name(&self.sheet_name),
            column_letter(start_col),
            start_row,
            column_letter(end_col),
            end_row
        )
    }
}

impl fmt::Display for SheetTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.spreadsheet_id, self.sheet_name)
    }
}

fn quote_sheet_name(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// 0-based column index → A1 letters (0 → A, 25 → Z, 26 → AA).
pub fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// A1 letters → 0-based column index. Returns None for anything but `[A-Z]+`.
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() || !letters.bytes().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    let mut index = 0usize;
    for b in letters.bytes() {
        index = index.checked_mul(26)?.checked_add((b - b'A') as usize + 1)?;
    }
    Some(index - 1)
}

/// Parsed A1 range. `end_row` is None for open-ended ranges such as `A3:L`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A1Range {
    pub sheet_name: String,
    pub start_col: usize,
    pub start_row: u32,
    pub end_col: usize,
    pub end_row: Option<u32>,
}

pub fn parse_a1_range(range: &str) -> Result<A1Range, SheetError> {
    let invalid = || SheetError::InvalidRange(range.to_string());
    let caps = A1_RANGE_RE.captures(range).ok_or_else(invalid)?;
    let sheet_name = match (caps.get(1), caps.get(2)) {
        (Some(quoted), _) => quoted.as_str().replace("''", "'"),
        (None, Some(bare)) => bare.as_str().to_string(),
        _ => return Err(invalid()),
    };
    let start_col = column_index(&caps[3]).ok_or_else(invalid)?;
    let start_row: u32 = caps[4].parse().map_err(|_| invalid())?;
    let (end_col, end_row) = match caps.get(5) {
        Some(col) => {
            let end_col = column_index(col.as_str()).ok_or_else(invalid)?;
            let end_row = match caps.get(6) {
                Some(row) => Some(row.as_str().parse().map_err(|_| invalid())?),
                None => None,
            };
            (end_col, end_row)
        }
        None => (start_col, Some(start_row)),
    };
    if start_row == 0 || end_col < start_col || end_row.is_some_and(|r| r < start_row) {
        return Err(invalid());
    }
    Ok(A1Range {
        sheet_name,
        start_col,
        start_row,
        end_col,
        end_row,
    })
}

/// Extract the spreadsheet id from a Google Sheets URL. Bare ids pass through.
pub fn spreadsheet_id_from_url(url_or_id: &str) -> Option<String> {
    let trimmed = url_or_id.trim();
    if let Some(caps) = SPREADSHEET_URL_RE.captures(trimmed) {
        return Some(caps[1].to_string());
    }
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Some(trimmed.to_string());
    }
    None
}

pub fn spreadsheet_url(spreadsheet_id: &str) -> String {
    format!("https://docs.google.com/spreadsheets/d/{}/edit", spreadsheet_id)
}

/// Externally-owned spreadsheet storage. Rows are returned the way the
/// Sheets API returns them: trailing empty cells and rows may be omitted.
#[async_trait]
pub trait SheetStore: Send + Sync {
    async fn read_range(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<CellValue>>>;

    async fn write_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: Vec<Vec<CellValue>>,
        dimension: Dimension,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct SheetsClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for SheetsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SheetsClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SheetsClient {
    pub fn new(token: String, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(SHEETS_API_BASE).context("invalid default Sheets URL")?;
        Self::with_base_url(token, timeout, base_url)
    }

    pub fn with_base_url(token: String, timeout: Duration, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("sheetsync/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(cfg.sheets.request_timeout_seconds);
        match cfg.sheets.base_url.as_deref() {
            Some(base) => {
                let base_url = Url::parse(base).context("invalid sheets.base_url")?;
                Self::with_base_url(cfg.sheets.access_token.clone(), timeout, base_url)
            }
            None => Self::new(cfg.sheets.access_token.clone(), timeout),
        }
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Sheets base URL cannot be a base"))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", spreadsheet_id, "values", range]);
        Ok(url)
    }

    pub fn build_read_request(&self, spreadsheet_id: &str, range: &str) -> Result<reqwest::Request> {
        let url = self.values_url(spreadsheet_id, range)?;
        self.http
            .get(url)
            .bearer_auth(&self.token)
            .query(&[("majorDimension", "ROWS")])
            .build()
            .context("failed to build Sheets read request")
    }

    pub fn build_write_request(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: &[Vec<CellValue>],
        dimension: Dimension,
    ) -> Result<reqwest::Request> {
        let url = self.values_url(spreadsheet_id, range)?;
        let body = UpdateValueRange {
            range,
            major_dimension: dimension.as_str(),
            values: rows
                .iter()
                .map(|row| row.iter().map(CellValue::to_json).collect())
                .collect(),
        };
        self.http
            .put(url)
            .bearer_auth(&self.token)
            .query(&[("valueInputOption", "RAW")])
            .json(&body)
            .build()
            .context("failed to build Sheets write request")
    }

    async fn execute(&self, request: reqwest::Request) -> Result<String> {
        let url = request.url().clone();
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Sheets API")?;
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        debug!(%url, %status, "sheets response");
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Rate limited by Sheets API: {}", body);
            return Err(anyhow!("received 429 from Sheets API: {}", body));
        }
        if !status.is_success() {
            return Err(anyhow!("sheets error {}: {}", status, body));
        }
        Ok(body)
    }
}

/// Convert a Sheets `values` payload into typed cells.
pub fn parse_value_range(body: &str) -> Result<Vec<Vec<CellValue>>> {
    let payload: ValueRange = serde_json::from_str(body).context("invalid Sheets response JSON")?;
    let mut rows = Vec::with_capacity(payload.values.len());
    for row in payload.values {
        let cells = row
            .into_iter()
            .map(CellValue::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(cells);
    }
    Ok(rows)
}

#[async_trait]
impl SheetStore for SheetsClient {
    async fn read_range(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<CellValue>>> {
        let request = self.build_read_request(spreadsheet_id, range)?;
        let body = self.execute(request).await?;
        parse_value_range(&body)
    }

    async fn write_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: Vec<Vec<CellValue>>,
        dimension: Dimension,
    ) -> Result<()> {
        let request = self.build_write_request(spreadsheet_id, range, &rows, dimension)?;
        let body = self.execute(request).await?;
        let resp: UpdateValuesResponse =
            serde_json::from_str(&body).context("invalid Sheets update response JSON")?;
        debug!(
            updated_range = resp.updated_range.as_deref().unwrap_or(""),
            updated_cells = resp.updated_cells.unwrap_or(0),
            "sheets write ok"
        );
        Ok(())
    }
}
