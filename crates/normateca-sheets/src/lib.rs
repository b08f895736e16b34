//! Google Sheets values-range client and the row-source seam.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "normateca-sheets";

pub const DEFAULT_SHEETS_ENDPOINT: &str = "https://sheets.googleapis.com/v4/spreadsheets";
pub const DEFAULT_RANGE: &str = "Lista!A1:AE1000";

/// Header row plus data rows, exactly as the values range returns them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetTable {
    /// First row becomes the header list; an empty payload is an empty
    /// table, not an error.
    pub fn from_values(values: Vec<Vec<String>>) -> Self {
        let mut rows = values.into_iter();
        let headers = rows.next().unwrap_or_default();
        Self {
            headers,
            rows: rows.collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("malformed values response: {0}")]
    Decode(String),
}

/// Anything that can produce the current sheet contents. The cache layer
/// only ever talks to this trait.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch_table(&self) -> Result<SheetTable, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub api_key: String,
    pub spreadsheet_id: String,
    pub range: String,
    pub endpoint: String,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl SheetsConfig {
    pub fn new(
        api_key: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        range: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            spreadsheet_id: spreadsheet_id.into(),
            range: range.into(),
            endpoint: DEFAULT_SHEETS_ENDPOINT.to_string(),
            timeout: Duration::from_secs(20),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Read-only client for one spreadsheet range. The API key travels as a
/// query parameter and is kept out of logs and error messages.
#[derive(Debug)]
pub struct SheetsClient {
    client: reqwest::Client,
    config: SheetsConfig,
}

impl SheetsClient {
    pub fn new(config: SheetsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client, config })
    }

    fn values_url(&self) -> String {
        format!(
            "{}/{}/values/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.spreadsheet_id,
            self.config.range
        )
    }

    async fn fetch_values(&self) -> Result<SheetTable, FetchError> {
        let url = self.values_url();
        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.config.backoff.max_retries {
            debug!(url = %url, attempt, "fetching values range");
            let resp_result = self
                .client
                .get(&url)
                .query(&[("key", self.config.api_key.as_str())])
                .send()
                .await;

            match resp_result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body = resp.text().await?;
                        let parsed: ValuesResponse = serde_json::from_str(&body)
                            .map_err(|e| FetchError::Decode(e.to_string()))?;
                        return Ok(SheetTable::from_values(parsed.values));
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.config.backoff.max_retries
                    {
                        tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.config.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}

#[async_trait]
impl RowSource for SheetsClient {
    async fn fetch_table(&self) -> Result<SheetTable, FetchError> {
        self.fetch_values().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_row_becomes_headers() {
        let table = SheetTable::from_values(vec![
            vec!["ID".into(), "Status".into()],
            vec!["1".into(), "Ativo".into()],
        ]);
        assert_eq!(table.headers, vec!["ID", "Status"]);
        assert_eq!(table.rows.len(), 1);
        assert!(!table.is_empty());
    }

    #[test]
    fn empty_payload_is_an_empty_table() {
        let table = SheetTable::from_values(Vec::new());
        assert!(table.headers.is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn missing_values_key_deserializes_to_empty() {
        let parsed: ValuesResponse = serde_json::from_str(r#"{"range":"Lista!A1:AE1000"}"#).unwrap();
        assert!(parsed.values.is_empty());

        let parsed: ValuesResponse =
            serde_json::from_str(r#"{"values":[["ID"],["1"]]}"#).unwrap();
        let table = SheetTable::from_values(parsed.values);
        assert_eq!(table.headers, vec!["ID"]);
        assert_eq!(table.rows, vec![vec!["1".to_string()]]);
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn values_url_excludes_the_api_key() {
        let client = SheetsClient::new(SheetsConfig::new("secret", "sheet-id", "Lista!A1:B2"))
            .expect("client");
        let url = client.values_url();
        assert_eq!(
            url,
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-id/values/Lista!A1:B2"
        );
        assert!(!url.contains("secret"));
    }

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            RetryDisposition::NonRetryable
        );
    }
}
