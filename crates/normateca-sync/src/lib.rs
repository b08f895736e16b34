//! Snapshot cache, refresh orchestration, and the sync schedule.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use normateca_core::{normalize_row, unique_by_id, Document};
use normateca_sheets::{FetchError, RowSource, SheetsConfig};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "normateca-sync";

/// Six-field cron: every five minutes.
pub const DEFAULT_SYNC_CRON: &str = "0 */5 * * * *";

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub api_key: String,
    pub spreadsheet_id: String,
    pub range: String,
    pub sync_cron: String,
    pub http_timeout_secs: u64,
}

impl PortalConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("GOOGLE_SHEETS_API_KEY").unwrap_or_default(),
            spreadsheet_id: std::env::var("GOOGLE_SHEETS_SPREADSHEET_ID").unwrap_or_default(),
            range: std::env::var("GOOGLE_SHEETS_RANGE")
                .unwrap_or_else(|_| normateca_sheets::DEFAULT_RANGE.to_string()),
            sync_cron: std::env::var("NORMATECA_SYNC_CRON")
                .unwrap_or_else(|_| DEFAULT_SYNC_CRON.to_string()),
            http_timeout_secs: std::env::var("NORMATECA_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        }
    }

    pub fn sheets_config(&self) -> SheetsConfig {
        let mut config = SheetsConfig::new(
            self.api_key.clone(),
            self.spreadsheet_id.clone(),
            self.range.clone(),
        );
        config.timeout = Duration::from_secs(self.http_timeout_secs);
        config
    }
}

/// One published generation of the cache. Both views always come from the
/// same refresh.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// One document per spreadsheet row, in row order.
    pub search_view: Vec<Document>,
    /// Deduplicated by id, first occurrence wins.
    pub stats_view: Vec<Document>,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Readers take the current `Arc<Snapshot>`; refreshes publish a whole new
/// one. The lock guards only the reference swap, so a reader can never see
/// views from two different generations.
#[derive(Debug, Default)]
pub struct DocumentCache {
    current: RwLock<Arc<Snapshot>>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().expect("cache lock poisoned").clone()
    }

    fn install(&self, snapshot: Snapshot) {
        *self.current.write().expect("cache lock poisoned") = Arc::new(snapshot);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched_rows: usize,
    pub documents: usize,
    pub unique_documents: usize,
    pub updated: bool,
}

/// Owns the one refresh routine shared by startup, schedule, and on-demand
/// requests.
pub struct SyncService {
    source: Arc<dyn RowSource>,
    cache: Arc<DocumentCache>,
    gate: Mutex<()>,
}

impl SyncService {
    pub fn new(source: Arc<dyn RowSource>, cache: Arc<DocumentCache>) -> Self {
        Self {
            source,
            cache,
            gate: Mutex::new(()),
        }
    }

    /// Fetches the sheet and replaces both cache views. Refreshes are
    /// serialized: a call arriving while another is in flight waits its
    /// turn, so two fetches never race one cache. An empty fetch (or a
    /// failed one) leaves the previous generation in place, `last_sync`
    /// included.
    pub async fn refresh(&self) -> Result<RefreshSummary, FetchError> {
        let _gate = self.gate.lock().await;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let table = match self.source.fetch_table().await {
            Ok(table) => table,
            Err(err) => {
                warn!(%run_id, error = %err, "sheet fetch failed; keeping previous cache generation");
                return Err(err);
            }
        };

        if table.is_empty() {
            let snapshot = self.cache.snapshot();
            info!(%run_id, "sheet returned no rows; keeping previous cache generation");
            return Ok(RefreshSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                fetched_rows: 0,
                documents: snapshot.search_view.len(),
                unique_documents: snapshot.stats_view.len(),
                updated: false,
            });
        }

        let documents: Vec<Document> = table
            .rows
            .iter()
            .enumerate()
            .map(|(index, row)| normalize_row(&table.headers, row, index))
            .collect();
        let unique = unique_by_id(&documents);

        let distinct_sectors: HashSet<&str> = documents
            .iter()
            .flat_map(|doc| doc.setores_array.iter().map(String::as_str))
            .collect();
        debug!(%run_id, distinct_sectors = distinct_sectors.len(), "sector structure");

        let summary = RefreshSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            fetched_rows: table.rows.len(),
            documents: documents.len(),
            unique_documents: unique.len(),
            updated: true,
        };
        self.cache.install(Snapshot {
            search_view: documents,
            stats_view: unique,
            last_sync: Some(summary.finished_at),
        });
        info!(
            %run_id,
            rows = summary.fetched_rows,
            documents = summary.documents,
            unique = summary.unique_documents,
            "cache refreshed"
        );
        Ok(summary)
    }
}

/// Builds (without starting) the scheduler that re-runs the refresh on the
/// given cron expression. A failed scheduled refresh is logged and the
/// schedule keeps going.
pub async fn build_scheduler(service: Arc<SyncService>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let service = service.clone();
        Box::pin(async move {
            if let Err(err) = service.refresh().await {
                warn!(error = %err, "scheduled refresh failed");
            }
        })
    })
    .with_context(|| format!("creating refresh job for cron {cron}"))?;
    sched.add(job).await.context("adding refresh job")?;
    Ok(sched)
}
