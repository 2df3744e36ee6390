use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::info;

use certforge_store::StreamingStore;

use crate::errors::JobError;

/// Rows fetched per page while streaming the export.
const EXPORT_PAGE_SIZE: u64 = 10_000;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Result of a CSV export.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub rows: u64,
}

/// Stream every certificate active at `now` to `path` as CSV, page by page.
/// Column order is fixed: client id, certificate id, issued date, expiry
/// date.
pub async fn export_active_csv(
    store: &StreamingStore,
    path: &Path,
    now: NaiveDateTime,
) -> Result<ExportSummary, JobError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_writer(BufWriter::new(File::create(path)?));
    writer.write_record(["client_id", "certificate_id", "issued_at", "expires_at"])?;

    let mut page = 1u64;
    let mut rows = 0u64;
    loop {
        let result = store.query_active(None, page, EXPORT_PAGE_SIZE, now).await?;
        for item in &result.items {
            writer.write_record([
                item.client_id.to_string(),
                item.certificate_id.to_string(),
                item.issued_at.format(TIMESTAMP_FORMAT).to_string(),
                item.expires_at.format(TIMESTAMP_FORMAT).to_string(),
            ])?;
        }
        rows += result.items.len() as u64;
        if result.items.is_empty() || !result.has_next() {
            break;
        }
        page += 1;
    }
    writer.flush()?;

    info!(rows, path = %path.display(), "active certificates exported");
    Ok(ExportSummary {
        path: path.to_path_buf(),
        rows,
    })
}
