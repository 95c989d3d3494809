//! Streaming export of the job history as JSON lines.

use std::io::Write;

use anyhow::{Context, Result};

use crate::models::{JobStatus, SyncJobRecord};
use crate::repositories::SyncJobRepository;

const EXPORT_PAGE_SIZE: u64 = 500;

/// Write every job (optionally only those in `status`) to `writer`, one
/// [`SyncJobRecord`] per line, in id order. Returns the number of records written.
pub async fn write_history<W: Write>(
    repo: &SyncJobRepository,
    status: Option<JobStatus>,
    writer: &mut W,
) -> Result<u64> {
    let mut written = 0u64;
    let mut after = None;

    loop {
        let page = repo
            .scan_page(after, status, EXPORT_PAGE_SIZE)
            .await
            .context("reading job page")?;
        let full = page.len() as u64 == EXPORT_PAGE_SIZE;
        after = page.last().map(|job| job.id);

        for job in page {
            let job_id = job.id;
            serde_json::to_writer(&mut *writer, &SyncJobRecord::from(job))
                .with_context(|| format!("serializing job {job_id}"))?;
            writer.write_all(b"\n").context("writing record separator")?;
            written += 1;
        }

        if !full {
            break;
        }
    }

    writer.flush().context("flushing export output")?;
    Ok(written)
}
