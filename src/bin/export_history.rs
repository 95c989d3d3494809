//! Dump the sync job history as JSON lines.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sync_engine::{
    config::ConfigLoader, db, export::write_history, models::JobStatus,
    repositories::SyncJobRepository,
};

/// Export every sync job in the stable record schema, one JSON object per line
#[derive(Parser, Debug)]
#[command(name = "export-history")]
struct Args {
    /// File to write the export to
    #[arg(short, long)]
    output: PathBuf,

    /// Only export jobs with this status
    #[arg(long, value_parser = parse_status)]
    status: Option<JobStatus>,
}

fn parse_status(value: &str) -> Result<JobStatus, String> {
    JobStatus::parse(value).ok_or_else(|| {
        format!("unknown status '{value}', expected pending, in_progress, success, failed or cancelled")
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    let repo = SyncJobRepository::new(db);

    let file = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let mut writer = BufWriter::new(file);

    let written = write_history(&repo, args.status, &mut writer).await?;

    println!(
        "Exported {} job(s) to {}.",
        written,
        args.output.display()
    );

    Ok(())
}
