//! Backup listing.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackupSummary {
    path: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    files: usize,
    state: String,
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "Taken")]
    taken: String,
    #[tabled(rename = "Files")]
    files: usize,
    #[tabled(rename = "Session state")]
    state: String,
    #[tabled(rename = "Path")]
    path: String,
}

pub async fn execute(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let backups: Vec<BackupSummary> = client.get("/api/backups").await?;

    match format {
        OutputFormat::Table => {
            let rows: Vec<_> = backups
                .iter()
                .map(|b| BackupRow {
                    taken: b.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                    files: b.files,
                    state: b.state.clone(),
                    path: b.path.clone(),
                })
                .collect();
            output::print_table(&rows, "No backups found.");
        }
        _ => output::print_item(&backups, format)?,
    }
    Ok(())
}
