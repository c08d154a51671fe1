use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::services::vault::ExchangeVault;

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub success: bool,
    pub deleted_exchanges: usize,
    pub exchange_ids: Vec<Uuid>,
    pub timestamp: DateTime<Utc>,
}

/// Deletes exchanges a live timer missed. Concurrent runs split the rows
/// between them; none of them fails on a row another run already took.
pub async fn run_cleanup(vault: &ExchangeVault) -> Result<CleanupReport> {
    let deleted = vault.sweep_expired().await?;
    Ok(CleanupReport {
        success: true,
        deleted_exchanges: deleted.len(),
        exchange_ids: deleted.iter().map(|e| e.id).collect(),
        timestamp: Utc::now(),
    })
}
