use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::Store;
use crate::error::Result;
use crate::services::ledger::InterestLedger;
use crate::services::scheduler::PresenceScheduler;

/// Blob storage holding user selfies.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn delete_selfie(&self, user_id: &str, selfie_url: &str) -> Result<()>;
}

/// For deployments where selfies live outside this service.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMediaStore;

#[async_trait]
impl MediaStore for NoopMediaStore {
    async fn delete_selfie(&self, _user_id: &str, _selfie_url: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogoutReport {
    pub session_stopped: bool,
    pub edges_deleted: Option<u64>,
    pub selfie_deleted: bool,
    pub user_deleted: bool,
}

/// Tears down everything a user leaves behind.
pub struct SessionTeardown {
    store: Arc<dyn Store>,
    ledger: Arc<InterestLedger>,
    scheduler: Arc<PresenceScheduler>,
    media: Arc<dyn MediaStore>,
}

impl SessionTeardown {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<InterestLedger>,
        scheduler: Arc<PresenceScheduler>,
        media: Arc<dyn MediaStore>,
    ) -> Self {
        Self {
            store,
            ledger,
            scheduler,
            media,
        }
    }

    /// Stops the user's tasks, then deletes edges, selfie and profile. Each
    /// step runs even if an earlier one failed; failures are only logged.
    pub async fn logout(&self, user_id: &str) -> LogoutReport {
        let mut report = LogoutReport {
            session_stopped: self.scheduler.deactivate(user_id),
            ..LogoutReport::default()
        };

        match self.ledger.remove_all_for_user(user_id).await {
            Ok(count) => report.edges_deleted = Some(count),
            Err(e) => warn!("Logout of {}: failed to delete edges: {}", user_id, e),
        }

        match self.store.get_user(user_id).await {
            Ok(Some(user)) => {
                if let Some(url) = user.selfie_url.as_deref() {
                    match self.media.delete_selfie(user_id, url).await {
                        Ok(()) => report.selfie_deleted = true,
                        Err(e) => warn!("Logout of {}: failed to delete selfie: {}", user_id, e),
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Logout of {}: failed to load profile: {}", user_id, e),
        }

        match self.store.delete_user(user_id).await {
            Ok(deleted) => report.user_deleted = deleted,
            Err(e) => warn!("Logout of {}: failed to delete user: {}", user_id, e),
        }

        info!("Logged out {}: {:?}", user_id, report);
        report
    }
}
