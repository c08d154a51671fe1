//! Per-user presence sessions: the heartbeat task and the proximity loops of
//! the exchanges a user is watching. Nothing here guards a cross-user
//! invariant; those live in the store.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::geo::Coordinate;
use crate::services::matching::MatchEngine;
use crate::services::presence::PresenceStore;
use crate::services::vault::ExchangeVault;
use crate::services::CoreSettings;

/// Where a session gets its current position from.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn locate(&self, user_id: &str) -> Result<Option<Coordinate>>;
}

/// A position set from outside, e.g. by a device test harness.
#[derive(Debug, Default)]
pub struct FixedLocation {
    current: Mutex<Option<Coordinate>>,
}

impl FixedLocation {
    pub fn new(location: Option<Coordinate>) -> Self {
        Self {
            current: Mutex::new(location),
        }
    }

    pub fn set(&self, location: Option<Coordinate>) {
        *self.current.lock().unwrap_or_else(|p| p.into_inner()) = location;
    }
}

#[async_trait]
impl LocationSource for FixedLocation {
    async fn locate(&self, _user_id: &str) -> Result<Option<Coordinate>> {
        Ok(*self.current.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

/// The last fix the client reported through the API.
pub struct StoredLocation {
    presence: Arc<PresenceStore>,
}

impl StoredLocation {
    pub fn new(presence: Arc<PresenceStore>) -> Self {
        Self { presence }
    }
}

#[async_trait]
impl LocationSource for StoredLocation {
    async fn locate(&self, user_id: &str) -> Result<Option<Coordinate>> {
        self.presence.location_of(user_id).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BeatReport {
    pub location_known: bool,
    pub heartbeat_stored: bool,
    /// Matches this tick dissolved under geofenced retention.
    pub dissolved: Vec<String>,
}

/// What one heartbeat tick needs, cloned into the background task so the
/// task never keeps its session alive.
#[derive(Clone)]
struct HeartbeatWorker {
    user_id: String,
    presence: Arc<PresenceStore>,
    engine: Arc<MatchEngine>,
    location: Arc<dyn LocationSource>,
    location_timeout: Duration,
}

impl HeartbeatWorker {
    /// Every store call below is bounded by the store retry policy, so a
    /// hung store delays a tick but never stalls the loop.
    async fn beat(&self) -> BeatReport {
        let user_id = self.user_id.as_str();
        let location = match tokio::time::timeout(self.location_timeout, self.location.locate(user_id)).await {
            Ok(Ok(location)) => location,
            Ok(Err(e)) => {
                warn!("Location unavailable for {}: {}", user_id, e);
                None
            }
            Err(_) => {
                warn!("Location fix for {} timed out after {:?}", user_id, self.location_timeout);
                None
            }
        };

        if let Err(e) = self.presence.heartbeat(user_id, location).await {
            warn!("Skipping heartbeat cycle for {}: {}", user_id, e);
            return BeatReport {
                location_known: location.is_some(),
                ..BeatReport::default()
            };
        }

        let dissolved = match self.engine.geofence_sweep(user_id).await {
            Ok(dissolved) => dissolved,
            Err(e) => {
                warn!("Geofence sweep for {} failed: {}", user_id, e);
                Vec::new()
            }
        };

        BeatReport {
            location_known: location.is_some(),
            heartbeat_stored: true,
            dissolved,
        }
    }
}

pub struct PresenceSession {
    worker: HeartbeatWorker,
    vault: Arc<ExchangeVault>,
    heartbeat_interval: Duration,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    proximity_loops: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl PresenceSession {
    pub fn user_id(&self) -> &str {
        &self.worker.user_id
    }

    /// Starts the heartbeat task: one beat now, then one per interval.
    /// Returns `false` when a task was already running.
    pub fn start_heartbeat(&self) -> bool {
        let mut slot = self.heartbeat.lock().unwrap_or_else(|p| p.into_inner());
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let worker = self.worker.clone();
        let period = self.heartbeat_interval;
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let report = worker.beat().await;
                debug!("Heartbeat tick for {}: {:?}", worker.user_id, report);
            }
        }));
        info!("Heartbeat started for {}", self.user_id());
        true
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Aborts the heartbeat and every proximity loop this session owns.
    pub fn stop(&self) {
        if let Some(handle) = self.heartbeat.lock().unwrap_or_else(|p| p.into_inner()).take() {
            handle.abort();
            info!("Heartbeat stopped for {}", self.user_id());
        }
        let mut loops = self.proximity_loops.lock().unwrap_or_else(|p| p.into_inner());
        for (_, handle) in loops.drain() {
            handle.abort();
        }
    }

    /// Starts the proximity loop for an exchange unless one is already
    /// running. Returns whether a loop was started.
    pub fn watch_exchange(&self, exchange_id: Uuid) -> bool {
        let mut loops = self.proximity_loops.lock().unwrap_or_else(|p| p.into_inner());
        loops.retain(|_, handle| !handle.is_finished());
        if loops.contains_key(&exchange_id) {
            return false;
        }
        loops.insert(exchange_id, self.vault.spawn_proximity_loop(exchange_id));
        true
    }

    pub fn watched_exchanges(&self) -> usize {
        let mut loops = self.proximity_loops.lock().unwrap_or_else(|p| p.into_inner());
        loops.retain(|_, handle| !handle.is_finished());
        loops.len()
    }

    /// Runs a single heartbeat tick inline.
    pub async fn beat_once(&self) -> BeatReport {
        self.worker.beat().await
    }
}

impl Drop for PresenceSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Registry of live sessions, one per connected user.
pub struct PresenceScheduler {
    presence: Arc<PresenceStore>,
    engine: Arc<MatchEngine>,
    vault: Arc<ExchangeVault>,
    default_location: Arc<dyn LocationSource>,
    heartbeat_interval: Duration,
    location_timeout: Duration,
    sessions: Mutex<HashMap<String, Arc<PresenceSession>>>,
}

impl PresenceScheduler {
    pub fn new(
        presence: Arc<PresenceStore>,
        engine: Arc<MatchEngine>,
        vault: Arc<ExchangeVault>,
        default_location: Arc<dyn LocationSource>,
        settings: &CoreSettings,
    ) -> Self {
        Self {
            presence,
            engine,
            vault,
            default_location,
            heartbeat_interval: settings.heartbeat_interval,
            location_timeout: settings.location_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The user's session, created on first use with the default location source.
    pub fn session(&self, user_id: &str) -> Arc<PresenceSession> {
        self.session_with_source(user_id, Arc::clone(&self.default_location))
    }

    /// Like `session`, but a newly created session reads from `location`.
    /// An existing session keeps its source.
    pub fn session_with_source(&self, user_id: &str, location: Arc<dyn LocationSource>) -> Arc<PresenceSession> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let session = sessions.entry(user_id.to_string()).or_insert_with(|| {
            Arc::new(PresenceSession {
                worker: HeartbeatWorker {
                    user_id: user_id.to_string(),
                    presence: Arc::clone(&self.presence),
                    engine: Arc::clone(&self.engine),
                    location,
                    location_timeout: self.location_timeout,
                },
                vault: Arc::clone(&self.vault),
                heartbeat_interval: self.heartbeat_interval,
                heartbeat: Mutex::new(None),
                proximity_loops: Mutex::new(HashMap::new()),
            })
        });
        Arc::clone(session)
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<PresenceSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(user_id)
            .cloned()
    }

    /// Stores the availability flag. Going available starts the heartbeat;
    /// going unavailable stops and forgets the session. Returns whether a
    /// heartbeat is running afterwards.
    pub async fn set_available(&self, user_id: &str, available: bool) -> Result<bool> {
        self.presence.set_status(user_id, available).await?;
        if available {
            let session = self.session(user_id);
            session.start_heartbeat();
            Ok(session.is_heartbeat_running())
        } else {
            self.deactivate(user_id);
            Ok(false)
        }
    }

    /// Stops and forgets the user's session. Always succeeds.
    pub fn deactivate(&self, user_id: &str) -> bool {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(user_id);
        match removed {
            Some(session) => {
                session.stop();
                true
            }
            None => false,
        }
    }

    /// Sessions with a running heartbeat.
    pub fn active_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .filter(|s| s.is_heartbeat_running())
            .count()
    }
}
