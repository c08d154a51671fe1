pub mod cleanup;
pub mod festivals;
pub mod ledger;
pub mod matching;
pub mod presence;
pub mod scheduler;
pub mod session;
pub mod vault;

pub use cleanup::{run_cleanup, CleanupReport};
pub use festivals::FestivalRooms;
pub use ledger::InterestLedger;
pub use matching::{
    FlickLists, FlickOutcome, GenderInitiationPolicy, InitiationPolicy, MatchEngine, MatchRetention, OpenInitiationPolicy,
};
pub use presence::PresenceStore;
pub use scheduler::{BeatReport, FixedLocation, LocationSource, PresenceScheduler, PresenceSession, StoredLocation};
pub use session::{LogoutReport, MediaStore, NoopMediaStore, SessionTeardown};
pub use vault::{AcceptOutcome, ExchangeVault, ProximityVerdict, RequestOutcome};

use std::sync::Arc;
use std::time::Duration;

use crate::constants::*;
use crate::db::Store;
use crate::events::EventBus;
use crate::utils::{Clock, RetryPolicy};

/// Tuning knobs shared by the core services.
#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub proximity_radius_meters: f64,
    pub heartbeat_interval: Duration,
    pub location_timeout: Duration,
    pub exchange_ttl: chrono::Duration,
    pub proximity_check_interval: Duration,
    pub reaper_interval: Duration,
    pub match_retention: MatchRetention,
    pub retry: RetryPolicy,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            proximity_radius_meters: PROXIMITY_RADIUS_METERS,
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            location_timeout: Duration::from_secs(LOCATION_TIMEOUT_SECS),
            exchange_ttl: chrono::Duration::seconds(EXCHANGE_TTL_SECS),
            proximity_check_interval: Duration::from_secs(PROXIMITY_CHECK_INTERVAL_SECS),
            reaper_interval: Duration::from_secs(REAPER_INTERVAL_SECS),
            match_retention: MatchRetention::Persistent,
            retry: RetryPolicy::default(),
        }
    }
}

/// Every core service wired over one store, bus and clock.
#[derive(Clone)]
pub struct Core {
    pub settings: CoreSettings,
    pub store: Arc<dyn Store>,
    pub bus: Arc<dyn EventBus>,
    pub clock: Arc<dyn Clock>,
    pub presence: Arc<PresenceStore>,
    pub ledger: Arc<InterestLedger>,
    pub engine: Arc<MatchEngine>,
    pub vault: Arc<ExchangeVault>,
    pub festivals: Arc<FestivalRooms>,
    pub scheduler: Arc<PresenceScheduler>,
    pub teardown: Arc<SessionTeardown>,
}

impl Core {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        settings: CoreSettings,
    ) -> Self {
        CoreBuilder::new(store, bus, clock, settings).build()
    }

    pub fn builder(
        store: Arc<dyn Store>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        settings: CoreSettings,
    ) -> CoreBuilder {
        CoreBuilder::new(store, bus, clock, settings)
    }
}

/// Swaps in non-default collaborators before wiring the core.
pub struct CoreBuilder {
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    settings: CoreSettings,
    policy: Arc<dyn InitiationPolicy>,
    media: Arc<dyn MediaStore>,
    location: Option<Arc<dyn LocationSource>>,
}

impl CoreBuilder {
    fn new(store: Arc<dyn Store>, bus: Arc<dyn EventBus>, clock: Arc<dyn Clock>, settings: CoreSettings) -> Self {
        Self {
            store,
            bus,
            clock,
            settings,
            policy: Arc::new(GenderInitiationPolicy),
            media: Arc::new(NoopMediaStore),
            location: None,
        }
    }

    pub fn policy(mut self, policy: Arc<dyn InitiationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn media(mut self, media: Arc<dyn MediaStore>) -> Self {
        self.media = media;
        self
    }

    /// Default location source for sessions; the stored last fix otherwise.
    pub fn location(mut self, location: Arc<dyn LocationSource>) -> Self {
        self.location = Some(location);
        self
    }

    pub fn build(self) -> Core {
        let Self {
            store,
            bus,
            clock,
            settings,
            policy,
            media,
            location,
        } = self;

        let presence = Arc::new(PresenceStore::new(Arc::clone(&store), Arc::clone(&clock), settings.retry));
        let ledger = Arc::new(InterestLedger::new(Arc::clone(&store), Arc::clone(&clock), settings.retry));
        let engine = Arc::new(MatchEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&presence),
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&clock),
            policy,
            settings.match_retention,
            settings.retry,
        ));
        let vault = Arc::new(ExchangeVault::new(
            Arc::clone(&store),
            Arc::clone(&presence),
            Arc::clone(&bus),
            Arc::clone(&clock),
            &settings,
        ));
        let festivals = Arc::new(FestivalRooms::new(Arc::clone(&store), Arc::clone(&clock), settings.retry));
        let location = location.unwrap_or_else(|| Arc::new(StoredLocation::new(Arc::clone(&presence))));
        let scheduler = Arc::new(PresenceScheduler::new(
            Arc::clone(&presence),
            Arc::clone(&engine),
            Arc::clone(&vault),
            location,
            &settings,
        ));
        let teardown = Arc::new(SessionTeardown::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&scheduler),
            media,
        ));

        Core {
            settings,
            store,
            bus,
            clock,
            presence,
            ledger,
            engine,
            vault,
            festivals,
            scheduler,
            teardown,
        }
    }
}
