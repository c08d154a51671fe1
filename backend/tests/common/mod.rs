#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

use flick::db::MemoryStore;
use flick::geo::{offset, Coordinate};
use flick::models::{Gender, LookingFor, NewUser};
use flick::services::{Core, CoreSettings, MatchRetention};
use flick::utils::{ManualClock, RetryPolicy};
use flick::{BroadcastBus, Event, EventBus, Topic};

pub struct Harness {
    pub core: Core,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub bus: Arc<BroadcastBus>,
}

pub fn settings() -> CoreSettings {
    CoreSettings {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
        },
        ..CoreSettings::default()
    }
}

pub fn geofenced() -> CoreSettings {
    CoreSettings {
        match_retention: MatchRetention::Geofenced { radius_meters: 100.0 },
        ..settings()
    }
}

pub fn harness(settings: CoreSettings) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()));
    let bus = Arc::new(BroadcastBus::new());
    let core = Core::new(store.clone(), bus.clone(), clock.clone(), settings);
    Harness { core, store, clock, bus }
}

/// Westminster Bridge.
pub fn origin() -> Coordinate {
    Coordinate::new(51.5007, -0.1219).unwrap()
}

pub fn east_of_origin(meters: f64) -> Coordinate {
    offset(&origin(), meters, 90.0)
}

pub fn profile(id: &str) -> NewUser {
    NewUser {
        id: id.to_string(),
        name: id.to_string(),
        age: 27,
        height: None,
        gender: None,
        looking_for: None,
        phone_number: None,
        selfie_url: None,
        location: Some(origin()),
        status: true,
    }
}

impl Harness {
    pub async fn user(&self, id: &str, location: Coordinate) {
        self.core
            .presence
            .upsert_user(&NewUser {
                location: Some(location),
                ..profile(id)
            })
            .await
            .unwrap();
    }

    pub async fn user_with(&self, id: &str, gender: Gender, looking_for: LookingFor, phone: &str, location: Coordinate) {
        self.core
            .presence
            .upsert_user(&NewUser {
                gender: Some(gender),
                looking_for: Some(looking_for),
                phone_number: Some(phone.to_string()),
                location: Some(location),
                ..profile(id)
            })
            .await
            .unwrap();
    }

    pub async fn matched_pair(&self, a: &str, b: &str) {
        self.core.engine.send_flick(a, b).await.unwrap();
        self.core.engine.send_flick(b, a).await.unwrap();
    }

    pub fn listen(&self, user_id: &str) -> Receiver<Event> {
        self.bus.subscribe(Topic::user(user_id))
    }

    pub fn listen_pair(&self, a: &str, b: &str) -> Receiver<Event> {
        self.bus.subscribe(Topic::pair(a, b))
    }
}

/// Everything already queued on the receiver.
pub fn drain(rx: &mut Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn count_matched(events: &[Event]) -> usize {
    events.iter().filter(|e| matches!(e, Event::Matched { .. })).count()
}
