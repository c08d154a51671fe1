//! Flick state machine per ordered pair: `NoEdge -> Sent -> {Matched | NoEdge}`.
//!
//! A match is derived from both directed edges existing. `Matched` is
//! published only by the `add_edge` call that both created its edge and
//! observed the reverse one under the pair lock, so it fires once per match.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::Store;
use crate::error::{CoreError, Result};
use crate::events::{DissolveReason, Event, EventBus, Topic};
use crate::geo::distance_meters;
use crate::models::conversations::ordered_pair;
use crate::models::{pair_key, Conversation, Counterpart, Gender, LookingFor};
use crate::services::ledger::{validate_pair, InterestLedger};
use crate::services::presence::PresenceStore;
use crate::utils::{with_retry, Clock, RetryPolicy};

/// Whether matches outlive the distance between the two users.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MatchRetention {
    #[default]
    Persistent,
    Geofenced { radius_meters: f64 },
}

impl MatchRetention {
    pub fn parse(raw: &str, radius_meters: f64) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "persistent" => Some(Self::Persistent),
            "geofenced" | "geofence" => Some(Self::Geofenced { radius_meters }),
            _ => None,
        }
    }

    pub fn geofence_radius(&self) -> Option<f64> {
        match self {
            Self::Persistent => None,
            Self::Geofenced { radius_meters } => Some(*radius_meters),
        }
    }
}

/// A pair at exactly the radius stays matched.
pub fn is_within_geofence(distance_meters: f64, radius_meters: f64) -> bool {
    distance_meters <= radius_meters
}

/// Decides whether a sender may flick a target nobody has flicked them from.
pub trait InitiationPolicy: Send + Sync {
    fn allows_first_flick(
        &self,
        sender_gender: Option<Gender>,
        sender_looking_for: Option<LookingFor>,
        target_gender: Option<Gender>,
    ) -> bool;
}

/// Women make the first move on heterosexual pairings.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenderInitiationPolicy;

impl InitiationPolicy for GenderInitiationPolicy {
    fn allows_first_flick(
        &self,
        sender_gender: Option<Gender>,
        sender_looking_for: Option<LookingFor>,
        target_gender: Option<Gender>,
    ) -> bool {
        !matches!(
            (sender_gender, sender_looking_for, target_gender),
            (Some(Gender::Male), Some(LookingFor::Female), Some(Gender::Female))
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OpenInitiationPolicy;

impl InitiationPolicy for OpenInitiationPolicy {
    fn allows_first_flick(&self, _: Option<Gender>, _: Option<LookingFor>, _: Option<Gender>) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlickLists {
    pub sent: Vec<Counterpart>,
    pub received: Vec<Counterpart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlickOutcome {
    Sent,
    /// The edge was already there; `matched` reports the current pair state.
    AlreadySent { matched: bool },
    Matched,
}

pub struct MatchEngine {
    ledger: Arc<InterestLedger>,
    presence: Arc<PresenceStore>,
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    policy: Arc<dyn InitiationPolicy>,
    retention: MatchRetention,
    retry: RetryPolicy,
}

impl MatchEngine {
    pub fn new(
        ledger: Arc<InterestLedger>,
        presence: Arc<PresenceStore>,
        store: Arc<dyn Store>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        policy: Arc<dyn InitiationPolicy>,
        retention: MatchRetention,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            presence,
            store,
            bus,
            clock,
            policy,
            retention,
            retry,
        }
    }

    pub fn retention(&self) -> MatchRetention {
        self.retention
    }

    pub async fn send_flick(&self, from: &str, to: &str) -> Result<FlickOutcome> {
        validate_pair(from, to)?;
        let sender = self.presence.require_user(from).await?;
        let target = self.presence.require_user(to).await?;

        if !self
            .policy
            .allows_first_flick(sender.gender, sender.looking_for, target.gender)
            && !self.ledger.has_edge(to, from).await?
        {
            return Err(CoreError::PolicyBlocked(
                "Wait for them to flick you first".to_string(),
            ));
        }

        let outcome = self.ledger.add_edge(from, to).await?;
        if !outcome.created {
            let matched = self.ledger.has_mutual(from, to).await?;
            return Ok(FlickOutcome::AlreadySent { matched });
        }

        self.bus.publish(
            Topic::user(to),
            Event::FlickReceived {
                from_user_id: from.to_string(),
                to_user_id: to.to_string(),
            },
        );

        if !outcome.completes_match() {
            info!("{} flicked {}", from, to);
            return Ok(FlickOutcome::Sent);
        }

        info!("{} and {} matched", from, to);
        let opened = with_retry(&self.retry, "open conversation", || async move {
            self.store.open_conversation(from, to).await.map_err(CoreError::from)
        })
        .await;
        if let Err(e) = opened {
            // The match itself is already committed by the edges
            error!("Failed to open conversation for {} and {}: {}", from, to, e);
        }
        let (user_a, user_b) = ordered_pair(from, to);
        self.bus.publish_to_pair(
            user_a,
            user_b,
            Event::Matched {
                user_a: user_a.to_string(),
                user_b: user_b.to_string(),
            },
        );
        Ok(FlickOutcome::Matched)
    }

    /// Withdraws interest. Only geofenced retention announces the broken
    /// match, and only from the delete that observed the reverse edge.
    pub async fn unflick(&self, from: &str, to: &str) -> Result<bool> {
        validate_pair(from, to)?;
        let outcome = self.ledger.remove_edge(from, to).await?;
        let announce = matches!(self.retention, MatchRetention::Geofenced { .. }) && outcome.breaks_match();
        if announce {
            let (user_a, user_b) = ordered_pair(from, to);
            self.bus.publish_to_pair(
                user_a,
                user_b,
                Event::MatchDissolved {
                    user_a: user_a.to_string(),
                    user_b: user_b.to_string(),
                    reason: DissolveReason::Unflicked,
                },
            );
        }
        Ok(outcome.removed)
    }

    pub async fn matches(&self, user_id: &str) -> Result<Vec<Counterpart>> {
        self.ledger.mutual_counterparts(user_id).await
    }

    /// Flicks this user sent and received, matched or not.
    pub async fn flicks(&self, user_id: &str) -> Result<FlickLists> {
        Ok(FlickLists {
            sent: self.ledger.edges_from(user_id).await?,
            received: self.ledger.edges_to(user_id).await?,
        })
    }

    /// Bumps the conversation's activity and the recipient's unread count.
    /// Only matched users have a conversation.
    pub async fn record_message(&self, sender: &str, recipient: &str) -> Result<Conversation> {
        validate_pair(sender, recipient)?;
        if !self.ledger.has_mutual(sender, recipient).await? {
            return Err(CoreError::PolicyBlocked("You can only message a match".to_string()));
        }
        let now = self.clock.now();
        with_retry(&self.retry, "record message", || async move {
            self.store
                .record_message(sender, recipient, now)
                .await
                .map_err(CoreError::from)
        })
        .await
    }

    pub async fn mark_read(&self, reader: &str, other: &str) -> Result<bool> {
        validate_pair(reader, other)?;
        let key = pair_key(reader, other);
        let key = key.as_str();
        with_retry(&self.retry, "mark read", || async move {
            self.store.mark_read(key, reader).await.map_err(CoreError::from)
        })
        .await
    }

    pub async fn conversation(&self, user_a: &str, user_b: &str) -> Result<Option<Conversation>> {
        validate_pair(user_a, user_b)?;
        let key = pair_key(user_a, user_b);
        let key = key.as_str();
        with_retry(&self.retry, "get conversation", || async move {
            self.store.get_conversation(key).await.map_err(CoreError::from)
        })
        .await
    }

    /// Dissolves this user's matches that have drifted beyond the geofence.
    /// No-op under persistent retention. Returns the counterparts dissolved by
    /// this call.
    pub async fn geofence_sweep(&self, user_id: &str) -> Result<Vec<String>> {
        let Some(radius) = self.retention.geofence_radius() else {
            return Ok(Vec::new());
        };
        let Some(my_location) = self.presence.location_of(user_id).await? else {
            return Ok(Vec::new());
        };

        let mut dissolved = Vec::new();
        for counterpart in self.ledger.mutual_counterparts(user_id).await? {
            let Some(their_location) = self.presence.location_of(&counterpart.user_id).await? else {
                continue;
            };
            let distance = distance_meters(&my_location, &their_location);
            if is_within_geofence(distance, radius) {
                continue;
            }
            match self.dissolve(user_id, &counterpart.user_id).await {
                Ok(true) => {
                    info!(
                        "Dissolved match {} / {} at {:.0}m (radius {}m)",
                        user_id, counterpart.user_id, distance, radius
                    );
                    dissolved.push(counterpart.user_id);
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to dissolve {} / {}: {}", user_id, counterpart.user_id, e),
            }
        }
        Ok(dissolved)
    }

    /// Removes both edges. Only the delete that broke the match publishes,
    /// so concurrent sweeps and unflicks of one pair announce it once.
    async fn dissolve(&self, user_x: &str, user_y: &str) -> Result<bool> {
        let (user_a, user_b) = ordered_pair(user_x, user_y);
        let won = self.ledger.remove_edge(user_a, user_b).await?.breaks_match();
        self.ledger.remove_edge(user_b, user_a).await?;
        if won {
            self.bus.publish_to_pair(
                user_a,
                user_b,
                Event::MatchDissolved {
                    user_a: user_a.to_string(),
                    user_b: user_b.to_string(),
                    reason: DissolveReason::OutOfRange,
                },
            );
        }
        Ok(won)
    }
}
