//! Ephemeral phone-number exchange.
//!
//! Per unordered pair: `None -> Pending(requester) -> Accepted -> Destroyed`.
//! Two independent triggers race to destroy an exchange: the TTL fixed at
//! creation and the live distance between the participants. Both go through
//! a conditional delete, and only the call that removed the row announces it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::constants::is_valid_phone_number;
use crate::db::Store;
use crate::error::{CoreError, Result};
use crate::events::{Event, EventBus};
use crate::models::{DestroyReason, Exchange, ExchangeStatus, NewExchange};
use crate::services::ledger::validate_pair;
use crate::services::presence::PresenceStore;
use crate::services::CoreSettings;
use crate::utils::{with_retry, Clock, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "exchange", rename_all = "snake_case")]
pub enum RequestOutcome {
    Created(Exchange),
    /// A live exchange for the pair already existed and was left unchanged.
    AlreadyExists(Exchange),
}

impl RequestOutcome {
    pub fn exchange(&self) -> &Exchange {
        match self {
            Self::Created(exchange) | Self::AlreadyExists(exchange) => exchange,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "exchange", rename_all = "snake_case")]
pub enum AcceptOutcome {
    Accepted(Exchange),
    AlreadyAccepted(Exchange),
    /// Destroyed or expired before the accept landed.
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ProximityVerdict {
    /// The exchange no longer exists.
    Gone,
    /// Still pending; only accepted exchanges are distance-bound.
    NotOpen,
    /// A participant has no known location; the exchange is kept.
    Unknown,
    Within { distance_meters: f64 },
    /// Out of range; the exchange was destroyed by this check.
    Broken { distance_meters: f64 },
}

pub struct ExchangeVault {
    store: Arc<dyn Store>,
    presence: Arc<PresenceStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    radius_meters: f64,
    proximity_check_interval: Duration,
    reaper_interval: Duration,
    retry: RetryPolicy,
}

impl ExchangeVault {
    pub fn new(
        store: Arc<dyn Store>,
        presence: Arc<PresenceStore>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        settings: &CoreSettings,
    ) -> Self {
        Self {
            store,
            presence,
            bus,
            clock,
            ttl: settings.exchange_ttl,
            radius_meters: settings.proximity_radius_meters,
            proximity_check_interval: settings.proximity_check_interval,
            reaper_interval: settings.reaper_interval,
            retry: settings.retry,
        }
    }

    pub async fn request(&self, from: &str, to: &str, from_phone: &str, to_phone: &str) -> Result<RequestOutcome> {
        validate_pair(from, to)?;
        for phone in [from_phone, to_phone] {
            if !is_valid_phone_number(phone) {
                return Err(CoreError::Invalid(format!("malformed phone number: {:?}", phone)));
            }
        }
        let matched = with_retry(&self.retry, "check match", || async move {
            self.store.has_mutual(from, to).await.map_err(CoreError::from)
        })
        .await?;
        if !matched {
            return Err(CoreError::PolicyBlocked(
                "You can only exchange numbers with a match".to_string(),
            ));
        }

        let new_exchange = NewExchange {
            user_a_id: from.to_string(),
            user_b_id: to.to_string(),
            user_a_phone: from_phone.to_string(),
            user_b_phone: to_phone.to_string(),
            requested_by: from.to_string(),
        };
        let now = self.clock.now();
        let new_exchange = &new_exchange;
        let inserted = with_retry(&self.retry, "insert exchange", || async move {
            self.store
                .insert_exchange(new_exchange, now, self.ttl)
                .await
                .map_err(CoreError::from)
        })
        .await?;

        if let Some(expired) = &inserted.replaced {
            self.announce_destroyed(expired, DestroyReason::TimerExpired);
        }
        let exchange = inserted.exchange;
        if !inserted.created {
            debug!("Exchange {} already open for {} / {}", exchange.id, from, to);
            return Ok(RequestOutcome::AlreadyExists(exchange));
        }

        info!("{} requested exchange {} with {}", from, exchange.id, to);
        self.bus.publish_to_pair(
            from,
            to,
            Event::ExchangeRequested {
                exchange_id: exchange.id,
                from_user_id: from.to_string(),
                to_user_id: to.to_string(),
                expires_at: exchange.expires_at,
            },
        );
        Ok(RequestOutcome::Created(exchange))
    }

    /// Copies both stored phone numbers into a new exchange. Later profile
    /// edits do not reach an exchange already in flight.
    pub async fn request_from_profiles(&self, from: &str, to: &str) -> Result<RequestOutcome> {
        validate_pair(from, to)?;
        let requester = self.presence.require_user(from).await?;
        let counterpart = self.presence.require_user(to).await?;
        let from_phone = requester
            .phone_number
            .ok_or_else(|| CoreError::Invalid(format!("{} has no phone number on file", from)))?;
        let to_phone = counterpart
            .phone_number
            .ok_or_else(|| CoreError::Invalid(format!("{} has no phone number on file", to)))?;
        self.request(from, to, &from_phone, &to_phone).await
    }

    pub async fn accept(&self, exchange_id: Uuid, actor: &str) -> Result<AcceptOutcome> {
        let Some(exchange) = self.get(exchange_id).await? else {
            return Ok(AcceptOutcome::NotFound);
        };
        if !exchange.involves(actor) {
            return Err(CoreError::Invalid(format!("{} is not part of exchange {}", actor, exchange_id)));
        }
        if exchange.status == ExchangeStatus::Accepted {
            return Ok(AcceptOutcome::AlreadyAccepted(exchange));
        }
        if exchange.requested_by == actor {
            return Err(CoreError::Invalid("the requester cannot accept their own exchange".to_string()));
        }

        let now = self.clock.now();
        let accepted = with_retry(&self.retry, "accept exchange", || async move {
            self.store
                .accept_exchange(exchange_id, actor, now)
                .await
                .map_err(CoreError::from)
        })
        .await?;
        let Some(accepted) = accepted else {
            return Ok(AcceptOutcome::NotFound);
        };
        info!("Exchange {} accepted by {}", exchange_id, actor);
        self.bus.publish_to_pair(
            &accepted.user_a_id,
            &accepted.user_b_id,
            Event::ExchangeAccepted {
                exchange: accepted.clone(),
            },
        );
        Ok(AcceptOutcome::Accepted(accepted))
    }

    /// Turns the exchange down in any state. `false` when it was already gone.
    pub async fn decline(&self, exchange_id: Uuid, actor: &str) -> Result<bool> {
        if self.participant_view(exchange_id, actor).await?.is_none() {
            return Ok(false);
        }
        self.destroy(exchange_id, DestroyReason::Declined).await
    }

    /// Ends the exchange early. `false` when it was already gone.
    pub async fn close(&self, exchange_id: Uuid, actor: &str) -> Result<bool> {
        if self.participant_view(exchange_id, actor).await?.is_none() {
            return Ok(false);
        }
        self.destroy(exchange_id, DestroyReason::Closed).await
    }

    async fn participant_view(&self, exchange_id: Uuid, actor: &str) -> Result<Option<Exchange>> {
        match self.get(exchange_id).await? {
            Some(exchange) if !exchange.involves(actor) => Err(CoreError::Invalid(format!(
                "{} is not part of exchange {}",
                actor, exchange_id
            ))),
            other => Ok(other),
        }
    }

    pub async fn get(&self, exchange_id: Uuid) -> Result<Option<Exchange>> {
        let now = self.clock.now();
        with_retry(&self.retry, "get exchange", || async move {
            self.store.get_exchange(exchange_id, now).await.map_err(CoreError::from)
        })
        .await
    }

    pub async fn get_for_pair(&self, user_a: &str, user_b: &str) -> Result<Option<Exchange>> {
        let now = self.clock.now();
        with_retry(&self.retry, "get exchange for pair", || async move {
            self.store
                .get_exchange_for_pair(user_a, user_b, now)
                .await
                .map_err(CoreError::from)
        })
        .await
    }

    /// The accepted, unexpired exchange this user is part of, if any.
    pub async fn active_for_user(&self, user_id: &str) -> Result<Option<Exchange>> {
        let now = self.clock.now();
        with_retry(&self.retry, "get active exchange", || async move {
            self.store
                .active_exchange_for_user(user_id, now)
                .await
                .map_err(CoreError::from)
        })
        .await
    }

    /// Deletes the exchange and announces it. Returns `false` when another
    /// trigger or a participant got there first.
    pub async fn destroy(&self, exchange_id: Uuid, reason: DestroyReason) -> Result<bool> {
        let deleted = with_retry(&self.retry, "delete exchange", || async move {
            self.store.delete_exchange(exchange_id).await.map_err(CoreError::from)
        })
        .await?;

        match deleted {
            Some(exchange) => {
                self.announce_destroyed(&exchange, reason);
                Ok(true)
            }
            None => {
                debug!("Exchange {} already gone ({:?})", exchange_id, reason);
                Ok(false)
            }
        }
    }

    /// Deletes the exchange only if its TTL has run out.
    pub async fn destroy_if_expired(&self, exchange_id: Uuid) -> Result<bool> {
        let now = self.clock.now();
        let deleted = with_retry(&self.retry, "delete expired exchange", || async move {
            self.store
                .delete_exchange_if_expired(exchange_id, now)
                .await
                .map_err(CoreError::from)
        })
        .await?;

        Ok(match deleted {
            Some(exchange) => {
                self.announce_destroyed(&exchange, DestroyReason::TimerExpired);
                true
            }
            None => false,
        })
    }

    /// Deletes every exchange past its TTL. Safe to run concurrently with
    /// itself and with per-exchange timers.
    pub async fn sweep_expired(&self) -> Result<Vec<Exchange>> {
        let now = self.clock.now();
        let expired = with_retry(&self.retry, "sweep expired exchanges", || async move {
            self.store
                .delete_expired_exchanges(now)
                .await
                .map_err(CoreError::from)
        })
        .await?;

        for exchange in &expired {
            self.announce_destroyed(exchange, DestroyReason::TimerExpired);
        }
        if !expired.is_empty() {
            info!("Swept {} expired exchange(s)", expired.len());
        }
        Ok(expired)
    }

    /// One proximity check. Destroys the exchange when the participants are
    /// farther apart than the radius.
    pub async fn check_proximity(&self, exchange_id: Uuid) -> Result<ProximityVerdict> {
        let Some(exchange) = self.get(exchange_id).await? else {
            return Ok(ProximityVerdict::Gone);
        };
        if exchange.status != ExchangeStatus::Accepted {
            return Ok(ProximityVerdict::NotOpen);
        }
        let Some(distance) = self
            .presence
            .distance_between(&exchange.user_a_id, &exchange.user_b_id)
            .await?
        else {
            return Ok(ProximityVerdict::Unknown);
        };

        if distance <= self.radius_meters {
            return Ok(ProximityVerdict::Within {
                distance_meters: distance,
            });
        }

        info!(
            "Exchange {} out of range: {:.0}m > {}m",
            exchange_id, distance, self.radius_meters
        );
        if self.destroy(exchange_id, DestroyReason::ProximityBroken).await? {
            Ok(ProximityVerdict::Broken {
                distance_meters: distance,
            })
        } else {
            Ok(ProximityVerdict::Gone)
        }
    }

    fn announce_destroyed(&self, exchange: &Exchange, reason: DestroyReason) {
        info!("Exchange {} destroyed: {:?}", exchange.id, reason);
        self.bus.publish_to_pair(
            &exchange.user_a_id,
            &exchange.user_b_id,
            Event::ExchangeDestroyed {
                exchange_id: exchange.id,
                user_a: exchange.user_a_id.clone(),
                user_b: exchange.user_b_id.clone(),
                reason,
            },
        );
    }

    /// Sleeps until the exchange's `expires_at`, then deletes it if still there.
    pub fn spawn_timer(self: &Arc<Self>, exchange: &Exchange) -> JoinHandle<()> {
        let vault = Arc::clone(self);
        let exchange_id = exchange.id;
        let wait = (exchange.expires_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            if let Err(e) = vault.destroy_if_expired(exchange_id).await {
                error!("Timer for exchange {} failed: {}", exchange_id, e);
            }
        })
    }

    /// Re-checks the distance every `proximity_check_interval` until the
    /// exchange is gone. A failed check skips the tick.
    pub fn spawn_proximity_loop(self: &Arc<Self>, exchange_id: Uuid) -> JoinHandle<()> {
        let vault = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(vault.proximity_check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                match vault.check_proximity(exchange_id).await {
                    Ok(ProximityVerdict::Gone) | Ok(ProximityVerdict::Broken { .. }) => break,
                    Ok(verdict) => debug!("Exchange {} proximity: {:?}", exchange_id, verdict),
                    Err(e) => warn!("Proximity check for {} failed: {}", exchange_id, e),
                }
            }
            debug!("Proximity loop for exchange {} finished", exchange_id);
        })
    }

    /// Process-wide TTL enforcement; runs for the lifetime of the server.
    pub async fn run_reaper(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.reaper_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Exchange reaper running every {:?}", self.reaper_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.sweep_expired().await {
                error!("Exchange sweep failed: {}", e);
            }
        }
    }
}
