use std::sync::Arc;
use tracing::{debug, info};

use crate::constants::is_valid_user_id;
use crate::db::Store;
use crate::error::{CoreError, Result};
use crate::geo::{distance_meters, distance_meters_rounded, round_meters, Coordinate};
use crate::models::{NearbyFilter, NearbyUser, NewUser, User};
use crate::utils::{with_retry, Clock, RetryPolicy};

/// Owns the presence fields of a user: location, heartbeat and availability.
pub struct PresenceStore {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl PresenceStore {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        Self { store, clock, retry }
    }

    pub async fn upsert_user(&self, profile: &NewUser) -> Result<User> {
        profile.validate()?;
        let now = self.clock.now();
        let user = with_retry(&self.retry, "upsert user", || async move {
            self.store.upsert_user(profile, now).await.map_err(CoreError::from)
        })
        .await?;
        info!("Upserted user {}", user.id);
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        with_retry(&self.retry, "get user", || async move {
            self.store.get_user(user_id).await.map_err(CoreError::from)
        })
        .await
    }

    /// Like `get_user`, but a missing row is `NotFound`.
    pub async fn require_user(&self, user_id: &str) -> Result<User> {
        self.get_user(user_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("user {}", user_id)))
    }

    /// Refreshes `last_heartbeat`. The location is only written when given,
    /// so a failed location fix never clears the last known one.
    pub async fn heartbeat(&self, user_id: &str, location: Option<Coordinate>) -> Result<()> {
        if let Some(location) = &location {
            location.validate()?;
        }
        let now = self.clock.now();
        let recorded = with_retry(&self.retry, "heartbeat", || async move {
            self.store
                .record_heartbeat(user_id, location, now)
                .await
                .map_err(CoreError::from)
        })
        .await?;
        if !recorded {
            return Err(CoreError::NotFound(format!("user {}", user_id)));
        }
        debug!("Heartbeat for {} (location: {})", user_id, location.is_some());
        Ok(())
    }

    pub async fn set_status(&self, user_id: &str, status: bool) -> Result<()> {
        let updated = with_retry(&self.retry, "set status", || async move {
            self.store.set_status(user_id, status).await.map_err(CoreError::from)
        })
        .await?;
        if !updated {
            return Err(CoreError::NotFound(format!("user {}", user_id)));
        }
        info!("User {} is now {}", user_id, if status { "available" } else { "unavailable" });
        Ok(())
    }

    /// Available users within `radius_meters` of `location`, caller excluded.
    /// Only users in the caller's festival room are listed; a caller outside
    /// any room sees only users outside any room. No ordering is guaranteed.
    pub async fn nearby(
        &self,
        user_id: &str,
        location: &Coordinate,
        radius_meters: f64,
        filter: Option<NearbyFilter>,
    ) -> Result<Vec<NearbyUser>> {
        if !is_valid_user_id(user_id) {
            return Err(CoreError::Invalid(format!("malformed user id: {:?}", user_id)));
        }
        location.validate()?;
        if !radius_meters.is_finite() || radius_meters <= 0.0 {
            return Err(CoreError::Invalid(format!("radius must be positive, got {}", radius_meters)));
        }

        let room = self.get_user(user_id).await?.and_then(|me| me.festival_id);
        let candidates = with_retry(&self.retry, "find nearby", || async move {
            self.store
                .find_nearby(user_id, location, radius_meters)
                .await
                .map_err(CoreError::from)
        })
        .await?;
        let nearby: Vec<NearbyUser> = candidates
            .into_iter()
            .filter(|(user, _)| user.festival_id == room)
            .filter(|(user, _)| {
                filter
                    .as_ref()
                    .is_none_or(|f| f.admits(user.gender, user.looking_for))
            })
            .map(|(user, store_distance)| {
                // Displayed distance uses the same Haversine as every other check
                let meters = match &user.location {
                    Some(their_location) => distance_meters_rounded(location, their_location),
                    None => round_meters(store_distance),
                };
                NearbyUser::from_user(&user, meters)
            })
            .collect();

        debug!("{} nearby users within {}m of {}", nearby.len(), radius_meters, user_id);
        Ok(nearby)
    }

    pub async fn location_of(&self, user_id: &str) -> Result<Option<Coordinate>> {
        Ok(self.get_user(user_id).await?.and_then(|u| u.location))
    }

    /// Live distance from both users' latest stored locations. `None` when
    /// either user or either location is unknown.
    pub async fn distance_between(&self, user_a: &str, user_b: &str) -> Result<Option<f64>> {
        let (a, b) = (self.location_of(user_a).await?, self.location_of(user_b).await?);
        Ok(match (a, b) {
            (Some(a), Some(b)) => Some(distance_meters(&a, &b)),
            _ => None,
        })
    }
}
