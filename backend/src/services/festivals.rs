//! Festival/event rooms. A user joins a room by scanning the venue's code and
//! from then on only discovers other members of that room.

use std::sync::Arc;
use tracing::info;

use crate::constants::{is_valid_festival_code, is_valid_user_id};
use crate::db::Store;
use crate::error::{CoreError, Result};
use crate::models::{Festival, FestivalStats, NewFestival, RoomMember};
use crate::utils::{with_retry, Clock, RetryPolicy};

pub struct FestivalRooms {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

fn validate_code(festival_id: &str) -> Result<()> {
    if !is_valid_festival_code(festival_id) {
        return Err(CoreError::Invalid(format!("malformed festival code: {:?}", festival_id)));
    }
    Ok(())
}

fn validate_user(user_id: &str) -> Result<()> {
    if !is_valid_user_id(user_id) {
        return Err(CoreError::Invalid(format!("malformed user id: {:?}", user_id)));
    }
    Ok(())
}

impl FestivalRooms {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        Self { store, clock, retry }
    }

    /// Opens a room, or updates its name and sponsor.
    pub async fn register(&self, festival: &NewFestival) -> Result<Festival> {
        festival.validate()?;
        let now = self.clock.now();
        let stored = with_retry(&self.retry, "upsert festival", || async move {
            self.store.upsert_festival(festival, now).await.map_err(CoreError::from)
        })
        .await?;
        info!("Registered festival {} ({})", stored.id, stored.name);
        Ok(stored)
    }

    pub async fn get(&self, festival_id: &str) -> Result<Option<Festival>> {
        validate_code(festival_id)?;
        with_retry(&self.retry, "get festival", || async move {
            self.store.get_festival(festival_id).await.map_err(CoreError::from)
        })
        .await
    }

    async fn require(&self, festival_id: &str) -> Result<Festival> {
        self.get(festival_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("festival {}", festival_id)))
    }

    /// Checks the code and moves the user into that room, leaving any other.
    pub async fn join(&self, user_id: &str, festival_id: &str) -> Result<Festival> {
        validate_user(user_id)?;
        let festival = self.require(festival_id).await?;
        let moved = with_retry(&self.retry, "join festival", || async move {
            self.store
                .set_user_festival(user_id, Some(festival_id))
                .await
                .map_err(CoreError::from)
        })
        .await?;
        if !moved {
            return Err(CoreError::NotFound(format!("user {}", user_id)));
        }
        info!("{} joined festival {}", user_id, festival_id);
        Ok(festival)
    }

    /// Takes the user out of their room. `false` when they were in none.
    pub async fn leave(&self, user_id: &str) -> Result<bool> {
        validate_user(user_id)?;
        if self.current(user_id).await?.is_none() {
            return Ok(false);
        }
        let moved = with_retry(&self.retry, "leave festival", || async move {
            self.store
                .set_user_festival(user_id, None)
                .await
                .map_err(CoreError::from)
        })
        .await?;
        if moved {
            info!("{} left their festival", user_id);
        }
        Ok(moved)
    }

    /// The room the user is in, if any.
    pub async fn current(&self, user_id: &str) -> Result<Option<Festival>> {
        validate_user(user_id)?;
        let user = with_retry(&self.retry, "get user", || async move {
            self.store.get_user(user_id).await.map_err(CoreError::from)
        })
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("user {}", user_id)))?;
        match user.festival_id.as_deref() {
            Some(festival_id) => self.get(festival_id).await,
            None => Ok(None),
        }
    }

    /// Available members of the room other than `user_id`, at any distance.
    pub async fn members(&self, festival_id: &str, user_id: &str) -> Result<Vec<RoomMember>> {
        validate_code(festival_id)?;
        validate_user(user_id)?;
        let users = with_retry(&self.retry, "list festival members", || async move {
            self.store
                .users_in_festival(festival_id, user_id)
                .await
                .map_err(CoreError::from)
        })
        .await?;
        Ok(users.iter().map(RoomMember::from).collect())
    }

    pub async fn stats(&self, festival_id: &str) -> Result<FestivalStats> {
        self.require(festival_id).await?;
        with_retry(&self.retry, "festival stats", || async move {
            self.store.festival_stats(festival_id).await.map_err(CoreError::from)
        })
        .await
    }
}
