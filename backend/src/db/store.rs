//! Persistence seams.
//!
//! Every cross-user invariant (one edge per ordered pair, one exchange per
//! unordered pair, exactly-once exchange deletion) is enforced inside these
//! calls by the backing store, never by callers holding in-process locks.
//! All time-dependent calls take `now` from the caller's clock.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::geo::Coordinate;
use crate::models::{
    AddEdgeOutcome, Conversation, Counterpart, Exchange, Festival, FestivalStats, NewExchange, NewFestival, NewUser,
    RemoveEdgeOutcome, User,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of `insert_exchange`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertedExchange {
    /// The new row, or the live one that blocked the insert.
    pub exchange: Exchange,
    pub created: bool,
    /// An expired row for the pair that this insert deleted.
    pub replaced: Option<Exchange>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert or replace profile fields. A `None` location keeps the stored one.
    async fn upsert_user(&self, user: &NewUser, now: DateTime<Utc>) -> StoreResult<User>;

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>>;

    /// Refreshes `last_heartbeat`; writes the location only when given.
    /// Returns false when the user does not exist.
    async fn record_heartbeat(
        &self,
        user_id: &str,
        location: Option<Coordinate>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn set_status(&self, user_id: &str, status: bool) -> StoreResult<bool>;

    /// Available, located users other than `user_id` within `radius_meters`
    /// great-circle distance of `origin`, with their distance in meters.
    async fn find_nearby(
        &self,
        user_id: &str,
        origin: &Coordinate,
        radius_meters: f64,
    ) -> StoreResult<Vec<(User, f64)>>;

    async fn delete_user(&self, user_id: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait InterestStore: Send + Sync {
    /// Idempotent insert. The reverse-edge check runs under the same
    /// pair-scoped lock as the insert.
    async fn insert_edge(&self, from: &str, to: &str, now: DateTime<Utc>) -> StoreResult<AddEdgeOutcome>;

    /// Idempotent delete. The reverse-edge check shares the insert's pair lock.
    async fn delete_edge(&self, from: &str, to: &str) -> StoreResult<RemoveEdgeOutcome>;

    async fn has_edge(&self, from: &str, to: &str) -> StoreResult<bool>;

    /// Both directions checked in one statement.
    async fn has_mutual(&self, user_a: &str, user_b: &str) -> StoreResult<bool>;

    async fn edges_from(&self, user_id: &str) -> StoreResult<Vec<Counterpart>>;

    async fn edges_to(&self, user_id: &str) -> StoreResult<Vec<Counterpart>>;

    /// Counterparts with edges in both directions; `created_at` is the later edge.
    async fn mutual_counterparts(&self, user_id: &str) -> StoreResult<Vec<Counterpart>>;

    async fn delete_edges_for_user(&self, user_id: &str) -> StoreResult<u64>;
}

#[async_trait]
pub trait ExchangeStore: Send + Sync {
    /// Creates a pending exchange unless a live one exists for the pair.
    /// An expired row for the pair is deleted first and handed back in `replaced`.
    async fn insert_exchange(
        &self,
        exchange: &NewExchange,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<InsertedExchange>;

    /// Live (unexpired) exchange by id.
    async fn get_exchange(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Exchange>>;

    async fn get_exchange_for_pair(
        &self,
        user_a: &str,
        user_b: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Exchange>>;

    /// The live accepted exchange a user takes part in, if any.
    async fn active_exchange_for_user(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<Option<Exchange>>;

    /// Pending → accepted, only for the non-requesting participant of a live row.
    async fn accept_exchange(&self, id: Uuid, acceptor: &str, now: DateTime<Utc>) -> StoreResult<Option<Exchange>>;

    /// Conditional delete. `Some` for the single call that removed the row.
    async fn delete_exchange(&self, id: Uuid) -> StoreResult<Option<Exchange>>;

    /// Conditional delete of one row that has reached its `expires_at`.
    async fn delete_exchange_if_expired(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Exchange>>;

    /// Deletes rows with `expires_at <= now`, returning what was removed.
    async fn delete_expired_exchanges(&self, now: DateTime<Utc>) -> StoreResult<Vec<Exchange>>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Creates the conversation row for a pair if missing.
    async fn open_conversation(&self, user_a: &str, user_b: &str) -> StoreResult<Conversation>;

    /// Bumps last activity and the recipient's unread counter.
    async fn record_message(&self, sender: &str, recipient: &str, now: DateTime<Utc>) -> StoreResult<Conversation>;

    async fn mark_read(&self, pair_key: &str, reader: &str) -> StoreResult<bool>;

    async fn get_conversation(&self, pair_key: &str) -> StoreResult<Option<Conversation>>;
}

#[async_trait]
pub trait FestivalStore: Send + Sync {
    /// Creates the room or renames it; the creation time is kept.
    async fn upsert_festival(&self, festival: &NewFestival, now: DateTime<Utc>) -> StoreResult<Festival>;

    async fn get_festival(&self, festival_id: &str) -> StoreResult<Option<Festival>>;

    /// Moves the user into a room, or out of any room with `None`.
    /// Returns false when the user does not exist.
    async fn set_user_festival(&self, user_id: &str, festival_id: Option<&str>) -> StoreResult<bool>;

    /// Available members of the room other than `user_id`.
    async fn users_in_festival(&self, festival_id: &str, user_id: &str) -> StoreResult<Vec<User>>;

    /// Available members, and mutual pairs whose two users are both in the room.
    async fn festival_stats(&self, festival_id: &str) -> StoreResult<FestivalStats>;
}

pub trait Store: UserStore + InterestStore + ExchangeStore + ConversationStore + FestivalStore {}

impl<T> Store for T where T: UserStore + InterestStore + ExchangeStore + ConversationStore + FestivalStore {}
