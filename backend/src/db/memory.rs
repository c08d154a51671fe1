//! In-process store with the same atomicity as the Postgres one: each call
//! runs under a single lock, standing in for the database's constraints.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::store::{
    ConversationStore, ExchangeStore, FestivalStore, InsertedExchange, InterestStore, StoreResult, UserStore,
};
use crate::error::StoreError;
use crate::geo::{distance_meters, Coordinate};
use crate::models::conversations::pair_key;
use crate::models::{
    AddEdgeOutcome, Conversation, Counterpart, Exchange, ExchangeStatus, Festival, FestivalStats, NewExchange,
    NewFestival, NewUser, RemoveEdgeOutcome, User,
};

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<String, User>,
    edges: HashMap<(String, String), DateTime<Utc>>,
    exchanges: HashMap<Uuid, Exchange>,
    conversations: HashMap<String, Conversation>,
    festivals: HashMap<String, Festival>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    injected_failures: AtomicU32,
    stall_after: std::sync::Mutex<Option<u32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls fail with a transient timeout.
    pub fn fail_next(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Lets `calls` more calls through, then makes every later call hang.
    pub fn stall_after(&self, calls: u32) {
        *self.stall_after.lock().unwrap_or_else(|p| p.into_inner()) = Some(calls);
    }

    pub async fn edge_count(&self) -> usize {
        self.state.lock().await.edges.len()
    }

    /// Every stored exchange row, expired or not.
    pub async fn exchange_rows(&self) -> Vec<Exchange> {
        self.state.lock().await.exchanges.values().cloned().collect()
    }

    async fn check_injected_failure(&self) -> StoreResult<()> {
        let stalled = {
            let mut stall = self.stall_after.lock().unwrap_or_else(|p| p.into_inner());
            match stall.as_mut() {
                Some(0) => true,
                Some(remaining) => {
                    *remaining -= 1;
                    false
                }
                None => false,
            }
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let consumed = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(StoreError::Timeout(0)),
            Err(_) => Ok(()),
        }
    }
}

fn live_exchange_for_pair<'a>(state: &'a MemoryState, key: &str, now: DateTime<Utc>) -> Option<&'a Exchange> {
    state
        .exchanges
        .values()
        .find(|e| e.pair_key() == key && !e.is_expired_at(now))
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn upsert_user(&self, user: &NewUser, now: DateTime<Utc>) -> StoreResult<User> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        let existing = state.users.get(&user.id);
        let stored = User {
            id: user.id.clone(),
            name: user.name.clone(),
            age: user.age,
            height: user.height.clone(),
            gender: user.gender,
            looking_for: user.looking_for,
            phone_number: user.phone_number.clone(),
            selfie_url: user.selfie_url.clone(),
            location: user.location.or_else(|| existing.and_then(|u| u.location)),
            status: user.status,
            festival_id: existing.and_then(|u| u.festival_id.clone()),
            last_heartbeat: now,
            created_at: existing.map(|u| u.created_at).unwrap_or(now),
        };
        state.users.insert(user.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        self.check_injected_failure().await?;
        Ok(self.state.lock().await.users.get(user_id).cloned())
    }

    async fn record_heartbeat(
        &self,
        user_id: &str,
        location: Option<Coordinate>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        match state.users.get_mut(user_id) {
            Some(user) => {
                user.last_heartbeat = now;
                if location.is_some() {
                    user.location = location;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_status(&self, user_id: &str, status: bool) -> StoreResult<bool> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        match state.users.get_mut(user_id) {
            Some(user) => {
                user.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_nearby(
        &self,
        user_id: &str,
        origin: &Coordinate,
        radius_meters: f64,
    ) -> StoreResult<Vec<(User, f64)>> {
        self.check_injected_failure().await?;
        let state = self.state.lock().await;
        let nearby = state
            .users
            .values()
            .filter(|u| u.id != user_id && u.status)
            .filter_map(|u| {
                let location = u.location?;
                let distance = distance_meters(origin, &location);
                (distance <= radius_meters).then(|| (u.clone(), distance))
            })
            .collect();
        Ok(nearby)
    }

    async fn delete_user(&self, user_id: &str) -> StoreResult<bool> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        let existed = state.users.remove(user_id).is_some();
        // mirror ON DELETE CASCADE
        state.edges.retain(|(from, to), _| from != user_id && to != user_id);
        state.exchanges.retain(|_, e| !e.involves(user_id));
        state
            .conversations
            .retain(|_, c| c.user1_id != user_id && c.user2_id != user_id);
        Ok(existed)
    }
}

#[async_trait]
impl InterestStore for MemoryStore {
    async fn insert_edge(&self, from: &str, to: &str, now: DateTime<Utc>) -> StoreResult<AddEdgeOutcome> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        let key = (from.to_string(), to.to_string());
        let created = !state.edges.contains_key(&key);
        if created {
            state.edges.insert(key, now);
        }
        let reverse_existed = state.edges.contains_key(&(to.to_string(), from.to_string()));
        Ok(AddEdgeOutcome { created, reverse_existed })
    }

    async fn delete_edge(&self, from: &str, to: &str) -> StoreResult<RemoveEdgeOutcome> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        Ok(RemoveEdgeOutcome {
            removed: state.edges.remove(&(from.to_string(), to.to_string())).is_some(),
            reverse_existed: state.edges.contains_key(&(to.to_string(), from.to_string())),
        })
    }

    async fn has_edge(&self, from: &str, to: &str) -> StoreResult<bool> {
        self.check_injected_failure().await?;
        let state = self.state.lock().await;
        Ok(state.edges.contains_key(&(from.to_string(), to.to_string())))
    }

    async fn has_mutual(&self, user_a: &str, user_b: &str) -> StoreResult<bool> {
        self.check_injected_failure().await?;
        let state = self.state.lock().await;
        Ok(state.edges.contains_key(&(user_a.to_string(), user_b.to_string()))
            && state.edges.contains_key(&(user_b.to_string(), user_a.to_string())))
    }

    async fn edges_from(&self, user_id: &str) -> StoreResult<Vec<Counterpart>> {
        self.check_injected_failure().await?;
        let state = self.state.lock().await;
        Ok(state
            .edges
            .iter()
            .filter(|((from, _), _)| from == user_id)
            .map(|((_, to), created_at)| Counterpart {
                user_id: to.clone(),
                created_at: *created_at,
            })
            .collect())
    }

    async fn edges_to(&self, user_id: &str) -> StoreResult<Vec<Counterpart>> {
        self.check_injected_failure().await?;
        let state = self.state.lock().await;
        Ok(state
            .edges
            .iter()
            .filter(|((_, to), _)| to == user_id)
            .map(|((from, _), created_at)| Counterpart {
                user_id: from.clone(),
                created_at: *created_at,
            })
            .collect())
    }

    async fn mutual_counterparts(&self, user_id: &str) -> StoreResult<Vec<Counterpart>> {
        self.check_injected_failure().await?;
        let state = self.state.lock().await;
        Ok(state
            .edges
            .iter()
            .filter(|((from, _), _)| from == user_id)
            .filter_map(|((from, to), sent_at)| {
                let received_at = state.edges.get(&(to.clone(), from.clone()))?;
                Some(Counterpart {
                    user_id: to.clone(),
                    created_at: (*sent_at).max(*received_at),
                })
            })
            .collect())
    }

    async fn delete_edges_for_user(&self, user_id: &str) -> StoreResult<u64> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        let before = state.edges.len();
        state.edges.retain(|(from, to), _| from != user_id && to != user_id);
        Ok((before - state.edges.len()) as u64)
    }
}

#[async_trait]
impl ExchangeStore for MemoryStore {
    async fn insert_exchange(
        &self,
        exchange: &NewExchange,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<InsertedExchange> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        let key = pair_key(&exchange.user_a_id, &exchange.user_b_id);

        let expired_id = state
            .exchanges
            .values()
            .find(|e| e.pair_key() == key && e.is_expired_at(now))
            .map(|e| e.id);
        let replaced = expired_id.and_then(|id| state.exchanges.remove(&id));

        if let Some(existing) = live_exchange_for_pair(&state, &key, now) {
            return Ok(InsertedExchange {
                exchange: existing.clone(),
                created: false,
                replaced,
            });
        }

        let created = Exchange {
            id: Uuid::new_v4(),
            user_a_id: exchange.user_a_id.clone(),
            user_b_id: exchange.user_b_id.clone(),
            user_a_phone: exchange.user_a_phone.clone(),
            user_b_phone: exchange.user_b_phone.clone(),
            requested_by: exchange.requested_by.clone(),
            status: ExchangeStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
        };
        state.exchanges.insert(created.id, created.clone());
        Ok(InsertedExchange {
            exchange: created,
            created: true,
            replaced,
        })
    }

    async fn get_exchange(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Exchange>> {
        self.check_injected_failure().await?;
        let state = self.state.lock().await;
        Ok(state.exchanges.get(&id).filter(|e| !e.is_expired_at(now)).cloned())
    }

    async fn get_exchange_for_pair(
        &self,
        user_a: &str,
        user_b: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Exchange>> {
        self.check_injected_failure().await?;
        let state = self.state.lock().await;
        Ok(live_exchange_for_pair(&state, &pair_key(user_a, user_b), now).cloned())
    }

    async fn active_exchange_for_user(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<Option<Exchange>> {
        self.check_injected_failure().await?;
        let state = self.state.lock().await;
        Ok(state
            .exchanges
            .values()
            .filter(|e| e.involves(user_id) && e.status == ExchangeStatus::Accepted && !e.is_expired_at(now))
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn accept_exchange(&self, id: Uuid, acceptor: &str, now: DateTime<Utc>) -> StoreResult<Option<Exchange>> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        match state.exchanges.get_mut(&id) {
            Some(e)
                if e.status == ExchangeStatus::Pending
                    && !e.is_expired_at(now)
                    && e.requested_by != acceptor
                    && e.involves(acceptor) =>
            {
                e.status = ExchangeStatus::Accepted;
                Ok(Some(e.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_exchange(&self, id: Uuid) -> StoreResult<Option<Exchange>> {
        self.check_injected_failure().await?;
        Ok(self.state.lock().await.exchanges.remove(&id))
    }

    async fn delete_exchange_if_expired(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Exchange>> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        let expired = state.exchanges.get(&id).is_some_and(|e| e.is_expired_at(now));
        Ok(if expired { state.exchanges.remove(&id) } else { None })
    }

    async fn delete_expired_exchanges(&self, now: DateTime<Utc>) -> StoreResult<Vec<Exchange>> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        let expired: Vec<Uuid> = state
            .exchanges
            .values()
            .filter(|e| e.is_expired_at(now))
            .map(|e| e.id)
            .collect();
        Ok(expired
            .into_iter()
            .filter_map(|id| state.exchanges.remove(&id))
            .collect())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn open_conversation(&self, user_a: &str, user_b: &str) -> StoreResult<Conversation> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        let conversation = state
            .conversations
            .entry(pair_key(user_a, user_b))
            .or_insert_with(|| Conversation::new(user_a, user_b));
        Ok(conversation.clone())
    }

    async fn record_message(&self, sender: &str, recipient: &str, now: DateTime<Utc>) -> StoreResult<Conversation> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        let conversation = state
            .conversations
            .entry(pair_key(sender, recipient))
            .or_insert_with(|| Conversation::new(sender, recipient));
        conversation.last_message_at = Some(now);
        if conversation.user1_id == recipient {
            conversation.unread_count_user1 += 1;
        } else {
            conversation.unread_count_user2 += 1;
        }
        Ok(conversation.clone())
    }

    async fn mark_read(&self, key: &str, reader: &str) -> StoreResult<bool> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        match state.conversations.get_mut(key) {
            Some(c) if c.user1_id == reader => {
                c.unread_count_user1 = 0;
                Ok(true)
            }
            Some(c) if c.user2_id == reader => {
                c.unread_count_user2 = 0;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_conversation(&self, key: &str) -> StoreResult<Option<Conversation>> {
        self.check_injected_failure().await?;
        Ok(self.state.lock().await.conversations.get(key).cloned())
    }
}

#[async_trait]
impl FestivalStore for MemoryStore {
    async fn upsert_festival(&self, festival: &NewFestival, now: DateTime<Utc>) -> StoreResult<Festival> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        let created_at = state.festivals.get(&festival.id).map_or(now, |f| f.created_at);
        let stored = Festival {
            id: festival.id.clone(),
            name: festival.name.clone(),
            sponsor: festival.sponsor.clone(),
            created_at,
        };
        state.festivals.insert(festival.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_festival(&self, festival_id: &str) -> StoreResult<Option<Festival>> {
        self.check_injected_failure().await?;
        Ok(self.state.lock().await.festivals.get(festival_id).cloned())
    }

    async fn set_user_festival(&self, user_id: &str, festival_id: Option<&str>) -> StoreResult<bool> {
        self.check_injected_failure().await?;
        let mut state = self.state.lock().await;
        match state.users.get_mut(user_id) {
            Some(user) => {
                user.festival_id = festival_id.map(str::to_string);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn users_in_festival(&self, festival_id: &str, user_id: &str) -> StoreResult<Vec<User>> {
        self.check_injected_failure().await?;
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .filter(|u| u.id != user_id && u.status && u.festival_id.as_deref() == Some(festival_id))
            .cloned()
            .collect())
    }

    async fn festival_stats(&self, festival_id: &str) -> StoreResult<FestivalStats> {
        self.check_injected_failure().await?;
        let state = self.state.lock().await;
        let in_room = |id: &str| {
            state
                .users
                .get(id)
                .is_some_and(|u| u.festival_id.as_deref() == Some(festival_id))
        };
        let active_users = state
            .users
            .values()
            .filter(|u| u.status && u.festival_id.as_deref() == Some(festival_id))
            .count();
        let matches = state
            .edges
            .keys()
            .filter(|(from, to)| {
                from < to && state.edges.contains_key(&(to.clone(), from.clone())) && in_room(from) && in_room(to)
            })
            .count();
        Ok(FestivalStats {
            festival_id: festival_id.to_string(),
            active_users: active_users as i64,
            matches: matches as i64,
        })
    }
}
