use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::db::store::{
    ConversationStore, ExchangeStore, FestivalStore, InsertedExchange, InterestStore, StoreResult, UserStore,
};
use crate::error::StoreError;
use crate::geo::Coordinate;
use crate::models::conversations::{ordered_pair, pair_key};
use crate::models::exchanges::ExchangeRow;
use crate::models::users::UserRow;
use crate::models::{
    AddEdgeOutcome, Conversation, Counterpart, Exchange, Festival, FestivalStats, NewExchange, NewFestival, NewUser,
    RemoveEdgeOutcome, User,
};

const USER_COLUMNS: &str = r#"
    id, name, age, height, gender, looking_for, phone_number, selfie_url,
    ST_Y(location::geometry) AS latitude, ST_X(location::geometry) AS longitude,
    status, festival_id, last_heartbeat, created_at
"#;

const EXCHANGE_COLUMNS: &str = r#"
    id, user_a_id, user_b_id, user_a_phone, user_b_phone, requested_by, status, created_at, expires_at
"#;

#[derive(Debug, FromRow)]
struct NearbyRow {
    #[sqlx(flatten)]
    user: UserRow,
    distance: f64,
}

/// Postgres/PostGIS store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_exchanges(rows: Vec<ExchangeRow>) -> StoreResult<Vec<Exchange>> {
    rows.into_iter().map(Exchange::try_from).collect()
}

#[async_trait]
impl UserStore for PgStore {
    async fn upsert_user(&self, user: &NewUser, now: DateTime<Utc>) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, name, age, height, gender, looking_for, phone_number, selfie_url,
                               location, status, last_heartbeat, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, ST_GeogFromText($9), $10, $11, $11)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                age = EXCLUDED.age,
                height = EXCLUDED.height,
                gender = EXCLUDED.gender,
                looking_for = EXCLUDED.looking_for,
                phone_number = EXCLUDED.phone_number,
                selfie_url = EXCLUDED.selfie_url,
                location = COALESCE(EXCLUDED.location, users.location),
                status = EXCLUDED.status,
                last_heartbeat = EXCLUDED.last_heartbeat
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.id)
        .bind(&user.name)
        .bind(user.age)
        .bind(&user.height)
        .bind(user.gender.map(|g| g.as_str()))
        .bind(user.looking_for.map(|l| l.as_str()))
        .bind(&user.phone_number)
        .bind(&user.selfie_url)
        .bind(user.location.map(|l| l.to_wkt_point()))
        .bind(user.status)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(User::from))
    }

    async fn record_heartbeat(
        &self,
        user_id: &str,
        location: Option<Coordinate>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET last_heartbeat = $2,
                location = COALESCE(ST_GeogFromText($3), location)
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(location.map(|l| l.to_wkt_point()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_status(&self, user_id: &str, status: bool) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE users SET status = $2 WHERE id = $1")
            .bind(user_id)
            .bind(status)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_nearby(
        &self,
        user_id: &str,
        origin: &Coordinate,
        radius_meters: f64,
    ) -> StoreResult<Vec<(User, f64)>> {
        // use_spheroid = false: great-circle distance on the mean sphere
        let rows = sqlx::query_as::<_, NearbyRow>(&format!(
            r#"
            SELECT {USER_COLUMNS},
                   ST_Distance(location, ST_SetSRID(ST_MakePoint($2, $3), 4326)::geography, false) AS distance
            FROM users
            WHERE id <> $1
              AND status = TRUE
              AND location IS NOT NULL
              AND ST_DWithin(location, ST_SetSRID(ST_MakePoint($2, $3), 4326)::geography, $4, false)
            "#
        ))
        .bind(user_id)
        .bind(origin.longitude)
        .bind(origin.latitude)
        .bind(radius_meters)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| (User::from(row.user), row.distance)).collect())
    }

    async fn delete_user(&self, user_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl InterestStore for PgStore {
    async fn insert_edge(&self, from: &str, to: &str, now: DateTime<Utc>) -> StoreResult<AddEdgeOutcome> {
        let mut tx = self.pool.begin().await?;

        // Serializes the two directions of one pair so that exactly one insert observes the other
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(pair_key(from, to))
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO nudges (from_user_id, to_user_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (from_user_id, to_user_id) DO NOTHING
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let reverse_existed = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM nudges WHERE from_user_id = $1 AND to_user_id = $2)",
        )
        .bind(to)
        .bind(from)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(AddEdgeOutcome {
            created: inserted == 1,
            reverse_existed,
        })
    }

    async fn delete_edge(&self, from: &str, to: &str) -> StoreResult<RemoveEdgeOutcome> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(pair_key(from, to))
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM nudges
            WHERE from_user_id = $1 AND to_user_id = $2
            "#,
        )
        .bind(from)
        .bind(to)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let reverse_existed = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM nudges WHERE from_user_id = $1 AND to_user_id = $2)",
        )
        .bind(to)
        .bind(from)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(RemoveEdgeOutcome {
            removed: deleted == 1,
            reverse_existed,
        })
    }

    async fn has_edge(&self, from: &str, to: &str) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM nudges WHERE from_user_id = $1 AND to_user_id = $2)",
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn has_mutual(&self, user_a: &str, user_b: &str) -> StoreResult<bool> {
        let mutual = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(SELECT 1 FROM nudges WHERE from_user_id = $1 AND to_user_id = $2)
               AND EXISTS(SELECT 1 FROM nudges WHERE from_user_id = $2 AND to_user_id = $1)
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_one(&self.pool)
        .await?;

        Ok(mutual)
    }

    async fn edges_from(&self, user_id: &str) -> StoreResult<Vec<Counterpart>> {
        let rows = sqlx::query_as::<_, Counterpart>(
            "SELECT to_user_id AS user_id, created_at FROM nudges WHERE from_user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn edges_to(&self, user_id: &str) -> StoreResult<Vec<Counterpart>> {
        let rows = sqlx::query_as::<_, Counterpart>(
            "SELECT from_user_id AS user_id, created_at FROM nudges WHERE to_user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn mutual_counterparts(&self, user_id: &str) -> StoreResult<Vec<Counterpart>> {
        let rows = sqlx::query_as::<_, Counterpart>(
            r#"
            SELECT sent.to_user_id AS user_id, GREATEST(sent.created_at, received.created_at) AS created_at
            FROM nudges sent
            JOIN nudges received
              ON received.from_user_id = sent.to_user_id AND received.to_user_id = sent.from_user_id
            WHERE sent.from_user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn delete_edges_for_user(&self, user_id: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM nudges WHERE from_user_id = $1 OR to_user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ExchangeStore for PgStore {
    async fn insert_exchange(
        &self,
        exchange: &NewExchange,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<InsertedExchange> {
        let key = pair_key(&exchange.user_a_id, &exchange.user_b_id);
        let mut tx = self.pool.begin().await?;

        let replaced = sqlx::query_as::<_, ExchangeRow>(&format!(
            "DELETE FROM exchanges WHERE pair_key = $1 AND expires_at <= $2 RETURNING {EXCHANGE_COLUMNS}"
        ))
        .bind(&key)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let created = sqlx::query_as::<_, ExchangeRow>(&format!(
            r#"
            INSERT INTO exchanges (id, pair_key, user_a_id, user_b_id, user_a_phone, user_b_phone,
                                   requested_by, status, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9)
            ON CONFLICT (pair_key) DO NOTHING
            RETURNING {EXCHANGE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&key)
        .bind(&exchange.user_a_id)
        .bind(&exchange.user_b_id)
        .bind(&exchange.user_a_phone)
        .bind(&exchange.user_b_phone)
        .bind(&exchange.requested_by)
        .bind(now)
        .bind(now + ttl)
        .fetch_optional(&mut *tx)
        .await?;

        let (row, was_created) = match created {
            Some(row) => (row, true),
            None => {
                let existing = sqlx::query_as::<_, ExchangeRow>(&format!(
                    "SELECT {EXCHANGE_COLUMNS} FROM exchanges WHERE pair_key = $1"
                ))
                .bind(&key)
                .fetch_one(&mut *tx)
                .await?;
                (existing, false)
            }
        };

        tx.commit().await?;

        Ok(InsertedExchange {
            exchange: Exchange::try_from(row)?,
            created: was_created,
            replaced: replaced.map(Exchange::try_from).transpose()?,
        })
    }

    async fn get_exchange(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Exchange>> {
        let row = sqlx::query_as::<_, ExchangeRow>(&format!(
            "SELECT {EXCHANGE_COLUMNS} FROM exchanges WHERE id = $1 AND expires_at > $2"
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Exchange::try_from).transpose()
    }

    async fn get_exchange_for_pair(
        &self,
        user_a: &str,
        user_b: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Exchange>> {
        let row = sqlx::query_as::<_, ExchangeRow>(&format!(
            "SELECT {EXCHANGE_COLUMNS} FROM exchanges WHERE pair_key = $1 AND expires_at > $2"
        ))
        .bind(pair_key(user_a, user_b))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Exchange::try_from).transpose()
    }

    async fn active_exchange_for_user(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<Option<Exchange>> {
        let row = sqlx::query_as::<_, ExchangeRow>(&format!(
            r#"
            SELECT {EXCHANGE_COLUMNS} FROM exchanges
            WHERE (user_a_id = $1 OR user_b_id = $1)
              AND status = 'accepted'
              AND expires_at > $2
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Exchange::try_from).transpose()
    }

    async fn accept_exchange(&self, id: Uuid, acceptor: &str, now: DateTime<Utc>) -> StoreResult<Option<Exchange>> {
        let row = sqlx::query_as::<_, ExchangeRow>(&format!(
            r#"
            UPDATE exchanges
            SET status = 'accepted'
            WHERE id = $1
              AND status = 'pending'
              AND expires_at > $3
              AND requested_by <> $2
              AND (user_a_id = $2 OR user_b_id = $2)
            RETURNING {EXCHANGE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(acceptor)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Exchange::try_from).transpose()
    }

    async fn delete_exchange(&self, id: Uuid) -> StoreResult<Option<Exchange>> {
        let row = sqlx::query_as::<_, ExchangeRow>(&format!(
            "DELETE FROM exchanges WHERE id = $1 RETURNING {EXCHANGE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Exchange::try_from).transpose()
    }

    async fn delete_exchange_if_expired(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Exchange>> {
        let row = sqlx::query_as::<_, ExchangeRow>(&format!(
            "DELETE FROM exchanges WHERE id = $1 AND expires_at <= $2 RETURNING {EXCHANGE_COLUMNS}"
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Exchange::try_from).transpose()
    }

    async fn delete_expired_exchanges(&self, now: DateTime<Utc>) -> StoreResult<Vec<Exchange>> {
        let rows = sqlx::query_as::<_, ExchangeRow>(&format!(
            "DELETE FROM exchanges WHERE expires_at <= $1 RETURNING {EXCHANGE_COLUMNS}"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        to_exchanges(rows)
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn open_conversation(&self, user_a: &str, user_b: &str) -> StoreResult<Conversation> {
        let (user1, user2) = ordered_pair(user_a, user_b);
        sqlx::query(
            r#"
            INSERT INTO conversations (pair_key, user1_id, user2_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (pair_key) DO NOTHING
            "#,
        )
        .bind(pair_key(user_a, user_b))
        .bind(user1)
        .bind(user2)
        .execute(&self.pool)
        .await?;

        self.get_conversation(&pair_key(user_a, user_b))
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("conversation {} vanished after insert", pair_key(user_a, user_b))))
    }

    async fn record_message(&self, sender: &str, recipient: &str, now: DateTime<Utc>) -> StoreResult<Conversation> {
        self.open_conversation(sender, recipient).await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            UPDATE conversations
            SET last_message_at = $2,
                unread_count_user1 = unread_count_user1 + CASE WHEN user1_id = $3 THEN 1 ELSE 0 END,
                unread_count_user2 = unread_count_user2 + CASE WHEN user2_id = $3 THEN 1 ELSE 0 END
            WHERE pair_key = $1
            RETURNING pair_key, user1_id, user2_id, last_message_at, unread_count_user1, unread_count_user2
            "#,
        )
        .bind(pair_key(sender, recipient))
        .bind(now)
        .bind(recipient)
        .fetch_one(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn mark_read(&self, pair_key: &str, reader: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET unread_count_user1 = CASE WHEN user1_id = $2 THEN 0 ELSE unread_count_user1 END,
                unread_count_user2 = CASE WHEN user2_id = $2 THEN 0 ELSE unread_count_user2 END
            WHERE pair_key = $1 AND (user1_id = $2 OR user2_id = $2)
            "#,
        )
        .bind(pair_key)
        .bind(reader)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_conversation(&self, pair_key: &str) -> StoreResult<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT pair_key, user1_id, user2_id, last_message_at, unread_count_user1, unread_count_user2
            FROM conversations
            WHERE pair_key = $1
            "#,
        )
        .bind(pair_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }
}

#[async_trait]
impl FestivalStore for PgStore {
    async fn upsert_festival(&self, festival: &NewFestival, now: DateTime<Utc>) -> StoreResult<Festival> {
        let festival = sqlx::query_as::<_, Festival>(
            r#"
            INSERT INTO festivals (id, name, sponsor, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                sponsor = EXCLUDED.sponsor
            RETURNING id, name, sponsor, created_at
            "#,
        )
        .bind(&festival.id)
        .bind(&festival.name)
        .bind(&festival.sponsor)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(festival)
    }

    async fn get_festival(&self, festival_id: &str) -> StoreResult<Option<Festival>> {
        let festival = sqlx::query_as::<_, Festival>(
            "SELECT id, name, sponsor, created_at FROM festivals WHERE id = $1",
        )
        .bind(festival_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(festival)
    }

    async fn set_user_festival(&self, user_id: &str, festival_id: Option<&str>) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE users SET festival_id = $2 WHERE id = $1")
            .bind(user_id)
            .bind(festival_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn users_in_festival(&self, festival_id: &str, user_id: &str) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE festival_id = $1
              AND id <> $2
              AND status = TRUE
            "#
        ))
        .bind(festival_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn festival_stats(&self, festival_id: &str) -> StoreResult<FestivalStats> {
        let active_users = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users WHERE festival_id = $1 AND status = TRUE",
        )
        .bind(festival_id)
        .fetch_one(&self.pool)
        .await?;

        let matches = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM nudges n
            JOIN nudges r ON r.from_user_id = n.to_user_id AND r.to_user_id = n.from_user_id
            JOIN users a ON a.id = n.from_user_id
            JOIN users b ON b.id = n.to_user_id
            WHERE n.from_user_id < n.to_user_id
              AND a.festival_id = $1
              AND b.festival_id = $1
            "#,
        )
        .bind(festival_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(FestivalStats {
            festival_id: festival_id.to_string(),
            active_users,
            matches,
        })
    }
}
