use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::conversations::pair_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    Pending,
    Accepted,
}

impl ExchangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            _ => None,
        }
    }
}

/// Why an exchange was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyReason {
    TimerExpired,
    ProximityBroken,
    Declined,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: Uuid,
    pub user_a_id: String,
    pub user_b_id: String,
    pub user_a_phone: String,
    pub user_b_phone: String,
    pub requested_by: String,
    pub status: ExchangeStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Exchange {
    pub fn pair_key(&self) -> String {
        pair_key(&self.user_a_id, &self.user_b_id)
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.user_a_id == user_id || self.user_b_id == user_id
    }

    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        if self.user_a_id == user_id {
            Some(&self.user_b_id)
        } else if self.user_b_id == user_id {
            Some(&self.user_a_id)
        } else {
            None
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// One participant's view of an exchange. The other side's number is only
/// present once the exchange has been accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeView {
    pub id: Uuid,
    pub counterpart_id: String,
    pub requested_by: String,
    pub status: ExchangeStatus,
    pub my_phone: String,
    pub their_phone: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub seconds_remaining: i64,
}

impl Exchange {
    pub fn view_for(&self, user_id: &str, now: DateTime<Utc>) -> Option<ExchangeView> {
        let (counterpart, mine, theirs) = if self.user_a_id == user_id {
            (&self.user_b_id, &self.user_a_phone, &self.user_b_phone)
        } else if self.user_b_id == user_id {
            (&self.user_a_id, &self.user_b_phone, &self.user_a_phone)
        } else {
            return None;
        };
        Some(ExchangeView {
            id: self.id,
            counterpart_id: counterpart.clone(),
            requested_by: self.requested_by.clone(),
            status: self.status,
            my_phone: mine.clone(),
            their_phone: (self.status == ExchangeStatus::Accepted).then(|| theirs.clone()),
            expires_at: self.expires_at,
            seconds_remaining: self.seconds_remaining(now),
        })
    }
}

/// Fields for a new exchange row; phones are copied in at request time.
#[derive(Debug, Clone)]
pub struct NewExchange {
    pub user_a_id: String,
    pub user_b_id: String,
    pub user_a_phone: String,
    pub user_b_phone: String,
    pub requested_by: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ExchangeRow {
    pub id: Uuid,
    pub user_a_id: String,
    pub user_b_id: String,
    pub user_a_phone: String,
    pub user_b_phone: String,
    pub requested_by: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TryFrom<ExchangeRow> for Exchange {
    type Error = StoreError;

    fn try_from(row: ExchangeRow) -> Result<Self, Self::Error> {
        let status = ExchangeStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("exchange {} has status {:?}", row.id, row.status)))?;
        Ok(Self {
            id: row.id,
            user_a_id: row.user_a_id,
            user_b_id: row.user_b_id,
            user_a_phone: row.user_a_phone,
            user_b_phone: row.user_b_phone,
            requested_by: row.requested_by,
            status,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn exchange(created_at: DateTime<Utc>) -> Exchange {
        Exchange {
            id: Uuid::new_v4(),
            user_a_id: "alice".to_string(),
            user_b_id: "bob".to_string(),
            user_a_phone: "555-0100".to_string(),
            user_b_phone: "555-0200".to_string(),
            requested_by: "alice".to_string(),
            status: ExchangeStatus::Pending,
            created_at,
            expires_at: created_at + Duration::seconds(900),
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let t0 = Utc::now();
        let ex = exchange(t0);
        assert!(!ex.is_expired_at(t0 + Duration::seconds(899)));
        assert!(ex.is_expired_at(t0 + Duration::seconds(900)));
        assert_eq!(ex.seconds_remaining(t0 + Duration::seconds(1000)), 0);
    }

    #[test]
    fn test_counterpart() {
        let ex = exchange(Utc::now());
        assert_eq!(ex.counterpart_of("alice"), Some("bob"));
        assert_eq!(ex.counterpart_of("bob"), Some("alice"));
        assert_eq!(ex.counterpart_of("mallory"), None);
        assert_eq!(ex.pair_key(), "alice|bob");
    }

    #[test]
    fn test_view_hides_counterpart_phone_until_accepted() {
        let now = Utc::now();
        let mut ex = exchange(now);

        let bob_view = ex.view_for("bob", now).unwrap();
        assert_eq!(bob_view.my_phone, "555-0200");
        assert_eq!(bob_view.their_phone, None);
        assert!(ex.view_for("mallory", now).is_none());

        ex.status = ExchangeStatus::Accepted;
        let alice_view = ex.view_for("alice", now).unwrap();
        assert_eq!(alice_view.their_phone.as_deref(), Some("555-0200"));
        assert_eq!(alice_view.seconds_remaining, 900);
    }

    #[test]
    fn test_corrupt_status_rejected() {
        let now = Utc::now();
        let row = ExchangeRow {
            id: Uuid::new_v4(),
            user_a_id: "a".to_string(),
            user_b_id: "b".to_string(),
            user_a_phone: "1".to_string(),
            user_b_phone: "2".to_string(),
            requested_by: "a".to_string(),
            status: "exploded".to_string(),
            created_at: now,
            expires_at: now,
        };
        assert!(Exchange::try_from(row).is_err());
    }
}
