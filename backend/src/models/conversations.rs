use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Pairing key shared by conversations, exchanges and pair topics:
/// the two identifiers sorted and joined with `|`.
pub fn pair_key(user_1: &str, user_2: &str) -> String {
    if user_1 < user_2 {
        format!("{}|{}", user_1, user_2)
    } else {
        format!("{}|{}", user_2, user_1)
    }
}

/// Orders two ids the way the pairing key does.
pub fn ordered_pair<'a>(user_1: &'a str, user_2: &'a str) -> (&'a str, &'a str) {
    if user_1 < user_2 {
        (user_1, user_2)
    } else {
        (user_2, user_1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub pair_key: String,
    pub user1_id: String,
    pub user2_id: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count_user1: i32,
    pub unread_count_user2: i32,
}

impl Conversation {
    pub fn new(user_1: &str, user_2: &str) -> Self {
        let (user1_id, user2_id) = ordered_pair(user_1, user_2);
        Self {
            pair_key: pair_key(user_1, user_2),
            user1_id: user1_id.to_string(),
            user2_id: user2_id.to_string(),
            last_message_at: None,
            unread_count_user1: 0,
            unread_count_user2: 0,
        }
    }

    pub fn unread_for(&self, user_id: &str) -> i32 {
        if self.user1_id == user_id {
            self.unread_count_user1
        } else if self.user2_id == user_id {
            self.unread_count_user2
        } else {
            0
        }
    }
}
