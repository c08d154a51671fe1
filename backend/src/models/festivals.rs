use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::constants::is_valid_festival_code;
use crate::error::CoreError;
use crate::models::users::{Gender, LookingFor, User};

/// A festival or event room. Users in a room only discover each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Festival {
    pub id: String,
    pub name: String,
    pub sponsor: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFestival {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sponsor: Option<String>,
}

impl NewFestival {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !is_valid_festival_code(&self.id) {
            return Err(CoreError::Invalid(format!("malformed festival code: {:?}", self.id)));
        }
        if self.name.trim().is_empty() {
            return Err(CoreError::Invalid("festival name must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Headcount for sponsors: available members and matches made inside the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FestivalStats {
    pub festival_id: String,
    pub active_users: i64,
    pub matches: i64,
}

/// Public profile of another room member. No phone number, no location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMember {
    pub id: String,
    pub name: String,
    pub age: i32,
    pub height: Option<String>,
    pub gender: Option<Gender>,
    pub looking_for: Option<LookingFor>,
    pub selfie_url: Option<String>,
}

impl From<&User> for RoomMember {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            age: user.age,
            height: user.height.clone(),
            gender: user.gender,
            looking_for: user.looking_for,
            selfie_url: user.selfie_url.clone(),
        }
    }
}
