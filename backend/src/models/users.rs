use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::constants::{is_valid_phone_number, is_valid_user_id};
use crate::error::CoreError;
use crate::geo::{format_distance, Coordinate};

/// Minimum age accepted at onboarding
pub const MIN_AGE: i32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookingFor {
    Male,
    Female,
    Both,
}

impl LookingFor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Both => "both",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    pub fn accepts(&self, gender: Gender) -> bool {
        match self {
            Self::Both => true,
            Self::Male => gender == Gender::Male,
            Self::Female => gender == Gender::Female,
        }
    }
}

/// Profile fields supplied at onboarding or on edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub id: String,
    pub name: String,
    pub age: i32,
    #[serde(default)]
    pub height: Option<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub looking_for: Option<LookingFor>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub selfie_url: Option<String>,
    #[serde(default)]
    pub location: Option<Coordinate>,
    #[serde(default = "default_status")]
    pub status: bool,
}

fn default_status() -> bool {
    true
}

impl NewUser {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !is_valid_user_id(&self.id) {
            return Err(CoreError::Invalid(format!("malformed user id: {:?}", self.id)));
        }
        if self.name.trim().is_empty() {
            return Err(CoreError::Invalid("name must not be empty".to_string()));
        }
        if self.age < MIN_AGE {
            return Err(CoreError::Invalid(format!("age must be at least {}", MIN_AGE)));
        }
        if let Some(phone) = &self.phone_number {
            if !is_valid_phone_number(phone) {
                return Err(CoreError::Invalid(format!("malformed phone number: {:?}", phone)));
            }
        }
        if let Some(location) = &self.location {
            location.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub age: i32,
    pub height: Option<String>,
    pub gender: Option<Gender>,
    pub looking_for: Option<LookingFor>,
    pub phone_number: Option<String>,
    pub selfie_url: Option<String>,
    pub location: Option<Coordinate>,
    pub status: bool,
    /// Festival room the user joined; set only through join/leave.
    pub festival_id: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Row shape of `users` with the geography column split into plain degrees.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub age: i32,
    pub height: Option<String>,
    pub gender: Option<String>,
    pub looking_for: Option<String>,
    pub phone_number: Option<String>,
    pub selfie_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: bool,
    pub festival_id: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let location = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinate { latitude, longitude }),
            _ => None,
        };
        Self {
            id: row.id,
            name: row.name,
            age: row.age,
            height: row.height,
            gender: row.gender.as_deref().and_then(Gender::parse),
            looking_for: row.looking_for.as_deref().and_then(LookingFor::parse),
            phone_number: row.phone_number,
            selfie_url: row.selfie_url,
            location,
            status: row.status,
            festival_id: row.festival_id,
            last_heartbeat: row.last_heartbeat,
            created_at: row.created_at,
        }
    }
}

/// Another available user inside the caller's radius.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyUser {
    pub id: String,
    pub name: String,
    pub age: i32,
    pub height: Option<String>,
    pub gender: Option<Gender>,
    pub looking_for: Option<LookingFor>,
    pub selfie_url: Option<String>,
    pub distance_meters: i64,
    /// "40m", "1.2km"
    pub distance_label: String,
}

impl NearbyUser {
    pub fn from_user(user: &User, distance_meters: i64) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            age: user.age,
            height: user.height.clone(),
            gender: user.gender,
            looking_for: user.looking_for,
            selfie_url: user.selfie_url.clone(),
            distance_meters,
            distance_label: format_distance(distance_meters),
        }
    }
}

/// Mutual-preference filter for the nearby list. Unset fields match anything.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NearbyFilter {
    pub gender: Option<Gender>,
    pub looking_for: Option<LookingFor>,
}

impl NearbyFilter {
    pub fn for_user(user: &User) -> Self {
        Self {
            gender: user.gender,
            looking_for: user.looking_for,
        }
    }

    pub fn admits(&self, candidate_gender: Option<Gender>, candidate_looking_for: Option<LookingFor>) -> bool {
        let i_want_them = match (self.looking_for, candidate_gender) {
            (Some(pref), Some(gender)) => pref.accepts(gender),
            _ => true,
        };
        let they_want_me = match (candidate_looking_for, self.gender) {
            (Some(pref), Some(gender)) => pref.accepts(gender),
            _ => true,
        };
        i_want_them && they_want_me
    }
}
