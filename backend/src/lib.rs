pub mod constants;
pub mod db;
pub mod error;
pub mod events;
pub mod geo;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

pub use db::connection::get_db_pool;
pub use error::{CoreError, StoreError};
pub use events::{BroadcastBus, Event, EventBus, Topic};
pub use services::{Core, CoreSettings};
pub use utils::config::Config;

// Re-export common types
pub use chrono::{DateTime, Utc};
pub use sqlx::PgPool;
pub use uuid::Uuid;
