// =============================================================================
// Flick Backend Constants
// =============================================================================
// This file contains all constants used throughout the backend to enable
// easy tuning and configuration from a single location.

// =============================================================================
// PROXIMITY
// =============================================================================

/// Radius (meters) used for the nearby list, the vault proximity check and
/// geofenced matches
pub const PROXIMITY_RADIUS_METERS: f64 = 100.0;

/// Mean Earth radius in meters (Haversine)
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

// =============================================================================
// PRESENCE
// =============================================================================

/// How often an available user sends a heartbeat
pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// Upper bound for acquiring a device location before a heartbeat goes out without one
pub const LOCATION_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// EXCHANGE VAULT
// =============================================================================

/// Lifetime of a number exchange, counted from its creation
pub const EXCHANGE_TTL_SECS: i64 = 15 * 60;

/// How often an open vault re-checks the distance between its participants
pub const PROXIMITY_CHECK_INTERVAL_SECS: u64 = 30;

/// How often the server's reaper sweeps exchanges past their TTL
pub const REAPER_INTERVAL_SECS: u64 = 5;

// =============================================================================
// STORE ACCESS
// =============================================================================

/// Bound on a single store round trip issued from a timer
pub const STORE_TIMEOUT_SECS: u64 = 5;

/// Attempts before a transient store failure is surfaced
pub const STORE_MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff between retries
pub const RETRY_BASE_DELAY_MS: u64 = 200;

/// Capacity of each per-topic event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// SERVER CONFIGURATION
// =============================================================================

/// Default server port if not specified in environment
pub const DEFAULT_SERVER_PORT: u16 = 3000;

// =============================================================================
// INPUT VALIDATION
// =============================================================================

/// Longest accepted user identifier
pub const MAX_USER_ID_LENGTH: usize = 128;

/// Shortest accepted phone number (digits only)
pub const MIN_PHONE_DIGITS: usize = 7;

/// Longest accepted phone number (digits only)
pub const MAX_PHONE_DIGITS: usize = 15;

/// Longest accepted festival room code (the payload of a venue QR code)
pub const MAX_FESTIVAL_CODE_LENGTH: usize = 64;

// =============================================================================
// HELPER FUNCTIONS FOR VALIDATION
// =============================================================================

/// Validates a client generated user identifier
pub fn is_valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LENGTH
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validates a festival room code, e.g. `coachella2024` or `test-festival`
pub fn is_valid_festival_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_FESTIVAL_CODE_LENGTH
        && code
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Validates a phone number: digits with optional `+`, spaces, dashes and parentheses
pub fn is_valid_phone_number(phone: &str) -> bool {
    let allowed = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'));
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    allowed && (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits)
}
