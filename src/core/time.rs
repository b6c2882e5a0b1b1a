//! Shared timestamp and identifier helpers.

use chrono::{DateTime, Utc};
use ulid::Ulid;

/// Current wall-clock time in UTC. All persisted timestamps go through here.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// True when `expires_at` is set and lies at or before `at`.
pub fn is_expired(expires_at: Option<&DateTime<Utc>>, at: &DateTime<Utc>) -> bool {
    expires_at.is_some_and(|exp| exp <= at)
}

/// Inclusive `[since, until]` range check; open bounds always match.
pub fn within(
    ts: &DateTime<Utc>,
    since: Option<&DateTime<Utc>>,
    until: Option<&DateTime<Utc>>,
) -> bool {
    since.is_none_or(|s| ts >= s) && until.is_none_or(|u| ts <= u)
}
