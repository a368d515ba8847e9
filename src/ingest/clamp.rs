//! Timestamp clamping for client-declared creation times
//!
//! Clients set `createdAt` themselves, so a record dated in the future would
//! sit at the top of chronological feeds and one dated far in the past could
//! be slipped under recent activity. Indexers clamp before persisting.

use chrono::{DateTime, Duration, Utc};

/// How far into the future a client timestamp may point
pub const MAX_FUTURE_SKEW_SECS: i64 = 5 * 60;

/// How far into the past a client timestamp may point
pub const MAX_PAST_SKEW_SECS: i64 = 60 * 60;

/// Bound a client-declared time to `[now - 1h, now + 5min]`.
///
/// Values beyond the future bound collapse to `now`, values beyond the past
/// bound collapse to `now - 1h`. Both bounds are inclusive of the unclamped
/// branch. Bounds that fall outside the representable range saturate.
pub fn clamp_timestamp(client_time: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let earliest = now
        .checked_sub_signed(Duration::seconds(MAX_PAST_SKEW_SECS))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let latest = now
        .checked_add_signed(Duration::seconds(MAX_FUTURE_SKEW_SECS))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    if client_time > latest {
        now
    } else if client_time < earliest {
        earliest
    } else {
        client_time
    }
}

/// Parse an RFC 3339 `createdAt` and clamp it. Unparseable values become `now`.
pub fn clamp_created_at(raw: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => clamp_timestamp(parsed.with_timezone(&Utc), now),
        Err(_) => now,
    }
}
