pub mod challenge;
pub mod health;
pub mod liveness;
pub mod verdict;

use chrono::{SecondsFormat, Utc};

/// ISO-8601 timestamp with a trailing Z, as the wire contract requires.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
