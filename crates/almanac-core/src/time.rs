//! Wall-clock helpers shared by the service and storage layers.

use chrono::{DateTime, SubsecRound, Utc};

/// Current instant truncated to microseconds, the precision PostgreSQL keeps
/// for `timestamptz`. Using it everywhere keeps in-memory and stored
/// timestamps comparable after a round trip.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
