use crate::config::DatabaseEngine;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use std::sync::{Mutex, PoisonError};

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// `<prefix>/<db>-<engine>-<YYYYMMDD-HHMMSS>.sql`, timestamp in UTC.
pub fn object_key(prefix: &str, db_name: &str, engine: DatabaseEngine, at: DateTime<Utc>) -> String {
    format!(
        "{}{}.sql",
        retention_prefix(prefix, db_name, engine),
        at.format(TIMESTAMP_FORMAT)
    )
}

/// Key prefix shared by every dump of one database.
pub fn retention_prefix(prefix: &str, db_name: &str, engine: DatabaseEngine) -> String {
    format!("{}/{}-{}-", prefix, db_name, engine.as_str())
}

/// Hands out second-resolution UTC timestamps that never repeat within the
/// process, so back-to-back runs get distinct keys.
#[derive(Debug, Default)]
pub struct KeyClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl KeyClock {
    pub fn stamp(&self) -> DateTime<Utc> {
        self.stamp_at(Utc::now())
    }

    fn stamp_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let second = TimeDelta::seconds(1);
        let now = now.duration_trunc(second).unwrap_or(now);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let stamp = match *last {
            Some(previous) if now <= previous => previous + second,
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_object_key_format() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            object_key("backup", "testdb", DatabaseEngine::MySQL, at),
            "backup/testdb-mysql-20240102-030405.sql"
        );
        assert_eq!(
            object_key("nightly", "shop", DatabaseEngine::Postgres, at),
            "nightly/shop-postgres-20240102-030405.sql"
        );
    }

    #[test]
    fn test_lexical_order_matches_time_order() {
        let earlier = Utc.with_ymd_and_hms(2024, 9, 30, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap();
        let a = object_key("backup", "db", DatabaseEngine::MySQL, earlier);
        let b = object_key("backup", "db", DatabaseEngine::MySQL, later);
        assert!(a < b);
    }

    #[test]
    fn test_clock_never_repeats_a_second() {
        let clock = KeyClock::default();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap() + TimeDelta::milliseconds(250);

        let first = clock.stamp_at(now);
        let second = clock.stamp_at(now + TimeDelta::milliseconds(100));
        let third = clock.stamp_at(now);

        assert_eq!(first, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        assert_eq!(second, first + TimeDelta::seconds(1));
        assert_eq!(third, first + TimeDelta::seconds(2));

        let much_later = now + TimeDelta::minutes(5);
        assert_eq!(clock.stamp_at(much_later), Utc.with_ymd_and_hms(2024, 1, 2, 3, 9, 5).unwrap());
    }
}
