//! UUID helpers.
//!
//! Documents, jobs and test cases use UUIDv7 so ids sort by creation time.
//! Chunk ids are content-derived instead (see [`crate::models::chunk_id`]).

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Generate a new time-ordered UUIDv7.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Check if a UUID is version 7.
#[inline]
pub fn is_v7(uuid: &Uuid) -> bool {
    uuid.get_version_num() == 7
}

/// Creation time embedded in a UUIDv7, `None` for other versions.
pub fn extract_timestamp(uuid: &Uuid) -> Option<DateTime<Utc>> {
    if !is_v7(uuid) {
        return None;
    }
    let millis = uuid.as_bytes()[..6]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | *b as u64);
    Utc.timestamp_millis_opt(millis as i64).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_v7_is_v7() {
        assert!(is_v7(&new_v7()));
        assert!(!is_v7(&Uuid::new_v4()));
    }

    #[test]
    fn test_v7_ids_sort_by_creation() {
        let a = new_v7();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_v7();
        assert!(a < b);
    }

    #[test]
    fn test_extract_timestamp_close_to_now() {
        let before = Utc::now().timestamp_millis();
        let ts = extract_timestamp(&new_v7()).unwrap().timestamp_millis();
        let after = Utc::now().timestamp_millis();
        assert!(ts >= before && ts <= after);
    }

    #[test]
    fn test_extract_timestamp_rejects_v4() {
        assert!(extract_timestamp(&Uuid::new_v4()).is_none());
    }
}
