//! Duplicate-position suppression
//!
//! Mesh nodes rebroadcast their position far more often than APRS-IS wants
//! to see it. Each forwarded position is fingerprinted into a canonical
//! digest string; an identical digest for the same mesh id inside the
//! suppression window is dropped before it reaches the uplink queue. The
//! cache is a bounded LRU so a large mesh cannot grow it without limit.

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;

use igate_aprs::Symbol;

/// Feet per meter, matching the codec's altitude conversion
const FEET_PER_METER: f64 = 3.28084;

/// Canonical fingerprint of an outbound position report.
///
/// Rounds coordinates to 5 decimals and course/speed to whole numbers so
/// GPS jitter below APRS resolution does not defeat the suppression.
#[allow(clippy::too_many_arguments)]
pub fn position_digest(
    callsign: &str,
    symbol: Symbol,
    latitude: f64,
    longitude: f64,
    course_deg: Option<f64>,
    speed_knots: Option<f64>,
    altitude_m: Option<f64>,
    comment: &str,
) -> String {
    let course = course_deg
        .filter(|c| c.is_finite())
        .map(|c| format!("{}", c.round() as i64))
        .unwrap_or_else(|| "-".to_string());
    let speed = speed_knots
        .filter(|s| s.is_finite())
        .map(|s| format!("{}", s.round() as i64))
        .unwrap_or_else(|| "-".to_string());
    let alt_ft = altitude_m
        .filter(|a| a.is_finite())
        .map(|a| format!("{}", (a * FEET_PER_METER).round() as i64))
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{}|{}{}|{:.5}|{:.5}|{}|{}|{}|{}",
        callsign,
        symbol.table,
        symbol.code,
        latitude,
        longitude,
        course,
        speed,
        alt_ft,
        sanitize_comment(comment)
    )
}

/// Strip control characters and surrounding whitespace from a comment
pub fn sanitize_comment(comment: &str) -> String {
    comment
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

#[derive(Debug, Clone)]
struct DigestEntry {
    digest: String,
    sent_at: DateTime<Utc>,
}

/// Bounded per-mesh-id cache of the last transmitted position digest
#[derive(Debug)]
pub struct PositionDigestCache {
    entries: LruCache<String, DigestEntry>,
    window: Duration,
}

impl PositionDigestCache {
    /// Create a cache holding at most `capacity` mesh ids with the given
    /// suppression window
    pub fn new(capacity: usize, window: std::time::Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(30)),
        }
    }

    /// Whether an identical digest was already sent for this mesh id inside
    /// the suppression window
    pub fn is_duplicate(&mut self, mesh_id: &str, digest: &str, now: DateTime<Utc>) -> bool {
        match self.entries.get(mesh_id) {
            Some(entry) => entry.digest == digest && now - entry.sent_at < self.window,
            None => false,
        }
    }

    /// Remember a successfully transmitted digest
    pub fn record(&mut self, mesh_id: &str, digest: String, now: DateTime<Utc>) {
        self.entries.put(
            mesh_id.to_string(),
            DigestEntry {
                digest,
                sent_at: now,
            },
        );
    }

    /// Number of cached mesh ids
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn digest() -> String {
        position_digest(
            "KD8ABC-7",
            Symbol { table: '/', code: '>' },
            25.03312,
            121.56549,
            Some(90.0),
            Some(12.0),
            Some(100.0),
            "on trail",
        )
    }

    #[test]
    fn digest_is_canonical() {
        assert_eq!(
            digest(),
            "KD8ABC-7|/>|25.03312|121.56549|90|12|328|on trail"
        );
    }

    #[test]
    fn digest_marks_missing_fields() {
        let d = position_digest(
            "KD8ABC",
            Symbol::default(),
            25.0,
            121.0,
            None,
            None,
            None,
            "",
        );
        assert_eq!(d, "KD8ABC|/>|25.00000|121.00000|-|-|-|");
    }

    #[test]
    fn comment_sanitization() {
        assert_eq!(sanitize_comment("  hi\tthere\r\n "), "hithere");
    }

    #[test]
    fn identical_digest_inside_window_is_duplicate() {
        let mut cache = PositionDigestCache::new(8, std::time::Duration::from_secs(30));
        cache.record("!0a1b2c3d", digest(), at(0));

        assert!(cache.is_duplicate("!0a1b2c3d", &digest(), at(5)));
        assert!(!cache.is_duplicate("!0a1b2c3d", &digest(), at(40)));
    }

    #[test]
    fn changed_digest_is_not_duplicate() {
        let mut cache = PositionDigestCache::new(8, std::time::Duration::from_secs(30));
        cache.record("!0a1b2c3d", digest(), at(0));

        let moved = position_digest(
            "KD8ABC-7",
            Symbol { table: '/', code: '>' },
            25.034,
            121.566,
            Some(90.0),
            Some(12.0),
            Some(100.0),
            "on trail",
        );
        assert!(!cache.is_duplicate("!0a1b2c3d", &moved, at(5)));
    }

    #[test]
    fn lru_evicts_oldest_mesh_id() {
        let mut cache = PositionDigestCache::new(2, std::time::Duration::from_secs(30));
        cache.record("!00000001", "a".to_string(), at(0));
        cache.record("!00000002", "b".to_string(), at(1));
        cache.record("!00000003", "c".to_string(), at(2));

        assert_eq!(cache.len(), 2);
        assert!(!cache.is_duplicate("!00000001", "a", at(3)));
        assert!(cache.is_duplicate("!00000003", "c", at(3)));
    }
}
