//! Traffic counter aggregation for the self-telemetry beacon
//!
//! Every inbound mesh packet (the station's own traffic excluded by the
//! caller) ticks an "all" counter plus one class counter, bucketed per
//! minute. The windowed sum over the configured width feeds the periodic
//! `T#` data line.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use igate_mesh::CounterClass;

/// Counter values, either for one bucket or summed over a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryCounts {
    /// Every counted packet
    pub all: u64,
    /// Positions forwarded to APRS-IS
    pub aprs_forwarded: u64,
    /// Position reports
    pub position: u64,
    /// Text messages
    pub message: u64,
    /// Routing/admin/telemetry and other control traffic
    pub control: u64,
}

impl TelemetryCounts {
    /// Field values in `T#` data-line order
    pub fn as_fields(&self) -> [u64; 5] {
        [
            self.all,
            self.aprs_forwarded,
            self.position,
            self.message,
            self.control,
        ]
    }
}

/// Per-minute counter buckets with a windowed sum
#[derive(Debug, Default)]
pub struct TelemetryBuckets {
    buckets: BTreeMap<i64, TelemetryCounts>,
}

/// Bucket width in seconds
const BUCKET_SECS: i64 = 60;

fn bucket_start(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(BUCKET_SECS) * BUCKET_SECS
}

impl TelemetryBuckets {
    /// Create an empty set of buckets
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one inbound packet by its traffic class
    pub fn count_packet(&mut self, class: CounterClass, now: DateTime<Utc>) {
        let bucket = self.buckets.entry(bucket_start(now)).or_default();
        bucket.all += 1;
        match class {
            CounterClass::Position => bucket.position += 1,
            CounterClass::Message => bucket.message += 1,
            CounterClass::Control => bucket.control += 1,
        }
    }

    /// Count one position successfully forwarded to APRS-IS
    pub fn count_forwarded(&mut self, now: DateTime<Utc>) {
        self.buckets
            .entry(bucket_start(now))
            .or_default()
            .aprs_forwarded += 1;
    }

    /// Sum every bucket whose start falls inside the trailing window
    pub fn window_sum(&self, now: DateTime<Utc>, window: Duration) -> TelemetryCounts {
        let cutoff = bucket_start(now) - window.num_seconds() + BUCKET_SECS;
        let mut sum = TelemetryCounts::default();
        for (_, counts) in self.buckets.range(cutoff..) {
            sum.all += counts.all;
            sum.aprs_forwarded += counts.aprs_forwarded;
            sum.position += counts.position;
            sum.message += counts.message;
            sum.control += counts.control;
        }
        sum
    }

    /// Drop buckets older than `keep` before `now`
    pub fn prune(&mut self, now: DateTime<Utc>, keep: Duration) {
        let cutoff = bucket_start(now) - keep.num_seconds();
        self.buckets = self.buckets.split_off(&cutoff);
    }

    /// Number of live buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no packets have been counted
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
