//! Tuning constants for the relay inference heuristics
//!
//! These values are load-bearing for the inference behavior and its tests;
//! change them here, never inline.

/// Smoothing factor for the per-node SNR/RSSI moving averages. One quarter
/// of each new direct reception flows into the average.
pub const EWMA_ALPHA: f64 = 0.25;

/// Weight of the RSSI distance relative to the SNR distance when scoring
/// relay candidates. RSSI spans a ~10x wider numeric range than SNR.
pub const RSSI_WEIGHT: f64 = 0.1;

/// Candidate staleness penalty: one point per this many seconds since the
/// candidate's stats were last updated.
pub const STALENESS_STEP_SECS: f64 = 600.0;

/// Upper bound on the staleness penalty.
pub const STALENESS_CAP: f64 = 6.0;

/// Score reduction per recorded direct-reception sample.
pub const SAMPLE_BONUS_STEP: f64 = 0.05;

/// Upper bound on the sample-count bonus.
pub const SAMPLE_BONUS_CAP: f64 = 0.5;

/// A best candidate must beat the runner-up by at least this much for the
/// scored pick to be accepted.
pub const AMBIGUITY_MARGIN: f64 = 1.0;

/// Default capacity of the packet dedup set.
pub const DEDUP_CAPACITY: usize = 512;

/// Default grace period after connect during which buffered backlog
/// packets from the device are suppressed.
pub const BACKLOG_GRACE_SECS: i64 = 60;

/// Clock skew allowed between the device clock and this station when
/// judging whether a packet predates the connection.
pub const BACKLOG_SKEW_SECS: i64 = 20;
