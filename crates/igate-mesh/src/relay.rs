//! Relay identity inference
//!
//! The mesh protocol's relay and next-hop fields usually carry only the low
//! byte of a 32-bit node number. This module resolves those tail bytes back
//! to full node numbers using historical link statistics: every node we have
//! ever received *directly* gets an exponentially weighted moving average of
//! its SNR/RSSI, and ambiguous tails are scored against those averages.
//!
//! Guessed relays never feed back into the statistics table; only confirmed
//! direct receptions do. The inference is diagnostic — a wrong guess mislabels
//! a log line, a corrupted statistics table would mislabel everything after
//! it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::registry::{NodeId, NodeRegistry};
use crate::tunables::{
    AMBIGUITY_MARGIN, EWMA_ALPHA, RSSI_WEIGHT, SAMPLE_BONUS_CAP, SAMPLE_BONUS_STEP,
    STALENESS_CAP, STALENESS_STEP_SECS,
};

/// Link quality statistics for one directly received node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkStat {
    /// EWMA of SNR, dB
    pub snr: f64,
    /// EWMA of RSSI, dBm
    pub rssi: f64,
    /// Number of direct receptions folded in
    pub samples: u32,
    /// When the stats were last updated
    pub updated_at: DateTime<Utc>,
}

/// Per-node link statistics table, persisted across restarts
#[derive(Debug, Default)]
pub struct RelayLinkStats {
    stats: HashMap<NodeId, LinkStat>,
}

impl RelayLinkStats {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries
    pub fn from_entries(entries: Vec<(NodeId, LinkStat)>) -> Self {
        Self {
            stats: entries.into_iter().collect(),
        }
    }

    /// Fold one confirmed direct reception into a node's averages.
    ///
    /// Callers must only invoke this for packets classified as directly
    /// received; see [`is_direct_reception`].
    pub fn observe_direct(
        &mut self,
        node: NodeId,
        snr: Option<f32>,
        rssi: Option<i32>,
        now: DateTime<Utc>,
    ) {
        let (Some(snr), Some(rssi)) = (snr, rssi) else {
            return;
        };
        let snr = snr as f64;
        let rssi = rssi as f64;

        match self.stats.get_mut(&node) {
            Some(stat) => {
                stat.snr = EWMA_ALPHA * snr + (1.0 - EWMA_ALPHA) * stat.snr;
                stat.rssi = EWMA_ALPHA * rssi + (1.0 - EWMA_ALPHA) * stat.rssi;
                stat.samples = stat.samples.saturating_add(1);
                stat.updated_at = now;
            }
            None => {
                self.stats.insert(
                    node,
                    LinkStat {
                        snr,
                        rssi,
                        samples: 1,
                        updated_at: now,
                    },
                );
            }
        }
    }

    /// Look up a node's stats
    pub fn get(&self, node: NodeId) -> Option<&LinkStat> {
        self.stats.get(&node)
    }

    /// Node numbers whose low byte matches `tail`
    pub fn ids_with_low_byte(&self, tail: u8) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .stats
            .keys()
            .copied()
            .filter(|id| id.low_byte() == tail)
            .collect();
        ids.sort();
        ids
    }

    /// All entries, for persistence
    pub fn entries(&self) -> Vec<(NodeId, LinkStat)> {
        let mut entries: Vec<(NodeId, LinkStat)> =
            self.stats.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    /// Number of tracked nodes
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

/// Outcome of resolving a relay or next-hop field
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRelay {
    /// Resolved node number; a bare tail byte when forced
    pub id: NodeId,
    /// True when the identity was inferred rather than reported verbatim
    pub guessed: bool,
    /// Human-readable inference note for guessed results
    pub reason: Option<String>,
}

/// Resolve a relay field value to a full node number.
///
/// Resolution order:
/// (a) values wider than one byte are already full ids — accepted verbatim;
/// (b) a unique low-byte match among known nodes is accepted, guessed only
///     if that node has no identity record;
/// (c) multiple matches are scored against their link statistics and the
///     best is taken when it clearly beats the runner-up;
/// (d) otherwise the bare tail byte is reported as a forced, guessed label.
pub fn resolve_relay(
    raw: u32,
    snr: Option<f32>,
    rssi: Option<i32>,
    stats: &RelayLinkStats,
    registry: &NodeRegistry,
    now: DateTime<Utc>,
) -> Option<ResolvedRelay> {
    if raw == 0 {
        return None;
    }

    // (a) full id reported verbatim
    if raw > 0xFF {
        return Some(ResolvedRelay {
            id: NodeId(raw),
            guessed: false,
            reason: None,
        });
    }

    let tail = raw as u8;
    let mut candidates = stats.ids_with_low_byte(tail);
    for id in registry.ids_with_low_byte(tail) {
        if !candidates.contains(&id) {
            candidates.push(id);
        }
    }
    candidates.sort();

    match candidates.len() {
        0 => Some(forced_tail(tail, "no node matches tail")),
        // (b) unique match
        1 => {
            let id = candidates[0];
            Some(ResolvedRelay {
                id,
                guessed: !registry.has_identity(id),
                reason: if registry.has_identity(id) {
                    None
                } else {
                    Some(format!("sole tail match 0x{:02x}, unnamed node", tail))
                },
            })
        }
        // (c) score the field
        _ => match score_candidates(&candidates, snr, rssi, stats, now) {
            Some(best) => Some(ResolvedRelay {
                id: best,
                guessed: true,
                reason: Some(format!(
                    "scored best of {} tail matches for 0x{:02x}",
                    candidates.len(),
                    tail
                )),
            }),
            None => Some(forced_tail(
                tail,
                &format!("{} ambiguous tail matches", candidates.len()),
            )),
        },
    }
}

fn forced_tail(tail: u8, why: &str) -> ResolvedRelay {
    ResolvedRelay {
        id: NodeId(tail as u32),
        guessed: true,
        reason: Some(format!("{}; showing tail 0x{:02x}", why, tail)),
    }
}

/// Score candidates by signal distance; returns the winner only when it
/// beats the runner-up by [`AMBIGUITY_MARGIN`].
fn score_candidates(
    candidates: &[NodeId],
    snr: Option<f32>,
    rssi: Option<i32>,
    stats: &RelayLinkStats,
    now: DateTime<Utc>,
) -> Option<NodeId> {
    let (Some(snr), Some(rssi)) = (snr, rssi) else {
        return None;
    };
    let snr = snr as f64;
    let rssi = rssi as f64;

    let mut scored: Vec<(f64, NodeId)> = candidates
        .iter()
        .filter_map(|&id| {
            let stat = stats.get(id)?;
            let signal = (snr - stat.snr).abs() + RSSI_WEIGHT * (rssi - stat.rssi).abs();
            let staleness = ((now - stat.updated_at).num_seconds().max(0) as f64
                / STALENESS_STEP_SECS)
                .min(STALENESS_CAP);
            let bonus = (stat.samples as f64 * SAMPLE_BONUS_STEP).min(SAMPLE_BONUS_CAP);
            Some((signal + staleness - bonus, id))
        })
        .collect();

    if scored.is_empty() {
        return None;
    }
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));

    match scored.len() {
        1 => Some(scored[0].1),
        _ if scored[1].0 - scored[0].0 >= AMBIGUITY_MARGIN => Some(scored[0].1),
        _ => None,
    }
}

/// Classify whether a packet was received directly, with no relay in
/// between.
///
/// Direct reception is what qualifies a packet to update the sender's link
/// statistics: zero hops used, or no relay/next-hop evidence at all, or the
/// resolved relay being this station or the sender itself.
pub fn is_direct_reception(
    used_hops: Option<u32>,
    relay_raw: u32,
    next_hop_raw: u32,
    resolved_relay: Option<&ResolvedRelay>,
    self_node: Option<NodeId>,
    sender: NodeId,
) -> bool {
    if used_hops == Some(0) {
        return true;
    }
    if relay_raw == 0 && next_hop_raw == 0 && used_hops.is_none() {
        return true;
    }
    if let Some(resolved) = resolved_relay {
        if resolved.id == sender {
            return true;
        }
        if self_node.is_some_and(|me| resolved.id == me) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn stats_with(entries: &[(u32, f64, f64, u32)], now: DateTime<Utc>) -> RelayLinkStats {
        RelayLinkStats::from_entries(
            entries
                .iter()
                .map(|&(id, snr, rssi, samples)| {
                    (
                        NodeId(id),
                        LinkStat {
                            snr,
                            rssi,
                            samples,
                            updated_at: now,
                        },
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn full_id_accepted_verbatim() {
        let now = Utc::now();
        let stats = RelayLinkStats::new();
        let registry = NodeRegistry::new();

        let resolved =
            resolve_relay(0x1234_5678, Some(5.0), Some(-90), &stats, &registry, now).unwrap();
        assert_eq!(resolved.id, NodeId(0x1234_5678));
        assert!(!resolved.guessed);
    }

    #[test]
    fn zero_relay_resolves_to_none() {
        let now = Utc::now();
        assert!(resolve_relay(
            0,
            Some(5.0),
            Some(-90),
            &RelayLinkStats::new(),
            &NodeRegistry::new(),
            now
        )
        .is_none());
    }

    #[test]
    fn unique_candidate_accepted() {
        let now = Utc::now();
        let stats = stats_with(&[(0xAABB_CC42, 5.0, -80.0, 3)], now);
        let registry = NodeRegistry::new();

        let resolved = resolve_relay(0x42, Some(5.0), Some(-80), &stats, &registry, now).unwrap();
        assert_eq!(resolved.id, NodeId(0xAABB_CC42));
        // No identity record for the node, so the pick is still a guess.
        assert!(resolved.guessed);
    }

    #[test]
    fn unique_candidate_with_identity_is_not_guessed() {
        let now = Utc::now();
        let stats = stats_with(&[(0xAABB_CC42, 5.0, -80.0, 3)], now);
        let mut registry = NodeRegistry::new();
        registry.apply_user(
            NodeId(0xAABB_CC42),
            &igate_proto::proto::User {
                long_name: "Ridge repeater".into(),
                short_name: "RDG".into(),
                ..Default::default()
            },
            now,
        );

        let resolved = resolve_relay(0x42, Some(5.0), Some(-80), &stats, &registry, now).unwrap();
        assert_eq!(resolved.id, NodeId(0xAABB_CC42));
        assert!(!resolved.guessed);
    }

    #[test]
    fn scoring_picks_signal_match() {
        // Two candidates share the tail byte; the packet's signal matches
        // the first candidate's averages far better.
        let now = Utc::now();
        let stats = stats_with(
            &[(0x1111_1142, 5.0, -80.0, 5), (0x2222_2242, -2.0, -110.0, 5)],
            now,
        );
        let registry = NodeRegistry::new();

        let resolved = resolve_relay(0x42, Some(4.8), Some(-82), &stats, &registry, now).unwrap();
        assert_eq!(resolved.id, NodeId(0x1111_1142));
        assert!(resolved.guessed);
    }

    #[test]
    fn close_scores_force_tail() {
        // Both candidates fit the packet equally well; no confident pick.
        let now = Utc::now();
        let stats = stats_with(
            &[(0x1111_1142, 5.0, -80.0, 5), (0x2222_2242, 5.1, -80.5, 5)],
            now,
        );
        let registry = NodeRegistry::new();

        let resolved = resolve_relay(0x42, Some(5.0), Some(-80), &stats, &registry, now).unwrap();
        assert_eq!(resolved.id, NodeId(0x42));
        assert!(resolved.guessed);
        assert!(resolved.reason.as_deref().unwrap().contains("0x42"));
    }

    #[test]
    fn staleness_penalizes_old_candidates() {
        let now = Utc::now();
        let mut stats = stats_with(&[(0x1111_1142, 5.0, -80.0, 5)], now);
        // Second candidate matches slightly better but is hours stale.
        stats.stats.insert(
            NodeId(0x2222_2242),
            LinkStat {
                snr: 4.8,
                rssi: -82.0,
                samples: 5,
                updated_at: now - Duration::hours(4),
            },
        );
        let registry = NodeRegistry::new();

        let resolved = resolve_relay(0x42, Some(4.8), Some(-82), &stats, &registry, now).unwrap();
        assert_eq!(resolved.id, NodeId(0x1111_1142));
    }

    #[test]
    fn missing_signal_data_forces_tail_on_ambiguity() {
        let now = Utc::now();
        let stats = stats_with(
            &[(0x1111_1142, 5.0, -80.0, 5), (0x2222_2242, -2.0, -110.0, 5)],
            now,
        );
        let registry = NodeRegistry::new();

        let resolved = resolve_relay(0x42, None, None, &stats, &registry, now).unwrap();
        assert_eq!(resolved.id, NodeId(0x42));
        assert!(resolved.guessed);
    }

    #[test]
    fn ewma_smoothing() {
        let now = Utc::now();
        let mut stats = RelayLinkStats::new();
        stats.observe_direct(NodeId(7), Some(4.0), Some(-80), now);
        stats.observe_direct(NodeId(7), Some(8.0), Some(-100), now);

        let stat = stats.get(NodeId(7)).unwrap();
        assert!((stat.snr - 5.0).abs() < 1e-9); // 0.25*8 + 0.75*4
        assert!((stat.rssi - (-85.0)).abs() < 1e-9);
        assert_eq!(stat.samples, 2);
    }

    #[test]
    fn observe_without_signal_is_ignored() {
        let now = Utc::now();
        let mut stats = RelayLinkStats::new();
        stats.observe_direct(NodeId(7), None, Some(-80), now);
        assert!(stats.is_empty());
    }

    #[test]
    fn direct_classification() {
        let sender = NodeId(0x1234_5678);
        let me = NodeId(0xAAAA_AAAA);

        // Zero hops used
        assert!(is_direct_reception(Some(0), 0x42, 0, None, Some(me), sender));

        // No relay evidence at all
        assert!(is_direct_reception(None, 0, 0, None, Some(me), sender));

        // Resolved relay is the sender itself
        let resolved = ResolvedRelay {
            id: sender,
            guessed: false,
            reason: None,
        };
        assert!(is_direct_reception(
            Some(1),
            sender.0,
            0,
            Some(&resolved),
            Some(me),
            sender
        ));

        // Relayed by a third node: not direct
        let resolved = ResolvedRelay {
            id: NodeId(0x9999_9999),
            guessed: false,
            reason: None,
        };
        assert!(!is_direct_reception(
            Some(1),
            0x9999_9999,
            0,
            Some(&resolved),
            Some(me),
            sender
        ));
    }

    #[test]
    fn entries_roundtrip() {
        let now = Utc::now();
        let mut stats = RelayLinkStats::new();
        stats.observe_direct(NodeId(1), Some(3.0), Some(-70), now);
        stats.observe_direct(NodeId(2), Some(-1.0), Some(-105), now);

        let rebuilt = RelayLinkStats::from_entries(stats.entries());
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(rebuilt.get(NodeId(1)).unwrap().samples, 1);
    }
}
