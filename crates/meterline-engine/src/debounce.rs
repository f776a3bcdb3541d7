//! Severity debouncing between the classifier and the report.
//!
//! The classifier is stateless, so an entity hovering near a threshold
//! flips between levels on every run. A debouncer remembers what was last
//! reported per (analysis, entity) and only moves the reported severity
//! after the new level has been observed enough times in a row.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, info};

use meterline_core::config::DebounceConfig;
use meterline_core::{EntityKey, Severity};

use crate::analysis::AnalysisKind;
use crate::classify::Finding;

/// Decides the reported severity of a finding.
///
/// Only the severity may change. Flags and reasons always describe the
/// raw classification.
pub trait SeverityDebouncer: Send + Sync {
    fn observe(&self, analysis: AnalysisKind, finding: Finding) -> Finding;
}

/// Reports the classified severity unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDebounce;

impl SeverityDebouncer for NoDebounce {
    fn observe(&self, _analysis: AnalysisKind, finding: Finding) -> Finding {
        finding
    }
}

/// Per-entity tracking state.
#[derive(Debug, Clone, Copy)]
struct Track {
    reported: Severity,
    candidate: Severity,
    streak: u32,
}

impl Track {
    /// Same future behavior as a fresh track.
    fn is_settled(&self) -> bool {
        self.reported == Severity::Ok && self.streak == 0
    }
}

impl Default for Track {
    fn default() -> Self {
        Self {
            reported: Severity::Ok,
            candidate: Severity::Ok,
            streak: 0,
        }
    }
}

/// Moves the reported severity only after `escalate_after` (worse) or
/// `recover_after` (better) consecutive observations of the same new
/// level. An entity never seen before starts at `ok`.
///
/// Only entities that are reported above `ok` or have a pending streak
/// are kept; a settled `ok` entity is indistinguishable from an unseen one
/// and is dropped.
#[derive(Debug)]
pub struct ConsecutiveDebounce {
    escalate_after: u32,
    recover_after: u32,
    tracks: Mutex<HashMap<(AnalysisKind, EntityKey), Track>>,
}

impl ConsecutiveDebounce {
    pub fn new(escalate_after: u32, recover_after: u32) -> Self {
        Self {
            escalate_after: escalate_after.max(1),
            recover_after: recover_after.max(1),
            tracks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &DebounceConfig) -> Self {
        Self::new(config.escalate_after, config.recover_after)
    }

    /// Number of entities with tracking state.
    pub fn tracked(&self) -> usize {
        self.tracks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn step(&self, track: &mut Track, raw: Severity) -> Severity {
        if raw == track.reported {
            track.candidate = raw;
            track.streak = 0;
            return track.reported;
        }

        if raw == track.candidate {
            track.streak += 1;
        } else {
            track.candidate = raw;
            track.streak = 1;
        }

        let needed = if raw > track.reported {
            self.escalate_after
        } else {
            self.recover_after
        };
        if track.streak >= needed {
            track.reported = raw;
            track.streak = 0;
        }
        track.reported
    }
}

impl SeverityDebouncer for ConsecutiveDebounce {
    fn observe(&self, analysis: AnalysisKind, finding: Finding) -> Finding {
        let raw = finding.classified_severity();
        let reported = {
            // A panic elsewhere cannot leave a track half-updated, so a
            // poisoned lock is still usable.
            let mut tracks = self.tracks.lock().unwrap_or_else(|e| e.into_inner());
            let slot = (analysis, finding.key.clone());
            let track = tracks.entry(slot.clone()).or_default();
            let before = track.reported;
            let reported = self.step(track, raw);
            if reported != before {
                info!(%analysis, entity = %finding.key, from = %before, to = %reported, "reported severity changed");
            } else if reported != raw {
                debug!(%analysis, entity = %finding.key, %raw, %reported, streak = track.streak, "holding severity");
            }
            if track.is_settled() {
                tracks.remove(&slot);
            }
            reported
        };
        finding.with_reported_severity(reported)
    }
}
