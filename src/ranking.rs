//! Ranking reconciliation.
//!
//! The remote ranking is refreshed on a poll interval and can lag behind
//! what the agent just registered, so the local counters are authoritative
//! for the agent's own row: the self entry is replaced (or inserted) with
//! locally derived values before sorting.

use chrono::{DateTime, Duration, Utc};

use crate::backend::RankEntry;

/// An entry is "active" if it scored today or acted within this window.
pub const ACTIVITY_WINDOW_MINUTES: i64 = 60;

/// A merged, display-ready ranking row.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntry {
    pub id: String,
    pub score: u64,
    pub goal: Option<u32>,
    pub last_activity_label: Option<String>,
    pub last_activity_ts: Option<DateTime<Utc>>,
    pub is_self: bool,
    pub active: bool,
}

/// The locally authoritative view of the agent's own row.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub id: String,
    pub total: u32,
    pub daily_goal: u32,
    pub last_activity_ts: Option<DateTime<Utc>>,
}

/// Folds the local self entry into the remote ranking and orders the
/// result: descending by score, ties broken by most recent activity
/// (rows without a timestamp sort last within a tie).
pub fn merge_ranking(
    remote: &[RankEntry],
    local: &LocalEntry,
    now: DateTime<Utc>,
) -> Vec<RankedEntry> {
    let mut merged: Vec<RankedEntry> = remote
        .iter()
        .filter(|entry| entry.id != local.id)
        .map(|entry| RankedEntry {
            id: entry.id.clone(),
            score: entry.score,
            goal: entry.goal,
            last_activity_label: entry.last_activity_label.clone(),
            last_activity_ts: entry.last_activity_ts,
            is_self: false,
            active: false,
        })
        .collect();

    merged.push(RankedEntry {
        id: local.id.clone(),
        score: u64::from(local.total),
        goal: Some(local.daily_goal),
        last_activity_label: None,
        last_activity_ts: local.last_activity_ts,
        is_self: true,
        active: false,
    });

    merged.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(b.last_activity_ts.cmp(&a.last_activity_ts))
    });

    for entry in &mut merged {
        entry.active = is_active(entry.score, entry.last_activity_ts, now);
    }

    merged
}

fn is_active(score: u64, last_activity_ts: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    if score > 0 {
        return true;
    }
    match last_activity_ts {
        Some(ts) => now.signed_duration_since(ts) <= Duration::minutes(ACTIVITY_WINDOW_MINUTES),
        None => false,
    }
}
