//! Canonical streak-continuation rule.
//!
//! Both call sites — day rollover and goal-met handling — go through
//! `reconcile`, so there is exactly one definition of "does the running
//! streak survive to today". The rule: the streak stands iff the goal was
//! last met yesterday (or already today); otherwise the running count
//! resets to zero. `best` is never reduced.

use chrono::NaiveDate;

use crate::types::Streaks;

/// Returns the streak state valid as of `today`, before any goal is met
/// today.
pub fn reconcile(streaks: &Streaks, today: NaiveDate) -> Streaks {
    let carried = match streaks.last_goal_met_date {
        Some(met) if met == today || Some(met) == today.pred_opt() => streaks.current,
        _ => 0,
    };
    Streaks {
        current: carried,
        best: streaks.best,
        last_goal_met_date: streaks.last_goal_met_date,
    }
}

/// Records that today's goal was met: reconcile, then extend the streak.
/// A broken streak restarts at 1.
pub fn record_goal_met(streaks: &Streaks, today: NaiveDate) -> Streaks {
    let mut next = reconcile(streaks, today);
    next.current += 1;
    next.best = next.best.max(next.current);
    next.last_goal_met_date = Some(today);
    next
}
