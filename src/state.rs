//! State store — sole owner and mutator of `AppStateData`.
//!
//! Every public operation preserves the counter invariants
//! (`total == on + off`, `level <= total`, history aggregates match the
//! counters) and reports an outcome the engine uses to persist, notify
//! subscribers, and update the indicator. Operations take `now` explicitly
//! so day, hour, and streak logic is deterministic under test.

use chrono::{DateTime, Timelike, Utc};

use crate::achievements::{self, AchievementId};
use crate::backend::TeamData;
use crate::error::ValidationError;
use crate::ranking::LocalEntry;
use crate::streak;
use crate::types::{
    AppStateData, CaseType, HistoryEntry, HourlyCase, HourlyMetrics, Role, UserSession,
};

/// What a successful registration produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterOutcome {
    pub agent: UserSession,
    pub entry: HistoryEntry,
    /// Whether the one-shot modifier was consumed by this registration.
    pub level_up: bool,
    pub newly_unlocked: Vec<AchievementId>,
}

/// Undo is a no-op signal when there is nothing to undo, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoOutcome {
    Undone(HistoryEntry),
    NothingToUndo,
}

#[derive(Debug)]
pub struct StateStore {
    data: AppStateData,
}

impl StateStore {
    pub fn new(data: AppStateData) -> Self {
        Self { data }
    }

    /// Fresh state for a first run: today's key, configured default goal.
    pub fn fresh(now: DateTime<Utc>, daily_goal: u32) -> Self {
        let mut data = AppStateData {
            daily_goal: daily_goal.max(1),
            today_key: now.date_naive(),
            ..Default::default()
        };
        data.hourly_metrics = HourlyMetrics::reset(now.hour());
        Self { data }
    }

    pub fn data(&self) -> &AppStateData {
        &self.data
    }

    pub fn snapshot(&self) -> AppStateData {
        self.data.clone()
    }

    // -----------------------------------------------------------------
    // Load-time normalization
    // -----------------------------------------------------------------

    /// Day rollover. Runs once per load when the persisted `today_key` is
    /// stale; a multi-day gap still collapses into this single reset.
    /// Returns whether anything changed.
    pub fn rollover_if_stale(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if self.data.today_key == today {
            return false;
        }

        // Streak continuation is judged before the day's data is cleared.
        if self.data.user.is_some() {
            self.data.streaks = streak::reconcile(&self.data.streaks, today);
        }

        log::info!(
            "Day rollover: {} -> {} (streak now {})",
            self.data.today_key,
            today,
            self.data.streaks.current
        );

        self.data.today_key = today;
        self.data.counts = Default::default();
        self.data.history.clear();
        self.data.goal_celebrated = false;
        self.data.last_case_id = None;
        self.data.modifier.clear_on_rollover();
        self.data.hourly_metrics = HourlyMetrics::reset(now.hour());
        true
    }

    /// Re-anchors the hourly window to the current wall-clock hour,
    /// pruning entries that fell out of it.
    pub fn normalize_hourly(&mut self, now: DateTime<Utc>) {
        let hour = now.hour();
        let today = now.date_naive();
        self.data
            .hourly_metrics
            .current_hour_cases
            .retain(|case| {
                case.timestamp.date_naive() == today && case.timestamp.hour() == hour
            });
        self.data.hourly_metrics.current_hour = hour;
    }

    // -----------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------

    pub fn register_case(
        &mut self,
        now: DateTime<Utc>,
        case_type: CaseType,
        case_id: &str,
    ) -> Result<RegisterOutcome, ValidationError> {
        let case_id = case_id.trim();
        if case_id.is_empty() {
            return Err(ValidationError::EmptyCaseId);
        }
        let agent = match &self.data.user {
            Some(user) if user.role == Role::Agent => user.clone(),
            _ => return Err(ValidationError::NoAgentSession),
        };

        match case_type {
            CaseType::On => self.data.counts.on += 1,
            CaseType::Off => self.data.counts.off += 1,
        }
        // One-shot consumption: read and reset within this operation.
        let level_up = self.data.modifier.consume();
        if level_up {
            self.data.counts.level += 1;
        }
        self.data.counts.total += 1;

        let entry = HistoryEntry {
            case_type,
            case_id: case_id.to_string(),
            timestamp: now,
            level_up,
        };
        self.data.history.push(entry.clone());
        self.data.last_case_id = Some(case_id.to_string());

        self.normalize_hourly(now);
        self.data.hourly_metrics.current_hour_cases.push(HourlyCase {
            timestamp: now,
            case_type,
            level_up,
        });

        let newly_unlocked = self.evaluate_achievements();
        self.assert_invariants();

        Ok(RegisterOutcome {
            agent,
            entry,
            level_up,
            newly_unlocked,
        })
    }

    /// Pops the most recent case and reverses its counter effects,
    /// floored at zero. Deliberately does NOT re-arm the one-shot
    /// modifier: undo is not a full inverse of register.
    pub fn undo(&mut self, now: DateTime<Utc>) -> UndoOutcome {
        let Some(entry) = self.data.history.pop() else {
            return UndoOutcome::NothingToUndo;
        };

        match entry.case_type {
            CaseType::On => self.data.counts.on = self.data.counts.on.saturating_sub(1),
            CaseType::Off => self.data.counts.off = self.data.counts.off.saturating_sub(1),
        }
        if entry.level_up {
            self.data.counts.level = self.data.counts.level.saturating_sub(1);
        }
        self.data.counts.total = self.data.counts.total.saturating_sub(1);

        self.data.last_case_id = self.data.history.last().map(|e| e.case_id.clone());

        if let Some(pos) = self
            .data
            .hourly_metrics
            .current_hour_cases
            .iter()
            .rposition(|case| case.timestamp == entry.timestamp)
        {
            self.data.hourly_metrics.current_hour_cases.remove(pos);
        }
        self.normalize_hourly(now);
        self.assert_invariants();

        UndoOutcome::Undone(entry)
    }

    /// Clamps to `max(1, floor(n))` and recomputes the celebration
    /// eligibility flag without firing a goal-met event. Returns the
    /// effective goal.
    pub fn set_daily_goal(&mut self, goal: i64) -> u32 {
        self.data.daily_goal = goal.max(1).min(i64::from(u32::MAX)) as u32;
        self.data.goal_celebrated = self.data.counts.total >= self.data.daily_goal;
        self.data.daily_goal
    }

    /// Idempotent goal check: returns true and advances the streak exactly
    /// once per day, the first time the total reaches the goal.
    pub fn check_goal_met(&mut self, now: DateTime<Utc>) -> bool {
        if self.data.goal_celebrated || self.data.counts.total < self.data.daily_goal {
            return false;
        }
        let today = now.date_naive();
        self.data.goal_celebrated = true;
        self.data.streaks = streak::record_goal_met(&self.data.streaks, today);
        log::info!(
            "Daily goal met: {} cases, streak {}",
            self.data.counts.total,
            self.data.streaks.current
        );
        true
    }

    /// User-facing Arm transition. Returns whether the state changed.
    pub fn arm_modifier(&mut self) -> bool {
        self.data.modifier.arm()
    }

    /// User-facing Disarm transition. Returns whether the state changed.
    pub fn disarm_modifier(&mut self) -> bool {
        self.data.modifier.disarm()
    }

    /// Clears the achievement acknowledgement queue (e.g. when the
    /// achievements view is opened). Returns whether anything was queued.
    pub fn acknowledge_achievements(&mut self) -> bool {
        let had_new = !self.data.achievements.newly_unlocked.is_empty();
        self.data.achievements.newly_unlocked.clear();
        had_new
    }

    pub fn set_user(&mut self, user: Option<UserSession>) {
        self.data.user = user;
    }

    /// Folds a polled team snapshot into state: weekly totals, team
    /// total, own participation percentage, and the raw remote ranking.
    pub fn apply_team_snapshot(&mut self, data: &TeamData) {
        self.data.weekly_data = data.kpis.weekly_data;
        self.data.hourly_metrics.team_total_today = data.kpis.team_total;
        self.data.hourly_metrics.my_participation_percent = if data.kpis.team_total > 0 {
            ((f64::from(self.data.counts.total) * 100.0) / data.kpis.team_total as f64).round()
                as u32
        } else {
            0
        };
        self.data.remote_ranking = Some(data.ranking.clone());
    }

    /// The locally authoritative self entry for ranking merges. `None`
    /// without a session.
    pub fn local_rank_entry(&self) -> Option<LocalEntry> {
        let user = self.data.user.as_ref()?;
        Some(LocalEntry {
            id: user.id.clone(),
            total: self.data.counts.total,
            daily_goal: self.data.daily_goal,
            last_activity_ts: self.data.history.last().map(|e| e.timestamp),
        })
    }

    // -----------------------------------------------------------------

    fn evaluate_achievements(&mut self) -> Vec<AchievementId> {
        let evaluation = achievements::evaluate(
            &self.data.counts,
            self.data.streaks.current,
            &self.data.achievements.unlocked,
        );

        let mut newly = Vec::new();
        for id in evaluation.newly_unlocked {
            if self.data.achievements.unlocked.insert(id) {
                newly.push(id);
                if !self.data.achievements.newly_unlocked.contains(&id) {
                    self.data.achievements.newly_unlocked.push(id);
                }
            }
        }
        self.data.achievements.progress = evaluation.progress;
        newly
    }

    fn assert_invariants(&self) {
        debug_assert_eq!(
            self.data.counts.total,
            self.data.counts.on + self.data.counts.off,
            "total must equal on + off"
        );
        debug_assert!(
            self.data.counts.level <= self.data.counts.total,
            "level cannot exceed total"
        );
        debug_assert!(
            self.data.streaks.best >= self.data.streaks.current,
            "best streak cannot trail the current one"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModifierState, Streaks};
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap()
    }

    fn agent_session() -> UserSession {
        UserSession {
            role: Role::Agent,
            id: "jdoe".into(),
            leader_id: "mgr".into(),
            name: Some("J. Doe".into()),
        }
    }

    fn store_with_agent() -> StateStore {
        let mut store = StateStore::fresh(at(9, 0), 50);
        store.set_user(Some(agent_session()));
        store
    }

    #[test]
    fn test_register_updates_counts_and_history() {
        let mut store = store_with_agent();
        store.register_case(at(9, 5), CaseType::On, "C-1").unwrap();
        store.register_case(at(9, 6), CaseType::Off, "C-2").unwrap();

        let data = store.data();
        assert_eq!(data.counts.on, 1);
        assert_eq!(data.counts.off, 1);
        assert_eq!(data.counts.total, 2);
        assert_eq!(data.history.len(), 2);
        assert_eq!(data.last_case_id.as_deref(), Some("C-2"));
        assert_eq!(data.hourly_metrics.current_hour_cases.len(), 2);
    }

    #[test]
    fn test_register_rejects_blank_case_id() {
        let mut store = store_with_agent();
        let before = store.snapshot();
        assert_eq!(
            store.register_case(at(9, 5), CaseType::On, "   "),
            Err(ValidationError::EmptyCaseId)
        );
        assert_eq!(store.snapshot(), before, "rejected input must not mutate");
    }

    #[test]
    fn test_register_requires_an_agent_session() {
        let mut store = StateStore::fresh(at(9, 0), 50);
        assert_eq!(
            store.register_case(at(9, 5), CaseType::On, "C-1"),
            Err(ValidationError::NoAgentSession)
        );

        store.set_user(Some(UserSession {
            role: Role::Leader,
            id: "mgr".into(),
            leader_id: "mgr".into(),
            name: None,
        }));
        assert_eq!(
            store.register_case(at(9, 5), CaseType::On, "C-1"),
            Err(ValidationError::NoAgentSession)
        );
    }

    #[test]
    fn test_modifier_is_consumed_by_registration() {
        // Scenario B: armed modifier marks the case and clears itself.
        let mut store = store_with_agent();
        store.arm_modifier();
        let outcome = store.register_case(at(9, 5), CaseType::On, "C1").unwrap();

        assert!(outcome.level_up);
        let data = store.data();
        assert_eq!(data.counts.on, 1);
        assert_eq!(data.counts.level, 1);
        assert_eq!(data.modifier, ModifierState::Inactive);
        assert!(data.history[0].level_up);
    }

    #[test]
    fn test_undo_reverses_a_level_up_case_but_does_not_rearm() {
        // Scenario C: undo after Scenario B.
        let mut store = store_with_agent();
        store.arm_modifier();
        store.register_case(at(9, 5), CaseType::On, "C1").unwrap();

        let outcome = store.undo(at(9, 6));
        assert!(matches!(outcome, UndoOutcome::Undone(ref e) if e.case_id == "C1"));

        let data = store.data();
        assert_eq!(data.counts.on, 0);
        assert_eq!(data.counts.level, 0);
        assert_eq!(data.counts.total, 0);
        assert_eq!(data.modifier, ModifierState::Inactive);
        assert!(data.hourly_metrics.current_hour_cases.is_empty());
    }

    #[test]
    fn test_undo_on_empty_history_is_a_signal_not_an_error() {
        let mut store = store_with_agent();
        assert_eq!(store.undo(at(9, 0)), UndoOutcome::NothingToUndo);
    }

    #[test]
    fn test_counts_invariant_holds_across_mixed_sequences() {
        let mut store = store_with_agent();
        let ops: [(u8, CaseType); 12] = [
            (0, CaseType::On),
            (0, CaseType::Off),
            (1, CaseType::On),
            (0, CaseType::On),
            (1, CaseType::Off),
            (1, CaseType::On),
            (0, CaseType::Off),
            (1, CaseType::Off),
            (0, CaseType::On),
            (1, CaseType::On),
            (0, CaseType::Off),
            (1, CaseType::Off),
        ];
        for (i, (undo, case_type)) in ops.iter().enumerate() {
            let now = at(9, i as u32 + 1);
            if *undo == 1 {
                store.undo(now);
            } else {
                store
                    .register_case(now, *case_type, &format!("C-{i}"))
                    .unwrap();
            }
            let c = store.data().counts;
            assert_eq!(c.total, c.on + c.off);
            assert!(c.level <= c.total);
        }
    }

    #[test]
    fn test_goal_met_fires_exactly_once_per_day() {
        // Scenario A: goal of five, five on cases.
        let mut store = store_with_agent();
        store.set_daily_goal(5);
        for i in 0..5 {
            store
                .register_case(at(9, i + 1), CaseType::On, &format!("C-{i}"))
                .unwrap();
        }
        assert!(store.check_goal_met(at(9, 10)));
        assert!(!store.check_goal_met(at(9, 11)));
        assert_eq!(store.data().streaks.current, 1);
        assert_eq!(
            store.data().streaks.last_goal_met_date,
            Some(at(9, 0).date_naive())
        );
    }

    #[test]
    fn test_set_daily_goal_clamps_and_recomputes_celebration() {
        let mut store = store_with_agent();
        assert_eq!(store.set_daily_goal(0), 1);
        assert_eq!(store.set_daily_goal(-3), 1);
        assert_eq!(store.set_daily_goal(7), 7);

        store.register_case(at(9, 1), CaseType::On, "C-1").unwrap();
        // Lowering the goal below the total marks it celebrated without
        // firing the event path.
        store.set_daily_goal(1);
        assert!(store.data().goal_celebrated);
        assert!(!store.check_goal_met(at(9, 2)));
        assert_eq!(store.data().streaks.current, 0);
    }

    #[test]
    fn test_rollover_resets_the_day_and_breaks_stale_streaks() {
        // Scenario D: today_key = yesterday, last goal met two days ago.
        let mut store = store_with_agent();
        store.register_case(at(9, 1), CaseType::On, "C-1").unwrap();
        store.arm_modifier();
        store.data.streaks = Streaks {
            current: 3,
            best: 4,
            last_goal_met_date: Some(at(0, 0).date_naive() - chrono::Days::new(2)),
        };
        store.data.today_key = at(0, 0).date_naive() - chrono::Days::new(1);

        let next_day = Utc.with_ymd_and_hms(2025, 6, 3, 8, 0, 0).unwrap();
        assert!(store.rollover_if_stale(next_day));

        let data = store.data();
        assert_eq!(data.counts, Default::default());
        assert!(data.history.is_empty());
        assert_eq!(data.streaks.current, 0);
        assert_eq!(data.streaks.best, 4);
        assert_eq!(data.modifier, ModifierState::Inactive);
        assert!(!data.goal_celebrated);
        assert_eq!(data.today_key, next_day.date_naive());
    }

    #[test]
    fn test_rollover_preserves_a_streak_met_yesterday() {
        let mut store = store_with_agent();
        store.data.today_key = at(0, 0).date_naive();
        store.data.streaks = Streaks {
            current: 2,
            best: 2,
            last_goal_met_date: Some(at(0, 0).date_naive()),
        };

        let next_day = Utc.with_ymd_and_hms(2025, 6, 3, 8, 0, 0).unwrap();
        store.rollover_if_stale(next_day);
        assert_eq!(store.data().streaks.current, 2);
    }

    #[test]
    fn test_multi_day_gap_collapses_into_one_rollover() {
        let mut store = store_with_agent();
        store.register_case(at(9, 1), CaseType::On, "C-1").unwrap();

        let much_later = Utc.with_ymd_and_hms(2025, 6, 20, 8, 0, 0).unwrap();
        assert!(store.rollover_if_stale(much_later));
        assert!(!store.rollover_if_stale(much_later));
        assert_eq!(store.data().today_key, much_later.date_naive());
    }

    #[test]
    fn test_hourly_window_prunes_previous_hours() {
        let mut store = store_with_agent();
        store.register_case(at(9, 50), CaseType::On, "C-1").unwrap();
        store.register_case(at(10, 5), CaseType::On, "C-2").unwrap();

        let hourly = &store.data().hourly_metrics;
        assert_eq!(hourly.current_hour, 10);
        assert_eq!(hourly.current_hour_cases.len(), 1);
        assert_eq!(hourly.current_hour_cases[0].timestamp, at(10, 5));
    }

    #[test]
    fn test_achievement_unlocks_surface_once_and_queue_until_acknowledged() {
        let mut store = store_with_agent();
        store.data.counts = crate::types::Counts {
            on: 49,
            off: 0,
            level: 0,
            total: 49,
        };
        let outcome = store.register_case(at(9, 1), CaseType::On, "C-50").unwrap();
        assert_eq!(outcome.newly_unlocked, vec![AchievementId::On50]);

        // Further registrations do not re-report it.
        let outcome = store.register_case(at(9, 2), CaseType::On, "C-51").unwrap();
        assert!(outcome.newly_unlocked.is_empty());
        assert_eq!(
            store.data().achievements.newly_unlocked,
            vec![AchievementId::On50]
        );

        assert!(store.acknowledge_achievements());
        assert!(store.data().achievements.newly_unlocked.is_empty());
        assert!(store
            .data()
            .achievements
            .unlocked
            .contains(&AchievementId::On50));
    }

    #[test]
    fn test_team_snapshot_updates_participation() {
        let mut store = store_with_agent();
        for i in 0..5 {
            store
                .register_case(at(9, i + 1), CaseType::On, &format!("C-{i}"))
                .unwrap();
        }
        let mut data = TeamData::default();
        data.kpis.team_total = 40;
        data.kpis.weekly_data = [1, 2, 3, 4, 5, 0, 0];
        store.apply_team_snapshot(&data);

        let hourly = &store.data().hourly_metrics;
        assert_eq!(hourly.team_total_today, 40);
        // 5 of 40 = 12.5 -> 13
        assert_eq!(hourly.my_participation_percent, 13);
        assert_eq!(store.data().weekly_data, [1, 2, 3, 4, 5, 0, 0]);
    }

    #[test]
    fn test_team_total_zero_means_zero_participation() {
        let mut store = store_with_agent();
        store.register_case(at(9, 1), CaseType::On, "C-1").unwrap();
        store.apply_team_snapshot(&TeamData::default());
        assert_eq!(store.data().hourly_metrics.my_participation_percent, 0);
    }
}
