use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::achievements::{AchievementId, AchievementProgress};
use crate::backend::RankEntry;
use crate::migrate::SCHEMA_VERSION;

/// Engine configuration stored in `~/.casedesk/config.json`.
///
/// Every field has a serde default so a partial (or missing) file loads
/// cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Override for the state directory. Defaults to `~/.casedesk`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Indicator color while the daily goal is still open.
    #[serde(default = "default_primary_color")]
    pub primary_color: String,
    #[serde(default = "default_ranking_poll_ms")]
    pub ranking_poll_ms: u64,
    #[serde(default = "default_leader_poll_ms")]
    pub leader_poll_ms: u64,
    #[serde(default = "default_directory_ttl_hours")]
    pub directory_ttl_hours: u64,
    #[serde(default = "default_daily_goal")]
    pub default_daily_goal: u32,
}

fn default_backend_url() -> String {
    "https://casedesk.example.com/api".to_string()
}

fn default_primary_color() -> String {
    "#1DBA8E".to_string()
}

fn default_ranking_poll_ms() -> u64 {
    5_000
}

fn default_leader_poll_ms() -> u64 {
    10_000
}

fn default_directory_ttl_hours() -> u64 {
    24
}

fn default_daily_goal() -> u32 {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: None,
            backend_url: default_backend_url(),
            primary_color: default_primary_color(),
            ranking_poll_ms: default_ranking_poll_ms(),
            leader_poll_ms: default_leader_poll_ms(),
            directory_ttl_hours: default_directory_ttl_hours(),
            default_daily_goal: default_daily_goal(),
        }
    }
}

/// Indicator color once the daily goal is reached.
pub const GOAL_REACHED_COLOR: &str = "#22c55e";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Agent,
    Leader,
}

/// The authenticated session, as validated against the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    pub role: Role,
    pub id: String,
    pub leader_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseType {
    On,
    Off,
}

impl CaseType {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseType::On => "on",
            CaseType::Off => "off",
        }
    }
}

impl fmt::Display for CaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Daily counters. Invariants maintained by `StateStore`:
/// `total == on + off` and `level <= total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Counts {
    pub on: u32,
    pub off: u32,
    pub level: u32,
    pub total: u32,
}

/// One registered case. Today's `Counts` are exactly the aggregates of
/// these entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub case_type: CaseType,
    pub case_id: String,
    pub timestamp: DateTime<Utc>,
    pub level_up: bool,
}

/// One-shot level-up modifier.
///
/// `Arm`/`Disarm` are the only user-facing transitions; consumption (on
/// register) and the rollover clear are internal to `StateStore`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifierState {
    #[default]
    Inactive,
    Armed,
}

impl ModifierState {
    pub fn is_armed(self) -> bool {
        matches!(self, ModifierState::Armed)
    }

    /// User-facing Arm transition. Returns whether the state changed.
    pub(crate) fn arm(&mut self) -> bool {
        let changed = !self.is_armed();
        *self = ModifierState::Armed;
        changed
    }

    /// User-facing Disarm transition. Returns whether the state changed.
    pub(crate) fn disarm(&mut self) -> bool {
        let changed = self.is_armed();
        *self = ModifierState::Inactive;
        changed
    }

    /// ConsumeOnRegister: read-then-reset as part of a single registration.
    pub(crate) fn consume(&mut self) -> bool {
        let was_armed = self.is_armed();
        *self = ModifierState::Inactive;
        was_armed
    }

    /// ClearOnRollover: the modifier never survives a day boundary.
    pub(crate) fn clear_on_rollover(&mut self) {
        *self = ModifierState::Inactive;
    }
}

/// Consecutive-days-goal-met tracking. Invariant: `best >= current`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Streaks {
    pub current: u32,
    pub best: u32,
    pub last_goal_met_date: Option<NaiveDate>,
}

/// Unlock state for the achievement catalog.
///
/// `unlocked` is append-only. `newly_unlocked` is an acknowledgement
/// queue: it is only cleared by an explicit `acknowledge_achievements`,
/// never by further evaluations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AchievementLog {
    pub unlocked: BTreeSet<AchievementId>,
    pub progress: BTreeMap<AchievementId, AchievementProgress>,
    pub newly_unlocked: Vec<AchievementId>,
}

/// A case as it appears in the rolling current-hour window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyCase {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub case_type: CaseType,
    pub level_up: bool,
}

/// Current-hour activity plus the team KPIs folded in from polling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HourlyMetrics {
    /// Hour of day (0-23, UTC) the `current_hour_cases` window covers.
    pub current_hour: u32,
    pub current_hour_cases: Vec<HourlyCase>,
    pub team_total_today: u64,
    pub my_participation_percent: u32,
}

impl HourlyMetrics {
    pub fn reset(hour: u32) -> Self {
        Self {
            current_hour: hour,
            ..Self::default()
        }
    }
}

/// The single persistent state root. Owned exclusively by `StateStore`;
/// mutated only through its operations.
///
/// Every field carries a serde default so snapshots written by older
/// versions merge forward cleanly (missing keys defaulted, unknown keys
/// ignored). Structural renames are handled by the migration chain before
/// deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppStateData {
    pub schema_version: u32,
    pub user: Option<UserSession>,
    /// Civil date (UTC) the daily counters apply to.
    pub today_key: NaiveDate,
    pub counts: Counts,
    pub history: Vec<HistoryEntry>,
    pub daily_goal: u32,
    pub modifier: ModifierState,
    /// Whether today's goal-met celebration has already fired.
    pub goal_celebrated: bool,
    pub last_case_id: Option<String>,
    pub streaks: Streaks,
    pub achievements: AchievementLog,
    /// Per-weekday totals (Monday-first), refreshed from remote KPIs.
    pub weekly_data: [u64; 7],
    pub hourly_metrics: HourlyMetrics,
    /// Last remote ranking snapshot, raw (self entry not yet merged).
    pub remote_ranking: Option<Vec<RankEntry>>,
}

impl Default for AppStateData {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            user: None,
            // Epoch date: any real load rolls this over to today.
            today_key: NaiveDate::default(),
            counts: Counts::default(),
            history: Vec::new(),
            daily_goal: default_daily_goal(),
            modifier: ModifierState::default(),
            goal_celebrated: false,
            last_case_id: None,
            streaks: Streaks::default(),
            achievements: AchievementLog::default(),
            weekly_data: [0; 7],
            hourly_metrics: HourlyMetrics::default(),
            remote_ranking: None,
        }
    }
}

/// One directory record: who an identifier reports to, and their name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryRecord {
    pub leader_id: String,
    pub name: String,
}

/// Persisted directory cache. Lifetime independent of `AppStateData`,
/// stored alongside it under its own key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DirectoryCacheData {
    pub fetched_at: DateTime<Utc>,
    pub entries: std::collections::HashMap<String, DirectoryRecord>,
}

impl Default for DirectoryCacheData {
    fn default() -> Self {
        Self {
            // Epoch: a never-filled cache is maximally stale.
            fetched_at: DateTime::<Utc>::UNIX_EPOCH,
            entries: std::collections::HashMap::new(),
        }
    }
}
