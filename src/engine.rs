//! Engine — the explicit context object.
//!
//! One `Engine` owns the state store, directory cache, persistence queue,
//! event bus, indicator, and polling for a session. Everything is injected
//! at construction (backend, indicator, clock), so tests build an isolated
//! engine against fakes; there are no module-level singletons.
//!
//! Concurrency model: mutations are short synchronous critical sections on
//! the state mutex; network awaits never hold it. A mutation's persistence
//! is queued (serialized writes) before the engine returns to the caller.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{BackendClient, CaseSubmission};
use crate::clock::Clock;
use crate::directory::{DirectoryCache, LeaderLogin};
use crate::error::{EngineError, LookupError};
use crate::events::{EngineEvent, EventBus};
use crate::indicator::{IndicatorSink, IndicatorUpdate};
use crate::migrate;
use crate::persist::{self, Persister, DIRECTORY_CACHE_FILE, STATE_FILE};
use crate::poll::{poll_kind_for, PollContext, ViewPoller};
use crate::ranking::{self, RankedEntry};
use crate::state::{RegisterOutcome, StateStore, UndoOutcome};
use crate::types::{
    AppStateData, CaseType, Config, DirectoryCacheData, ModifierState, UserSession,
};

/// The views the presentation layer can activate. Only polling cares:
/// agents poll from any signed-in view, leaders only from the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Login,
    Main,
    Focus,
    Ranking,
    Achievements,
    History,
    Settings,
    Leader,
}

pub struct Engine {
    config: Config,
    state_dir: PathBuf,
    state: Arc<Mutex<StateStore>>,
    directory: DirectoryCache,
    backend: Arc<dyn BackendClient>,
    indicator: Arc<dyn IndicatorSink>,
    clock: Arc<dyn Clock>,
    persister: Persister,
    events: EventBus,
    poller: ViewPoller,
    view: Mutex<View>,
}

impl Engine {
    /// Builds an engine with injected collaborators. Must be called
    /// inside a tokio runtime (the persistence writer is spawned here).
    /// Call `load` before use.
    pub fn new(
        config: Config,
        backend: Arc<dyn BackendClient>,
        indicator: Arc<dyn IndicatorSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state_dir = config
            .state_dir
            .clone()
            .unwrap_or_else(persist::default_state_dir);
        let ttl = chrono::Duration::hours(config.directory_ttl_hours as i64);
        let store = StateStore::fresh(clock.now(), config.default_daily_goal);

        Self {
            state_dir,
            directory: DirectoryCache::new(DirectoryCacheData::default(), ttl),
            state: Arc::new(Mutex::new(store)),
            backend,
            indicator,
            clock,
            persister: Persister::spawn(),
            events: EventBus::new(),
            poller: ViewPoller::new(),
            view: Mutex::new(View::Login),
            config,
        }
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    /// Loads persisted snapshots, migrates them, rolls the day over if the
    /// persisted date is stale, and re-anchors the hourly window.
    pub fn load(&self) -> Result<(), EngineError> {
        let now = self.clock.now();

        let state_data = match persist::load_json(&self.state_path())? {
            Some(raw) => {
                let migrated = migrate::migrate_state(raw);
                serde_json::from_value::<AppStateData>(migrated).unwrap_or_else(|e| {
                    log::warn!("Discarding unreadable state snapshot: {}", e);
                    AppStateData::default()
                })
            }
            None => AppStateData {
                daily_goal: self.config.default_daily_goal.max(1),
                ..Default::default()
            },
        };

        let cache_data = match persist::load_json(&self.directory_cache_path())? {
            Some(raw) => {
                let migrated = migrate::migrate_directory_cache(raw);
                serde_json::from_value::<DirectoryCacheData>(migrated).unwrap_or_else(|e| {
                    log::warn!("Discarding unreadable directory cache: {}", e);
                    DirectoryCacheData::default()
                })
            }
            None => DirectoryCacheData::default(),
        };
        self.directory.replace(cache_data);

        let rolled = {
            let mut guard = self.state.lock();
            *guard = StateStore::new(state_data);
            let rolled = guard.rollover_if_stale(now);
            guard.normalize_hourly(now);
            rolled
        };
        if rolled {
            self.persist_state();
        }
        self.push_indicator();
        self.events.emit(EngineEvent::StateLoaded);
        self.refresh_polling();
        Ok(())
    }

    /// Waits until every queued snapshot write has been attempted.
    pub async fn flush(&self) {
        self.persister.flush().await;
    }

    pub fn shutdown(&self) {
        self.poller.stop();
    }

    // -----------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------

    pub async fn login_agent(
        &self,
        agent_id: &str,
        leader_id: &str,
    ) -> Result<UserSession, LookupError> {
        let now = self.clock.now();
        let session = self
            .directory
            .validate_agent(self.backend.as_ref(), now, agent_id, leader_id)
            .await?;
        self.install_session(session.clone());
        Ok(session)
    }

    pub async fn login_leader(&self, leader_id: &str) -> LeaderLogin {
        let now = self.clock.now();
        let login = self
            .directory
            .validate_leader(self.backend.as_ref(), now, leader_id)
            .await;
        self.install_session(login.session.clone());
        login
    }

    pub fn logout(&self) {
        self.poller.stop();
        self.state.lock().set_user(None);
        *self.view.lock() = View::Login;
        self.after_mutation();
        self.events.emit(EngineEvent::UserChanged(None));
    }

    fn install_session(&self, session: UserSession) {
        self.state.lock().set_user(Some(session.clone()));
        self.after_mutation();
        self.persist_directory_cache();
        self.events
            .emit(EngineEvent::UserChanged(Some(session)));
        self.refresh_polling();
    }

    // -----------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------

    /// Registers a case locally and submits it to the backend
    /// fire-and-forget (the adapter retries; a final failure is logged,
    /// local state stays authoritative).
    pub fn register_case(
        &self,
        case_type: CaseType,
        case_id: &str,
    ) -> Result<RegisterOutcome, EngineError> {
        let now = self.clock.now();
        let outcome = self.state.lock().register_case(now, case_type, case_id)?;
        self.after_mutation();

        self.events
            .emit(EngineEvent::CountsUpdated(self.snapshot().counts));
        self.events.emit(EngineEvent::HistoryUpdated);
        if outcome.level_up {
            self.events
                .emit(EngineEvent::ModifierChanged(ModifierState::Inactive));
        }
        if !outcome.newly_unlocked.is_empty() {
            self.events.emit(EngineEvent::AchievementsUnlocked(
                outcome.newly_unlocked.clone(),
            ));
        }

        let submission = CaseSubmission {
            agent_id: outcome.agent.id.clone(),
            leader_id: outcome.agent.leader_id.clone(),
            case_type,
            case_id: outcome.entry.case_id.clone(),
            level_up: outcome.level_up,
        };
        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.register_case(&submission).await {
                log::warn!("Case submission for {} failed: {}", submission.case_id, e);
            }
        });

        Ok(outcome)
    }

    pub fn undo(&self) -> UndoOutcome {
        let now = self.clock.now();
        let outcome = self.state.lock().undo(now);
        if let UndoOutcome::Undone(entry) = &outcome {
            self.after_mutation();
            self.events
                .emit(EngineEvent::CountsUpdated(self.snapshot().counts));
            self.events.emit(EngineEvent::CaseUndone(entry.clone()));
        }
        outcome
    }

    pub fn set_daily_goal(&self, goal: i64) -> u32 {
        let effective = self.state.lock().set_daily_goal(goal);
        self.after_mutation();
        self.events.emit(EngineEvent::GoalUpdated(effective));
        effective
    }

    /// Idempotent: true (and a `GoalMet` event) exactly once per day.
    pub fn check_goal_met(&self) -> bool {
        let now = self.clock.now();
        let met = self.state.lock().check_goal_met(now);
        if met {
            self.after_mutation();
            self.events.emit(EngineEvent::GoalMet);
        }
        met
    }

    pub fn arm_modifier(&self) {
        if self.state.lock().arm_modifier() {
            self.after_mutation();
            self.events
                .emit(EngineEvent::ModifierChanged(ModifierState::Armed));
        }
    }

    pub fn disarm_modifier(&self) {
        if self.state.lock().disarm_modifier() {
            self.after_mutation();
            self.events
                .emit(EngineEvent::ModifierChanged(ModifierState::Inactive));
        }
    }

    /// Clears the achievements acknowledgement queue (call when the
    /// achievements view opens).
    pub fn acknowledge_achievements(&self) {
        if self.state.lock().acknowledge_achievements() {
            self.after_mutation();
        }
    }

    // -----------------------------------------------------------------
    // Views & reads
    // -----------------------------------------------------------------

    /// Activates a view, retargeting the (single) polling loop.
    pub fn set_active_view(&self, view: View) {
        *self.view.lock() = view;
        self.refresh_polling();
    }

    pub fn active_view(&self) -> View {
        *self.view.lock()
    }

    pub fn snapshot(&self) -> AppStateData {
        self.state.lock().snapshot()
    }

    pub fn directory_snapshot(&self) -> DirectoryCacheData {
        self.directory.snapshot()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// The display ranking: remote entries with the locally authoritative
    /// self entry folded in.
    pub fn merged_ranking(&self) -> Vec<RankedEntry> {
        let now = self.clock.now();
        let guard = self.state.lock();
        let Some(local) = guard.local_rank_entry() else {
            return Vec::new();
        };
        let remote = guard.data().remote_ranking.clone().unwrap_or_default();
        drop(guard);
        ranking::merge_ranking(&remote, &local, now)
    }

    // -----------------------------------------------------------------

    fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    fn directory_cache_path(&self) -> PathBuf {
        self.state_dir.join(DIRECTORY_CACHE_FILE)
    }

    /// Queue a snapshot write and refresh the indicator. Runs after every
    /// successful mutation, before control returns to the caller.
    fn after_mutation(&self) {
        self.persist_state();
        self.push_indicator();
    }

    fn persist_state(&self) {
        let snapshot = self.state.lock().snapshot();
        self.persister.queue_json(self.state_path(), &snapshot);
    }

    fn persist_directory_cache(&self) {
        let snapshot = self.directory.snapshot();
        self.persister
            .queue_json(self.directory_cache_path(), &snapshot);
    }

    fn push_indicator(&self) {
        let update = {
            let guard = self.state.lock();
            IndicatorUpdate::from_state(guard.data(), &self.config)
        };
        self.indicator.update(update);
    }

    fn refresh_polling(&self) {
        let role = self.state.lock().data().user.as_ref().map(|u| u.role);
        let leader_view = *self.view.lock() == View::Leader;
        let kind = poll_kind_for(role, leader_view);
        self.poller.switch(kind, self.poll_context());
    }

    fn poll_context(&self) -> PollContext {
        PollContext {
            state: self.state.clone(),
            backend: self.backend.clone(),
            clock: self.clock.clone(),
            persister: self.persister.clone(),
            events: self.events.clone(),
            state_path: self.state_path(),
            ranking_interval: std::time::Duration::from_millis(self.config.ranking_poll_ms),
            leader_interval: std::time::Duration::from_millis(self.config.leader_poll_ms),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.poller.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::indicator::LogIndicator;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct NullBackend;

    #[async_trait]
    impl BackendClient for NullBackend {
        async fn register_case(
            &self,
            _: &CaseSubmission,
        ) -> Result<(), crate::error::NetworkError> {
            Ok(())
        }

        async fn fetch_team_data(
            &self,
            _: &str,
            _: chrono::NaiveDate,
        ) -> Result<crate::backend::TeamData, crate::error::NetworkError> {
            Ok(Default::default())
        }

        async fn fetch_users(
            &self,
        ) -> Result<Vec<crate::backend::RemoteUser>, crate::error::NetworkError> {
            Ok(vec![crate::backend::RemoteUser {
                id: "jdoe".into(),
                leader_id: "mgr".into(),
                name: "J. Doe".into(),
            }])
        }

        async fn lookup_user(
            &self,
            _: &str,
        ) -> Result<Option<crate::backend::RemoteUser>, crate::error::NetworkError> {
            Ok(None)
        }
    }

    fn test_engine(dir: &std::path::Path) -> Engine {
        let config = Config {
            state_dir: Some(dir.to_path_buf()),
            ..Default::default()
        };
        let clock = ManualClock::new(chrono::Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap());
        Engine::new(
            config,
            Arc::new(NullBackend),
            Arc::new(LogIndicator),
            Arc::new(clock),
        )
    }

    #[tokio::test]
    async fn test_login_validates_against_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.load().unwrap();

        let session = engine.login_agent("JDoe", "MGR").await.unwrap();
        assert_eq!(session.id, "jdoe");
        assert_eq!(engine.snapshot().user.unwrap().leader_id, "mgr");

        let err = engine.login_agent("jdoe", "other").await.unwrap_err();
        assert!(matches!(err, LookupError::LeaderMismatch { .. }));
    }

    #[tokio::test]
    async fn test_ranking_is_empty_without_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.load().unwrap();
        assert!(engine.merged_ranking().is_empty());
    }

    #[tokio::test]
    async fn test_logout_clears_session_and_polling() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.load().unwrap();
        engine.login_agent("jdoe", "mgr").await.unwrap();
        assert!(engine.poller.active_kind().is_some());

        engine.logout();
        assert!(engine.snapshot().user.is_none());
        assert!(engine.poller.active_kind().is_none());
        assert_eq!(engine.active_view(), View::Login);
    }
}
