//! View-scoped polling.
//!
//! Two loops exist — the team-ranking poll and the leader-dashboard poll —
//! and at most one runs at a time. The active loop is owned as an
//! abortable task handle; switching views aborts the previous handle
//! before starting the next, so orphan timers cannot accumulate. A
//! generation counter guards against the narrow race where a response
//! lands after a switch: stale applications are simply discarded.
//!
//! Network failures are skipped silently; the last-known-good team data
//! stays in state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::BackendClient;
use crate::clock::Clock;
use crate::events::{EngineEvent, EventBus};
use crate::persist::Persister;
use crate::state::StateStore;
use crate::types::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollKind {
    TeamRanking,
    LeaderDashboard,
}

/// Everything a polling task needs, detached from the engine so the task
/// owns no reference cycle.
#[derive(Clone)]
pub struct PollContext {
    pub state: Arc<Mutex<StateStore>>,
    pub backend: Arc<dyn BackendClient>,
    pub clock: Arc<dyn Clock>,
    pub persister: Persister,
    pub events: EventBus,
    pub state_path: std::path::PathBuf,
    pub ranking_interval: Duration,
    pub leader_interval: Duration,
}

struct ActivePoll {
    kind: PollKind,
    handle: tokio::task::JoinHandle<()>,
}

#[derive(Default)]
pub struct ViewPoller {
    active: Mutex<Option<ActivePoll>>,
    generation: Arc<AtomicU64>,
}

impl ViewPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels whatever poll is running and, if `kind` is set, starts the
    /// matching loop. Must be called inside a tokio runtime when starting
    /// a loop.
    pub fn switch(&self, kind: Option<PollKind>, ctx: PollContext) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut guard = self.active.lock();
        if let Some(previous) = guard.take() {
            previous.handle.abort();
            log::debug!("Cancelled {:?} poll", previous.kind);
        }
        if let Some(kind) = kind {
            let gate = self.generation.clone();
            let handle = tokio::spawn(poll_loop(kind, generation, gate, ctx));
            *guard = Some(ActivePoll { kind, handle });
        }
    }

    pub fn stop(&self) {
        let mut guard = self.active.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = guard.take() {
            previous.handle.abort();
        }
    }

    pub fn active_kind(&self) -> Option<PollKind> {
        self.active.lock().as_ref().map(|p| p.kind)
    }
}

async fn poll_loop(kind: PollKind, generation: u64, gate: Arc<AtomicU64>, ctx: PollContext) {
    let interval = match kind {
        PollKind::TeamRanking => ctx.ranking_interval,
        PollKind::LeaderDashboard => ctx.leader_interval,
    };

    loop {
        // The loop dies with the session it was started for.
        let Some((leader_id, expected_role)) = ({
            let guard = ctx.state.lock();
            guard
                .data()
                .user
                .as_ref()
                .map(|u| (u.leader_id.clone(), u.role))
        }) else {
            return;
        };
        let date = ctx.clock.now().date_naive();

        match ctx.backend.fetch_team_data(&leader_id, date).await {
            Ok(team_data) => {
                if gate.load(Ordering::SeqCst) != generation {
                    log::debug!("Discarding stale {:?} poll response", kind);
                    return;
                }
                let snapshot = {
                    let mut guard = ctx.state.lock();
                    // The session may have changed while the fetch was in
                    // flight; a mismatched response is dropped.
                    let still_valid = guard.data().user.as_ref().is_some_and(|u| {
                        u.leader_id == leader_id && u.role == expected_role
                    });
                    if !still_valid {
                        return;
                    }
                    guard.apply_team_snapshot(&team_data);
                    guard.snapshot()
                };
                ctx.persister.queue_json(ctx.state_path.clone(), &snapshot);
                ctx.events.emit(EngineEvent::TeamDataUpdated);
            }
            // Last-known-good data stays on screen; nothing surfaces.
            Err(e) => log::debug!("{:?} poll skipped: {}", kind, e),
        }

        tokio::time::sleep(interval).await;
    }
}

/// Which poll the current session/view combination calls for: agents poll
/// the team ranking from any signed-in view, leaders only while the
/// dashboard is up.
pub fn poll_kind_for(role: Option<Role>, leader_view_active: bool) -> Option<PollKind> {
    match role {
        Some(Role::Agent) => Some(PollKind::TeamRanking),
        Some(Role::Leader) if leader_view_active => Some(PollKind::LeaderDashboard),
        _ => None,
    }
}
