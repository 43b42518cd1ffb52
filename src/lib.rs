//! Casedesk — client-side state engine for per-agent case tracking.
//!
//! Owns the persistent daily state (counts, history, goal, streaks,
//! achievements, one-shot level-up modifier), reconciles local counts
//! against the remotely maintained team ranking, and resolves logins
//! through a TTL'd user directory cache. Rendering, theming, and the
//! concrete transport live outside this crate, behind the
//! `BackendClient` / `IndicatorSink` seams and the typed event stream.

pub mod achievements;
pub mod backend;
pub mod clock;
pub mod directory;
pub mod engine;
pub mod error;
pub mod events;
pub mod indicator;
pub mod migrate;
pub mod persist;
pub mod poll;
pub mod ranking;
pub mod state;
pub mod streak;
pub mod types;

pub use backend::{BackendClient, HttpBackend};
pub use engine::{Engine, View};
pub use error::{
    EngineError, LookupError, NetworkError, PersistenceError, ValidationError,
};
pub use events::EngineEvent;
pub use indicator::{IndicatorSink, IndicatorUpdate, LogIndicator};
pub use types::{AppStateData, CaseType, Config, Counts, ModifierState, Role, UserSession};
