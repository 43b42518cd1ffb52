//! Badge/tray indicator seam.
//!
//! The engine computes a `(count, goal_reached, color)` triple after every
//! mutation; whatever renders it (tray icon, extension badge, status bar)
//! lives behind `IndicatorSink`.

use crate::types::{AppStateData, Config, GOAL_REACHED_COLOR};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorUpdate {
    pub count: u32,
    pub goal_reached: bool,
    pub color: String,
}

impl IndicatorUpdate {
    pub fn from_state(state: &AppStateData, config: &Config) -> Self {
        let goal_reached = state.counts.total >= state.daily_goal;
        let color = if goal_reached {
            GOAL_REACHED_COLOR.to_string()
        } else {
            config.primary_color.clone()
        };
        Self {
            count: state.counts.total,
            goal_reached,
            color,
        }
    }
}

pub trait IndicatorSink: Send + Sync {
    fn update(&self, update: IndicatorUpdate);
}

/// Default sink: log-only. Useful headless and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIndicator;

impl IndicatorSink for LogIndicator {
    fn update(&self, update: IndicatorUpdate) {
        log::debug!(
            "Indicator: {} cases, goal {}, color {}",
            update.count,
            if update.goal_reached { "reached" } else { "open" },
            update.color
        );
    }
}
