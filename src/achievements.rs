//! Achievement catalog and evaluation.
//!
//! A fixed table of 12 milestones across four categories. Evaluation is a
//! pure function of the current counters, the running streak, and the
//! already-unlocked set: it never mutates state, and feeding it unchanged
//! counters twice yields nothing new.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::Counts;

/// Stable identifier for each catalog entry. The string forms double as
/// the persisted representation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AchievementId {
    #[serde(rename = "on_50")]
    On50,
    #[serde(rename = "on_100")]
    On100,
    #[serde(rename = "on_200")]
    On200,
    #[serde(rename = "on_250")]
    On250,
    #[serde(rename = "off_50")]
    Off50,
    #[serde(rename = "off_100")]
    Off100,
    #[serde(rename = "off_200")]
    Off200,
    #[serde(rename = "off_250")]
    Off250,
    #[serde(rename = "level_10")]
    Level10,
    #[serde(rename = "level_25")]
    Level25,
    #[serde(rename = "streak_3")]
    Streak3,
    #[serde(rename = "streak_7")]
    Streak7,
}

impl AchievementId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On50 => "on_50",
            Self::On100 => "on_100",
            Self::On200 => "on_200",
            Self::On250 => "on_250",
            Self::Off50 => "off_50",
            Self::Off100 => "off_100",
            Self::Off200 => "off_200",
            Self::Off250 => "off_250",
            Self::Level10 => "level_10",
            Self::Level25 => "level_25",
            Self::Streak3 => "streak_3",
            Self::Streak7 => "streak_7",
        }
    }
}

impl std::fmt::Display for AchievementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AchievementCategory {
    OnCount,
    OffCount,
    LevelCount,
    Streak,
}

/// One catalog entry. Title and description are display metadata the
/// presentation layer reads as-is.
#[derive(Debug, Clone, Copy)]
pub struct AchievementDef {
    pub id: AchievementId,
    pub category: AchievementCategory,
    pub title: &'static str,
    pub description: &'static str,
    pub target: u32,
    pub legendary: bool,
}

pub const CATALOG: [AchievementDef; 12] = [
    AchievementDef {
        id: AchievementId::On50,
        category: AchievementCategory::OnCount,
        title: "Communicator",
        description: "50 on cases",
        target: 50,
        legendary: false,
    },
    AchievementDef {
        id: AchievementId::On100,
        category: AchievementCategory::OnCount,
        title: "Conversationalist",
        description: "100 on cases",
        target: 100,
        legendary: false,
    },
    AchievementDef {
        id: AchievementId::On200,
        category: AchievementCategory::OnCount,
        title: "On Master",
        description: "200 on cases",
        target: 200,
        legendary: false,
    },
    AchievementDef {
        id: AchievementId::On250,
        category: AchievementCategory::OnCount,
        title: "On Legend",
        description: "250 on cases",
        target: 250,
        legendary: true,
    },
    AchievementDef {
        id: AchievementId::Off50,
        category: AchievementCategory::OffCount,
        title: "Investigator",
        description: "50 off cases",
        target: 50,
        legendary: false,
    },
    AchievementDef {
        id: AchievementId::Off100,
        category: AchievementCategory::OffCount,
        title: "Analyst",
        description: "100 off cases",
        target: 100,
        legendary: false,
    },
    AchievementDef {
        id: AchievementId::Off200,
        category: AchievementCategory::OffCount,
        title: "Detective",
        description: "200 off cases",
        target: 200,
        legendary: false,
    },
    AchievementDef {
        id: AchievementId::Off250,
        category: AchievementCategory::OffCount,
        title: "Off Legend",
        description: "250 off cases",
        target: 250,
        legendary: true,
    },
    AchievementDef {
        id: AchievementId::Level10,
        category: AchievementCategory::LevelCount,
        title: "Climber",
        description: "10 level-up cases",
        target: 10,
        legendary: false,
    },
    AchievementDef {
        id: AchievementId::Level25,
        category: AchievementCategory::LevelCount,
        title: "Specialist",
        description: "25 level-up cases",
        target: 25,
        legendary: false,
    },
    AchievementDef {
        id: AchievementId::Streak3,
        category: AchievementCategory::Streak,
        title: "Consistent",
        description: "3-day streak",
        target: 3,
        legendary: false,
    },
    AchievementDef {
        id: AchievementId::Streak7,
        category: AchievementCategory::Streak,
        title: "Disciplined",
        description: "7-day streak",
        target: 7,
        legendary: false,
    },
];

pub fn definition(id: AchievementId) -> &'static AchievementDef {
    CATALOG
        .iter()
        .find(|def| def.id == id)
        .expect("catalog covers every AchievementId")
}

/// Progress toward a still-locked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementProgress {
    pub current: u32,
    pub target: u32,
    pub percentage: u32,
}

/// Result of one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub newly_unlocked: Vec<AchievementId>,
    pub progress: BTreeMap<AchievementId, AchievementProgress>,
}

/// Evaluates the full catalog against the current counters.
///
/// Entries already in `unlocked` are skipped (unlocking is permanent and
/// never re-reported). Everything else either unlocks now or gets its
/// progress percentage recomputed.
pub fn evaluate(
    counts: &Counts,
    streak_current: u32,
    unlocked: &BTreeSet<AchievementId>,
) -> Evaluation {
    let mut evaluation = Evaluation::default();

    for def in &CATALOG {
        if unlocked.contains(&def.id) {
            continue;
        }

        let current = counter_for(def.category, counts, streak_current);
        if current >= def.target {
            evaluation.newly_unlocked.push(def.id);
        } else {
            let percentage =
                ((f64::from(current) / f64::from(def.target)) * 100.0).round() as u32;
            evaluation.progress.insert(
                def.id,
                AchievementProgress {
                    current,
                    target: def.target,
                    percentage,
                },
            );
        }
    }

    evaluation
}

fn counter_for(category: AchievementCategory, counts: &Counts, streak_current: u32) -> u32 {
    match category {
        AchievementCategory::OnCount => counts.on,
        AchievementCategory::OffCount => counts.off,
        AchievementCategory::LevelCount => counts.level,
        AchievementCategory::Streak => streak_current,
    }
}
