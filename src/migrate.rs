//! Versioned migrations for persisted snapshots.
//!
//! Snapshots are migrated as raw JSON before deserialization, so every
//! schema change is a named, independently testable step instead of an
//! implicit merge at load time. Version 1 is the legacy extension layout
//! (`levelUpMode`, `streaks.lastMetDate`, epoch-millisecond timestamps,
//! `byUser` directory map); version 2 is the current model.

use chrono::DateTime;
use serde_json::{json, Map, Value};

pub const SCHEMA_VERSION: u32 = 2;

/// Brings a raw state blob up to `SCHEMA_VERSION`. Blobs without a
/// `schemaVersion` marker are treated as version 1.
pub fn migrate_state(mut value: Value) -> Value {
    let version = value
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .unwrap_or(1) as u32;

    if version < 2 {
        state_v1_to_v2(&mut value);
    }

    if let Some(obj) = value.as_object_mut() {
        obj.insert("schemaVersion".into(), json!(SCHEMA_VERSION));
    }
    value
}

/// Brings a raw directory-cache blob up to the current layout.
pub fn migrate_directory_cache(mut value: Value) -> Value {
    let Some(obj) = value.as_object_mut() else {
        return value;
    };

    // v1: fetchedAt as epoch milliseconds.
    if let Some(ms) = obj.get("fetchedAt").and_then(Value::as_i64) {
        obj.insert("fetchedAt".into(), json!(millis_to_rfc3339(ms)));
    }

    // v1: entries keyed under `byUser` with a `leader` field.
    if let Some(Value::Object(by_user)) = obj.remove("byUser") {
        let mut entries = Map::new();
        for (id, record) in by_user {
            let Value::Object(mut record) = record else {
                continue;
            };
            if let Some(leader) = record.remove("leader") {
                record.insert("leaderId".into(), leader);
            }
            entries.insert(id, Value::Object(record));
        }
        obj.entry("entries").or_insert(Value::Object(entries));
    }

    value
}

fn state_v1_to_v2(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };

    // One-shot modifier: raw bool -> explicit state machine.
    if let Some(mode) = obj.remove("levelUpMode") {
        let armed = mode.as_bool().unwrap_or(false);
        obj.entry("modifier")
            .or_insert(json!(if armed { "armed" } else { "inactive" }));
    }

    if let Some(celebrated) = obj.remove("celebrated") {
        obj.entry("goalCelebrated").or_insert(celebrated);
    }

    if let Some(user) = obj.get_mut("user").and_then(Value::as_object_mut) {
        if let Some(ldap) = user.remove("ldap") {
            user.entry("id").or_insert(ldap);
        }
        if let Some(leader) = user.remove("leaderLdap") {
            user.entry("leaderId").or_insert(leader);
        }
    }

    if let Some(streaks) = obj.get_mut("streaks").and_then(Value::as_object_mut) {
        if let Some(date) = streaks.remove("lastMetDate") {
            streaks.entry("lastGoalMetDate").or_insert(date);
        }
    }

    if let Some(history) = obj.get_mut("history").and_then(Value::as_array_mut) {
        for entry in history {
            let Some(entry) = entry.as_object_mut() else {
                continue;
            };
            if let Some(id) = entry.remove("id") {
                entry.entry("caseId").or_insert(id);
            }
            if let Some(ms) = entry.remove("ts").and_then(|v| v.as_i64()) {
                entry.insert("timestamp".into(), json!(millis_to_rfc3339(ms)));
            }
        }
    }

    if let Some(hourly) = obj.get_mut("hourlyMetrics").and_then(Value::as_object_mut) {
        if let Some(participation) = hourly.remove("myParticipation") {
            hourly
                .entry("myParticipationPercent")
                .or_insert(participation);
        }
        if let Some(cases) = hourly
            .get_mut("currentHourCases")
            .and_then(Value::as_array_mut)
        {
            for case in cases {
                let Some(case) = case.as_object_mut() else {
                    continue;
                };
                if let Some(ms) = case.get("timestamp").and_then(Value::as_i64) {
                    case.insert("timestamp".into(), json!(millis_to_rfc3339(ms)));
                }
            }
        }
    }

    if let Some(Value::Array(ranking)) = obj.remove("rankingFromScript") {
        let migrated: Vec<Value> = ranking
            .into_iter()
            .filter_map(|entry| {
                let Value::Object(mut entry) = entry else {
                    return None;
                };
                if let Some(ldap) = entry.remove("ldap") {
                    entry.entry("id").or_insert(ldap);
                }
                if let Some(label) = entry.remove("last") {
                    entry.entry("lastActivityLabel").or_insert(label);
                }
                if let Some(ms) = entry.remove("lastTs").and_then(|v| v.as_i64()) {
                    entry.insert("lastActivityTs".into(), json!(millis_to_rfc3339(ms)));
                }
                Some(Value::Object(entry))
            })
            .collect();
        obj.entry("remoteRanking").or_insert(Value::Array(migrated));
    }
}

fn millis_to_rfc3339(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .to_rfc3339()
}
