//! Per-field last-writer-wins merge for records exchanged with an external
//! sync service.
//!
//! Every synced record carries a [`FieldClock`]: the time each property was
//! last written. Merging two versions of a record takes each property from
//! whichever side wrote it last, so concurrent edits to different properties
//! of one record are both kept. A recipe's ingredient set is a single
//! property, which keeps the full-replace semantics of `update_recipe`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::UnknownVariant;

pub type Fields = Map<String, Value>;

/// Unix milliseconds of the last write to each property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldClock(BTreeMap<String, i64>);

impl FieldClock {
    /// Every field written at `at`.
    #[must_use]
    pub fn stamped(fields: &Fields, at: i64) -> Self {
        Self(fields.keys().map(|k| (k.clone(), at)).collect())
    }

    /// Stamp the fields whose value differs between `old` and `new`.
    /// Returns true if anything was stamped.
    pub fn stamp_changed(&mut self, old: &Fields, new: &Fields, at: i64) -> bool {
        let mut changed = false;
        for (key, value) in new {
            if old.get(key) != Some(value) {
                self.0.insert(key.clone(), at);
                changed = true;
            }
        }
        changed
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<i64> {
        self.0.get(field).copied()
    }

    /// Most recent write to any field, 0 for a record never written.
    #[must_use]
    pub fn latest(&self) -> i64 {
        self.0.values().copied().max().unwrap_or(0)
    }

    /// A stamp for a new local write: now, but never at or before an existing
    /// stamp of this record.
    #[must_use]
    pub fn next_stamp(&self) -> i64 {
        Utc::now().timestamp_millis().max(self.latest() + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Entry,
    Recipe,
    Exercise,
    Routine,
    DailyGoal,
}

impl RecordKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Entry => "entry",
            RecordKind::Recipe => "recipe",
            RecordKind::Exercise => "exercise",
            RecordKind::Routine => "routine",
            RecordKind::DailyGoal => "daily_goal",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" => Ok(RecordKind::Entry),
            "recipe" => Ok(RecordKind::Recipe),
            "exercise" => Ok(RecordKind::Exercise),
            "routine" => Ok(RecordKind::Routine),
            "daily_goal" => Ok(RecordKind::DailyGoal),
            other => Err(UnknownVariant {
                kind: "record kind",
                value: other.to_string(),
            }),
        }
    }
}

/// An entity flattened for exchange: its properties without the id, plus the
/// clock of those properties. The daily goal has no id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub kind: RecordKind,
    #[serde(default)]
    pub id: Option<Uuid>,
    pub fields: Fields,
    pub clock: FieldClock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTombstone {
    pub kind: RecordKind,
    pub id: Uuid,
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub device_id: String,
    pub records: Vec<SyncRecord>,
    pub tombstones: Vec<SyncTombstone>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    pub inserted: usize,
    pub merged: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub skipped: usize,
}

impl MergeSummary {
    #[must_use]
    pub fn changed_anything(&self) -> bool {
        self.inserted + self.merged + self.deleted > 0
    }
}

/// Merge `incoming` into `local`, property by property. The newer stamp wins;
/// on equal stamps with different values the greater serialized value wins so
/// every replica settles on the same result. Returns true if `local` changed.
pub fn merge_fields(
    local: &mut Fields,
    local_clock: &mut FieldClock,
    incoming: &Fields,
    incoming_clock: &FieldClock,
) -> bool {
    let mut changed = false;
    for (key, theirs) in incoming {
        let their_stamp = incoming_clock.get(key).unwrap_or(0);
        let our_stamp = local_clock.get(key).unwrap_or(0);
        let take = match their_stamp.cmp(&our_stamp) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => local
                .get(key)
                .is_none_or(|ours| theirs.to_string() > ours.to_string()),
        };
        if take {
            if local.get(key) != Some(theirs) {
                local.insert(key.clone(), theirs.clone());
                changed = true;
            }
            if their_stamp > our_stamp {
                local_clock.0.insert(key.clone(), their_stamp);
                changed = true;
            }
        }
    }
    changed
}

/// Serialize an entity into its synced properties (everything but `id`).
pub(crate) fn to_fields<T: Serialize>(value: &T, what: &'static str) -> StoreResult<Fields> {
    match serde_json::to_value(value).map_err(|source| StoreError::Encode { what, source })? {
        Value::Object(mut map) => {
            map.remove("id");
            Ok(map)
        }
        _ => Err(StoreError::Encode {
            what,
            source: serde::ser::Error::custom("entity did not serialize to an object"),
        }),
    }
}

/// Rebuild an entity from synced properties.
pub(crate) fn from_fields<T: DeserializeOwned>(
    id: Option<Uuid>,
    fields: &Fields,
) -> Result<T, serde_json::Error> {
    let mut map = fields.clone();
    if let Some(id) = id {
        map.insert("id".to_string(), Value::String(id.to_string()));
    }
    serde_json::from_value(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CalorieEntry, Recipe};
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_newer_field_wins_per_property() {
        // Device A renamed the recipe, device B changed the calories.
        let base = fields(json!({"title": "Soup", "calories_per_serving": 300}));
        let mut a = base.clone();
        let mut a_clock = FieldClock::stamped(&base, 100);
        a.insert("title".into(), json!("Tomato Soup"));
        a_clock.0.insert("title".into(), 200);

        let mut b = base.clone();
        let mut b_clock = FieldClock::stamped(&base, 100);
        b.insert("calories_per_serving".into(), json!(280));
        b_clock.0.insert("calories_per_serving".into(), 210);

        let (mut a_merged, mut a_merged_clock) = (a.clone(), a_clock.clone());
        assert!(merge_fields(&mut a_merged, &mut a_merged_clock, &b, &b_clock));
        let (mut b_merged, mut b_merged_clock) = (b.clone(), b_clock.clone());
        assert!(merge_fields(&mut b_merged, &mut b_merged_clock, &a, &a_clock));

        let expected = fields(json!({"title": "Tomato Soup", "calories_per_serving": 280}));
        assert_eq!(a_merged, expected);
        assert_eq!(b_merged, expected);
        assert_eq!(a_merged_clock, b_merged_clock);
    }

    #[test]
    fn test_older_incoming_field_is_ignored() {
        let mut local = fields(json!({"calories": 2000}));
        let mut clock = FieldClock::stamped(&local, 500);
        let incoming = fields(json!({"calories": 2500}));
        let incoming_clock = FieldClock::stamped(&incoming, 400);

        assert!(!merge_fields(&mut local, &mut clock, &incoming, &incoming_clock));
        assert_eq!(local["calories"], json!(2000));
    }

    #[test]
    fn test_equal_stamps_converge() {
        let left = fields(json!({"name": "Squat"}));
        let right = fields(json!({"name": "Back Squat"}));
        let left_clock = FieldClock::stamped(&left, 100);
        let right_clock = FieldClock::stamped(&right, 100);

        let (mut l, mut lc) = (left.clone(), left_clock.clone());
        merge_fields(&mut l, &mut lc, &right, &right_clock);
        let (mut r, mut rc) = (right.clone(), right_clock.clone());
        merge_fields(&mut r, &mut rc, &left, &left_clock);
        assert_eq!(l, r);
    }

    #[test]
    fn test_stamp_changed_only_touches_changed_fields() {
        let old = fields(json!({"title": "Wrap", "body": "Roll it."}));
        let new = fields(json!({"title": "Wrap", "body": "Roll it tight."}));
        let mut clock = FieldClock::stamped(&old, 10);
        assert!(clock.stamp_changed(&old, &new, 20));
        assert_eq!(clock.get("title"), Some(10));
        assert_eq!(clock.get("body"), Some(20));
        assert!(!clock.stamp_changed(&new, &new, 30));
    }

    #[test]
    fn test_next_stamp_is_strictly_increasing() {
        let mut clock = FieldClock::default();
        clock.0.insert("title".into(), i64::MAX / 2);
        assert_eq!(clock.next_stamp(), i64::MAX / 2 + 1);
    }

    #[test]
    fn test_fields_round_trip_entity() {
        let mut recipe = Recipe::new("Wrap", "Roll it.");
        recipe.calories_per_serving = Some(420);
        let flat = to_fields(&recipe, "recipe").unwrap();
        assert!(!flat.contains_key("id"));
        let back: Recipe = from_fields(Some(recipe.id), &flat).unwrap();
        assert_eq!(back, recipe);
    }

    #[test]
    fn test_unknown_source_in_fields_fails() {
        let flat = fields(json!({
            "logged_at": "2025-11-06T08:00:00Z",
            "title": "Latte",
            "calories": 120,
            "source": "smoothie",
            "recipe_id": null
        }));
        let decoded: Result<CalorieEntry, _> = from_fields(Some(Uuid::new_v4()), &flat);
        assert!(decoded.is_err());
    }
}
