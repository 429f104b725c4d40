use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar::Calendar;
use crate::error::StoreResult;
use crate::models::{
    CalorieEntry, DailyGoal, DaySummary, Exercise, Recipe, Routine, total_calories,
};

/// Whether a backend's writes survive a process restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Data lives as long as the process.
    Session,
    /// Data is written to disk before the call returns.
    Persistent,
}

/// The operations every backend supports. Callers hold `dyn DataStore` and
/// never depend on a concrete backend.
///
/// `update_*` replaces the stored record with the same id and never inserts.
/// `update_*` and `remove_*` on an id the store does not have are no-ops;
/// neither reports whether anything matched. A mutation has been applied
/// (or committed, for durable backends) by the time it returns.
pub trait DataStore: Send + Sync {
    fn durability(&self) -> Durability;

    // Calorie entries

    fn entries(&self) -> StoreResult<Vec<CalorieEntry>>;

    /// Entries whose `logged_at` falls on the calendar day containing `at`,
    /// most recent first.
    fn entries_on_day(
        &self,
        at: DateTime<Utc>,
        calendar: &Calendar,
    ) -> StoreResult<Vec<CalorieEntry>>;

    fn add_entry(&self, entry: &CalorieEntry) -> StoreResult<()>;

    /// Replaces title, calories, source and recipe link. `logged_at` is fixed at
    /// creation and is kept as stored.
    fn update_entry(&self, entry: &CalorieEntry) -> StoreResult<()>;

    fn remove_entry(&self, id: Uuid) -> StoreResult<()>;

    // Recipes (with owned ingredients)

    fn recipes(&self) -> StoreResult<Vec<Recipe>>;

    fn add_recipe(&self, recipe: &Recipe) -> StoreResult<()>;

    /// Replaces the recipe and its whole ingredient set.
    fn update_recipe(&self, recipe: &Recipe) -> StoreResult<()>;

    /// Removes the recipe and every ingredient it owns.
    fn remove_recipe(&self, id: Uuid) -> StoreResult<()>;

    // Exercises

    fn exercises(&self) -> StoreResult<Vec<Exercise>>;

    fn add_exercise(&self, exercise: &Exercise) -> StoreResult<()>;

    fn update_exercise(&self, exercise: &Exercise) -> StoreResult<()>;

    /// Routines that reference the exercise keep the dangling id.
    fn remove_exercise(&self, id: Uuid) -> StoreResult<()>;

    // Routines

    fn routines(&self) -> StoreResult<Vec<Routine>>;

    fn add_routine(&self, routine: &Routine) -> StoreResult<()>;

    fn update_routine(&self, routine: &Routine) -> StoreResult<()>;

    fn remove_routine(&self, id: Uuid) -> StoreResult<()>;

    // Daily goal

    fn daily_goal(&self) -> StoreResult<DailyGoal>;

    /// Overwrites the single goal; there is never more than one.
    fn set_daily_goal(&self, goal: DailyGoal) -> StoreResult<()>;
}

/// Intake for the day containing `at`, measured against the current goal.
pub fn day_summary(
    store: &dyn DataStore,
    at: DateTime<Utc>,
    calendar: &Calendar,
) -> StoreResult<DaySummary> {
    let entries = store.entries_on_day(at, calendar)?;
    let goal = store.daily_goal()?;
    let consumed = total_calories(&entries);
    Ok(DaySummary {
        date: calendar.date_of(at),
        entries,
        consumed,
        goal: goal.calories,
        remaining: goal.remaining(consumed),
    })
}
