//! Reference backend: everything in ordered vectors, every query a linear scan.
//!
//! Used as ground truth in tests and as the fallback when no durable store is
//! wanted. Nothing survives the process.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::calendar::Calendar;
use crate::error::{StoreError, StoreResult};
use crate::models::{CalorieEntry, DailyGoal, Exercise, Recipe, Routine};
use crate::store::{DataStore, Durability};

/// A full copy of every entity family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub entries: Vec<CalorieEntry>,
    pub recipes: Vec<Recipe>,
    pub exercises: Vec<Exercise>,
    pub routines: Vec<Routine>,
    pub daily_goal: DailyGoal,
}

impl StoreSnapshot {
    /// Reads every family out of any store.
    pub fn capture(store: &dyn DataStore) -> StoreResult<Self> {
        Ok(Self {
            entries: store.entries()?,
            recipes: store.recipes()?,
            exercises: store.exercises()?,
            routines: store.routines()?,
            daily_goal: store.daily_goal()?,
        })
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<StoreSnapshot>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            inner: RwLock::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        Ok(self.read()?.clone())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, StoreSnapshot>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, StoreSnapshot>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }
}

/// Replace the first item with a matching id; no-op otherwise.
fn replace_by_id<T: Clone>(items: &mut [T], id: Uuid, value: &T, id_of: impl Fn(&T) -> Uuid) {
    if let Some(slot) = items.iter_mut().find(|item| id_of(item) == id) {
        *slot = value.clone();
    }
}

impl DataStore for InMemoryStore {
    fn durability(&self) -> Durability {
        Durability::Session
    }

    fn entries(&self) -> StoreResult<Vec<CalorieEntry>> {
        Ok(self.read()?.entries.clone())
    }

    fn entries_on_day(
        &self,
        at: DateTime<Utc>,
        calendar: &Calendar,
    ) -> StoreResult<Vec<CalorieEntry>> {
        let mut day: Vec<CalorieEntry> = self
            .read()?
            .entries
            .iter()
            .filter(|e| calendar.is_same_day(e.logged_at, at))
            .cloned()
            .collect();
        day.sort_by(|a, b| b.logged_at.cmp(&a.logged_at));
        Ok(day)
    }

    fn add_entry(&self, entry: &CalorieEntry) -> StoreResult<()> {
        debug!(id = %entry.id, "add entry");
        self.write()?.entries.push(entry.clone());
        Ok(())
    }

    fn update_entry(&self, entry: &CalorieEntry) -> StoreResult<()> {
        let mut inner = self.write()?;
        if let Some(slot) = inner.entries.iter_mut().find(|e| e.id == entry.id) {
            let logged_at = slot.logged_at;
            *slot = CalorieEntry {
                logged_at,
                ..entry.clone()
            };
        }
        Ok(())
    }

    fn remove_entry(&self, id: Uuid) -> StoreResult<()> {
        self.write()?.entries.retain(|e| e.id != id);
        Ok(())
    }

    fn recipes(&self) -> StoreResult<Vec<Recipe>> {
        Ok(self.read()?.recipes.clone())
    }

    fn add_recipe(&self, recipe: &Recipe) -> StoreResult<()> {
        debug!(id = %recipe.id, "add recipe");
        self.write()?.recipes.push(recipe.clone());
        Ok(())
    }

    fn update_recipe(&self, recipe: &Recipe) -> StoreResult<()> {
        replace_by_id(&mut self.write()?.recipes, recipe.id, recipe, |r| r.id);
        Ok(())
    }

    fn remove_recipe(&self, id: Uuid) -> StoreResult<()> {
        // Ingredients live inside the recipe value, so they go with it.
        self.write()?.recipes.retain(|r| r.id != id);
        Ok(())
    }

    fn exercises(&self) -> StoreResult<Vec<Exercise>> {
        Ok(self.read()?.exercises.clone())
    }

    fn add_exercise(&self, exercise: &Exercise) -> StoreResult<()> {
        self.write()?.exercises.push(exercise.clone());
        Ok(())
    }

    fn update_exercise(&self, exercise: &Exercise) -> StoreResult<()> {
        replace_by_id(&mut self.write()?.exercises, exercise.id, exercise, |e| e.id);
        Ok(())
    }

    fn remove_exercise(&self, id: Uuid) -> StoreResult<()> {
        self.write()?.exercises.retain(|e| e.id != id);
        Ok(())
    }

    fn routines(&self) -> StoreResult<Vec<Routine>> {
        Ok(self.read()?.routines.clone())
    }

    fn add_routine(&self, routine: &Routine) -> StoreResult<()> {
        self.write()?.routines.push(routine.clone());
        Ok(())
    }

    fn update_routine(&self, routine: &Routine) -> StoreResult<()> {
        replace_by_id(&mut self.write()?.routines, routine.id, routine, |r| r.id);
        Ok(())
    }

    fn remove_routine(&self, id: Uuid) -> StoreResult<()> {
        self.write()?.routines.retain(|r| r.id != id);
        Ok(())
    }

    fn daily_goal(&self) -> StoreResult<DailyGoal> {
        Ok(self.read()?.daily_goal)
    }

    fn set_daily_goal(&self, goal: DailyGoal) -> StoreResult<()> {
        self.write()?.daily_goal = goal;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntrySource, Ingredient};
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 6, h, m, 0).unwrap()
    }

    #[test]
    fn test_entries_on_day_filters_and_sorts_descending() {
        let store = InMemoryStore::new();
        let early = CalorieEntry::logged_at(at(8, 0), "Porridge", 300, EntrySource::Item);
        let late = CalorieEntry::logged_at(at(19, 30), "Curry", 650, EntrySource::Recipe);
        let yesterday =
            CalorieEntry::logged_at(at(12, 0) - Duration::days(1), "Toast", 200, EntrySource::Item);
        store.add_entry(&early).unwrap();
        store.add_entry(&yesterday).unwrap();
        store.add_entry(&late).unwrap();

        let day = store.entries_on_day(at(12, 0), &Calendar::Utc).unwrap();
        let titles: Vec<&str> = day.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Curry", "Porridge"]);
    }

    #[test]
    fn test_update_entry_keeps_logged_at() {
        let store = InMemoryStore::new();
        let entry = CalorieEntry::logged_at(at(8, 0), "Latte", 120, EntrySource::Item);
        store.add_entry(&entry).unwrap();

        let mut changed = entry.clone();
        changed.calories = 150;
        changed.logged_at = at(23, 0);
        store.update_entry(&changed).unwrap();

        let stored = store.entries().unwrap();
        assert_eq!(stored[0].calories, 150);
        assert_eq!(stored[0].logged_at, at(8, 0));
    }

    #[test]
    fn test_update_unknown_recipe_is_noop() {
        let store = InMemoryStore::new();
        store.add_recipe(&Recipe::new("Soup", "Simmer.")).unwrap();
        let before = store.recipes().unwrap();

        store.update_recipe(&Recipe::new("Ghost", "")).unwrap();
        assert_eq!(store.recipes().unwrap(), before);
    }

    #[test]
    fn test_update_recipe_replaces_ingredients() {
        let store = InMemoryStore::new();
        let mut recipe = Recipe::new("Salad", "Toss.");
        recipe.ingredients = vec![Ingredient::new("Lettuce", "1 head"), Ingredient::new("Tomato", "2")];
        store.add_recipe(&recipe).unwrap();

        recipe.ingredients = vec![Ingredient::new("Rocket", "1 bag")];
        store.update_recipe(&recipe).unwrap();

        let stored = store.recipes().unwrap();
        assert_eq!(stored[0].ingredients.len(), 1);
        assert_eq!(stored[0].ingredients[0].name, "Rocket");
    }

    #[test]
    fn test_remove_exercise_leaves_routine_reference_dangling() {
        let store = InMemoryStore::new();
        let squat = Exercise::new("Squat", 5, 5);
        let routine = Routine::new("Legs", vec![squat.id]);
        store.add_exercise(&squat).unwrap();
        store.add_routine(&routine).unwrap();

        store.remove_exercise(squat.id).unwrap();

        let routines = store.routines().unwrap();
        assert_eq!(routines[0].exercise_ids, vec![squat.id]);
        let exercises = store.exercises().unwrap();
        assert_eq!(routines[0].resolve_exercises(&exercises), vec![None]);
    }

    #[test]
    fn test_goal_defaults_and_overwrites() {
        let store = InMemoryStore::new();
        assert_eq!(store.daily_goal().unwrap().calories, 2200);
        store.set_daily_goal(DailyGoal { calories: 1800 }).unwrap();
        store.set_daily_goal(DailyGoal { calories: 1900 }).unwrap();
        assert_eq!(store.daily_goal().unwrap().calories, 1900);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let store = InMemoryStore::new();
        store.add_entry(&CalorieEntry::new("Apple", 95, EntrySource::Item)).unwrap();
        store.set_daily_goal(DailyGoal { calories: 2000 }).unwrap();

        let copy = InMemoryStore::from_snapshot(StoreSnapshot::capture(&store).unwrap());
        assert_eq!(copy.snapshot().unwrap(), store.snapshot().unwrap());
        assert_eq!(copy.durability(), Durability::Session);
    }
}
