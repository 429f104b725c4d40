//! The handle the rest of the application holds instead of a concrete store.
//!
//! `StoreHolder` owns the current backend and is itself a [`DataStore`]:
//! every mutation goes through it, and once the backend has applied the
//! change the holder bumps its revision and broadcasts a [`StoreEvent`].
//! Failed mutations publish nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::calendar::Calendar;
use crate::error::{StoreError, StoreResult};
use crate::models::{CalorieEntry, DailyGoal, Exercise, Recipe, Routine};
use crate::store::{DataStore, Durability};
use crate::sync::MergeSummary;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    EntryAdded(Uuid),
    EntryUpdated(Uuid),
    EntryRemoved(Uuid),
    RecipeAdded(Uuid),
    RecipeUpdated(Uuid),
    RecipeRemoved(Uuid),
    ExerciseAdded(Uuid),
    ExerciseUpdated(Uuid),
    ExerciseRemoved(Uuid),
    RoutineAdded(Uuid),
    RoutineUpdated(Uuid),
    RoutineRemoved(Uuid),
    GoalChanged(DailyGoal),
    /// A different backend was swapped in; every cached view is stale.
    BackendReplaced,
    /// Records from another replica were merged outside the holder.
    RemoteChangesMerged(MergeSummary),
}

pub struct StoreHolder {
    store: RwLock<Arc<dyn DataStore>>,
    events: broadcast::Sender<StoreEvent>,
    revision: AtomicU64,
}

impl StoreHolder {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self::with_capacity(store, DEFAULT_CAPACITY)
    }

    /// Slow subscribers lag (and miss events) rather than block writers.
    pub fn with_capacity(store: Arc<dyn DataStore>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            store: RwLock::new(store),
            events,
            revision: AtomicU64::new(0),
        }
    }

    /// The backend currently in use.
    pub fn store(&self) -> StoreResult<Arc<dyn DataStore>> {
        self.store
            .read()
            .map(|store| Arc::clone(&*store))
            .map_err(|_| StoreError::LockPoisoned)
    }

    pub fn replace(&self, store: Arc<dyn DataStore>) -> StoreResult<()> {
        *self.store.write().map_err(|_| StoreError::LockPoisoned)? = store;
        self.publish(StoreEvent::BackendReplaced);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Incremented once per successful mutation.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Announce a merge applied directly on the backend. A merge that changed
    /// nothing is not announced.
    pub fn notify_remote_merge(&self, summary: MergeSummary) {
        if summary.changed_anything() {
            self.publish(StoreEvent::RemoteChangesMerged(summary));
        }
    }

    fn publish(&self, event: StoreEvent) {
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(revision, ?event, "store changed");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn mutate(
        &self,
        apply: impl FnOnce(&dyn DataStore) -> StoreResult<()>,
        event: StoreEvent,
    ) -> StoreResult<()> {
        let store = self.store()?;
        apply(store.as_ref())?;
        self.publish(event);
        Ok(())
    }
}

impl DataStore for StoreHolder {
    fn durability(&self) -> Durability {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .durability()
    }

    fn entries(&self) -> StoreResult<Vec<CalorieEntry>> {
        self.store()?.entries()
    }

    fn entries_on_day(
        &self,
        at: DateTime<Utc>,
        calendar: &Calendar,
    ) -> StoreResult<Vec<CalorieEntry>> {
        self.store()?.entries_on_day(at, calendar)
    }

    fn add_entry(&self, entry: &CalorieEntry) -> StoreResult<()> {
        self.mutate(|s| s.add_entry(entry), StoreEvent::EntryAdded(entry.id))
    }

    fn update_entry(&self, entry: &CalorieEntry) -> StoreResult<()> {
        self.mutate(|s| s.update_entry(entry), StoreEvent::EntryUpdated(entry.id))
    }

    fn remove_entry(&self, id: Uuid) -> StoreResult<()> {
        self.mutate(|s| s.remove_entry(id), StoreEvent::EntryRemoved(id))
    }

    fn recipes(&self) -> StoreResult<Vec<Recipe>> {
        self.store()?.recipes()
    }

    fn add_recipe(&self, recipe: &Recipe) -> StoreResult<()> {
        self.mutate(|s| s.add_recipe(recipe), StoreEvent::RecipeAdded(recipe.id))
    }

    fn update_recipe(&self, recipe: &Recipe) -> StoreResult<()> {
        self.mutate(|s| s.update_recipe(recipe), StoreEvent::RecipeUpdated(recipe.id))
    }

    fn remove_recipe(&self, id: Uuid) -> StoreResult<()> {
        self.mutate(|s| s.remove_recipe(id), StoreEvent::RecipeRemoved(id))
    }

    fn exercises(&self) -> StoreResult<Vec<Exercise>> {
        self.store()?.exercises()
    }

    fn add_exercise(&self, exercise: &Exercise) -> StoreResult<()> {
        self.mutate(|s| s.add_exercise(exercise), StoreEvent::ExerciseAdded(exercise.id))
    }

    fn update_exercise(&self, exercise: &Exercise) -> StoreResult<()> {
        self.mutate(
            |s| s.update_exercise(exercise),
            StoreEvent::ExerciseUpdated(exercise.id),
        )
    }

    fn remove_exercise(&self, id: Uuid) -> StoreResult<()> {
        self.mutate(|s| s.remove_exercise(id), StoreEvent::ExerciseRemoved(id))
    }

    fn routines(&self) -> StoreResult<Vec<Routine>> {
        self.store()?.routines()
    }

    fn add_routine(&self, routine: &Routine) -> StoreResult<()> {
        self.mutate(|s| s.add_routine(routine), StoreEvent::RoutineAdded(routine.id))
    }

    fn update_routine(&self, routine: &Routine) -> StoreResult<()> {
        self.mutate(
            |s| s.update_routine(routine),
            StoreEvent::RoutineUpdated(routine.id),
        )
    }

    fn remove_routine(&self, id: Uuid) -> StoreResult<()> {
        self.mutate(|s| s.remove_routine(id), StoreEvent::RoutineRemoved(id))
    }

    fn daily_goal(&self) -> StoreResult<DailyGoal> {
        self.store()?.daily_goal()
    }

    fn set_daily_goal(&self, goal: DailyGoal) -> StoreResult<()> {
        self.mutate(|s| s.set_daily_goal(goal), StoreEvent::GoalChanged(goal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::memory::InMemoryStore;
    use crate::models::EntrySource;
    use tokio::sync::broadcast::error::TryRecvError;

    /// Reads succeed, every write fails.
    struct ReadOnlyStore(InMemoryStore);

    impl DataStore for ReadOnlyStore {
        fn durability(&self) -> Durability {
            Durability::Session
        }
        fn entries(&self) -> StoreResult<Vec<CalorieEntry>> {
            self.0.entries()
        }
        fn entries_on_day(
            &self,
            at: DateTime<Utc>,
            calendar: &Calendar,
        ) -> StoreResult<Vec<CalorieEntry>> {
            self.0.entries_on_day(at, calendar)
        }
        fn add_entry(&self, _: &CalorieEntry) -> StoreResult<()> {
            Err(StoreError::LockPoisoned)
        }
        fn update_entry(&self, _: &CalorieEntry) -> StoreResult<()> {
            Err(StoreError::LockPoisoned)
        }
        fn remove_entry(&self, _: Uuid) -> StoreResult<()> {
            Err(StoreError::LockPoisoned)
        }
        fn recipes(&self) -> StoreResult<Vec<Recipe>> {
            self.0.recipes()
        }
        fn add_recipe(&self, _: &Recipe) -> StoreResult<()> {
            Err(StoreError::LockPoisoned)
        }
        fn update_recipe(&self, _: &Recipe) -> StoreResult<()> {
            Err(StoreError::LockPoisoned)
        }
        fn remove_recipe(&self, _: Uuid) -> StoreResult<()> {
            Err(StoreError::LockPoisoned)
        }
        fn exercises(&self) -> StoreResult<Vec<Exercise>> {
            self.0.exercises()
        }
        fn add_exercise(&self, _: &Exercise) -> StoreResult<()> {
            Err(StoreError::LockPoisoned)
        }
        fn update_exercise(&self, _: &Exercise) -> StoreResult<()> {
            Err(StoreError::LockPoisoned)
        }
        fn remove_exercise(&self, _: Uuid) -> StoreResult<()> {
            Err(StoreError::LockPoisoned)
        }
        fn routines(&self) -> StoreResult<Vec<Routine>> {
            self.0.routines()
        }
        fn add_routine(&self, _: &Routine) -> StoreResult<()> {
            Err(StoreError::LockPoisoned)
        }
        fn update_routine(&self, _: &Routine) -> StoreResult<()> {
            Err(StoreError::LockPoisoned)
        }
        fn remove_routine(&self, _: Uuid) -> StoreResult<()> {
            Err(StoreError::LockPoisoned)
        }
        fn daily_goal(&self) -> StoreResult<DailyGoal> {
            self.0.daily_goal()
        }
        fn set_daily_goal(&self, _: DailyGoal) -> StoreResult<()> {
            Err(StoreError::LockPoisoned)
        }
    }

    #[test]
    fn test_mutation_publishes_after_success() {
        let holder = StoreHolder::new(Arc::new(InMemoryStore::new()));
        let mut rx = holder.subscribe();
        let entry = CalorieEntry::new("Oat Latte", 120, EntrySource::Item);

        holder.add_entry(&entry).unwrap();
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::EntryAdded(entry.id));
        assert_eq!(holder.revision(), 1);
        // The event is only sent once the write is visible.
        assert_eq!(holder.entries().unwrap().len(), 1);

        holder.set_daily_goal(DailyGoal { calories: 1800 }).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::GoalChanged(DailyGoal { calories: 1800 })
        );
        assert_eq!(holder.revision(), 2);
    }

    #[test]
    fn test_failed_mutation_publishes_nothing() {
        let holder = StoreHolder::new(Arc::new(ReadOnlyStore(InMemoryStore::new())));
        let mut rx = holder.subscribe();

        assert!(holder.add_recipe(&Recipe::new("Soup", "")).is_err());
        assert!(holder.set_daily_goal(DailyGoal { calories: 1500 }).is_err());
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(holder.revision(), 0);
        assert_eq!(holder.daily_goal().unwrap().calories, 2200);
    }

    #[test]
    fn test_replace_swaps_backend_and_announces_it() {
        let holder = StoreHolder::new(Arc::new(InMemoryStore::new()));
        holder.add_exercise(&Exercise::new("Squat", 5, 5)).unwrap();
        let mut rx = holder.subscribe();

        holder
            .replace(Arc::new(Database::open_in_memory().unwrap()))
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::BackendReplaced);
        assert_eq!(holder.durability(), Durability::Persistent);
        assert!(holder.exercises().unwrap().is_empty());
    }

    #[test]
    fn test_empty_remote_merge_is_not_announced() {
        let holder = StoreHolder::new(Arc::new(InMemoryStore::new()));
        let mut rx = holder.subscribe();

        holder.notify_remote_merge(MergeSummary::default());
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        let summary = MergeSummary {
            inserted: 2,
            ..MergeSummary::default()
        };
        holder.notify_remote_merge(summary);
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::RemoteChangesMerged(summary));
        assert_eq!(holder.revision(), 1);
    }

    #[test]
    fn test_events_without_subscribers_still_bump_revision() {
        let holder = StoreHolder::new(Arc::new(InMemoryStore::new()));
        holder.remove_routine(Uuid::new_v4()).unwrap();
        assert_eq!(holder.revision(), 1);
    }
}
