//! A small, fixed data set for demos and tests.

use chrono::{DateTime, Utc};

use crate::memory::{InMemoryStore, StoreSnapshot};
use crate::models::{
    CalorieEntry, DailyGoal, EntrySource, Exercise, Ingredient, Recipe, RecipeTag, Routine,
};

/// One recipe, two entries logged at `now`, the default goal, and a one-exercise
/// routine.
#[must_use]
pub fn sample_store(now: DateTime<Utc>) -> InMemoryStore {
    InMemoryStore::from_snapshot(sample_snapshot(now))
}

#[must_use]
pub fn sample_snapshot(now: DateTime<Utc>) -> StoreSnapshot {
    let mut wrap = Recipe::new(
        "Chicken Caesar Wrap",
        "Grill chicken, toss with lettuce and Caesar dressing, wrap in tortilla.",
    );
    wrap.calories_per_serving = Some(420);
    wrap.ingredients = vec![
        Ingredient::new("Chicken", "120 g"),
        Ingredient::new("Tortilla", "1"),
        Ingredient::new("Romaine", "1 cup"),
    ];

    let mut half_wrap = CalorieEntry::logged_at(now, "Wrap (½)", 210, EntrySource::Recipe);
    half_wrap.recipe_id = Some(wrap.id);

    let mut bench = Exercise::new("Bench Press", 3, 10);
    bench.instructions = Some("Lower the bar to mid-chest, press back up.".to_string());
    let upper_body = Routine::new("Upper Body", vec![bench.id]);

    let mut salad = Recipe::new("Greek Salad", "Chop everything, dress with olive oil.");
    salad.calories_per_serving = Some(310);
    salad.tags = vec![RecipeTag::Vegetarian, RecipeTag::GlutenFree];
    salad.ingredients = vec![
        Ingredient::new("Feta", "50 g"),
        Ingredient::new("Cucumber", "½"),
    ];

    StoreSnapshot {
        entries: vec![
            CalorieEntry::logged_at(now, "Oat Latte", 120, EntrySource::Item),
            half_wrap,
        ],
        recipes: vec![wrap, salad],
        exercises: vec![bench],
        routines: vec![upper_body],
        daily_goal: DailyGoal::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Calendar;
    use crate::store::{DataStore, day_summary};

    #[test]
    fn test_sample_day_summary() {
        let now = Utc::now();
        let store = sample_store(now);
        let summary = day_summary(&store, now, &Calendar::Utc).unwrap();
        assert_eq!(summary.entries.len(), 2);
        assert_eq!(summary.consumed, 330);
        assert_eq!(summary.goal, 2200);
        assert_eq!(summary.remaining, 1870);
    }

    #[test]
    fn test_sample_references_resolve() {
        let store = sample_store(Utc::now());
        let recipes = store.recipes().unwrap();
        let entries = store.entries().unwrap();
        assert_eq!(recipes[0].ingredients.len(), 3);
        assert_eq!(
            entries[1].resolve_recipe(&recipes).map(|r| r.title.as_str()),
            Some("Chicken Caesar Wrap")
        );
        let exercises = store.exercises().unwrap();
        let routine = &store.routines().unwrap()[0];
        assert!(routine.resolve_exercises(&exercises).iter().all(Option::is_some));
    }
}
