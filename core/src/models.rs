use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Calorie goal a fresh store starts with.
pub const DEFAULT_DAILY_GOAL: i64 = 2200;

// --- Calorie entries ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    Item,
    Recipe,
}

impl EntrySource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EntrySource::Item => "item",
            EntrySource::Recipe => "recipe",
        }
    }
}

impl fmt::Display for EntrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsing never falls back to `Item`: an unknown tag is an error so a
/// corrupted record is skipped instead of silently re-tagged.
impl FromStr for EntrySource {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "item" => Ok(EntrySource::Item),
            "recipe" => Ok(EntrySource::Recipe),
            other => Err(UnknownVariant::new("entry source", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalorieEntry {
    pub id: Uuid,
    pub logged_at: DateTime<Utc>,
    pub title: String,
    pub calories: i64,
    pub source: EntrySource,
    /// Weak reference to the recipe this entry was logged from, if any.
    pub recipe_id: Option<Uuid>,
}

impl CalorieEntry {
    /// A new entry logged now with a fresh id.
    pub fn new(title: impl Into<String>, calories: i64, source: EntrySource) -> Self {
        Self::logged_at(Utc::now(), title, calories, source)
    }

    pub fn logged_at(
        at: DateTime<Utc>,
        title: impl Into<String>,
        calories: i64,
        source: EntrySource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            logged_at: at,
            title: title.into(),
            calories,
            source,
            recipe_id: None,
        }
    }

    /// An entry for one serving of `recipe`, tagged as a recipe entry.
    #[must_use]
    pub fn from_recipe(recipe: &Recipe, at: DateTime<Utc>) -> Self {
        Self {
            recipe_id: Some(recipe.id),
            ..Self::logged_at(
                at,
                recipe.title.clone(),
                recipe.calories_per_serving.unwrap_or(0),
                EntrySource::Recipe,
            )
        }
    }

    /// Looks up the recipe this entry came from. `None` when the entry was not
    /// logged from a recipe or the recipe is no longer available.
    #[must_use]
    pub fn resolve_recipe<'a>(&self, recipes: &'a [Recipe]) -> Option<&'a Recipe> {
        self.recipe_id.and_then(|id| resolve(recipes, id))
    }
}

/// Sum of calories over `entries`. An empty slice sums to 0.
#[must_use]
pub fn total_calories(entries: &[CalorieEntry]) -> i64 {
    entries.iter().map(|e| e.calories).sum()
}

// --- Recipes ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecipeTag {
    Vegetarian,
    Vegan,
    #[serde(rename = "Gluten-Free")]
    GlutenFree,
    #[serde(rename = "Dairy-Free")]
    DairyFree,
    Pescatarian,
}

impl RecipeTag {
    pub const ALL: [RecipeTag; 5] = [
        RecipeTag::Vegetarian,
        RecipeTag::Vegan,
        RecipeTag::GlutenFree,
        RecipeTag::DairyFree,
        RecipeTag::Pescatarian,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecipeTag::Vegetarian => "Vegetarian",
            RecipeTag::Vegan => "Vegan",
            RecipeTag::GlutenFree => "Gluten-Free",
            RecipeTag::DairyFree => "Dairy-Free",
            RecipeTag::Pescatarian => "Pescatarian",
        }
    }
}

impl fmt::Display for RecipeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive; accepts the display name or the name without the hyphen.
impl FromStr for RecipeTag {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace(['-', ' ', '_'], "");
        RecipeTag::ALL
            .into_iter()
            .find(|tag| tag.as_str().to_lowercase().replace('-', "") == wanted)
            .ok_or_else(|| UnknownVariant::new("recipe tag", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: Uuid,
    pub name: String,
    /// Free text, e.g. "120 g" or "1 cup".
    pub quantity: String,
}

impl Ingredient {
    pub fn new(name: impl Into<String>, quantity: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            quantity: quantity.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: Uuid,
    pub title: String,
    pub tags: Vec<RecipeTag>,
    pub body: String,
    pub calories_per_serving: Option<i64>,
    /// Owned exclusively by this recipe; order carries no meaning.
    pub ingredients: Vec<Ingredient>,
    pub owner_identifier: Option<String>,
}

impl Recipe {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            tags: Vec::new(),
            body: body.into(),
            calories_per_serving: None,
            ingredients: Vec::new(),
            owner_identifier: None,
        }
    }
}

// --- Exercises and routines ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    pub id: Uuid,
    pub name: String,
    pub sets: u32,
    pub reps: u32,
    pub instructions: Option<String>,
    pub owner_identifier: Option<String>,
}

impl Exercise {
    pub fn new(name: impl Into<String>, sets: u32, reps: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            sets,
            reps,
            instructions: None,
            owner_identifier: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routine {
    pub id: Uuid,
    pub name: String,
    /// Weak references; any of these may point at a deleted exercise.
    pub exercise_ids: Vec<Uuid>,
    pub owner_identifier: Option<String>,
}

impl Routine {
    pub fn new(name: impl Into<String>, exercise_ids: Vec<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            exercise_ids,
            owner_identifier: None,
        }
    }

    /// One slot per referenced id, in routine order. A `None` slot means the
    /// exercise is no longer available.
    #[must_use]
    pub fn resolve_exercises<'a>(&self, exercises: &'a [Exercise]) -> Vec<Option<&'a Exercise>> {
        self.exercise_ids
            .iter()
            .map(|id| resolve(exercises, *id))
            .collect()
    }
}

// --- Daily goal ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyGoal {
    pub calories: i64,
}

impl Default for DailyGoal {
    fn default() -> Self {
        Self {
            calories: DEFAULT_DAILY_GOAL,
        }
    }
}

impl DailyGoal {
    /// Calories left for the day; negative once the goal is exceeded.
    #[must_use]
    pub fn remaining(self, consumed: i64) -> i64 {
        self.calories - consumed
    }
}

/// One calendar day of intake against the goal.
#[derive(Debug, Clone, Serialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub entries: Vec<CalorieEntry>,
    pub consumed: i64,
    pub goal: i64,
    pub remaining: i64,
}

// --- Identity and weak references ---

/// The signed-in user as handed over by the identity provider. Only
/// `identifier` reaches the store, as an owner tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub identifier: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

pub trait Identified {
    fn id(&self) -> Uuid;
}

macro_rules! impl_identified {
    ($($ty:ty),*) => {
        $(impl Identified for $ty {
            fn id(&self) -> Uuid {
                self.id
            }
        })*
    };
}

impl_identified!(CalorieEntry, Ingredient, Recipe, Exercise, Routine);

/// Resolve a weak, id-based reference. Absent targets are not an error.
pub fn resolve<T: Identified>(items: &[T], id: Uuid) -> Option<&T> {
    items.iter().find(|item| item.id() == id)
}

/// Records tagged with the identifier of the user who created them. The store
/// does not enforce ownership; filtering is up to the caller.
pub trait Owned {
    fn owner_identifier(&self) -> Option<&str>;

    fn is_owned_by(&self, owner: &str) -> bool {
        self.owner_identifier() == Some(owner)
    }
}

macro_rules! impl_owned {
    ($($ty:ty),*) => {
        $(impl Owned for $ty {
            fn owner_identifier(&self) -> Option<&str> {
                self.owner_identifier.as_deref()
            }
        })*
    };
}

impl_owned!(Recipe, Exercise, Routine);

#[must_use]
pub fn owned_by<T: Owned + Clone>(items: &[T], owner: &str) -> Vec<T> {
    items
        .iter()
        .filter(|item| item.is_owned_by(owner))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_calories_sums_entries() {
        let entries = vec![
            CalorieEntry::new("Oat Latte", 120, EntrySource::Item),
            CalorieEntry::new("Wrap", 210, EntrySource::Recipe),
        ];
        assert_eq!(total_calories(&entries), 330);
    }

    #[test]
    fn test_total_calories_empty_is_zero() {
        assert_eq!(total_calories(&[]), 0);
    }

    #[test]
    fn test_remaining_goes_negative_when_over() {
        let goal = DailyGoal::default();
        assert_eq!(goal.calories, 2200);
        assert_eq!(goal.remaining(330), 1870);
        assert_eq!(goal.remaining(2500), -300);
    }

    #[test]
    fn test_entry_source_round_trips_as_lowercase() {
        let json = serde_json::to_string(&EntrySource::Recipe).unwrap();
        assert_eq!(json, "\"recipe\"");
        assert_eq!("item".parse::<EntrySource>().unwrap(), EntrySource::Item);
    }

    #[test]
    fn test_unknown_entry_source_fails_decoding() {
        assert!("snack".parse::<EntrySource>().is_err());
        assert!(serde_json::from_str::<EntrySource>("\"snack\"").is_err());
    }

    #[test]
    fn test_recipe_tag_display_names() {
        let json = serde_json::to_string(&vec![RecipeTag::GlutenFree, RecipeTag::DairyFree]).unwrap();
        assert_eq!(json, r#"["Gluten-Free","Dairy-Free"]"#);
    }

    #[test]
    fn test_recipe_tag_parse_is_lenient_on_case_and_hyphen() {
        assert_eq!("gluten-free".parse::<RecipeTag>().unwrap(), RecipeTag::GlutenFree);
        assert_eq!("DairyFree".parse::<RecipeTag>().unwrap(), RecipeTag::DairyFree);
        assert_eq!("vegan".parse::<RecipeTag>().unwrap(), RecipeTag::Vegan);
        assert!("keto".parse::<RecipeTag>().is_err());
    }

    #[test]
    fn test_routine_resolves_dangling_exercise_as_none() {
        let bench = Exercise::new("Bench Press", 3, 10);
        let squat = Exercise::new("Squat", 5, 5);
        let routine = Routine::new("Full Body", vec![squat.id, Uuid::new_v4(), bench.id]);
        let exercises = vec![bench.clone(), squat.clone()];

        let resolved = routine.resolve_exercises(&exercises);
        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[0].map(|e| e.name.as_str()), Some("Squat"));
        assert!(resolved[1].is_none());
        assert_eq!(resolved[2].map(|e| e.name.as_str()), Some("Bench Press"));
    }

    #[test]
    fn test_entry_from_recipe_resolves_back() {
        let mut recipe = Recipe::new("Chicken Caesar Wrap", "Grill, toss, wrap.");
        recipe.calories_per_serving = Some(420);
        let entry = CalorieEntry::from_recipe(&recipe, Utc::now());
        assert_eq!(entry.source, EntrySource::Recipe);
        assert_eq!(entry.calories, 420);

        let recipes = vec![recipe.clone()];
        assert_eq!(entry.resolve_recipe(&recipes).map(|r| r.id), Some(recipe.id));
        assert!(entry.resolve_recipe(&[]).is_none());
    }

    #[test]
    fn test_item_entry_has_no_recipe() {
        let entry = CalorieEntry::new("Apple", 95, EntrySource::Item);
        let recipes = vec![Recipe::new("Anything", "")];
        assert!(entry.resolve_recipe(&recipes).is_none());
    }

    #[test]
    fn test_owned_by_filters_on_identifier() {
        let mut mine = Recipe::new("Mine", "");
        mine.owner_identifier = Some("user-1".to_string());
        let mut theirs = Recipe::new("Theirs", "");
        theirs.owner_identifier = Some("user-2".to_string());
        let orphan = Recipe::new("Nobody's", "");

        let filtered = owned_by(&[mine.clone(), theirs, orphan], "user-1");
        assert_eq!(filtered, vec![mine]);
    }
}
