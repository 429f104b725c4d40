use anyhow::{Result, bail};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use kenko_core::holder::StoreHolder;
use kenko_core::models::{Recipe, RecipeTag, owned_by};
use kenko_core::store::DataStore;

use super::helpers::{exit_not_found, find_item, parse_ingredient, short_id, truncate};

pub(crate) fn cmd_recipe_list(
    holder: &StoreHolder,
    owner: Option<&str>,
    tag: Option<String>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Tags")]
        tags: String,
        #[tabled(rename = "Ingredients")]
        ingredients: usize,
        #[tabled(rename = "kcal/serving")]
        calories: String,
    }

    let tag = tag.map(|t| t.parse::<RecipeTag>()).transpose()?;
    let mut recipes = holder.recipes()?;
    if let Some(owner) = owner {
        recipes = owned_by(&recipes, owner);
    }
    if let Some(tag) = tag {
        recipes.retain(|r| r.tags.contains(&tag));
    }
    recipes.sort_by_key(|r| r.title.to_lowercase());

    if recipes.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No recipes found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
        return Ok(());
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: short_id(r.id),
            title: truncate(&r.title, 30),
            tags: format_tags(&r.tags),
            ingredients: r.ingredients.len(),
            calories: r
                .calories_per_serving
                .map_or_else(|| "-".to_string(), |c| c.to_string()),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_recipe_add(
    holder: &StoreHolder,
    owner: Option<&str>,
    title: &str,
    body: &str,
    calories: Option<i64>,
    tags: &[String],
    ingredients: &[String],
    json: bool,
) -> Result<()> {
    if title.trim().is_empty() {
        bail!("Recipe title cannot be empty");
    }
    if calories.is_some_and(|c| c < 0) {
        bail!("Calories cannot be negative");
    }

    let mut recipe = Recipe::new(title.trim(), body);
    recipe.calories_per_serving = calories;
    recipe.owner_identifier = owner.map(str::to_string);
    recipe.tags = parse_tags(tags)?;
    recipe.ingredients = ingredients
        .iter()
        .map(|s| parse_ingredient(s))
        .collect::<Result<_>>()?;

    holder.add_recipe(&recipe)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
    } else {
        let id = short_id(recipe.id);
        let count = recipe.ingredients.len();
        println!("Added recipe {title} [{id}] with {count} ingredients");
    }
    Ok(())
}

pub(crate) fn cmd_recipe_show(holder: &StoreHolder, query: &str, json: bool) -> Result<()> {
    let recipes = holder.recipes()?;
    let recipe = match find_item(&recipes, query, "recipe", |r| r.title.as_str()) {
        Ok(recipe) => recipe,
        Err(e) => exit_not_found(&e, json),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(recipe)?);
        return Ok(());
    }

    let title = &recipe.title;
    let id = recipe.id;
    println!("=== {title} ===");
    println!("  ID: {id}");
    if let Some(cal) = recipe.calories_per_serving {
        println!("  {cal} kcal per serving");
    }
    if !recipe.tags.is_empty() {
        println!("  Tags: {}", format_tags(&recipe.tags));
    }

    if !recipe.ingredients.is_empty() {
        println!("\n  INGREDIENTS:");
        for ing in &recipe.ingredients {
            let name = &ing.name;
            if ing.quantity.is_empty() {
                println!("    {name}");
            } else {
                let qty = &ing.quantity;
                println!("    {name}: {qty}");
            }
        }
    }

    if !recipe.body.trim().is_empty() {
        println!("\n  METHOD:");
        for line in recipe.body.lines() {
            println!("    {line}");
        }
    }

    Ok(())
}

/// Changes requested by `recipe edit`. `None` and empty fields are left as
/// they are; `tags: Some(vec![])` clears the tag set.
pub(crate) struct RecipeEdit {
    pub title: Option<String>,
    pub body: Option<String>,
    pub calories: Option<i64>,
    pub tags: Option<Vec<String>>,
    pub ingredients: Vec<String>,
}

impl RecipeEdit {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.body.is_none()
            && self.calories.is_none()
            && self.tags.is_none()
            && self.ingredients.is_empty()
    }

    fn apply(self, recipe: &mut Recipe) -> Result<()> {
        if self.calories.is_some_and(|c| c < 0) {
            bail!("Calories cannot be negative");
        }
        if let Some(title) = self.title {
            recipe.title = title;
        }
        if let Some(body) = self.body {
            recipe.body = body;
        }
        if self.calories.is_some() {
            recipe.calories_per_serving = self.calories;
        }
        if let Some(tags) = self.tags {
            recipe.tags = parse_tags(&tags)?;
        }
        if !self.ingredients.is_empty() {
            recipe.ingredients = self
                .ingredients
                .iter()
                .map(|s| parse_ingredient(s))
                .collect::<Result<_>>()?;
        }
        Ok(())
    }
}

pub(crate) fn cmd_recipe_edit(
    holder: &StoreHolder,
    query: &str,
    edit: RecipeEdit,
    json: bool,
) -> Result<()> {
    if edit.is_empty() {
        bail!("Nothing to change. Provide --title, --body, --calories, --tag or --ingredient");
    }

    let recipes = holder.recipes()?;
    let mut recipe = match find_item(&recipes, query, "recipe", |r| r.title.as_str()) {
        Ok(recipe) => recipe.clone(),
        Err(e) => exit_not_found(&e, json),
    };
    edit.apply(&mut recipe)?;
    holder.update_recipe(&recipe)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
    } else {
        let id = short_id(recipe.id);
        let title = &recipe.title;
        println!("Updated recipe {title} [{id}]");
    }
    Ok(())
}

pub(crate) fn cmd_recipe_remove(holder: &StoreHolder, query: &str, json: bool) -> Result<()> {
    let recipes = holder.recipes()?;
    let recipe = match find_item(&recipes, query, "recipe", |r| r.title.as_str()) {
        Ok(recipe) => recipe,
        Err(e) => exit_not_found(&e, json),
    };
    holder.remove_recipe(recipe.id)?;

    if json {
        println!("{}", serde_json::json!({ "deleted": recipe.id }));
    } else {
        let title = &recipe.title;
        let count = recipe.ingredients.len();
        println!("Removed recipe {title} and its {count} ingredients");
    }
    Ok(())
}

/// Parses tags in order, dropping repeats.
fn parse_tags(tags: &[String]) -> Result<Vec<RecipeTag>> {
    let mut parsed = Vec::new();
    for tag in tags {
        let tag = tag.parse::<RecipeTag>()?;
        if !parsed.contains(&tag) {
            parsed.push(tag);
        }
    }
    Ok(parsed)
}

fn format_tags(tags: &[RecipeTag]) -> String {
    tags.iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
