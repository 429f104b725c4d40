use anyhow::{Context, Result, bail};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use kenko_core::calendar::Calendar;
use kenko_core::holder::StoreHolder;
use kenko_core::models::{CalorieEntry, DaySummary, EntrySource};
use kenko_core::store::{DataStore, day_summary};

use super::helpers::{exit_not_found, find_item, instant_for, parse_date, short_id, truncate};

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_log(
    holder: &StoreHolder,
    calendar: &Calendar,
    title: &str,
    calories: Option<i64>,
    recipe: bool,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    if calories.is_some_and(|c| c < 0) {
        bail!("Calories cannot be negative");
    }
    let date = parse_date(date, calendar)?;
    let at = instant_for(date, calendar);

    let entry = if recipe {
        let recipes = holder.recipes()?;
        let recipe = find_item(&recipes, title, "recipe", |r| r.title.as_str())?;
        let mut entry = CalorieEntry::from_recipe(recipe, at);
        match (calories, recipe.calories_per_serving) {
            (Some(c), _) => entry.calories = c,
            (None, Some(_)) => {}
            (None, None) => bail!(
                "Recipe '{}' has no calories per serving. Pass CALORIES explicitly",
                recipe.title
            ),
        }
        entry
    } else {
        let calories =
            calories.context("CALORIES is required unless --recipe is given")?;
        CalorieEntry::logged_at(at, title, calories, EntrySource::Item)
    };

    holder.add_entry(&entry)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        let id = short_id(entry.id);
        let title = &entry.title;
        let cal = entry.calories;
        println!("Logged {title} ({cal} kcal) on {date} [{id}]");
    }
    Ok(())
}

pub(crate) fn cmd_today(
    holder: &StoreHolder,
    calendar: &Calendar,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date, calendar)?;
    let summary = day_summary(holder, calendar.start_of_date(date), calendar)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if summary.entries.is_empty() {
        let goal = summary.goal;
        eprintln!("No entries for {date} (goal {goal} kcal)");
        process::exit(2);
    }

    print_day(&summary, calendar);
    Ok(())
}

pub(super) fn print_day(summary: &DaySummary, calendar: &Calendar) {
    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Source")]
        source: String,
        #[tabled(rename = "kcal")]
        calories: i64,
        #[tabled(rename = "ID")]
        id: String,
    }

    let rows: Vec<EntryRow> = summary
        .entries
        .iter()
        .map(|e| EntryRow {
            time: calendar.local_time(e.logged_at).format("%H:%M").to_string(),
            title: truncate(&e.title, 35),
            source: e.source.to_string(),
            calories: e.calories,
            id: short_id(e.id),
        })
        .collect();

    let date = summary.date;
    println!("=== {date} ===\n");
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
        .to_string();
    println!("{table}\n");

    let consumed = summary.consumed;
    let goal = summary.goal;
    println!("  TOTAL: {consumed} kcal");
    println!("  GOAL: {goal} kcal");
    if summary.remaining < 0 {
        let over = -summary.remaining;
        println!("  OVER: {over} kcal");
    } else {
        let remaining = summary.remaining;
        println!("  REMAINING: {remaining} kcal");
    }
}

pub(crate) fn cmd_update(
    holder: &StoreHolder,
    entry_id: &str,
    title: Option<String>,
    calories: Option<i64>,
    json: bool,
) -> Result<()> {
    if title.is_none() && calories.is_none() {
        bail!("Nothing to update. Provide at least one of --title or --calories");
    }
    if calories.is_some_and(|c| c < 0) {
        bail!("Calories cannot be negative");
    }

    let entries = holder.entries()?;
    let mut entry = match find_item(&entries, entry_id, "entry", |e| e.title.as_str()) {
        Ok(entry) => entry.clone(),
        Err(e) => exit_not_found(&e, json),
    };
    if let Some(title) = title {
        entry.title = title;
    }
    if let Some(calories) = calories {
        entry.calories = calories;
    }
    holder.update_entry(&entry)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        let id = short_id(entry.id);
        let title = &entry.title;
        let cal = entry.calories;
        println!("Updated entry {id}: {title} ({cal} kcal)");
    }
    Ok(())
}

pub(crate) fn cmd_delete(holder: &StoreHolder, entry_id: &str, json: bool) -> Result<()> {
    let entries = holder.entries()?;
    let entry = match find_item(&entries, entry_id, "entry", |e| e.title.as_str()) {
        Ok(entry) => entry,
        Err(e) => exit_not_found(&e, json),
    };
    holder.remove_entry(entry.id)?;

    if json {
        println!("{}", serde_json::json!({ "deleted": entry.id }));
    } else {
        let id = short_id(entry.id);
        let title = &entry.title;
        println!("Deleted entry {id} ({title})");
    }
    Ok(())
}
