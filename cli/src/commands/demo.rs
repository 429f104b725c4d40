use anyhow::Result;
use chrono::Utc;

use kenko_core::calendar::Calendar;
use kenko_core::holder::StoreHolder;
use kenko_core::sample::{sample_snapshot, sample_store};
use kenko_core::store::{DataStore, day_summary};

use super::entry::print_day;

/// Without a holder, shows today built from the sample data in memory. With
/// one, copies the sample records into it; the stored goal is left alone.
pub(crate) fn cmd_demo(holder: Option<&StoreHolder>, calendar: &Calendar, json: bool) -> Result<()> {
    let now = Utc::now();

    let Some(holder) = holder else {
        let store = sample_store(now);
        let summary = day_summary(&store, now, calendar)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_day(&summary, calendar);
        }
        return Ok(());
    };

    let snapshot = sample_snapshot(now);
    for recipe in &snapshot.recipes {
        holder.add_recipe(recipe)?;
    }
    for exercise in &snapshot.exercises {
        holder.add_exercise(exercise)?;
    }
    for routine in &snapshot.routines {
        holder.add_routine(routine)?;
    }
    for entry in &snapshot.entries {
        holder.add_entry(entry)?;
    }

    let (entries, recipes) = (snapshot.entries.len(), snapshot.recipes.len());
    let (exercises, routines) = (snapshot.exercises.len(), snapshot.routines.len());
    if json {
        println!(
            "{}",
            serde_json::json!({
                "entries": entries,
                "recipes": recipes,
                "exercises": exercises,
                "routines": routines,
            })
        );
    } else {
        println!(
            "Seeded {entries} entries, {recipes} recipes, {exercises} exercises and {routines} routines"
        );
    }
    Ok(())
}
