use anyhow::{Result, bail};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use kenko_core::holder::StoreHolder;
use kenko_core::models::{Exercise, Routine, owned_by};
use kenko_core::store::DataStore;

use super::helpers::{exit_not_found, find_item, short_id, truncate};

const REMOVED_EXERCISE: &str = "(removed)";

// --- Exercises ---

pub(crate) fn cmd_exercise_list(
    holder: &StoreHolder,
    owner: Option<&str>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct ExerciseRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Sets")]
        sets: u32,
        #[tabled(rename = "Reps")]
        reps: u32,
        #[tabled(rename = "Instructions")]
        instructions: String,
    }

    let mut exercises = holder.exercises()?;
    if let Some(owner) = owner {
        exercises = owned_by(&exercises, owner);
    }
    exercises.sort_by_key(|e| e.name.to_lowercase());

    if exercises.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No exercises found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&exercises)?);
        return Ok(());
    }

    let rows: Vec<ExerciseRow> = exercises
        .iter()
        .map(|e| ExerciseRow {
            id: short_id(e.id),
            name: truncate(&e.name, 30),
            sets: e.sets,
            reps: e.reps,
            instructions: e
                .instructions
                .as_deref()
                .map(|i| truncate(i, 40))
                .unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

pub(crate) fn cmd_exercise_add(
    holder: &StoreHolder,
    owner: Option<&str>,
    name: &str,
    sets: u32,
    reps: u32,
    instructions: Option<String>,
    json: bool,
) -> Result<()> {
    if name.trim().is_empty() {
        bail!("Exercise name cannot be empty");
    }

    let mut exercise = Exercise::new(name.trim(), sets, reps);
    exercise.instructions = instructions.filter(|i| !i.trim().is_empty());
    exercise.owner_identifier = owner.map(str::to_string);
    holder.add_exercise(&exercise)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&exercise)?);
    } else {
        let id = short_id(exercise.id);
        let name = &exercise.name;
        println!("Added exercise {name} ({sets}x{reps}) [{id}]");
    }
    Ok(())
}

pub(crate) fn cmd_exercise_remove(holder: &StoreHolder, query: &str, json: bool) -> Result<()> {
    let exercises = holder.exercises()?;
    let exercise = match find_item(&exercises, query, "exercise", |e| e.name.as_str()) {
        Ok(exercise) => exercise,
        Err(e) => exit_not_found(&e, json),
    };
    holder.remove_exercise(exercise.id)?;

    let affected = holder
        .routines()?
        .iter()
        .filter(|r| r.exercise_ids.contains(&exercise.id))
        .count();

    if json {
        println!(
            "{}",
            serde_json::json!({ "deleted": exercise.id, "routines_affected": affected })
        );
    } else {
        let name = &exercise.name;
        println!("Removed exercise {name}");
        if affected > 0 {
            println!("  {affected} routine(s) now show it as {REMOVED_EXERCISE}");
        }
    }
    Ok(())
}

// --- Routines ---

pub(crate) fn cmd_routine_list(holder: &StoreHolder, owner: Option<&str>, json: bool) -> Result<()> {
    let mut routines = holder.routines()?;
    if let Some(owner) = owner {
        routines = owned_by(&routines, owner);
    }
    routines.sort_by_key(|r| r.name.to_lowercase());

    if routines.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No routines found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&routines)?);
        return Ok(());
    }

    let exercises = holder.exercises()?;
    for routine in &routines {
        print_routine(routine, &exercises);
    }
    Ok(())
}

fn print_routine(routine: &Routine, exercises: &[Exercise]) {
    let name = &routine.name;
    let id = short_id(routine.id);
    println!("=== {name} [{id}] ===");
    for (i, slot) in routine.resolve_exercises(exercises).into_iter().enumerate() {
        let n = i + 1;
        match slot {
            Some(e) => {
                let ename = &e.name;
                let (sets, reps) = (e.sets, e.reps);
                println!("  {n}. {ename} ({sets}x{reps})");
            }
            None => println!("  {n}. {REMOVED_EXERCISE}"),
        }
    }
    println!();
}

pub(crate) fn cmd_routine_add(
    holder: &StoreHolder,
    owner: Option<&str>,
    name: &str,
    exercise_queries: &[String],
    json: bool,
) -> Result<()> {
    if name.trim().is_empty() {
        bail!("Routine name cannot be empty");
    }

    let exercises = holder.exercises()?;
    let ids = exercise_queries
        .iter()
        .map(|q| find_item(&exercises, q, "exercise", |e| e.name.as_str()).map(|e| e.id))
        .collect::<Result<Vec<_>>>()?;

    let mut routine = Routine::new(name.trim(), ids);
    routine.owner_identifier = owner.map(str::to_string);
    holder.add_routine(&routine)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&routine)?);
    } else {
        let id = short_id(routine.id);
        let count = routine.exercise_ids.len();
        let name = &routine.name;
        println!("Added routine {name} with {count} exercises [{id}]");
    }
    Ok(())
}

pub(crate) fn cmd_routine_remove(holder: &StoreHolder, query: &str, json: bool) -> Result<()> {
    let routines = holder.routines()?;
    let routine = match find_item(&routines, query, "routine", |r| r.name.as_str()) {
        Ok(routine) => routine,
        Err(e) => exit_not_found(&e, json),
    };
    holder.remove_routine(routine.id)?;

    if json {
        println!("{}", serde_json::json!({ "deleted": routine.id }));
    } else {
        let name = &routine.name;
        println!("Removed routine {name}");
    }
    Ok(())
}
