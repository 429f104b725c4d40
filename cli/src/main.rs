mod commands;
mod config;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{
    RecipeEdit, cmd_delete, cmd_demo, cmd_exercise_add, cmd_exercise_list, cmd_exercise_remove,
    cmd_goal_set, cmd_goal_show, cmd_log, cmd_recipe_add, cmd_recipe_edit, cmd_recipe_list,
    cmd_recipe_remove, cmd_recipe_show, cmd_routine_add, cmd_routine_list, cmd_routine_remove,
    cmd_sync_apply, cmd_sync_export, cmd_today, cmd_update, owner_filter, parse_calendar,
};
use crate::config::Config;
use kenko_core::db::Database;
use kenko_core::holder::StoreHolder;

#[derive(Parser)]
#[command(
    name = "kenko",
    version,
    about = "A local-first calorie and workout tracker",
    long_about = "A local-first calorie and workout tracker.\n\n\
        Entries, recipes, exercises, routines and the daily goal live in one\n\
        SQLite file. Set RUST_LOG=debug to see what the store is doing."
)]
struct Cli {
    /// Calendar used for day boundaries: local, utc, +HH:MM, or an IANA zone
    #[arg(long, global = true, default_value = "local")]
    tz: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log calories, either a free-form item or a serving of a saved recipe
    Log {
        /// What you ate, or the recipe name/id with --recipe
        title: String,
        /// Calories (optional with --recipe, defaults to one serving)
        calories: Option<i64>,
        /// Treat TITLE as a saved recipe
        #[arg(short, long)]
        recipe: bool,
        /// Date to log for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a day's entries against the goal
    Today {
        /// Date to show (YYYY-MM-DD, today, yesterday; default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change the title or calories of an entry
    Update {
        /// Entry id (or a unique prefix)
        entry_id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        calories: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an entry
    Delete {
        /// Entry id (or a unique prefix)
        entry_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or set the daily calorie goal
    Goal {
        #[command(subcommand)]
        command: GoalCommands,
    },
    /// Manage recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Manage exercises
    Exercise {
        #[command(subcommand)]
        command: ExerciseCommands,
    },
    /// Manage workout routines
    Routine {
        #[command(subcommand)]
        command: RoutineCommands,
    },
    /// Exchange changes with another replica through the sync container
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Show a day built from sample data, without touching the store
    Demo {
        /// Copy the sample data into the store instead
        #[arg(long)]
        seed: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum GoalCommands {
    /// Show the current daily goal
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Set the daily goal in kcal
    Set {
        calories: i64,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// List recipes
    List {
        /// Only recipes created by the configured user
        #[arg(long)]
        mine: bool,
        /// Only recipes with this tag (e.g. vegan, gluten-free)
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Add a recipe
    Add {
        title: String,
        /// Method / instructions
        #[arg(long, default_value = "")]
        body: String,
        /// Calories per serving
        #[arg(long)]
        calories: Option<i64>,
        /// Dietary tag, repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Ingredient as "name:quantity", repeatable
        #[arg(short, long = "ingredient")]
        ingredients: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe with its ingredients
    Show {
        /// Recipe name or id
        recipe: String,
        #[arg(long)]
        json: bool,
    },
    /// Replace a recipe's fields; ingredients given here replace the whole set
    Edit {
        /// Recipe name or id
        recipe: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        body: Option<String>,
        #[arg(long)]
        calories: Option<i64>,
        /// Dietary tag, repeatable; replaces the whole tag set
        #[arg(long = "tag", conflicts_with = "clear_tags")]
        tags: Vec<String>,
        /// Remove every tag
        #[arg(long)]
        clear_tags: bool,
        #[arg(long = "ingredient")]
        ingredients: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe and its ingredients
    Remove {
        /// Recipe name or id
        recipe: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ExerciseCommands {
    /// List exercises
    List {
        #[arg(long)]
        mine: bool,
        #[arg(long)]
        json: bool,
    },
    /// Add an exercise
    Add {
        name: String,
        #[arg(long, default_value = "3")]
        sets: u32,
        #[arg(long, default_value = "10")]
        reps: u32,
        #[arg(long)]
        instructions: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Delete an exercise (routines keep a placeholder)
    Remove {
        /// Exercise name or id
        exercise: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RoutineCommands {
    /// List routines with their exercises
    List {
        #[arg(long)]
        mine: bool,
        #[arg(long)]
        json: bool,
    },
    /// Add a routine from existing exercises, in order
    Add {
        name: String,
        /// Exercise names or ids
        #[arg(required = true)]
        exercises: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Delete a routine
    Remove {
        /// Routine name or id
        routine: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Write local changes as a JSON payload
    Export {
        /// Only changes after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<String>,
        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// Merge a payload exported by another replica ("-" reads stdin)
    Apply {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let calendar = parse_calendar(&cli.tz)?;

    // The demo never opens the store unless asked to seed it.
    if let Commands::Demo { seed: false, json } = cli.command {
        return cmd_demo(None, &calendar, json);
    }

    let config = Config::load()?;
    let db = Arc::new(
        Database::open(&config.data_dir, &config.store)
            .context("Failed to open the kenko store")?,
    );
    let holder = StoreHolder::new(db.clone());
    let owner = config.user.as_ref().map(|u| u.identifier.as_str());

    match cli.command {
        Commands::Log {
            title,
            calories,
            recipe,
            date,
            json,
        } => cmd_log(&holder, &calendar, &title, calories, recipe, date, json),
        Commands::Today { date, json } => cmd_today(&holder, &calendar, date, json),
        Commands::Update {
            entry_id,
            title,
            calories,
            json,
        } => cmd_update(&holder, &entry_id, title, calories, json),
        Commands::Delete { entry_id, json } => cmd_delete(&holder, &entry_id, json),
        Commands::Goal { command } => match command {
            GoalCommands::Show { json } => cmd_goal_show(&holder, json),
            GoalCommands::Set { calories, json } => cmd_goal_set(&holder, calories, json),
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::List { mine, tag, json } => {
                cmd_recipe_list(&holder, owner_filter(mine, owner)?, tag, json)
            }
            RecipeCommands::Add {
                title,
                body,
                calories,
                tags,
                ingredients,
                json,
            } => cmd_recipe_add(
                &holder,
                owner,
                &title,
                &body,
                calories,
                &tags,
                &ingredients,
                json,
            ),
            RecipeCommands::Show { recipe, json } => cmd_recipe_show(&holder, &recipe, json),
            RecipeCommands::Edit {
                recipe,
                title,
                body,
                calories,
                tags,
                clear_tags,
                ingredients,
                json,
            } => cmd_recipe_edit(
                &holder,
                &recipe,
                RecipeEdit {
                    title,
                    body,
                    calories,
                    tags: (clear_tags || !tags.is_empty()).then_some(tags),
                    ingredients,
                },
                json,
            ),
            RecipeCommands::Remove { recipe, json } => cmd_recipe_remove(&holder, &recipe, json),
        },
        Commands::Exercise { command } => match command {
            ExerciseCommands::List { mine, json } => {
                cmd_exercise_list(&holder, owner_filter(mine, owner)?, json)
            }
            ExerciseCommands::Add {
                name,
                sets,
                reps,
                instructions,
                json,
            } => cmd_exercise_add(&holder, owner, &name, sets, reps, instructions, json),
            ExerciseCommands::Remove { exercise, json } => {
                cmd_exercise_remove(&holder, &exercise, json)
            }
        },
        Commands::Routine { command } => match command {
            RoutineCommands::List { mine, json } => {
                cmd_routine_list(&holder, owner_filter(mine, owner)?, json)
            }
            RoutineCommands::Add {
                name,
                exercises,
                json,
            } => cmd_routine_add(&holder, owner, &name, &exercises, json),
            RoutineCommands::Remove { routine, json } => {
                cmd_routine_remove(&holder, &routine, json)
            }
        },
        Commands::Sync { command } => match command {
            SyncCommands::Export { since, out } => cmd_sync_export(&db, since, out.as_deref()),
            SyncCommands::Apply { file, json } => cmd_sync_apply(&db, &holder, &file, json),
        },
        Commands::Demo { json, .. } => cmd_demo(Some(&holder), &calendar, json),
    }
}
