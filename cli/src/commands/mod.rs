mod demo;
mod entry;
mod exercise;
mod goal;
mod helpers;
mod recipe;
mod sync;

pub(crate) use demo::cmd_demo;
pub(crate) use entry::{cmd_delete, cmd_log, cmd_today, cmd_update};
pub(crate) use exercise::{
    cmd_exercise_add, cmd_exercise_list, cmd_exercise_remove, cmd_routine_add, cmd_routine_list,
    cmd_routine_remove,
};
pub(crate) use goal::{cmd_goal_set, cmd_goal_show};
pub(crate) use helpers::{owner_filter, parse_calendar};
pub(crate) use recipe::{
    RecipeEdit, cmd_recipe_add, cmd_recipe_edit, cmd_recipe_list, cmd_recipe_remove,
    cmd_recipe_show,
};
pub(crate) use sync::{cmd_sync_apply, cmd_sync_export};
