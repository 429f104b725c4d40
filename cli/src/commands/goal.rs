use anyhow::{Result, bail};

use kenko_core::holder::StoreHolder;
use kenko_core::models::DailyGoal;
use kenko_core::store::DataStore;

pub(crate) fn cmd_goal_show(holder: &StoreHolder, json: bool) -> Result<()> {
    let goal = holder.daily_goal()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&goal)?);
    } else {
        let cal = goal.calories;
        println!("Daily goal: {cal} kcal");
    }
    Ok(())
}

pub(crate) fn cmd_goal_set(holder: &StoreHolder, calories: i64, json: bool) -> Result<()> {
    if calories <= 0 {
        bail!("Calorie goal must be greater than 0");
    }

    let goal = DailyGoal { calories };
    holder.set_daily_goal(goal)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&goal)?);
    } else {
        println!("Daily goal set to {calories} kcal");
    }
    Ok(())
}
