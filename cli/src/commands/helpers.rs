use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::process;
use uuid::Uuid;

use kenko_core::calendar::Calendar;
use kenko_core::models::{Identified, Ingredient};

/// Shortest id prefix accepted on the command line.
const MIN_PREFIX_LEN: usize = 4;

pub(crate) fn parse_calendar(s: &str) -> Result<Calendar> {
    s.parse::<Calendar>().map_err(anyhow::Error::msg)
}

/// `--mine` needs a signed-in user to filter on.
pub(crate) fn owner_filter(mine: bool, owner: Option<&str>) -> Result<Option<&str>> {
    match (mine, owner) {
        (false, _) => Ok(None),
        (true, Some(owner)) => Ok(Some(owner)),
        (true, None) => {
            bail!("--mine needs a signed-in user. Add a \"user\" entry to config.json")
        }
    }
}

pub(crate) fn parse_date(date_str: Option<String>, calendar: &Calendar) -> Result<NaiveDate> {
    let today = calendar.date_of(Utc::now());
    match date_str {
        None => Ok(today),
        Some(s) => match s.as_str() {
            "today" => Ok(today),
            "yesterday" => Ok(today - Duration::days(1)),
            "tomorrow" => Ok(today + Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// The instant to log at for `date`: now for today, midday otherwise.
pub(crate) fn instant_for(date: NaiveDate, calendar: &Calendar) -> DateTime<Utc> {
    let now = Utc::now();
    if calendar.date_of(now) == date {
        now
    } else {
        calendar.start_of_date(date) + Duration::hours(12)
    }
}

pub(crate) fn parse_since(since: Option<String>) -> Result<Option<DateTime<Utc>>> {
    since
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .with_context(|| {
                    format!("Invalid timestamp '{s}'. Use RFC 3339, e.g. 2024-01-15T08:00:00Z")
                })
        })
        .transpose()
}

/// Parses "name:quantity". The quantity may be empty ("Salt:").
pub(crate) fn parse_ingredient(s: &str) -> Result<Ingredient> {
    let Some((name, quantity)) = s.split_once(':') else {
        bail!("Invalid ingredient '{s}'. Use 'name:quantity', e.g. 'Chicken:120 g'");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Ingredient name cannot be empty in '{s}'");
    }
    Ok(Ingredient::new(name, quantity.trim()))
}

/// Finds one item by full id, case-insensitive name, or unique id prefix, in
/// that order.
pub(crate) fn find_item<'a, T: Identified>(
    items: &'a [T],
    query: &str,
    what: &str,
    name_of: impl Fn(&T) -> &str,
) -> Result<&'a T> {
    let query = query.trim();
    if let Ok(id) = Uuid::parse_str(query) {
        if let Some(item) = items.iter().find(|item| item.id() == id) {
            return Ok(item);
        }
        bail!("No {what} with id {id}");
    }

    let by_name: Vec<&T> = items
        .iter()
        .filter(|item| name_of(*item).eq_ignore_ascii_case(query))
        .collect();
    match by_name.as_slice() {
        [item] => return Ok(*item),
        [] => {}
        _ => bail!(
            "{} {what}s are named '{query}'. Use the id instead",
            by_name.len()
        ),
    }

    if query.len() >= MIN_PREFIX_LEN {
        let prefix = query.to_lowercase();
        let by_prefix: Vec<&T> = items
            .iter()
            .filter(|item| item.id().to_string().starts_with(&prefix))
            .collect();
        match by_prefix.as_slice() {
            [item] => return Ok(*item),
            [] => {}
            _ => bail!("Id prefix '{query}' matches more than one {what}"),
        }
    }

    bail!("No {what} found for '{query}'")
}

pub(crate) fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

/// Lookup failures exit with status 2, like an empty day.
pub(crate) fn exit_not_found(err: &anyhow::Error, json: bool) -> ! {
    if json {
        println!("{}", json_error(&err.to_string()));
    } else {
        eprintln!("{err}");
    }
    process::exit(2);
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenko_core::models::Recipe;

    #[test]
    fn test_parse_date_none() {
        let today = Calendar::Utc.date_of(Utc::now());
        assert_eq!(parse_date(None, &Calendar::Utc).unwrap(), today);
    }

    #[test]
    fn test_parse_date_keywords() {
        let today = Calendar::Utc.date_of(Utc::now());
        let cal = Calendar::Utc;
        assert_eq!(parse_date(Some("today".to_string()), &cal).unwrap(), today);
        assert_eq!(
            parse_date(Some("yesterday".to_string()), &cal).unwrap(),
            today - Duration::days(1)
        );
        assert_eq!(
            parse_date(Some("tomorrow".to_string()), &cal).unwrap(),
            today + Duration::days(1)
        );
    }

    #[test]
    fn test_parse_date_iso() {
        let date = parse_date(Some("2024-01-15".to_string()), &Calendar::Utc).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date(Some("nope".to_string()), &Calendar::Utc).is_err());
    }

    #[test]
    fn test_instant_for_past_date_is_midday() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let at = instant_for(date, &Calendar::Utc);
        assert_eq!(at.to_rfc3339(), "2024-01-15T12:00:00+00:00");
        assert_eq!(Calendar::Utc.date_of(at), date);
    }

    #[test]
    fn test_parse_calendar() {
        assert_eq!(parse_calendar("utc").unwrap(), Calendar::Utc);
        assert!(parse_calendar("Mars/Olympus").is_err());
    }

    #[test]
    fn test_owner_filter() {
        assert_eq!(owner_filter(false, None).unwrap(), None);
        assert_eq!(owner_filter(false, Some("u1")).unwrap(), None);
        assert_eq!(owner_filter(true, Some("u1")).unwrap(), Some("u1"));
        assert!(owner_filter(true, None).is_err());
    }

    #[test]
    fn test_parse_since() {
        assert!(parse_since(None).unwrap().is_none());
        let t = parse_since(Some("2024-01-15T08:00:00+02:00".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(t.to_rfc3339(), "2024-01-15T06:00:00+00:00");
        assert!(parse_since(Some("yesterday".to_string())).is_err());
    }

    #[test]
    fn test_parse_ingredient() {
        let ing = parse_ingredient("Chicken: 120 g").unwrap();
        assert_eq!(ing.name, "Chicken");
        assert_eq!(ing.quantity, "120 g");
        assert_eq!(parse_ingredient("Salt:").unwrap().quantity, "");
        assert!(parse_ingredient("Chicken").is_err());
        assert!(parse_ingredient(":1 cup").is_err());
    }

    fn title(recipe: &Recipe) -> &str {
        &recipe.title
    }

    #[test]
    fn test_find_item_by_name_id_and_prefix() {
        let wrap = Recipe::new("Chicken Caesar Wrap", "");
        let salad = Recipe::new("Greek Salad", "");
        let recipes = vec![wrap.clone(), salad.clone()];

        assert_eq!(find_item(&recipes, "greek salad", "recipe", title).unwrap().id, salad.id);
        assert_eq!(
            find_item(&recipes, &wrap.id.to_string(), "recipe", title).unwrap().id,
            wrap.id
        );
        let prefix = &wrap.id.to_string()[..8];
        assert_eq!(find_item(&recipes, prefix, "recipe", title).unwrap().id, wrap.id);
        assert!(find_item(&recipes, "Pancakes", "recipe", title).is_err());
        assert!(find_item(&recipes, &uuid::Uuid::new_v4().to_string(), "recipe", title).is_err());
    }

    #[test]
    fn test_find_item_ambiguous_name() {
        let recipes = vec![Recipe::new("Soup", ""), Recipe::new("soup", "")];
        assert!(find_item(&recipes, "Soup", "recipe", title).is_err());
    }

    #[test]
    fn test_short_id() {
        let id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        assert_eq!(short_id(id), "67e55044");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world this is long", 10), "hello w...");
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
        assert_eq!(truncate("Wrap (½)", 10), "Wrap (½)");
    }
}
