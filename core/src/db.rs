//! Durable backend on SQLite.
//!
//! One connection behind a mutex; every operation holds the lock until it has
//! finished, and multi-row mutations run in a single transaction. Rows carry a
//! surrogate integer key next to the entity's uuid, so duplicate ids are
//! stored as-is: updates touch the first matching row and removals delete all
//! of them. `logged_at` is kept to nanosecond precision, so the store returns
//! exactly the instant it was given.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Params, Row, params, params_from_iter};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calendar::Calendar;
use crate::config::{StoreConfig, SyncMode};
use crate::error::{DecodeError, StoreError, StoreResult};
use crate::models::{
    CalorieEntry, DailyGoal, Exercise, Identified, Ingredient, Recipe, RecipeTag, Routine,
};
use crate::store::{DataStore, Durability};
use crate::sync::{
    FieldClock, MergeSummary, RecordKind, SyncPayload, SyncRecord, SyncTombstone, from_fields,
    merge_fields, to_fields,
};

const SCHEMA_VERSION: i64 = 2;

pub struct Database {
    conn: Mutex<Connection>,
    sync: SyncMode,
}

impl Database {
    /// Opens (creating if needed) `<data_dir>/<name>.sqlite`. The directory
    /// must already exist.
    pub fn open(data_dir: &Path, config: &StoreConfig) -> StoreResult<Self> {
        let path = data_dir.join(config.file_name());
        let conn = Connection::open(&path).map_err(|source| StoreError::Open {
            path: path.clone(),
            source,
        })?;
        Self::init(conn, config, path)
    }

    /// A local-only store that lives as long as the value.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open_in_memory_with(&StoreConfig::default())
    }

    pub fn open_in_memory_with(config: &StoreConfig) -> StoreResult<Self> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: path.clone(),
            source,
        })?;
        Self::init(conn, config, path)
    }

    fn init(conn: Connection, config: &StoreConfig, path: PathBuf) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|source| StoreError::Open {
                path: path.clone(),
                source,
            })?;
        migrate(&conn).map_err(StoreError::Migration)?;
        let sync = config.sync_mode();
        info!(path = %path.display(), sync = ?sync, "opened store");
        Ok(Self {
            conn: Mutex::new(conn),
            sync,
        })
    }

    #[must_use]
    pub fn sync_mode(&self) -> &SyncMode {
        &self.sync
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // --- Generic entity operations ---

    fn all<T: SyncedTable>(&self) -> StoreResult<Vec<T>> {
        let conn = self.lock()?;
        Ok(T::select(&conn, &Filter::All)?
            .into_iter()
            .map(|stored| stored.value)
            .collect())
    }

    fn add<T: SyncedTable>(&self, value: &T) -> StoreResult<()> {
        let clock = FieldClock::stamped(&to_fields(value, T::KIND.as_str())?, now_millis());
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        T::insert(&tx, value, &clock)?;
        tx.commit()?;
        debug!(kind = %T::KIND, id = %value.id(), "added");
        Ok(())
    }

    fn update<T: SyncedTable>(&self, value: &T) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let Some(current) = T::select(&tx, &Filter::Id(value.id()))?.into_iter().next() else {
            debug!(kind = %T::KIND, id = %value.id(), "update of unknown record ignored");
            return Ok(());
        };
        let next = T::updated(&current.value, value);
        let old = to_fields(&current.value, T::KIND.as_str())?;
        let new = to_fields(&next, T::KIND.as_str())?;
        let mut clock = current.clock;
        let at = clock.next_stamp();
        if clock.stamp_changed(&old, &new, at) {
            T::overwrite(&tx, current.rowid, &next, &clock)?;
            debug!(kind = %T::KIND, id = %value.id(), "updated");
        }
        tx.commit()?;
        Ok(())
    }

    fn remove<T: SyncedTable>(&self, id: Uuid) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let latest: Option<i64> = tx.query_row(
            &format!("SELECT MAX(updated_at) FROM {} WHERE uuid = ?1", T::TABLE),
            params![id.to_string()],
            |row| row.get(0),
        )?;
        let Some(latest) = latest else {
            return Ok(());
        };
        tx.execute(
            &format!("DELETE FROM {} WHERE uuid = ?1", T::TABLE),
            params![id.to_string()],
        )?;
        if self.sync.is_remote() {
            record_tombstone(&tx, T::KIND, id, now_millis().max(latest))?;
        }
        tx.commit()?;
        debug!(kind = %T::KIND, %id, "removed");
        Ok(())
    }

    // --- Sync support ---

    fn require_sync(&self) -> StoreResult<()> {
        if self.sync.is_remote() {
            Ok(())
        } else {
            Err(StoreError::SyncDisabled)
        }
    }

    /// Stable id of this store, created on first use.
    pub fn device_id(&self) -> StoreResult<String> {
        let conn = self.lock()?;
        get_or_create_device_id(&conn)
    }

    /// Every record written after `since` (all records when `None`) and every
    /// tombstone recorded after it.
    pub fn changes_since(&self, since: Option<DateTime<Utc>>) -> StoreResult<SyncPayload> {
        self.require_sync()?;
        let conn = self.lock()?;
        let filter = since.map_or(Filter::All, |t| Filter::UpdatedAfter(t.timestamp_millis()));

        let mut records = Vec::new();
        collect_records::<CalorieEntry>(&conn, &filter, &mut records)?;
        collect_records::<Recipe>(&conn, &filter, &mut records)?;
        collect_records::<Exercise>(&conn, &filter, &mut records)?;
        collect_records::<Routine>(&conn, &filter, &mut records)?;
        if let Some((goal, clock)) = load_goal(&conn)? {
            if since.is_none_or(|t| clock.latest() > t.timestamp_millis()) {
                records.push(SyncRecord {
                    kind: RecordKind::DailyGoal,
                    id: None,
                    fields: to_fields(&goal, "daily goal")?,
                    clock,
                });
            }
        }

        let since_ms = since.map_or(i64::MIN, |t| t.timestamp_millis());
        let tombstones = query_decoded(
            &conn,
            "SELECT uuid, kind, deleted_at FROM sync_tombstones WHERE deleted_at > ?1 ORDER BY id",
            params![since_ms],
            "tombstone",
            tombstone_from_row,
        )?;

        Ok(SyncPayload {
            device_id: get_or_create_device_id(&conn)?,
            records,
            tombstones,
            generated_at: Utc::now(),
        })
    }

    /// Merges a payload from another replica in one transaction. Records are
    /// merged field by field; a tombstone deletes the local record unless it
    /// was written after the deletion.
    pub fn apply_remote_changes(&self, payload: &SyncPayload) -> StoreResult<MergeSummary> {
        self.require_sync()?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut summary = MergeSummary::default();

        for record in &payload.records {
            match record.kind {
                RecordKind::Entry => merge_record::<CalorieEntry>(&tx, record, &mut summary)?,
                RecordKind::Recipe => merge_record::<Recipe>(&tx, record, &mut summary)?,
                RecordKind::Exercise => merge_record::<Exercise>(&tx, record, &mut summary)?,
                RecordKind::Routine => merge_record::<Routine>(&tx, record, &mut summary)?,
                RecordKind::DailyGoal => merge_goal(&tx, record, &mut summary)?,
            }
        }
        for tombstone in &payload.tombstones {
            if apply_tombstone(&tx, tombstone)? {
                summary.deleted += 1;
            }
        }

        tx.commit()?;
        info!(
            device = %payload.device_id,
            inserted = summary.inserted,
            merged = summary.merged,
            deleted = summary.deleted,
            skipped = summary.skipped,
            "applied remote changes"
        );
        Ok(summary)
    }
}

impl DataStore for Database {
    fn durability(&self) -> Durability {
        Durability::Persistent
    }

    fn entries(&self) -> StoreResult<Vec<CalorieEntry>> {
        self.all()
    }

    fn entries_on_day(
        &self,
        at: DateTime<Utc>,
        calendar: &Calendar,
    ) -> StoreResult<Vec<CalorieEntry>> {
        let (start, end) = calendar.day_range(at);
        let conn = self.lock()?;
        let day = query_decoded(
            &conn,
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM calorie_entries
                 WHERE logged_at >= ?1 AND logged_at < ?2
                 ORDER BY logged_at DESC, id"
            ),
            params![saturating_nanos(start), saturating_nanos(end)],
            "entry",
            entry_from_row,
        )?;
        Ok(day.into_iter().map(|stored| stored.value).collect())
    }

    fn add_entry(&self, entry: &CalorieEntry) -> StoreResult<()> {
        self.add(entry)
    }

    fn update_entry(&self, entry: &CalorieEntry) -> StoreResult<()> {
        self.update(entry)
    }

    fn remove_entry(&self, id: Uuid) -> StoreResult<()> {
        self.remove::<CalorieEntry>(id)
    }

    fn recipes(&self) -> StoreResult<Vec<Recipe>> {
        self.all()
    }

    fn add_recipe(&self, recipe: &Recipe) -> StoreResult<()> {
        self.add(recipe)
    }

    fn update_recipe(&self, recipe: &Recipe) -> StoreResult<()> {
        self.update(recipe)
    }

    fn remove_recipe(&self, id: Uuid) -> StoreResult<()> {
        self.remove::<Recipe>(id)
    }

    fn exercises(&self) -> StoreResult<Vec<Exercise>> {
        self.all()
    }

    fn add_exercise(&self, exercise: &Exercise) -> StoreResult<()> {
        self.add(exercise)
    }

    fn update_exercise(&self, exercise: &Exercise) -> StoreResult<()> {
        self.update(exercise)
    }

    fn remove_exercise(&self, id: Uuid) -> StoreResult<()> {
        self.remove::<Exercise>(id)
    }

    fn routines(&self) -> StoreResult<Vec<Routine>> {
        self.all()
    }

    fn add_routine(&self, routine: &Routine) -> StoreResult<()> {
        self.add(routine)
    }

    fn update_routine(&self, routine: &Routine) -> StoreResult<()> {
        self.update(routine)
    }

    fn remove_routine(&self, id: Uuid) -> StoreResult<()> {
        self.remove::<Routine>(id)
    }

    fn daily_goal(&self) -> StoreResult<DailyGoal> {
        let conn = self.lock()?;
        if let Some((goal, _)) = load_goal(&conn)? {
            return Ok(goal);
        }
        // Stamped at 0 so any goal set on another replica wins over the default.
        let goal = DailyGoal::default();
        let clock = FieldClock::stamped(&to_fields(&goal, "daily goal")?, 0);
        write_goal(&conn, goal, &clock)?;
        info!(calories = goal.calories, "provisioned default daily goal");
        Ok(goal)
    }

    fn set_daily_goal(&self, goal: DailyGoal) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let (current, mut clock) = load_goal(&tx)?.unwrap_or_default();
        let at = clock.next_stamp();
        clock.stamp_changed(
            &to_fields(&current, "daily goal")?,
            &to_fields(&goal, "daily goal")?,
            at,
        );
        write_goal(&tx, goal, &clock)?;
        tx.commit()?;
        debug!(calories = goal.calories, "set daily goal");
        Ok(())
    }
}

// --- Schema ---

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(
            "BEGIN;

            CREATE TABLE IF NOT EXISTS calorie_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL,
                logged_at INTEGER NOT NULL,
                title TEXT NOT NULL,
                calories INTEGER NOT NULL,
                source TEXT NOT NULL,
                recipe_uuid TEXT,
                field_clock TEXT NOT NULL DEFAULT '{}',
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_calorie_entries_uuid ON calorie_entries(uuid);
            CREATE INDEX IF NOT EXISTS idx_calorie_entries_logged_at ON calorie_entries(logged_at);

            CREATE TABLE IF NOT EXISTS recipes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL DEFAULT '',
                calories_per_serving INTEGER,
                tags TEXT NOT NULL DEFAULT '[]',
                owner_identifier TEXT,
                field_clock TEXT NOT NULL DEFAULT '{}',
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_recipes_uuid ON recipes(uuid);

            CREATE TABLE IF NOT EXISTS ingredients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL,
                recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                quantity TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_ingredients_recipe ON ingredients(recipe_id);

            CREATE TABLE IF NOT EXISTS exercises (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL,
                name TEXT NOT NULL,
                sets INTEGER NOT NULL,
                reps INTEGER NOT NULL,
                instructions TEXT,
                owner_identifier TEXT,
                field_clock TEXT NOT NULL DEFAULT '{}',
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_exercises_uuid ON exercises(uuid);

            CREATE TABLE IF NOT EXISTS routines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL,
                name TEXT NOT NULL,
                exercise_ids TEXT NOT NULL DEFAULT '[]',
                owner_identifier TEXT,
                field_clock TEXT NOT NULL DEFAULT '{}',
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_routines_uuid ON routines(uuid);

            CREATE TABLE IF NOT EXISTS daily_goal (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                calories INTEGER NOT NULL,
                field_clock TEXT NOT NULL DEFAULT '{}',
                updated_at INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS sync_tombstones (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL,
                kind TEXT NOT NULL,
                deleted_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sync_tombstones_uuid ON sync_tombstones(uuid);

            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            PRAGMA user_version = 1;
            COMMIT;",
        )?;
        info!(version = 1, "migrated store schema");
    }

    if version < 2 {
        // logged_at moves from milliseconds to nanoseconds.
        conn.execute_batch(
            "BEGIN;
            UPDATE calorie_entries SET logged_at = logged_at * 1000000;
            PRAGMA user_version = 2;
            COMMIT;",
        )?;
        info!(version = SCHEMA_VERSION, "migrated store schema");
    }

    Ok(())
}

// --- Per-table mapping ---

/// A decoded row plus the bookkeeping that never leaves this module.
struct Stored<T> {
    rowid: i64,
    value: T,
    clock: FieldClock,
}

enum Filter {
    All,
    Id(Uuid),
    UpdatedAfter(i64),
}

impl Filter {
    fn clause(&self) -> &'static str {
        match self {
            Filter::All => "",
            Filter::Id(_) => "WHERE uuid = ?1",
            Filter::UpdatedAfter(_) => "WHERE updated_at > ?1",
        }
    }

    fn params(&self) -> Vec<Value> {
        match self {
            Filter::All => Vec::new(),
            Filter::Id(id) => vec![Value::Text(id.to_string())],
            Filter::UpdatedAfter(ms) => vec![Value::Integer(*ms)],
        }
    }
}

/// A family stored in its own table with a uuid, a field clock and an
/// `updated_at` column.
trait SyncedTable: Identified + Clone + Serialize + DeserializeOwned {
    const KIND: RecordKind;
    const TABLE: &'static str;

    /// Matching rows in insertion order.
    fn select(conn: &Connection, filter: &Filter) -> StoreResult<Vec<Stored<Self>>>;

    fn insert(conn: &Connection, value: &Self, clock: &FieldClock) -> StoreResult<()>;

    fn overwrite(
        conn: &Connection,
        rowid: i64,
        value: &Self,
        clock: &FieldClock,
    ) -> StoreResult<()>;

    /// The value an update leaves in place of `current`.
    fn updated(_current: &Self, incoming: &Self) -> Self {
        incoming.clone()
    }
}

const ENTRY_COLUMNS: &str = "id, uuid, logged_at, title, calories, source, recipe_uuid, field_clock";

impl SyncedTable for CalorieEntry {
    const KIND: RecordKind = RecordKind::Entry;
    const TABLE: &'static str = "calorie_entries";

    fn select(conn: &Connection, filter: &Filter) -> StoreResult<Vec<Stored<Self>>> {
        query_decoded(
            conn,
            &select_sql(ENTRY_COLUMNS, Self::TABLE, filter),
            params_from_iter(filter.params()),
            "entry",
            entry_from_row,
        )
    }

    fn insert(conn: &Connection, entry: &Self, clock: &FieldClock) -> StoreResult<()> {
        conn.execute(
            "INSERT INTO calorie_entries
             (uuid, logged_at, title, calories, source, recipe_uuid, field_clock, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id.to_string(),
                to_nanos(entry.logged_at)?,
                entry.title,
                entry.calories,
                entry.source.as_str(),
                entry.recipe_id.map(|id| id.to_string()),
                encode(clock, "field clock")?,
                clock.latest(),
            ],
        )?;
        Ok(())
    }

    fn overwrite(
        conn: &Connection,
        rowid: i64,
        entry: &Self,
        clock: &FieldClock,
    ) -> StoreResult<()> {
        conn.execute(
            "UPDATE calorie_entries SET logged_at = ?1, title = ?2, calories = ?3, source = ?4,
             recipe_uuid = ?5, field_clock = ?6, updated_at = ?7 WHERE id = ?8",
            params![
                to_nanos(entry.logged_at)?,
                entry.title,
                entry.calories,
                entry.source.as_str(),
                entry.recipe_id.map(|id| id.to_string()),
                encode(clock, "field clock")?,
                clock.latest(),
                rowid,
            ],
        )?;
        Ok(())
    }

    fn updated(current: &Self, incoming: &Self) -> Self {
        CalorieEntry {
            logged_at: current.logged_at,
            ..incoming.clone()
        }
    }
}

const RECIPE_COLUMNS: &str =
    "id, uuid, title, body, calories_per_serving, tags, owner_identifier, field_clock";

impl SyncedTable for Recipe {
    const KIND: RecordKind = RecordKind::Recipe;
    const TABLE: &'static str = "recipes";

    fn select(conn: &Connection, filter: &Filter) -> StoreResult<Vec<Stored<Self>>> {
        let mut recipes = query_decoded(
            conn,
            &select_sql(RECIPE_COLUMNS, Self::TABLE, filter),
            params_from_iter(filter.params()),
            "recipe",
            recipe_from_row,
        )?;
        for stored in &mut recipes {
            stored.value.ingredients = query_decoded(
                conn,
                "SELECT uuid, name, quantity FROM ingredients WHERE recipe_id = ?1 ORDER BY id",
                params![stored.rowid],
                "ingredient",
                ingredient_from_row,
            )?;
        }
        Ok(recipes)
    }

    fn insert(conn: &Connection, recipe: &Self, clock: &FieldClock) -> StoreResult<()> {
        conn.execute(
            "INSERT INTO recipes
             (uuid, title, body, calories_per_serving, tags, owner_identifier, field_clock, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                recipe.id.to_string(),
                recipe.title,
                recipe.body,
                recipe.calories_per_serving,
                encode(&recipe.tags, "recipe tags")?,
                recipe.owner_identifier,
                encode(clock, "field clock")?,
                clock.latest(),
            ],
        )?;
        insert_ingredients(conn, conn.last_insert_rowid(), &recipe.ingredients)
    }

    fn overwrite(
        conn: &Connection,
        rowid: i64,
        recipe: &Self,
        clock: &FieldClock,
    ) -> StoreResult<()> {
        conn.execute(
            "UPDATE recipes SET title = ?1, body = ?2, calories_per_serving = ?3, tags = ?4,
             owner_identifier = ?5, field_clock = ?6, updated_at = ?7 WHERE id = ?8",
            params![
                recipe.title,
                recipe.body,
                recipe.calories_per_serving,
                encode(&recipe.tags, "recipe tags")?,
                recipe.owner_identifier,
                encode(clock, "field clock")?,
                clock.latest(),
                rowid,
            ],
        )?;
        // The ingredient set is replaced wholesale.
        conn.execute(
            "DELETE FROM ingredients WHERE recipe_id = ?1",
            params![rowid],
        )?;
        insert_ingredients(conn, rowid, &recipe.ingredients)
    }
}

fn insert_ingredients(conn: &Connection, recipe_rowid: i64, items: &[Ingredient]) -> StoreResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO ingredients (uuid, recipe_id, name, quantity) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for item in items {
        stmt.execute(params![
            item.id.to_string(),
            recipe_rowid,
            item.name,
            item.quantity
        ])?;
    }
    Ok(())
}

const EXERCISE_COLUMNS: &str =
    "id, uuid, name, sets, reps, instructions, owner_identifier, field_clock";

impl SyncedTable for Exercise {
    const KIND: RecordKind = RecordKind::Exercise;
    const TABLE: &'static str = "exercises";

    fn select(conn: &Connection, filter: &Filter) -> StoreResult<Vec<Stored<Self>>> {
        query_decoded(
            conn,
            &select_sql(EXERCISE_COLUMNS, Self::TABLE, filter),
            params_from_iter(filter.params()),
            "exercise",
            exercise_from_row,
        )
    }

    fn insert(conn: &Connection, exercise: &Self, clock: &FieldClock) -> StoreResult<()> {
        conn.execute(
            "INSERT INTO exercises
             (uuid, name, sets, reps, instructions, owner_identifier, field_clock, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                exercise.id.to_string(),
                exercise.name,
                exercise.sets,
                exercise.reps,
                exercise.instructions,
                exercise.owner_identifier,
                encode(clock, "field clock")?,
                clock.latest(),
            ],
        )?;
        Ok(())
    }

    fn overwrite(
        conn: &Connection,
        rowid: i64,
        exercise: &Self,
        clock: &FieldClock,
    ) -> StoreResult<()> {
        conn.execute(
            "UPDATE exercises SET name = ?1, sets = ?2, reps = ?3, instructions = ?4,
             owner_identifier = ?5, field_clock = ?6, updated_at = ?7 WHERE id = ?8",
            params![
                exercise.name,
                exercise.sets,
                exercise.reps,
                exercise.instructions,
                exercise.owner_identifier,
                encode(clock, "field clock")?,
                clock.latest(),
                rowid,
            ],
        )?;
        Ok(())
    }
}

const ROUTINE_COLUMNS: &str = "id, uuid, name, exercise_ids, owner_identifier, field_clock";

impl SyncedTable for Routine {
    const KIND: RecordKind = RecordKind::Routine;
    const TABLE: &'static str = "routines";

    fn select(conn: &Connection, filter: &Filter) -> StoreResult<Vec<Stored<Self>>> {
        query_decoded(
            conn,
            &select_sql(ROUTINE_COLUMNS, Self::TABLE, filter),
            params_from_iter(filter.params()),
            "routine",
            routine_from_row,
        )
    }

    fn insert(conn: &Connection, routine: &Self, clock: &FieldClock) -> StoreResult<()> {
        conn.execute(
            "INSERT INTO routines (uuid, name, exercise_ids, owner_identifier, field_clock, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                routine.id.to_string(),
                routine.name,
                encode(&routine.exercise_ids, "routine exercise ids")?,
                routine.owner_identifier,
                encode(clock, "field clock")?,
                clock.latest(),
            ],
        )?;
        Ok(())
    }

    fn overwrite(
        conn: &Connection,
        rowid: i64,
        routine: &Self,
        clock: &FieldClock,
    ) -> StoreResult<()> {
        conn.execute(
            "UPDATE routines SET name = ?1, exercise_ids = ?2, owner_identifier = ?3,
             field_clock = ?4, updated_at = ?5 WHERE id = ?6",
            params![
                routine.name,
                encode(&routine.exercise_ids, "routine exercise ids")?,
                routine.owner_identifier,
                encode(clock, "field clock")?,
                clock.latest(),
                rowid,
            ],
        )?;
        Ok(())
    }
}

// --- Row mapping helpers ---

fn select_sql(columns: &str, table: &str, filter: &Filter) -> String {
    format!("SELECT {columns} FROM {table} {} ORDER BY id", filter.clause())
}

/// Runs `sql` and decodes every row, logging and skipping the ones that fail.
fn query_decoded<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    what: &'static str,
    decode: fn(&Row<'_>) -> Result<T, DecodeError>,
) -> StoreResult<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| Ok(decode(row)))?;
    let mut decoded = Vec::new();
    for row in rows {
        match row? {
            Ok(value) => decoded.push(value),
            Err(e) => warn!(kind = what, error = %e, "skipping unreadable row"),
        }
    }
    Ok(decoded)
}

fn parse_uuid(s: &str) -> Result<Uuid, DecodeError> {
    Uuid::parse_str(s).map_err(|_| DecodeError::Uuid(s.to_string()))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::from_timestamp_millis(ms).ok_or(DecodeError::Timestamp(ms))
}

fn parse_clock(json: &str) -> Result<FieldClock, DecodeError> {
    Ok(serde_json::from_str(json)?)
}

fn encode<T: Serialize + ?Sized>(value: &T, what: &'static str) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|source| StoreError::Encode { what, source })
}

fn to_nanos(at: DateTime<Utc>) -> StoreResult<i64> {
    at.timestamp_nanos_opt()
        .ok_or(StoreError::TimestampOutOfRange(at))
}

/// Range bound for instants outside what nanoseconds can hold.
fn saturating_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt()
        .unwrap_or(if at.timestamp() > 0 { i64::MAX } else { i64::MIN })
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// Expects ENTRY_COLUMNS.
fn entry_from_row(row: &Row<'_>) -> Result<Stored<CalorieEntry>, DecodeError> {
    let recipe_id = row
        .get::<_, Option<String>>(6)?
        .map(|s| parse_uuid(&s))
        .transpose()?;
    Ok(Stored {
        rowid: row.get(0)?,
        value: CalorieEntry {
            id: parse_uuid(&row.get::<_, String>(1)?)?,
            logged_at: DateTime::from_timestamp_nanos(row.get(2)?),
            title: row.get(3)?,
            calories: row.get(4)?,
            source: row.get::<_, String>(5)?.parse()?,
            recipe_id,
        },
        clock: parse_clock(&row.get::<_, String>(7)?)?,
    })
}

// Expects RECIPE_COLUMNS; ingredients are filled in by the caller.
fn recipe_from_row(row: &Row<'_>) -> Result<Stored<Recipe>, DecodeError> {
    let tags: Vec<RecipeTag> = serde_json::from_str(&row.get::<_, String>(5)?)?;
    Ok(Stored {
        rowid: row.get(0)?,
        value: Recipe {
            id: parse_uuid(&row.get::<_, String>(1)?)?,
            title: row.get(2)?,
            body: row.get(3)?,
            calories_per_serving: row.get(4)?,
            tags,
            ingredients: Vec::new(),
            owner_identifier: row.get(6)?,
        },
        clock: parse_clock(&row.get::<_, String>(7)?)?,
    })
}

fn ingredient_from_row(row: &Row<'_>) -> Result<Ingredient, DecodeError> {
    Ok(Ingredient {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        quantity: row.get(2)?,
    })
}

// Expects EXERCISE_COLUMNS.
fn exercise_from_row(row: &Row<'_>) -> Result<Stored<Exercise>, DecodeError> {
    Ok(Stored {
        rowid: row.get(0)?,
        value: Exercise {
            id: parse_uuid(&row.get::<_, String>(1)?)?,
            name: row.get(2)?,
            sets: row.get(3)?,
            reps: row.get(4)?,
            instructions: row.get(5)?,
            owner_identifier: row.get(6)?,
        },
        clock: parse_clock(&row.get::<_, String>(7)?)?,
    })
}

// Expects ROUTINE_COLUMNS.
fn routine_from_row(row: &Row<'_>) -> Result<Stored<Routine>, DecodeError> {
    let exercise_ids: Vec<Uuid> = serde_json::from_str(&row.get::<_, String>(3)?)?;
    Ok(Stored {
        rowid: row.get(0)?,
        value: Routine {
            id: parse_uuid(&row.get::<_, String>(1)?)?,
            name: row.get(2)?,
            exercise_ids,
            owner_identifier: row.get(4)?,
        },
        clock: parse_clock(&row.get::<_, String>(5)?)?,
    })
}

fn tombstone_from_row(row: &Row<'_>) -> Result<SyncTombstone, DecodeError> {
    Ok(SyncTombstone {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        kind: row.get::<_, String>(1)?.parse()?,
        deleted_at: from_millis(row.get(2)?)?,
    })
}

// --- Daily goal ---

/// `None` when no goal is stored, or when the stored one cannot be read.
fn load_goal(conn: &Connection) -> StoreResult<Option<(DailyGoal, FieldClock)>> {
    let row = conn
        .query_row(
            "SELECT calories, field_clock FROM daily_goal WHERE id = 1",
            [],
            |row| Ok((row.get::<_, i64>(0), row.get::<_, String>(1))),
        )
        .optional()?;
    let Some((calories, clock)) = row else {
        return Ok(None);
    };
    let calories = match calories {
        Ok(calories) => calories,
        Err(e) => {
            warn!(error = %e, "unreadable daily goal, treating as absent");
            return Ok(None);
        }
    };
    let clock = clock
        .map_err(DecodeError::from)
        .and_then(|clock| parse_clock(&clock))
        .unwrap_or_else(|e| {
            warn!(error = %e, "unreadable daily goal clock, treating as never written");
            FieldClock::default()
        });
    Ok(Some((DailyGoal { calories }, clock)))
}

fn write_goal(conn: &Connection, goal: DailyGoal, clock: &FieldClock) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO daily_goal (id, calories, field_clock, updated_at) VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
             calories = excluded.calories,
             field_clock = excluded.field_clock,
             updated_at = excluded.updated_at",
        params![goal.calories, encode(clock, "field clock")?, clock.latest()],
    )?;
    Ok(())
}

// --- Sync helpers ---

fn get_or_create_device_id(conn: &Connection) -> StoreResult<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM config WHERE key = 'device_id'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let device_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO config (key, value) VALUES ('device_id', ?1)",
        params![device_id],
    )?;
    Ok(device_id)
}

fn collect_records<T: SyncedTable>(
    conn: &Connection,
    filter: &Filter,
    out: &mut Vec<SyncRecord>,
) -> StoreResult<()> {
    for stored in T::select(conn, filter)? {
        out.push(SyncRecord {
            kind: T::KIND,
            id: Some(stored.value.id()),
            fields: to_fields(&stored.value, T::KIND.as_str())?,
            clock: stored.clock,
        });
    }
    Ok(())
}

fn table_for(kind: RecordKind) -> Option<&'static str> {
    match kind {
        RecordKind::Entry => Some(CalorieEntry::TABLE),
        RecordKind::Recipe => Some(Recipe::TABLE),
        RecordKind::Exercise => Some(Exercise::TABLE),
        RecordKind::Routine => Some(Routine::TABLE),
        RecordKind::DailyGoal => None,
    }
}

/// Stores a tombstone unless one at least as recent is already known.
fn record_tombstone(conn: &Connection, kind: RecordKind, id: Uuid, deleted_at: i64) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO sync_tombstones (uuid, kind, deleted_at)
         SELECT ?1, ?2, ?3
         WHERE NOT EXISTS (
             SELECT 1 FROM sync_tombstones WHERE uuid = ?1 AND kind = ?2 AND deleted_at >= ?3
         )",
        params![id.to_string(), kind.as_str(), deleted_at],
    )?;
    Ok(())
}

/// Whether any row carries `id`, readable or not.
fn row_exists(conn: &Connection, table: &str, id: Uuid) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {table} WHERE uuid = ?1 LIMIT 1"),
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Whether the record was deleted here at or after `stamp`.
fn tombstoned_since(conn: &Connection, kind: RecordKind, id: Uuid, stamp: i64) -> StoreResult<bool> {
    let newest: Option<i64> = conn.query_row(
        "SELECT MAX(deleted_at) FROM sync_tombstones WHERE uuid = ?1 AND kind = ?2",
        params![id.to_string(), kind.as_str()],
        |row| row.get(0),
    )?;
    Ok(newest.is_some_and(|deleted_at| deleted_at >= stamp))
}

fn merge_record<T: SyncedTable>(
    conn: &Connection,
    record: &SyncRecord,
    summary: &mut MergeSummary,
) -> StoreResult<()> {
    let Some(id) = record.id else {
        warn!(kind = %T::KIND, "skipping remote record without id");
        summary.skipped += 1;
        return Ok(());
    };

    let Some(stored) = T::select(conn, &Filter::Id(id))?.into_iter().next() else {
        if row_exists(conn, T::TABLE, id)? {
            warn!(kind = %T::KIND, %id, "local copy is unreadable, not merging over it");
            summary.skipped += 1;
            return Ok(());
        }
        if tombstoned_since(conn, T::KIND, id, record.clock.latest())? {
            summary.unchanged += 1;
            return Ok(());
        }
        match from_fields::<T>(Some(id), &record.fields) {
            Ok(value) => {
                T::insert(conn, &value, &record.clock)?;
                summary.inserted += 1;
            }
            Err(e) => {
                warn!(kind = %T::KIND, %id, error = %e, "skipping undecodable remote record");
                summary.skipped += 1;
            }
        }
        return Ok(());
    };

    let mut fields = to_fields(&stored.value, T::KIND.as_str())?;
    let mut clock = stored.clock;
    if !merge_fields(&mut fields, &mut clock, &record.fields, &record.clock) {
        summary.unchanged += 1;
        return Ok(());
    }
    match from_fields::<T>(Some(id), &fields) {
        Ok(value) => {
            T::overwrite(conn, stored.rowid, &value, &clock)?;
            summary.merged += 1;
        }
        Err(e) => {
            warn!(kind = %T::KIND, %id, error = %e, "skipping remote fields that do not decode");
            summary.skipped += 1;
        }
    }
    Ok(())
}

fn merge_goal(conn: &Connection, record: &SyncRecord, summary: &mut MergeSummary) -> StoreResult<()> {
    let (current, mut clock) = load_goal(conn)?.unwrap_or_default();
    let mut fields = to_fields(&current, "daily goal")?;
    if !merge_fields(&mut fields, &mut clock, &record.fields, &record.clock) {
        summary.unchanged += 1;
        return Ok(());
    }
    match from_fields::<DailyGoal>(None, &fields) {
        Ok(goal) => {
            write_goal(conn, goal, &clock)?;
            summary.merged += 1;
        }
        Err(e) => {
            warn!(error = %e, "skipping remote daily goal that does not decode");
            summary.skipped += 1;
        }
    }
    Ok(())
}

/// Deletes local copies written no later than the deletion and keeps the
/// tombstone for further propagation.
fn apply_tombstone(conn: &Connection, tombstone: &SyncTombstone) -> StoreResult<bool> {
    let Some(table) = table_for(tombstone.kind) else {
        return Ok(false);
    };
    let deleted_at = tombstone.deleted_at.timestamp_millis();
    let removed = conn.execute(
        &format!("DELETE FROM {table} WHERE uuid = ?1 AND updated_at <= ?2"),
        params![tombstone.id.to_string(), deleted_at],
    )?;
    record_tombstone(conn, tombstone.kind, tombstone.id, deleted_at)?;
    Ok(removed > 0)
}
