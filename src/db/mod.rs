use crate::errors::{AppError, AppResult};
use crate::models::{
    format_due_date, parse_due_date, Activity, ActivityKind, AppSettings, DashboardStats, OrganizationRule,
    ScheduledTask, Task, TaskStatus, DEFAULT_PRIORITY,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

pub const STAT_TASKS_COMPLETED: &str = "tasks_completed";
pub const STAT_FILES_ORGANIZED: &str = "files_organized";
pub const STAT_PENDING_TASKS: &str = "pending_tasks";
const STAT_KEYS: &[&str] = &[STAT_TASKS_COMPLETED, STAT_FILES_ORGANIZED, STAT_PENDING_TASKS];

pub const MAX_ACTIVITIES_PER_KIND: i64 = 4;

const TASK_COLUMNS: &str =
    "id, title, description, due_date, completed, in_progress, pending, priority, created_at, updated_at";

// Columns that older databases may lack. Added in place before any copy.
const LEGACY_TASK_COLUMNS: &[(&str, &str)] = &[
    ("description", "TEXT"),
    ("due_date", "TEXT"),
    ("completed", "BOOLEAN DEFAULT 0"),
    ("in_progress", "BOOLEAN DEFAULT 0"),
    ("pending", "BOOLEAN DEFAULT 1"),
    ("priority", "INTEGER DEFAULT 1"),
    ("created_at", "TEXT"),
    ("updated_at", "TEXT"),
];

const SCHEDULE_SELECT: &str = "SELECT s.id, s.task_id, COALESCE(t.title, ''), s.time, s.enabled, s.last_run_on, s.created_at
     FROM scheduled_tasks s LEFT JOIN tasks t ON t.id = s.task_id";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let mut conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;
        migrate_tasks_table(&mut conn)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };

        db.seed_stats()?;
        db.ensure_default_settings()?;
        db.refresh_pending_count()?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    // ─── Tasks ──────────────────────────────────────────────────────────────

    pub fn insert_task(&self, task: &Task) -> AppResult<()> {
        let conn = self.lock()?;
        insert_task_row(&conn, task)?;
        refresh_pending_locked(&conn)?;
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> AppResult<Option<Task>> {
        let conn = self.lock()?;
        let task = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                [task_id],
                parse_task_row,
            )
            .optional()?;
        Ok(task)
    }

    pub fn list_tasks(&self) -> AppResult<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks ORDER BY created_at ASC, rowid ASC",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map([], parse_task_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Writes every column of `task`. Returns the status the row had before the
    /// write, or `None` when no such task exists. Entering `Completed` counts
    /// towards the completed-tasks statistic.
    pub fn update_task(&self, task: &Task) -> AppResult<Option<TaskStatus>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let previous = tx
            .query_row(
                "SELECT completed, in_progress, pending FROM tasks WHERE id = ?1",
                [&task.id],
                parse_status_flags,
            )
            .optional()?;
        let Some(previous) = previous else {
            return Ok(None);
        };

        let (completed, in_progress, pending) = task.status.flags();
        tx.execute(
            "UPDATE tasks SET title = ?2, description = ?3, due_date = ?4, completed = ?5, in_progress = ?6,
               pending = ?7, priority = ?8, updated_at = ?9
             WHERE id = ?1",
            params![
                task.id,
                task.title,
                task.description,
                task.due_date.as_ref().map(format_due_date),
                completed,
                in_progress,
                pending,
                task.priority,
                task.updated_at.to_rfc3339(),
            ],
        )?;

        if previous != TaskStatus::Completed && task.status == TaskStatus::Completed {
            increment_stat_locked(&tx, STAT_TASKS_COMPLETED, 1)?;
        }
        refresh_pending_locked(&tx)?;
        tx.commit()?;
        Ok(Some(previous))
    }

    /// Returns the updated task together with the status it replaced.
    pub fn set_task_status(&self, task_id: &str, status: TaskStatus) -> AppResult<Option<(Task, TaskStatus)>> {
        let Some(mut task) = self.get_task(task_id)? else {
            return Ok(None);
        };
        task.status = status;
        task.updated_at = Utc::now();
        let previous = self.update_task(&task)?;
        Ok(previous.map(|previous| (task, previous)))
    }

    pub fn delete_task(&self, task_id: &str) -> AppResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM scheduled_tasks WHERE task_id = ?1", [task_id])?;
        let deleted = tx.execute("DELETE FROM tasks WHERE id = ?1", [task_id])?;
        refresh_pending_locked(&tx)?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Replaces the whole task list. Schedules pointing at the old tasks go with them.
    pub fn replace_all_tasks(&self, tasks: &[Task]) -> AppResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM scheduled_tasks", [])?;
        tx.execute("DELETE FROM tasks", [])?;
        for task in tasks {
            insert_task_row(&tx, task)?;
        }
        refresh_pending_locked(&tx)?;
        tx.commit()?;
        Ok(tasks.len())
    }

    // ─── Stats ──────────────────────────────────────────────────────────────

    pub fn increment_stat(&self, key: &str, amount: i64) -> AppResult<()> {
        let conn = self.lock()?;
        increment_stat_locked(&conn, key, amount)?;
        Ok(())
    }

    pub fn refresh_pending_count(&self) -> AppResult<i64> {
        let conn = self.lock()?;
        Ok(refresh_pending_locked(&conn)?)
    }

    pub fn get_stats(&self) -> AppResult<DashboardStats> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key, value FROM stats")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut values = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            values.insert(key, value);
        }
        let scheduled_tasks: i64 = conn.query_row(
            "SELECT COUNT(1) FROM scheduled_tasks WHERE enabled = 1",
            [],
            |row| row.get(0),
        )?;

        Ok(DashboardStats {
            tasks_completed: values.get(STAT_TASKS_COMPLETED).copied().unwrap_or(0),
            files_organized: values.get(STAT_FILES_ORGANIZED).copied().unwrap_or(0),
            pending_tasks: values.get(STAT_PENDING_TASKS).copied().unwrap_or(0),
            scheduled_tasks,
        })
    }

    fn seed_stats(&self) -> AppResult<()> {
        let conn = self.lock()?;
        for key in STAT_KEYS {
            conn.execute("INSERT OR IGNORE INTO stats (key, value) VALUES (?1, 0)", [key])?;
        }
        Ok(())
    }

    // ─── Activities ─────────────────────────────────────────────────────────

    /// Appends an activity and trims that kind back to the newest
    /// `MAX_ACTIVITIES_PER_KIND` entries.
    pub fn insert_activity(&self, kind: ActivityKind, title: &str, description: &str) -> AppResult<Activity> {
        let activity = Activity {
            id: Uuid::new_v4().to_string(),
            kind,
            title: title.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO activities (id, kind, title, description, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                activity.id,
                kind.as_str(),
                activity.title,
                activity.description,
                activity.created_at.to_rfc3339(),
            ],
        )?;
        tx.execute(
            "DELETE FROM activities
             WHERE kind = ?1 AND id NOT IN (
               SELECT id FROM activities WHERE kind = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2
             )",
            params![kind.as_str(), MAX_ACTIVITIES_PER_KIND],
        )?;
        tx.commit()?;

        Ok(activity)
    }

    /// Newest first.
    pub fn list_activities(&self, kind: Option<ActivityKind>) -> AppResult<Vec<Activity>> {
        let conn = self.lock()?;
        let mut result = Vec::new();
        match kind {
            Some(kind) => {
                let mut stmt = conn.prepare(
                    "SELECT id, kind, title, description, created_at FROM activities
                     WHERE kind = ?1 ORDER BY created_at DESC, rowid DESC",
                )?;
                let rows = stmt.query_map([kind.as_str()], parse_activity_row)?;
                for row in rows {
                    result.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, kind, title, description, created_at FROM activities
                     ORDER BY created_at DESC, rowid DESC",
                )?;
                let rows = stmt.query_map([], parse_activity_row)?;
                for row in rows {
                    result.push(row?);
                }
            }
        }
        Ok(result)
    }

    // ─── Organization rules ─────────────────────────────────────────────────

    pub fn insert_rule(&self, rule: &OrganizationRule) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO organization_rules (id, base_folder, folder_name, full_path, extensions_json, enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rule.id,
                rule.base_folder,
                rule.folder_name,
                rule.full_path,
                serde_json::to_string(&rule.extensions)?,
                rule.enabled,
                rule.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Rules in creation order, optionally scoped to one base folder.
    pub fn list_rules(&self, base_folder: Option<&str>) -> AppResult<Vec<OrganizationRule>> {
        let conn = self.lock()?;
        let mut query = String::from(
            "SELECT id, base_folder, folder_name, full_path, extensions_json, enabled, created_at
             FROM organization_rules",
        );
        let mut params_vec: Vec<String> = Vec::new();
        if let Some(base_folder) = base_folder {
            query.push_str(" WHERE base_folder = ?");
            params_vec.push(base_folder.to_string());
        }
        query.push_str(" ORDER BY created_at ASC, rowid ASC");

        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params_vec.iter()), parse_rule_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn get_rule(&self, rule_id: &str) -> AppResult<Option<OrganizationRule>> {
        let conn = self.lock()?;
        let rule = conn
            .query_row(
                "SELECT id, base_folder, folder_name, full_path, extensions_json, enabled, created_at
                 FROM organization_rules WHERE id = ?1",
                [rule_id],
                parse_rule_row,
            )
            .optional()?;
        Ok(rule)
    }

    pub fn delete_rule(&self, rule_id: &str, base_folder: Option<&str>) -> AppResult<bool> {
        let conn = self.lock()?;
        let deleted = match base_folder {
            Some(base_folder) => conn.execute(
                "DELETE FROM organization_rules WHERE id = ?1 AND base_folder = ?2",
                params![rule_id, base_folder],
            )?,
            None => conn.execute("DELETE FROM organization_rules WHERE id = ?1", [rule_id])?,
        };
        Ok(deleted > 0)
    }

    pub fn clear_rules(&self, base_folder: Option<&str>) -> AppResult<usize> {
        let conn = self.lock()?;
        let deleted = match base_folder {
            Some(base_folder) => {
                conn.execute("DELETE FROM organization_rules WHERE base_folder = ?1", [base_folder])?
            }
            None => conn.execute("DELETE FROM organization_rules", [])?,
        };
        Ok(deleted)
    }

    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> AppResult<Option<OrganizationRule>> {
        {
            let conn = self.lock()?;
            let updated = conn.execute(
                "UPDATE organization_rules SET enabled = ?2 WHERE id = ?1",
                params![rule_id, enabled],
            )?;
            if updated == 0 {
                return Ok(None);
            }
        }
        self.get_rule(rule_id)
    }

    // ─── Schedules ──────────────────────────────────────────────────────────

    /// Idempotent on `(task_id, time)`: scheduling the same task twice for the
    /// same minute returns the existing entry.
    pub fn insert_schedule(&self, task_id: &str, time: &str) -> AppResult<ScheduledTask> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO scheduled_tasks (id, task_id, time, enabled, last_run_on, created_at)
             VALUES (?1, ?2, ?3, 1, NULL, ?4)",
            params![Uuid::new_v4().to_string(), task_id, time, Utc::now().to_rfc3339()],
        )?;
        let schedule = conn.query_row(
            &format!("{} WHERE s.task_id = ?1 AND s.time = ?2", SCHEDULE_SELECT),
            params![task_id, time],
            parse_schedule_row,
        )?;
        Ok(schedule)
    }

    pub fn list_schedules(&self) -> AppResult<Vec<ScheduledTask>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY s.time ASC, s.created_at ASC", SCHEDULE_SELECT))?;
        let rows = stmt.query_map([], parse_schedule_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn delete_schedule(&self, schedule_id: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM scheduled_tasks WHERE id = ?1", [schedule_id])?;
        Ok(deleted > 0)
    }

    pub fn mark_schedule_ran(&self, schedule_id: &str, ran_on: NaiveDate) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE scheduled_tasks SET last_run_on = ?2 WHERE id = ?1",
            params![schedule_id, ran_on.format("%Y-%m-%d").to_string()],
        )?;
        Ok(())
    }

    // ─── Settings ───────────────────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'app'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<AppSettings>(&raw).unwrap_or_default()),
            None => Ok(AppSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: AppSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::Validation(format!("Invalid settings: {}", error)))?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('app', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM settings WHERE key = 'app'", [], |row| row.get(0))?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES ('app', ?1, ?2)",
                params![
                    serde_json::to_string(&AppSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }
}

fn tasks_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE {} (
           id TEXT PRIMARY KEY,
           title TEXT NOT NULL,
           description TEXT,
           due_date TEXT,
           completed BOOLEAN DEFAULT 0,
           in_progress BOOLEAN DEFAULT 0,
           pending BOOLEAN DEFAULT 1,
           priority INTEGER DEFAULT 1,
           created_at TEXT,
           updated_at TEXT
         )",
        table
    )
}

/// Brings any earlier `tasks` table up to the current shape. Tables keyed by
/// an integer id are rebuilt: every row is copied under a fresh UUID and the
/// status flags are normalized so exactly one is set.
fn migrate_tasks_table(conn: &mut Connection) -> AppResult<()> {
    if !table_exists(conn, "tasks")? {
        conn.execute_batch(&tasks_table_sql("tasks"))?;
        return Ok(());
    }

    for (column, definition) in LEGACY_TASK_COLUMNS {
        if !column_exists(conn, "tasks", column)? {
            conn.execute(&format!("ALTER TABLE tasks ADD COLUMN {} {}", column, definition), [])?;
        }
    }
    let now = Utc::now().to_rfc3339();
    conn.execute("UPDATE tasks SET created_at = ?1 WHERE created_at IS NULL", [&now])?;
    conn.execute("UPDATE tasks SET updated_at = created_at WHERE updated_at IS NULL", [])?;

    let id_type = column_type(conn, "tasks", "id")?;
    if id_type.as_deref().map(|value| value.eq_ignore_ascii_case("TEXT")) == Some(true) {
        return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch(&tasks_table_sql("tasks_new"))?;
    let legacy_rows = {
        let mut stmt = tx.prepare(
            "SELECT title, description, due_date, completed, in_progress, pending, priority, created_at, updated_at
             FROM tasks ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                TaskStatus::from_flags(
                    flag_at(row, 3)?,
                    flag_at(row, 4)?,
                    flag_at(row, 5)?,
                ),
                row.get::<_, Option<i32>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })?;
        let mut collected = Vec::new();
        for row in rows {
            collected.push(row?);
        }
        collected
    };

    let migrated = legacy_rows.len();
    for (title, description, due_date, status, priority, created_at, updated_at) in legacy_rows {
        let (completed, in_progress, pending) = status.flags();
        tx.execute(
            "INSERT INTO tasks_new (id, title, description, due_date, completed, in_progress, pending, priority, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                Uuid::new_v4().to_string(),
                title.unwrap_or_default(),
                description.unwrap_or_default(),
                due_date,
                completed,
                in_progress,
                pending,
                priority.unwrap_or(DEFAULT_PRIORITY),
                created_at.clone().unwrap_or_else(|| now.clone()),
                updated_at.or(created_at).unwrap_or_else(|| now.clone()),
            ],
        )?;
    }
    tx.execute_batch("DROP TABLE tasks; ALTER TABLE tasks_new RENAME TO tasks;")?;
    tx.commit()?;

    tracing::info!(rows = migrated, "migrated legacy tasks table to uuid keys");
    Ok(())
}

fn insert_task_row(conn: &Connection, task: &Task) -> rusqlite::Result<usize> {
    let (completed, in_progress, pending) = task.status.flags();
    conn.execute(
        "INSERT INTO tasks (id, title, description, due_date, completed, in_progress, pending, priority, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            task.id,
            task.title,
            task.description,
            task.due_date.as_ref().map(format_due_date),
            completed,
            in_progress,
            pending,
            task.priority,
            task.created_at.to_rfc3339(),
            task.updated_at.to_rfc3339(),
        ],
    )
}

fn increment_stat_locked(conn: &Connection, key: &str, amount: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO stats (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = value + excluded.value",
        params![key, amount],
    )
}

fn refresh_pending_locked(conn: &Connection) -> rusqlite::Result<i64> {
    let pending: i64 = conn.query_row(
        "SELECT COUNT(1) FROM tasks WHERE COALESCE(completed, 0) = 0 AND COALESCE(in_progress, 0) = 0",
        [],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO stats (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![STAT_PENDING_TASKS, pending],
    )?;
    Ok(pending)
}

fn flag_at(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<bool> {
    Ok(row.get::<_, Option<bool>>(index)?.unwrap_or(false))
}

fn parse_status_flags(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskStatus> {
    Ok(TaskStatus::from_flags(flag_at(row, 0)?, flag_at(row, 1)?, flag_at(row, 2)?))
}

fn parse_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let due_date = row
        .get::<_, Option<String>>(3)?
        .as_deref()
        .and_then(parse_due_date);
    let created_at = parse_optional_time(row.get::<_, Option<String>>(8)?.as_deref())?;
    let updated_at = parse_optional_time(row.get::<_, Option<String>>(9)?.as_deref())?;

    Ok(Task {
        id: row.get(0)?,
        title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        due_date,
        status: TaskStatus::from_flags(flag_at(row, 4)?, flag_at(row, 5)?, flag_at(row, 6)?),
        priority: row.get::<_, Option<i32>>(7)?.unwrap_or(DEFAULT_PRIORITY),
        created_at,
        updated_at,
    })
}

fn parse_activity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Activity> {
    let created_raw: String = row.get(4)?;
    Ok(Activity {
        id: row.get(0)?,
        kind: parse_activity_kind(&row.get::<_, String>(1)?)?,
        title: row.get(2)?,
        description: row.get(3)?,
        created_at: parse_time(&created_raw)?,
    })
}

fn parse_activity_kind(raw: &str) -> rusqlite::Result<ActivityKind> {
    match raw {
        "task" => Ok(ActivityKind::Task),
        "organization" => Ok(ActivityKind::Organization),
        "schedule" => Ok(ActivityKind::Schedule),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Unknown activity kind '{}'", other),
            )),
        )),
    }
}

fn parse_rule_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OrganizationRule> {
    let extensions_raw: String = row.get(4)?;
    let created_raw: String = row.get(6)?;
    Ok(OrganizationRule {
        id: row.get(0)?,
        base_folder: row.get(1)?,
        folder_name: row.get(2)?,
        full_path: row.get(3)?,
        extensions: serde_json::from_str(&extensions_raw).unwrap_or_default(),
        enabled: row.get(5)?,
        created_at: parse_time(&created_raw)?,
    })
}

fn parse_schedule_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let last_run_on = row
        .get::<_, Option<String>>(5)?
        .and_then(|raw| NaiveDate::parse_from_str(&raw, "%Y-%m-%d").ok());
    let created_raw: String = row.get(6)?;
    Ok(ScheduledTask {
        id: row.get(0)?,
        task_id: row.get(1)?,
        task_title: row.get(2)?,
        time: row.get(3)?,
        enabled: row.get(4)?,
        last_run_on,
        created_at: parse_time(&created_raw)?,
    })
}

fn table_exists(conn: &Connection, table: &str) -> AppResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> AppResult<bool> {
    Ok(column_type(conn, table, column)?.is_some())
}

fn column_type(conn: &Connection, table: &str, column: &str) -> AppResult<Option<String>> {
    let pragma = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(Some(row.get::<_, String>(2)?));
        }
    }
    Ok(None)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

fn parse_optional_time(raw: Option<&str>) -> rusqlite::Result<DateTime<Utc>> {
    match raw {
        Some(raw) => parse_time(raw),
        None => Ok(DateTime::<Utc>::default()),
    }
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Database, MAX_ACTIVITIES_PER_KIND};
    use crate::models::{ActivityKind, OrganizationRule, Task, TaskStatus};
    use chrono::{NaiveDate, Utc};
    use rusqlite::Connection;

    fn sample_task(title: &str, status: TaskStatus) -> Task {
        let now = Utc::now();
        Task {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: format!("{} description", title),
            due_date: None,
            priority: 2,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_rule(base: &str, folder: &str, extensions: &[&str]) -> OrganizationRule {
        OrganizationRule {
            id: uuid::Uuid::new_v4().to_string(),
            base_folder: base.to_string(),
            folder_name: folder.to_string(),
            full_path: format!("{}/{}", base, folder),
            extensions: extensions.iter().map(|ext| ext.to_string()).collect(),
            enabled: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn new_database_seeds_stats_and_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");

        let stats = db.get_stats().expect("stats");
        assert_eq!(stats.tasks_completed, 0);
        assert_eq!(stats.files_organized, 0);
        assert_eq!(stats.pending_tasks, 0);
        assert_eq!(db.get_settings().expect("settings").scheduler_poll_seconds, 30);
    }

    #[test]
    fn task_round_trip_and_completion_counts_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");

        let mut task = sample_task("Write report", TaskStatus::Pending);
        db.insert_task(&task).expect("insert");
        assert_eq!(db.get_stats().expect("stats").pending_tasks, 1);

        task.status = TaskStatus::Completed;
        let previous = db.update_task(&task).expect("update").expect("task exists");
        assert_eq!(previous, TaskStatus::Pending);
        db.update_task(&task).expect("second update");

        let stats = db.get_stats().expect("stats");
        assert_eq!(stats.tasks_completed, 1);
        assert_eq!(stats.pending_tasks, 0);

        let loaded = db.get_task(&task.id).expect("get").expect("exists");
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.title, "Write report");
    }

    #[test]
    fn updating_missing_task_returns_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let task = sample_task("ghost", TaskStatus::Pending);
        assert!(db.update_task(&task).expect("update").is_none());
        assert!(!db.delete_task(&task.id).expect("delete"));
    }

    #[test]
    fn activities_are_bounded_per_kind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");

        for index in 0..6 {
            db.insert_activity(ActivityKind::Task, &format!("task {}", index), "")
                .expect("activity");
        }
        db.insert_activity(ActivityKind::Organization, "organized", "3 files moved")
            .expect("activity");

        let tasks = db.list_activities(Some(ActivityKind::Task)).expect("list");
        assert_eq!(tasks.len() as i64, MAX_ACTIVITIES_PER_KIND);
        assert_eq!(tasks[0].title, "task 5");
        assert_eq!(tasks[3].title, "task 2");
        assert_eq!(db.list_activities(None).expect("all").len(), 5);
    }

    #[test]
    fn rules_are_scoped_by_base_folder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");

        let images = sample_rule("/data/downloads", "Images", &[".jpg", ".png"]);
        let docs = sample_rule("/data/downloads", "Documents", &[".pdf"]);
        let other = sample_rule("/data/desktop", "Images", &[".png"]);
        for rule in [&images, &docs, &other] {
            db.insert_rule(rule).expect("insert rule");
        }

        let downloads = db.list_rules(Some("/data/downloads")).expect("list");
        assert_eq!(downloads.len(), 2);
        assert_eq!(downloads[0].folder_name, "Images");
        assert_eq!(downloads[0].extensions, vec![".jpg".to_string(), ".png".to_string()]);

        assert!(!db.delete_rule(&other.id, Some("/data/downloads")).expect("scoped delete"));
        assert!(db.delete_rule(&other.id, None).expect("delete"));

        let disabled = db.set_rule_enabled(&docs.id, false).expect("toggle").expect("rule");
        assert!(!disabled.enabled);

        assert_eq!(db.clear_rules(Some("/data/downloads")).expect("clear"), 2);
        assert!(db.list_rules(None).expect("list all").is_empty());
    }

    #[test]
    fn schedules_follow_their_task() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");

        let task = sample_task("Backup", TaskStatus::Pending);
        db.insert_task(&task).expect("insert");

        let first = db.insert_schedule(&task.id, "08:00").expect("schedule");
        let again = db.insert_schedule(&task.id, "08:00").expect("schedule again");
        assert_eq!(first.id, again.id);
        assert_eq!(first.task_title, "Backup");
        assert_eq!(db.get_stats().expect("stats").scheduled_tasks, 1);

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).expect("date");
        db.mark_schedule_ran(&first.id, day).expect("mark");
        assert_eq!(db.list_schedules().expect("list")[0].last_run_on, Some(day));

        db.delete_task(&task.id).expect("delete task");
        assert!(db.list_schedules().expect("list").is_empty());
    }

    #[test]
    fn legacy_integer_keyed_tasks_are_rebuilt_with_uuids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&db_path).expect("open");
            conn.execute_batch(
                "CREATE TABLE tasks (
                   id INTEGER PRIMARY KEY AUTOINCREMENT,
                   title TEXT NOT NULL,
                   description TEXT,
                   completed BOOLEAN DEFAULT 0
                 );
                 INSERT INTO tasks (title, description, completed) VALUES ('Buy milk', 'two liters', 0);
                 INSERT INTO tasks (title, description, completed) VALUES ('File taxes', NULL, 1);",
            )
            .expect("legacy schema");
        }

        let db = Database::new(&db_path).expect("db");
        let tasks = db.list_tasks().expect("list");
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|task| uuid::Uuid::parse_str(&task.id).is_ok()));
        let taxes = tasks.iter().find(|task| task.title == "File taxes").expect("taxes");
        assert_eq!(taxes.status, TaskStatus::Completed);
        assert_eq!(taxes.description, "");
        assert_eq!(db.get_stats().expect("stats").pending_tasks, 1);

        drop(db);
        let reopened = Database::new(&db_path).expect("reopen");
        let ids: Vec<String> = reopened.list_tasks().expect("list").into_iter().map(|task| task.id).collect();
        let original: Vec<String> = tasks.into_iter().map(|task| task.id).collect();
        assert_eq!(ids, original);
    }

    #[test]
    fn settings_update_merges_partial_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");

        let updated = db
            .update_settings(serde_json::json!({ "schedulerPollSeconds": 5 }))
            .expect("update");
        assert_eq!(updated.scheduler_poll_seconds, 5);
        assert!(updated.scheduler_autostart);
        assert!(db
            .update_settings(serde_json::json!({ "schedulerPollSeconds": "soon" }))
            .is_err());
        assert_eq!(db.get_settings().expect("settings").scheduler_poll_seconds, 5);
    }
}
