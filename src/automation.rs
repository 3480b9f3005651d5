use crate::db::{Database, STAT_FILES_ORGANIZED};
use crate::errors::{AppError, AppResult};
use crate::models::{
    parse_due_date, Activity, ActivityKind, AddOrganizationRulePayload, AppEventEnvelope, AppSettings, BooleanResponse,
    CreateTaskPayload, DashboardStats, ExportResponse, FileSystemItem, ImportResponse, OrganizationRule,
    OrganizeReport, PlannedMove, ScheduleTaskPayload, ScheduledTask, SchedulerStatus, StartWatchingPayload, Task,
    TaskImportRecord, TaskStatus, UpdateTaskPayload, WatcherInfo, DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY,
};
use crate::organizer::{
    default_rule_presets, execute_moves, normalize_extensions, organize_by_extension, plan_moves,
    validate_folder_name,
};
use crate::scanner::{scan_folder, ScanOptions};
use crate::scheduler::{due_entries, parse_schedule_time, Scheduler};
use crate::watcher::{FolderWatcher, WatchCallback};
use chrono::{NaiveDateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tauri::{AppHandle, Emitter};
use tokio::sync::RwLock;
use tokio::time::Duration;
use uuid::Uuid;

pub const APP_EVENT: &str = "app_event";
const DATABASE_FILE: &str = "chronos.sqlite";

pub struct AutomationCore {
    db: Arc<Database>,
    scheduler: Scheduler,
    watchers: StdMutex<HashMap<String, FolderWatcher>>,
    app_handle: Arc<RwLock<Option<AppHandle>>>,
    app_data_dir: PathBuf,
}

impl AutomationCore {
    pub fn new(app_data_dir: PathBuf) -> AppResult<Arc<Self>> {
        let db = Arc::new(Database::new(&app_data_dir.join(DATABASE_FILE))?);
        let settings = db.get_settings()?;
        let scheduler = Scheduler::new(settings.scheduler_poll_seconds);

        let this = Arc::new(Self {
            db,
            scheduler: scheduler.clone(),
            watchers: StdMutex::new(HashMap::new()),
            app_handle: Arc::new(RwLock::new(None)),
            app_data_dir,
        });

        let weak = Arc::downgrade(&this);
        scheduler.set_executor(Arc::new(move |now: NaiveDateTime| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(strong) = weak.upgrade() else {
                    return 0;
                };
                match strong.run_due_schedules(now) {
                    Ok(fired) => fired,
                    Err(error) => {
                        tracing::warn!(error = %error, "scheduled task check failed");
                        0
                    }
                }
            })
        }));

        tracing::info!(db = %this.db.path().display(), "automation core ready");
        Ok(this)
    }

    pub async fn attach_app_handle(&self, app_handle: AppHandle) {
        let mut writer = self.app_handle.write().await;
        *writer = Some(app_handle);
    }

    // ─── Tasks ──────────────────────────────────────────────────────────────

    pub fn get_all_tasks(&self) -> AppResult<Vec<Task>> {
        self.db.list_tasks()
    }

    pub fn get_task(&self, task_id: &str) -> AppResult<Task> {
        self.db
            .get_task(task_id)?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))
    }

    pub fn add_task(&self, payload: CreateTaskPayload) -> AppResult<Task> {
        let title = payload.title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Task title must not be empty.".to_string()));
        }
        let priority = match payload.priority {
            Some(priority) => validate_priority(priority)?,
            None => DEFAULT_PRIORITY,
        };

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: payload.description.trim().to_string(),
            due_date: parse_optional_due_date(payload.due_date.as_deref())?,
            priority,
            status: payload.status.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };

        self.db.insert_task(&task)?;
        self.db.insert_activity(ActivityKind::Task, "New task created", &task.title)?;
        tracing::info!(task_id = %task.id, "task created");
        self.emit_app_event("task_created", json!({ "task": &task }));
        Ok(task)
    }

    /// Empty text fields and a zero priority keep what is stored; the due date
    /// and status are always replaced.
    pub fn update_task(&self, payload: UpdateTaskPayload) -> AppResult<Task> {
        let existing = self.get_task(&payload.id)?;

        let title = match payload.title.trim() {
            "" => existing.title.clone(),
            value => value.to_string(),
        };
        let description = match payload.description.trim() {
            "" => existing.description.clone(),
            value => value.to_string(),
        };
        let priority = if payload.priority == 0 {
            existing.priority
        } else {
            validate_priority(payload.priority)?
        };

        let task = Task {
            title,
            description,
            due_date: parse_optional_due_date(payload.due_date.as_deref())?,
            priority,
            status: payload.status,
            updated_at: Utc::now(),
            ..existing
        };

        let previous = self
            .db
            .update_task(&task)?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task.id)))?;
        self.record_status_change(&task, previous)?;
        self.emit_app_event("task_updated", json!({ "task": &task }));
        Ok(task)
    }

    pub fn set_task_status(&self, task_id: &str, status: TaskStatus) -> AppResult<Task> {
        let (task, previous) = self
            .db
            .set_task_status(task_id, status)?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))?;
        self.record_status_change(&task, previous)?;
        self.emit_app_event("task_updated", json!({ "task": &task }));
        Ok(task)
    }

    pub fn complete_task(&self, task_id: &str) -> AppResult<Task> {
        self.set_task_status(task_id, TaskStatus::Completed)
    }

    pub fn delete_task(&self, task_id: &str) -> AppResult<BooleanResponse> {
        let deleted = self.db.delete_task(task_id)?;
        if deleted {
            tracing::info!(task_id = %task_id, "task deleted");
            self.emit_app_event("task_deleted", json!({ "taskId": task_id }));
        }
        Ok(BooleanResponse { success: deleted })
    }

    pub fn export_tasks_json(&self) -> AppResult<ExportResponse> {
        let tasks = self.db.list_tasks()?;
        let export_dir = self.app_data_dir.join("exports");
        std::fs::create_dir_all(&export_dir).map_err(|error| AppError::Io(error.to_string()))?;

        let output_path = export_dir.join(format!("tasks-{}.json", Utc::now().format("%Y%m%d-%H%M%S")));
        std::fs::write(&output_path, serde_json::to_string_pretty(&tasks)?)
            .map_err(|error| AppError::Io(error.to_string()))?;

        tracing::info!(path = %output_path.display(), count = tasks.len(), "tasks exported");
        Ok(ExportResponse {
            path: output_path.to_string_lossy().to_string(),
            count: tasks.len(),
        })
    }

    /// Replaces every task with the contents of a JSON array file. Records
    /// without a title are skipped.
    pub fn import_tasks_json(&self, path: &str) -> AppResult<ImportResponse> {
        let raw = std::fs::read_to_string(path.trim()).map_err(|error| AppError::Io(error.to_string()))?;
        let records: Vec<TaskImportRecord> = serde_json::from_str(&raw)
            .map_err(|error| AppError::Validation(format!("Invalid task file: {}", error)))?;

        let now = Utc::now();
        let mut tasks = Vec::with_capacity(records.len());
        for record in records {
            let title = record.title.trim();
            if title.is_empty() {
                tracing::warn!("skipping imported task without a title");
                continue;
            }
            tasks.push(Task {
                id: Uuid::new_v4().to_string(),
                title: title.to_string(),
                description: record.description.clone().unwrap_or_default(),
                due_date: record.due_date.as_deref().and_then(parse_due_date),
                priority: record
                    .priority
                    .filter(|priority| (MIN_PRIORITY..=MAX_PRIORITY).contains(priority))
                    .unwrap_or(DEFAULT_PRIORITY),
                status: record.resolved_status(),
                created_at: now,
                updated_at: now,
            });
        }

        let imported = self.db.replace_all_tasks(&tasks)?;
        tracing::info!(imported, "tasks imported");
        self.emit_app_event("tasks_imported", json!({ "imported": imported }));
        Ok(ImportResponse { imported })
    }

    fn record_status_change(&self, task: &Task, previous: TaskStatus) -> AppResult<()> {
        if previous != TaskStatus::Completed && task.status == TaskStatus::Completed {
            self.db.insert_activity(ActivityKind::Task, "Task completed", &task.title)?;
            tracing::info!(task_id = %task.id, "task completed");
        }
        Ok(())
    }

    // ─── Files ──────────────────────────────────────────────────────────────

    pub fn scan_folder(&self, path: &str) -> AppResult<Vec<FileSystemItem>> {
        let folder = normalize_folder(path)?;
        let options = ScanOptions {
            skip_hidden: self.db.get_settings()?.skip_hidden_files,
        };
        scan_folder(&folder, &options)
    }

    pub fn add_organization_rule(&self, payload: AddOrganizationRulePayload) -> AppResult<OrganizationRule> {
        let base = existing_folder(&payload.base_folder)?;
        let folder_name = validate_folder_name(&payload.folder)?;
        let extensions = normalize_extensions(&payload.extensions)?;
        let base_key = folder_key(&base);

        let duplicate = self
            .db
            .list_rules(Some(&base_key))?
            .into_iter()
            .any(|rule| rule.folder_name.eq_ignore_ascii_case(&folder_name));
        if duplicate {
            return Err(AppError::Conflict(format!(
                "A rule for folder '{}' already exists in {}.",
                folder_name, base_key
            )));
        }

        let rule = OrganizationRule {
            id: Uuid::new_v4().to_string(),
            full_path: folder_key(&base.join(&folder_name)),
            base_folder: base_key,
            folder_name,
            extensions,
            enabled: true,
            created_at: Utc::now(),
        };
        self.db.insert_rule(&rule)?;

        tracing::info!(rule_id = %rule.id, base_folder = %rule.base_folder, folder = %rule.folder_name, "organization rule added");
        self.emit_app_event("rule_added", json!({ "rule": &rule }));
        Ok(rule)
    }

    pub fn get_organization_rules(&self, base_folder: Option<&str>) -> AppResult<Vec<OrganizationRule>> {
        let base_key = optional_folder_key(base_folder)?;
        self.db.list_rules(base_key.as_deref())
    }

    pub fn delete_organization_rule(&self, rule_id: &str, base_folder: Option<&str>) -> AppResult<BooleanResponse> {
        let base_key = optional_folder_key(base_folder)?;
        let deleted = self.db.delete_rule(rule_id, base_key.as_deref())?;
        if deleted {
            self.emit_app_event("rule_deleted", json!({ "ruleId": rule_id }));
        }
        Ok(BooleanResponse { success: deleted })
    }

    pub fn clear_organization_rules(&self, base_folder: Option<&str>) -> AppResult<usize> {
        let base_key = optional_folder_key(base_folder)?;
        let cleared = self.db.clear_rules(base_key.as_deref())?;
        tracing::info!(cleared, base_folder = ?base_key, "organization rules cleared");
        self.emit_app_event("rules_cleared", json!({ "baseFolder": base_key, "cleared": cleared }));
        Ok(cleared)
    }

    pub fn set_organization_rule_enabled(&self, rule_id: &str, enabled: bool) -> AppResult<OrganizationRule> {
        let rule = self
            .db
            .set_rule_enabled(rule_id, enabled)?
            .ok_or_else(|| AppError::NotFound(format!("Rule {} not found", rule_id)))?;
        self.emit_app_event("rule_updated", json!({ "rule": &rule }));
        Ok(rule)
    }

    /// Adds the built-in presets that the base folder does not have yet.
    pub fn apply_default_rules(&self, base_folder: &str) -> AppResult<Vec<OrganizationRule>> {
        let base = existing_folder(base_folder)?;
        let base_key = folder_key(&base);
        let existing = self.db.list_rules(Some(&base_key))?;

        for preset in default_rule_presets() {
            if existing
                .iter()
                .any(|rule| rule.folder_name.eq_ignore_ascii_case(preset.folder_name))
            {
                continue;
            }
            self.add_organization_rule(AddOrganizationRulePayload {
                base_folder: base_key.clone(),
                folder: preset.folder_name.to_string(),
                extensions: preset.extensions.iter().map(|ext| ext.to_string()).collect(),
            })?;
        }

        self.db.list_rules(Some(&base_key))
    }

    pub fn preview_organization(&self, base_folder: &str) -> AppResult<Vec<PlannedMove>> {
        let base = normalize_folder(base_folder)?;
        let rules = self.db.list_rules(Some(&folder_key(&base)))?;
        plan_moves(&base, &rules, self.db.get_settings()?.skip_hidden_files)
    }

    pub fn organize_files(&self, base_folder: &str) -> AppResult<OrganizeReport> {
        let base = normalize_folder(base_folder)?;
        let plans = self.preview_organization(&folder_key(&base))?;
        let report = OrganizeReport::from_outcomes(&folder_key(&base), execute_moves(&plans));
        self.record_organization(&base, &report)?;
        Ok(report)
    }

    pub fn organize_by_extension(&self, folder: &str) -> AppResult<OrganizeReport> {
        let folder = normalize_folder(folder)?;
        let outcomes = organize_by_extension(&folder, self.db.get_settings()?.skip_hidden_files)?;
        let report = OrganizeReport::from_outcomes(&folder_key(&folder), outcomes);
        self.record_organization(&folder, &report)?;
        Ok(report)
    }

    fn record_organization(&self, folder: &Path, report: &OrganizeReport) -> AppResult<()> {
        tracing::info!(folder = %folder.display(), moved = report.moved, failed = report.failed, "organize finished");
        if report.moved > 0 {
            self.db.increment_stat(STAT_FILES_ORGANIZED, report.moved as i64)?;
            let name = folder
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| folder_key(folder));
            self.db.insert_activity(
                ActivityKind::Organization,
                &format!("Files organized in {}", name),
                &format!("{} files moved", report.moved),
            )?;
        }
        self.emit_app_event(
            "files_organized",
            json!({ "baseFolder": &report.base_folder, "moved": report.moved, "failed": report.failed }),
        );
        Ok(())
    }

    // ─── Schedules ──────────────────────────────────────────────────────────

    pub fn schedule_task(&self, payload: ScheduleTaskPayload) -> AppResult<ScheduledTask> {
        let time = parse_schedule_time(&payload.time)?;
        let task = self.get_task(&payload.task_id)?;
        let entry = self.db.insert_schedule(&task.id, &time)?;

        self.db.insert_activity(
            ActivityKind::Schedule,
            "Task scheduled",
            &format!("{} at {}", task.title, time),
        )?;
        tracing::info!(task_id = %task.id, time = %time, "task scheduled");
        self.emit_app_event("task_scheduled", json!({ "schedule": &entry }));
        Ok(entry)
    }

    pub fn list_scheduled_tasks(&self) -> AppResult<Vec<ScheduledTask>> {
        self.db.list_schedules()
    }

    pub fn unschedule_task(&self, schedule_id: &str) -> AppResult<BooleanResponse> {
        let deleted = self.db.delete_schedule(schedule_id)?;
        if deleted {
            self.emit_app_event("task_unscheduled", json!({ "scheduleId": schedule_id }));
        }
        Ok(BooleanResponse { success: deleted })
    }

    pub fn start_scheduler(&self) -> AppResult<SchedulerStatus> {
        if !self.scheduler.start() {
            tracing::debug!("scheduler already running");
        }
        self.scheduler_status()
    }

    pub fn scheduler_status(&self) -> AppResult<SchedulerStatus> {
        Ok(SchedulerStatus {
            running: self.scheduler.is_running(),
            poll_seconds: self.scheduler.poll_seconds(),
            scheduled: self.db.list_schedules()?.len(),
        })
    }

    /// Completes every task scheduled for the minute of `now` that has not run
    /// today. Entries pointing at deleted tasks are dropped.
    pub fn run_due_schedules(&self, now: NaiveDateTime) -> AppResult<usize> {
        let entries = self.db.list_schedules()?;
        let mut fired = 0;
        for entry in due_entries(&entries, now) {
            let Some((task, previous)) = self.db.set_task_status(&entry.task_id, TaskStatus::Completed)? else {
                tracing::warn!(schedule_id = %entry.id, task_id = %entry.task_id, "dropping schedule for missing task");
                self.db.delete_schedule(&entry.id)?;
                continue;
            };

            self.db.mark_schedule_ran(&entry.id, now.date())?;
            self.record_status_change(&task, previous)?;
            self.db.insert_activity(
                ActivityKind::Schedule,
                "Scheduled task completed",
                &format!("{} at {}", task.title, entry.time),
            )?;
            self.emit_app_event("schedule_fired", json!({ "schedule": &entry, "task": &task }));
            fired += 1;
        }
        Ok(fired)
    }

    // ─── Watchers ───────────────────────────────────────────────────────────

    pub fn start_watching(self: &Arc<Self>, payload: StartWatchingPayload) -> AppResult<WatcherInfo> {
        let folder = existing_folder(&payload.folder)?;
        let key = folder_key(&folder);
        let debounce = Duration::from_millis(self.db.get_settings()?.watch_debounce_ms);

        let mut watchers = self.lock_watchers()?;
        if watchers.contains_key(&key) {
            return Err(AppError::Conflict(format!("Folder {} is already being watched.", key)));
        }

        let weak = Arc::downgrade(self);
        let watched = folder.clone();
        let callback: WatchCallback = Arc::new(move |path: PathBuf| {
            if let Some(core) = weak.upgrade() {
                core.handle_watch_event(&watched, &path);
            }
        });

        let watcher = FolderWatcher::start(&folder, &payload.pattern, debounce, callback)?;
        let info = watcher.info();
        watchers.insert(key, watcher);
        drop(watchers);

        self.emit_app_event("watch_started", json!({ "watcher": &info }));
        Ok(info)
    }

    pub fn stop_watching(&self, folder: &str) -> AppResult<BooleanResponse> {
        let key = folder_key(&normalize_folder(folder)?);
        let removed = self.lock_watchers()?.remove(&key);
        if let Some(watcher) = &removed {
            tracing::info!(folder = %watcher.folder().display(), "folder watch stopped");
            self.emit_app_event("watch_stopped", json!({ "folder": &key }));
        }
        Ok(BooleanResponse {
            success: removed.is_some(),
        })
    }

    pub fn list_watchers(&self) -> AppResult<Vec<WatcherInfo>> {
        let mut infos: Vec<WatcherInfo> = self.lock_watchers()?.values().map(FolderWatcher::info).collect();
        infos.sort_by(|left, right| left.folder.cmp(&right.folder));
        Ok(infos)
    }

    /// Folders with enabled rules are organized by them; any other folder is
    /// grouped by extension.
    fn handle_watch_event(&self, folder: &Path, path: &Path) {
        tracing::info!(folder = %folder.display(), path = %path.display(), "watched file changed");
        let key = folder_key(folder);
        let has_rules = match self.db.list_rules(Some(&key)) {
            Ok(rules) => rules.iter().any(|rule| rule.enabled),
            Err(error) => {
                tracing::warn!(error = %error, "failed to load rules for watched folder");
                return;
            }
        };

        let result = if has_rules {
            self.organize_files(&key)
        } else {
            self.organize_by_extension(&key)
        };
        if let Err(error) = result {
            tracing::warn!(folder = %key, error = %error, "automatic organize failed");
        }
        self.emit_app_event(
            "watch_triggered",
            json!({ "folder": key, "path": path.to_string_lossy() }),
        );
    }

    fn lock_watchers(&self) -> AppResult<MutexGuard<'_, HashMap<String, FolderWatcher>>> {
        self.watchers
            .lock()
            .map_err(|_| AppError::Internal("watcher registry poisoned".to_string()))
    }

    // ─── Dashboard & settings ───────────────────────────────────────────────

    pub fn get_stats(&self) -> AppResult<DashboardStats> {
        self.db.get_stats()
    }

    pub fn get_recent_activities(&self, kind: Option<ActivityKind>) -> AppResult<Vec<Activity>> {
        self.db.list_activities(kind)
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        self.db.get_settings()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let mut updated = self.db.update_settings(update)?;
        let applied = self.scheduler.set_poll_seconds(updated.scheduler_poll_seconds);
        if applied != updated.scheduler_poll_seconds {
            updated = self
                .db
                .update_settings(json!({ "schedulerPollSeconds": applied }))?;
        }
        self.emit_app_event("settings_updated", json!({ "settings": &updated }));
        Ok(updated)
    }

    fn emit_app_event(&self, event_type: &str, payload: serde_json::Value) {
        let envelope = AppEventEnvelope {
            r#type: event_type.to_string(),
            payload,
            timestamp: Utc::now(),
            event_id: Uuid::new_v4().to_string(),
        };
        if let Ok(handle_opt) = self.app_handle.try_read() {
            if let Some(handle) = handle_opt.as_ref() {
                if let Err(error) = handle.emit(APP_EVENT, envelope) {
                    tracing::debug!(error = %error, event_type = %event_type, "failed to emit app event");
                }
            }
        }
    }
}

fn validate_priority(priority: i32) -> AppResult<i32> {
    if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        Ok(priority)
    } else {
        Err(AppError::Validation(format!(
            "Priority must be between {} and {}.",
            MIN_PRIORITY, MAX_PRIORITY
        )))
    }
}

fn parse_optional_due_date(raw: Option<&str>) -> AppResult<Option<NaiveDateTime>> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => parse_due_date(value)
            .map(Some)
            .ok_or_else(|| AppError::Validation(format!("Invalid due date '{}'.", value))),
        None => Ok(None),
    }
}

/// Trims the input and drops trailing separators and `.` components so the
/// same folder always produces the same key.
fn normalize_folder(raw: &str) -> AppResult<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("Folder path must not be empty.".to_string()));
    }
    Ok(Path::new(trimmed).components().collect())
}

fn existing_folder(raw: &str) -> AppResult<PathBuf> {
    let folder = normalize_folder(raw)?;
    if !folder.is_dir() {
        return Err(AppError::NotFound(format!(
            "Folder '{}' does not exist.",
            folder.display()
        )));
    }
    Ok(folder)
}

fn folder_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn optional_folder_key(raw: Option<&str>) -> AppResult<Option<String>> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => Ok(Some(folder_key(&normalize_folder(value)?))),
        None => Ok(None),
    }
}
