pub mod automation;
pub mod db;
pub mod errors;
pub mod models;
pub mod organizer;
pub mod scanner;
pub mod scheduler;
pub mod watcher;

use crate::automation::AutomationCore;
use crate::models::{
    Activity, ActivityKind, AddOrganizationRulePayload, AppSettings, BooleanResponse, CreateTaskPayload,
    DashboardStats, ExportResponse, FileSystemItem, ImportResponse, OrganizationRule, OrganizeReport, PlannedMove,
    ScheduleTaskPayload, ScheduledTask, SchedulerStatus, StartWatchingPayload, Task, TaskStatus, UpdateTaskPayload,
    WatcherInfo,
};
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tauri::{AppHandle, Manager};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

const DEFAULT_LOG_LEVEL: &str = "info";

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();
static LOG_FILTER: std::sync::OnceLock<reload::Handle<EnvFilter, Registry>> = std::sync::OnceLock::new();

#[derive(Clone)]
struct AppState {
    core: Arc<AutomationCore>,
}

// ─── Tasks ──────────────────────────────────────────────────────────────────

#[tauri::command]
fn get_all_tasks(state: tauri::State<'_, AppState>) -> Result<Vec<Task>, String> {
    state.core.get_all_tasks().map_err(to_client_error)
}

#[tauri::command]
fn get_task(state: tauri::State<'_, AppState>, task_id: String) -> Result<Task, String> {
    state.core.get_task(&task_id).map_err(to_client_error)
}

#[tauri::command]
fn add_task(state: tauri::State<'_, AppState>, payload: CreateTaskPayload) -> Result<Task, String> {
    state.core.add_task(payload).map_err(to_client_error)
}

#[tauri::command]
fn update_task(state: tauri::State<'_, AppState>, payload: UpdateTaskPayload) -> Result<Task, String> {
    state.core.update_task(payload).map_err(to_client_error)
}

#[tauri::command]
fn set_task_status(
    state: tauri::State<'_, AppState>,
    task_id: String,
    status: TaskStatus,
) -> Result<Task, String> {
    state
        .core
        .set_task_status(&task_id, status)
        .map_err(to_client_error)
}

#[tauri::command]
fn complete_task(state: tauri::State<'_, AppState>, task_id: String) -> Result<Task, String> {
    state.core.complete_task(&task_id).map_err(to_client_error)
}

#[tauri::command]
fn delete_task(state: tauri::State<'_, AppState>, task_id: String) -> Result<BooleanResponse, String> {
    state.core.delete_task(&task_id).map_err(to_client_error)
}

#[tauri::command]
fn export_tasks_json(state: tauri::State<'_, AppState>) -> Result<ExportResponse, String> {
    state.core.export_tasks_json().map_err(to_client_error)
}

#[tauri::command]
fn import_tasks_json(state: tauri::State<'_, AppState>, path: String) -> Result<ImportResponse, String> {
    state.core.import_tasks_json(&path).map_err(to_client_error)
}

// ─── Files ──────────────────────────────────────────────────────────────────

#[tauri::command]
fn scan_folder(state: tauri::State<'_, AppState>, folder_path: String) -> Result<Vec<FileSystemItem>, String> {
    state.core.scan_folder(&folder_path).map_err(to_client_error)
}

#[tauri::command]
fn add_organization_rule(
    state: tauri::State<'_, AppState>,
    payload: AddOrganizationRulePayload,
) -> Result<OrganizationRule, String> {
    state
        .core
        .add_organization_rule(payload)
        .map_err(to_client_error)
}

#[tauri::command]
fn get_organization_rules(
    state: tauri::State<'_, AppState>,
    base_folder: Option<String>,
) -> Result<Vec<OrganizationRule>, String> {
    state
        .core
        .get_organization_rules(base_folder.as_deref())
        .map_err(to_client_error)
}

#[tauri::command]
fn delete_organization_rule(
    state: tauri::State<'_, AppState>,
    rule_id: String,
    base_folder: Option<String>,
) -> Result<BooleanResponse, String> {
    state
        .core
        .delete_organization_rule(&rule_id, base_folder.as_deref())
        .map_err(to_client_error)
}

#[tauri::command]
fn clear_organization_rules(state: tauri::State<'_, AppState>, base_folder: Option<String>) -> Result<usize, String> {
    state
        .core
        .clear_organization_rules(base_folder.as_deref())
        .map_err(to_client_error)
}

#[tauri::command]
fn set_organization_rule_enabled(
    state: tauri::State<'_, AppState>,
    rule_id: String,
    enabled: bool,
) -> Result<OrganizationRule, String> {
    state
        .core
        .set_organization_rule_enabled(&rule_id, enabled)
        .map_err(to_client_error)
}

#[tauri::command]
fn apply_default_rules(
    state: tauri::State<'_, AppState>,
    base_folder: String,
) -> Result<Vec<OrganizationRule>, String> {
    state
        .core
        .apply_default_rules(&base_folder)
        .map_err(to_client_error)
}

#[tauri::command]
fn preview_organization(state: tauri::State<'_, AppState>, base_folder: String) -> Result<Vec<PlannedMove>, String> {
    state
        .core
        .preview_organization(&base_folder)
        .map_err(to_client_error)
}

#[tauri::command]
fn organize_files(state: tauri::State<'_, AppState>, base_folder: String) -> Result<OrganizeReport, String> {
    state.core.organize_files(&base_folder).map_err(to_client_error)
}

#[tauri::command]
fn organize_by_extension(state: tauri::State<'_, AppState>, folder_path: String) -> Result<OrganizeReport, String> {
    state
        .core
        .organize_by_extension(&folder_path)
        .map_err(to_client_error)
}

#[tauri::command]
async fn select_folder(app: AppHandle, default_path: Option<String>) -> Result<Option<String>, String> {
    use tauri_plugin_dialog::DialogExt;

    let picked = tauri::async_runtime::spawn_blocking(move || {
        let mut builder = app.dialog().file().set_can_create_directories(true);
        if let Some(path) = default_path {
            builder = builder.set_directory(path);
        }
        builder.blocking_pick_folder()
    })
    .await
    .map_err(to_client_error)?;

    Ok(picked.map(|path| path.to_string()))
}

#[tauri::command]
fn open_folder(app: AppHandle, path: String) -> Result<(), String> {
    use tauri_plugin_shell::ShellExt;

    if !Path::new(&path).is_dir() {
        return Err(to_client_error(errors::AppError::NotFound(format!(
            "Folder '{}' does not exist.",
            path
        ))));
    }
    #[allow(deprecated)]
    let opened = app.shell().open(path, None);
    opened.map_err(to_client_error)
}

// ─── Schedules ──────────────────────────────────────────────────────────────

#[tauri::command]
fn schedule_task(state: tauri::State<'_, AppState>, payload: ScheduleTaskPayload) -> Result<ScheduledTask, String> {
    state.core.schedule_task(payload).map_err(to_client_error)
}

#[tauri::command]
fn list_scheduled_tasks(state: tauri::State<'_, AppState>) -> Result<Vec<ScheduledTask>, String> {
    state.core.list_scheduled_tasks().map_err(to_client_error)
}

#[tauri::command]
fn unschedule_task(state: tauri::State<'_, AppState>, schedule_id: String) -> Result<BooleanResponse, String> {
    state.core.unschedule_task(&schedule_id).map_err(to_client_error)
}

#[tauri::command]
fn start_scheduler(state: tauri::State<'_, AppState>) -> Result<SchedulerStatus, String> {
    state.core.start_scheduler().map_err(to_client_error)
}

#[tauri::command]
fn scheduler_status(state: tauri::State<'_, AppState>) -> Result<SchedulerStatus, String> {
    state.core.scheduler_status().map_err(to_client_error)
}

// ─── Watchers ───────────────────────────────────────────────────────────────

#[tauri::command]
fn start_watching(state: tauri::State<'_, AppState>, payload: StartWatchingPayload) -> Result<WatcherInfo, String> {
    state.core.start_watching(payload).map_err(to_client_error)
}

#[tauri::command]
fn stop_watching(state: tauri::State<'_, AppState>, folder: String) -> Result<BooleanResponse, String> {
    state.core.stop_watching(&folder).map_err(to_client_error)
}

#[tauri::command]
fn list_watchers(state: tauri::State<'_, AppState>) -> Result<Vec<WatcherInfo>, String> {
    state.core.list_watchers().map_err(to_client_error)
}

// ─── Dashboard & settings ───────────────────────────────────────────────────

#[tauri::command]
fn get_stats(state: tauri::State<'_, AppState>) -> Result<DashboardStats, String> {
    state.core.get_stats().map_err(to_client_error)
}

#[tauri::command]
fn get_recent_activities(
    state: tauri::State<'_, AppState>,
    kind: Option<ActivityKind>,
) -> Result<Vec<Activity>, String> {
    state.core.get_recent_activities(kind).map_err(to_client_error)
}

#[tauri::command]
fn get_settings(state: tauri::State<'_, AppState>) -> Result<AppSettings, String> {
    state.core.get_settings().map_err(to_client_error)
}

#[tauri::command]
fn update_settings(state: tauri::State<'_, AppState>, settings: serde_json::Value) -> Result<AppSettings, String> {
    state.core.update_settings(settings).map_err(to_client_error)
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .plugin(tauri_plugin_shell::init())
        .plugin(tauri_plugin_dialog::init())
        .setup(|app| {
            let core = bootstrap(app).map_err(|error| format!("{:#}", error))?;

            let handle = app.handle().clone();
            tauri::async_runtime::spawn({
                let core = core.clone();
                async move {
                    core.attach_app_handle(handle).await;
                }
            });

            app.manage(AppState { core });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            get_all_tasks,
            get_task,
            add_task,
            update_task,
            set_task_status,
            complete_task,
            delete_task,
            export_tasks_json,
            import_tasks_json,
            scan_folder,
            add_organization_rule,
            get_organization_rules,
            delete_organization_rule,
            clear_organization_rules,
            set_organization_rule_enabled,
            apply_default_rules,
            preview_organization,
            organize_files,
            organize_by_extension,
            select_folder,
            open_folder,
            schedule_task,
            list_scheduled_tasks,
            unschedule_task,
            start_scheduler,
            scheduler_status,
            start_watching,
            stop_watching,
            list_watchers,
            get_stats,
            get_recent_activities,
            get_settings,
            update_settings
        ])
        .run(tauri::generate_context!())
        .expect("failed to run tauri app");
}

fn bootstrap(app: &tauri::App) -> anyhow::Result<Arc<AutomationCore>> {
    let app_data_dir = app.path().app_data_dir().context("resolve app data directory")?;
    std::fs::create_dir_all(&app_data_dir)
        .with_context(|| format!("create app data directory {}", app_data_dir.display()))?;
    init_tracing(&app_data_dir).map_err(anyhow::Error::msg)?;
    tracing::info!(data_dir = %app_data_dir.display(), "chronos starting");

    let core = AutomationCore::new(app_data_dir).context("open automation core")?;
    let settings = core.get_settings()?;
    apply_log_level(&settings.log_level);

    if settings.scheduler_autostart {
        if let Err(error) = core.start_scheduler() {
            tracing::warn!(error = %error, "scheduler autostart failed");
        }
    }
    Ok(core)
}

fn init_tracing(app_data_dir: &Path) -> Result<(), String> {
    let log_dir = app_data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "chronos.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let env_directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let (filter, handle) = reload::Layer::new(log_filter(env_directives.as_deref(), DEFAULT_LOG_LEVEL));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
        .try_init()
        .map_err(|error| error.to_string())?;
    let _ = LOG_FILTER.set(handle);
    Ok(())
}

/// Switches to the stored `logLevel` once settings are readable. `RUST_LOG`
/// still takes precedence.
fn apply_log_level(level: &str) {
    let Some(handle) = LOG_FILTER.get() else {
        return;
    };
    let env_directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    if let Err(error) = handle.reload(log_filter(env_directives.as_deref(), level)) {
        tracing::warn!(error = %error, "failed to apply stored log level");
    }
}

fn log_filter(env_directives: Option<&str>, fallback_level: &str) -> EnvFilter {
    env_directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(fallback_level).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}

#[cfg(test)]
mod tests {
    use super::log_filter;

    #[test]
    fn env_directives_win_over_stored_level() {
        assert_eq!(log_filter(Some("warn"), "debug").to_string(), "warn");
        assert_eq!(log_filter(None, "debug").to_string(), "debug");
        assert_eq!(log_filter(Some("chronos=bogus"), "debug").to_string(), "debug");
        assert_eq!(log_filter(None, "chronos=bogus").to_string(), "info");
    }
}
