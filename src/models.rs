use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            1 => Some(Self::InProgress),
            2 => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace(['_', '-'], " ").as_str() {
            "pending" => Some(Self::Pending),
            "in progress" | "inprogress" => Some(Self::InProgress),
            "completed" | "done" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Resolves the three legacy boolean columns. Rows written by other tools may
    /// carry more than one flag; completion wins, then progress.
    pub fn from_flags(completed: bool, in_progress: bool, _pending: bool) -> Self {
        if completed {
            Self::Completed
        } else if in_progress {
            Self::InProgress
        } else {
            Self::Pending
        }
    }

    /// `(completed, in_progress, pending)`
    pub fn flags(self) -> (bool, bool, bool) {
        (
            self == Self::Completed,
            self == Self::InProgress,
            self == Self::Pending,
        )
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTaskStatus {
    Code(i64),
    Label(String),
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawTaskStatus::deserialize(deserializer)? {
            RawTaskStatus::Code(code) => {
                Self::from_code(code).ok_or_else(|| D::Error::custom(format!("unknown status code {}", code)))
            }
            RawTaskStatus::Label(label) => {
                Self::from_label(&label).ok_or_else(|| D::Error::custom(format!("unknown status '{}'", label)))
            }
        }
    }
}

const DUE_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parses the ISO-8601 shapes the frontend and older exports send. A bare date
/// is due at midnight.
pub fn parse_due_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for format in DUE_DATE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed);
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.naive_local());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

pub fn format_due_date(value: &NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub const MIN_PRIORITY: i32 = 1;
pub const MAX_PRIORITY: i32 = 3;
pub const DEFAULT_PRIORITY: i32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub due_date: Option<NaiveDateTime>,
    pub priority: i32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskPayload {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub due_date: Option<String>,
    pub priority: Option<i32>,
    pub status: Option<TaskStatus>,
}

/// Empty `title`/`description` and a zero `priority` keep the stored value.
/// A missing `due_date` clears it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskPayload {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub due_date: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub status: TaskStatus,
}

/// Lenient shape accepted by task import. Older exports carried only a
/// `completed` flag.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskImportRecord {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "due_date")]
    pub due_date: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default, alias = "in_progress")]
    pub in_progress: Option<bool>,
}

impl TaskImportRecord {
    pub fn resolved_status(&self) -> TaskStatus {
        if let Some(status) = self.status {
            return status;
        }
        TaskStatus::from_flags(
            self.completed.unwrap_or(false),
            self.in_progress.unwrap_or(false),
            true,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub path: String,
    pub size: Option<String>,
    pub size_bytes: Option<u64>,
    pub extension: Option<String>,
    #[serde(default)]
    pub children: Vec<FileSystemItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationRule {
    pub id: String,
    pub base_folder: String,
    pub folder_name: String,
    pub full_path: String,
    pub extensions: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOrganizationRulePayload {
    #[serde(alias = "baseFolderDirectory")]
    pub base_folder: String,
    pub folder: String,
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlannedMove {
    pub source: String,
    pub destination: String,
    pub rule_id: String,
    pub folder_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MoveOutcome {
    pub source: String,
    pub destination: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizeReport {
    pub base_folder: String,
    pub moved: usize,
    pub failed: usize,
    pub outcomes: Vec<MoveOutcome>,
}

impl OrganizeReport {
    pub fn from_outcomes(base_folder: &str, outcomes: Vec<MoveOutcome>) -> Self {
        let moved = outcomes.iter().filter(|outcome| outcome.success).count();
        Self {
            base_folder: base_folder.to_string(),
            moved,
            failed: outcomes.len() - moved,
            outcomes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Task,
    Organization,
    Schedule,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Organization => "organization",
            Self::Schedule => "schedule",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub kind: ActivityKind,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub tasks_completed: i64,
    pub files_organized: i64,
    pub pending_tasks: i64,
    pub scheduled_tasks: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: String,
    pub task_id: String,
    pub task_title: String,
    pub time: String,
    pub enabled: bool,
    pub last_run_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTaskPayload {
    pub task_id: String,
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub poll_seconds: u64,
    pub scheduled: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWatchingPayload {
    pub folder: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatcherInfo {
    pub folder: String,
    pub pattern: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub scheduler_poll_seconds: u64,
    pub scheduler_autostart: bool,
    pub watch_debounce_ms: u64,
    pub skip_hidden_files: bool,
    pub log_level: String,
    pub default_base_folder: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            scheduler_poll_seconds: 30,
            scheduler_autostart: true,
            watch_debounce_ms: 500,
            skip_hidden_files: true,
            log_level: "info".to_string(),
            default_base_folder: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEventEnvelope {
    pub r#type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub event_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub path: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub imported: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::{format_due_date, parse_due_date, TaskImportRecord, TaskStatus, UpdateTaskPayload};

    #[test]
    fn status_accepts_codes_and_labels() {
        let from_code: TaskStatus = serde_json::from_value(serde_json::json!(1)).expect("code");
        assert_eq!(from_code, TaskStatus::InProgress);
        let from_label: TaskStatus = serde_json::from_value(serde_json::json!("In Progress")).expect("label");
        assert_eq!(from_label, TaskStatus::InProgress);
        assert!(serde_json::from_value::<TaskStatus>(serde_json::json!(7)).is_err());
        assert_eq!(
            serde_json::to_value(TaskStatus::Completed).expect("serialize"),
            serde_json::json!("Completed")
        );
    }

    #[test]
    fn flags_are_mutually_exclusive() {
        for status in [TaskStatus::Pending, TaskStatus::InProgress, TaskStatus::Completed] {
            let (completed, in_progress, pending) = status.flags();
            assert_eq!([completed, in_progress, pending].iter().filter(|flag| **flag).count(), 1);
            assert_eq!(TaskStatus::from_flags(completed, in_progress, pending), status);
        }
        assert_eq!(TaskStatus::from_flags(true, true, true), TaskStatus::Completed);
        assert_eq!(TaskStatus::from_flags(false, false, false), TaskStatus::Pending);
    }

    #[test]
    fn update_payload_defaults_mean_keep_existing() {
        let payload: UpdateTaskPayload =
            serde_json::from_value(serde_json::json!({ "id": "abc" })).expect("payload");
        assert!(payload.title.is_empty());
        assert_eq!(payload.priority, 0);
        assert_eq!(payload.status, TaskStatus::Pending);
    }

    #[test]
    fn legacy_import_record_uses_completed_flag() {
        let record: TaskImportRecord = serde_json::from_value(serde_json::json!({
            "title": "Water plants",
            "description": "balcony",
            "completed": true
        }))
        .expect("record");
        assert_eq!(record.resolved_status(), TaskStatus::Completed);
    }

    #[test]
    fn due_dates_accept_date_only_and_datetime() {
        let date_only = parse_due_date("2024-06-15").expect("date");
        assert_eq!(format_due_date(&date_only), "2024-06-15T00:00:00");
        let with_time = parse_due_date("2024-06-15T09:30").expect("datetime");
        assert_eq!(format_due_date(&with_time), "2024-06-15T09:30:00");
        let with_fraction = parse_due_date("2024-06-15T09:30:12.250000").expect("fraction");
        assert_eq!(format_due_date(&with_fraction), "2024-06-15T09:30:12");
        assert!(parse_due_date("").is_none());
        assert!(parse_due_date("next tuesday").is_none());
    }
}
