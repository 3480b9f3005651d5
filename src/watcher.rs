use crate::errors::{AppError, AppResult};
use crate::models::WatcherInfo;
use chrono::{DateTime, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub type WatchCallback = Arc<dyn Fn(PathBuf) + Send + Sync>;

const DEBOUNCE_RETENTION: Duration = Duration::from_secs(5);

/// File-name matcher for `*` and `?` wildcards, e.g. `*.txt`.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    pattern: String,
    regex: Regex,
}

impl PatternMatcher {
    pub fn new(pattern: &str) -> AppResult<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(AppError::Validation("Watch pattern must not be empty.".to_string()));
        }

        let mut expression = String::from("^");
        for ch in pattern.chars() {
            match ch {
                '*' => expression.push_str(".*"),
                '?' => expression.push('.'),
                other => expression.push_str(&regex::escape(&other.to_string())),
            }
        }
        expression.push('$');

        let regex = Regex::new(&expression)
            .map_err(|error| AppError::Validation(format!("Invalid watch pattern '{}': {}", pattern, error)))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| self.regex.is_match(&name.to_string_lossy()))
            .unwrap_or(false)
    }
}

/// Per-path debounce. Returns `true` when the path may fire now.
fn debounce_allows(map: &Mutex<HashMap<PathBuf, Instant>>, path: &Path, window: Duration) -> bool {
    let mut map = map.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let now = Instant::now();
    if map.len() > 100 {
        map.retain(|_, last| now.duration_since(*last) < DEBOUNCE_RETENTION.max(window));
    }
    if let Some(last) = map.get(path) {
        if now.duration_since(*last) < window {
            return false;
        }
    }
    map.insert(path.to_path_buf(), now);
    true
}

/// Non-recursive watch over one folder. Dropping it stops the underlying
/// `notify` watcher.
pub struct FolderWatcher {
    folder: PathBuf,
    matcher: PatternMatcher,
    started_at: DateTime<Utc>,
    _watcher: RecommendedWatcher,
}

impl FolderWatcher {
    pub fn start(folder: &Path, pattern: &str, debounce: Duration, callback: WatchCallback) -> AppResult<Self> {
        if !folder.is_dir() {
            return Err(AppError::NotFound(format!(
                "Folder '{}' does not exist.",
                folder.display()
            )));
        }

        let matcher = PatternMatcher::new(pattern)?;
        let filter = matcher.clone();
        let debounce_map: Mutex<HashMap<PathBuf, Instant>> = Mutex::new(HashMap::new());

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(error) => {
                    tracing::warn!(error = %error, "folder watcher error");
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            for path in event.paths {
                if !path.is_file() || !filter.matches(&path) {
                    continue;
                }
                if !debounce_allows(&debounce_map, &path, debounce) {
                    continue;
                }
                callback(path);
            }
        })?;
        watcher.watch(folder, RecursiveMode::NonRecursive)?;

        tracing::info!(folder = %folder.display(), pattern = %matcher.pattern(), "folder watch started");
        Ok(Self {
            folder: folder.to_path_buf(),
            matcher,
            started_at: Utc::now(),
            _watcher: watcher,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn info(&self) -> WatcherInfo {
        WatcherInfo {
            folder: self.folder.to_string_lossy().into_owned(),
            pattern: self.matcher.pattern().to_string(),
            started_at: self.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{debounce_allows, FolderWatcher, PatternMatcher, WatchCallback};
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn glob_patterns_match_whole_file_names() {
        let matcher = PatternMatcher::new("*.txt").expect("pattern");
        assert!(matcher.matches(Path::new("/tmp/notes.txt")));
        assert!(!matcher.matches(Path::new("/tmp/notes.txt.bak")));
        assert!(!matcher.matches(Path::new("/tmp/notesXtxt")));

        let single = PatternMatcher::new("report-?.csv").expect("pattern");
        assert!(single.matches(Path::new("report-1.csv")));
        assert!(!single.matches(Path::new("report-10.csv")));

        assert!(PatternMatcher::new("   ").is_err());
    }

    #[test]
    fn debounce_suppresses_rapid_repeats() {
        let map = Mutex::new(HashMap::new());
        let path = Path::new("/tmp/a.txt");
        assert!(debounce_allows(&map, path, Duration::from_secs(60)));
        assert!(!debounce_allows(&map, path, Duration::from_secs(60)));
        assert!(debounce_allows(&map, Path::new("/tmp/b.txt"), Duration::from_secs(60)));
        assert!(debounce_allows(&map, path, Duration::ZERO));
    }

    #[test]
    fn start_rejects_missing_folder_and_reports_info() {
        let dir = tempfile::tempdir().expect("tempdir");
        let callback: WatchCallback = Arc::new(|_path| {});
        assert!(FolderWatcher::start(
            &dir.path().join("missing"),
            "*.txt",
            Duration::from_millis(100),
            callback.clone()
        )
        .is_err());

        let watcher =
            FolderWatcher::start(dir.path(), "*.txt", Duration::from_millis(100), callback).expect("watcher");
        let info = watcher.info();
        assert_eq!(info.pattern, "*.txt");
        assert_eq!(Path::new(&info.folder), dir.path());
    }
}
