use crate::errors::{AppError, AppResult};
use crate::models::ScheduledTask;
use chrono::{Local, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use tokio::time::Duration;

pub const MIN_POLL_SECONDS: u64 = 1;
/// Entries fire on an exact minute match, so the loop must wake at least once
/// per minute.
pub const MAX_POLL_SECONDS: u64 = 60;

static TIME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{2}):(\d{2})$").expect("valid time regex"));

type TickFuture = Pin<Box<dyn Future<Output = usize> + Send>>;
pub type TickHandler = Arc<dyn Fn(NaiveDateTime) -> TickFuture + Send + Sync>;

/// Validates a wall-clock `HH:MM` string and returns it unchanged.
pub fn parse_schedule_time(raw: &str) -> AppResult<String> {
    let raw = raw.trim();
    let invalid = || AppError::Validation(format!("Invalid time '{}'. Use HH:MM.", raw));
    let captures = TIME_PATTERN.captures(raw).ok_or_else(invalid)?;
    let hours: u32 = captures[1].parse().map_err(|_| invalid())?;
    let minutes: u32 = captures[2].parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    Ok(raw.to_string())
}

/// Entries whose minute is `now` and that have not fired yet today.
pub fn due_entries(entries: &[ScheduledTask], now: NaiveDateTime) -> Vec<ScheduledTask> {
    let current = now.format("%H:%M").to_string();
    let today = now.date();
    entries
        .iter()
        .filter(|entry| entry.enabled && entry.time == current && entry.last_run_on != Some(today))
        .cloned()
        .collect()
}

pub fn clamp_poll_seconds(seconds: u64) -> u64 {
    seconds.clamp(MIN_POLL_SECONDS, MAX_POLL_SECONDS)
}

#[derive(Clone)]
pub struct Scheduler {
    running: Arc<AtomicBool>,
    poll_seconds: Arc<AtomicU64>,
    notify: Arc<Notify>,
    executor: Arc<RwLock<Option<TickHandler>>>,
}

impl Scheduler {
    pub fn new(poll_seconds: u64) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            poll_seconds: Arc::new(AtomicU64::new(clamp_poll_seconds(poll_seconds))),
            notify: Arc::new(Notify::new()),
            executor: Arc::new(RwLock::new(None)),
        }
    }

    pub fn set_executor(&self, executor: TickHandler) {
        let mut writer = self
            .executor
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *writer = Some(executor);
    }

    pub fn poll_seconds(&self) -> u64 {
        self.poll_seconds.load(Ordering::SeqCst)
    }

    /// Applies a new interval; a sleeping loop wakes up and picks it up.
    pub fn set_poll_seconds(&self, seconds: u64) -> u64 {
        let clamped = clamp_poll_seconds(seconds);
        self.poll_seconds.store(clamped, Ordering::SeqCst);
        self.notify.notify_one();
        clamped
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the polling loop. Returns `false` when it is already running.
    pub fn start(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let scheduler = self.clone();
        tauri::async_runtime::spawn(async move {
            scheduler.run_loop().await;
        });
        tracing::info!(poll_seconds = self.poll_seconds(), "scheduler started");
        true
    }

    async fn run_loop(self) {
        loop {
            let fired = self.tick(Local::now().naive_local()).await;
            if fired > 0 {
                tracing::info!(fired, "scheduled tasks fired");
            }

            let delay = Duration::from_secs(self.poll_seconds());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.notify.notified() => {}
            }
        }
    }

    async fn tick(&self, now: NaiveDateTime) -> usize {
        let executor = self
            .executor
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match executor {
            Some(executor) => executor(now).await,
            None => 0,
        }
    }
}
