#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use github_watcher::{
    ActivitySource, Alert, DispatchError, MessageSink, NotificationEvent, RawConfig, SourceError,
    StarEvent, SubjectType, WatcherConfig, validate,
};

pub fn notification(id: &str) -> NotificationEvent {
    NotificationEvent {
        id: id.to_string(),
        repository_full_name: "octo/hello".to_string(),
        subject_title: format!("Subject {}", id),
        subject_type: SubjectType::Issue,
        subject_url: Some(format!("https://api.github.com/repos/octo/hello/issues/{}", id)),
        updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    }
}

pub fn star(repository: &str, user: &str) -> StarEvent {
    StarEvent {
        repository_full_name: repository.to_string(),
        starring_user: user.to_string(),
        starred_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    }
}

pub fn raw_config(interval: i64, watch_stars: bool) -> RawConfig {
    RawConfig {
        token: "ghp_test".to_string(),
        interval,
        watch_stars,
        ..RawConfig::default()
    }
}

pub fn config(interval: i64, watch_stars: bool) -> WatcherConfig {
    validate(&raw_config(interval, watch_stars)).unwrap()
}

fn unavailable(url: &str) -> SourceError {
    SourceError::Status {
        status: 503,
        url: url.to_string(),
    }
}

/// Scriptable in-memory GitHub.
#[derive(Default)]
pub struct MockSource {
    notifications: Mutex<Vec<NotificationEvent>>,
    repositories: Mutex<Vec<String>>,
    stargazers: Mutex<HashMap<String, Vec<StarEvent>>>,
    failing_repositories: Mutex<HashSet<String>>,
    fail_notifications: AtomicBool,
    fail_repositories: AtomicBool,
    delay: Mutex<Option<Duration>>,
    pub notification_calls: AtomicUsize,
    pub repository_calls: AtomicUsize,
    pub stargazer_calls: AtomicUsize,
    pub tokens: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_notifications(&self, notifications: Vec<NotificationEvent>) {
        *self.notifications.lock().unwrap() = notifications;
    }

    pub fn set_repositories(&self, repositories: &[&str]) {
        *self.repositories.lock().unwrap() = repositories.iter().map(|r| r.to_string()).collect();
    }

    pub fn set_stargazers(&self, repository: &str, stars: Vec<StarEvent>) {
        self.stargazers
            .lock()
            .unwrap()
            .insert(repository.to_string(), stars);
    }

    pub fn fail_notifications(&self, fail: bool) {
        self.fail_notifications.store(fail, Ordering::SeqCst);
    }

    pub fn fail_repositories(&self, fail: bool) {
        self.fail_repositories.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stargazers_of(&self, repository: &str, fail: bool) {
        let mut failing = self.failing_repositories.lock().unwrap();
        if fail {
            failing.insert(repository.to_string());
        } else {
            failing.remove(repository);
        }
    }

    /// Every notifications fetch sleeps this long before reading its data.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn notification_calls(&self) -> usize {
        self.notification_calls.load(Ordering::SeqCst)
    }

    pub fn repository_calls(&self) -> usize {
        self.repository_calls.load(Ordering::SeqCst)
    }

    pub fn stargazer_calls(&self) -> usize {
        self.stargazer_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.notification_calls() + self.repository_calls() + self.stargazer_calls()
    }
}

#[async_trait]
impl ActivitySource for MockSource {
    async fn fetch_notifications(
        &self,
        token: &str,
    ) -> Result<Vec<NotificationEvent>, SourceError> {
        self.notification_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(token.to_string());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_notifications.load(Ordering::SeqCst) {
            return Err(unavailable("/notifications"));
        }
        Ok(self.notifications.lock().unwrap().clone())
    }

    async fn fetch_repositories(&self, _token: &str) -> Result<Vec<String>, SourceError> {
        self.repository_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_repositories.load(Ordering::SeqCst) {
            return Err(unavailable("/user/repos"));
        }
        Ok(self.repositories.lock().unwrap().clone())
    }

    async fn fetch_stargazers(
        &self,
        _token: &str,
        repository: &str,
    ) -> Result<Vec<StarEvent>, SourceError> {
        self.stargazer_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_repositories.lock().unwrap().contains(repository) {
            return Err(unavailable(repository));
        }
        Ok(self
            .stargazers
            .lock()
            .unwrap()
            .get(repository)
            .cloned()
            .unwrap_or_default())
    }
}

/// Records every alert it is handed.
#[derive(Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
    reject: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.alerts().into_iter().map(|a| a.title).collect()
    }

    pub fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    fn name(&self) -> &'static str {
        "Recording"
    }

    async fn send_alert(&self, alert: &Alert) -> Result<(), DispatchError> {
        self.alerts.lock().unwrap().push(alert.clone());
        if self.reject.load(Ordering::SeqCst) {
            return Err(DispatchError::Rejected("rejected by test".to_string()));
        }
        Ok(())
    }
}
