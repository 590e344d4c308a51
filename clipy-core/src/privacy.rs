//! Privacy block lists
//!
//! Captures from a blocked application, or text copied from a blocked web
//! host, are dropped before anything is stored.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Persisted block lists. Apps match exactly; hosts are kept lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacySettings {
    pub blocked_apps: Vec<String>,
    pub blocked_hosts: Vec<String>,
}

impl PrivacySettings {
    pub fn is_blocked(&self, app: Option<&str>, host: Option<&str>) -> bool {
        if let Some(app) = app {
            if self.blocked_apps.iter().any(|blocked| blocked == app) {
                return true;
            }
        }
        if let Some(host) = host {
            let host = host.to_lowercase();
            if self.blocked_hosts.iter().any(|blocked| *blocked == host) {
                return true;
            }
        }
        false
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().to_lowercase()
}

/// Shared, live-updatable view of the privacy settings
#[derive(Debug, Default)]
pub struct PrivacyFilter {
    settings: RwLock<PrivacySettings>,
}

impl PrivacyFilter {
    pub fn new(mut settings: PrivacySettings) -> Self {
        settings.blocked_hosts = settings.blocked_hosts.iter().map(|h| normalize_host(h)).collect();
        Self { settings: RwLock::new(settings) }
    }

    pub fn is_blocked(&self, app: Option<&str>, host: Option<&str>) -> bool {
        self.settings.read().is_blocked(app, host)
    }

    pub fn snapshot(&self) -> PrivacySettings {
        self.settings.read().clone()
    }

    /// Replace both lists at once
    pub fn update(&self, settings: PrivacySettings) {
        *self.settings.write() = Self::new(settings).settings.into_inner();
    }

    /// Returns false if the app was empty or already blocked
    pub fn block_app(&self, app: &str) -> bool {
        if app.is_empty() {
            return false;
        }
        let mut settings = self.settings.write();
        if settings.blocked_apps.iter().any(|a| a == app) {
            return false;
        }
        settings.blocked_apps.push(app.to_string());
        true
    }

    pub fn unblock_app(&self, app: &str) -> bool {
        let mut settings = self.settings.write();
        let before = settings.blocked_apps.len();
        settings.blocked_apps.retain(|a| a != app);
        settings.blocked_apps.len() != before
    }

    /// Returns false if the host was empty or already blocked
    pub fn block_host(&self, host: &str) -> bool {
        let host = normalize_host(host);
        if host.is_empty() {
            return false;
        }
        let mut settings = self.settings.write();
        if settings.blocked_hosts.contains(&host) {
            return false;
        }
        settings.blocked_hosts.push(host);
        true
    }

    pub fn unblock_host(&self, host: &str) -> bool {
        let host = normalize_host(host);
        let mut settings = self.settings.write();
        let before = settings.blocked_hosts.len();
        settings.blocked_hosts.retain(|h| *h != host);
        settings.blocked_hosts.len() != before
    }
}
