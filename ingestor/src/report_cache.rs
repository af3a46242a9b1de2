use crate::config_store::write_atomic;
use crate::errors::Result;
use crate::model::Report;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

pub const NO_REPORT: &str = "No AI report available yet.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// One plain-text file holding the newest report from any device.
    Global,
    /// A JSON document keeping the newest report of each device.
    PerDevice,
}

impl FromStr for CachePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "global" => Ok(CachePolicy::Global),
            "per-device" | "per_device" | "device" => Ok(CachePolicy::PerDevice),
            other => Err(format!("unknown report cache policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedReport {
    body: String,
    generated_at: DateTime<Utc>,
}

pub struct ReportCache {
    path: PathBuf,
    policy: CachePolicy,
    write_lock: Mutex<()>,
}

impl ReportCache {
    pub fn new(path: impl Into<PathBuf>, policy: CachePolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            write_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub async fn store(&self, report: &Report) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match self.policy {
            CachePolicy::Global => write_atomic(&self.path, report.body.as_bytes()).await,
            CachePolicy::PerDevice => {
                let mut entries = load_entries(&self.path).await?;
                entries.insert(
                    report.device_id.clone(),
                    CachedReport {
                        body: report.body.clone(),
                        generated_at: report.generated_at,
                    },
                );
                write_atomic(&self.path, &serde_json::to_vec_pretty(&entries)?).await
            }
        }
    }

    // Global ignores the device filter; per-device with `None` picks the newest.
    pub async fn load(&self, device_id: Option<&str>) -> Result<Option<String>> {
        match self.policy {
            CachePolicy::Global => match fs::read_to_string(&self.path).await {
                Ok(body) => Ok(Some(body)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            },
            CachePolicy::PerDevice => {
                let entries = load_entries(&self.path).await?;
                let entry = match device_id {
                    Some(device_id) => entries.get(device_id),
                    None => entries.values().max_by_key(|e| e.generated_at),
                };
                Ok(entry.map(|e| e.body.clone()))
            }
        }
    }
}

// The cache is disposable; an unreadable document is replaced on the next store.
async fn load_entries(path: &Path) -> Result<BTreeMap<String, CachedReport>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice(&bytes) {
        Ok(entries) => Ok(entries),
        Err(e) => {
            warn!("Ignoring unreadable report cache {}: {}", path.display(), e);
            Ok(BTreeMap::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Reading;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn report(device_id: &str, body: &str, minute: u32) -> Report {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap();
        Report {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            generated_at: at,
            body: body.to_string(),
            source_reading: Reading {
                device_id: device_id.to_string(),
                timestamp: at - Duration::seconds(1),
                temperature: 25.0,
                humidity: 40.0,
                status: "off".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_global_cache_keeps_latest_only() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReportCache::new(dir.path().join("last_report.txt"), CachePolicy::Global);
        assert_eq!(cache.load(None).await.unwrap(), None);

        cache.store(&report("room1", "first", 0)).await.unwrap();
        cache.store(&report("room2", "second", 1)).await.unwrap();

        assert_eq!(cache.load(None).await.unwrap().as_deref(), Some("second"));
        assert_eq!(cache.load(Some("room1")).await.unwrap().as_deref(), Some("second"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("last_report.txt")).unwrap(),
            "second"
        );
    }

    #[tokio::test]
    async fn test_per_device_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReportCache::new(dir.path().join("last_reports.json"), CachePolicy::PerDevice);

        cache.store(&report("room1", "room1 a", 0)).await.unwrap();
        cache.store(&report("room2", "room2 a", 1)).await.unwrap();
        cache.store(&report("room1", "room1 b", 2)).await.unwrap();

        assert_eq!(cache.load(Some("room1")).await.unwrap().as_deref(), Some("room1 b"));
        assert_eq!(cache.load(Some("room2")).await.unwrap().as_deref(), Some("room2 a"));
        assert_eq!(cache.load(Some("room3")).await.unwrap(), None);
        assert_eq!(cache.load(None).await.unwrap().as_deref(), Some("room1 b"));
    }

    #[tokio::test]
    async fn test_unreadable_per_device_cache_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_reports.json");
        std::fs::write(&path, "not json").unwrap();

        let cache = ReportCache::new(&path, CachePolicy::PerDevice);
        assert_eq!(cache.load(None).await.unwrap(), None);
        cache.store(&report("room1", "fresh", 0)).await.unwrap();
        assert_eq!(cache.load(Some("room1")).await.unwrap().as_deref(), Some("fresh"));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("global".parse::<CachePolicy>().unwrap(), CachePolicy::Global);
        assert_eq!("per-device".parse::<CachePolicy>().unwrap(), CachePolicy::PerDevice);
        assert!("sometimes".parse::<CachePolicy>().is_err());
    }
}
