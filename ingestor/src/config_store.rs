// Layout: `{ "<device_id>": { "temp_min": 20.0, "temp_max": 30.0 }, ... }`

use crate::errors::{Error, Result};
use crate::metrics::CORRUPT_RECORDS_TOTAL;
use crate::model::ThresholdConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Refuse to start.
    Strict,
    /// Move the file aside to `<name>.corrupt` and start empty.
    Permissive,
}

impl FromStr for LoadPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(LoadPolicy::Strict),
            "permissive" => Ok(LoadPolicy::Permissive),
            other => Err(format!("unknown config load policy '{}'", other)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredThresholds {
    temp_min: f64,
    temp_max: f64,
}

pub struct ConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub async fn open(path: impl Into<PathBuf>, policy: LoadPolicy) -> Result<Self> {
        let path = path.into();

        match load_document(&path).await {
            Ok(doc) => info!(
                "Settings store {} opened with {} devices",
                path.display(),
                doc.len()
            ),
            Err(e @ Error::StoreCorruption { .. }) => match policy {
                LoadPolicy::Strict => return Err(e),
                LoadPolicy::Permissive => {
                    let aside = sibling(&path, ".corrupt");
                    error!(
                        "{}; moving it to {} and starting with empty settings",
                        e,
                        aside.display()
                    );
                    fs::rename(&path, &aside).await?;
                }
            },
            Err(e) => return Err(e),
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub async fn get(&self, device_id: &str) -> Result<ThresholdConfig> {
        let doc = match load_document(&self.path).await {
            Ok(doc) => doc,
            Err(e @ Error::StoreCorruption { .. }) => {
                CORRUPT_RECORDS_TOTAL.inc();
                error!("{}; treating settings as empty", e);
                Map::new()
            }
            Err(e) => return Err(e),
        };

        let entry = doc
            .get(device_id)
            .ok_or_else(|| Error::NotFound("Device not found".to_string()))?;

        match serde_json::from_value::<StoredThresholds>(entry.clone()) {
            Ok(stored) => Ok(ThresholdConfig {
                device_id: device_id.to_string(),
                temp_min: stored.temp_min,
                temp_max: stored.temp_max,
            }),
            Err(e) => {
                CORRUPT_RECORDS_TOTAL.inc();
                warn!(
                    device_id,
                    "Skipping malformed settings entry in {}: {}",
                    self.path.display(),
                    e
                );
                Err(Error::NotFound("Device not found".to_string()))
            }
        }
    }

    // Other entries are carried over untouched, even ones that no longer parse.
    pub async fn set(&self, config: &ThresholdConfig) -> Result<()> {
        if config.is_inverted() {
            warn!(
                device_id = %config.device_id,
                "temp_min {} is above temp_max {}; saving as given",
                config.temp_min,
                config.temp_max
            );
        }

        let _guard = self.write_lock.lock().await;
        let mut doc = load_document(&self.path).await?;
        doc.insert(
            config.device_id.clone(),
            serde_json::to_value(StoredThresholds {
                temp_min: config.temp_min,
                temp_max: config.temp_max,
            })?,
        );

        write_atomic(&self.path, &serde_json::to_vec_pretty(&doc)?).await?;
        info!(
            device_id = %config.device_id,
            "Saved thresholds min={} max={}",
            config.temp_min,
            config.temp_max
        );
        Ok(())
    }
}

async fn load_document(path: &Path) -> Result<Map<String, Value>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(e.into()),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(doc)) => Ok(doc),
        Ok(_) => Err(Error::store_corruption(path, "top-level value is not an object")),
        Err(e) => Err(Error::store_corruption(path, e)),
    }
}

pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = sibling(path, ".tmp");
    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("store"));
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn config(device_id: &str, temp_min: f64, temp_max: f64) -> ThresholdConfig {
        ThresholdConfig {
            device_id: device_id.to_string(),
            temp_min,
            temp_max,
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("settings.json"), LoadPolicy::Strict)
            .await
            .unwrap();

        store.set(&config("room1", 20.0, 30.0)).await.unwrap();
        assert_eq!(store.get("room1").await.unwrap(), config("room1", 20.0, 30.0));
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("settings.json"), LoadPolicy::Strict)
            .await
            .unwrap();

        assert!(matches!(store.get("room1").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = ConfigStore::open(&path, LoadPolicy::Strict).await.unwrap();

        store.set(&config("room1", 20.0, 30.0)).await.unwrap();
        store.set(&config("room2", 18.0, 24.0)).await.unwrap();
        store.set(&config("room1", 21.5, 27.5)).await.unwrap();

        assert_eq!(store.get("room1").await.unwrap(), config("room1", 21.5, 27.5));
        assert_eq!(store.get("room2").await.unwrap(), config("room2", 18.0, 24.0));

        let doc: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(doc["room1"]["temp_max"], 27.5);
        assert!(!sibling(&path, ".tmp").exists());
    }

    #[tokio::test]
    async fn test_inverted_thresholds_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("settings.json"), LoadPolicy::Strict)
            .await
            .unwrap();

        store.set(&config("room1", 30.0, 20.0)).await.unwrap();
        assert_eq!(store.get("room1").await.unwrap().temp_min, 30.0);
    }

    #[tokio::test]
    async fn test_reads_legacy_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"room1": {"temp_min": 20.0, "temp_max": 30.0}}"#).unwrap();

        let store = ConfigStore::open(&path, LoadPolicy::Strict).await.unwrap();
        assert_eq!(store.get("room1").await.unwrap(), config("room1", 20.0, 30.0));
    }

    #[tokio::test]
    async fn test_strict_policy_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = ConfigStore::open(&path, LoadPolicy::Strict).await;
        assert!(matches!(result, Err(Error::StoreCorruption { .. })));
    }

    #[tokio::test]
    async fn test_permissive_policy_moves_corrupt_file_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let store = ConfigStore::open(&path, LoadPolicy::Permissive).await.unwrap();
        assert!(matches!(store.get("room1").await, Err(Error::NotFound(_))));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("settings.json.corrupt")).unwrap(),
            "[1, 2, 3]"
        );

        store.set(&config("room1", 20.0, 30.0)).await.unwrap();
        assert_eq!(store.get("room1").await.unwrap(), config("room1", 20.0, 30.0));
    }

    #[tokio::test]
    async fn test_malformed_entry_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"room1": {"temp_min": "cold"}, "room2": {"temp_min": 18, "temp_max": 24}}"#,
        )
        .unwrap();

        let store = ConfigStore::open(&path, LoadPolicy::Strict).await.unwrap();
        assert!(matches!(store.get("room1").await, Err(Error::NotFound(_))));
        assert_eq!(store.get("room2").await.unwrap(), config("room2", 18.0, 24.0));

        // Rewriting another device keeps the malformed entry for the operator to fix.
        store.set(&config("room3", 19.0, 25.0)).await.unwrap();
        let doc: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(doc["room1"]["temp_min"], "cold");
    }

    #[tokio::test]
    async fn test_corruption_after_startup_blocks_writes_not_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = ConfigStore::open(&path, LoadPolicy::Strict).await.unwrap();
        store.set(&config("room1", 20.0, 30.0)).await.unwrap();

        std::fs::write(&path, "garbage").unwrap();

        assert!(matches!(store.get("room1").await, Err(Error::NotFound(_))));
        assert!(matches!(
            store.set(&config("room2", 20.0, 30.0)).await,
            Err(Error::StoreCorruption { .. })
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "garbage");
    }

    #[tokio::test]
    async fn test_concurrent_sets_keep_every_device() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            ConfigStore::open(dir.path().join("settings.json"), LoadPolicy::Strict)
                .await
                .unwrap(),
        );

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .set(&config(&format!("room{i}"), i as f64, i as f64 + 10.0))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for i in 0..16 {
            let got = store.get(&format!("room{i}")).await.unwrap();
            assert_eq!(got.temp_min, i as f64);
        }
    }

    #[test]
    fn test_load_policy_from_str() {
        assert_eq!("strict".parse::<LoadPolicy>().unwrap(), LoadPolicy::Strict);
        assert_eq!("Permissive".parse::<LoadPolicy>().unwrap(), LoadPolicy::Permissive);
        assert!("lenient".parse::<LoadPolicy>().is_err());
    }
}
