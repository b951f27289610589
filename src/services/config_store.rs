// ConfigStore Service
// Handles stream configuration persistence

use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use serde_json::Value;

use crate::models::StreamConfig;
use crate::services::encryption::Encryption;

/// Fields in stream_output.json (camelCase) that contain sensitive data and
/// are encrypted before hitting disk.
const SENSITIVE_FIELDS: &[&str] = &["streamingKey", "consumerSecret", "justinCredentials"];

/// Manages the flat stream-configuration record. Every settings-panel edit
/// writes one field and saves immediately; the pipeline builder reads the
/// record once at session start.
pub struct ConfigStore {
    config_path: PathBuf,
    app_data_dir: PathBuf,
    cache: RwLock<Option<StreamConfig>>,
    // Serializes every read-modify-write. The settings surface and the
    // credential save callback write from different threads.
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Create a new ConfigStore rooted at the host-supplied app data directory
    pub fn new(app_data_dir: PathBuf) -> Self {
        let config_path = app_data_dir.join("stream_output.json");
        Self {
            config_path,
            app_data_dir,
            cache: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    fn writer_guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, String> {
        self.write_lock
            .lock()
            .map_err(|_| "Stream configuration writer lock poisoned".to_string())
    }

    /// Load the configuration from disk, or return defaults if not found
    pub fn load(&self) -> Result<StreamConfig, String> {
        let _guard = self.writer_guard()?;
        self.load_inner()
    }

    fn load_inner(&self) -> Result<StreamConfig, String> {
        // Check cache first
        if let Ok(cache) = self.cache.read() {
            if let Some(ref config) = *cache {
                return Ok(config.clone());
            }
        }

        let config = if self.config_path.exists() {
            let content = std::fs::read_to_string(&self.config_path)
                .map_err(|e| format!("Failed to read stream configuration: {e}"))?;

            let mut user_value: Value = serde_json::from_str(&content)
                .map_err(|e| format!("Failed to parse stream configuration: {e}"))?;

            // Decrypt sensitive fields so the in-memory record is plaintext
            self.decrypt_sensitive_fields(&mut user_value);

            let defaults_value = serde_json::to_value(StreamConfig::default())
                .map_err(|e| format!("Failed to build default configuration: {e}"))?;

            let changed = merge_missing_fields(&mut user_value, &defaults_value);

            let config: StreamConfig = serde_json::from_value(user_value)
                .map_err(|e| format!("Failed to parse stream configuration: {e}"))?;

            // Re-save when the record was upgraded with new defaults
            if changed {
                self.save_internal(&config)?;
            }

            config
        } else {
            let defaults = StreamConfig::default();
            self.save_internal(&defaults)?;
            defaults
        };

        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(config.clone());
        }

        Ok(config)
    }

    /// Save the configuration to disk
    pub fn save(&self, config: &StreamConfig) -> Result<(), String> {
        let _guard = self.writer_guard()?;
        self.save_inner(config)
    }

    fn save_inner(&self, config: &StreamConfig) -> Result<(), String> {
        self.save_internal(config)?;

        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(config.clone());
        }

        Ok(())
    }

    /// Load, mutate, save as one atomic step. Used by the settings boundary
    /// and by the platform client's credential save callback; the writer
    /// lock is held across the whole read-modify-write so concurrent
    /// updaters never clobber each other's fields with a stale snapshot.
    pub fn update<F>(&self, mutate: F) -> Result<(), String>
    where
        F: FnOnce(&mut StreamConfig),
    {
        let _guard = self.writer_guard()?;
        let mut config = self.load_inner()?;
        mutate(&mut config);
        self.save_inner(&config)
    }

    /// Internal save without cache update
    fn save_internal(&self, config: &StreamConfig) -> Result<(), String> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create configuration directory: {e}"))?;
        }

        let mut value = serde_json::to_value(config)
            .map_err(|e| format!("Failed to serialize stream configuration: {e}"))?;

        // Encrypt sensitive fields before writing to disk
        self.encrypt_sensitive_fields(&mut value);

        let content = serde_json::to_string_pretty(&value)
            .map_err(|e| format!("Failed to serialize stream configuration: {e}"))?;

        std::fs::write(&self.config_path, content)
            .map_err(|e| format!("Failed to write stream configuration: {e}"))
    }

    /// Decrypt sensitive fields in a JSON Value (ENC:: -> plaintext)
    fn decrypt_sensitive_fields(&self, value: &mut Value) {
        if let Value::Object(map) = value {
            for &field in SENSITIVE_FIELDS {
                if let Some(Value::String(val)) = map.get(field) {
                    if Encryption::is_encrypted(val) {
                        match Encryption::decrypt_token(val, &self.app_data_dir) {
                            Ok(plaintext) => {
                                map.insert(field.to_string(), Value::String(plaintext));
                            }
                            Err(e) => {
                                log::warn!("Failed to decrypt configuration field '{field}': {e}");
                            }
                        }
                    }
                }
            }
        }
    }

    /// Encrypt sensitive fields in a JSON Value (plaintext -> ENC::)
    fn encrypt_sensitive_fields(&self, value: &mut Value) {
        if let Value::Object(map) = value {
            for &field in SENSITIVE_FIELDS {
                if let Some(Value::String(val)) = map.get(field) {
                    if !val.is_empty() && !Encryption::is_encrypted(val) {
                        match Encryption::encrypt_token(val, &self.app_data_dir) {
                            Ok(encrypted) => {
                                map.insert(field.to_string(), Value::String(encrypted));
                            }
                            Err(e) => {
                                log::warn!("Failed to encrypt configuration field '{field}': {e}");
                            }
                        }
                    }
                }
            }
        }
    }
}

fn merge_missing_fields(target: &mut Value, defaults: &Value) -> bool {
    match (target, defaults) {
        (Value::Object(target_map), Value::Object(defaults_map)) => {
            let mut changed = false;
            for (key, default_value) in defaults_map {
                match target_map.get_mut(key) {
                    Some(target_value) => {
                        if merge_missing_fields(target_value, default_value) {
                            changed = true;
                        }
                    }
                    None => {
                        target_map.insert(key.clone(), default_value.clone());
                        changed = true;
                    }
                }
            }
            changed
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioCodec, StreamingDestination};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_file_writes_defaults() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf());
        let config = store.load().unwrap();
        assert_eq!(config.video_bitrate, 2400);
        assert!(dir.path().join("stream_output.json").exists());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf());

        let mut config = StreamConfig::default();
        config.url = "rtmp://a.example.com/live".to_string();
        config.audio_codec = AudioCodec::Faac;
        config.streaming_destination = StreamingDestination::JustinTv;
        store.save(&config).unwrap();

        // Fresh store, no warm cache
        let store = ConfigStore::new(dir.path().to_path_buf());
        let loaded = store.load().unwrap();
        assert_eq!(loaded.url, "rtmp://a.example.com/live");
        assert_eq!(loaded.audio_codec, AudioCodec::Faac);
        assert_eq!(loaded.streaming_destination, StreamingDestination::JustinTv);
    }

    #[test]
    fn test_missing_keys_merged_from_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("stream_output.json"),
            r#"{"url": "rtmp://partial.example.com"}"#,
        )
        .unwrap();

        let store = ConfigStore::new(dir.path().to_path_buf());
        let config = store.load().unwrap();
        assert_eq!(config.url, "rtmp://partial.example.com");
        assert_eq!(config.audio_quality, 3);

        // The upgraded record was re-saved with the filled-in keys
        let content = std::fs::read_to_string(dir.path().join("stream_output.json")).unwrap();
        assert!(content.contains("audioQuality"));
    }

    #[test]
    fn test_sensitive_fields_encrypted_on_disk() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf());

        let mut config = StreamConfig::default();
        config.streaming_key = "live_stream_key".to_string();
        config.consumer_secret = "oauth_secret".to_string();
        store.save(&config).unwrap();

        let content = std::fs::read_to_string(dir.path().join("stream_output.json")).unwrap();
        assert!(!content.contains("live_stream_key"));
        assert!(!content.contains("oauth_secret"));
        assert!(content.contains("ENC::"));

        let store = ConfigStore::new(dir.path().to_path_buf());
        let loaded = store.load().unwrap();
        assert_eq!(loaded.streaming_key, "live_stream_key");
        assert_eq!(loaded.consumer_secret, "oauth_secret");
    }

    #[test]
    fn test_concurrent_updates_on_disjoint_fields_keep_both() {
        let dir = tempdir().unwrap();
        let store = Arc::new(ConfigStore::new(dir.path().to_path_buf()));

        // Settings-surface writer and credential-callback writer racing on
        // different fields; neither may clobber the other's committed value.
        let url_writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..100 {
                    store
                        .update(|config| config.url = format!("rtmp://u{i}"))
                        .unwrap();
                }
            })
        };
        let blob_writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..100 {
                    store
                        .update(|config| config.justin_credentials = format!("blob{i}"))
                        .unwrap();
                }
            })
        };
        url_writer.join().unwrap();
        blob_writer.join().unwrap();

        let store = ConfigStore::new(dir.path().to_path_buf());
        let config = store.load().unwrap();
        assert_eq!(config.url, "rtmp://u99");
        assert_eq!(config.justin_credentials, "blob99");
    }

    #[test]
    fn test_update_mutates_single_field() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf());
        store
            .update(|config| config.justin_credentials = "blob".to_string())
            .unwrap();

        let store = ConfigStore::new(dir.path().to_path_buf());
        assert_eq!(store.load().unwrap().justin_credentials, "blob");
    }
}
