use crate::defaults;
use crate::error::{Result, VoxholdError};
use crate::recognizer::fingerprint::{ConfigFingerprint, FlagValue};
use crate::recognizer::scheduler::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub recognizer: RecognizerConfig,
    pub retention: RetentionConfig,
}

/// Model construction parameters; everything here ends up in the fingerprint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognizerConfig {
    pub backend: String,
    pub threads: u32,
    pub sample_rate: u32,
    pub feature_dim: u32,
    pub rule_fsts: Option<PathBuf>,
    pub model_files: BTreeMap<String, PathBuf>,
    pub flags: BTreeMap<String, FlagValue>,
}

/// Idle eviction configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    /// Human-readable duration, e.g. "30s", "5m", "0s"
    pub idle_timeout: String,
    pub always_keep: bool,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            backend: defaults::DEFAULT_BACKEND.to_string(),
            threads: defaults::NUM_THREADS,
            sample_rate: defaults::SAMPLE_RATE,
            feature_dim: defaults::FEATURE_DIM,
            rule_fsts: None,
            model_files: BTreeMap::new(),
            flags: BTreeMap::new(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: defaults::IDLE_TIMEOUT.to_string(),
            always_keep: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXHOLD_BACKEND → recognizer.backend
    /// - VOXHOLD_MODEL → recognizer.model_files.model
    /// - VOXHOLD_THREADS → recognizer.threads
    /// - VOXHOLD_IDLE_TIMEOUT → retention.idle_timeout
    /// - VOXHOLD_ALWAYS_KEEP → retention.always_keep ("1", "true" or "yes"
    ///   enable it; any other non-empty value disables it)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(backend) = std::env::var("VOXHOLD_BACKEND")
            && !backend.is_empty()
        {
            self.recognizer.backend = backend;
        }

        if let Ok(model) = std::env::var("VOXHOLD_MODEL")
            && !model.is_empty()
        {
            self.recognizer
                .model_files
                .insert(defaults::MODEL_FILE_ROLE.to_string(), PathBuf::from(model));
        }

        if let Ok(threads) = std::env::var("VOXHOLD_THREADS") {
            match threads.parse::<u32>() {
                Ok(n) if n > 0 => self.recognizer.threads = n,
                _ if threads.is_empty() => {}
                _ => tracing::warn!(value = %threads, "ignoring invalid VOXHOLD_THREADS"),
            }
        }

        if let Ok(timeout) = std::env::var("VOXHOLD_IDLE_TIMEOUT")
            && !timeout.is_empty()
        {
            self.retention.idle_timeout = timeout;
        }

        if let Ok(keep) = std::env::var("VOXHOLD_ALWAYS_KEEP")
            && !keep.is_empty()
        {
            self.retention.always_keep = matches!(keep.as_str(), "1" | "true" | "yes");
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxhold/config.toml on Linux, `None` if the platform
    /// has no config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("voxhold").join("config.toml"))
    }

    /// Model identity described by the `[recognizer]` section
    pub fn fingerprint(&self) -> ConfigFingerprint {
        let r = &self.recognizer;
        let mut fingerprint = ConfigFingerprint::new(r.backend.as_str())
            .with_threads(r.threads)
            .with_sample_rate(r.sample_rate)
            .with_feature_dim(r.feature_dim);
        for (role, path) in &r.model_files {
            fingerprint = fingerprint.with_model_file(role.as_str(), path.as_path());
        }
        if let Some(rule_fsts) = &r.rule_fsts {
            fingerprint = fingerprint.with_rule_fsts(rule_fsts.as_path());
        }
        for (name, value) in &r.flags {
            fingerprint = fingerprint.with_flag(name.as_str(), value.clone());
        }
        fingerprint
    }

    /// Eviction policy described by the `[retention]` section
    pub fn retention(&self) -> Result<RetentionPolicy> {
        let idle_timeout = humantime::parse_duration(self.retention.idle_timeout.trim())
            .map_err(|e| VoxholdError::ConfigInvalidValue {
                key: "retention.idle_timeout".to_string(),
                message: format!("{} (expected e.g. \"30s\" or \"5m\")", e),
            })?;
        Ok(RetentionPolicy {
            idle_timeout,
            always_keep: self.retention.always_keep,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_voxhold_env() {
        for key in [
            "VOXHOLD_BACKEND",
            "VOXHOLD_MODEL",
            "VOXHOLD_THREADS",
            "VOXHOLD_IDLE_TIMEOUT",
            "VOXHOLD_ALWAYS_KEEP",
        ] {
            remove_env(key);
        }
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.recognizer.backend, "whisper");
        assert_eq!(config.recognizer.threads, 2);
        assert_eq!(config.recognizer.sample_rate, 16000);
        assert_eq!(config.recognizer.feature_dim, 80);
        assert_eq!(config.recognizer.rule_fsts, None);
        assert!(config.recognizer.model_files.is_empty());
        assert!(config.recognizer.flags.is_empty());

        assert_eq!(config.retention.idle_timeout, "30s");
        assert!(!config.retention.always_keep);
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_config(
            r#"
            [recognizer]
            backend = "sherpa-transducer"
            threads = 4
            sample_rate = 16000
            feature_dim = 80
            rule_fsts = "/models/itn_zh_number.fst"

            [recognizer.model_files]
            encoder = "/models/encoder-epoch-99-avg-1.onnx"
            decoder = "/models/decoder-epoch-99-avg-1.onnx"
            joiner = "/models/joiner-epoch-99-avg-1.onnx"
            tokens = "/models/tokens.txt"

            [recognizer.flags]
            decoding_method = "modified_beam_search"
            max_active_paths = 4
            hotwords_score = 1.5
            enable_endpoint = true

            [retention]
            idle_timeout = "5m"
            always_keep = false
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.recognizer.backend, "sherpa-transducer");
        assert_eq!(config.recognizer.threads, 4);
        assert_eq!(config.recognizer.model_files.len(), 4);
        assert_eq!(
            config.recognizer.flags["max_active_paths"],
            FlagValue::Int(4)
        );
        assert_eq!(
            config.retention().unwrap(),
            RetentionPolicy::idle_after(Duration::from_secs(300))
        );

        let fingerprint = config.fingerprint();
        assert_eq!(fingerprint.backend(), "sherpa-transducer");
        assert_eq!(fingerprint.num_threads(), 4);
        assert_eq!(
            fingerprint.model_file("tokens"),
            Some(Path::new("/models/tokens.txt"))
        );
        assert_eq!(
            fingerprint.rule_fsts(),
            Some(Path::new("/models/itn_zh_number.fst"))
        );
        assert_eq!(
            fingerprint.text_flag("decoding_method"),
            Some("modified_beam_search")
        );
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_config(
            r#"
            [retention]
            always_keep = true
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert!(config.retention.always_keep);
        assert_eq!(config.retention.idle_timeout, "30s");
        assert_eq!(config.recognizer, RecognizerConfig::default());
    }

    #[test]
    fn test_same_file_gives_equal_fingerprints() {
        let contents = r#"
            [recognizer.model_files]
            model = "/models/ggml-base.bin"
            [recognizer.flags]
            language = "de"
        "#;
        let a = Config::load(write_config(contents).path()).unwrap();
        let b = Config::load(write_config(contents).path()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = b.clone();
        c.recognizer.threads = 8;
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_retention_parsing() {
        let mut config = Config::default();
        assert_eq!(
            config.retention().unwrap(),
            RetentionPolicy::idle_after(Duration::from_secs(30))
        );

        config.retention.idle_timeout = "0s".to_string();
        assert_eq!(config.retention().unwrap(), RetentionPolicy::immediate());

        config.retention.idle_timeout = "1h30m".to_string();
        assert_eq!(
            config.retention().unwrap().idle_timeout,
            Duration::from_secs(5400)
        );

        config.retention.idle_timeout = "soon".to_string();
        match config.retention() {
            Err(VoxholdError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "retention.idle_timeout");
            }
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_env_override_model_and_threads() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxhold_env();

        set_env("VOXHOLD_MODEL", "/models/ggml-tiny.en.bin");
        set_env("VOXHOLD_THREADS", "6");
        let config = Config::default().with_env_overrides();

        assert_eq!(
            config.recognizer.model_files.get("model"),
            Some(&PathBuf::from("/models/ggml-tiny.en.bin"))
        );
        assert_eq!(config.recognizer.threads, 6);
        assert_eq!(config.recognizer.backend, "whisper"); // Not overridden

        clear_voxhold_env();
    }

    #[test]
    fn test_env_override_retention() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxhold_env();

        set_env("VOXHOLD_IDLE_TIMEOUT", "2m");
        set_env("VOXHOLD_ALWAYS_KEEP", "true");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.retention.idle_timeout, "2m");
        assert!(config.retention.always_keep);

        clear_voxhold_env();
    }

    #[test]
    fn test_env_override_always_keep_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxhold_env();

        for (value, expected) in [("1", true), ("true", true), ("yes", true), ("no", false), ("0", false)] {
            set_env("VOXHOLD_ALWAYS_KEEP", value);
            let mut config = Config::default();
            config.retention.always_keep = !expected;
            let config = config.with_env_overrides();
            assert_eq!(config.retention.always_keep, expected, "value {:?}", value);
        }

        // Empty leaves the file value alone
        set_env("VOXHOLD_ALWAYS_KEEP", "");
        let mut config = Config::default();
        config.retention.always_keep = true;
        assert!(config.with_env_overrides().retention.always_keep);

        clear_voxhold_env();
    }

    #[test]
    fn test_env_override_invalid_or_empty_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxhold_env();

        set_env("VOXHOLD_THREADS", "many");
        set_env("VOXHOLD_BACKEND", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.recognizer.threads, 2);
        assert_eq!(config.recognizer.backend, "whisper");

        clear_voxhold_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_config(
            r#"
            [recognizer
            backend = "broken
        "#,
        );

        assert!(Config::load(temp_file.path()).is_err());
        let err = Config::load_or_default(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_voxhold_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_default_path_ends_with_app_dir() {
        if let Some(path) = Config::default_path() {
            assert!(path.ends_with("voxhold/config.toml"));
        }
    }
}
