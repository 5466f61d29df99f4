//! Value identity of a loaded model.
//!
//! A [`ConfigFingerprint`] captures every parameter that changes how a model
//! is constructed. Two fingerprints compare equal exactly when rebuilding the
//! model would be a no-op, which is what lets the manager skip reloads.

use crate::defaults;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Backend-specific scalar flag.
///
/// Floats compare by bit pattern so the type can be `Eq + Hash`; `0.5` and
/// `0.5` are equal, `NaN` equals itself, `0.0` and `-0.0` differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PartialEq for FlagValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FlagValue::Bool(a), FlagValue::Bool(b)) => a == b,
            (FlagValue::Int(a), FlagValue::Int(b)) => a == b,
            (FlagValue::Float(a), FlagValue::Float(b)) => a.to_bits() == b.to_bits(),
            (FlagValue::Text(a), FlagValue::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FlagValue {}

impl Hash for FlagValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            FlagValue::Bool(v) => v.hash(state),
            FlagValue::Int(v) => v.hash(state),
            FlagValue::Float(v) => v.to_bits().hash(state),
            FlagValue::Text(v) => v.hash(state),
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Bool(v) => write!(f, "{}", v),
            FlagValue::Int(v) => write!(f, "{}", v),
            FlagValue::Float(v) => write!(f, "{}", v),
            FlagValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for FlagValue {
    fn from(v: bool) -> Self {
        FlagValue::Bool(v)
    }
}

impl From<i64> for FlagValue {
    fn from(v: i64) -> Self {
        FlagValue::Int(v)
    }
}

impl From<f64> for FlagValue {
    fn from(v: f64) -> Self {
        FlagValue::Float(v)
    }
}

impl From<&str> for FlagValue {
    fn from(v: &str) -> Self {
        FlagValue::Text(v.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(v: String) -> Self {
        FlagValue::Text(v)
    }
}

/// Everything that determines model identity.
///
/// Built once with the `with_*` methods and then handed to
/// [`RecognizerManager::prepare`](super::manager::RecognizerManager::prepare);
/// a configuration change produces a new fingerprint rather than mutating
/// the loaded one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigFingerprint {
    backend: String,
    model_files: BTreeMap<String, PathBuf>,
    num_threads: u32,
    sample_rate: u32,
    feature_dim: u32,
    rule_fsts: Option<PathBuf>,
    flags: BTreeMap<String, FlagValue>,
}

impl ConfigFingerprint {
    /// Start a fingerprint for `backend` with default numeric parameters.
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            model_files: BTreeMap::new(),
            num_threads: defaults::NUM_THREADS,
            sample_rate: defaults::SAMPLE_RATE,
            feature_dim: defaults::FEATURE_DIM,
            rule_fsts: None,
            flags: BTreeMap::new(),
        }
    }

    /// Add a model file under a role name (e.g. "encoder", "tokens").
    pub fn with_model_file(mut self, role: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.model_files.insert(role.into(), path.into());
        self
    }

    pub fn with_threads(mut self, num_threads: u32) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_feature_dim(mut self, feature_dim: u32) -> Self {
        self.feature_dim = feature_dim;
        self
    }

    /// Set the inverse-text-normalization rule file.
    pub fn with_rule_fsts(mut self, path: impl Into<PathBuf>) -> Self {
        self.rule_fsts = Some(path.into());
        self
    }

    pub fn with_flag(mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.flags.insert(name.into(), value.into());
        self
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn model_files(&self) -> &BTreeMap<String, PathBuf> {
        &self.model_files
    }

    pub fn model_file(&self, role: &str) -> Option<&Path> {
        self.model_files.get(role).map(PathBuf::as_path)
    }

    pub fn num_threads(&self) -> u32 {
        self.num_threads
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn feature_dim(&self) -> u32 {
        self.feature_dim
    }

    pub fn rule_fsts(&self) -> Option<&Path> {
        self.rule_fsts.as_deref()
    }

    pub fn flags(&self) -> &BTreeMap<String, FlagValue> {
        &self.flags
    }

    pub fn flag(&self, name: &str) -> Option<&FlagValue> {
        self.flags.get(name)
    }

    /// String-valued flag lookup.
    pub fn text_flag(&self, name: &str) -> Option<&str> {
        match self.flags.get(name) {
            Some(FlagValue::Text(s)) => Some(s),
            _ => None,
        }
    }
}

/// Short human-readable summary for log lines, e.g.
/// `whisper[model=ggml-base.bin] 4t 16000Hz`.
impl fmt::Display for ConfigFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.backend)?;
        for (i, (role, path)) in self.model_files.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy())
                .unwrap_or_else(|| path.to_string_lossy());
            write!(f, "{}={}", role, name)?;
        }
        write!(f, "] {}t {}Hz", self.num_threads, self.sample_rate)
    }
}
