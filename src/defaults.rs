//! Default configuration constants for voxhold.
//!
//! Shared between the config file layer, the fingerprint builder and the
//! whisper adapter so a fingerprint built from defaults matches one built
//! from an empty config file.

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for on-device speech recognition models.
pub const SAMPLE_RATE: u32 = 16000;

/// Default acoustic feature dimension (fbank bins).
pub const FEATURE_DIM: u32 = 80;

/// Default number of inference threads.
pub const NUM_THREADS: u32 = 2;

/// Default backend identifier.
pub const DEFAULT_BACKEND: &str = "whisper";

/// Model-file role that holds the main model weights.
pub const MODEL_FILE_ROLE: &str = "model";

/// Default idle time before an unused model is evicted.
///
/// 30 seconds keeps the model warm across back-to-back utterances while
/// still giving memory back when the user stops dictating.
pub const IDLE_TIMEOUT: &str = "30s";

/// Minimum number of buffered, undecoded samples before a stream reports
/// itself ready to decode (500ms at 16kHz).
pub const STREAM_READY_SAMPLES: usize = 8000;

/// Environment variable that controls log filtering.
pub const LOG_ENV: &str = "VOXHOLD_LOG";

/// Language flag value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";
