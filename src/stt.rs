//! Concrete inference backends.

pub mod whisper;

pub use whisper::WhisperBackend;
